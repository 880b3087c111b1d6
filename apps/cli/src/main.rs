//! docgrab CLI — crawl documentation, filter it with an LM judge, and
//! extract structured Markdown with content-addressed caching.

mod commands;

use std::process::ExitCode;

use clap::Parser;

use commands::Cli;
use docgrab_shared::DocgrabError;

/// Map an error to the process exit code.
///
/// Invocation errors (the `--enable-filtering`/`--target-topic` invariant,
/// bad URLs) exit 2, matching clap's own usage errors; everything else —
/// config problems like out-of-range limits or a missing API key, and
/// run-level failures — exits 1.
fn exit_code(err: &DocgrabError) -> u8 {
    match err {
        DocgrabError::Validation { .. } => 2,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    if color_eyre::install().is_err() {
        eprintln!("warning: failed to install error report handler");
    }

    let cli = Cli::parse();
    commands::init_tracing(&cli);

    match commands::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::from(exit_code(&err))
        }
    }
}
