//! Post-conversion cleanup passes for Markdown output.
//!
//! Each pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.to_string();

    result = fix_code_block_languages(&result);
    result = strip_leftover_html(&result);
    result = clean_blank_lines(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Fix code block language hints
// ---------------------------------------------------------------------------

/// Rewrite class-style fence hints (`language-js`, `lang-python`) to plain
/// language names.
fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^```(?:language-|lang-|highlight-)(\w+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "```$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 2: Strip leftover container tags
// ---------------------------------------------------------------------------

/// Remove stray container tags that survived conversion, outside code fences.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary)(?:\s[^>]*)?>",
        )
        .expect("valid regex")
    });

    let mut result = String::with_capacity(md.len());
    let mut in_code_block = false;

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
            result.push_str(line);
        } else if in_code_block {
            result.push_str(line);
        } else {
            result.push_str(&HTML_TAG_RE.replace_all(line, ""));
        }
        result.push('\n');
    }

    if result.ends_with('\n') {
        result.pop();
    }
    result
}

// ---------------------------------------------------------------------------
// Pass 3: Collapse excessive blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of 3+ blank lines into exactly one blank line.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md.trim(), "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Trailing newline
// ---------------------------------------------------------------------------

fn ensure_trailing_newline(md: &str) -> String {
    if md.is_empty() || md.ends_with('\n') {
        md.to_string()
    } else {
        format!("{md}\n")
    }
}
