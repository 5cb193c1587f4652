//! Content structure hints for recognized text.
//!
//! Cheap checks for tabular data and source code. They are passed to the
//! LLM as advisory context next to the OCR confidence; nothing gates on them.

use regex::Regex;
use std::sync::LazyLock;

static CODE_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(import|from|const|let|var|function|def|class|fn|pub|return|if|for|while)\b").unwrap()
});

static ERROR_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(Error|Traceback|Exception|at )|error\[E\d+\]|panic!").unwrap());

static CELL_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\t|\||\s{2,}").unwrap());

fn non_empty_lines(text: &str) -> Vec<&str> {
    text.lines().filter(|l| !l.trim().is_empty()).collect()
}

fn majority(lines: &[&str], pred: impl Fn(&str) -> bool) -> bool {
    lines.iter().filter(|l| pred(**l)).count() * 2 > lines.len()
}

/// True if the text looks tabular: most lines split into three or more
/// cells on a tab, a pipe, or a run of two or more spaces. A single
/// recognized line counts, since the recognizer reads one row at a time.
pub fn detect_table_structure(text: &str) -> bool {
    let lines = non_empty_lines(text);
    if lines.is_empty() {
        return false;
    }
    majority(&lines, |l| {
        CELL_SEPARATOR
            .split(l.trim())
            .filter(|cell| !cell.trim().is_empty())
            .count()
            >= 3
    })
}

/// True if at least two independent code indicators match.
pub fn detect_code_structure(text: &str) -> bool {
    let lines = non_empty_lines(text);
    let indicators = [
        lines.iter().any(|l| CODE_KEYWORD.is_match(l)),
        lines.iter().any(|l| {
            let t = l.trim_end();
            t.ends_with('{') || t.ends_with('}') || t.ends_with(';') || t.ends_with(')')
        }),
        lines.iter().filter(|l| l.starts_with("  ") || l.starts_with('\t')).count() > 1,
        lines.iter().any(|l| ERROR_MARKER.is_match(l)),
        lines.iter().any(|l| {
            let t = l.trim_start();
            t.starts_with("//") || t.starts_with('#') || t.starts_with("/*")
        }),
    ];
    indicators.iter().filter(|hit| **hit).count() >= 2
}
