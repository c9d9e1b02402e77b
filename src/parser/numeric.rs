//! Lenient number extraction for table cells
//!
//! Table renderers truncate and decorate numbers (`1,071…`, `85.2 ms`), so a
//! cell is first stripped down to digits and dots. If that does not parse,
//! the first digit run (with thousands separators) is used instead.

use once_cell::sync::Lazy;
use regex::Regex;

/// First run of digits, thousands separators and an optional fraction
static DIGIT_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\d,]+\.?\d*").expect("Failed to compile digit-run regex"));

/// Extract a number from a decorated cell; `None` when no digits are present
pub fn parse_cell_number(cell: &str) -> Option<f64> {
    let stripped: String = cell
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if !stripped.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    if let Ok(value) = stripped.parse::<f64>() {
        return Some(value);
    }

    let run = DIGIT_RUN.find(cell)?;
    let cleaned = run.as_str().replace(',', "");
    cleaned.trim_end_matches('.').parse::<f64>().ok()
}
