//! Box-drawn console table parsing
//!
//! Console output from the load generator is a sequence of blocks, each
//! headed by `<label> - Concurrency: <n>` and holding a table with one row
//! per latency metric and columns `avg, min, max, p99, p90, p75`. Long row
//! labels wrap onto following lines, so a row's label is only resolved once
//! the continuation lines have been read.
//!
//! Latency rows contribute their p90 column. Throughput rows (from the
//! two-column `Statistic | Value` table) and the output sequence length row
//! contribute their first value as the average. Unparseable values stay
//! unknown and a wholly unparseable input yields no samples.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::numeric::parse_cell_number;
use crate::samples::{
    MetricsSample, StatKind, INTER_TOKEN_LATENCY, OUTPUT_SEQUENCE_LENGTH, OUTPUT_TOKEN_THROUGHPUT,
    OUTPUT_TOKEN_THROUGHPUT_PER_USER, REQUEST_LATENCY, REQUEST_THROUGHPUT, TIME_TO_FIRST_TOKEN,
    TIME_TO_SECOND_TOKEN,
};

static BLOCK_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-\s*Concurrency:\s*(\d+)").expect("Failed to compile block header regex")
});

const CELL_DELIMITER: char = '│';
const TABLE_END: char = '└';
const HEADER_BORDERS: [char; 3] = ['┃', '┡', '│'];

/// Maximum number of wrapped lines joined onto a row label
pub const MAX_LABEL_CONTINUATION: usize = 3;

/// A data row whose label may still continue on following lines
#[derive(Debug, Clone)]
struct PendingRow {
    label: String,
    avg: Option<f64>,
    p90: Option<f64>,
}

#[derive(Debug, Clone)]
enum State {
    Scanning,
    InTable,
    AwaitingLabelContinuation { row: PendingRow, lines_seen: usize },
}

/// Parser for concurrency-tagged console tables
#[derive(Debug, Clone, Default)]
pub struct TextTableParser {
    default_concurrency: Option<u32>,
}

impl TextTableParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute rows that appear before any block header to `concurrency`
    pub fn with_default_concurrency(mut self, concurrency: u32) -> Self {
        self.default_concurrency = Some(concurrency).filter(|c| *c > 0);
        self
    }

    /// Parse all blocks, ordered by concurrency; a repeated concurrency
    /// keeps the later block
    pub fn parse(&self, text: &str) -> Vec<MetricsSample> {
        let lines: Vec<&str> = text.lines().collect();
        let mut blocks: BTreeMap<u32, MetricsSample> = BTreeMap::new();
        let mut current = self
            .default_concurrency
            .and_then(|c| MetricsSample::new(c).ok());
        let mut state = State::Scanning;

        for (idx, line) in lines.iter().enumerate() {
            if let Some(caps) = BLOCK_HEADER.captures(line) {
                finish_row(&mut state, current.as_mut());
                flush_block(&mut blocks, current.take());
                state = State::Scanning;

                current = match caps[1].parse::<u32>() {
                    Ok(concurrency) if concurrency > 0 => MetricsSample::new(concurrency).ok(),
                    _ => {
                        warn!(line = idx + 1, header = %line.trim(), "Ignoring block with invalid concurrency");
                        None
                    }
                };
                continue;
            }

            state = match std::mem::replace(&mut state, State::Scanning) {
                State::Scanning => {
                    if starts_table(line, lines.get(idx + 1).copied()) {
                        State::InTable
                    } else {
                        State::Scanning
                    }
                }
                State::InTable => table_line(line, None, current.as_mut()),
                State::AwaitingLabelContinuation { row, lines_seen } => {
                    table_line(line, Some((row, lines_seen)), current.as_mut())
                }
            };
        }

        finish_row(&mut state, current.as_mut());
        flush_block(&mut blocks, current.take());

        blocks.into_values().collect()
    }
}

/// Parse console text with no default concurrency
pub fn parse_text_report(text: &str) -> Vec<MetricsSample> {
    TextTableParser::new().parse(text)
}

/// Advance the state machine by one line inside a table
fn table_line(
    line: &str,
    pending: Option<(PendingRow, usize)>,
    block: Option<&mut MetricsSample>,
) -> State {
    let mut block = block;

    if line.contains(TABLE_END) {
        if let Some((row, _)) = pending {
            resolve_row(row, block.as_deref_mut());
        }
        return State::Scanning;
    }

    if is_border_line(line) {
        if let Some((row, _)) = pending {
            resolve_row(row, block.as_deref_mut());
        }
        return State::InTable;
    }

    if let Some(cells) = data_cells(line) {
        if let Some((row, _)) = pending {
            resolve_row(row, block.as_deref_mut());
        }
        let row = PendingRow {
            label: cells[0].to_string(),
            avg: cells.get(1).copied().and_then(parse_cell_number),
            p90: p90_cell(&cells).and_then(parse_cell_number),
        };
        return State::AwaitingLabelContinuation { row, lines_seen: 0 };
    }

    match pending {
        Some((mut row, lines_seen)) => {
            let text = continuation_text(line);
            if !text.is_empty() {
                row.label.push(' ');
                row.label.push_str(&text);
            }
            let lines_seen = lines_seen + 1;
            if lines_seen >= MAX_LABEL_CONTINUATION {
                resolve_row(row, block);
                State::InTable
            } else {
                State::AwaitingLabelContinuation { row, lines_seen }
            }
        }
        None => State::InTable,
    }
}

fn finish_row(state: &mut State, block: Option<&mut MetricsSample>) {
    if let State::AwaitingLabelContinuation { row, .. } =
        std::mem::replace(state, State::Scanning)
    {
        resolve_row(row, block);
    }
}

fn flush_block(blocks: &mut BTreeMap<u32, MetricsSample>, block: Option<MetricsSample>) {
    let Some(sample) = block else { return };
    if sample.is_empty() {
        debug!(concurrency = sample.concurrency(), "Dropping block without values");
        return;
    }
    blocks.insert(sample.concurrency(), sample);
}

/// Map a fully joined row label to its metric and record its value
fn resolve_row(row: PendingRow, block: Option<&mut MetricsSample>) {
    let Some(metric) = classify_label(&row.label) else {
        return;
    };
    let kind = row_stat(metric);
    let value = match kind {
        StatKind::Avg => row.avg,
        _ => row.p90,
    };
    match (value, block) {
        (Some(value), Some(sample)) => sample.set_stat(metric, kind, value),
        (None, _) => debug!(metric, stat = %kind, label = %row.label, "Row has no value"),
        (Some(_), None) => debug!(metric, "Row outside any block"),
    }
}

/// Statistic a console row contributes for `metric`
fn row_stat(metric: &str) -> StatKind {
    match metric {
        REQUEST_THROUGHPUT
        | OUTPUT_TOKEN_THROUGHPUT
        | OUTPUT_TOKEN_THROUGHPUT_PER_USER
        | OUTPUT_SEQUENCE_LENGTH => StatKind::Avg,
        _ => StatKind::P90,
    }
}

/// Metric for a (possibly wrapped) row label
pub fn classify_label(label: &str) -> Option<&'static str> {
    let label = label.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();

    if label.contains("time to") {
        if label.contains("second") {
            return Some(TIME_TO_SECOND_TOKEN);
        }
        if label.contains("first") {
            return Some(TIME_TO_FIRST_TOKEN);
        }
        return None;
    }
    if label.contains("inter") && (label.contains("token") || label.contains("latency")) {
        return Some(INTER_TOKEN_LATENCY);
    }
    if label.contains("request latency") {
        return Some(REQUEST_LATENCY);
    }
    if label.contains("request throughput") {
        return Some(REQUEST_THROUGHPUT);
    }
    if label.contains("output token throughput") {
        if label.contains("per user") {
            return Some(OUTPUT_TOKEN_THROUGHPUT_PER_USER);
        }
        return Some(OUTPUT_TOKEN_THROUGHPUT);
    }
    if label.contains("output sequence length") {
        return Some(OUTPUT_SEQUENCE_LENGTH);
    }
    None
}

fn starts_table(line: &str, next: Option<&str>) -> bool {
    let header_cue = line.contains("Statist") || line.contains("avg");
    if header_cue && line.contains(HEADER_BORDERS) {
        return true;
    }
    let separator = line.contains('┡') || (line.contains('━') && line.contains('┃'));
    separator && next.and_then(data_cells).is_some()
}

/// A line made only of box-drawing characters and whitespace
fn is_border_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.chars().any(char::is_alphanumeric)
}

/// Cells of a `│`-delimited row, without the empty outer border cells
fn split_cells(line: &str) -> Vec<&str> {
    let mut cells: Vec<&str> = line.split(CELL_DELIMITER).map(str::trim).collect();
    if cells.first().is_some_and(|c| c.is_empty()) {
        cells.remove(0);
    }
    if cells.last().is_some_and(|c| c.is_empty()) {
        cells.pop();
    }
    cells
}

/// Cells of a data row: a delimited row with a digit in some value cell
fn data_cells(line: &str) -> Option<Vec<&str>> {
    if !line.contains(CELL_DELIMITER) {
        return None;
    }
    let cells = split_cells(line);
    let has_value = cells
        .iter()
        .skip(1)
        .any(|c| c.chars().any(|ch| ch.is_ascii_digit()));
    (cells.len() > 1 && has_value).then_some(cells)
}

/// The p90 cell; a row missing one column is read with a one-column shift
fn p90_cell<'a>(cells: &[&'a str]) -> Option<&'a str> {
    match cells.len() {
        n if n >= 7 => Some(cells[5]),
        6 => Some(cells[4]),
        _ => None,
    }
}

fn continuation_text(line: &str) -> String {
    if line.contains(CELL_DELIMITER) {
        split_cells(line)
            .first()
            .map(|c| c.to_string())
            .unwrap_or_default()
    } else {
        line.trim()
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '(' && c != ')')
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_BLOCKS: &str = "\
agg - Concurrency: 10
                      NVIDIA GenAI-Perf | LLM Metrics
┏━━━━━━━━━━━━━━━━━━┳━━━━━━━━┳━━━━━━━┳━━━━━━━━┳━━━━━━━━┳━━━━━━━━┳━━━━━━━━┓
┃        Statistic ┃    avg ┃   min ┃    max ┃    p99 ┃    p90 ┃    p75 ┃
┡━━━━━━━━━━━━━━━━━━╇━━━━━━━━╇━━━━━━━╇━━━━━━━━╇━━━━━━━━╇━━━━━━━━╇━━━━━━━━┩
│    Time To First │  80.10 │ 40.00 │ 120.00 │ 110.00 │  95.50 │  85.00 │
│       Token (ms) │        │       │        │        │        │        │
│   Time To Second │  20.00 │ 10.00 │  30.00 │  29.00 │  25.00 │  22.00 │
│       Token (ms) │        │       │        │        │        │        │
│ Inter Token      │   5.10 │  4.00 │   7.00 │   6.90 │   6.20 │   5.50 │
│ Latency (ms)     │        │       │        │        │        │        │
│ Request          │ 1,071… │  900… │ 1,200… │ 1,190… │ 1,150… │ 1,100… │
│ Latency (ms)     │        │       │        │        │        │        │
└──────────────────┴────────┴───────┴────────┴────────┴────────┴────────┘
agg - Concurrency: 20
┏━━━━━━━━━━━━━━━━━━┳━━━━━━━━┳━━━━━━━┳━━━━━━━━┳━━━━━━━━┳━━━━━━━━┳━━━━━━━━┓
┃        Statistic ┃    avg ┃   min ┃    max ┃    p99 ┃    p90 ┃    p75 ┃
┡━━━━━━━━━━━━━━━━━━╇━━━━━━━━╇━━━━━━━╇━━━━━━━━╇━━━━━━━━╇━━━━━━━━╇━━━━━━━━┩
│ Time To First Token (ms) │ 90.00 │ 50.00 │ 130.00 │ 125.00 │ 101.00 │ 95.00 │
│ Inter Token Latency (ms) │ 6.00 │ 5.00 │ 8.00 │ 7.90 │ 7.10 │ 6.50 │
└──────────────────────────┴───────┴───────┴────────┴────────┴────────┴───────┘
";

    #[test]
    fn test_wrapped_labels() {
        let samples = parse_text_report(TWO_BLOCKS);
        assert_eq!(samples.len(), 2);

        let first = &samples[0];
        assert_eq!(first.concurrency(), 10);
        assert_eq!(first.stat(TIME_TO_FIRST_TOKEN, StatKind::P90), Some(95.5));
        assert_eq!(first.stat(TIME_TO_SECOND_TOKEN, StatKind::P90), Some(25.0));
        assert_eq!(first.stat(INTER_TOKEN_LATENCY, StatKind::P90), Some(6.2));
        assert_eq!(first.stat(REQUEST_LATENCY, StatKind::P90), Some(1150.0));

        let second = &samples[1];
        assert_eq!(second.concurrency(), 20);
        assert_eq!(second.stat(TIME_TO_FIRST_TOKEN, StatKind::P90), Some(101.0));
        assert_eq!(second.stat(INTER_TOKEN_LATENCY, StatKind::P90), Some(7.1));
    }

    #[test]
    fn test_throughput_table_fills_averages() {
        let text = "\
x - Concurrency: 12
┃ Statistic ┃ avg ┃ min ┃ max ┃ p99 ┃ p90 ┃ p75 ┃
│ Time To First Token (ms) │ 1 │ 1 │ 1 │ 1 │ 64 │ 1 │
│ Output Sequence      │ 150.00 │ 140.00 │ 160.00 │ 159.00 │ 155.00 │ 151.00 │
│ Length (tokens)      │        │        │        │        │        │        │
│ Output Token Throughput Per User │ 40.00 │ 30.00 │ 50.00 │ 49.00 │ 48.00 │ 45.00 │
└───┘
┏━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┳━━━━━━━━━━┓
┃                           Statistic ┃    Value ┃
┡━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━╇━━━━━━━━━━┩
│  Output Token Throughput (tokens/s) │ 1,204.50 │
│        Request Throughput (per sec) │     8.03 │
└─────────────────────────────────────┴──────────┘
";
        let samples = parse_text_report(text);
        assert_eq!(samples.len(), 1);

        let sample = &samples[0];
        assert_eq!(sample.stat(TIME_TO_FIRST_TOKEN, StatKind::P90), Some(64.0));
        assert_eq!(sample.stat(REQUEST_THROUGHPUT, StatKind::Avg), Some(8.03));
        assert_eq!(sample.stat(OUTPUT_TOKEN_THROUGHPUT, StatKind::Avg), Some(1204.5));
        assert_eq!(sample.stat(OUTPUT_SEQUENCE_LENGTH, StatKind::Avg), Some(150.0));
        assert_eq!(sample.stat(OUTPUT_TOKEN_THROUGHPUT_PER_USER, StatKind::Avg), Some(40.0));
        assert_eq!(sample.stat(REQUEST_THROUGHPUT, StatKind::P90), None);
    }

    #[test]
    fn test_second_token_never_counts_as_first() {
        let text = "\
x - Concurrency: 5
┃ Statistic ┃ avg ┃ min ┃ max ┃ p99 ┃ p90 ┃ p75 ┃
│ Time To Second │ 1 │ 1 │ 1 │ 1 │ 42 │ 1 │
│ Token (ms) │ │ │ │ │ │ │
└───┘
";
        let samples = parse_text_report(text);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].stat(TIME_TO_FIRST_TOKEN, StatKind::P90), None);
        assert_eq!(samples[0].stat(TIME_TO_SECOND_TOKEN, StatKind::P90), Some(42.0));
    }

    #[test]
    fn test_partial_block_at_end_of_input() {
        let text = "\
x - Concurrency: 8
┃ Statistic ┃ avg ┃ min ┃ max ┃ p99 ┃ p90 ┃ p75 ┃
│ Time To First Token (ms) │ 1 │ 1 │ 1 │ 1 │ 77.5 │ 1 │";
        let samples = parse_text_report(text);

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].stat(TIME_TO_FIRST_TOKEN, StatKind::P90), Some(77.5));
        assert_eq!(samples[0].stat(INTER_TOKEN_LATENCY, StatKind::P90), None);
    }

    #[test]
    fn test_missing_column_shift() {
        let text = "\
x - Concurrency: 3
┃ Statistic ┃ avg ┃ min ┃ max ┃ p99 ┃ p90 ┃
│ Inter Token Latency (ms) │ 5 │ 4 │ 9 │ 8.5 │ 7.25 │
└───┘
";
        let samples = parse_text_report(text);
        assert_eq!(samples[0].stat(INTER_TOKEN_LATENCY, StatKind::P90), Some(7.25));
    }

    #[test]
    fn test_separator_followed_by_data_starts_table() {
        let text = "\
x - Concurrency: 4
┡━━━━━━━╇━━━━━┩
│ Time To First Token │ 1 │ 1 │ 1 │ 1 │ 12 │ 1 │
";
        let samples = parse_text_report(text);
        assert_eq!(samples[0].stat(TIME_TO_FIRST_TOKEN, StatKind::P90), Some(12.0));
    }

    #[test]
    fn test_empty_block_dropped_and_zero_concurrency_ignored() {
        let text = "\
a - Concurrency: 0
┃ Statistic ┃ avg ┃ min ┃ max ┃ p99 ┃ p90 ┃ p75 ┃
│ Time To First Token │ 1 │ 1 │ 1 │ 1 │ 12 │ 1 │
b - Concurrency: 7
nothing useful here
";
        assert!(parse_text_report(text).is_empty());
    }

    #[test]
    fn test_later_duplicate_wins() {
        let block = |p90: &str| {
            format!(
                "x - Concurrency: 2\n┃ Statistic ┃ avg ┃\n│ Time To First Token │ 1 │ 1 │ 1 │ 1 │ {} │ 1 │\n",
                p90
            )
        };
        let text = format!("{}{}", block("10"), block("20"));
        let samples = parse_text_report(&text);

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].stat(TIME_TO_FIRST_TOKEN, StatKind::P90), Some(20.0));
    }

    #[test]
    fn test_default_concurrency_for_headerless_output() {
        let text = "\
┃ Statistic ┃ avg ┃ min ┃ max ┃ p99 ┃ p90 ┃ p75 ┃
│ Request Latency (ms) │ 1 │ 1 │ 1 │ 1 │ 300 │ 1 │
";
        assert!(parse_text_report(text).is_empty());

        let samples = TextTableParser::new().with_default_concurrency(16).parse(text);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].concurrency(), 16);
        assert_eq!(samples[0].stat(REQUEST_LATENCY, StatKind::P90), Some(300.0));
    }

    #[test]
    fn test_parsing_is_idempotent() {
        assert_eq!(parse_text_report(TWO_BLOCKS), parse_text_report(TWO_BLOCKS));
    }

    #[test]
    fn test_unparseable_text() {
        assert!(parse_text_report("garbage\n\u{0}\nmore garbage").is_empty());
        assert!(parse_text_report("").is_empty());
    }

    #[test]
    fn test_classify_label() {
        assert_eq!(classify_label("Time To First Token (ms)"), Some(TIME_TO_FIRST_TOKEN));
        assert_eq!(classify_label("Time  To\nSecond Token"), Some(TIME_TO_SECOND_TOKEN));
        assert_eq!(classify_label("Time To"), None);
        assert_eq!(classify_label("Inter Token Latency (ms)"), Some(INTER_TOKEN_LATENCY));
        assert_eq!(classify_label("Inter"), None);
        assert_eq!(classify_label("Request Latency (ms)"), Some(REQUEST_LATENCY));
        assert_eq!(classify_label("Request Throughput (per sec)"), None);
    }
}
