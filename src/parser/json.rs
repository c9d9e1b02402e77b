//! JSON profile-export parsing
//!
//! Top-level keys are metric names. A value holding any statistic key
//! (`avg`, `p90`, ...) is a metric; other objects are flattened into
//! underscore-joined names. Raw `data` arrays are only counted.

use serde_json::{Map, Value};

use super::ReportError;
use crate::samples::{
    MetricsSample, SequenceLengths, Stat, StatKind, INPUT_SEQUENCE_LENGTH, OUTPUT_SEQUENCE_LENGTH,
};

/// Parse a JSON report taken at `concurrency`
pub fn parse_json_report(content: &str, concurrency: u32) -> Result<MetricsSample, ReportError> {
    let value: Value = serde_json::from_str(content)?;
    parse_json_value(&value, concurrency)
}

/// Build a sample from an already-decoded JSON document
pub fn parse_json_value(value: &Value, concurrency: u32) -> Result<MetricsSample, ReportError> {
    let root = value.as_object().ok_or(ReportError::NotAnObject)?;
    let mut sample = MetricsSample::new(concurrency)?;

    for (key, value) in root {
        match value {
            Value::Object(map) => flatten_object(&mut sample, key, map),
            Value::Number(n) => {
                if let Some(v) = n.as_f64() {
                    sample.set_scalar(key.clone(), v);
                }
            }
            Value::Array(items) => sample.set_scalar(format!("{}_count", key), items.len() as f64),
            _ => {}
        }
    }

    let lengths = SequenceLengths {
        input_avg: sample.stat(INPUT_SEQUENCE_LENGTH, StatKind::Avg),
        output_avg: sample.stat(OUTPUT_SEQUENCE_LENGTH, StatKind::Avg),
    };
    if lengths.input_avg.is_some() || lengths.output_avg.is_some() {
        sample.set_sequence_lengths(lengths);
    }

    Ok(sample)
}

fn is_stat_shaped(map: &Map<String, Value>) -> bool {
    map.keys().any(|k| StatKind::from_name(k).is_some())
}

fn flatten_object(sample: &mut MetricsSample, prefix: &str, map: &Map<String, Value>) {
    if is_stat_shaped(map) {
        extract_stat(sample, prefix, map);
        return;
    }

    for (key, value) in map {
        let name = format!("{}_{}", prefix, key);
        match value {
            Value::Object(nested) => flatten_object(sample, &name, nested),
            Value::Number(n) => {
                if let Some(v) = n.as_f64() {
                    sample.set_scalar(name, v);
                }
            }
            Value::Array(items) => sample.set_scalar(format!("{}_count", name), items.len() as f64),
            _ => {}
        }
    }
}

fn extract_stat(sample: &mut MetricsSample, metric: &str, map: &Map<String, Value>) {
    let mut stat = Stat::default();

    for (key, value) in map {
        match (StatKind::from_name(key), value) {
            // `median` only fills p50 when p50 itself is absent
            (Some(StatKind::P50), _) if key == "median" && map.contains_key("p50") => {}
            (Some(kind), Value::Number(n)) => {
                if let Some(v) = n.as_f64() {
                    stat.set(kind, v);
                }
            }
            (None, Value::Array(items)) if key == "data" => {
                if !items.is_empty() {
                    sample.set_scalar(format!("{}_data_count", metric), items.len() as f64);
                }
            }
            (None, Value::Number(n)) => {
                if let Some(v) = n.as_f64() {
                    sample.set_scalar(format!("{}_{}", metric, key), v);
                }
            }
            _ => {}
        }
    }

    if !stat.is_empty() {
        sample.insert_metric(metric, stat);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::{REQUEST_THROUGHPUT, TIME_TO_FIRST_TOKEN};

    #[test]
    fn test_minimal_report() {
        let json = r#"{"request_throughput":{"avg":12.5},"time_to_first_token":{"p90":85.0}}"#;
        let sample = parse_json_report(json, 10).unwrap();

        assert_eq!(sample.concurrency(), 10);
        assert_eq!(sample.stat(REQUEST_THROUGHPUT, StatKind::Avg), Some(12.5));
        assert_eq!(sample.stat(TIME_TO_FIRST_TOKEN, StatKind::P90), Some(85.0));
        assert_eq!(sample.stat(TIME_TO_FIRST_TOKEN, StatKind::Avg), None);
        assert_eq!(sample.stat(REQUEST_THROUGHPUT, StatKind::P90), None);
        assert!(sample.sequence_lengths().is_none());
    }

    #[test]
    fn test_data_array_is_counted() {
        let json = r#"{"inter_token_latency":{"avg":4.0,"unit":"ms","data":[1,2,3]}}"#;
        let sample = parse_json_report(json, 1).unwrap();

        assert_eq!(sample.stat("inter_token_latency", StatKind::Avg), Some(4.0));
        assert_eq!(sample.scalar("inter_token_latency_data_count"), Some(3.0));
        assert_eq!(sample.stat("inter_token_latency", StatKind::Count), None);
    }

    #[test]
    fn test_nested_objects_flatten() {
        let json = r#"{
            "telemetry": {
                "gpu_power": {"avg": 310.0, "p99": 350.0},
                "gpu_count": 8,
                "labels": ["a", "b"]
            },
            "duration": 60,
            "requests": [1, 2],
            "model": "llama"
        }"#;
        let sample = parse_json_report(json, 2).unwrap();

        assert_eq!(sample.stat("telemetry_gpu_power", StatKind::P99), Some(350.0));
        assert_eq!(sample.scalar("telemetry_gpu_count"), Some(8.0));
        assert_eq!(sample.scalar("telemetry_labels_count"), Some(2.0));
        assert_eq!(sample.scalar("duration"), Some(60.0));
        assert_eq!(sample.scalar("requests_count"), Some(2.0));
        assert!(sample.scalar("model").is_none());
    }

    #[test]
    fn test_sequence_lengths() {
        let json = r#"{
            "input_sequence_length": {"avg": 1024.0},
            "output_sequence_length": {"avg": 128.0, "p90": 130.0}
        }"#;
        let sample = parse_json_report(json, 4).unwrap();
        let lengths = sample.sequence_lengths().unwrap();

        assert_eq!(lengths.input_avg, Some(1024.0));
        assert_eq!(lengths.output_avg, Some(128.0));
    }

    #[test]
    fn test_median_alias() {
        let sample = parse_json_report(r#"{"x":{"median":5.0}}"#, 1).unwrap();
        assert_eq!(sample.stat("x", StatKind::P50), Some(5.0));

        let sample = parse_json_report(r#"{"x":{"median":5.0,"p50":6.0}}"#, 1).unwrap();
        assert_eq!(sample.stat("x", StatKind::P50), Some(6.0));
    }

    #[test]
    fn test_invalid_documents() {
        assert!(matches!(
            parse_json_report("{not json", 1),
            Err(ReportError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_json_report("[1, 2]", 1),
            Err(ReportError::NotAnObject)
        ));
        assert!(matches!(
            parse_json_report("{}", 0),
            Err(ReportError::Sample(_))
        ));
    }
}
