//! Integration tests for SLO scaling curves over a stored sample table

use std::path::PathBuf;

use llm_goodput_lens::samples::SampleTable;
use llm_goodput_lens::scaling::{CurveMetric, ScaleSweep, ScalingCurveComputer, ScalingError};
use llm_goodput_lens::slo::{ColumnMap, SloConfigError, SloConstraints, SloEvaluator};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn strict_slo() -> SloEvaluator {
    let constraints = SloConstraints::new()
        .with_scalable("ttft", 4000.0)
        .with_fixed("itl", 40.0);
    SloEvaluator::new(&constraints, &ColumnMap::default()).unwrap()
}

fn computer() -> ScalingCurveComputer {
    ScalingCurveComputer::new(strict_slo(), ScaleSweep::default()).unwrap()
}

/// Test: The stored table loads with its deployment name and columns
#[test]
fn test_load_fixture_table() {
    let table = SampleTable::load(&fixture("agg_samples.csv")).unwrap();

    assert_eq!(table.len(), 6);
    assert_eq!(table.deployment(), Some("agg"));
    assert!(table.has_column("time_to_first_token_p90"));
    assert!(computer().check_table(&table).is_ok());
}

/// Test: Curve values at representative factors
#[test]
fn test_curves_over_fixture() {
    let table = SampleTable::load(&fixture("agg_samples.csv")).unwrap();
    let curves = computer().compute_table(&table).unwrap();
    assert_eq!(curves.len(), 3);

    let request = &curves[0];
    assert_eq!(request.metric, CurveMetric::request_throughput());
    assert_eq!(request.points.len(), 51);
    assert_eq!(request.points[0].factor, 5.0);
    assert_eq!(request.points.last().unwrap().factor, 0.0);

    // itl is fixed at 40, so c64 and c128 never pass however loose ttft gets
    assert_eq!(request.value_at(5.0), Some(7.9));
    assert_eq!(request.value_at(1.0), Some(7.9));
    assert_eq!(request.value_at(0.5), Some(5.4));
    assert_eq!(request.value_at(0.1), Some(0.9));
    assert_eq!(request.value_at(0.0), Some(0.0));

    let concurrency = &curves[2];
    assert_eq!(concurrency.metric, CurveMetric::Concurrency);
    assert_eq!(concurrency.value_at(1.0), Some(32.0));
    assert_eq!(concurrency.value_at(0.5), Some(16.0));
}

/// Test: Peak, non-zero count and tightest factor summarize a curve
#[test]
fn test_curve_statistics() {
    let table = SampleTable::load(&fixture("agg_samples.csv")).unwrap();
    let curves = computer().compute_table(&table).unwrap();
    let concurrency = &curves[2];

    let peak = concurrency.peak().unwrap();
    assert_eq!(peak.value, 32.0);
    assert_eq!(peak.factor, 5.0);
    assert_eq!(concurrency.nonzero_count(), 50);
    assert_eq!(concurrency.tightest_satisfied_factor(), Some(0.1));
}

/// Test: Curves are non-decreasing as the factor grows
#[test]
fn test_curves_are_monotonic() {
    let table = SampleTable::load(&fixture("agg_samples.csv")).unwrap();
    for curve in computer().compute_table(&table).unwrap() {
        // points run from the loosest factor to the tightest
        for pair in curve.points.windows(2) {
            assert!(
                pair[0].value >= pair[1].value,
                "{} drops from {} at {} to {} at {}",
                curve.metric,
                pair[1].value,
                pair[1].factor,
                pair[0].value,
                pair[0].factor
            );
        }
    }
}

/// Test: Two deployments compared under the same SLO and sweep
#[test]
fn test_compare_tables() {
    let agg = SampleTable::load(&fixture("agg_samples.csv")).unwrap();
    let disagg = SampleTable::parse_csv(
        "concurrency,time_to_first_token_p90,inter_token_latency_p90,request_throughput_avg,output_token_throughput_avg\n\
         16,900,12.0,6.1,780.8\n\
         32,1900,15.5,10.4,1331.2\n\
         64,5200,22.0,14.8,1894.4\n",
    )
    .unwrap();

    let computer = computer().with_outputs(vec![CurveMetric::request_throughput()]);
    let agg_curve = &computer.compute_table(&agg).unwrap()[0];
    let disagg_curve = &computer.compute_table(&disagg).unwrap()[0];

    assert_eq!(disagg_curve.value_at(1.0), Some(10.4));
    assert_eq!(disagg_curve.value_at(1.5), Some(14.8));
    assert!(disagg_curve.value_at(1.0) > agg_curve.value_at(1.0));
    assert_eq!(disagg_curve.tightest_satisfied_factor(), Some(0.3));
}

/// Test: A constraint on a column the table lacks fails before any sweep
#[test]
fn test_missing_constraint_column() {
    let table = SampleTable::parse_csv("concurrency,request_throughput_avg\n1,2.0\n").unwrap();

    assert!(matches!(
        computer().compute_table(&table),
        Err(ScalingError::Slo(SloConfigError::MissingColumn { .. }))
    ));
}

/// Test: A tracked output the table lacks fails before any sweep
#[test]
fn test_missing_output_column() {
    let table = SampleTable::parse_csv(
        "concurrency,time_to_first_token_p90,inter_token_latency_p90\n1,100,10\n",
    )
    .unwrap();

    assert!(matches!(
        computer().compute_table(&table),
        Err(ScalingError::MissingOutputColumn { .. })
    ));

    let concurrency_only = computer().with_outputs(vec![CurveMetric::Concurrency]);
    let curves = concurrency_only.compute_table(&table).unwrap();
    assert_eq!(curves[0].value_at(1.0), Some(1.0));
}

/// Test: Invalid sweeps are rejected up front
#[test]
fn test_invalid_sweep() {
    let bad = |sweep: ScaleSweep| ScalingCurveComputer::new(strict_slo(), sweep).is_err();

    assert!(bad(ScaleSweep {
        scale_step: 0.0,
        ..Default::default()
    }));
    assert!(bad(ScaleSweep {
        scale_min: 6.0,
        ..Default::default()
    }));
    assert!(bad(ScaleSweep {
        scale_max: f64::NAN,
        ..Default::default()
    }));
}
