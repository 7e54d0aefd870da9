mod common;

use churn_survival::cache::MemoryStore;
use churn_survival::config::AnalysisConfig;
use churn_survival::filter::CoxResidualModel;
use churn_survival::formula::ModelFormula;
use churn_survival::hmc::HmcSampler;
use churn_survival::pipeline::Pipeline;
use churn_survival::warnings::PipelineWarning;
use common::{at_risk_profile, loyal_profile, SyntheticChurnBuilder};

const CONFIG: &str = r#"
[sampling]
chains = 4
warmup = 250
iterations = 500
parallelism = 4
seed = 2024

[ppc]
replicates = 100

[prediction]
draws = 1000
horizons = [12.0, 36.0]
"#;

#[test]
fn full_analysis_from_records_to_predictions() {
    let config = AnalysisConfig::from_toml_str(CONFIG).unwrap();
    let records = SyntheticChurnBuilder::new(450).with_zero_tenure(9).with_seed(8).build();
    let (sampler, store, cox) = (HmcSampler, MemoryStore::new(), CoxResidualModel::new());
    let pipeline = Pipeline::new(config, ModelFormula::telco(), &sampler, &store, &cox);

    let report = pipeline.run(&records).unwrap();

    let counts = report.counts;
    assert_eq!(counts.input, 459);
    assert_eq!(counts.zero_time_excluded, 9);
    assert_eq!(counts.analysed + counts.influential_removed, 450);
    assert_eq!(report.priors, "default");
    assert!(!report.from_cache);

    assert_eq!(report.summary.parameters.len(), report.draws.parameter_names().len());
    assert_eq!(report.summary.low_confidence, !report.convergence.converged);
    assert_eq!(report.predictive.horizons.len(), 5);
    let convergence_warnings = report
        .warnings
        .iter()
        .filter(|w| matches!(w, PipelineWarning::Convergence { .. }))
        .count();
    assert_eq!(convergence_warnings, usize::from(!report.convergence.converged));
    assert!(report.training_max <= common::FOLLOW_UP);

    let curves = pipeline
        .predict(&report, &[loyal_profile(), at_risk_profile()], None)
        .unwrap();
    assert_eq!(curves.len(), 2);
    assert_eq!(curves[0].points.len(), 2);
    assert!(curves[0].at(36.0).unwrap().probability > curves[1].at(36.0).unwrap().probability);

    let custom = pipeline.predict(&report, &[at_risk_profile()], Some(&[6.0])).unwrap();
    assert_eq!(custom[0].points[0].horizon, 6.0);

    // Same records and settings reuse the stored draws.
    let again = pipeline.run(&records).unwrap();
    assert!(again.from_cache);
    assert_eq!(again.summary, report.summary);

    let json = serde_json::to_value(&report).unwrap();
    assert!(json.get("draws").is_none());
    assert!(json["summary"]["hazard_ratios"].is_array());
}

#[test]
fn disabled_filter_keeps_every_record() {
    let mut config = AnalysisConfig::from_toml_str(CONFIG).unwrap();
    config.filter.enabled = false;
    let records = SyntheticChurnBuilder::new(120).with_zero_tenure(3).build();
    let (sampler, store, cox) = (HmcSampler, MemoryStore::new(), CoxResidualModel::new());
    let pipeline = Pipeline::new(config, ModelFormula::telco(), &sampler, &store, &cox);

    let (dataset, counts) = pipeline.prepare(&records).unwrap();
    assert_eq!(dataset.len(), 120);
    assert_eq!(counts.influential_removed, 0);
    assert_eq!(counts.analysed, 120);
}
