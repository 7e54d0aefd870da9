mod common;

use churn_survival::cache::MemoryStore;
use churn_survival::data::DataPreparer;
use churn_survival::diagnostics::DiagnosticThresholds;
use churn_survival::error::{AnalysisError, ConfigError};
use churn_survival::fit::FitOrchestrator;
use churn_survival::formula::ModelFormula;
use churn_survival::hmc::HmcSampler;
use churn_survival::priors::PriorConfiguration;
use churn_survival::sensitivity::{Selection, SensitivityComparator};
use common::{quick_params, telco_records};

#[test]
fn hazard_ratios_are_robust_to_reasonable_priors() {
    let data = DataPreparer::for_formula(&ModelFormula::telco(), "Yes")
        .prepare(&telco_records(500))
        .unwrap();
    let store = MemoryStore::new();
    let orchestrator = FitOrchestrator::new(&HmcSampler, &store);
    let comparator = SensitivityComparator::new(&orchestrator, DiagnosticThresholds::default());
    let configurations = vec![PriorConfiguration::default_priors(), PriorConfiguration::informative()];

    let report = comparator
        .compare(&data, &ModelFormula::telco(), &configurations, &quick_params(17))
        .unwrap();

    assert_eq!(report.configurations.len(), 2);
    assert!(report.configuration("default").is_some());
    assert!(report.configuration("informative").is_some());
    assert_eq!(store.len(), 2);

    let row = report
        .table
        .iter()
        .find(|r| r.coefficient == "Contract[Two year]")
        .unwrap();
    assert_eq!(row.values.len(), 2);
    let spread = report.hazard_ratio_spread("Contract[Two year]").unwrap();
    assert!(spread < 0.1, "spread {spread}");

    // The comparison is ranked by LOOIC and starts at the best configuration.
    assert_eq!(report.comparison.len(), 2);
    assert_eq!(report.comparison[0].looic_diff, 0.0);
    assert!(report.comparison[1].looic_diff >= 0.0);
    match &report.selection {
        Selection::Best { name, gap, se } => {
            assert_eq!(name, &report.comparison[0].name);
            assert!(gap > se);
        }
        Selection::Indistinguishable {
            best, runner_up, gap, se,
        } => {
            assert_eq!(best, &report.comparison[0].name);
            assert_eq!(runner_up, &report.comparison[1].name);
            assert!(gap <= se);
        }
    }

    // A rerun is served entirely from the store.
    let again = comparator
        .compare(&data, &ModelFormula::telco(), &configurations, &quick_params(17))
        .unwrap();
    assert!(again.configurations.iter().all(|c| c.from_cache));
    assert_eq!(store.len(), 2);
}

#[test]
fn a_single_configuration_is_rejected() {
    let data = DataPreparer::for_formula(&ModelFormula::telco(), "Yes")
        .prepare(&telco_records(50))
        .unwrap();
    let store = MemoryStore::new();
    let orchestrator = FitOrchestrator::new(&HmcSampler, &store);
    let err = SensitivityComparator::new(&orchestrator, DiagnosticThresholds::default())
        .compare(
            &data,
            &ModelFormula::telco(),
            &[PriorConfiguration::default()],
            &quick_params(1),
        )
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Config(ConfigError::Invalid(_))));
    assert!(store.is_empty());
}
