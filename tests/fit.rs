mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use churn_survival::cache::{ArtifactStore, FileArtifactStore, FitSignature, MemoryStore, NoCache};
use churn_survival::data::{DataPreparer, PreparedDataset};
use churn_survival::draws::PosteriorDrawSet;
use churn_survival::error::{AnalysisError, FitFailureError};
use churn_survival::fit::FitOrchestrator;
use churn_survival::formula::ModelFormula;
use churn_survival::hmc::HmcSampler;
use churn_survival::priors::PriorConfiguration;
use churn_survival::sampler::{FitRequest, PosteriorSampler, SamplingParams};
use churn_survival::summary::PosteriorSummary;
use common::{quick_params, telco_records};

fn dataset(n: usize) -> PreparedDataset {
    DataPreparer::for_formula(&ModelFormula::telco(), "Yes")
        .prepare(&telco_records(n))
        .unwrap()
}

/// Wraps a sampler and counts how often it is asked for draws.
struct CountingSampler {
    inner: HmcSampler,
    calls: AtomicUsize,
}

impl PosteriorSampler for CountingSampler {
    fn sample(&self, request: &FitRequest<'_>) -> Result<PosteriorDrawSet, FitFailureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.sample(request)
    }
}

struct FailingSampler;

impl PosteriorSampler for FailingSampler {
    fn sample(&self, _request: &FitRequest<'_>) -> Result<PosteriorDrawSet, FitFailureError> {
        Err(FitFailureError::ChainInitialization {
            chains: vec![2],
            attempts: 100,
        })
    }
}

#[test]
fn identical_requests_are_served_from_the_store() {
    let data = dataset(300);
    let formula = ModelFormula::telco();
    let priors = PriorConfiguration::default();
    let params = quick_params(5);
    let sampler = CountingSampler {
        inner: HmcSampler,
        calls: AtomicUsize::new(0),
    };
    let store = MemoryStore::new();
    let orchestrator = FitOrchestrator::new(&sampler, &store);

    let first = orchestrator.fit(&data, &formula, &priors, &params).unwrap();
    let second = orchestrator.fit(&data, &formula, &priors, &params).unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(sampler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.len(), 1);
    assert_eq!(first.signature, second.signature);
    assert_eq!(
        PosteriorSummary::from_draws(&first.draws, false),
        PosteriorSummary::from_draws(&second.draws, false)
    );

    // A different seed is a different request.
    let third = orchestrator.fit(&data, &formula, &priors, &quick_params(6)).unwrap();
    assert!(!third.from_cache);
    assert_ne!(third.signature, first.signature);
    assert_eq!(store.len(), 2);
}

#[test]
fn file_store_survives_a_new_orchestrator() {
    let dir = tempfile::tempdir().unwrap();
    let data = dataset(200);
    let formula = ModelFormula::telco();
    let priors = PriorConfiguration::informative();
    let params = SamplingParams::new(2, 150, 300, 9);
    let sampler = HmcSampler;

    let first = {
        let store = FileArtifactStore::new(dir.path());
        FitOrchestrator::new(&sampler, &store)
            .fit(&data, &formula, &priors, &params)
            .unwrap()
    };
    let store = FileArtifactStore::new(dir.path());
    assert!(store.load(&first.signature).unwrap().is_some());

    let second = FitOrchestrator::new(&sampler, &store)
        .fit(&data, &formula, &priors, &params)
        .unwrap();
    assert!(second.from_cache);
    assert_eq!(second.draws, first.draws);
}

#[test]
fn divergence_tolerance_is_part_of_the_cache_key() {
    let data = dataset(60);
    let formula = ModelFormula::telco();
    let design = formula.design(&data.observations).unwrap();
    let priors = PriorConfiguration::default();
    let loose = quick_params(4);
    let mut strict = loose.clone();
    strict.max_divergence_fraction = 0.0;
    let mut wider_pool = loose.clone();
    wider_pool.parallelism = 16;

    let key = |params: &SamplingParams| FitSignature::compute(&design, &formula, &priors, params).unwrap();
    assert_ne!(key(&loose), key(&strict));
    assert_eq!(key(&loose), key(&wider_pool));
}

#[test]
fn malformed_cache_entries_are_refit() {
    let dir = tempfile::tempdir().unwrap();
    let data = dataset(150);
    let formula = ModelFormula::telco();
    let priors = PriorConfiguration::default();
    let params = SamplingParams::new(2, 100, 200, 12);
    let store = FileArtifactStore::new(dir.path());
    let orchestrator = FitOrchestrator::new(&HmcSampler, &store);
    let first = orchestrator.fit(&data, &formula, &priors, &params).unwrap();

    // Drop the last draw of the second chain in the stored file.
    let path = dir.path().join(format!("{}.json", first.signature.as_str()));
    let mut entry: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let chain = &mut entry["chains"][1];
    let n_params = chain["dim"][1].as_u64().unwrap() as usize;
    let n_draws = chain["dim"][0].as_u64().unwrap();
    chain["dim"][0] = serde_json::json!(n_draws - 1);
    let data_len = chain["data"].as_array().unwrap().len();
    chain["data"].as_array_mut().unwrap().truncate(data_len - n_params);
    std::fs::write(&path, serde_json::to_string(&entry).unwrap()).unwrap();

    let second = orchestrator.fit(&data, &formula, &priors, &params).unwrap();
    assert!(!second.from_cache);
    assert_eq!(second.draws, first.draws);
    assert_eq!(second.draws.draws_per_chain(), 100);
}

#[test]
fn same_seed_reproduces_draws() {
    let data = dataset(200);
    let formula = ModelFormula::telco();
    let priors = PriorConfiguration::default();
    let orchestrator = FitOrchestrator::new(&HmcSampler, &NoCache);

    let a = orchestrator.fit(&data, &formula, &priors, &quick_params(21)).unwrap();
    let b = orchestrator.fit(&data, &formula, &priors, &quick_params(21)).unwrap();
    let c = orchestrator.fit(&data, &formula, &priors, &quick_params(22)).unwrap();

    assert_eq!(a.draws, b.draws);
    assert_ne!(a.draws, c.draws);
    assert_eq!(a.draws.n_chains(), 4);
    assert_eq!(a.draws.draws_per_chain(), 250);
}

#[test]
fn sampler_failures_are_returned_and_never_cached() {
    let data = dataset(100);
    let store = MemoryStore::new();
    let err = FitOrchestrator::new(&FailingSampler, &store)
        .fit(&data, &ModelFormula::telco(), &PriorConfiguration::default(), &quick_params(1))
        .unwrap_err();

    assert!(matches!(
        err,
        AnalysisError::FitFailure(FitFailureError::ChainInitialization { ref chains, .. }) if chains == &vec![2]
    ));
    assert!(store.is_empty());
}

#[test]
fn exhausted_time_budget_is_a_timeout() {
    let data = dataset(300);
    let mut params = SamplingParams::new(2, 1000, 2000, 3);
    params.time_budget_secs = Some(0);
    let err = FitOrchestrator::new(&HmcSampler, &NoCache)
        .fit(&data, &ModelFormula::telco(), &PriorConfiguration::default(), &params)
        .unwrap_err();
    assert!(matches!(err, AnalysisError::FitFailure(FitFailureError::Timeout { .. })));
}

#[test]
fn invalid_settings_are_rejected_before_sampling() {
    let data = dataset(50);
    let sampler = CountingSampler {
        inner: HmcSampler,
        calls: AtomicUsize::new(0),
    };
    let orchestrator = FitOrchestrator::new(&sampler, &NoCache);

    let no_draws = SamplingParams::new(4, 500, 500, 1);
    let err = orchestrator
        .fit(&data, &ModelFormula::telco(), &PriorConfiguration::default(), &no_draws)
        .unwrap_err();
    assert!(matches!(err, AnalysisError::FitFailure(FitFailureError::InvalidRequest(_))));

    let mut priors = PriorConfiguration::default();
    priors.coefficient = churn_survival::priors::PriorSpec::normal(0.0, -1.0);
    let err = orchestrator
        .fit(&data, &ModelFormula::telco(), &priors, &quick_params(1))
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Prior(_)));
    assert_eq!(sampler.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn long_contracts_are_recovered_as_protective() {
    let data = dataset(500);
    let outcome = FitOrchestrator::new(&HmcSampler, &NoCache)
        .fit(&data, &ModelFormula::telco(), &PriorConfiguration::default(), &quick_params(77))
        .unwrap();
    let summary = PosteriorSummary::from_draws(&outcome.draws, false);

    let two_year = summary.parameter("Contract[Two year]").unwrap();
    assert!(two_year.prob_positive > 0.95);
    assert!(summary.hazard_ratio("Contract[Two year]").unwrap().upper < 1.0);

    let shape = summary.parameter("shape").unwrap();
    assert!(shape.mean > 0.8 && shape.mean < 1.8, "shape {}", shape.mean);
}
