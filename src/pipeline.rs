//! End-to-end analysis: prepare, filter, fit, diagnose, summarize and check.

use log::info;
use serde::Serialize;

use crate::cache::ArtifactStore;
use crate::config::AnalysisConfig;
use crate::data::{CustomerRecord, DataPreparer, PreparedDataset, ScalingParams};
use crate::diagnostics::{diagnose, ConvergenceReport};
use crate::draws::PosteriorDrawSet;
use crate::error::AnalysisError;
use crate::filter::{HazardResidualModel, InfluenceFilter};
use crate::fit::FitOrchestrator;
use crate::formula::ModelFormula;
use crate::ppc::{PosteriorPredictiveChecker, PredictiveCheck};
use crate::predict::{CustomerProfile, PredictionGenerator, SurvivalCurve};
use crate::sampler::PosteriorSampler;
use crate::sensitivity::{SensitivityComparator, SensitivityReport};
use crate::summary::PosteriorSummary;
use crate::warnings::PipelineWarning;

/// Offset of the predictive-check RNG streams from the sampling seed.
const PPC_STREAM: u64 = 1 << 20;
/// Offset of the prediction RNG streams from the sampling seed.
const PREDICT_STREAM: u64 = 1 << 21;

/// Record counts through preparation and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordCounts {
    pub input: usize,
    pub zero_time_excluded: usize,
    pub influential_removed: usize,
    pub analysed: usize,
}

/// Everything produced by [`Pipeline::run`].
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub formula: String,
    pub priors: String,
    pub counts: RecordCounts,
    pub convergence: ConvergenceReport,
    pub summary: PosteriorSummary,
    pub predictive: PredictiveCheck,
    pub warnings: Vec<PipelineWarning>,
    /// Standardization applied to the training data, reused for scoring.
    pub scaling: ScalingParams,
    /// Longest observed time in the analysed data.
    pub training_max: f64,
    pub from_cache: bool,
    #[serde(skip)]
    pub draws: PosteriorDrawSet,
}

/// The analysis pipeline with its injected collaborators.
pub struct Pipeline<'a> {
    pub config: AnalysisConfig,
    pub formula: ModelFormula,
    sampler: &'a dyn PosteriorSampler,
    store: &'a dyn ArtifactStore,
    residual_model: &'a dyn HazardResidualModel,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: AnalysisConfig,
        formula: ModelFormula,
        sampler: &'a dyn PosteriorSampler,
        store: &'a dyn ArtifactStore,
        residual_model: &'a dyn HazardResidualModel,
    ) -> Self {
        Self {
            config,
            formula,
            sampler,
            store,
            residual_model,
        }
    }

    /// Prepares records and removes influential observations.
    pub fn prepare(&self, records: &[CustomerRecord]) -> Result<(PreparedDataset, RecordCounts), AnalysisError> {
        let preparer = DataPreparer::for_formula(&self.formula, &self.config.churn_label);
        let prepared = preparer.prepare(records)?;
        let mut counts = RecordCounts {
            input: records.len(),
            zero_time_excluded: prepared.zero_time_excluded,
            influential_removed: 0,
            analysed: prepared.len(),
        };
        if !self.config.filter.enabled {
            return Ok((prepared, counts));
        }
        let outcome = InfluenceFilter::new(self.config.filter.threshold).apply(
            &prepared,
            &self.formula,
            self.residual_model,
        )?;
        counts.influential_removed = outcome.removed_count();
        counts.analysed = outcome.dataset.len();
        Ok((outcome.dataset, counts))
    }

    /// Runs the primary analysis with `config.priors`.
    pub fn run(&self, records: &[CustomerRecord]) -> Result<AnalysisReport, AnalysisError> {
        let (dataset, counts) = self.prepare(records)?;
        let orchestrator = FitOrchestrator::new(self.sampler, self.store);
        let outcome = orchestrator.fit(&dataset, &self.formula, &self.config.priors, &self.config.sampling)?;

        let mut warnings = Vec::new();
        let convergence = diagnose(&outcome.draws, self.config.diagnostics);
        if let Some(w) = convergence.warning() {
            warnings.push(w.raise());
        }
        let summary = PosteriorSummary::from_draws(&outcome.draws, !convergence.converged);

        let checker = PosteriorPredictiveChecker::new(self.config.ppc.clone());
        let predictive = checker.check(
            &outcome.design,
            &outcome.draws,
            self.config.sampling.seed.wrapping_add(PPC_STREAM),
        )?;
        warnings.extend(predictive.warnings.iter().cloned());

        info!(
            "analysis complete: {} records analysed, {} warnings",
            counts.analysed,
            warnings.len()
        );

        Ok(AnalysisReport {
            formula: self.formula.to_string(),
            priors: self.config.priors.name.clone(),
            counts,
            convergence,
            summary,
            predictive,
            warnings,
            scaling: dataset.scaling.clone(),
            training_max: dataset.max_time(),
            from_cache: outcome.from_cache,
            draws: outcome.draws,
        })
    }

    /// Compares the configurations in `config.sensitivity` on the same
    /// prepared data.
    pub fn sensitivity(&self, records: &[CustomerRecord]) -> Result<SensitivityReport, AnalysisError> {
        let (dataset, _) = self.prepare(records)?;
        let orchestrator = FitOrchestrator::new(self.sampler, self.store);
        SensitivityComparator::new(&orchestrator, self.config.diagnostics).compare(
            &dataset,
            &self.formula,
            &self.config.sensitivity,
            &self.config.sampling,
        )
    }

    /// Scores new profiles against a completed analysis. The report's scaling
    /// parameters are reused; nothing is refit.
    pub fn predict(
        &self,
        report: &AnalysisReport,
        profiles: &[CustomerProfile],
        horizons: Option<&[f64]>,
    ) -> Result<Vec<SurvivalCurve>, AnalysisError> {
        let horizons = horizons.unwrap_or(self.config.prediction.horizons.as_slice());
        PredictionGenerator::new(
            &report.draws,
            &self.formula,
            &report.scaling,
            report.training_max,
            self.config.prediction.clone(),
        )
        .predict_all(profiles, horizons, self.config.sampling.seed.wrapping_add(PREDICT_STREAM))
    }
}
