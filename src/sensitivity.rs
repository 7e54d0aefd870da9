//! Prior sensitivity: the same model fit under several prior
//! configurations, compared by hazard ratios and by predictive criteria.

use std::fmt;

use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::criteria::{elpd_difference, information_criteria, InformationCriteria};
use crate::data::PreparedDataset;
use crate::diagnostics::{diagnose, ConvergenceReport, DiagnosticThresholds};
use crate::error::{AnalysisError, ConfigError};
use crate::fit::FitOrchestrator;
use crate::formula::ModelFormula;
use crate::priors::PriorConfiguration;
use crate::sampler::SamplingParams;
use crate::summary::{HazardRatioSummary, PosteriorSummary};
use crate::warnings::PipelineWarning;

/// Fit results for one prior configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigurationResult {
    pub name: String,
    pub priors: PriorConfiguration,
    pub summary: PosteriorSummary,
    pub convergence: ConvergenceReport,
    pub criteria: InformationCriteria,
    pub from_cache: bool,
    pub warnings: Vec<PipelineWarning>,
}

/// Hazard ratio of one coefficient under every configuration, in
/// configuration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HazardRatioRow {
    pub coefficient: String,
    pub values: Vec<HazardRatioSummary>,
}

/// LOOIC difference of a configuration against the best one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriterionComparison {
    pub name: String,
    pub looic: f64,
    /// `looic - best looic`, zero for the best configuration.
    pub looic_diff: f64,
    /// Standard error of `looic_diff` from the pointwise differences.
    pub se_diff: f64,
}

/// Outcome of model selection by LOOIC.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Selection {
    /// The lowest LOOIC beats the runner-up by more than its standard error.
    Best { name: String, gap: f64, se: f64 },
    /// The gap to the runner-up is within its standard error.
    Indistinguishable { best: String, runner_up: String, gap: f64, se: f64 },
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Selection::Best { name, gap, se } => {
                write!(f, "'{name}' preferred (LOOIC gap {gap:.2} > SE {se:.2})")
            }
            Selection::Indistinguishable {
                best,
                runner_up,
                gap,
                se,
            } => write!(
                f,
                "indistinguishable: '{best}' vs '{runner_up}' (LOOIC gap {gap:.2} <= SE {se:.2})"
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SensitivityReport {
    pub configurations: Vec<ConfigurationResult>,
    pub table: Vec<HazardRatioRow>,
    pub comparison: Vec<CriterionComparison>,
    pub selection: Selection,
}

impl SensitivityReport {
    pub fn configuration(&self, name: &str) -> Option<&ConfigurationResult> {
        self.configurations.iter().find(|c| c.name == name)
    }

    /// Largest absolute difference in hazard-ratio mean for a coefficient
    /// across configurations.
    pub fn hazard_ratio_spread(&self, coefficient: &str) -> Option<f64> {
        let row = self.table.iter().find(|r| r.coefficient == coefficient)?;
        let (lo, hi) = row
            .values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v.mean), hi.max(v.mean)));
        Some(hi - lo)
    }
}

/// Runs fits under several prior configurations and compares them.
pub struct SensitivityComparator<'a> {
    orchestrator: &'a FitOrchestrator<'a>,
    thresholds: DiagnosticThresholds,
}

impl<'a> SensitivityComparator<'a> {
    pub fn new(orchestrator: &'a FitOrchestrator<'a>, thresholds: DiagnosticThresholds) -> Self {
        Self {
            orchestrator,
            thresholds,
        }
    }

    /// Fits every configuration (in parallel) and compares them.
    ///
    /// Any failed fit fails the comparison.
    pub fn compare(
        &self,
        dataset: &PreparedDataset,
        formula: &ModelFormula,
        configurations: &[PriorConfiguration],
        params: &SamplingParams,
    ) -> Result<SensitivityReport, AnalysisError> {
        if configurations.len() < 2 {
            return Err(ConfigError::Invalid("sensitivity analysis needs at least two prior configurations".into()).into());
        }
        info!("sensitivity analysis over {} prior configurations", configurations.len());

        let results = configurations
            .par_iter()
            .map(|priors| self.run_one(dataset, formula, priors, params))
            .collect::<Result<Vec<_>, _>>()?;

        let table = hazard_ratio_table(&results);
        let (comparison, selection) = select(&results);
        info!("prior sensitivity: {selection}");

        Ok(SensitivityReport {
            configurations: results,
            table,
            comparison,
            selection,
        })
    }

    fn run_one(
        &self,
        dataset: &PreparedDataset,
        formula: &ModelFormula,
        priors: &PriorConfiguration,
        params: &SamplingParams,
    ) -> Result<ConfigurationResult, AnalysisError> {
        let outcome = self.orchestrator.fit(dataset, formula, priors, params)?;
        let convergence = diagnose(&outcome.draws, self.thresholds);
        let summary = PosteriorSummary::from_draws(&outcome.draws, !convergence.converged);
        let criteria = information_criteria(&outcome.design, &outcome.draws);

        let mut warnings = Vec::new();
        if let Some(w) = convergence.warning() {
            warnings.push(w.raise());
        }
        if criteria.loo.bad_k > 0 {
            warnings.push(
                PipelineWarning::ParetoK {
                    configuration: priors.name.clone(),
                    bad: criteria.loo.bad_k,
                    total: criteria.loo.pareto_k.len(),
                }
                .raise(),
            );
        }

        Ok(ConfigurationResult {
            name: priors.name.clone(),
            priors: priors.clone(),
            summary,
            convergence,
            criteria,
            from_cache: outcome.from_cache,
            warnings,
        })
    }
}

fn hazard_ratio_table(results: &[ConfigurationResult]) -> Vec<HazardRatioRow> {
    let Some(first) = results.first() else {
        return Vec::new();
    };
    first
        .summary
        .hazard_ratios
        .iter()
        .map(|hr| HazardRatioRow {
            coefficient: hr.name.clone(),
            values: results
                .iter()
                .filter_map(|r| r.summary.hazard_ratio(&hr.name).cloned())
                .collect(),
        })
        .collect()
}

/// Ranks configurations by LOOIC and decides whether the best one is
/// distinguishable from the runner-up.
///
/// Differences are on the deviance scale: `gap = 2 * elpd_diff` and its
/// standard error is `2 * se(elpd_diff)` from pointwise differences.
fn select(results: &[ConfigurationResult]) -> (Vec<CriterionComparison>, Selection) {
    let mut order: Vec<usize> = (0..results.len()).collect();
    order.sort_by(|&a, &b| {
        results[a]
            .criteria
            .loo
            .looic
            .total_cmp(&results[b].criteria.loo.looic)
    });
    let best = &results[order[0]];

    let comparison: Vec<CriterionComparison> = order
        .iter()
        .map(|&i| {
            let r = &results[i];
            let diff = elpd_difference(&best.criteria.loo.pointwise, &r.criteria.loo.pointwise);
            CriterionComparison {
                name: r.name.clone(),
                looic: r.criteria.loo.looic,
                looic_diff: 2.0 * diff.elpd_diff,
                se_diff: 2.0 * diff.se,
            }
        })
        .collect();

    let runner_up = &comparison[1];
    let selection = if runner_up.looic_diff > runner_up.se_diff {
        Selection::Best {
            name: best.name.clone(),
            gap: runner_up.looic_diff,
            se: runner_up.se_diff,
        }
    } else {
        Selection::Indistinguishable {
            best: best.name.clone(),
            runner_up: runner_up.name.clone(),
            gap: runner_up.looic_diff,
            se: runner_up.se_diff,
        }
    };
    (comparison, selection)
}
