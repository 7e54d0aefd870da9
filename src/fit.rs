//! Model fit orchestration: cache lookup, sampling, cache store.

use std::time::Instant;

use log::{info, warn};

use crate::cache::{ArtifactStore, FitSignature};
use crate::data::PreparedDataset;
use crate::draws::PosteriorDrawSet;
use crate::error::{AnalysisError, DataValidationError};
use crate::formula::{ModelFormula, SurvivalDesign};
use crate::priors::PriorConfiguration;
use crate::sampler::{FitRequest, PosteriorSampler, SamplingParams};

/// Draws for one fit plus the design they were fit on.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub draws: PosteriorDrawSet,
    pub design: SurvivalDesign,
    pub signature: FitSignature,
    /// `true` when the draws were served from the artifact store.
    pub from_cache: bool,
}

/// Submits fit requests to a sampler, consulting an artifact store first.
///
/// Sampler failures are returned as-is; the orchestrator never retries and
/// never stores a failed fit.
pub struct FitOrchestrator<'a> {
    sampler: &'a dyn PosteriorSampler,
    store: &'a dyn ArtifactStore,
}

impl<'a> FitOrchestrator<'a> {
    pub fn new(sampler: &'a dyn PosteriorSampler, store: &'a dyn ArtifactStore) -> Self {
        Self { sampler, store }
    }

    pub fn fit(
        &self,
        dataset: &PreparedDataset,
        formula: &ModelFormula,
        priors: &PriorConfiguration,
        params: &SamplingParams,
    ) -> Result<FitOutcome, AnalysisError> {
        if dataset.is_empty() {
            return Err(DataValidationError::Empty.into());
        }
        priors.validate()?;
        params.validate()?;

        let design = formula.design(&dataset.observations)?;
        let signature = FitSignature::compute(&design, formula, priors, params)?;

        match self.store.load(&signature) {
            Ok(Some(cached)) => match usable_cached(cached, &design, params) {
                Some(draws) => {
                    info!("using cached draws for '{}' ({})", priors.name, signature.as_str());
                    return Ok(FitOutcome {
                        draws,
                        design,
                        signature,
                        from_cache: true,
                    });
                }
                None => warn!("cached draws for {} do not match the request; refitting", signature.as_str()),
            },
            Ok(None) => {}
            Err(e) => warn!("cache lookup failed, sampling instead: {e}"),
        }

        info!(
            "fitting '{}' on {} observations: {} chains x {} iterations ({} warmup), seed {}",
            priors.name,
            design.n_obs(),
            params.chains,
            params.iterations,
            params.warmup,
            params.seed
        );
        let start = Instant::now();
        let request = FitRequest {
            design: &design,
            formula,
            priors,
            params,
        };
        let draws = self.sampler.sample(&request)?;
        info!("fit for '{}' took {:.1?}", priors.name, start.elapsed());

        if let Err(e) = self.store.store(&signature, &draws) {
            warn!("could not cache draws for {}: {e}", signature.as_str());
        }

        Ok(FitOutcome {
            draws,
            design,
            signature,
            from_cache: false,
        })
    }
}

/// Re-checks a stored draw set before serving it. Entries read back from disk
/// never went through [`PosteriorDrawSet::new`].
fn usable_cached(
    cached: PosteriorDrawSet,
    design: &SurvivalDesign,
    params: &SamplingParams,
) -> Option<PosteriorDrawSet> {
    let divergences = cached.divergences.clone();
    let draws = PosteriorDrawSet::new(cached.parameter_names().to_vec(), cached.chains().to_vec())
        .ok()?
        .with_divergences(divergences);
    let matches = draws.n_chains() == params.chains
        && draws.draws_per_chain() == params.draws_per_chain()
        && draws.divergences.len() == params.chains
        && draws.coefficient_names() == design.coefficient_names;
    matches.then_some(draws)
}
