//   Copyright 2024 The PyMC Developers
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
//   Unless required by applicable law or agreed to in writing, software
//   distributed under the License is distributed on an "AS IS" BASIS,
//   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//   See the License for the specific language governing permissions and
//   limitations under the License.

//! churn_survival provides a Bayesian survival analysis of customer churn.
//! Customer tenure is modeled as right-censored time-to-churn under a
//! Weibull regression in accelerated-failure-time form. The crate covers
//! the whole workflow: data preparation with censoring encoding,
//! removal of influential observations with an auxiliary Cox model,
//! posterior sampling by Hamiltonian Monte Carlo behind a pluggable
//! sampler trait, convergence diagnostics, posterior and hazard-ratio
//! summaries, posterior-predictive checks, prior sensitivity with WAIC and
//! PSIS-LOO, and survival predictions for new customer profiles.
//!
//! ```no_run
//! use churn_survival::cache::NoCache;
//! use churn_survival::config::AnalysisConfig;
//! use churn_survival::data::{read_customers, CsvSchema};
//! use churn_survival::filter::CoxResidualModel;
//! use churn_survival::formula::ModelFormula;
//! use churn_survival::hmc::HmcSampler;
//! use churn_survival::pipeline::Pipeline;
//!
//! # fn main() -> Result<(), churn_survival::error::AnalysisError> {
//! let records = read_customers("telco.csv".as_ref(), &CsvSchema::default())?;
//! let (sampler, store, cox) = (HmcSampler, NoCache, CoxResidualModel::new());
//! let pipeline = Pipeline::new(AnalysisConfig::default(), ModelFormula::telco(), &sampler, &store, &cox);
//! let report = pipeline.run(&records)?;
//! for hr in &report.summary.hazard_ratios {
//!     println!("{}: {:.2} [{:.2}, {:.2}]", hr.name, hr.mean, hr.lower, hr.upper);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod criteria;
pub mod data;
pub mod diagnostics;
pub mod draws;
pub mod error;
pub mod filter;
pub mod fit;
pub mod formula;
pub mod hmc;
pub mod likelihood;
pub mod math;
pub mod pipeline;
pub mod ppc;
pub mod predict;
pub mod priors;
pub mod sampler;
pub mod sensitivity;
pub mod summary;
pub mod warnings;

pub use crate::draws::PosteriorDrawSet;
pub use crate::error::AnalysisError;
pub use crate::pipeline::{AnalysisReport, Pipeline};
pub use crate::priors::PriorConfiguration;
