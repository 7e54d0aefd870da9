use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use log::info;

use churn_survival::cache::{ArtifactStore, FileArtifactStore, NoCache};
use churn_survival::config::AnalysisConfig;
use churn_survival::data::read_customers;
use churn_survival::error::AnalysisError;
use churn_survival::filter::CoxResidualModel;
use churn_survival::formula::ModelFormula;
use churn_survival::hmc::HmcSampler;
use churn_survival::pipeline::{AnalysisReport, Pipeline};
use churn_survival::predict::{CustomerProfile, SurvivalCurve};
use churn_survival::sensitivity::SensitivityReport;

#[derive(Parser)]
#[command(
    name = "churn-survival",
    about = "Bayesian Weibull survival analysis of customer churn",
    long_about = "Fits a right-censored Weibull regression of customer tenure, checks convergence \
                  and calibration, compares prior configurations and predicts survival for new \
                  customer profiles."
)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the sampling seed
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Print results as JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis: prepare, filter, fit, diagnose, summarize, check
    Fit {
        /// Customer CSV file with a header row
        data: PathBuf,
    },

    /// Fit every configured prior and compare hazard ratios and LOO
    Sensitivity {
        /// Customer CSV file with a header row
        data: PathBuf,
    },

    /// Fit (or load cached draws) and predict survival for new profiles
    Predict {
        /// Customer CSV file with a header row
        data: PathBuf,

        /// JSON file with a list of {"name": ..., "covariates": {...}} profiles
        #[arg(long)]
        profiles: PathBuf,

        /// Horizons in months, comma separated
        #[arg(long, value_delimiter = ',')]
        horizons: Vec<f64>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), AnalysisError> {
    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.sampling.seed = seed;
    }

    let sampler = HmcSampler;
    let residual_model = CoxResidualModel::new();
    let store: Box<dyn ArtifactStore> = match &config.cache_dir {
        Some(dir) => Box::new(FileArtifactStore::new(dir)),
        None => Box::new(NoCache),
    };
    let csv = config.csv.clone();
    let pipeline = Pipeline::new(config, ModelFormula::telco(), &sampler, store.as_ref(), &residual_model);

    match cli.command {
        Commands::Fit { data } => {
            let records = load(&data, &csv)?;
            let report = pipeline.run(&records)?;
            if cli.json {
                print_json(&report)?;
            } else {
                print_report(&report);
            }
        }
        Commands::Sensitivity { data } => {
            let records = load(&data, &csv)?;
            let report = pipeline.sensitivity(&records)?;
            if cli.json {
                print_json(&report)?;
            } else {
                print_sensitivity(&report);
            }
        }
        Commands::Predict {
            data,
            profiles,
            horizons,
        } => {
            let records = load(&data, &csv)?;
            let text = fs::read_to_string(&profiles)?;
            let profiles: Vec<CustomerProfile> =
                serde_json::from_str(&text).map_err(|e| AnalysisError::Io(e.into()))?;
            let report = pipeline.run(&records)?;
            let horizons = (!horizons.is_empty()).then_some(horizons.as_slice());
            let curves = pipeline.predict(&report, &profiles, horizons)?;
            if cli.json {
                print_json(&curves)?;
            } else {
                print_curves(&curves);
            }
        }
    }
    Ok(())
}

fn load(
    path: &Path,
    schema: &churn_survival::data::CsvSchema,
) -> Result<Vec<churn_survival::data::CustomerRecord>, AnalysisError> {
    let records = read_customers(path, schema)?;
    info!("loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AnalysisError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| AnalysisError::Io(e.into()))?;
    println!("{text}");
    Ok(())
}

fn print_report(report: &AnalysisReport) {
    println!("Model: {}", report.formula);
    println!(
        "Records: {} input, {} zero-tenure excluded, {} influential removed, {} analysed",
        report.counts.input,
        report.counts.zero_time_excluded,
        report.counts.influential_removed,
        report.counts.analysed
    );
    println!(
        "Convergence: max R-hat {:.4}, min bulk ESS {:.0}, {} divergences{}",
        report.convergence.max_rhat,
        report.convergence.min_ess,
        report.convergence.divergences,
        if report.summary.low_confidence { " (LOW CONFIDENCE)" } else { "" }
    );

    println!();
    println!(
        "{:<40} {:>8} {:>8} {:>8} {:>8} {:>8} {:>7}",
        "parameter", "mean", "median", "sd", "2.5%", "97.5%", "P(>0)"
    );
    for p in report.summary.by_magnitude() {
        println!(
            "{:<40} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>7.3}",
            p.name, p.mean, p.median, p.sd, p.lower, p.upper, p.prob_positive
        );
    }

    println!();
    println!("{:<40} {:>8} {:>8} {:>8}", "hazard ratio", "HR", "2.5%", "97.5%");
    for hr in &report.summary.hazard_ratios {
        println!("{:<40} {:>8.3} {:>8.3} {:>8.3}", hr.name, hr.mean, hr.lower, hr.upper);
    }

    println!();
    println!("{:>8} {:>9} {:>9} {:>9}", "horizon", "observed", "predicted", "diff");
    for h in &report.predictive.horizons {
        println!(
            "{:>8} {:>9.3} {:>9.3} {:>+9.3}",
            h.horizon, h.observed, h.predicted, h.difference
        );
    }
    println!(
        "Median time: observed {:.1}, simulated {:.1} [{:.1}, {:.1}]",
        report.predictive.observed_median,
        report.predictive.simulated_median,
        report.predictive.simulated_median_interval.0,
        report.predictive.simulated_median_interval.1
    );

    for w in &report.warnings {
        println!("warning: {w}");
    }
}

fn print_sensitivity(report: &SensitivityReport) {
    let names: Vec<&str> = report.configurations.iter().map(|c| c.name.as_str()).collect();
    print!("{:<40}", "hazard ratio");
    for name in &names {
        print!(" {:>22}", name);
    }
    println!();
    for row in &report.table {
        print!("{:<40}", row.coefficient);
        for v in &row.values {
            print!(" {:>6.3} [{:>5.3},{:>6.3}]", v.mean, v.lower, v.upper);
        }
        println!();
    }

    println!();
    println!("{:<16} {:>10} {:>10} {:>10} {:>8}", "priors", "LOOIC", "WAIC", "dLOOIC", "SE");
    for c in &report.comparison {
        let waic = report
            .configuration(&c.name)
            .map(|r| r.criteria.waic.waic)
            .unwrap_or(f64::NAN);
        println!(
            "{:<16} {:>10.2} {:>10.2} {:>10.2} {:>8.2}",
            c.name, c.looic, waic, c.looic_diff, c.se_diff
        );
    }
    println!("Selection: {}", report.selection);

    for c in &report.configurations {
        for w in &c.warnings {
            println!("warning [{}]: {w}", c.name);
        }
    }
}

fn print_curves(curves: &[SurvivalCurve]) {
    for curve in curves {
        println!(
            "{}: median {:.1} months (IQR {:.1}-{:.1}){}",
            curve.profile,
            curve.median_time,
            curve.q25_time,
            curve.q75_time,
            if curve.extrapolated { " [extrapolated]" } else { "" }
        );
        for p in &curve.points {
            println!(
                "  {:>5} months: {:.3} [{:.3}, {:.3}]{}",
                p.horizon,
                p.probability,
                p.lower,
                p.upper,
                if p.beyond_training { " *" } else { "" }
            );
        }
    }
}
