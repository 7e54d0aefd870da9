//! Synthetic customer data and small sampler settings shared by the
//! integration tests.
//!
//! Survival times follow the same Weibull model the crate fits, with known
//! effects: long contracts, online security and automatic bank transfers
//! lengthen tenure; electronic checks and fiber service shorten it.
#![allow(dead_code)]

use churn_survival::data::{CovariateValue, Covariates, CustomerRecord};
use churn_survival::predict::CustomerProfile;
use churn_survival::sampler::SamplingParams;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Weibull};

/// True log-scale intercept of the generating model.
pub const TRUE_INTERCEPT: f64 = 2.8;
/// True Weibull shape of the generating model.
pub const TRUE_SHAPE: f64 = 1.2;
/// Longest follow-up in months.
pub const FOLLOW_UP: f64 = 72.0;

/// Builder for synthetic Telco-style customer records.
pub struct SyntheticChurnBuilder {
    n_customers: usize,
    zero_tenure: usize,
    seed: u64,
}

impl SyntheticChurnBuilder {
    pub fn new(n_customers: usize) -> Self {
        Self {
            n_customers,
            zero_tenure: 0,
            seed: 42,
        }
    }

    /// Adds records with zero tenure (new customers) on top of `n_customers`.
    pub fn with_zero_tenure(mut self, count: usize) -> Self {
        self.zero_tenure = count;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> Vec<CustomerRecord> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut records = Vec::with_capacity(self.n_customers + self.zero_tenure);
        for i in 0..self.n_customers + self.zero_tenure {
            let attributes = random_attributes(&mut rng);
            let (tenure, churn) = if i < self.n_customers {
                let scale = (TRUE_INTERCEPT + true_effect(&attributes)).exp();
                let event_time = Weibull::new(scale, TRUE_SHAPE).unwrap().sample(&mut rng);
                let censor_time: f64 = rng.gen_range(1.0..FOLLOW_UP);
                if event_time <= censor_time {
                    (event_time.ceil(), "Yes")
                } else {
                    (censor_time.ceil(), "No")
                }
            } else {
                (0.0, "No")
            };
            records.push(CustomerRecord {
                id: Some(format!("C{i:05}")),
                attributes,
                tenure,
                churn: churn.to_string(),
            });
        }
        records
    }
}

fn pick<'a, R: Rng>(rng: &mut R, options: &[&'a str]) -> &'a str {
    options[rng.gen_range(0..options.len())]
}

fn random_attributes<R: Rng>(rng: &mut R) -> Covariates {
    let mut attrs = Covariates::new();
    let internet = pick(rng, &["DSL", "Fiber optic", "No"]);
    let addon = |rng: &mut R| {
        if internet == "No" {
            "No internet service"
        } else {
            pick(rng, &["Yes", "No"])
        }
    };
    let security = addon(rng);
    let protection = addon(rng);
    let tv = addon(rng);
    let movies = addon(rng);

    attrs.insert("Partner".into(), CovariateValue::level(pick(rng, &["Yes", "No"])));
    attrs.insert("InternetService".into(), CovariateValue::level(internet));
    attrs.insert("OnlineSecurity".into(), CovariateValue::level(security));
    attrs.insert("DeviceProtection".into(), CovariateValue::level(protection));
    attrs.insert("StreamingTV".into(), CovariateValue::level(tv));
    attrs.insert("StreamingMovies".into(), CovariateValue::level(movies));
    attrs.insert(
        "Contract".into(),
        CovariateValue::level(pick(rng, &["Month-to-month", "One year", "Two year"])),
    );
    attrs.insert("PaperlessBilling".into(), CovariateValue::level(pick(rng, &["Yes", "No"])));
    attrs.insert(
        "PaymentMethod".into(),
        CovariateValue::level(pick(
            rng,
            &[
                "Bank transfer (automatic)",
                "Credit card (automatic)",
                "Electronic check",
                "Mailed check",
            ],
        )),
    );
    attrs.insert("MonthlyCharges".into(), CovariateValue::Continuous(rng.gen_range(20.0..110.0)));
    attrs.insert("TotalCharges".into(), CovariateValue::Continuous(rng.gen_range(20.0..8000.0)));
    attrs
}

fn level<'a>(attrs: &'a Covariates, column: &str) -> &'a str {
    match attrs.get(column) {
        Some(CovariateValue::Categorical(v)) => v.as_str(),
        _ => "",
    }
}

/// Effect on log survival time in the generating model.
fn true_effect(attrs: &Covariates) -> f64 {
    let mut effect = 0.0;
    effect += match level(attrs, "Contract") {
        "One year" => 1.0,
        "Two year" => 2.0,
        _ => 0.0,
    };
    effect += match level(attrs, "PaymentMethod") {
        "Electronic check" => -0.6,
        "Mailed check" => -0.2,
        _ => 0.0,
    };
    effect += match level(attrs, "InternetService") {
        "Fiber optic" => -0.4,
        "No" => 0.3,
        _ => 0.0,
    };
    if level(attrs, "OnlineSecurity") == "Yes" {
        effect += 0.5;
    }
    if level(attrs, "Partner") == "Yes" {
        effect += 0.3;
    }
    effect
}

/// Telco data with the default seed.
pub fn telco_records(n: usize) -> Vec<CustomerRecord> {
    SyntheticChurnBuilder::new(n).build()
}

/// Short runs that still mix well on the synthetic data.
pub fn quick_params(seed: u64) -> SamplingParams {
    SamplingParams::new(4, 250, 500, seed)
}

fn profile(name: &str, pairs: &[(&str, &str)], total_charges: f64) -> CustomerProfile {
    let mut covariates = Covariates::new();
    for (column, value) in pairs {
        covariates.insert(column.to_string(), CovariateValue::level(value));
    }
    covariates.insert("TotalCharges".into(), CovariateValue::Continuous(total_charges));
    CustomerProfile::new(name, covariates)
}

/// Two-year contract, automatic bank transfer, full security/protection bundle.
pub fn loyal_profile() -> CustomerProfile {
    profile(
        "two-year bundle",
        &[
            ("Partner", "Yes"),
            ("InternetService", "DSL"),
            ("OnlineSecurity", "Yes"),
            ("DeviceProtection", "Yes"),
            ("StreamingTV", "No"),
            ("StreamingMovies", "No"),
            ("Contract", "Two year"),
            ("PaperlessBilling", "No"),
            ("PaymentMethod", "Bank transfer (automatic)"),
        ],
        4000.0,
    )
}

/// Same customer on a month-to-month contract paying by electronic check.
pub fn at_risk_profile() -> CustomerProfile {
    profile(
        "month-to-month e-check",
        &[
            ("Partner", "Yes"),
            ("InternetService", "DSL"),
            ("OnlineSecurity", "Yes"),
            ("DeviceProtection", "Yes"),
            ("StreamingTV", "No"),
            ("StreamingMovies", "No"),
            ("Contract", "Month-to-month"),
            ("PaperlessBilling", "No"),
            ("PaymentMethod", "Electronic check"),
        ],
        4000.0,
    )
}
