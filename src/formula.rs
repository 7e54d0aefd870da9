//! Model formula: which covariates enter the linear predictor and how each
//! one is encoded into design-matrix columns.

use std::fmt;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::{CensoredObservation, CovariateValue, Covariates};
use crate::error::DataValidationError;

/// How a covariate column is turned into design columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TermKind {
    /// Treatment-coded categorical. The first level is the reference and gets
    /// no column; every other level gets an indicator column.
    Categorical { levels: Vec<String> },
    /// Single indicator column, 1 when the value equals `level` and 0 for any
    /// of `others`. Other values are rejected.
    Flag { level: String, others: Vec<String> },
    /// Continuous value used as-is (already standardized by the preparer).
    Continuous,
}

/// One covariate in the formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub column: String,
    pub kind: TermKind,
}

impl Term {
    pub fn categorical(column: &str, levels: &[&str]) -> Self {
        Self {
            column: column.to_string(),
            kind: TermKind::Categorical {
                levels: levels.iter().map(|l| l.to_string()).collect(),
            },
        }
    }

    pub fn flag(column: &str, level: &str, others: &[&str]) -> Self {
        Self {
            column: column.to_string(),
            kind: TermKind::Flag {
                level: level.to_string(),
                others: others.iter().map(|l| l.to_string()).collect(),
            },
        }
    }

    pub fn continuous(column: &str) -> Self {
        Self {
            column: column.to_string(),
            kind: TermKind::Continuous,
        }
    }

    fn coefficient_names(&self) -> Vec<String> {
        match &self.kind {
            TermKind::Categorical { levels } => levels
                .iter()
                .skip(1)
                .map(|l| format!("{}[{}]", self.column, l))
                .collect(),
            TermKind::Flag { level, .. } => vec![format!("{}[{}]", self.column, level)],
            TermKind::Continuous => vec![self.column.clone()],
        }
    }

    fn encode_into(&self, value: Option<&CovariateValue>, row: usize, out: &mut Vec<f64>) -> Result<(), DataValidationError> {
        let value = value.ok_or_else(|| DataValidationError::MissingColumn {
            row,
            column: self.column.clone(),
        })?;
        match (&self.kind, value) {
            (TermKind::Categorical { levels }, CovariateValue::Categorical(v)) => {
                let idx = levels
                    .iter()
                    .position(|l| l == v)
                    .ok_or_else(|| DataValidationError::UnknownLevel {
                        row,
                        column: self.column.clone(),
                        level: v.clone(),
                    })?;
                out.extend((1..levels.len()).map(|j| if j == idx { 1.0 } else { 0.0 }));
            }
            (TermKind::Flag { level, others }, CovariateValue::Categorical(v)) => {
                if v == level {
                    out.push(1.0);
                } else if others.contains(v) {
                    out.push(0.0);
                } else {
                    return Err(DataValidationError::UnknownLevel {
                        row,
                        column: self.column.clone(),
                        level: v.clone(),
                    });
                }
            }
            (TermKind::Continuous, CovariateValue::Continuous(v)) => out.push(*v),
            (TermKind::Continuous, _) => {
                return Err(DataValidationError::WrongKind {
                    row,
                    column: self.column.clone(),
                    expected: "continuous",
                })
            }
            (_, CovariateValue::Continuous(_)) => {
                return Err(DataValidationError::WrongKind {
                    row,
                    column: self.column.clone(),
                    expected: "categorical",
                })
            }
        }
        Ok(())
    }
}

/// Covariate formula for a Weibull survival model with `time` as response and
/// `event` as the censoring indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFormula {
    pub terms: Vec<Term>,
}

impl ModelFormula {
    pub fn new(terms: Vec<Term>) -> Self {
        Self { terms }
    }

    /// The customer-churn covariate set: partner status, internet service,
    /// online security, device protection, streaming TV and movies, contract,
    /// paperless billing, payment method and scaled total charges.
    pub fn telco() -> Self {
        const ADD_ON: &[&str] = &["No", "No internet service"];
        Self::new(vec![
            Term::flag("Partner", "Yes", &["No"]),
            Term::categorical("InternetService", &["DSL", "Fiber optic", "No"]),
            Term::flag("OnlineSecurity", "Yes", ADD_ON),
            Term::flag("DeviceProtection", "Yes", ADD_ON),
            Term::flag("StreamingTV", "Yes", ADD_ON),
            Term::flag("StreamingMovies", "Yes", ADD_ON),
            Term::categorical("Contract", &["Month-to-month", "One year", "Two year"]),
            Term::flag("PaperlessBilling", "Yes", &["No"]),
            Term::categorical(
                "PaymentMethod",
                &[
                    "Bank transfer (automatic)",
                    "Credit card (automatic)",
                    "Electronic check",
                    "Mailed check",
                ],
            ),
            Term::continuous("TotalCharges"),
        ])
    }

    /// Names of the regression coefficients in design-column order.
    pub fn coefficient_names(&self) -> Vec<String> {
        self.terms.iter().flat_map(|t| t.coefficient_names()).collect()
    }

    pub fn n_coefficients(&self) -> usize {
        self.coefficient_names().len()
    }

    /// Columns a record must carry to be encoded.
    pub fn required_columns(&self) -> Vec<String> {
        self.terms.iter().map(|t| t.column.clone()).collect()
    }

    /// Columns entering the formula as continuous terms.
    pub fn continuous_columns(&self) -> Vec<String> {
        self.terms
            .iter()
            .filter(|t| t.kind == TermKind::Continuous)
            .map(|t| t.column.clone())
            .collect()
    }

    /// Encodes one covariate mapping into a design row.
    pub fn encode(&self, covariates: &Covariates, row: usize) -> Result<Array1<f64>, DataValidationError> {
        let mut out = Vec::with_capacity(self.terms.len() + 4);
        for term in &self.terms {
            term.encode_into(covariates.get(&term.column), row, &mut out)?;
        }
        Ok(Array1::from(out))
    }

    /// Builds the design matrix and response vectors for `observations`.
    pub fn design(&self, observations: &[CensoredObservation]) -> Result<SurvivalDesign, DataValidationError> {
        let names = self.coefficient_names();
        let mut x = Array2::<f64>::zeros((observations.len(), names.len()));
        for (i, obs) in observations.iter().enumerate() {
            x.row_mut(i).assign(&self.encode(&obs.covariates, i)?);
        }
        Ok(SurvivalDesign {
            x,
            time: observations.iter().map(|o| o.time).collect(),
            event: observations.iter().map(|o| if o.event { 1.0 } else { 0.0 }).collect(),
            coefficient_names: names,
        })
    }
}

impl fmt::Display for ModelFormula {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rhs: Vec<&str> = self.terms.iter().map(|t| t.column.as_str()).collect();
        write!(f, "time | cens(1 - event) ~ {}", rhs.join(" + "))
    }
}

/// Numeric view of a prepared dataset under a formula.
#[derive(Debug, Clone, PartialEq)]
pub struct SurvivalDesign {
    /// Design matrix without intercept column, shape `(n, p)`.
    pub x: Array2<f64>,
    pub time: Array1<f64>,
    /// 1.0 for an observed event, 0.0 for right-censored.
    pub event: Array1<f64>,
    pub coefficient_names: Vec<String>,
}

impl SurvivalDesign {
    pub fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_coefficients(&self) -> usize {
        self.x.ncols()
    }

    /// Restricts the design to the rows in `keep`.
    pub fn select(&self, keep: &[usize]) -> SurvivalDesign {
        SurvivalDesign {
            x: self.x.select(ndarray::Axis(0), keep),
            time: self.time.select(ndarray::Axis(0), keep),
            event: self.event.select(ndarray::Axis(0), keep),
            coefficient_names: self.coefficient_names.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telco_formula_has_treatment_coded_columns() {
        let formula = ModelFormula::telco();
        let names = formula.coefficient_names();
        assert_eq!(names.len(), 14);
        assert!(names.contains(&"Contract[Two year]".to_string()));
        assert!(!names.contains(&"Contract[Month-to-month]".to_string()));
        assert_eq!(names.last().map(String::as_str), Some("TotalCharges"));
    }

    #[test]
    fn unknown_level_is_rejected() {
        let formula = ModelFormula::new(vec![Term::categorical("Contract", &["A", "B"])]);
        let mut covariates = Covariates::new();
        covariates.insert("Contract".into(), CovariateValue::level("C"));
        let err = formula.encode(&covariates, 7).unwrap_err();
        assert!(matches!(err, DataValidationError::UnknownLevel { row: 7, .. }));
    }

    #[test]
    fn flag_accepts_only_declared_levels() {
        let formula = ModelFormula::new(vec![Term::flag("OnlineSecurity", "Yes", &["No", "No internet service"])]);
        let mut covariates = Covariates::new();
        for (value, expected) in [("Yes", 1.0), ("No", 0.0), ("No internet service", 0.0)] {
            covariates.insert("OnlineSecurity".into(), CovariateValue::level(value));
            assert_eq!(formula.encode(&covariates, 0).unwrap()[0], expected);
        }
        covariates.insert("OnlineSecurity".into(), CovariateValue::level("yes"));
        let err = formula.encode(&covariates, 3).unwrap_err();
        assert!(matches!(err, DataValidationError::UnknownLevel { row: 3, .. }));
    }
}
