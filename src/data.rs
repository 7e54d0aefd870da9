//! Customer records, censoring-aware preparation and CSV ingestion.
//!
//! Raw customer rows become [`CensoredObservation`]s: the churn label is
//! encoded as the event indicator, tenure becomes the time-to-event,
//! zero-time records are excluded and continuous predictors are standardized
//! over the included records. The standardization parameters are retained in
//! [`ScalingParams`] so that new profiles can be scored on the training scale.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, DataValidationError};
use crate::formula::ModelFormula;

/// Value of a single covariate. Serialized as a bare string or number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CovariateValue {
    /// A level of a categorical attribute, e.g. `"Two year"`.
    Categorical(String),
    /// A continuous measurement, e.g. total charges.
    Continuous(f64),
}

impl CovariateValue {
    /// Shorthand for a categorical value.
    pub fn level(level: &str) -> Self {
        CovariateValue::Categorical(level.to_string())
    }
}

/// Covariate name to value mapping shared by records, observations and profiles.
pub type Covariates = BTreeMap<String, CovariateValue>;

/// One raw customer row before censoring encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRecord {
    /// Optional customer identifier, carried through for reporting.
    pub id: Option<String>,
    /// All non-outcome attributes of the customer.
    pub attributes: Covariates,
    /// Months the customer has been observed.
    pub tenure: f64,
    /// Raw churn label, e.g. `"Yes"` / `"No"`.
    pub churn: String,
}

/// A right-censored survival observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CensoredObservation {
    pub id: Option<String>,
    pub covariates: Covariates,
    /// Observed time in months, always `> 0`.
    pub time: f64,
    /// `true` when churn was observed, `false` when right-censored at `time`.
    pub event: bool,
}

/// Mean and standard deviation used to standardize one column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnScale {
    pub mean: f64,
    pub sd: f64,
}

impl ColumnScale {
    /// Maps a raw value onto the standardized scale.
    pub fn apply(&self, value: f64) -> f64 {
        (value - self.mean) / self.sd
    }
}

/// Standardization parameters computed over the included training records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalingParams {
    pub columns: BTreeMap<String, ColumnScale>,
}

impl ScalingParams {
    /// Returns a copy of `covariates` with every known continuous column
    /// standardized. Used for new profiles at prediction time; the parameters
    /// are never refit on the new data.
    pub fn apply(&self, covariates: &Covariates, row: usize) -> Result<Covariates, DataValidationError> {
        let mut scaled = covariates.clone();
        for (column, scale) in &self.columns {
            match scaled.get_mut(column) {
                Some(CovariateValue::Continuous(v)) => *v = scale.apply(*v),
                Some(CovariateValue::Categorical(_)) => {
                    return Err(DataValidationError::WrongKind {
                        row,
                        column: column.clone(),
                        expected: "continuous",
                    })
                }
                None => {
                    return Err(DataValidationError::MissingColumn {
                        row,
                        column: column.clone(),
                    })
                }
            }
        }
        Ok(scaled)
    }
}

/// Output of [`DataPreparer::prepare`].
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedDataset {
    pub observations: Vec<CensoredObservation>,
    pub scaling: ScalingParams,
    /// Number of records dropped because `time == 0`.
    pub zero_time_excluded: usize,
}

impl PreparedDataset {
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Largest observed time, used to detect predictive extrapolation.
    pub fn max_time(&self) -> f64 {
        self.observations
            .iter()
            .map(|o| o.time)
            .fold(0.0, f64::max)
    }

    /// Returns a dataset restricted to the observations whose index is not in
    /// `removed`, keeping the scaling parameters.
    pub fn without(&self, removed: &[usize]) -> PreparedDataset {
        let mut keep = vec![true; self.observations.len()];
        for &idx in removed {
            if let Some(k) = keep.get_mut(idx) {
                *k = false;
            }
        }
        PreparedDataset {
            observations: self
                .observations
                .iter()
                .zip(keep)
                .filter_map(|(o, k)| k.then(|| o.clone()))
                .collect(),
            scaling: self.scaling.clone(),
            zero_time_excluded: self.zero_time_excluded,
        }
    }
}

/// Encodes censoring, removes zero-time records and standardizes continuous
/// predictors.
#[derive(Debug, Clone)]
pub struct DataPreparer {
    /// Label value that indicates churn was observed.
    pub churn_label: String,
    /// Columns every record must carry.
    pub required_columns: Vec<String>,
    /// Continuous columns to standardize.
    pub scale_columns: Vec<String>,
}

impl DataPreparer {
    /// Creates a preparer that requires every column used by `formula` and
    /// standardizes its continuous terms.
    pub fn for_formula(formula: &ModelFormula, churn_label: &str) -> Self {
        Self {
            churn_label: churn_label.to_string(),
            required_columns: formula.required_columns(),
            scale_columns: formula.continuous_columns(),
        }
    }

    /// Prepares `records` for modeling.
    ///
    /// Every record is validated before anything is excluded, so a malformed
    /// input fails the whole call rather than producing a partial dataset.
    pub fn prepare(&self, records: &[CustomerRecord]) -> Result<PreparedDataset, DataValidationError> {
        for (row, record) in records.iter().enumerate() {
            self.validate(row, record)?;
        }

        let mut observations: Vec<CensoredObservation> = records
            .iter()
            .filter(|r| r.tenure > 0.0)
            .map(|r| CensoredObservation {
                id: r.id.clone(),
                covariates: r.attributes.clone(),
                time: r.tenure,
                event: r.churn.trim().eq_ignore_ascii_case(&self.churn_label),
            })
            .collect();
        let zero_time_excluded = records.len() - observations.len();

        if observations.is_empty() {
            return Err(DataValidationError::Empty);
        }

        let mut scaling = ScalingParams::default();
        for column in &self.scale_columns {
            let values: Vec<f64> = observations
                .iter()
                .filter_map(|o| match o.covariates.get(column) {
                    Some(CovariateValue::Continuous(v)) => Some(*v),
                    _ => None,
                })
                .collect();
            let mean = crate::math::mean(&values);
            let sd = crate::math::sample_variance(&values).sqrt();
            if !(sd.is_finite() && sd > 0.0) {
                return Err(DataValidationError::DegenerateScale(column.clone()));
            }
            scaling.columns.insert(column.clone(), ColumnScale { mean, sd });
        }

        for (row, obs) in observations.iter_mut().enumerate() {
            obs.covariates = scaling.apply(&obs.covariates, row)?;
        }

        info!(
            "prepared {} observations ({} zero-time records excluded, {} events)",
            observations.len(),
            zero_time_excluded,
            observations.iter().filter(|o| o.event).count()
        );

        Ok(PreparedDataset {
            observations,
            scaling,
            zero_time_excluded,
        })
    }

    fn validate(&self, row: usize, record: &CustomerRecord) -> Result<(), DataValidationError> {
        if !record.tenure.is_finite() || record.tenure < 0.0 {
            return Err(DataValidationError::InvalidTime {
                row,
                time: record.tenure,
            });
        }
        for column in &self.required_columns {
            match record.attributes.get(column) {
                None => {
                    return Err(DataValidationError::MissingColumn {
                        row,
                        column: column.clone(),
                    })
                }
                Some(CovariateValue::Continuous(v)) if !v.is_finite() => {
                    return Err(DataValidationError::InvalidValue {
                        row,
                        column: column.clone(),
                        value: v.to_string(),
                    })
                }
                Some(_) => {}
            }
        }
        for column in &self.scale_columns {
            if let Some(CovariateValue::Categorical(_)) = record.attributes.get(column) {
                return Err(DataValidationError::WrongKind {
                    row,
                    column: column.clone(),
                    expected: "continuous",
                });
            }
        }
        Ok(())
    }
}

/// Column layout of a customer CSV file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvSchema {
    pub id_column: Option<String>,
    pub tenure_column: String,
    pub churn_column: String,
    /// Columns parsed as numbers. Every other column is categorical.
    pub continuous_columns: Vec<String>,
    /// Continuous columns where a blank cell means zero rather than missing.
    pub blank_as_zero: Vec<String>,
}

impl Default for CsvSchema {
    fn default() -> Self {
        Self {
            id_column: Some("customerID".to_string()),
            tenure_column: "tenure".to_string(),
            churn_column: "Churn".to_string(),
            continuous_columns: vec!["MonthlyCharges".to_string(), "TotalCharges".to_string()],
            blank_as_zero: vec!["TotalCharges".to_string()],
        }
    }
}

/// Reads customer records from a CSV file with a header row.
pub fn read_customers(path: &Path, schema: &CsvSchema) -> Result<Vec<CustomerRecord>, AnalysisError> {
    let file = File::open(path)?;
    read_customers_from(file, schema)
}

/// Reads customer records from any CSV source with a header row.
pub fn read_customers_from<R: Read>(
    reader: R,
    schema: &CsvSchema,
) -> Result<Vec<CustomerRecord>, AnalysisError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut records = Vec::new();
    for (row, result) in csv_reader.deserialize::<HashMap<String, String>>().enumerate() {
        let fields = result?;
        records.push(parse_row(row, fields, schema)?);
    }
    debug!("read {} customer rows", records.len());
    Ok(records)
}

fn parse_row(
    row: usize,
    mut fields: HashMap<String, String>,
    schema: &CsvSchema,
) -> Result<CustomerRecord, DataValidationError> {
    let mut take = |column: &str| {
        fields
            .remove(column)
            .ok_or_else(|| DataValidationError::MissingColumn {
                row,
                column: column.to_string(),
            })
    };

    let tenure_raw = take(schema.tenure_column.as_str())?;
    let tenure = tenure_raw
        .parse::<f64>()
        .map_err(|_| DataValidationError::InvalidValue {
            row,
            column: schema.tenure_column.clone(),
            value: tenure_raw.clone(),
        })?;
    let churn = take(schema.churn_column.as_str())?;
    let id = match &schema.id_column {
        Some(column) => Some(take(column.as_str())?),
        None => None,
    };

    let mut attributes = Covariates::new();
    for (column, raw) in fields {
        let value = if schema.continuous_columns.contains(&column) {
            if raw.is_empty() && schema.blank_as_zero.contains(&column) {
                CovariateValue::Continuous(0.0)
            } else {
                let v = raw.parse::<f64>().map_err(|_| DataValidationError::InvalidValue {
                    row,
                    column: column.clone(),
                    value: raw.clone(),
                })?;
                CovariateValue::Continuous(v)
            }
        } else {
            CovariateValue::Categorical(raw)
        };
        attributes.insert(column, value);
    }

    Ok(CustomerRecord {
        id,
        attributes,
        tenure,
        churn,
    })
}
