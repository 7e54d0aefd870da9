mod common;

use approx::assert_abs_diff_eq;
use churn_survival::data::{
    read_customers_from, CovariateValue, CsvSchema, DataPreparer, PreparedDataset,
};
use churn_survival::error::{AnalysisError, DataValidationError};
use churn_survival::formula::ModelFormula;
use common::SyntheticChurnBuilder;

fn prepare(records: &[churn_survival::data::CustomerRecord]) -> Result<PreparedDataset, DataValidationError> {
    DataPreparer::for_formula(&ModelFormula::telco(), "Yes").prepare(records)
}

#[test]
fn zero_tenure_records_are_excluded() {
    let records = SyntheticChurnBuilder::new(200).with_zero_tenure(11).build();
    let prepared = prepare(&records).unwrap();

    assert_eq!(prepared.zero_time_excluded, 11);
    assert_eq!(prepared.len(), 200);
    assert!(prepared.observations.iter().all(|o| o.time > 0.0));

    // Retained rows keep their covariates; only formula columns are rescaled.
    let scale = prepared.scaling.columns["TotalCharges"];
    let kept: Vec<_> = records.iter().filter(|r| r.tenure > 0.0).collect();
    assert_eq!(kept.len(), prepared.len());
    for (obs, record) in prepared.observations.iter().zip(kept) {
        assert_eq!(obs.id, record.id);
        for (column, raw) in &record.attributes {
            match raw {
                CovariateValue::Categorical(_) => assert_eq!(&obs.covariates[column], raw),
                CovariateValue::Continuous(v) if column == "TotalCharges" => {
                    assert_eq!(obs.covariates[column], CovariateValue::Continuous(scale.apply(*v)))
                }
                CovariateValue::Continuous(_) => assert_eq!(&obs.covariates[column], raw),
            }
        }
    }
}

#[test]
fn churn_label_encodes_event() {
    let records = SyntheticChurnBuilder::new(100).build();
    let prepared = prepare(&records).unwrap();
    for (obs, record) in prepared.observations.iter().zip(&records) {
        assert_eq!(obs.event, record.churn == "Yes");
        assert_eq!(obs.time, record.tenure);
    }
}

#[test]
fn continuous_predictors_are_standardized_over_included_records() {
    let records = SyntheticChurnBuilder::new(300).with_zero_tenure(20).build();
    let prepared = prepare(&records).unwrap();

    let values: Vec<f64> = prepared
        .observations
        .iter()
        .map(|o| match o.covariates["TotalCharges"] {
            CovariateValue::Continuous(v) => v,
            _ => panic!("TotalCharges should be continuous"),
        })
        .collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-10);
    assert_abs_diff_eq!(var, 1.0, epsilon = 1e-10);

    // The retained parameters reproduce the training transform.
    let scale = prepared.scaling.columns["TotalCharges"];
    let raw = match records[0].attributes["TotalCharges"] {
        CovariateValue::Continuous(v) => v,
        _ => unreachable!(),
    };
    let scaled = match prepared.observations[0].covariates["TotalCharges"] {
        CovariateValue::Continuous(v) => v,
        _ => unreachable!(),
    };
    assert_abs_diff_eq!(scale.apply(raw), scaled, epsilon = 1e-12);
}

#[test]
fn missing_required_covariate_fails_fast() {
    let mut records = SyntheticChurnBuilder::new(50).build();
    records[17].attributes.remove("Contract");

    let err = prepare(&records).unwrap_err();
    assert_eq!(
        err,
        DataValidationError::MissingColumn {
            row: 17,
            column: "Contract".to_string()
        }
    );
}

#[test]
fn unknown_level_is_rejected_when_encoding() {
    let mut records = SyntheticChurnBuilder::new(50).build();
    records[3]
        .attributes
        .insert("Contract".into(), CovariateValue::level("Lifetime"));
    let prepared = prepare(&records).unwrap();

    let err = ModelFormula::telco().design(&prepared.observations).unwrap_err();
    assert!(matches!(err, DataValidationError::UnknownLevel { ref level, .. } if level == "Lifetime"));
}

#[test]
fn misspelled_flag_value_is_rejected_when_encoding() {
    let mut records = SyntheticChurnBuilder::new(50).build();
    records[0].attributes.insert("Partner".into(), CovariateValue::level("Yse"));
    let prepared = prepare(&records).unwrap();

    let err = ModelFormula::telco().design(&prepared.observations).unwrap_err();
    assert_eq!(
        err,
        DataValidationError::UnknownLevel {
            row: 0,
            column: "Partner".to_string(),
            level: "Yse".to_string()
        }
    );
}

#[test]
fn negative_tenure_is_invalid() {
    let mut records = SyntheticChurnBuilder::new(20).build();
    records[5].tenure = -1.0;
    assert!(matches!(prepare(&records), Err(DataValidationError::InvalidTime { row: 5, .. })));
}

const CSV: &str = "\
customerID,gender,Partner,tenure,InternetService,OnlineSecurity,DeviceProtection,StreamingTV,StreamingMovies,Contract,PaperlessBilling,PaymentMethod,MonthlyCharges,TotalCharges,Churn
0001-A,Female,Yes,1,DSL,No,No,No,No,Month-to-month,Yes,Electronic check,29.85,29.85,No
0002-B,Male,No,34,DSL,Yes,Yes,No,No,One year,No,Mailed check,56.95,1889.5,No
0003-C,Male,No,0,DSL,Yes,No,No,No,Two year,No,Bank transfer (automatic),53.85, ,No
0004-D,Female,No,2,Fiber optic,No,No,No,No,Month-to-month,Yes,Electronic check,70.70,151.65,Yes
";

#[test]
fn csv_rows_become_records_with_blank_total_charges_as_zero() {
    let records = read_customers_from(CSV.as_bytes(), &CsvSchema::default()).unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].id.as_deref(), Some("0001-A"));
    assert_eq!(records[2].attributes["TotalCharges"], CovariateValue::Continuous(0.0));
    assert_eq!(records[3].churn, "Yes");
    assert_eq!(records[1].attributes["Contract"], CovariateValue::level("One year"));

    let prepared = prepare(&records).unwrap();
    assert_eq!(prepared.len(), 3);
    assert_eq!(prepared.zero_time_excluded, 1);
    assert_eq!(prepared.observations.iter().filter(|o| o.event).count(), 1);
}

#[test]
fn unparseable_number_is_a_validation_error() {
    let bad = CSV.replace("1889.5", "n/a");
    let err = read_customers_from(bad.as_bytes(), &CsvSchema::default()).unwrap_err();
    assert!(matches!(
        err,
        AnalysisError::DataValidation(DataValidationError::InvalidValue { row: 1, .. })
    ));
}
