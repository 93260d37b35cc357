use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::ResultType;

/// One analysis channel reading reported by the instrument, e.g.
/// `{"label": "ORF1ab", "value": 23.4}`. Non-numeric values (control
/// channels reporting "detected"/"N/A") are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultAnalysis {
    pub label: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl ResultAnalysis {
    /// Numeric reading, when the channel carries one.
    pub fn numeric(&self) -> Option<f64> {
        self.value.as_f64()
    }
}

/// One test-result row. Per appointment, at most one row has
/// `waiting_result = true`; superseded rows are retired, not deleted, and
/// the chain is linked through `linked_barcodes` / `run_number` /
/// `re_collect_number`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub barcode: Option<String>,
    pub result: ResultType,
    pub waiting_result: bool,
    pub recollected: bool,
    pub run_number: i64,
    pub re_collect_number: i64,
    pub display_in_result: bool,
    pub confirmed: bool,
    /// Result value of the row this one superseded, if any.
    pub previous_result: Option<ResultType>,
    /// Barcodes of earlier draws in the same collection chain.
    pub linked_barcodes: Vec<String>,
    pub organization_id: Option<String>,
    /// Admin who resolved the result, once reported.
    pub admin_id: Option<String>,
    pub result_analysis: Vec<ResultAnalysis>,
    pub result_date: Option<NaiveDate>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub test_type: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Named-property patch for a test result. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TestResultPatch {
    pub barcode: Option<String>,
    pub result: Option<ResultType>,
    pub waiting_result: Option<bool>,
    pub recollected: Option<bool>,
    pub run_number: Option<i64>,
    pub re_collect_number: Option<i64>,
    pub display_in_result: Option<bool>,
    pub confirmed: Option<bool>,
    pub previous_result: Option<ResultType>,
    pub linked_barcodes: Option<Vec<String>>,
    pub organization_id: Option<String>,
    pub admin_id: Option<String>,
    pub result_analysis: Option<Vec<ResultAnalysis>>,
    pub result_date: Option<NaiveDate>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub test_type: Option<String>,
}
