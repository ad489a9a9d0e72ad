//! CSV import endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Options accepted by the import endpoint.
///
/// This is a closed set; unknown keys are rejected at the edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportOptions {
    /// Run the full parse and validation pass without persisting
    /// any product or import log.
    #[serde(default)]
    pub validate_only: bool,

    /// Continue past invalid rows. When false, the first invalid
    /// row aborts the import.
    #[serde(default = "default_true")]
    pub skip_invalid: bool,

    /// Update products whose SKU already exists. When false, such
    /// rows are counted as duplicates and left untouched.
    #[serde(default = "default_true")]
    pub update_existing: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            validate_only: false,
            skip_invalid: true,
            update_existing: true,
        }
    }
}

/// Errors recorded for one rejected row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowErrors {
    /// 1-based row number in the file, counting the header as row 1.
    pub row: u64,

    /// Per-field error messages.
    pub errors: Vec<String>,
}

/// Aggregated result of one import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub total: u64,
    pub imported: u64,
    pub updated: u64,
    pub invalid: u64,
    pub duplicates: u64,

    /// `imported + updated`.
    pub processed: u64,

    /// `100 * processed / total`, two-decimal rounding; 0 when the
    /// file had no data rows.
    pub success_rate: f64,

    pub errors: Vec<RowErrors>,

    /// Absent for validate-only runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_log_id: Option<i64>,
}

/// Result of validating a CSV header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_columns: Option<Vec<String>>,
}

/// Column sets understood by an importer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnsResponse {
    pub import_type: String,
    pub required_columns: Vec<String>,
    pub optional_columns: Vec<String>,
}

/// One import log, as exposed over the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportLogInfo {
    pub id: i64,
    pub filename: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,

    pub status: String,
    pub total_rows: u64,
    pub imported_rows: u64,
    pub updated_rows: u64,
    pub invalid_rows: u64,
    pub duplicate_rows: u64,
    pub error_details: Vec<RowErrors>,
    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_seconds: Option<i64>,
}

/// Summary block attached to a single-import response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSummary {
    pub total: u64,
    pub imported: u64,
    pub updated: u64,
    pub invalid: u64,
    pub duplicates: u64,
    pub processed: u64,
    pub success_rate: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_seconds: Option<i64>,
}

/// Detail response for one import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportDetailResponse {
    pub import: ImportLogInfo,
    pub summary: ImportSummary,
}

/// A page of import logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportHistoryResponse {
    pub imports: Vec<ImportLogInfo>,
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
}

/// Aggregate statistics over a window of import runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportStatistics {
    pub total_imports: u64,
    pub completed: u64,
    pub partially_completed: u64,
    pub failed: u64,
    pub total_rows: u64,
    pub imported_rows: u64,
    pub updated_rows: u64,
    pub invalid_rows: u64,
    pub duplicate_rows: u64,

    /// `100 * (imported + updated) / total` over the window,
    /// two-decimal rounding.
    pub success_rate: f64,
}

/// Reporting window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsPeriod {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Statistics endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsResponse {
    pub statistics: ImportStatistics,
    pub period: StatisticsPeriod,
}
