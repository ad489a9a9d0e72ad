//! Audit record for one CSV import run.

use sea_orm::entity::prelude::*;

use super::Json;
use depot::api::v1::imports::RowErrors;

pub type ImportLogModel = Model;

/// The state of an import run.
#[derive(EnumIter, DeriveActiveEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(1))")]
pub enum ImportStatus {
    /// The log row exists but streaming has not started.
    #[sea_orm(string_value = "P")]
    Pending,

    /// Rows are being processed.
    #[sea_orm(string_value = "R")]
    Processing,

    /// Finished with no invalid rows.
    #[sea_orm(string_value = "C")]
    Completed,

    /// Finished, but some rows were invalid.
    #[sea_orm(string_value = "T")]
    PartiallyCompleted,

    /// Aborted by a fatal error or a non-skipped invalid row.
    #[sea_orm(string_value = "F")]
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyCompleted | Self::Failed)
    }
}

impl std::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One CSV import run.
///
/// On terminal statuses,
/// `imported + updated + invalid + duplicate = total`.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "import_log")]
pub struct Model {
    /// Unique numeric ID of the run.
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Name of the uploaded file.
    pub filename: String,

    /// SHA-256 of the file contents, for observability only.
    ///
    /// Two concurrent imports of the same file are allowed and
    /// produce two rows.
    pub file_hash: Option<String>,

    pub status: ImportStatus,

    pub total_rows: i32,
    pub imported_rows: i32,
    pub updated_rows: i32,
    pub invalid_rows: i32,
    pub duplicate_rows: i32,

    /// Ordered list of per-row errors.
    pub error_details: Json<Vec<RowErrors>>,

    pub started_at: ChronoDateTimeUtc,
    pub completed_at: Option<ChronoDateTimeUtc>,

    /// `completed_at - started_at`, in whole seconds.
    pub processing_time_seconds: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
