//! The CSV import engine.
//!
//! Streams rows out of an uploaded CSV, validates each against the
//! handler's schema, upserts by natural key, resolves image
//! references, and keeps an audit log of the whole run.
//!
//! The engine is generic over [`RowHandler`] so import types other
//! than products can be added without touching the orchestration.

pub mod csv;
pub mod resolve;

#[cfg(test)]
mod tests;

use ::csv::{ReaderBuilder, StringRecord};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::query::QueryOrder;
use sea_orm::ActiveValue::Set;
use sea_orm::{DatabaseConnection, PaginatorTrait};
use tracing::instrument;

use crate::database::entity::import_log::{self, Entity as ImportLog, ImportLogModel, ImportStatus};
use crate::database::entity::product::{self, Entity as Product};
use crate::database::entity::Json as DbJson;
use crate::database::DepotDatabase;
use crate::error::{ServerError, ServerResult};
use crate::State;
use self::csv::{CsvHeader, ProductRow};
use depot::api::v1::imports::{
    ImportDetailResponse, ImportHistoryResponse, ImportLogInfo, ImportOptions, ImportResult,
    ImportStatistics, ImportSummary, RowErrors, StatisticsPeriod, StatisticsResponse,
};
use depot::hash::Hash;

/// What a persisting upsert did with one row.
#[derive(Debug, Clone)]
pub enum RowOutcome {
    Created {
        entity_id: i64,
        image_source: Option<String>,
    },
    Updated {
        entity_id: i64,
        image_source: Option<String>,
    },
    Duplicate,
}

/// What a dry-run classification predicts for one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Create,
    Update,
    Duplicate,
}

/// Capability set one import type must provide.
#[async_trait]
pub trait RowHandler: Send + Sync {
    type Row: Send + Sync;

    fn import_type(&self) -> &'static str;
    fn required_columns(&self) -> &'static [&'static str];
    fn optional_columns(&self) -> &'static [&'static str];

    /// Validates one record, reporting all failed checks together.
    fn parse(&self, header: &CsvHeader, record: &StringRecord) -> Result<Self::Row, Vec<String>>;

    /// Upserts one validated row by its natural key.
    async fn apply(
        &self,
        database: &DatabaseConnection,
        row: Self::Row,
        update_existing: bool,
    ) -> ServerResult<RowOutcome>;

    /// Predicts what `apply` would do, without writing.
    async fn classify(
        &self,
        database: &DatabaseConnection,
        row: &Self::Row,
        update_existing: bool,
    ) -> ServerResult<RowKind>;
}

/// The product importer.
pub struct ProductRowHandler;

#[async_trait]
impl RowHandler for ProductRowHandler {
    type Row = ProductRow;

    fn import_type(&self) -> &'static str {
        "products"
    }

    fn required_columns(&self) -> &'static [&'static str] {
        csv::REQUIRED_COLUMNS
    }

    fn optional_columns(&self) -> &'static [&'static str] {
        csv::OPTIONAL_COLUMNS
    }

    fn parse(&self, header: &CsvHeader, record: &StringRecord) -> Result<Self::Row, Vec<String>> {
        csv::parse_product_row(header, record)
    }

    async fn apply(
        &self,
        database: &DatabaseConnection,
        row: Self::Row,
        update_existing: bool,
    ) -> ServerResult<RowOutcome> {
        let now = Utc::now();

        match database.find_product_by_sku(&row.sku).await? {
            Some(existing) if update_existing => {
                Product::update(product::ActiveModel {
                    id: Set(existing.id),
                    name: Set(row.name),
                    description: Set(row.description),
                    price: Set(row.price),
                    stock_quantity: Set(row.stock_quantity),
                    status: Set(row.status),
                    updated_at: Set(now),
                    ..Default::default()
                })
                .exec(database)
                .await
                .map_err(ServerError::database_error)?;

                Ok(RowOutcome::Updated {
                    entity_id: existing.id,
                    image_source: row.primary_image,
                })
            }
            Some(_) => Ok(RowOutcome::Duplicate),
            None => {
                let inserted = product::ActiveModel {
                    sku: Set(row.sku),
                    name: Set(row.name),
                    description: Set(row.description),
                    price: Set(row.price),
                    stock_quantity: Set(row.stock_quantity),
                    status: Set(row.status),
                    primary_image_id: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(database)
                .await
                .map_err(ServerError::database_error)?;

                Ok(RowOutcome::Created {
                    entity_id: inserted.id,
                    image_source: row.primary_image,
                })
            }
        }
    }

    async fn classify(
        &self,
        database: &DatabaseConnection,
        row: &Self::Row,
        update_existing: bool,
    ) -> ServerResult<RowKind> {
        match database.find_product_by_sku(&row.sku).await? {
            Some(_) if update_existing => Ok(RowKind::Update),
            Some(_) => Ok(RowKind::Duplicate),
            None => Ok(RowKind::Create),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    imported: u64,
    updated: u64,
    invalid: u64,
    duplicates: u64,
}

impl Counters {
    fn processed(&self) -> u64 {
        self.imported + self.updated
    }

    fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }

        round2(100.0 * self.processed() as f64 / self.total as f64)
    }
}

/// Checks a CSV header against the handler's required columns.
pub fn validate_header<H: RowHandler>(
    handler: &H,
    data: &[u8],
) -> ServerResult<Vec<String>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    let headers = reader
        .headers()
        .map_err(|e| ServerError::validation(format!("Unable to parse CSV header: {e}")))?;

    Ok(CsvHeader::parse(headers).missing_required(handler.required_columns()))
}

/// Runs one import.
#[instrument(skip_all, fields(filename, import_type = handler.import_type()))]
pub async fn import<H: RowHandler>(
    state: &State,
    handler: &H,
    filename: &str,
    data: &[u8],
    options: ImportOptions,
) -> ServerResult<ImportResult> {
    let database = state.database().await?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    let headers = reader
        .headers()
        .map_err(|e| ServerError::validation(format!("Unable to parse CSV header: {e}")))?;
    let header = CsvHeader::parse(headers);

    let missing = header.missing_required(handler.required_columns());
    if !missing.is_empty() {
        return Err(ServerError::validation(format!(
            "Missing required columns: {}",
            missing.join(", ")
        )));
    }

    let started_at = Utc::now();

    let log_id = if options.validate_only {
        None
    } else {
        let log = import_log::ActiveModel {
            filename: Set(filename.to_string()),
            file_hash: Set(Some(Hash::sha256_from_bytes(data).to_hex())),
            status: Set(ImportStatus::Pending),
            total_rows: Set(0),
            imported_rows: Set(0),
            updated_rows: Set(0),
            invalid_rows: Set(0),
            duplicate_rows: Set(0),
            error_details: Set(DbJson(Vec::new())),
            started_at: Set(started_at),
            completed_at: Set(None),
            processing_time_seconds: Set(None),
            ..Default::default()
        }
        .insert(database)
        .await
        .map_err(ServerError::database_error)?;

        ImportLog::update(import_log::ActiveModel {
            id: Set(log.id),
            status: Set(ImportStatus::Processing),
            ..Default::default()
        })
        .exec(database)
        .await
        .map_err(ServerError::database_error)?;

        Some(log.id)
    };

    let mut counters = Counters::default();
    let mut errors: Vec<RowErrors> = Vec::new();

    for (offset, record) in reader.records().enumerate() {
        // 1-based file lines, counting the header as row 1
        let row_number = offset as u64 + 2;
        counters.total += 1;

        let parsed = match record {
            Ok(record) => handler.parse(&header, &record),
            Err(e) => Err(vec![format!("Malformed CSV row: {e}")]),
        };

        let row = match parsed {
            Ok(row) => row,
            Err(messages) => {
                counters.invalid += 1;
                errors.push(RowErrors {
                    row: row_number,
                    errors: messages.clone(),
                });

                if !options.skip_invalid {
                    finalize(database, log_id, ImportStatus::Failed, &counters, &errors)
                        .await?;
                    return Err(ServerError::ImportAborted {
                        row: row_number,
                        errors: messages,
                    });
                }

                flush_progress(database, log_id, &counters, &errors).await?;
                continue;
            }
        };

        if options.validate_only {
            match handler.classify(database, &row, options.update_existing).await? {
                RowKind::Create => counters.imported += 1,
                RowKind::Update => counters.updated += 1,
                RowKind::Duplicate => counters.duplicates += 1,
            }
            continue;
        }

        // Any per-row failure is caught and counted, not propagated
        match handler.apply(database, row, options.update_existing).await {
            Ok(outcome) => {
                let attach = match outcome {
                    RowOutcome::Created {
                        entity_id,
                        image_source,
                    } => {
                        counters.imported += 1;
                        image_source.map(|source| (entity_id, source))
                    }
                    RowOutcome::Updated {
                        entity_id,
                        image_source,
                    } => {
                        counters.updated += 1;
                        image_source.map(|source| (entity_id, source))
                    }
                    RowOutcome::Duplicate => {
                        counters.duplicates += 1;
                        None
                    }
                };

                if let Some((entity_id, source)) = attach {
                    if let Err(e) =
                        resolve::resolve_primary_image(state, entity_id, &source).await
                    {
                        tracing::warn!(
                            row = row_number,
                            source = %source,
                            "Image reference resolution failed: {}",
                            e
                        );
                    }
                }
            }
            Err(e) => {
                let message = e.to_string();
                counters.invalid += 1;
                errors.push(RowErrors {
                    row: row_number,
                    errors: vec![message.clone()],
                });

                if !options.skip_invalid {
                    finalize(database, log_id, ImportStatus::Failed, &counters, &errors)
                        .await?;
                    return Err(ServerError::ImportAborted {
                        row: row_number,
                        errors: vec![message],
                    });
                }
            }
        }

        flush_progress(database, log_id, &counters, &errors).await?;
    }

    let terminal = if counters.invalid == 0 {
        ImportStatus::Completed
    } else {
        ImportStatus::PartiallyCompleted
    };

    finalize(database, log_id, terminal, &counters, &errors).await?;

    tracing::info!(
        total = counters.total,
        imported = counters.imported,
        updated = counters.updated,
        invalid = counters.invalid,
        duplicates = counters.duplicates,
        "Import finished"
    );

    Ok(ImportResult {
        total: counters.total,
        imported: counters.imported,
        updated: counters.updated,
        invalid: counters.invalid,
        duplicates: counters.duplicates,
        processed: counters.processed(),
        success_rate: counters.success_rate(),
        errors,
        import_log_id: log_id,
    })
}

/// Writes the running counters into the audit log.
async fn flush_progress(
    database: &DatabaseConnection,
    log_id: Option<i64>,
    counters: &Counters,
    errors: &[RowErrors],
) -> ServerResult<()> {
    let Some(log_id) = log_id else {
        return Ok(());
    };

    ImportLog::update(import_log::ActiveModel {
        id: Set(log_id),
        total_rows: Set(counters.total as i32),
        imported_rows: Set(counters.imported as i32),
        updated_rows: Set(counters.updated as i32),
        invalid_rows: Set(counters.invalid as i32),
        duplicate_rows: Set(counters.duplicates as i32),
        error_details: Set(DbJson(errors.to_vec())),
        ..Default::default()
    })
    .exec(database)
    .await
    .map_err(ServerError::database_error)?;

    Ok(())
}

/// Transitions the audit log to a terminal status.
async fn finalize(
    database: &DatabaseConnection,
    log_id: Option<i64>,
    status: ImportStatus,
    counters: &Counters,
    errors: &[RowErrors],
) -> ServerResult<()> {
    let Some(log_id) = log_id else {
        return Ok(());
    };

    let log = ImportLog::find_by_id(log_id)
        .one(database)
        .await
        .map_err(ServerError::database_error)?
        .ok_or(ServerError::NoSuchImport)?;

    let completed_at = Utc::now();
    let processing_time = (completed_at - log.started_at).num_seconds().max(0);

    ImportLog::update(import_log::ActiveModel {
        id: Set(log_id),
        status: Set(status),
        total_rows: Set(counters.total as i32),
        imported_rows: Set(counters.imported as i32),
        updated_rows: Set(counters.updated as i32),
        invalid_rows: Set(counters.invalid as i32),
        duplicate_rows: Set(counters.duplicates as i32),
        error_details: Set(DbJson(errors.to_vec())),
        completed_at: Set(Some(completed_at)),
        processing_time_seconds: Set(Some(processing_time)),
        ..Default::default()
    })
    .exec(database)
    .await
    .map_err(ServerError::database_error)?;

    Ok(())
}

/// Lists past imports, newest first.
pub async fn history(
    state: &State,
    page: u64,
    per_page: u64,
) -> ServerResult<ImportHistoryResponse> {
    let database = state.database().await?;

    let page = page.max(1);
    let per_page = per_page.clamp(1, 100);

    let paginator = ImportLog::find()
        .order_by_desc(import_log::Column::StartedAt)
        .paginate(database, per_page);

    let total = paginator
        .num_items()
        .await
        .map_err(ServerError::database_error)?;

    let imports = paginator
        .fetch_page(page - 1)
        .await
        .map_err(ServerError::database_error)?
        .iter()
        .map(log_info)
        .collect();

    Ok(ImportHistoryResponse {
        imports,
        page,
        per_page,
        total: total as u64,
    })
}

/// Returns one import with its summary block.
pub async fn detail(state: &State, id: i64) -> ServerResult<ImportDetailResponse> {
    let database = state.database().await?;

    let log = ImportLog::find_by_id(id)
        .one(database)
        .await
        .map_err(ServerError::database_error)?
        .ok_or(ServerError::NoSuchImport)?;

    let summary = summary_of(&log);

    Ok(ImportDetailResponse {
        import: log_info(&log),
        summary,
    })
}

/// Aggregates import runs over the trailing window.
pub async fn statistics(state: &State, days: i64) -> ServerResult<StatisticsResponse> {
    let database = state.database().await?;

    let to = Utc::now();
    let from = to - ChronoDuration::days(days.max(1));

    let logs = ImportLog::find()
        .filter(import_log::Column::StartedAt.gte(from))
        .order_by_desc(import_log::Column::StartedAt)
        .all(database)
        .await
        .map_err(ServerError::database_error)?;

    let statistics = fold_statistics(&logs);

    Ok(StatisticsResponse {
        statistics,
        period: StatisticsPeriod { from, to },
    })
}

fn fold_statistics(logs: &[ImportLogModel]) -> ImportStatistics {
    let mut stats = ImportStatistics {
        total_imports: logs.len() as u64,
        ..Default::default()
    };

    for log in logs {
        match log.status {
            ImportStatus::Completed => stats.completed += 1,
            ImportStatus::PartiallyCompleted => stats.partially_completed += 1,
            ImportStatus::Failed => stats.failed += 1,
            ImportStatus::Pending | ImportStatus::Processing => {}
        }

        stats.total_rows += log.total_rows as u64;
        stats.imported_rows += log.imported_rows as u64;
        stats.updated_rows += log.updated_rows as u64;
        stats.invalid_rows += log.invalid_rows as u64;
        stats.duplicate_rows += log.duplicate_rows as u64;
    }

    if stats.total_rows > 0 {
        stats.success_rate = round2(
            100.0 * (stats.imported_rows + stats.updated_rows) as f64 / stats.total_rows as f64,
        );
    }

    stats
}

fn summary_of(log: &ImportLogModel) -> ImportSummary {
    let processed = (log.imported_rows + log.updated_rows) as u64;
    let success_rate = if log.total_rows > 0 {
        round2(100.0 * processed as f64 / log.total_rows as f64)
    } else {
        0.0
    };

    ImportSummary {
        total: log.total_rows as u64,
        imported: log.imported_rows as u64,
        updated: log.updated_rows as u64,
        invalid: log.invalid_rows as u64,
        duplicates: log.duplicate_rows as u64,
        processed,
        success_rate,
        processing_time_seconds: log.processing_time_seconds,
    }
}

/// Exposes an import log over the API.
pub fn log_info(log: &ImportLogModel) -> ImportLogInfo {
    ImportLogInfo {
        id: log.id,
        filename: log.filename.clone(),
        file_hash: log.file_hash.clone(),
        status: log.status.to_string(),
        total_rows: log.total_rows as u64,
        imported_rows: log.imported_rows as u64,
        updated_rows: log.updated_rows as u64,
        invalid_rows: log.invalid_rows as u64,
        duplicate_rows: log.duplicate_rows as u64,
        error_details: log.error_details.0.clone(),
        started_at: log.started_at,
        completed_at: log.completed_at,
        processing_time_seconds: log.processing_time_seconds,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
