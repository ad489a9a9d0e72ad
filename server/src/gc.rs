//! Garbage collection.
//!
//! Reclaims chunk storage held by upload sessions that stalled
//! without reaching a terminal state.

use std::time::Duration;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use tokio::time;
use tracing::instrument;

use crate::config::Config;
use crate::database::entity::upload::{self, Entity as Upload, UploadStatus};
use crate::storage::StorageBackend;
use crate::{State, StateInner};

/// Runs garbage collection periodically.
pub async fn run_garbage_collection(config: Config) {
    let interval = config.garbage_collection.interval;

    if interval == Duration::ZERO {
        // disabled
        return;
    }

    loop {
        // We don't stop even if it errors
        if let Err(e) = run_garbage_collection_once(config.clone()).await {
            tracing::warn!("Garbage collection failed: {}", e);
        }

        time::sleep(interval).await;
    }
}

/// Runs garbage collection once.
#[instrument(skip_all)]
pub async fn run_garbage_collection_once(config: Config) -> Result<()> {
    tracing::info!("Running garbage collection...");

    let state = StateInner::new(config).await;
    run_reap_stale_uploads(&state).await?;

    Ok(())
}

#[instrument(skip_all)]
async fn run_reap_stale_uploads(state: &State) -> Result<()> {
    let db = state.database().await?;
    let storage = state.storage().await?;

    let retention = state.config.garbage_collection.upload_retention_period;
    let cutoff = Utc::now()
        - ChronoDuration::from_std(retention).unwrap_or_else(|_| ChronoDuration::seconds(0));

    let stale = Upload::find()
        .filter(
            upload::Column::Status
                .eq(UploadStatus::Pending)
                .or(upload::Column::Status.eq(UploadStatus::Uploading)),
        )
        .filter(upload::Column::UpdatedAt.lt(cutoff))
        .all(db)
        .await?;

    tracing::info!("Found {} stale uploads", stale.len());

    for upload in stale {
        storage.delete_prefix(&upload.chunk_prefix()).await?;

        Upload::update(upload::ActiveModel {
            id: Set(upload.id.clone()),
            status: Set(UploadStatus::Failed),
            failure_reason: Set(Some("Expired".to_string())),
            updated_at: Set(Utc::now()),
            ..Default::default()
        })
        .exec(db)
        .await?;

        tracing::debug!(upload_id = %upload.id, "Reaped stale upload");
    }

    Ok(())
}
