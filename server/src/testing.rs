//! Test fixtures.

use tempfile::TempDir;

use crate::config::{Config, DatabaseConfig, GarbageCollectionConfig, JobConfig, StorageConfig};
use crate::database::migration::{Migrator, MigratorTrait};
use crate::storage::LocalStorageConfig;
use crate::{State, StateInner};

/// Builds a state backed by a file-based SQLite database and a
/// temporary storage directory, with migrations applied.
///
/// The returned guard deletes everything on drop.
pub(crate) async fn test_state() -> (State, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create test directory");

    let db_path = dir.path().join("depot.db");
    let config = Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        allowed_hosts: Vec::new(),
        api_endpoint: None,
        max_request_body_size: 256 * 1024 * 1024,
        database: DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", db_path.display()),
            heartbeat: false,
        },
        storage: StorageConfig::Local(LocalStorageConfig {
            path: dir.path().join("storage"),
        }),
        jobs: JobConfig::default(),
        garbage_collection: GarbageCollectionConfig::default(),
    };

    let state = StateInner::new(config).await;

    let db = state.database().await.expect("Failed to open test database");
    Migrator::up(db, None)
        .await
        .expect("Failed to run migrations");

    (state, dir)
}
