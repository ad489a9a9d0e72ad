#![deny(
    asm_sub_register,
    deprecated,
    missing_abi,
    unsafe_code,
    unused_macros,
    unused_must_use,
    unused_unsafe
)]
#![deny(clippy::from_over_into, clippy::needless_question_mark)]
#![cfg_attr(
    not(debug_assertions),
    deny(unused_imports, unused_mut, unused_variables,)
)]

mod api;
pub mod config;
pub mod database;
mod error;
pub mod gc;
pub mod imports;
pub mod jobs;
mod storage;
#[cfg(test)]
mod testing;
pub mod uploads;
pub mod variants;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use axum::{
    extract::{DefaultBodyLimit, Extension, Host},
    http::{Request, Uri},
    middleware::Next,
    response::Response,
    Router,
};
use sea_orm::{query::Statement, ConnectionTrait, Database, DatabaseConnection};
use tokio::sync::OnceCell;
use tokio::time;
use tower_http::catch_panic::CatchPanicLayer;

use config::{Config, StorageConfig};
use database::migration::{Migrator, MigratorTrait};
use error::{ServerError, ServerResult};
use jobs::{Job, JobSender};
use storage::{LocalBackend, StorageBackend};

pub type State = Arc<StateInner>;

/// Global server state.
#[derive(Debug)]
pub struct StateInner {
    /// The Depot Server configuration.
    config: Config,

    /// Handle to the database.
    database: OnceCell<DatabaseConnection>,

    /// Handle to the storage backend.
    storage: OnceCell<Arc<Box<dyn StorageBackend>>>,

    /// Handle to the background job queue.
    jobs: OnceCell<JobSender>,
}

impl StateInner {
    pub async fn new(config: Config) -> State {
        Arc::new(Self {
            config,
            database: OnceCell::new(),
            storage: OnceCell::new(),
            jobs: OnceCell::new(),
        })
    }

    /// Returns a handle to the database.
    pub async fn database(&self) -> ServerResult<&DatabaseConnection> {
        self.database
            .get_or_try_init(|| async {
                Database::connect(&self.config.database.url)
                    .await
                    .map_err(ServerError::database_error)
            })
            .await
    }

    /// Returns a handle to the storage backend.
    pub async fn storage(&self) -> ServerResult<&Arc<Box<dyn StorageBackend>>> {
        self.storage
            .get_or_try_init(|| async {
                match &self.config.storage {
                    StorageConfig::Local(local_config) => {
                        let local = LocalBackend::new(local_config.clone()).await?;
                        let boxed: Box<dyn StorageBackend> = Box::new(local);
                        Ok(Arc::new(boxed))
                    }
                }
            })
            .await
    }

    /// Attaches the job queue once the worker pool is running.
    pub fn set_job_sender(&self, sender: JobSender) {
        let _ = self.jobs.set(sender);
    }

    /// Hands a job to the worker pool.
    ///
    /// At-least-once from here on; if the pool is not running the
    /// job is dropped with a warning.
    pub fn enqueue_job(&self, job: Job) {
        match self.jobs.get() {
            Some(sender) => {
                if let Err(e) = sender.enqueue(job) {
                    tracing::warn!("Failed to enqueue background job: {}", e);
                }
            }
            None => {
                tracing::warn!(?job, "Job queue not running; dropping job");
            }
        }
    }

    /// Sends periodic heartbeat queries to the database.
    async fn run_db_heartbeat(&self) -> ServerResult<()> {
        let db = self.database().await?;
        let stmt =
            Statement::from_string(db.get_database_backend(), "SELECT 'heartbeat';".to_string());

        loop {
            let _ = db.execute(stmt.clone()).await;
            time::sleep(Duration::from_secs(60)).await;
        }
    }
}

/// The fallback route.
#[axum_macros::debug_handler]
async fn fallback(_: Uri) -> ServerResult<()> {
    Err(ServerError::NotFound)
}

/// Rejects requests whose Host header is not on the configured
/// allow-list. Host names compare case-insensitively; an empty list
/// admits every host.
async fn restrict_host<B>(
    Extension(state): Extension<State>,
    Host(host): Host,
    req: Request<B>,
    next: Next<B>,
) -> ServerResult<Response> {
    let allowed_hosts = &state.config.allowed_hosts;

    if !allowed_hosts.is_empty() && !allowed_hosts.iter().any(|h| h.eq_ignore_ascii_case(&host)) {
        return Err(ServerError::RequestError(anyhow!(
            "Host {host} is not allowed"
        )));
    }

    Ok(next.run(req).await)
}

/// Runs the API server.
pub async fn run_api_server(cli_listen: Option<SocketAddr>, config: Config) -> Result<()> {
    eprintln!("Starting API server...");

    let state = StateInner::new(config).await;

    let (job_sender, _job_workers) = jobs::spawn(state.clone(), state.config.jobs.workers);
    state.set_job_sender(job_sender);

    let listen = if let Some(cli_listen) = cli_listen {
        cli_listen
    } else {
        state.config.listen.to_owned()
    };

    let rest = Router::new()
        .merge(api::get_router())
        .fallback(fallback)
        // middlewares
        .layer(axum::middleware::from_fn(restrict_host))
        .layer(Extension(state.clone()))
        .layer(DefaultBodyLimit::max(state.config.max_request_body_size))
        .layer(CatchPanicLayer::new());

    eprintln!("Listening on {:?}...", listen);

    let (server_ret, _) = tokio::join!(
        axum::Server::bind(&listen).serve(rest.into_make_service()),
        async {
            if state.config.database.heartbeat {
                let _ = state.run_db_heartbeat().await;
            }
        },
    );

    server_ret?;

    Ok(())
}

/// Runs database migrations.
pub async fn run_migrations(config: Config) -> Result<()> {
    eprintln!("Running migrations...");

    let state = StateInner::new(config).await;
    let db = state.database().await?;
    Migrator::up(db, None).await?;

    Ok(())
}
