//! Execution context shared by the HTTP surface, the CLI and the workers.

pub mod access_keys;
pub mod captures;

use sqlx::PgPool;

use crate::config::Config;

/// Everything a component needs to do its job: configuration, the database
/// pool and an HTTP client. Passed explicitly — no ambient globals.
#[derive(Clone)]
pub struct ServerKernel {
    pub db: PgPool,
    pub config: Config,
    pub http: reqwest::Client,
}

impl ServerKernel {
    pub fn new(db: PgPool, config: Config) -> Self {
        Self {
            db,
            config,
            http: reqwest::Client::new(),
        }
    }
}
