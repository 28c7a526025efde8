//! Service construction.
//!
//! [`App::from_config`] opens the database, runs migrations and builds the
//! hosting and generation clients once at process start; everything else
//! receives them by injection through [`Pipeline`]. Call
//! [`App::shutdown`] before exiting so the SQLite pool is closed cleanly.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::db;
use crate::generation::{create_generator, TextGenerator};
use crate::github::{GitHubClient, HostingApi};
use crate::migrate::run_migrations;
use crate::pipeline::Pipeline;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

pub struct App {
    pub config: Arc<Config>,
    pub pipeline: Pipeline,
    store: Arc<SqliteStore>,
}

impl App {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        run_migrations(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool));

        let hosting: Arc<dyn HostingApi> =
            Arc::new(GitHubClient::new(&config.github).context("building GitHub client")?);
        let generator: Arc<dyn TextGenerator> = Arc::from(
            create_generator(&config.generation).context("building text generator")?,
        );
        if !config.generation.is_enabled() {
            tracing::info!("text generation disabled, descriptions use placeholder text");
        }

        let shared: Arc<dyn Store> = store.clone();
        let pipeline = Pipeline::new(config, shared, hosting, generator);

        Ok(Self {
            config: Arc::new(config.clone()),
            pipeline,
            store,
        })
    }

    pub async fn shutdown(self) {
        self.store.close().await;
        tracing::debug!("database closed");
    }
}
