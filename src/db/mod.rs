//! Postgres store: connection pool, migrations, and health check.
//!
//! [`Db`] implements both halves of the store contract, so a single handle
//! serves as the processor's [`Store`].

pub mod invocation;
pub mod task;

use crate::error::Result;
use crate::store::{InvocationStore, Store, TaskStore};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Run `SELECT 1` against the pool.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Store for Db {
    fn tasks(&self) -> &dyn TaskStore {
        self
    }

    fn invocations(&self) -> &dyn InvocationStore {
        self
    }
}
