use crate::{Cache, CacheError, CacheLookup};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::future::Future;
use std::time::Duration;

/// Cache backed by a single table of a SQLite database.
///
/// The pool is shared with the rest of the application; the cache adds no locking of its own and
/// relies on the database for concurrent writers. Table layout:
///
/// | column       | type    |                      |
/// |--------------|---------|----------------------|
/// | `key`        | TEXT    | primary key          |
/// | `data`       | BLOB    | PEM material         |
/// | `created_at` | INTEGER | unix seconds, default 0 |
/// | `updated_at` | INTEGER | unix seconds, default 0 |
#[derive(Clone, Debug)]
pub struct SqlCache {
    pool: SqlitePool,
    table: String,
    timeout: Option<Duration>,
}

impl SqlCache {
    /// Validates `table` and creates the table and its index if they do not exist yet.
    ///
    /// An empty table name is rejected before the database is touched.
    pub async fn new(pool: SqlitePool, table: impl Into<String>) -> Result<Self, CacheError> {
        let table = table.into();
        validate_table_name(&table)?;
        let cache = Self { pool, table, timeout: None };
        cache.create_table().await?;
        Ok(cache)
    }

    /// Bounds every subsequent operation. Operations running longer fail with
    /// [CacheError::Timeout].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn create_table(&self) -> Result<(), CacheError> {
        let create = format!(
            r#"CREATE TABLE IF NOT EXISTS "{table}" (
                "key" TEXT NOT NULL PRIMARY KEY,
                "data" BLOB NOT NULL,
                "created_at" INTEGER NOT NULL DEFAULT 0,
                "updated_at" INTEGER NOT NULL DEFAULT 0
            )"#,
            table = self.table
        );
        let index = format!(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS "{table}_key_idx" ON "{table}" ("key")"#,
            table = self.table
        );
        self.run(sqlx::query(&create).execute(&self.pool)).await?;
        self.run(sqlx::query(&index).execute(&self.pool)).await?;
        log::debug!("cache table {} ready", self.table);
        Ok(())
    }

    async fn run<T, F>(&self, operation: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match self.timeout {
            Some(timeout) => match async_std::future::timeout(timeout, operation).await {
                Ok(result) => Ok(result?),
                Err(_) => Err(CacheError::Timeout),
            },
            None => Ok(operation.await?),
        }
    }
}

fn validate_table_name(table: &str) -> Result<(), CacheError> {
    if table.is_empty() {
        return Err(CacheError::EmptyTableName);
    }
    // interpolated into statements, so only plain identifiers
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CacheError::InvalidTableName(table.to_string()));
    }
    Ok(())
}

#[async_trait]
impl Cache for SqlCache {
    async fn get(&self, key: &str) -> Result<CacheLookup, CacheError> {
        let select = format!(r#"SELECT "data" FROM "{}" WHERE "key" = ?"#, self.table);
        let data: Option<Vec<u8>> = self
            .run(sqlx::query_scalar(&select).bind(key).fetch_optional(&self.pool))
            .await?;
        Ok(match data {
            Some(data) => CacheLookup::Hit(data),
            None => CacheLookup::Miss,
        })
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        let upsert = format!(
            r#"INSERT INTO "{}" ("key", "data", "created_at", "updated_at") VALUES (?, ?, ?, ?)
               ON CONFLICT ("key") DO UPDATE SET "data" = excluded."data", "updated_at" = excluded."updated_at""#,
            self.table
        );
        let now = Utc::now().timestamp();
        self.run(
            sqlx::query(&upsert)
                .bind(key)
                .bind(data)
                .bind(now)
                .bind(now)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let delete = format!(r#"DELETE FROM "{}" WHERE "key" = ?"#, self.table);
        self.run(sqlx::query(&delete).bind(key).execute(&self.pool)).await?;
        Ok(())
    }
}
