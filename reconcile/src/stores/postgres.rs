//! PostgreSQL user store.
//!
//! Uniqueness lives in the schema: a unique index on `lower(email)` and a
//! primary key on `(provider, provider_id)`. Administrator inserts take a
//! transaction-scoped advisory lock and only succeed into an empty table, so
//! concurrent bootstraps across processes cannot both win.
//!
//! # Example
//!
//! ```no_run
//! use identity_reconcile::stores::postgres::PostgresUserStore;
//! use sqlx::PgPool;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PgPool::connect("postgresql://localhost/identity").await?;
//! let store = PostgresUserStore::new(pool);
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::StoreError;
use crate::providers::UserStore;
use crate::state::{ObjectId, Provider, Role, UserPatch, UserRecord};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use std::collections::BTreeMap;

/// Advisory lock key serializing bootstrap administrator inserts.
const BOOTSTRAP_LOCK_KEY: i64 = 0x6964_7265_636f_6e63;

/// PostgreSQL user store.
#[derive(Debug, Clone)]
pub struct PostgresUserStore {
    /// PostgreSQL connection pool.
    pool: PgPool,
}

impl PostgresUserStore {
    /// Create a new PostgreSQL user store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns error if migrations fail.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Migration failed: {e}")))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", &e))
    }

    async fn load(conn: &mut PgConnection, object_id: uuid::Uuid) -> Result<UserRecord, StoreError> {
        let row = sqlx::query(
            r"
            SELECT object_id, email, password_hash, role, created_at, updated_at
            FROM users
            WHERE object_id = $1
            ",
        )
        .bind(object_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| db_error("load user", &e))?
        .ok_or(StoreError::NotFound)?;

        let links = sqlx::query(
            r"
            SELECT provider, provider_id
            FROM user_providers
            WHERE object_id = $1
            ",
        )
        .bind(object_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| db_error("load provider links", &e))?;

        record_from_rows(&row, &links)
    }

    async fn load_pooled(&self, object_id: uuid::Uuid) -> Result<UserRecord, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| db_error("acquire connection", &e))?;
        Self::load(&mut conn, object_id).await
    }

    async fn find_id(&self, query: &str, bind: &str) -> Result<uuid::Uuid, StoreError> {
        sqlx::query_scalar::<_, uuid::Uuid>(query)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find user", &e))?
            .ok_or(StoreError::NotFound)
    }

    /// Lock the matched row and apply `patch` in one transaction.
    async fn update_where(
        &self,
        select_for_update: &str,
        binds: &[&str],
        patch: &UserPatch,
    ) -> Result<UserRecord, StoreError> {
        let mut tx = self.begin().await?;

        let mut query = sqlx::query_scalar::<_, uuid::Uuid>(select_for_update);
        for bind in binds {
            query = query.bind(*bind);
        }
        let object_id = query
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("lock user", &e))?
            .ok_or(StoreError::NotFound)?;

        apply_patch(&mut tx, object_id, patch).await?;
        let record = Self::load(&mut *tx, object_id).await?;

        tx.commit().await.map_err(|e| db_error("commit update", &e))?;
        Ok(record)
    }
}

impl UserStore for PostgresUserStore {
    async fn find_by_provider_id(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<UserRecord, StoreError> {
        let object_id = sqlx::query_scalar::<_, uuid::Uuid>(
            "SELECT object_id FROM user_providers WHERE provider = $1 AND provider_id = $2",
        )
        .bind(provider.as_str())
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("find by provider id", &e))?
        .ok_or(StoreError::NotFound)?;

        self.load_pooled(object_id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<UserRecord, StoreError> {
        let object_id = self
            .find_id("SELECT object_id FROM users WHERE lower(email) = lower($1)", email)
            .await?;
        self.load_pooled(object_id).await
    }

    async fn find_by_object_id(&self, object_id: ObjectId) -> Result<UserRecord, StoreError> {
        self.load_pooled(object_id.0).await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("count users", &e))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn add(&self, record: &UserRecord) -> Result<UserRecord, StoreError> {
        let mut tx = self.begin().await?;

        let bootstrap = record.role == Role::Administrator;
        if bootstrap {
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(BOOTSTRAP_LOCK_KEY)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("acquire bootstrap lock", &e))?;
        }

        let sql = if bootstrap {
            r"
            INSERT INTO users (object_id, email, password_hash, role, created_at, updated_at)
            SELECT $1, $2, $3, $4, $5, $6
            WHERE NOT EXISTS (SELECT 1 FROM users)
            "
        } else {
            r"
            INSERT INTO users (object_id, email, password_hash, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "
        };

        let inserted = sqlx::query(sql)
            .bind(record.object_id.0)
            .bind(&record.email)
            .bind(&record.password_hash)
            .bind(record.role.as_str())
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error("insert user", &e))?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                key: "bootstrap:administrator".to_string(),
            });
        }

        for (provider, provider_id) in &record.provider_ids {
            insert_link(&mut tx, record.object_id.0, *provider, provider_id, record.created_at)
                .await?;
        }

        tx.commit().await.map_err(|e| write_error("commit insert", &e))?;
        tracing::debug!(object_id = %record.object_id, role = %record.role, "inserted user");
        Ok(record.clone())
    }

    async fn update_by_object_id(
        &self,
        object_id: ObjectId,
        patch: &UserPatch,
    ) -> Result<UserRecord, StoreError> {
        let id = object_id.0.to_string();
        self.update_where(
            "SELECT object_id FROM users WHERE object_id = $1::uuid FOR UPDATE",
            &[&id],
            patch,
        )
        .await
    }

    async fn update_by_provider_id(
        &self,
        provider: Provider,
        provider_id: &str,
        patch: &UserPatch,
    ) -> Result<UserRecord, StoreError> {
        self.update_where(
            r"
            SELECT u.object_id FROM users u
            JOIN user_providers p ON p.object_id = u.object_id
            WHERE p.provider = $1 AND p.provider_id = $2
            FOR UPDATE OF u
            ",
            &[provider.as_str(), provider_id],
            patch,
        )
        .await
    }

    async fn update_by_email(
        &self,
        email: &str,
        patch: &UserPatch,
    ) -> Result<UserRecord, StoreError> {
        self.update_where(
            "SELECT object_id FROM users WHERE lower(email) = lower($1) FOR UPDATE",
            &[email],
            patch,
        )
        .await
    }
}

async fn apply_patch(
    tx: &mut Transaction<'static, Postgres>,
    object_id: uuid::Uuid,
    patch: &UserPatch,
) -> Result<(), StoreError> {
    let now = patch.updated_at.unwrap_or_else(Utc::now);

    if let Some(email) = &patch.email {
        sqlx::query("UPDATE users SET email = $2 WHERE object_id = $1")
            .bind(object_id)
            .bind(email)
            .execute(&mut **tx)
            .await
            .map_err(|e| write_error("update email", &e))?;
    }

    for (provider, provider_id) in &patch.provider_ids {
        let holder = sqlx::query_scalar::<_, uuid::Uuid>(
            "SELECT object_id FROM user_providers WHERE provider = $1 AND provider_id = $2",
        )
        .bind(provider.as_str())
        .bind(provider_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| db_error("check provider link", &e))?;

        match holder {
            Some(holder) if holder == object_id => continue,
            Some(_) => {
                return Err(StoreError::Conflict {
                    key: format!("provider:{provider}:{provider_id}"),
                });
            }
            None => {}
        }

        sqlx::query("DELETE FROM user_providers WHERE object_id = $1 AND provider = $2")
            .bind(object_id)
            .bind(provider.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| db_error("replace provider link", &e))?;
        insert_link(tx, object_id, *provider, provider_id, now).await?;
    }

    sqlx::query("UPDATE users SET updated_at = $2 WHERE object_id = $1")
        .bind(object_id)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| db_error("touch user", &e))?;

    Ok(())
}

async fn insert_link(
    tx: &mut Transaction<'static, Postgres>,
    object_id: uuid::Uuid,
    provider: Provider,
    provider_id: &str,
    linked_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO user_providers (provider, provider_id, object_id, linked_at)
        VALUES ($1, $2, $3, $4)
        ",
    )
    .bind(provider.as_str())
    .bind(provider_id)
    .bind(object_id)
    .bind(linked_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| write_error("insert provider link", &e))?;
    Ok(())
}

fn record_from_rows(row: &PgRow, links: &[PgRow]) -> Result<UserRecord, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Unavailable(format!("Failed to decode user: {e}"));

    let role: String = row.try_get("role").map_err(decode)?;
    let role = Role::parse(&role)
        .ok_or_else(|| StoreError::Unavailable(format!("Unknown role in store: {role}")))?;

    let mut provider_ids: BTreeMap<Provider, String> = BTreeMap::new();
    for link in links {
        let name: String = link.try_get("provider").map_err(decode)?;
        let Some(provider) = Provider::parse(&name) else {
            tracing::warn!(provider = %name, "skipping link for unsupported provider");
            continue;
        };
        provider_ids.insert(provider, link.try_get("provider_id").map_err(decode)?);
    }

    Ok(UserRecord {
        object_id: ObjectId(row.try_get("object_id").map_err(decode)?),
        email: row.try_get("email").map_err(decode)?,
        provider_ids,
        password_hash: row.try_get("password_hash").map_err(decode)?,
        role,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn db_error(context: &str, error: &sqlx::Error) -> StoreError {
    tracing::error!(%error, context, "user store query failed");
    StoreError::Unavailable(format!("Failed to {context}: {error}"))
}

/// Map unique violations to `Conflict`; everything else is unavailability.
fn write_error(context: &str, error: &sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = error {
        if db_err.is_unique_violation() {
            let key = db_err.constraint().unwrap_or("unique").to_string();
            tracing::warn!(constraint = %key, context, "uniqueness violation");
            return StoreError::Conflict { key };
        }
    }
    db_error(context, error)
}
