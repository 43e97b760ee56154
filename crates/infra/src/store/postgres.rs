//! Postgres-backed credential and session store.
//!
//! Schema: `crates/infra/sql/schema.sql`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | StoreError |
//! |------------|-----------------|------------|
//! | Database (unique violation) | `23505` | `Conflict(field)` resolved from the constraint name |
//! | Database (foreign key violation) | `23503` | `NotFound` (session for a missing user) |
//! | Database (check constraint violation) | `23514` | `Invalid` |
//! | Anything else | - | `Backend` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use nearme_auth::{NewSession, NewUser, Role, Session, SessionStats, User, normalize_email};
use nearme_core::{SessionId, UserId};

use super::r#trait::{SessionStore, StoreError, UniqueField, UserStats, UserStore};

const USER_COLUMNS: &str = "id, email, username, password_hash, full_name, role, is_active, \
                            external_id, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, user_id, token, expires_at, created_at, client_ip, user_agent";

const SCHEMA: &str = include_str!("../../sql/schema.sql");

/// Postgres store for users and sessions.
///
/// Each trait method is one statement, so atomicity comes from Postgres itself.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect with a small default pool.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply `sql/schema.sql`; every statement is `IF NOT EXISTS`.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn fetch_user(
        &self,
        operation: &str,
        column: &str,
        value: &str,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        row.as_ref().map(user_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl UserStore for PostgresStore {
    #[instrument(skip(self, new), fields(username = %new.username), err)]
    async fn insert(&self, new: NewUser, now: DateTime<Utc>) -> Result<User, StoreError> {
        let user = User::create(new, now)?;
        sqlx::query(
            r#"
            INSERT INTO users
                (id, email, username, password_hash, full_name, role, is_active,
                 external_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(&user.external_id)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;
        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip_all, err)]
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user("find_by_email", "email", &normalize_email(email))
            .await
    }

    #[instrument(skip(self), err)]
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user("find_by_username", "username", username).await
    }

    #[instrument(skip_all, err)]
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user("find_by_external_id", "external_id", external_id)
            .await
    }

    #[instrument(skip(self), err)]
    async fn username_taken(&self, username: &str) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE username = $1)")
            .bind(username)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("username_taken", e))
    }

    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn update(&self, user: &User) -> Result<User, StoreError> {
        user.ensure_has_credential()?;
        let sql = format!(
            r#"
            UPDATE users SET
                email = $2, username = $3, password_hash = $4, full_name = $5,
                role = $6, is_active = $7, external_id = $8, updated_at = $9
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(user.id.as_uuid())
            .bind(&user.email)
            .bind(&user.username)
            .bind(&user.password_hash)
            .bind(&user.full_name)
            .bind(user.role.as_str())
            .bind(user.is_active)
            .bind(&user.external_id)
            .bind(user.updated_at)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_user", e))?;
        row.as_ref().map(user_from_row).transpose()?.ok_or(StoreError::NotFound)
    }

    #[instrument(skip(self), err)]
    async fn list(&self, offset: u64, limit: u64) -> Result<Vec<User>, StoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC, id ASC OFFSET $1 LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(to_i64(offset))
            .bind(to_i64(limit))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_users", e))?;
        rows.iter().map(user_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<UserStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*)                                          AS total,
                COUNT(*) FILTER (WHERE is_active)                 AS active,
                COUNT(*) FILTER (WHERE NOT is_active)             AS inactive,
                COUNT(*) FILTER (WHERE role = 'admin')            AS admins,
                COUNT(*) FILTER (WHERE role = 'user')             AS regular,
                COUNT(*) FILTER (WHERE external_id IS NOT NULL)   AS oauth,
                COUNT(*) FILTER (WHERE password_hash IS NOT NULL) AS password
            FROM users
            "#,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_stats", e))?;

        let count = |name: &str| -> Result<u64, StoreError> {
            row.try_get::<i64, _>(name)
                .map(|n| n.max(0) as u64)
                .map_err(|e| map_sqlx_error("user_stats", e))
        };
        Ok(UserStats {
            total_users: count("total")?,
            active_users: count("active")?,
            inactive_users: count("inactive")?,
            admin_users: count("admins")?,
            regular_users: count("regular")?,
            oauth_users: count("oauth")?,
            password_users: count("password")?,
        })
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn delete(&self, id: UserId) -> Result<bool, StoreError> {
        // Sessions go with the user via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl SessionStore for PostgresStore {
    #[instrument(skip(self, new), fields(user_id = %new.user_id), err)]
    async fn create(&self, new: NewSession, now: DateTime<Utc>) -> Result<Session, StoreError> {
        let session = Session::create(new, now);
        sqlx::query(
            r#"
            INSERT INTO user_sessions
                (id, user_id, token, expires_at, created_at, client_ip, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.user_id.as_uuid())
        .bind(&session.token)
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(&session.client_ip)
        .bind(&session.user_agent)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_session", e))?;
        Ok(session)
    }

    #[instrument(skip(self, token), err)]
    async fn find_active(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let sql =
            format!("SELECT {SESSION_COLUMNS} FROM user_sessions WHERE token = $1 AND expires_at > $2");
        let row = sqlx::query(&sql)
            .bind(token)
            .bind(now)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_active_session", e))?;
        row.as_ref().map(session_from_row).transpose()
    }

    #[instrument(skip(self, token), err)]
    async fn revoke(&self, token: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE token = $1")
            .bind(token)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("revoke_session", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn revoke_all(&self, user_id: UserId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("revoke_all_sessions", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn sweep_expired(
        &self,
        user_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM user_sessions WHERE expires_at <= $1 AND ($2::uuid IS NULL OR user_id = $2)",
        )
        .bind(now)
        .bind(user_id.map(|id| *id.as_uuid()))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("sweep_expired_sessions", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, token), err)]
    async fn extend(
        &self,
        token: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let sql = format!(
            "UPDATE user_sessions SET expires_at = $2 WHERE token = $1 RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(token)
            .bind(new_expiry)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("extend_session", e))?;
        row.as_ref().map(session_from_row).transpose()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Session>, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM user_sessions WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_user_sessions", e))?;
        rows.iter().map(session_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn stats(
        &self,
        user_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<SessionStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*)                                AS total,
                COUNT(*) FILTER (WHERE expires_at > $1) AS active
            FROM user_sessions
            WHERE ($2::uuid IS NULL OR user_id = $2)
            "#,
        )
        .bind(now)
        .bind(user_id.map(|id| *id.as_uuid()))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("session_stats", e))?;

        let total: i64 = row.try_get("total").map_err(|e| map_sqlx_error("session_stats", e))?;
        let active: i64 = row.try_get("active").map_err(|e| map_sqlx_error("session_stats", e))?;
        let total = total.max(0) as u64;
        let active = active.max(0) as u64;
        Ok(SessionStats {
            total_sessions: total,
            active_sessions: active,
            expired_sessions: total.saturating_sub(active),
        })
    }

    #[instrument(skip(self), err)]
    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE created_at < $1")
            .bind(cutoff)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_sessions", e))?;
        Ok(result.rows_affected())
    }
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let decode = |e| map_sqlx_error("decode_user", e);
    let role: String = row.try_get("role").map_err(decode)?;
    Ok(User {
        id: UserId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        email: row.try_get("email").map_err(decode)?,
        username: row.try_get("username").map_err(decode)?,
        password_hash: row.try_get("password_hash").map_err(decode)?,
        full_name: row.try_get("full_name").map_err(decode)?,
        role: role.parse::<Role>()?,
        is_active: row.try_get("is_active").map_err(decode)?,
        external_id: row.try_get("external_id").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session, StoreError> {
    let decode = |e| map_sqlx_error("decode_session", e);
    Ok(Session {
        id: SessionId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id").map_err(decode)?),
        token: row.try_get("token").map_err(decode)?,
        expires_at: row.try_get("expires_at").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        client_ip: row.try_get("client_ip").map_err(decode)?,
        user_agent: row.try_get("user_agent").map_err(decode)?,
    })
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Unique constraint name → the column it protects.
fn unique_field(constraint: Option<&str>) -> Option<UniqueField> {
    match constraint? {
        "users_email_key" => Some(UniqueField::Email),
        "users_username_key" => Some(UniqueField::Username),
        "users_external_id_key" => Some(UniqueField::ExternalId),
        "user_sessions_token_key" => Some(UniqueField::SessionToken),
        _ => None,
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => match unique_field(db_err.constraint()) {
                    Some(field) => StoreError::Conflict(field),
                    None => StoreError::Backend(msg),
                },
                Some("23503") => StoreError::NotFound,
                Some("23514") => StoreError::Invalid(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_schema_is_rerunnable() {
        let statements: Vec<String> = SCHEMA
            .split(';')
            .map(|stmt| {
                stmt.lines()
                    .filter(|line| !line.trim_start().starts_with("--"))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .map(|stmt| stmt.trim().to_string())
            .filter(|stmt| !stmt.is_empty())
            .collect();

        assert!(statements.len() >= 5);
        for stmt in &statements {
            assert!(stmt.contains("IF NOT EXISTS"), "not idempotent: {stmt}");
        }
    }

    #[test]
    fn constraint_names_map_to_fields() {
        assert_eq!(unique_field(Some("users_email_key")), Some(UniqueField::Email));
        assert_eq!(unique_field(Some("users_username_key")), Some(UniqueField::Username));
        assert_eq!(
            unique_field(Some("users_external_id_key")),
            Some(UniqueField::ExternalId)
        );
        assert_eq!(
            unique_field(Some("user_sessions_token_key")),
            Some(UniqueField::SessionToken)
        );
        assert_eq!(unique_field(Some("something_else")), None);
        assert_eq!(unique_field(None), None);
    }

    #[test]
    fn non_database_errors_are_backend_faults() {
        assert!(matches!(
            map_sqlx_error("op", sqlx::Error::PoolClosed),
            StoreError::Backend(_)
        ));
        assert!(matches!(
            map_sqlx_error("op", sqlx::Error::RowNotFound),
            StoreError::Backend(_)
        ));
    }
}
