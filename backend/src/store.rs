//! Persistence for user accounts.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::FromRow;

/// Row of the `users` table. The hash never leaves the server.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub user_id: String,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user already exists")]
    Duplicate,

    #[error("store unavailable: {0}")]
    Unavailable(sqlx::Error),

    #[error("store query failed: {0}")]
    Query(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return Self::Duplicate;
            }
        }
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::Unavailable(err),
            _ => Self::Query(err),
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_user_id(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    /// Inserts a new account; `StoreError::Duplicate` if the id is taken.
    async fn insert(&self, user: NewUser) -> Result<(), StoreError>;
}

/// Creates a connection pool to the MySQL database.
///
/// # Errors
///
/// Returns an error if the first connection cannot be established.
pub async fn create_pool(
    options: MySqlConnectOptions,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<MySqlPool, sqlx::Error> {
    MySqlPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect_with(options)
        .await
}

/// Runs all pending migrations.
///
/// # Errors
///
/// Returns an error if running migrations fails.
pub async fn run_migrations(pool: &MySqlPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// `UserStore` over a MySQL pool. Every call checks out its own
/// connection, returned to the pool when it drops.
#[derive(Clone)]
pub struct MySqlUserStore {
    pool: MySqlPool,
}

impl MySqlUserStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for MySqlUserStore {
    async fn find_by_user_id(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, username, password_hash
            FROM users
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(user)
    }

    async fn insert(&self, user: NewUser) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query(
            r#"
            INSERT INTO users (user_id, username, password_hash)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&user.user_id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    use sqlx::error::{DatabaseError, ErrorKind};

    use super::memory::MemoryUserStore;
    use super::*;

    #[derive(Debug)]
    struct MySqlFailure {
        unique: bool,
    }

    impl fmt::Display for MySqlFailure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("Duplicate entry 'u1' for key 'users.PRIMARY'")
        }
    }

    impl StdError for MySqlFailure {}

    impl DatabaseError for MySqlFailure {
        fn message(&self) -> &str {
            "Duplicate entry 'u1' for key 'users.PRIMARY'"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed("23000"))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            if self.unique {
                ErrorKind::UniqueViolation
            } else {
                ErrorKind::Other
            }
        }
    }

    fn new_user(id: &str) -> NewUser {
        NewUser {
            user_id: id.into(),
            username: "alice".into(),
            password_hash: "$2b$04$hash".into(),
        }
    }

    #[actix_web::test]
    async fn second_insert_with_same_id_is_duplicate() {
        let store = MemoryUserStore::default();
        store.insert(new_user("u1")).await.unwrap();
        assert!(matches!(
            store.insert(new_user("u1")).await,
            Err(StoreError::Duplicate)
        ));
        assert!(store.insert(new_user("u2")).await.is_ok());
    }

    #[actix_web::test]
    async fn lookup_by_id() {
        let store = MemoryUserStore::default();
        store.insert(new_user("u1")).await.unwrap();
        let user = store.find_by_user_id("u1").await.unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert!(store.find_by_user_id("nobody").await.unwrap().is_none());
    }

    #[test]
    fn pool_errors_are_unavailable() {
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::Query(_)
        ));
    }

    #[test]
    fn unique_violation_is_duplicate() {
        let err = sqlx::Error::Database(Box::new(MySqlFailure { unique: true }));
        assert!(matches!(StoreError::from(err), StoreError::Duplicate));

        let err = sqlx::Error::Database(Box::new(MySqlFailure { unique: false }));
        assert!(matches!(StoreError::from(err), StoreError::Query(_)));
    }

    #[actix_web::test]
    async fn insert_enforces_uniqueness_even_when_lookup_misses() {
        let store = MemoryUserStore::with_stale_reads();
        store.insert(new_user("u1")).await.unwrap();
        assert!(store.find_by_user_id("u1").await.unwrap().is_none());
        assert!(matches!(
            store.insert(new_user("u1")).await,
            Err(StoreError::Duplicate)
        ));
    }

    #[test]
    fn user_ids_compare_byte_for_byte() {
        let migration = include_str!("../migrations/20250601000000_create_users.sql");
        let user_id = migration
            .lines()
            .find(|line| line.trim_start().starts_with("user_id"))
            .unwrap();
        assert!(user_id.contains("COLLATE utf8mb4_bin"));
    }
}
