use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use sqlx::mysql::MySqlConnectOptions;

/// Service configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub database: DatabaseConfig,
    pub run_migrations: bool,
    pub model_path: PathBuf,
    pub manifest_path: PathBuf,
    pub bcrypt_cost: u32,
    /// Empty means any origin is allowed.
    pub cors_allowed_origins: Vec<String>,
    pub json_limit_bytes: usize,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

// Keeps the password out of startup logs.
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<MySqlConnectOptions> {
        if let Some(url) = &self.url {
            return MySqlConnectOptions::from_str(url).context("DATABASE_URL is not a valid MySQL URL");
        }

        Ok(MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database))
    }

    /// `host:port/database` for logs.
    pub fn describe(&self) -> String {
        match &self.url {
            Some(_) => "DATABASE_URL".to_string(),
            None => format!("{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

impl Config {
    /// Either `DATABASE_URL` or both `DB_USER` and `DB_DATABASE` must be set.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let url = get("DATABASE_URL");
        let (user, database) = if url.is_some() {
            (get("DB_USER").unwrap_or_default(), get("DB_DATABASE").unwrap_or_default())
        } else {
            (
                get("DB_USER").ok_or_else(|| anyhow!("DB_USER must be set when DATABASE_URL is not"))?,
                get("DB_DATABASE")
                    .ok_or_else(|| anyhow!("DB_DATABASE must be set when DATABASE_URL is not"))?,
            )
        };

        let database = DatabaseConfig {
            url,
            host: get("DB_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(get("DB_PORT"), "DB_PORT", 3306)?,
            user,
            password: lookup("DB_PASSWORD").unwrap_or_default(),
            database,
            max_connections: parse_or(get("DB_MAX_CONNECTIONS"), "DB_MAX_CONNECTIONS", 5)?,
            acquire_timeout: Duration::from_secs(parse_or(
                get("DB_ACQUIRE_TIMEOUT_SECS"),
                "DB_ACQUIRE_TIMEOUT_SECS",
                5,
            )?),
        };
        if database.max_connections == 0 {
            return Err(anyhow!("DB_MAX_CONNECTIONS must be at least 1"));
        }

        let bcrypt_cost = parse_or(get("BCRYPT_COST"), "BCRYPT_COST", crate::password::DEFAULT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(anyhow!("BCRYPT_COST must be between 4 and 31, got {}", bcrypt_cost));
        }

        let workers = parse_or(get("WORKERS"), "WORKERS", num_cpus::get())?.max(1);

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(get("PORT"), "PORT", 5000)?,
            workers,
            database,
            run_migrations: parse_or(get("RUN_MIGRATIONS"), "RUN_MIGRATIONS", true)?,
            model_path: get("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("models/model.onnx")),
            manifest_path: get("MODEL_MANIFEST_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("models/manifest.json")),
            bcrypt_cost,
            cors_allowed_origins: get("CORS_ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            json_limit_bytes: parse_or(get("JSON_LIMIT_BYTES"), "JSON_LIMIT_BYTES", 64 * 1024)?,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{} has invalid value '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}
