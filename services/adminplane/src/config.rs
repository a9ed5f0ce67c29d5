//! Admin-plane configuration.
//!
//! # Purpose
//! Loads settings from `ADMINPLANE_*` environment variables, then applies
//! optional YAML overrides from the file named by `ADMINPLANE_CONFIG`.
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;

pub const DEFAULT_BIND: &str = "0.0.0.0:8088";
pub const DEFAULT_METRICS_BIND: &str = "0.0.0.0:9088";
pub const DEFAULT_ADMIN_PREFIX: &str = "/admin/";
pub const DEFAULT_SUPER_ROLE: &str = "super_admin";
pub const DEFAULT_TENANT_ID: i64 = 1;
pub const DEFAULT_MENU_UPSERT_CONCURRENCY: usize = 8;
pub const DEFAULT_JWT_ISSUER: &str = "homework-admin";
pub const DEFAULT_PG_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_PG_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_PG_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl StorageBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => bail!("unknown storage backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_pg_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_pg_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_pg_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_pg_max_connections() -> u32 {
    DEFAULT_PG_MAX_CONNECTIONS
}

fn default_pg_connect_timeout_ms() -> u64 {
    DEFAULT_PG_CONNECT_TIMEOUT_MS
}

fn default_pg_acquire_timeout_ms() -> u64 {
    DEFAULT_PG_ACQUIRE_TIMEOUT_MS
}

/// Bearer-token verification settings for admin routes.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
}

/// Knobs for the startup reconciliation pass and policy re-sync.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Only routes under this prefix become permission records.
    pub admin_prefix: String,
    /// Name of the reserved role granted every menu and permission.
    pub super_role: String,
    /// Tenant assigned to roles created without one.
    pub default_tenant_id: i64,
    /// Upper bound on concurrent menu upserts.
    pub menu_upsert_concurrency: usize,
    /// Period of the background policy re-sync; `None` disables it.
    pub policy_resync_interval_secs: Option<u64>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            admin_prefix: DEFAULT_ADMIN_PREFIX.to_string(),
            super_role: DEFAULT_SUPER_ROLE.to_string(),
            default_tenant_id: DEFAULT_TENANT_ID,
            menu_upsert_concurrency: DEFAULT_MENU_UPSERT_CONCURRENCY,
            policy_resync_interval_secs: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdminPlaneConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub jwt: JwtConfig,
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Default, Deserialize)]
struct AdminPlaneConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    storage: Option<String>,
    postgres: Option<PostgresConfig>,
    jwt_secret: Option<String>,
    jwt_issuer: Option<String>,
    admin_prefix: Option<String>,
    super_role: Option<String>,
    default_tenant_id: Option<i64>,
    menu_upsert_concurrency: Option<usize>,
    policy_resync_interval_secs: Option<u64>,
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => Ok(Some(
            value.parse::<T>().with_context(|| format!("parse {key}"))?,
        )),
        Err(_) => Ok(None),
    }
}

impl AdminPlaneConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = std::env::var("ADMINPLANE_BIND")
            .unwrap_or_else(|_| DEFAULT_BIND.to_string())
            .parse()
            .with_context(|| "parse ADMINPLANE_BIND")?;
        let metrics_bind = std::env::var("ADMINPLANE_METRICS_BIND")
            .unwrap_or_else(|_| DEFAULT_METRICS_BIND.to_string())
            .parse()
            .with_context(|| "parse ADMINPLANE_METRICS_BIND")?;
        let storage = match std::env::var("ADMINPLANE_STORAGE") {
            Ok(value) => StorageBackend::parse(&value)?,
            Err(_) => StorageBackend::Memory,
        };
        let postgres = match std::env::var("ADMINPLANE_POSTGRES_URL") {
            Ok(url) => Some(PostgresConfig {
                url,
                max_connections: env_parse("ADMINPLANE_POSTGRES_MAX_CONNECTIONS")?
                    .unwrap_or(DEFAULT_PG_MAX_CONNECTIONS),
                connect_timeout_ms: env_parse("ADMINPLANE_POSTGRES_CONNECT_TIMEOUT_MS")?
                    .unwrap_or(DEFAULT_PG_CONNECT_TIMEOUT_MS),
                acquire_timeout_ms: env_parse("ADMINPLANE_POSTGRES_ACQUIRE_TIMEOUT_MS")?
                    .unwrap_or(DEFAULT_PG_ACQUIRE_TIMEOUT_MS),
            }),
            Err(_) => None,
        };
        let jwt = JwtConfig {
            secret: std::env::var("ADMINPLANE_JWT_SECRET").unwrap_or_default(),
            issuer: std::env::var("ADMINPLANE_JWT_ISSUER")
                .unwrap_or_else(|_| DEFAULT_JWT_ISSUER.to_string()),
        };
        let defaults = ReconcileConfig::default();
        let reconcile = ReconcileConfig {
            admin_prefix: std::env::var("ADMINPLANE_ADMIN_PREFIX")
                .unwrap_or(defaults.admin_prefix),
            super_role: std::env::var("ADMINPLANE_SUPER_ROLE").unwrap_or(defaults.super_role),
            default_tenant_id: env_parse("ADMINPLANE_DEFAULT_TENANT")?
                .unwrap_or(defaults.default_tenant_id),
            menu_upsert_concurrency: env_parse("ADMINPLANE_MENU_UPSERT_CONCURRENCY")?
                .unwrap_or(defaults.menu_upsert_concurrency),
            policy_resync_interval_secs: env_parse("ADMINPLANE_POLICY_RESYNC_SECS")?,
        };
        Ok(Self {
            bind_addr,
            metrics_bind,
            storage,
            postgres,
            jwt,
            reconcile,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("ADMINPLANE_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read ADMINPLANE_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: AdminPlaneConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse admin plane config yaml")?;
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = StorageBackend::parse(&value)?;
        }
        if let Some(value) = override_cfg.postgres {
            self.postgres = Some(value);
        }
        if let Some(value) = override_cfg.jwt_secret {
            self.jwt.secret = value;
        }
        if let Some(value) = override_cfg.jwt_issuer {
            self.jwt.issuer = value;
        }
        if let Some(value) = override_cfg.admin_prefix {
            self.reconcile.admin_prefix = value;
        }
        if let Some(value) = override_cfg.super_role {
            self.reconcile.super_role = value;
        }
        if let Some(value) = override_cfg.default_tenant_id {
            self.reconcile.default_tenant_id = value;
        }
        if let Some(value) = override_cfg.menu_upsert_concurrency {
            self.reconcile.menu_upsert_concurrency = value;
        }
        if let Some(value) = override_cfg.policy_resync_interval_secs {
            self.reconcile.policy_resync_interval_secs = Some(value);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.jwt.secret.is_empty() {
            bail!("ADMINPLANE_JWT_SECRET must be set");
        }
        if !self.reconcile.admin_prefix.starts_with('/') {
            bail!("admin prefix must start with '/'");
        }
        if self.reconcile.menu_upsert_concurrency == 0 {
            bail!("menu upsert concurrency must be positive");
        }
        Ok(())
    }
}
