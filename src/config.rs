use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Temp upload directories older than this many hours are swept.
    pub temp_ttl_hours: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Whole-slide image upload service")]
pub struct Args {
    /// Host to bind to (overrides SLIDE_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SLIDE_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Root directory for slide/report/temp storage (overrides SLIDE_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides SLIDE_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Age in hours after which abandoned chunk uploads are deleted
    /// (overrides SLIDE_STORE_TEMP_TTL_HOURS)
    #[arg(long)]
    pub temp_ttl_hours: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("SLIDE_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("SLIDE_STORE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing SLIDE_STORE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3001,
            Err(err) => return Err(err).context("reading SLIDE_STORE_PORT"),
        };
        let env_storage =
            env::var("SLIDE_STORE_STORAGE_DIR").unwrap_or_else(|_| "./data/storage".into());
        let env_db = env::var("SLIDE_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/slide_store.db".into());
        let env_ttl = match env::var("SLIDE_STORE_TEMP_TTL_HOURS") {
            Ok(value) => value.parse::<u64>().with_context(|| {
                format!("parsing SLIDE_STORE_TEMP_TTL_HOURS value `{}`", value)
            })?,
            Err(env::VarError::NotPresent) => 24,
            Err(err) => return Err(err).context("reading SLIDE_STORE_TEMP_TTL_HOURS"),
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            temp_ttl_hours: args.temp_ttl_hours.unwrap_or(env_ttl),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
