//! Service configuration resolution
//!
//! Priority: CLI flag > environment variable > TOML file > compiled default.
//! Flags and environment variables are handled together by clap (`env`).

use crate::retry::RetryPolicy;
use clap::Parser;
use otw_common::config::{default_database_path, TomlConfig};
use otw_common::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Command-line arguments for otw-ingest
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "otw-ingest")]
#[command(about = "Traffic incident ingestion and live push service")]
#[command(version)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "OTW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Upstream incident feed URL
    #[arg(long, env = "OTW_UPSTREAM_URL")]
    pub upstream_url: Option<String>,

    /// Address the HTTP server binds to
    #[arg(short, long, env = "OTW_BIND")]
    pub bind: Option<String>,

    /// SQLite database file
    #[arg(long, env = "OTW_DATABASE")]
    pub database: Option<PathBuf>,

    /// Seconds between scheduled cycles (0 disables the timer)
    #[arg(long, env = "OTW_INTERVAL_SECS")]
    pub interval_secs: Option<u64>,

    /// Webhook endpoint for change notifications
    #[arg(long, env = "OTW_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Comma-separated location keywords to keep
    #[arg(long, env = "OTW_AREA_KEYWORDS", value_delimiter = ',')]
    pub area_keywords: Vec<String>,
}

/// Fully resolved settings for one service instance
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub upstream_url: String,
    pub upstream_timeout: Duration,
    pub retry: RetryPolicy,
    pub database_path: PathBuf,
    pub acquire_timeout: Duration,
    pub bind: SocketAddr,
    pub interval: Duration,
    pub webhook_url: Option<String>,
    pub notify_timeout: Duration,
    pub client_buffer: usize,
    pub push_timeout: Duration,
    pub area_keywords: Vec<String>,
    pub log_level: Option<String>,
    /// File the TOML layer was read from; `None` means compiled defaults
    pub config_file: Option<PathBuf>,
}

impl ServiceConfig {
    /// Load the TOML layer named by `args` (or the default locations) and merge
    ///
    /// Runs before logging is set up, so the chosen file is kept in
    /// `config_file` and reported by [`ServiceConfig::log_summary`].
    pub fn load(args: &Args) -> Result<Self> {
        let config_file = TomlConfig::locate(args.config.as_deref());
        let toml = match &config_file {
            Some(path) => TomlConfig::load(path)?,
            None => TomlConfig::default(),
        };

        let mut config = Self::merge(args, toml)?;
        config.config_file = config_file;
        Ok(config)
    }

    /// Merge CLI/env values over a TOML layer
    pub fn merge(args: &Args, toml: TomlConfig) -> Result<Self> {
        let upstream_url = args
            .upstream_url
            .clone()
            .or(toml.upstream.url)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(
                    "Upstream URL not configured. Set --upstream-url, OTW_UPSTREAM_URL, \
                     or [upstream] url in the config file"
                        .to_string(),
                )
            })?;

        let bind_text = args.bind.clone().unwrap_or(toml.server.bind);
        let bind: SocketAddr = bind_text
            .parse()
            .map_err(|e| Error::Config(format!("Invalid bind address '{}': {}", bind_text, e)))?;

        let retry = RetryPolicy::new(
            toml.retry.max_attempts,
            Duration::from_millis(toml.retry.backoff_unit_ms),
        )
        .with_jitter(Duration::from_millis(toml.retry.jitter_ms));

        let area_keywords = if args.area_keywords.is_empty() {
            toml.filter.area_keywords
        } else {
            args.area_keywords.clone()
        };

        let config = Self {
            upstream_url,
            upstream_timeout: Duration::from_secs(toml.upstream.timeout_secs),
            retry,
            database_path: args
                .database
                .clone()
                .or(toml.store.database_path)
                .unwrap_or_else(default_database_path),
            acquire_timeout: Duration::from_secs(toml.store.acquire_timeout_secs),
            bind,
            interval: Duration::from_secs(args.interval_secs.unwrap_or(toml.schedule.interval_secs)),
            webhook_url: args.webhook_url.clone().or(toml.notify.webhook_url),
            notify_timeout: Duration::from_secs(toml.notify.timeout_secs),
            client_buffer: toml.hub.client_buffer,
            push_timeout: Duration::from_millis(toml.hub.push_timeout_ms),
            area_keywords,
            log_level: toml.logging.level,
            config_file: None,
        };

        Ok(config)
    }

    /// Log the effective settings
    pub fn log_summary(&self) {
        match &self.config_file {
            Some(path) => info!(path = %path.display(), "Loaded config file"),
            None => info!("No config file found, using defaults"),
        }
        info!(
            upstream = %self.upstream_url,
            timeout_secs = self.upstream_timeout.as_secs(),
            max_attempts = self.retry.max_attempts(),
            backoff_unit_ms = self.retry.backoff_unit().as_millis() as u64,
            "Upstream settings"
        );
        info!(
            database = %self.database_path.display(),
            bind = %self.bind,
            interval_secs = self.interval.as_secs(),
            webhook = self.webhook_url.as_deref().unwrap_or("<none>"),
            area_keywords = self.area_keywords.len(),
            "Service settings"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toml_with_url() -> TomlConfig {
        TomlConfig::from_toml_str(
            r#"
            [upstream]
            url = "https://feed.example/incidents"

            [server]
            bind = "0.0.0.0:8080"

            [schedule]
            interval_secs = 120

            [filter]
            area_keywords = ["Kanata"]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_toml_values_used_when_no_flags() {
        let config = ServiceConfig::merge(&Args::default(), toml_with_url()).unwrap();

        assert_eq!(config.upstream_url, "https://feed.example/incidents");
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.interval, Duration::from_secs(120));
        assert_eq!(config.area_keywords, vec!["Kanata".to_string()]);
        assert_eq!(config.retry.max_attempts(), 3);
        assert_eq!(config.upstream_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_flags_override_toml() {
        let args = Args {
            upstream_url: Some("http://localhost:9000/feed".to_string()),
            bind: Some("127.0.0.1:7000".to_string()),
            interval_secs: Some(0),
            area_keywords: vec!["Orleans".to_string()],
            ..Args::default()
        };

        let config = ServiceConfig::merge(&args, toml_with_url()).unwrap();

        assert_eq!(config.upstream_url, "http://localhost:9000/feed");
        assert_eq!(config.bind.port(), 7000);
        assert!(config.interval.is_zero());
        assert_eq!(config.area_keywords, vec!["Orleans".to_string()]);
    }

    #[test]
    fn test_missing_upstream_url_is_config_error() {
        let err = ServiceConfig::merge(&Args::default(), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_invalid_bind_is_config_error() {
        let args = Args {
            bind: Some("not-an-address".to_string()),
            ..Args::default()
        };
        let err = ServiceConfig::merge(&args, toml_with_url()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_records_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("otw.toml");
        std::fs::write(&path, "[upstream]\nurl = \"http://feed.local/incidents\"\n").unwrap();

        let args = Args {
            config: Some(path.clone()),
            ..Args::default()
        };
        let config = ServiceConfig::load(&args).unwrap();

        assert_eq!(config.upstream_url, "http://feed.local/incidents");
        assert_eq!(config.config_file, Some(path));
    }

    #[test]
    fn test_area_keywords_split_on_commas() {
        let args = Args::try_parse_from([
            "otw-ingest",
            "--upstream-url",
            "http://x/feed",
            "--area-keywords",
            "Kanata,Barrhaven",
        ])
        .unwrap();
        assert_eq!(args.area_keywords, vec!["Kanata", "Barrhaven"]);
    }
}
