use std::env;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use log::LevelFilter;

/// Command-line arguments. Every flag has an environment-variable
/// counterpart; flags win when both are set.
#[derive(Parser, Debug, Clone)]
#[command(name = "refresharr", version, about = "Reconciles Sonarr/Radarr file records against the filesystem")]
pub(crate) struct Cli {
    /// Detect and report without deleting records or symlinks.
    #[arg(long)]
    pub dry_run: bool,

    /// Skip printing the missing-files report to the terminal.
    #[arg(long)]
    pub no_report: bool,

    /// Log verbosity: error, warn, info, debug or trace.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Which service to run against.
    #[arg(long, value_enum, default_value_t = ServiceChoice::Auto)]
    pub service: ServiceChoice,

    /// Sonarr base URL, e.g. http://127.0.0.1:8989.
    #[arg(long)]
    pub sonarr_url: Option<String>,

    /// Sonarr API key.
    #[arg(long)]
    pub sonarr_api_key: Option<String>,

    /// Radarr base URL, e.g. http://127.0.0.1:7878.
    #[arg(long)]
    pub radarr_url: Option<String>,

    /// Radarr API key.
    #[arg(long)]
    pub radarr_api_key: Option<String>,

    /// Comma-separated series IDs to restrict the Sonarr run to.
    #[arg(long, value_name = "IDS")]
    pub series_ids: Option<String>,

    /// Comma-separated movie IDs to restrict the Radarr run to.
    #[arg(long, value_name = "IDS")]
    pub movie_ids: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServiceChoice {
    Sonarr,
    Radarr,
    /// Run against every service that has credentials configured.
    Auto,
}

/// Connection settings for one service.
#[derive(Debug, Clone)]
pub(crate) struct ServiceConfig {
    pub url: String,
    pub api_key: String,
}

/// Fully resolved runtime configuration: CLI flags layered over
/// environment variables layered over defaults.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub sonarr: Option<ServiceConfig>,
    pub radarr: Option<ServiceConfig>,
    pub request_timeout: Duration,
    pub request_delay: Duration,
    pub concurrent_limit: usize,
    pub dry_run: bool,
    pub add_missing_media: bool,
    pub quality_profile_id: i32,
    pub series_ids: Vec<i32>,
    pub movie_ids: Vec<i32>,
}

const DEFAULT_SONARR_URL: &str = "http://127.0.0.1:8989";
const DEFAULT_RADARR_URL: &str = "http://127.0.0.1:7878";
const DEFAULT_QUALITY_PROFILE_ID: i32 = 12;

impl Config {
    /// Resolves the effective configuration. `.env` has already been
    /// loaded by `main` at this point, so plain `env::var` sees it.
    pub(crate) fn load(cli: &Cli) -> anyhow::Result<Config> {
        let sonarr = service_config(
            cli.sonarr_url.as_deref(),
            cli.sonarr_api_key.as_deref(),
            "SONARR_URL",
            "SONARR_API_KEY",
            DEFAULT_SONARR_URL,
        );
        let radarr = service_config(
            cli.radarr_url.as_deref(),
            cli.radarr_api_key.as_deref(),
            "RADARR_URL",
            "RADARR_API_KEY",
            DEFAULT_RADARR_URL,
        );

        let request_timeout = env_duration("REQUEST_TIMEOUT", Duration::from_secs(30))?;
        let request_delay = env_duration("REQUEST_DELAY", Duration::from_millis(500))?;
        let concurrent_limit = match env_var("CONCURRENT_LIMIT") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("invalid CONCURRENT_LIMIT value {raw:?}"))?,
            None => default_concurrency(),
        };
        let quality_profile_id = match env_var("QUALITY_PROFILE_ID") {
            Some(raw) => raw
                .parse::<i32>()
                .with_context(|| format!("invalid QUALITY_PROFILE_ID value {raw:?}"))?,
            None => DEFAULT_QUALITY_PROFILE_ID,
        };

        let series_ids = match cli.series_ids.as_deref() {
            Some(raw) => parse_id_list(raw)?,
            None => Vec::new(),
        };
        let movie_ids = match cli.movie_ids.as_deref() {
            Some(raw) => parse_id_list(raw)?,
            None => Vec::new(),
        };

        let config = Config {
            sonarr,
            radarr,
            request_timeout,
            request_delay,
            concurrent_limit,
            dry_run: cli.dry_run || env_flag("DRY_RUN"),
            add_missing_media: env_flag("ADD_MISSING_MEDIA"),
            quality_profile_id,
            series_ids,
            movie_ids,
        };
        config.validate(cli.service)?;
        Ok(config)
    }

    fn validate(&self, service: ServiceChoice) -> anyhow::Result<()> {
        match service {
            ServiceChoice::Sonarr if self.sonarr.is_none() => {
                bail!("Sonarr selected but SONARR_API_KEY is not configured")
            }
            ServiceChoice::Radarr if self.radarr.is_none() => {
                bail!("Radarr selected but RADARR_API_KEY is not configured")
            }
            ServiceChoice::Auto if self.sonarr.is_none() && self.radarr.is_none() => {
                bail!("no service configured; set SONARR_API_KEY and/or RADARR_API_KEY")
            }
            _ => {}
        }
        if self.concurrent_limit == 0 {
            bail!("CONCURRENT_LIMIT must be at least 1");
        }
        if self.request_timeout.is_zero() {
            bail!("REQUEST_TIMEOUT must be positive");
        }
        Ok(())
    }
}

/// A service is considered configured when it has an API key. The URL
/// falls back to the conventional localhost port.
fn service_config(
    cli_url: Option<&str>,
    cli_key: Option<&str>,
    url_var: &str,
    key_var: &str,
    default_url: &str,
) -> Option<ServiceConfig> {
    let api_key = cli_key
        .map(str::to_string)
        .or_else(|| env_var(key_var))?;
    let url = cli_url
        .map(str::to_string)
        .or_else(|| env_var(url_var))
        .unwrap_or_else(|| default_url.to_string());
    Some(ServiceConfig {
        url: url.trim_end_matches('/').to_string(),
        api_key,
    })
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_flag(name: &str) -> bool {
    matches!(
        env_var(name).as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes")
    )
}

fn env_duration(name: &str, default: Duration) -> anyhow::Result<Duration> {
    match env_var(name) {
        Some(raw) => {
            parse_duration(&raw).with_context(|| format!("invalid {name} value {raw:?}"))
        }
        None => Ok(default),
    }
}

/// Sized to keep a handful of requests in flight without hammering the
/// backend, whatever the host looks like.
fn default_concurrency() -> usize {
    num_cpus::get().clamp(5, 8)
}

/// Parses durations of the form `500ms`, `30s` or `5m`. A bare number is
/// taken as seconds.
pub(crate) fn parse_duration(raw: &str) -> anyhow::Result<Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => raw.split_at(split),
        None => (raw, "s"),
    };
    let value: u64 = digits
        .parse()
        .with_context(|| format!("invalid duration {raw:?}"))?;
    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        other => bail!("unknown duration unit {other:?} in {raw:?}"),
    }
}

/// Parses a comma-separated ID list such as `1,2,3`.
pub(crate) fn parse_id_list(raw: &str) -> anyhow::Result<Vec<i32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i32>()
                .with_context(|| format!("invalid ID {part:?} in list {raw:?}"))
        })
        .collect()
}

/// Maps the `--log-level` flag (or `LOG_LEVEL`) onto a filter, defaulting
/// to `info`.
pub(crate) fn resolve_log_level(flag: Option<&str>) -> anyhow::Result<LevelFilter> {
    let raw = match flag.map(str::to_string).or_else(|| env_var("LOG_LEVEL")) {
        Some(raw) => raw,
        None => return Ok(LevelFilter::Info),
    };
    match raw.to_ascii_lowercase().as_str() {
        "error" => Ok(LevelFilter::Error),
        "warn" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        other => bail!("unknown log level {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse_with_unit_suffixes() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn bad_durations_are_rejected() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10h").is_err());
    }

    #[test]
    fn id_lists_tolerate_whitespace_and_trailing_commas() {
        assert_eq!(parse_id_list("1,2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_id_list(" 4 , 5 ,").unwrap(), vec![4, 5]);
        assert!(parse_id_list("1,two").is_err());
    }

    #[test]
    fn log_level_flag_is_case_insensitive() {
        assert_eq!(resolve_log_level(Some("DEBUG")).unwrap(), LevelFilter::Debug);
        assert_eq!(resolve_log_level(Some("warn")).unwrap(), LevelFilter::Warn);
        assert!(resolve_log_level(Some("loud")).is_err());
    }

    #[test]
    fn default_concurrency_stays_in_the_polite_range() {
        let limit = default_concurrency();
        assert!((5..=8).contains(&limit));
    }
}
