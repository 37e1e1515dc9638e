use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context as _;
use url::Url;

use crate::extract::ExtractorEngine;

pub const DATA_DIR_VAR: &str = "DOCGRAPH_DATA_DIR";
pub const SWEEP_GRACE_VAR: &str = "DOCGRAPH_SWEEP_GRACE_SECS";
pub const SWEEP_INTERVAL_VAR: &str = "DOCGRAPH_SWEEP_INTERVAL_SECS";
pub const RESULT_TTL_VAR: &str = "DOCGRAPH_RESULT_TTL_SECS";
pub const EXTRACT_TIMEOUT_VAR: &str = "DOCGRAPH_EXTRACT_TIMEOUT_SECS";
pub const MAX_CONCURRENCY_VAR: &str = "DOCGRAPH_MAX_CONCURRENCY";
pub const EXTRACTOR_VAR: &str = "DOCGRAPH_EXTRACTOR";
pub const EXTRACTOR_URL_VAR: &str = "DOCGRAPH_EXTRACTOR_URL";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Holds `graph.json` and the `blobs/` tree.
    pub data_dir: PathBuf,
    pub sweep_grace: Duration,
    /// Zero disables the periodic reconciler.
    pub sweep_interval: Duration,
    pub result_ttl: Duration,
    pub extract_timeout: Duration,
    pub max_concurrency: usize,
    pub extractor: ExtractorEngine,
    pub extractor_url: Option<Url>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("docgraph-data"),
            sweep_grace: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(300),
            result_ttl: Duration::from_secs(30),
            extract_timeout: Duration::from_secs(120),
            max_concurrency: 2,
            extractor: ExtractorEngine::Outline,
            extractor_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source; unset or blank values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let extractor = match get(EXTRACTOR_VAR) {
            Some(raw) => ExtractorEngine::parse(&raw).context(EXTRACTOR_VAR)?,
            None => defaults.extractor,
        };
        let extractor_url = get(EXTRACTOR_URL_VAR)
            .map(|raw| Url::parse(&raw))
            .transpose()
            .with_context(|| format!("{EXTRACTOR_URL_VAR} is not a valid URL"))?;
        if extractor == ExtractorEngine::Http && extractor_url.is_none() {
            anyhow::bail!("{EXTRACTOR_URL_VAR} is required when {EXTRACTOR_VAR}=http");
        }

        let max_concurrency =
            parse_var(&get, MAX_CONCURRENCY_VAR)?.unwrap_or(defaults.max_concurrency);
        if max_concurrency == 0 {
            anyhow::bail!("{MAX_CONCURRENCY_VAR} must be at least 1");
        }
        let extract_timeout =
            secs_var(&get, EXTRACT_TIMEOUT_VAR)?.unwrap_or(defaults.extract_timeout);
        if extract_timeout.is_zero() {
            anyhow::bail!("{EXTRACT_TIMEOUT_VAR} must be at least 1");
        }

        Ok(Self {
            data_dir: get(DATA_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            sweep_grace: secs_var(&get, SWEEP_GRACE_VAR)?.unwrap_or(defaults.sweep_grace),
            sweep_interval: secs_var(&get, SWEEP_INTERVAL_VAR)?.unwrap_or(defaults.sweep_interval),
            result_ttl: secs_var(&get, RESULT_TTL_VAR)?.unwrap_or(defaults.result_ttl),
            extract_timeout,
            max_concurrency,
            extractor,
            extractor_url,
        })
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(name)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("{name}: invalid value {raw:?}"))
        })
        .transpose()
}

fn secs_var(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> anyhow::Result<Option<Duration>> {
    Ok(parse_var::<u64>(get, name)?.map(Duration::from_secs))
}
