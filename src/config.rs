//! Runtime settings and per-dataset configuration.
//!
//! `Settings` carries the knobs shared by every query (service location, retry
//! policy, chunking, cache location). `DatasetConfig` captures the handful of
//! ways individual IMF datasets differ from each other, so a single pipeline can
//! serve all of them.

use crate::models::Frequency;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://dataservices.imf.org/REST/SDMX_JSON.svc/";

/// Settings shared by every stage of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Service root, always ending in `/`.
    pub base_url: String,
    /// Attempts per request before giving up (the service rate-limits per IP).
    pub max_attempts: u32,
    /// Fixed sleep between attempts.
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Number of indicator codes joined into one request key.
    pub chunk_size: usize,
    /// Directory holding the CSV snapshots used as a cold fallback.
    pub cache_dir: PathBuf,
    /// Cap on the length of derived cache filenames (without extension).
    pub max_filename_len: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .map(|d| d.join("imfdata"))
            .unwrap_or_else(|| PathBuf::from("out"));
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            chunk_size: 5,
            cache_dir,
            max_filename_len: 200,
        }
    }
}

impl Settings {
    /// Defaults overlaid with `IMFDATA_*` environment variables.
    ///
    /// Unparsable numeric values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut s = Self::default();
        if let Ok(url) = std::env::var("IMFDATA_BASE_URL") {
            s.base_url = url;
        }
        if let Ok(dir) = std::env::var("IMFDATA_CACHE_DIR") {
            s.cache_dir = PathBuf::from(dir);
        }
        if let Some(n) = env_parse::<u32>("IMFDATA_MAX_ATTEMPTS") {
            s.max_attempts = n.max(1);
        }
        if let Some(ms) = env_parse::<u64>("IMFDATA_RETRY_DELAY_MS") {
            s.retry_delay = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<usize>("IMFDATA_CHUNK_SIZE") {
            s.chunk_size = n.max(1);
        }
        s.normalized()
    }

    /// Ensure the base URL ends with a slash so endpoint paths can be appended.
    pub fn normalized(mut self) -> Self {
        if !self.base_url.ends_with('/') {
            self.base_url.push('/');
        }
        self.chunk_size = self.chunk_size.max(1);
        self.max_attempts = self.max_attempts.max(1);
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

/// What distinguishes one dataset family from another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetConfig {
    pub code: String,
    pub default_period: Frequency,
    /// GFSR publishes its series keyed by `@REF_SECTOR` instead of `@INDICATOR`.
    pub sector_as_indicator: bool,
    /// Case-insensitive substring identifying the indicator-bearing codelist.
    pub indicator_pattern: String,
    pub area_pattern: String,
    pub frequency_pattern: String,
}

impl DatasetConfig {
    /// Configuration for a dataset code; unknown codes get the generic setup.
    pub fn for_dataset(code: &str) -> Self {
        let code = code.trim().to_ascii_uppercase();
        let (default_period, sector_as_indicator) = match code.as_str() {
            "IFS" | "DOT" | "BOP" | "FSI" => (Frequency::Quarterly, false),
            "GFSR" => (Frequency::Annual, true),
            "AFRREO" | "HPDD" => (Frequency::Annual, false),
            _ => (Frequency::Quarterly, false),
        };
        Self {
            code,
            default_period,
            sector_as_indicator,
            indicator_pattern: "INDICATOR".into(),
            area_pattern: "AREA".into(),
            frequency_pattern: "FREQ".into(),
        }
    }

    pub fn is_indicator_codelist(&self, codelist: &str) -> bool {
        contains_ci(codelist, &self.indicator_pattern)
    }

    pub fn is_area_codelist(&self, codelist: &str) -> bool {
        contains_ci(codelist, &self.area_pattern)
    }

    pub fn is_frequency_codelist(&self, codelist: &str) -> bool {
        contains_ci(codelist, &self.frequency_pattern)
    }
}

pub(crate) fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
