// src/config.rs
// Runtime settings: thresholds, cadences, rate limits, retries. Loaded
// from a TOML file (TRENDSCOPE_CONFIG) with env-var overrides for the
// knobs operators actually tune. Everything has a sane default so the
// service boots with no file at all.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::model::Watch;

pub const ENV_CONFIG_PATH: &str = "TRENDSCOPE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/trendscope.toml";

/// Source name used for the external validation signal's rate limiter.
pub const EXTERNAL_SIGNAL: &str = "external_signal";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitCfg {
    /// Max requests per period.
    pub capacity: u32,
    pub period_secs: u64,
}

impl Default for RateLimitCfg {
    fn default() -> Self {
        Self {
            capacity: 60,
            period_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchCfg {
    pub name: String,
    pub keywords: Vec<String>,
    pub platforms: Vec<String>,
    pub active: bool,
}

impl Default for WatchCfg {
    fn default() -> Self {
        Self {
            name: String::new(),
            keywords: Vec::new(),
            platforms: Vec::new(),
            active: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,

    // Analytics
    /// Length of one aggregation window, seconds.
    pub window_secs: u64,
    /// Volume floor: both this and the growth threshold must hold.
    pub min_mentions: u64,
    /// Relative growth vs the prior window (0.5 = +50%).
    pub growth_threshold: f64,

    // Validation
    /// Match index above which a trend counts as externally confirmed.
    pub match_threshold: f64,
    /// Max segments validated per pass, to respect the external quota.
    pub validation_batch_size: usize,
    /// How many of a segment's keywords go into one interest query.
    pub validation_keywords: usize,
    /// Interest window passed to the external signal.
    pub validation_window: String,
    /// Base URL of the external interest endpoint (empty = disabled).
    pub signal_url: String,

    // Collection
    /// Look-back for content fetches, hours.
    pub hours_back: u32,
    /// Per-source fetch cap.
    pub fetch_limit: usize,
    /// Overall deadline for one fan-out batch, seconds.
    pub batch_deadline_secs: u64,

    // Retry policy
    pub retry_base_secs: u64,
    pub max_retries: u32,

    // Stage cadences
    pub collect_interval_secs: u64,
    pub analyze_interval_secs: u64,
    pub validate_interval_secs: u64,
    pub cleanup_interval_secs: u64,

    // Retention
    pub retention_days: u32,

    /// Per-source request quotas, keyed by source name. The external
    /// signal uses the [`EXTERNAL_SIGNAL`] entry.
    pub rate_limits: HashMap<String, RateLimitCfg>,

    /// Watch configurations seeded into the store at boot. Their CRUD
    /// surface lives outside this service.
    #[serde(rename = "watch")]
    pub watches: Vec<WatchCfg>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut rate_limits = HashMap::new();
        rate_limits.insert(EXTERNAL_SIGNAL.to_string(), RateLimitCfg {
            capacity: 30,
            period_secs: 60,
        });
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            window_secs: 3600,
            min_mentions: 10,
            growth_threshold: 0.5,
            match_threshold: 0.5,
            validation_batch_size: 10,
            validation_keywords: 3,
            validation_window: "now 7-d".to_string(),
            signal_url: String::new(),
            hours_back: 24,
            fetch_limit: 50,
            batch_deadline_secs: 3600,
            retry_base_secs: 60,
            max_retries: 3,
            collect_interval_secs: 1800,
            analyze_interval_secs: 3600,
            validate_interval_secs: 6 * 3600,
            cleanup_interval_secs: 24 * 3600,
            retention_days: 7,
            rate_limits,
            watches: Vec::new(),
        }
    }
}

impl Settings {
    /// Load from `$TRENDSCOPE_CONFIG`, falling back to
    /// `config/trendscope.toml`, falling back to defaults. Env overrides
    /// are applied on top, then the result is validated.
    pub fn load() -> Result<Self> {
        let mut s = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) => Self::from_path(Path::new(&p))?,
            Err(_) => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_path(default)?
                } else {
                    Self::default()
                }
            }
        };
        s.apply_env_overrides();
        s.validate()?;
        Ok(s)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing settings from {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<u64>("TRENDING_MIN_MENTIONS") {
            self.min_mentions = v;
        }
        if let Some(v) = env_parse::<f64>("TRENDING_GROWTH_THRESHOLD") {
            self.growth_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("VALIDATION_MATCH_THRESHOLD") {
            self.match_threshold = v;
        }
        if let Some(v) = env_parse::<u32>("DATA_RETENTION_DAYS") {
            self.retention_days = v;
        }
        if let Ok(v) = std::env::var("TRENDSCOPE_BIND_ADDR") {
            if !v.is_empty() {
                self.bind_addr = v;
            }
        }
        if let Ok(v) = std::env::var("TRENDSCOPE_SIGNAL_URL") {
            if !v.is_empty() {
                self.signal_url = v;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.window_secs > 0, "window_secs must be > 0");
        anyhow::ensure!(self.min_mentions >= 1, "min_mentions must be >= 1");
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.growth_threshold),
            "growth_threshold must be in [0, 1]"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.match_threshold),
            "match_threshold must be in [0, 1]"
        );
        anyhow::ensure!(self.retention_days >= 1, "retention_days must be >= 1");
        for (name, rl) in &self.rate_limits {
            anyhow::ensure!(
                rl.capacity > 0 && rl.period_secs > 0,
                "rate limit for '{name}' must have nonzero capacity and period"
            );
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_secs(self.retry_base_secs)
    }

    pub fn batch_deadline(&self) -> Duration {
        Duration::from_secs(self.batch_deadline_secs)
    }

    /// Quota for a named source, defaulting when unconfigured.
    pub fn rate_limit_for(&self, source: &str) -> RateLimitCfg {
        self.rate_limits.get(source).cloned().unwrap_or_default()
    }

    /// Materialize configured watches with fresh ids.
    pub fn seed_watches(&self) -> Vec<Watch> {
        self.watches
            .iter()
            .filter(|w| !w.name.is_empty())
            .map(|w| Watch {
                id: Uuid::new_v4(),
                name: w.name.clone(),
                keywords: w.keywords.clone(),
                platforms: w.platforms.clone(),
                active: w.active,
            })
            .collect()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn toml_round_trip_with_watches() {
        let raw = r#"
            min_mentions = 5
            growth_threshold = 0.3

            [rate_limits.youtube]
            capacity = 100
            period_secs = 60

            [[watch]]
            name = "elections"
            keywords = ["election", "vote"]
            platforms = ["youtube", "reddit"]
        "#;
        let s: Settings = toml::from_str(raw).unwrap();
        assert_eq!(s.min_mentions, 5);
        assert_eq!(s.rate_limit_for("youtube").capacity, 100);
        // Unconfigured source falls back to the default quota.
        assert_eq!(s.rate_limit_for("mastodon").capacity, 60);
        let watches = s.seed_watches();
        assert_eq!(watches.len(), 1);
        assert_eq!(watches[0].platforms, vec!["youtube", "reddit"]);
        assert!(watches[0].active);
    }

    #[test]
    fn bad_thresholds_are_rejected() {
        let mut s = Settings::default();
        s.growth_threshold = 1.5;
        assert!(s.validate().is_err());

        let mut s = Settings::default();
        s.rate_limits.insert(
            "reddit".into(),
            RateLimitCfg {
                capacity: 0,
                period_secs: 60,
            },
        );
        assert!(s.validate().is_err());
    }

    #[test]
    fn file_loading_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("broken.toml");
        std::fs::write(&p, "min_mentions = \"ten\"").unwrap();
        let err = Settings::from_path(&p).unwrap_err();
        assert!(format!("{err:#}").contains("broken.toml"));
    }
}
