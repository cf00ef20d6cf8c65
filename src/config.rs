//! Engine configuration.
//!
//! Defaults reproduce the tuned thresholds; a JSON file can override any subset.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::errors::{ProbeError, ProbeResult};
use crate::types::ConfidenceTier;

/// Ascending score thresholds for confidence tiers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
    pub reject: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            high: 0.60,
            medium: 0.35,
            low: 0.15,
            reject: 0.05,
        }
    }
}

impl TierThresholds {
    pub fn classify(&self, score: f64) -> ConfidenceTier {
        if score >= self.high {
            ConfidenceTier::High
        } else if score >= self.medium {
            ConfidenceTier::Medium
        } else if score >= self.low {
            ConfidenceTier::Low
        } else {
            ConfidenceTier::Reject
        }
    }
}

/// Candidate scanning and visual-scoring budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub min_width: f64,
    pub min_height: f64,
    /// Only the first K candidates get a screenshot comparison
    pub visual_candidate_cap: usize,
    pub references_per_candidate: usize,
    pub visual_early_exit: f64,
    /// Semantic score at which visual analysis is skipped
    pub strong_semantic: f64,
    pub neutral_visual: f64,
    /// Visual score when references exist but could not be compared
    pub visual_fallback: f64,
    pub secondary_threshold: f64,
    pub secondary_candidates: usize,
    pub secondary_references: usize,
    pub secondary_boost: f64,
    /// Added when a candidate matches a learned fingerprint; 0 disables
    pub learned_boost: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_width: 20.0,
            min_height: 20.0,
            visual_candidate_cap: 15,
            references_per_candidate: 2,
            visual_early_exit: 0.85,
            strong_semantic: 2.0,
            neutral_visual: 0.5,
            visual_fallback: 0.25,
            secondary_threshold: 0.70,
            secondary_candidates: 5,
            secondary_references: 3,
            secondary_boost: 0.4,
            learned_boost: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    pub threshold: f64,
    pub min_width: f64,
    pub min_height: f64,
    /// How long the durable lookup polls before healing kicks in
    pub locate_timeout_ms: u64,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.50,
            min_width: 20.0,
            min_height: 10.0,
            locate_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Inclusive lower bound of the capture band
    pub min_confidence: f64,
    /// Exclusive upper bound of the capture band
    pub max_confidence: f64,
    pub size: u32,
    pub duplicate_threshold: f64,
    pub duplicate_window: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.70,
            max_confidence: 0.95,
            size: 64,
            duplicate_threshold: 0.95,
            duplicate_window: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Pause between alternative strategies
    pub pause_ms: u64,
    /// Settle time after scroll, reload or navigation
    pub settle_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            pause_ms: 1_000,
            settle_ms: 2_000,
        }
    }
}

/// Well-known address patterns of a site, used for direct-navigation recovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteProfile {
    /// Domain matched against the current address host
    pub domain: String,
    pub name: String,
    pub cart_path: Option<String>,
    pub login_path: Option<String>,
    /// Search path with a `{query}` placeholder
    pub search_path: Option<String>,
}

impl SiteProfile {
    fn new(domain: &str, name: &str, cart: &str, login: &str, search: &str) -> Self {
        Self {
            domain: domain.to_string(),
            name: name.to_string(),
            cart_path: Some(cart.to_string()),
            login_path: Some(login.to_string()),
            search_path: Some(search.to_string()),
        }
    }

    pub fn matches(&self, address: &str) -> bool {
        Url::parse(address)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .is_some_and(|host| host == self.domain || host.ends_with(&format!(".{}", self.domain)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tiers: TierThresholds,
    /// Minimum final score for categories without their own
    pub default_min_score: f64,
    pub scan: ScanConfig,
    pub healing: HealingConfig,
    pub capture: CaptureConfig,
    pub recovery: RecoveryConfig,
    pub cache_ttl_secs: u64,
    pub page_ready_timeout_ms: u64,
    /// Root of the reference repository and knowledge store
    pub data_dir: PathBuf,
    pub sites: Vec<SiteProfile>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tiers: TierThresholds::default(),
            default_min_score: 0.10,
            scan: ScanConfig::default(),
            healing: HealingConfig::default(),
            capture: CaptureConfig::default(),
            recovery: RecoveryConfig::default(),
            cache_ttl_secs: 120,
            page_ready_timeout_ms: 10_000,
            data_dir: default_data_dir(),
            sites: vec![
                SiteProfile::new("n11.com", "n11", "/sepetim", "/giris-yap", "/arama?q={query}"),
                SiteProfile::new(
                    "hepsiburada.com",
                    "hepsiburada",
                    "/sepetim",
                    "/giris",
                    "/ara?q={query}",
                ),
                SiteProfile::new("trendyol.com", "trendyol", "/sepet", "/giris", "/sr?q={query}"),
            ],
        }
    }
}

/// `~/.intentprobe`, or `./.intentprobe` when no home directory is known
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".intentprobe")
}

impl EngineConfig {
    /// Read a JSON config file; missing keys keep their defaults
    pub fn load(path: &Path) -> ProbeResult<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| ProbeError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| ProbeError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from `path`, else from `<data dir>/config.json` when present, else defaults
    pub fn load_or_default(path: Option<&Path>) -> ProbeResult<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default_path = default_data_dir().join("config.json");
        if default_path.exists() {
            debug!("Loading config from {}", default_path.display());
            Self::load(&default_path)
        } else {
            Ok(Self::default())
        }
    }

    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_healing_threshold(mut self, threshold: f64) -> Self {
        self.healing.threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_recovery_pause(mut self, pause: Duration) -> Self {
        self.recovery.pause_ms = pause.as_millis() as u64;
        self.recovery.settle_ms = self.recovery.settle_ms.min(self.recovery.pause_ms);
        self
    }

    #[must_use]
    pub fn with_locate_timeout(mut self, timeout: Duration) -> Self {
        self.healing.locate_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn references_dir(&self) -> PathBuf {
        self.data_dir.join("references")
    }

    pub fn knowledge_file(&self) -> PathBuf {
        self.data_dir.join("knowledge").join("learned_patterns.json")
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn page_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.page_ready_timeout_ms)
    }

    pub fn site_for(&self, address: &str) -> Option<&SiteProfile> {
        self.sites.iter().find(|s| s.matches(address))
    }

    /// Stable site key for an address: a configured profile name, else the host
    pub fn site_key(&self, address: &str) -> String {
        if let Some(site) = self.site_for(address) {
            return site.name.clone();
        }
        Url::parse(address)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_lowercase()))
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
