// Unit tests for engine configuration

use super::*;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_defaults_match_tuned_thresholds() {
    let config = EngineConfig::default();
    assert_eq!(config.tiers.high, 0.60);
    assert_eq!(config.tiers.medium, 0.35);
    assert_eq!(config.tiers.low, 0.15);
    assert_eq!(config.scan.visual_candidate_cap, 15);
    assert_eq!(config.healing.threshold, 0.50);
    assert_eq!(config.capture.size, 64);
    assert_eq!(config.cache_ttl(), Duration::from_secs(120));
    assert_eq!(config.sites.len(), 3);
}

#[test]
fn test_tier_classification_boundaries() {
    let tiers = TierThresholds::default();
    assert_eq!(tiers.classify(0.60), ConfidenceTier::High);
    assert_eq!(tiers.classify(0.5999), ConfidenceTier::Medium);
    assert_eq!(tiers.classify(0.35), ConfidenceTier::Medium);
    assert_eq!(tiers.classify(0.15), ConfidenceTier::Low);
    assert_eq!(tiers.classify(0.149), ConfidenceTier::Reject);
    assert_eq!(tiers.classify(0.0), ConfidenceTier::Reject);
}

#[test]
fn test_partial_file_keeps_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"healing": {{"threshold": 0.62}}, "cache_ttl_secs": 30}}"#
    )
    .unwrap();

    let config = EngineConfig::load(file.path()).unwrap();
    assert_eq!(config.healing.threshold, 0.62);
    assert_eq!(config.healing.min_height, 10.0);
    assert_eq!(config.cache_ttl_secs, 30);
    assert_eq!(config.scan.secondary_candidates, 5);
}

#[test]
fn test_invalid_file_is_config_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "not json").unwrap();
    let err = EngineConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, ProbeError::Config(_)));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_site_key_uses_profile_then_host() {
    let config = EngineConfig::default();
    assert_eq!(config.site_key("https://www.n11.com/urun/abc"), "n11");
    assert_eq!(config.site_key("https://shop.trendyol.com/"), "trendyol");
    assert_eq!(config.site_key("https://www.example.org/login"), "example.org");
    assert_eq!(config.site_key("not a url"), "unknown");
}

#[test]
fn test_site_profile_does_not_match_lookalike_domains() {
    let config = EngineConfig::default();
    assert!(config.site_for("https://notn11.com/").is_none());
    let site = config.site_for("https://www.hepsiburada.com/").unwrap();
    assert_eq!(site.cart_path.as_deref(), Some("/sepetim"));
}

#[test]
fn test_builders_and_paths() {
    let config = EngineConfig::default()
        .with_data_dir("/tmp/probe")
        .with_healing_threshold(0.51)
        .with_recovery_pause(Duration::from_millis(5));
    assert_eq!(config.healing.threshold, 0.51);
    assert_eq!(config.recovery.pause_ms, 5);
    assert_eq!(config.recovery.settle_ms, 5);
    assert_eq!(config.references_dir(), PathBuf::from("/tmp/probe/references"));
    assert_eq!(
        config.knowledge_file(),
        PathBuf::from("/tmp/probe/knowledge/learned_patterns.json")
    );
}
