use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::category::Category;

/// Maximum characters of visible text kept in a descriptor
pub const TEXT_LIMIT: usize = 50;

/// Output format for CLI results
#[derive(Clone, Copy, Debug, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON format for programmatic consumption
    Json,
    /// Human-readable simple format
    Simple,
}

/// Structural snapshot of a live node.
///
/// Re-fetched whenever the node may have mutated; never updated in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    /// Lowercase tag name
    pub tag: String,
    pub role: String,
    /// The `type` attribute
    #[serde(rename = "type")]
    pub input_type: String,
    pub class: String,
    pub id: String,
    /// Visible text, truncated to [`TEXT_LIMIT`] characters
    pub text: String,
    pub placeholder: String,
    pub value: String,
    pub title: String,
    pub aria_label: String,
    pub href: String,
    /// Vertical position relative to the document
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub displayed: bool,
    pub enabled: bool,
}

impl ElementDescriptor {
    /// Truncate visible text the way every descriptor stores it
    pub fn truncate_text(text: &str) -> String {
        text.trim().chars().take(TEXT_LIMIT).collect()
    }

    /// All human-facing text plus class and id, used for semantic matching
    pub fn semantic_text(&self) -> String {
        [
            self.text.as_str(),
            self.value.as_str(),
            self.placeholder.as_str(),
            self.title.as_str(),
            self.aria_label.as_str(),
            self.class.as_str(),
            self.id.as_str(),
        ]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
    }

    /// Short label for logs: id, then class, then tag
    pub fn identifier(&self) -> String {
        if !self.id.is_empty() {
            format!("ID:{}", self.id)
        } else if !self.class.is_empty() {
            format!("CLASS:{}", self.class)
        } else {
            format!("TAG:{}", self.tag)
        }
    }

    pub fn is_big_enough(&self, min_width: f64, min_height: f64) -> bool {
        self.width >= min_width && self.height >= min_height
    }
}

/// Bucketed classification of a fused score
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceTier {
    Reject,
    Low,
    Medium,
    High,
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConfidenceTier::Reject => "REJECT",
            ConfidenceTier::Low => "LOW",
            ConfidenceTier::Medium => "MEDIUM",
            ConfidenceTier::High => "HIGH",
        };
        f.write_str(label)
    }
}

/// Component scores and their fusion for one candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub visual: f64,
    /// May exceed 1.0 as a strong-match bonus, or be negative for decorations
    pub semantic: f64,
    pub location: f64,
    pub tag: f64,
    /// Bonuses added after weighting (proximity, learned fingerprint)
    pub bonus: f64,
    /// Always within `[0, 1]`
    pub final_score: f64,
    pub confidence_tier: ConfidenceTier,
}

impl fmt::Display for ScoreBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "V:{:.2} S:{:.1} L:{:.1} T:{:.1} B:{:.2} => {:.4} [{}]",
            self.visual,
            self.semantic,
            self.location,
            self.tag,
            self.bonus,
            self.final_score,
            self.confidence_tier
        )
    }
}

/// A scored live node considered during one resolution
#[derive(Debug, Clone, Serialize)]
pub struct Candidate<N> {
    /// Opaque handle to act on the live node
    #[serde(skip)]
    pub node: N,
    pub category: Category,
    pub descriptor: ElementDescriptor,
    pub score: ScoreBreakdown,
    /// Served from the resolution cache without rescanning
    pub from_cache: bool,
}

impl<N> Candidate<N> {
    pub fn final_score(&self) -> f64 {
        self.score.final_score
    }

    pub fn tier(&self) -> ConfidenceTier {
        self.score.confidence_tier
    }
}

/// Browser viewport dimensions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewportSize {
    /// Viewport width in pixels
    pub width: u32,
    /// Viewport height in pixels
    pub height: u32,
}

impl ViewportSize {
    /// Parse viewport size from "WIDTHxHEIGHT" format (e.g., "1920x1080")
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('x').collect();
        if parts.len() != 2 {
            anyhow::bail!("Invalid viewport format. Use WIDTHxHEIGHT (e.g., 1920x1080)");
        }

        let width = parts[0]
            .parse::<u32>()
            .map_err(|_| anyhow::anyhow!("Invalid width in viewport size"))?;
        let height = parts[1]
            .parse::<u32>()
            .map_err(|_| anyhow::anyhow!("Invalid height in viewport size"))?;

        Ok(ViewportSize { width, height })
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
