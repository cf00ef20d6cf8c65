//! Text and image similarity scoring.
//!
//! Every entry point returns a score in `[0, 1]`; failures collapse to the
//! minimum score instead of propagating.

use image::imageops::FilterType;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::errors::{ProbeError, ProbeResult};

/// Lowercase with Turkish dotted/dotless capitals folded first, whitespace collapsed
pub fn normalize_text(text: &str) -> String {
    let folded: String = text
        .chars()
        .map(|c| match c {
            'İ' => 'i',
            'Ş' => 'ş',
            'Ğ' => 'ğ',
            'Ü' => 'ü',
            'Ö' => 'ö',
            'Ç' => 'ç',
            other => other,
        })
        .collect();
    folded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Normalized Levenshtein similarity
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut current = vec![i + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            let value = (current[j] + 1)
                .min(previous[j + 1] + 1)
                .min(previous[j] + cost);
            current.push(value);
        }
        previous = current;
    }

    let distance = previous[b.len()] as f64;
    1.0 - distance / a.len().max(b.len()) as f64
}

/// Jaccard similarity of whitespace token sets; two empty sets are identical
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }

    let union = tokens_a.union(&tokens_b).count();
    if union == 0 {
        return 0.0;
    }
    tokens_a.intersection(&tokens_b).count() as f64 / union as f64
}

fn ngrams(text: &str, n: usize) -> HashSet<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < n {
        return HashSet::from([text.to_string()]);
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

/// Character n-gram Jaccard similarity, catching partial stems like "sepet"/"sepete"
pub fn ngram_similarity(text: &str, keyword: &str, n: usize) -> f64 {
    if text.is_empty() || keyword.is_empty() {
        return 0.0;
    }

    let text_grams = ngrams(&text.to_lowercase(), n);
    let keyword_grams = ngrams(&keyword.to_lowercase(), n);
    let union = text_grams.union(&keyword_grams).count();
    if union == 0 {
        return 0.0;
    }
    text_grams.intersection(&keyword_grams).count() as f64 / union as f64
}

/// How much of one string is contained in the other
pub fn substring_containment(text: &str, keyword: &str) -> f64 {
    if text.is_empty() || keyword.is_empty() {
        return 0.0;
    }

    let text = text.to_lowercase();
    let keyword = keyword.to_lowercase();
    let text_len = text.chars().count() as f64;
    let keyword_len = keyword.chars().count() as f64;

    if text.contains(&keyword) {
        // Shorter surrounding text means a tighter match
        (keyword_len / (text_len * 0.5)).min(1.0)
    } else if keyword.contains(&text) {
        text_len / keyword_len
    } else {
        0.0
    }
}

/// Best-effort text match: the strongest of all metrics wins
pub fn text_similarity(a: &str, b: &str) -> f64 {
    [
        levenshtein_similarity(a, b),
        jaccard_similarity(a, b),
        ngram_similarity(a, b, 2),
        ngram_similarity(a, b, 3),
        substring_containment(a, b),
    ]
    .into_iter()
    .fold(0.0, f64::max)
}

/// Pairwise visual comparator over encoded images
pub trait VisualModel: Send + Sync {
    fn name(&self) -> &str;

    /// Similarity of two encoded images in `[0, 1]`
    fn compare(&self, a: &[u8], b: &[u8]) -> anyhow::Result<f64>;
}

/// Pixel-level comparator: both images are downscaled to a small RGB grid and
/// scored by mean absolute channel difference.
#[derive(Debug, Clone)]
pub struct PixelComparator {
    side: u32,
}

impl Default for PixelComparator {
    fn default() -> Self {
        Self { side: 32 }
    }
}

impl PixelComparator {
    pub fn new(side: u32) -> Self {
        Self { side: side.max(1) }
    }
}

impl VisualModel for PixelComparator {
    fn name(&self) -> &str {
        "pixel"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> anyhow::Result<f64> {
        let a = image::load_from_memory(a)?
            .resize_exact(self.side, self.side, FilterType::Triangle)
            .to_rgb8();
        let b = image::load_from_memory(b)?
            .resize_exact(self.side, self.side, FilterType::Triangle)
            .to_rgb8();

        let total: u64 = a
            .as_raw()
            .iter()
            .zip(b.as_raw())
            .map(|(x, y)| u64::from(x.abs_diff(*y)))
            .sum();
        let channels = a.as_raw().len().max(1) as f64;
        Ok(1.0 - total as f64 / (channels * 255.0))
    }
}

/// Similarity entry point shared by scoring, healing and capture
#[derive(Clone)]
pub struct SimilarityService {
    model: Option<Arc<dyn VisualModel>>,
}

impl Default for SimilarityService {
    fn default() -> Self {
        Self::new(Arc::new(PixelComparator::default()))
    }
}

impl std::fmt::Debug for SimilarityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityService")
            .field("model", &self.model.as_ref().map(|m| m.name().to_string()))
            .finish()
    }
}

impl SimilarityService {
    pub fn new(model: Arc<dyn VisualModel>) -> Self {
        Self { model: Some(model) }
    }

    /// Text metrics only; every image comparison scores 0.0
    pub fn without_model() -> Self {
        Self { model: None }
    }

    pub fn is_model_available(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> ProbeResult<&dyn VisualModel> {
        self.model.as_deref().ok_or(ProbeError::ModelUnavailable)
    }

    pub fn text_similarity(&self, a: &str, b: &str) -> f64 {
        text_similarity(a, b)
    }

    pub fn image_similarity(&self, a: &[u8], b: &[u8]) -> f64 {
        let Ok(model) = self.model() else {
            return 0.0;
        };
        match model.compare(a, b) {
            Ok(score) if score.is_finite() => score.clamp(0.0, 1.0),
            Ok(_) => 0.0,
            Err(e) => {
                debug!("Image comparison failed ({}): {}", model.name(), e);
                0.0
            }
        }
    }
}

#[cfg(test)]
#[path = "similarity_test.rs"]
mod similarity_test;
