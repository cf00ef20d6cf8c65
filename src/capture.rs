//! Opportunistic harvesting of reference crops.
//!
//! Moderately confident resolutions are the useful training signal: low scores
//! may be wrong and near-perfect ones add nothing. Every failure here is a
//! silent no-op so capture can never break the caller's action.

use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::category::Category;
use crate::config::CaptureConfig;
use crate::driver::PageDriver;
use crate::errors::ProbeResult;
use crate::references::{Provenance, ReferenceImage, ReferenceStore, Subject};
use crate::similarity::SimilarityService;

/// One crop stored during this session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    pub file: PathBuf,
    pub category: Category,
    pub site: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSummary {
    pub total_captured: usize,
    pub per_category: BTreeMap<Category, usize>,
    pub captures: Vec<CaptureRecord>,
}

#[derive(Debug)]
pub struct ReferenceCapture {
    config: CaptureConfig,
    captures: Vec<CaptureRecord>,
}

impl ReferenceCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            captures: Vec::new(),
        }
    }

    /// Inside `[min, max)` and a priority category
    pub fn should_capture(&self, confidence: f64, category: Category) -> bool {
        confidence >= self.config.min_confidence
            && confidence < self.config.max_confidence
            && category.is_capture_priority()
    }

    /// Resize to the capture size and flatten transparency over white, as PNG
    pub fn normalize(&self, screenshot: &[u8]) -> ProbeResult<Vec<u8>> {
        let side = self.config.size.max(1);
        let rgba = image::load_from_memory(screenshot)?
            .resize_exact(side, side, FilterType::Lanczos3)
            .to_rgba8();

        let flat = RgbImage::from_fn(side, side, |x, y| {
            let [r, g, b, a] = rgba.get_pixel(x, y).0;
            let alpha = u16::from(a);
            let blend = |c: u8| ((u16::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
            Rgb([blend(r), blend(g), blend(b)])
        });

        let mut png = Vec::new();
        DynamicImage::ImageRgb8(flat).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(png)
    }

    /// Near-identical to one of the most recent auto crops of the category
    pub fn is_duplicate(
        &self,
        normalized: &[u8],
        category: Category,
        store: &ReferenceStore,
        similarity: &SimilarityService,
    ) -> bool {
        let recent = match store.recent(category, Provenance::Auto, self.config.duplicate_window) {
            Ok(recent) => recent,
            Err(e) => {
                debug!("Duplicate check skipped: {}", e);
                return false;
            }
        };
        recent.iter().any(|existing| {
            let Ok(bytes) = store.read(existing) else {
                return false;
            };
            let score = similarity.image_similarity(normalized, &bytes);
            if score > self.config.duplicate_threshold {
                debug!(
                    "Duplicate of {} ({:.0}% similar), not stored",
                    existing.path.display(),
                    score * 100.0
                );
                true
            } else {
                false
            }
        })
    }

    /// Store a screenshot as an auto reference if it is worth keeping
    pub fn capture_bytes(
        &mut self,
        screenshot: &[u8],
        category: Category,
        site: &str,
        confidence: f64,
        store: &ReferenceStore,
        similarity: &SimilarityService,
    ) -> Option<ReferenceImage> {
        if !self.should_capture(confidence, category) {
            return None;
        }

        let normalized = match self.normalize(screenshot) {
            Ok(png) => png,
            Err(e) => {
                debug!("Capture skipped, screenshot unusable: {}", e);
                return None;
            }
        };
        if self.is_duplicate(&normalized, category, store, similarity) {
            return None;
        }

        match store.save(
            &Subject::Category(category),
            Provenance::Auto,
            site,
            confidence,
            &normalized,
        ) {
            Ok(image) => {
                info!(
                    "Captured {} reference from {} ({:.0}%)",
                    category,
                    site,
                    confidence * 100.0
                );
                self.captures.push(CaptureRecord {
                    file: image.path.clone(),
                    category,
                    site: site.to_string(),
                    confidence,
                    timestamp: Utc::now(),
                });
                Some(image)
            }
            Err(e) => {
                debug!("Capture not stored: {}", e);
                None
            }
        }
    }

    /// Screenshot a live node and hand it to [`capture_bytes`](Self::capture_bytes)
    #[allow(clippy::too_many_arguments)]
    pub async fn capture_if_worthy<D: PageDriver>(
        &mut self,
        driver: &D,
        node: &D::Node,
        category: Category,
        site: &str,
        confidence: f64,
        store: &ReferenceStore,
        similarity: &SimilarityService,
    ) -> Option<ReferenceImage> {
        if !self.should_capture(confidence, category) {
            return None;
        }
        let screenshot = match driver.screenshot(node).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Capture skipped, screenshot failed: {}", e);
                return None;
            }
        };
        self.capture_bytes(&screenshot, category, site, confidence, store, similarity)
    }

    pub fn summary(&self) -> CaptureSummary {
        let mut per_category = BTreeMap::new();
        for capture in &self.captures {
            *per_category.entry(capture.category).or_insert(0) += 1;
        }
        CaptureSummary {
            total_captured: self.captures.len(),
            per_category,
            captures: self.captures.clone(),
        }
    }
}

#[cfg(test)]
#[path = "capture_test.rs"]
mod capture_test;
