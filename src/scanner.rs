//! Candidate scanning: query, filter, score, rank and cache.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::category::Category;
use crate::driver::{PageDriver, Query};
use crate::errors::{ProbeError, ProbeResult};
use crate::references::Provenance;
use crate::scoring::{
    Components, candidate_semantic, fuse, is_acceptable, location_score, proximity_bonus,
    tag_score,
};
use crate::session::{Session, target_label};
use crate::types::{Candidate, ElementDescriptor};

impl<D: PageDriver> Session<D> {
    /// Map a category to the best live node on the current page.
    ///
    /// A live cached winner for the same hint and page is returned without
    /// rescanning, unless the loop guard now rules it out.
    /// Per-node failures drop that node; the call fails with `NotFound` only
    /// when nothing survives filtering.
    pub async fn resolve(
        &mut self,
        category: Category,
        hint: Option<&str>,
    ) -> ProbeResult<Candidate<D::Node>> {
        let address = self.driver.current_address().await?;
        if let Some(hit) = self.cached_candidate(category, hint, &address).await {
            return Ok(hit);
        }

        self.stats.scans += 1;
        let config = Arc::clone(&self.config);
        let scan = &config.scan;

        let nodes = self.query_candidates(category).await?;
        info!("Scanning {} nodes for {}", nodes.len(), target_label(category, hint));

        let viewport_height = self.driver.viewport_height().await.unwrap_or_else(|e| {
            debug!("Viewport height unavailable: {}", e);
            0.0
        });
        let site = config.site_key(&address);
        let references =
            self.load_references(category, Provenance::Curated, scan.references_per_candidate);
        let prefer_learned = self.learning.should_prefer_learned(&site, category);

        let mut candidates = Vec::new();
        let mut analysed = 0;
        for node in nodes {
            let descriptor = match self.driver.describe(&node).await {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    debug!("Skipping node: {}", e);
                    continue;
                }
            };
            if let Some(reason) = self.skip_reason(category, &descriptor) {
                debug!("Skipping {}: {}", descriptor.identifier(), reason);
                continue;
            }

            let location = location_score(category, descriptor.y, viewport_height);
            let tag = tag_score(category, &descriptor);
            let semantic = candidate_semantic(category, hint, &descriptor);

            let visual = if semantic >= scan.strong_semantic {
                scan.neutral_visual
            } else if references.is_empty() {
                0.0
            } else if !self.similarity.is_model_available()
                || analysed >= scan.visual_candidate_cap
            {
                scan.visual_fallback
            } else {
                analysed += 1;
                self.visual_score(&node, &references)
                    .await
                    .unwrap_or(scan.visual_fallback)
            };

            let mut bonus = 0.0;
            if category.is_click_like() {
                bonus += proximity_bonus(descriptor.y, self.memo.last_input_y);
            }
            if prefer_learned && self.learning.is_learned(&site, category, &descriptor) {
                debug!("{} matches a learned fingerprint", descriptor.identifier());
                bonus += scan.learned_boost;
            }

            let score = fuse(
                Components {
                    visual,
                    semantic,
                    location,
                    tag,
                },
                category.weights(),
                bonus,
                &config.tiers,
            );
            if !is_acceptable(category, &descriptor.tag, score.final_score, config.default_min_score) {
                debug!("Rejected {} {}", descriptor.identifier(), score);
                continue;
            }
            debug!("Candidate {} {}", descriptor.identifier(), score);
            candidates.push(Candidate {
                node,
                category,
                descriptor,
                score,
                from_cache: false,
            });
        }

        if candidates.is_empty() {
            warn!("No acceptable candidate for {}", target_label(category, hint));
            return Err(ProbeError::not_found(
                target_label(category, hint),
                "no candidate survived filtering",
            ));
        }

        rank(&mut candidates);
        if candidates[0].final_score() < scan.secondary_threshold {
            self.secondary_pass(category, &mut candidates).await;
        }

        for (i, c) in candidates.iter().take(3).enumerate() {
            debug!("#{} {} {}", i + 1, c.descriptor.identifier(), c.score);
        }
        let winner = candidates.swap_remove(0);
        info!(
            "Resolved {} -> {} {}",
            category,
            winner.descriptor.identifier(),
            winner.score
        );
        self.cache
            .insert(category, hint, &address, winner.node.clone(), winner.score);
        Ok(winner)
    }

    /// The cached winner if it is still displayed, enabled and not filtered
    /// out; other entries are dropped
    async fn cached_candidate(
        &mut self,
        category: Category,
        hint: Option<&str>,
        address: &str,
    ) -> Option<Candidate<D::Node>> {
        let entry = self.cache.lookup(category, hint, address)?;
        if self.driver.is_live(&entry.node).await {
            match self.driver.describe(&entry.node).await {
                Ok(descriptor) => {
                    if let Some(reason) = self.skip_reason(category, &descriptor) {
                        debug!("Cached {} dropped: {}", descriptor.identifier(), reason);
                        self.cache.invalidate(category, address);
                        return None;
                    }
                    self.stats.cache_hits += 1;
                    info!("Cache hit for {} ({})", category, descriptor.identifier());
                    return Some(Candidate {
                        node: entry.node,
                        category,
                        descriptor,
                        score: entry.score,
                        from_cache: true,
                    });
                }
                Err(e) => debug!("Cached {} lost: {}", category, e),
            }
        }
        debug!("Cached {} is stale, rescanning", category);
        self.cache.invalidate(category, address);
        None
    }

    /// First non-empty narrow query, else the wide query for the element class
    async fn query_candidates(&self, category: Category) -> ProbeResult<Vec<D::Node>> {
        for expr in category.narrow_queries() {
            match self.driver.find_nodes(&Query::xpath(*expr)).await {
                Ok(nodes) if !nodes.is_empty() => {
                    debug!("Narrow query {} matched {} nodes", expr, nodes.len());
                    return Ok(nodes);
                }
                Ok(_) => {}
                Err(e) => debug!("Narrow query {} failed: {}", expr, e),
            }
        }
        let wide = category.element_class().xpath();
        debug!("Falling back to wide query for {}", category);
        Ok(self.driver.find_nodes(&Query::xpath(wide)).await?)
    }

    fn skip_reason(&self, category: Category, descriptor: &ElementDescriptor) -> Option<&'static str> {
        let scan = &self.config.scan;
        if !descriptor.displayed {
            return Some("not displayed");
        }
        if !descriptor.is_big_enough(scan.min_width, scan.min_height) {
            return Some("too small");
        }
        if category.is_click_like()
            && !descriptor.id.is_empty()
            && self.memo.last_id.as_deref() == Some(descriptor.id.as_str())
        {
            return Some("previous interaction target");
        }
        if category == Category::Password && descriptor.value.chars().count() > 3 {
            return Some("already filled");
        }
        None
    }

    /// Best similarity of the node's crop against the references, `None` if it
    /// cannot be captured
    async fn visual_score(&self, node: &D::Node, references: &[Vec<u8>]) -> Option<f64> {
        let crop = match self.driver.screenshot(node).await {
            Ok(crop) => crop,
            Err(e) => {
                debug!("Screenshot failed: {}", e);
                return None;
            }
        };
        let mut best = 0.0_f64;
        for reference in references {
            best = best.max(self.similarity.image_similarity(reference, &crop));
            if best > self.config.scan.visual_early_exit {
                break;
            }
        }
        Some(best)
    }

    /// Bytes of the newest references, unreadable files skipped
    pub(crate) fn load_references(
        &self,
        category: Category,
        provenance: Provenance,
        limit: usize,
    ) -> Vec<Vec<u8>> {
        let images = match self.references.recent(category, provenance, limit) {
            Ok(images) => images,
            Err(e) => {
                debug!("Reference pool unavailable: {}", e);
                return Vec::new();
            }
        };
        images
            .iter()
            .filter_map(|image| self.references.read(image).ok())
            .collect()
    }

    /// Re-score the leaders against auto-captured references; improvements
    /// raise the final score by a share of the visual gain
    async fn secondary_pass(&self, category: Category, candidates: &mut [Candidate<D::Node>]) {
        let scan = &self.config.scan;
        if !self.similarity.is_model_available() {
            return;
        }
        let pool = self.load_references(category, Provenance::Auto, scan.secondary_references);
        if pool.is_empty() {
            return;
        }
        info!(
            "Top score {:.2} below {:.2}, re-scoring against {} auto references",
            candidates[0].final_score(),
            scan.secondary_threshold,
            pool.len()
        );

        for candidate in candidates.iter_mut().take(scan.secondary_candidates) {
            let Some(visual) = self.visual_score(&candidate.node, &pool).await else {
                continue;
            };
            if visual <= candidate.score.visual {
                continue;
            }
            let boost = (visual - candidate.score.visual) * scan.secondary_boost;
            let score = &mut candidate.score;
            score.visual = visual;
            score.bonus += boost;
            score.final_score = (score.final_score + boost).clamp(0.0, 1.0);
            score.confidence_tier = self.config.tiers.classify(score.final_score);
            debug!("Re-scored {} {}", candidate.descriptor.identifier(), candidate.score);
        }
        rank(candidates);
    }
}

/// Highest final score first; ties keep document order
fn rank<N>(candidates: &mut [Candidate<N>]) {
    candidates.sort_by(|a, b| b.final_score().total_cmp(&a.final_score()));
}
