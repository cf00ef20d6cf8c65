//! Visual healing of durable locators.
//!
//! A named element found through its fixed query gets its screenshot stored
//! as the golden reference the first time. When the query later stops
//! matching, the page is searched for the node that looks most like that
//! golden image.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::driver::{PageDriver, Query, wait_until};
use crate::errors::{ProbeError, ProbeResult};
use crate::references::{Provenance, Subject};
use crate::session::Session;

/// Clickable and input-like nodes across the whole page
pub const HEALING_POOL_XPATH: &str = "//button | //input | //a | //div[@role='button']";

const LOCATE_POLL: Duration = Duration::from_millis(250);

impl<D: PageDriver> Session<D> {
    /// Relocate a named element by visual similarity to its golden reference
    pub async fn heal_locator(&mut self, name: &str) -> ProbeResult<D::Node> {
        let golden = self
            .references
            .golden(name)?
            .ok_or_else(|| ProbeError::MissingReference {
                name: name.to_string(),
            })?;
        let golden_bytes = self.references.read(&golden)?;
        let healing = self.config.healing.clone();

        info!("Healing '{}' against {}", name, golden.path.display());
        let pool = self
            .driver
            .find_nodes(&Query::xpath(HEALING_POOL_XPATH))
            .await?;

        let mut best: Option<(f64, D::Node)> = None;
        for node in pool {
            let descriptor = match self.driver.describe(&node).await {
                Ok(d) if d.displayed && d.is_big_enough(healing.min_width, healing.min_height) => d,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Skipping node: {}", e);
                    continue;
                }
            };
            let crop = match self.driver.screenshot(&node).await {
                Ok(crop) => crop,
                Err(e) => {
                    debug!("Screenshot of {} failed: {}", descriptor.identifier(), e);
                    continue;
                }
            };
            let similarity = self.similarity.image_similarity(&golden_bytes, &crop);
            if best.as_ref().is_none_or(|(score, _)| similarity > *score) {
                best = Some((similarity, node));
            }
        }

        let (score, node) = match best {
            Some((score, node)) if score >= healing.threshold => (score, node),
            Some((score, _)) => {
                warn!(
                    "Best match for '{}' is {:.2}, below {:.2}",
                    name, score, healing.threshold
                );
                return Err(ProbeError::not_found(
                    name,
                    format!(
                        "best visual match {:.2} below healing threshold {:.2}",
                        score, healing.threshold
                    ),
                ));
            }
            None => {
                return Err(ProbeError::not_found(name, "no visible candidate to compare"));
            }
        };

        info!("Healed '{}' with similarity {:.2}", name, score);
        self.stats.heals += 1;
        Ok(self.refresh_handle(node).await)
    }

    /// Re-find the node through its positional path; keep the old handle if that fails
    async fn refresh_handle(&self, node: D::Node) -> D::Node {
        let path = match self.driver.structural_path(&node).await {
            Ok(path) => path,
            Err(e) => {
                debug!("No structural path for healed node: {}", e);
                return node;
            }
        };
        match self.driver.find_nodes(&Query::xpath(path.as_str())).await {
            Ok(nodes) => nodes.into_iter().next().unwrap_or(node),
            Err(e) => {
                debug!("Re-locating {} failed: {}", path, e);
                node
            }
        }
    }

    /// Durable lookup: the fixed query first, healing when it stops matching
    pub async fn find_named(&mut self, name: &str, query: &Query) -> ProbeResult<D::Node> {
        let timeout = Duration::from_millis(self.config.healing.locate_timeout_ms);
        let driver = &self.driver;
        let visible = wait_until(timeout, LOCATE_POLL, move || async move {
            first_visible(driver, query).await.is_some()
        })
        .await;

        if visible && let Some(node) = first_visible(&self.driver, query).await {
            debug!("'{}' found by {}", name, query);
            self.store_golden(name, &node).await;
            return Ok(node);
        }

        warn!("'{}' not found by {}, trying visual healing", name, query);
        self.heal_locator(name).await
    }

    /// Keep the first known-good crop of a named element
    async fn store_golden(&self, name: &str, node: &D::Node) {
        match self.references.golden(name) {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => {
                debug!("Golden lookup for '{}' failed: {}", name, e);
                return;
            }
        }
        let healing = &self.config.healing;
        match self.driver.describe(node).await {
            Ok(d) if d.displayed && d.is_big_enough(healing.min_width, healing.min_height) => {}
            _ => return,
        }
        let crop = match self.driver.screenshot(node).await {
            Ok(crop) => crop,
            Err(e) => {
                debug!("Golden screenshot for '{}' failed: {}", name, e);
                return;
            }
        };
        let site = self.site().await;
        match self
            .references
            .save(&Subject::named(name), Provenance::Golden, &site, 1.0, &crop)
        {
            Ok(image) => info!("Stored golden reference {}", image.path.display()),
            Err(e) => debug!("Golden reference for '{}' not stored: {}", name, e),
        }
    }
}

async fn first_visible<D: PageDriver>(driver: &D, query: &Query) -> Option<D::Node> {
    let nodes = driver.find_nodes(query).await.ok()?;
    for node in nodes {
        if driver.describe(&node).await.is_ok_and(|d| d.displayed) {
            return Some(node);
        }
    }
    None
}
