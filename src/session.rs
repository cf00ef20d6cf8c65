//! Per-run resolution context.
//!
//! A [`Session`] owns everything that used to be process-global: the driver,
//! the resolution cache, the last-interaction memo and the per-run counters.
//! Scanning lives in `scanner.rs`, healing in `healer.rs`; both extend
//! `Session` with further `impl` blocks.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::ResolutionCache;
use crate::capture::{CaptureSummary, ReferenceCapture};
use crate::category::Category;
use crate::config::EngineConfig;
use crate::driver::{PageDriver, Query, ScrollTarget, wait_until};
use crate::errors::{ProbeError, ProbeResult};
use crate::learning::{ActionType, LearningStats, LearningStore};
use crate::recovery::{RecoveryContext, RecoveryManager, RecoveryOutcome, ResolveAndAct};
use crate::references::ReferenceStore;
use crate::scoring::is_overlay_control;
use crate::similarity::SimilarityService;
use crate::types::Candidate;

/// Pixels scrolled per progressive-scan step
pub const SCROLL_STEP_PX: i64 = 500;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Controls that can close a popup or cookie banner
pub const OVERLAY_QUERY: &str = "//button | //a | //div[@role='button'] | //span[@role='button']";
const MAX_OVERLAY_CLICKS: usize = 5;

/// What to do with a resolved node
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click,
    /// Clear the field, then type
    Type(String),
}

impl Action {
    pub fn action_type(&self) -> ActionType {
        match self {
            Action::Click => ActionType::Click,
            Action::Type(_) => ActionType::Type,
        }
    }
}

/// Counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Full candidate scans (cache misses)
    pub scans: usize,
    pub cache_hits: usize,
    pub heals: usize,
    /// Intents rescued by an alternative strategy
    pub recoveries: usize,
}

/// Last-interaction memo used by the loop guard and the proximity bonus
#[derive(Debug, Clone, Default)]
pub(crate) struct InteractionMemo {
    pub(crate) last_id: Option<String>,
    pub(crate) last_input_y: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub stats: SessionStats,
    pub learning: LearningStats,
    pub captures: CaptureSummary,
}

pub struct Session<D: PageDriver> {
    pub(crate) driver: D,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) similarity: SimilarityService,
    pub(crate) references: ReferenceStore,
    pub(crate) learning: LearningStore,
    pub(crate) capture: ReferenceCapture,
    pub(crate) cache: ResolutionCache<D::Node>,
    pub(crate) memo: InteractionMemo,
    pub(crate) stats: SessionStats,
}

impl<D: PageDriver> Session<D> {
    /// Open a session with the built-in pixel comparator
    pub fn new(driver: D, config: EngineConfig) -> Self {
        Self::with_similarity(driver, config, SimilarityService::default())
    }

    pub fn with_similarity(driver: D, config: EngineConfig, similarity: SimilarityService) -> Self {
        let references = ReferenceStore::new(config.references_dir());
        let learning = LearningStore::load(config.knowledge_file());
        let capture = ReferenceCapture::new(config.capture.clone());
        let cache = ResolutionCache::new(config.cache_ttl());
        info!(
            "Session ready (references: {}, visual model: {})",
            references.dir().display(),
            if similarity.is_model_available() {
                "loaded"
            } else {
                "unavailable"
            }
        );
        Self {
            driver,
            config: Arc::new(config),
            similarity,
            references,
            learning,
            capture,
            cache,
            memo: InteractionMemo::default(),
            stats: SessionStats::default(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn references(&self) -> &ReferenceStore {
        &self.references
    }

    pub fn learning(&self) -> &LearningStore {
        &self.learning
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Site key of the current page, `unknown` when the address is unavailable
    pub async fn site(&self) -> String {
        match self.driver.current_address().await {
            Ok(address) => self.config.site_key(&address),
            Err(e) => {
                debug!("Current address unavailable: {}", e);
                "unknown".to_string()
            }
        }
    }

    /// Navigate and start from a clean per-page state
    pub async fn goto(&mut self, url: &str) -> ProbeResult<()> {
        info!("Navigating to {}", url);
        self.driver.goto(url).await?;
        self.forget_page();
        if !self.wait_for_page_ready(self.config.page_ready_timeout()).await {
            warn!("Page not ready after {:?}, continuing", self.config.page_ready_timeout());
        }
        Ok(())
    }

    /// Drop cached winners and the interaction memo
    pub fn forget_page(&mut self) {
        let dropped = self.cache.clear();
        if dropped > 0 {
            debug!("Cleared {} cached resolutions", dropped);
        }
        self.memo = InteractionMemo::default();
    }

    /// Resolve, then act on the winner.
    ///
    /// On success the winner is recorded in the learning store and its crop
    /// offered to reference capture with the visual score as confidence.
    pub async fn interact(
        &mut self,
        category: Category,
        hint: Option<&str>,
        action: &Action,
    ) -> ProbeResult<Candidate<D::Node>> {
        let candidate = self.resolve(category, hint).await?;
        let site = self.site().await;

        // Taken before acting: a click may navigate away from the node
        let crop = if self.capture.should_capture(candidate.score.visual, category) {
            self.driver.screenshot(&candidate.node).await.ok()
        } else {
            None
        };

        if let Err(e) = self.perform(category, &candidate, action).await {
            warn!("{} on {} failed: {}", category, candidate.descriptor.identifier(), e);
            if let Ok(address) = self.driver.current_address().await {
                self.cache.invalidate(category, &address);
            }
            if !self.driver.is_live(&candidate.node).await {
                return Err(ProbeError::StaleReference {
                    target: target_label(category, hint),
                });
            }
            return Err(e.into());
        }

        self.learning.record_success(
            &site,
            category,
            &candidate.descriptor,
            action.action_type(),
            candidate.final_score(),
        );
        if let Some(crop) = crop {
            self.capture.capture_bytes(
                &crop,
                category,
                &site,
                candidate.score.visual,
                &self.references,
                &self.similarity,
            );
        }
        Ok(candidate)
    }

    async fn perform(
        &mut self,
        category: Category,
        candidate: &Candidate<D::Node>,
        action: &Action,
    ) -> anyhow::Result<()> {
        match action {
            Action::Click => {
                self.driver.click(&candidate.node).await?;
                info!("Clicked {}", candidate.descriptor.identifier());
                self.memo.last_id = Some(candidate.descriptor.id.clone()).filter(|id| !id.is_empty());
            }
            Action::Type(text) => {
                self.driver.type_text(&candidate.node, text, true).await?;
                info!("Typed into {}", candidate.descriptor.identifier());
                if category == Category::Search {
                    // Submitting leaves the page, so there is no form to follow
                    self.driver.submit(&candidate.node).await?;
                    self.memo.last_input_y = None;
                } else {
                    self.memo.last_input_y = Some(candidate.descriptor.y);
                }
            }
        }
        Ok(())
    }

    /// Click the element for `hint`, inferring its category from the text
    pub async fn click_intent(&mut self, hint: &str) -> ProbeResult<()> {
        let category = Category::detect(hint);
        if category != Category::Button {
            debug!("'{}' detected as {}", hint, category);
        }
        self.click(category, Some(hint)).await
    }

    /// Click with recovery for intents that have alternative strategies
    pub async fn click(&mut self, category: Category, hint: Option<&str>) -> ProbeResult<()> {
        let recoverable = category.is_recoverable() && category != Category::Search;
        self.act(category, hint, Action::Click, recoverable).await
    }

    /// Type into a text-entry category; search gets recovery
    pub async fn type_intent(&mut self, category: Category, text: &str) -> ProbeResult<()> {
        let hint = category.default_hint();
        self.act(
            category,
            Some(hint),
            Action::Type(text.to_string()),
            category == Category::Search,
        )
        .await
    }

    async fn act(
        &mut self,
        category: Category,
        hint: Option<&str>,
        action: Action,
        recoverable: bool,
    ) -> ProbeResult<()> {
        if !recoverable {
            return match self.interact(category, hint, &action).await {
                Ok(_) => Ok(()),
                Err(e) => {
                    if e.is_miss() {
                        let site = self.site().await;
                        self.learning.record_failure(&site, category);
                    }
                    Err(e)
                }
            };
        }

        let context = RecoveryContext::for_action(&action);
        let primary = ResolveAndAct::new(category, hint, action);
        let manager = RecoveryManager::new(Duration::from_millis(self.config.recovery.pause_ms));
        let strategies = RecoveryManager::strategies_for::<D>(category, &context);

        match manager
            .attempt_with_strategies(self, category, &primary, &strategies)
            .await
        {
            Ok(RecoveryOutcome::Primary) => Ok(()),
            Ok(RecoveryOutcome::Recovered { strategy, .. }) => {
                info!("{} recovered via {}", category, strategy);
                self.stats.recoveries += 1;
                Ok(())
            }
            Err(e) => {
                let site = self.site().await;
                self.learning.record_failure(&site, category);
                Err(e)
            }
        }
    }

    /// Best-effort click on cookie and campaign dismiss controls.
    ///
    /// Returns how many were clicked; failures are logged and skipped.
    pub async fn dismiss_overlays(&mut self) -> usize {
        let nodes = match self.driver.find_nodes(&Query::xpath(OVERLAY_QUERY)).await {
            Ok(nodes) => nodes,
            Err(e) => {
                debug!("Overlay query failed: {}", e);
                return 0;
            }
        };

        let mut dismissed = 0;
        for node in nodes {
            if dismissed >= MAX_OVERLAY_CLICKS {
                break;
            }
            let descriptor = match self.driver.describe(&node).await {
                Ok(descriptor) => descriptor,
                Err(_) => continue,
            };
            if !is_overlay_control(&descriptor) {
                continue;
            }
            match self.driver.click(&node).await {
                Ok(()) => {
                    info!("Dismissed overlay via {}", descriptor.identifier());
                    dismissed += 1;
                    tokio::time::sleep(Duration::from_millis(self.config.recovery.settle_ms)).await;
                }
                Err(e) => debug!("Overlay control {} not clickable: {}", descriptor.identifier(), e),
            }
        }
        if dismissed > 0 {
            // Closed popups may have covered or replaced cached winners
            self.forget_page();
        }
        dismissed
    }

    /// Resolve, scrolling one step down after each miss, for lazily loaded pages
    pub async fn resolve_with_scrolling(
        &mut self,
        category: Category,
        hint: Option<&str>,
        steps: usize,
    ) -> ProbeResult<Candidate<D::Node>> {
        let mut step = 0;
        loop {
            match self.resolve(category, hint).await {
                Ok(candidate) => return Ok(candidate),
                Err(e) if e.is_miss() && step < steps => {
                    step += 1;
                    info!("{} not found, scrolling ({}/{})", category, step, steps);
                    self.driver.scroll(ScrollTarget::By(SCROLL_STEP_PX)).await?;
                    tokio::time::sleep(Duration::from_millis(self.config.recovery.settle_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Soft wait: `false` on timeout
    pub async fn wait_for_page_ready(&self, timeout: Duration) -> bool {
        let driver = &self.driver;
        wait_until(timeout, POLL_INTERVAL, move || driver.is_page_ready()).await
    }

    /// Soft wait for the address to differ from the current one
    pub async fn wait_for_address_change(&self, timeout: Duration) -> bool {
        let driver = &self.driver;
        let before = match driver.current_address().await {
            Ok(address) => address,
            Err(e) => {
                debug!("Current address unavailable: {}", e);
                return false;
            }
        };
        let before = before.as_str();
        wait_until(timeout, POLL_INTERVAL, move || async move {
            driver
                .current_address()
                .await
                .is_ok_and(|address| address != before)
        })
        .await
    }

    /// Persist the learning store and report the run
    pub async fn finish(&mut self) -> ProbeResult<SessionSummary> {
        if let Err(e) = self.learning.save() {
            warn!("Knowledge store not saved: {}", e);
            return Err(e);
        }
        let summary = SessionSummary {
            stats: self.stats,
            learning: self.learning.stats(),
            captures: self.capture.summary(),
        };
        info!(
            "Session finished: {} scans, {} cache hits, {} heals, {} recoveries",
            summary.stats.scans,
            summary.stats.cache_hits,
            summary.stats.heals,
            summary.stats.recoveries
        );
        Ok(summary)
    }

    /// Hand the driver back, e.g. to close the browser
    pub fn into_driver(self) -> D {
        self.driver
    }
}

/// Target label used in miss reports
pub(crate) fn target_label(category: Category, hint: Option<&str>) -> String {
    match hint {
        Some(hint) if !hint.is_empty() => format!("{} '{}'", category, hint),
        _ => category.to_string(),
    }
}

