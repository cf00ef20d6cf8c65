//! # intentprobe
#![allow(clippy::uninlined_format_args)]
//!
//! Resolves abstract UI intents ("email field", "add to cart button") to live
//! page elements, without hand-written selectors.
//!
//! Every candidate node is scored on four signals: visual similarity to
//! reference crops, keyword semantics of its text, its position on screen and
//! the shape of its tag. The fused score picks the winner. Around that core sit
//! a per-page resolution cache, visual healing of durable locators,
//! alternative recovery strategies, a persistent learning store and
//! opportunistic capture of new reference crops.
//!
//! ## CLI Usage
//!
//! ```bash
//! # Resolve an intent and print the winning element with its score breakdown
//! intentprobe resolve "https://www.n11.com" search
//!
//! # Resolve and act on it
//! intentprobe resolve "https://www.n11.com" search --type "laptop"
//! intentprobe resolve "https://www.n11.com/urun/123" add_to_cart --click
//!
//! # Durable lookup by CSS with visual healing when the selector breaks
//! intentprobe heal "https://example.com/login" login-button "button#login"
//!
//! # What the learning store knows, and which reference crops exist
//! intentprobe knowledge --site n11
//! intentprobe references --category email
//! ```
//!
//! Logs go to stderr (`RUST_LOG=intentprobe=debug` for scoring detail); results
//! go to stdout as JSON unless `--format simple` is given.
//!
//! ## Library Usage
//!
//! ```no_run
//! use intentprobe::{Browser, BrowserOptions, BrowserType, Category, EngineConfig, Session};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let browser = Browser::connect(&BrowserOptions::new(BrowserType::Firefox)).await?;
//! let mut session = Session::new(browser, EngineConfig::default());
//!
//! session.goto("https://www.n11.com").await?;
//! session.type_intent(Category::Search, "laptop").await?;
//! session.click_intent("Sepete Ekle").await?;
//!
//! let summary = session.finish().await?;
//! println!("{} scans, {} cache hits", summary.stats.scans, summary.stats.cache_hits);
//! session.into_driver().close().await?;
//! # Ok(())
//! # }
//! ```

/// Resolution cache keyed by category and page
pub mod cache;

/// Opportunistic harvesting of reference crops
pub mod capture;

/// Closed set of UI intents and their heuristic profiles
pub mod category;

/// Engine configuration
pub mod config;

/// Page automation seam
pub mod driver;

/// Error taxonomy
pub mod errors;

/// Visual healing of durable locators
pub mod healer;

/// Persistent knowledge of what worked per site
pub mod learning;

/// Alternative strategies when the primary resolution fails
pub mod recovery;

/// Unified reference image repository
pub mod references;

/// Candidate scanning and ranking
pub mod scanner;

/// Component scores and fusion
pub mod scoring;

/// Per-run resolution context
pub mod session;

/// Text and image similarity
pub mod similarity;

/// Shared data types
pub mod types;

/// WebDriver browser implementation of the driver seam
pub mod webdriver;

pub use category::{Category, CategoryWeights, KeywordGroup};
pub use config::EngineConfig;
pub use driver::{PageDriver, Query, ScrollTarget, wait_until};
pub use errors::{ProbeError, ProbeResult};
pub use healer::HEALING_POOL_XPATH;
pub use learning::{ActionType, Fingerprint, KnowledgeRecord, LearningStats, LearningStore};
pub use recovery::{
    RecoveryContext, RecoveryManager, RecoveryOutcome, RecoveryStrategy, ResolveAndAct,
};
pub use references::{Provenance, ReferenceImage, ReferenceStore, Subject};
pub use session::{Action, Session, SessionStats, SessionSummary};
pub use similarity::{PixelComparator, SimilarityService, VisualModel};
pub use types::{
    Candidate, ConfidenceTier, ElementDescriptor, OutputFormat, ScoreBreakdown, ViewportSize,
};
pub use webdriver::{Browser, BrowserOptions, BrowserType};
