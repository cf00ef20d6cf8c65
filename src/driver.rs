//! Page automation seam.
//!
//! The engine never talks to a browser directly; everything goes through
//! [`PageDriver`], so a WebDriver session and an in-memory test page are
//! interchangeable.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::ElementDescriptor;

/// Structural query for page nodes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    XPath(String),
    Css(String),
}

impl Query {
    pub fn xpath(expr: impl Into<String>) -> Self {
        Query::XPath(expr.into())
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Query::Css(selector.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Query::XPath(expr) | Query::Css(expr) => expr,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::XPath(expr) => write!(f, "xpath:{}", expr),
            Query::Css(selector) => write!(f, "css:{}", selector),
        }
    }
}

/// Where to scroll the window
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollTarget {
    Top,
    Bottom,
    /// Fraction of the document height, 0.5 being the middle
    Fraction(f64),
    /// Relative offset in pixels
    By(i64),
}

/// Automation driver consumed by the engine.
///
/// All methods take `&self`; implementations keep any mutable state behind
/// their own synchronization.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Opaque handle to a live node
    type Node: Clone + Send + Sync + 'static;

    async fn find_nodes(&self, query: &Query) -> Result<Vec<Self::Node>>;

    /// Fresh structural snapshot of a node
    async fn describe(&self, node: &Self::Node) -> Result<ElementDescriptor>;

    /// Displayed and enabled; any driver error counts as not live
    async fn is_live(&self, node: &Self::Node) -> bool {
        self.describe(node)
            .await
            .map(|d| d.displayed && d.enabled)
            .unwrap_or(false)
    }

    /// PNG bytes of the node's rendered box
    async fn screenshot(&self, node: &Self::Node) -> Result<Vec<u8>>;

    async fn click(&self, node: &Self::Node) -> Result<()>;

    async fn type_text(&self, node: &Self::Node, text: &str, clear: bool) -> Result<()>;

    /// Press Enter in the node
    async fn submit(&self, node: &Self::Node) -> Result<()>;

    async fn current_address(&self) -> Result<String>;

    async fn viewport_height(&self) -> Result<f64>;

    /// Positional XPath that re-locates the node from the document root
    async fn structural_path(&self, node: &Self::Node) -> Result<String>;

    async fn scroll(&self, target: ScrollTarget) -> Result<()>;

    async fn reload(&self) -> Result<()>;

    async fn goto(&self, url: &str) -> Result<()>;

    async fn is_page_ready(&self) -> bool;
}

/// Poll `predicate` until it holds or `timeout` elapses.
///
/// Returns `false` on timeout; the caller decides whether to continue degraded.
pub async fn wait_until<F, Fut>(timeout: Duration, poll: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}

#[cfg(test)]
#[path = "driver_test.rs"]
mod driver_test;
