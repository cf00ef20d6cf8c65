//! Alternative strategies for intents whose primary resolution failed.
//!
//! The manager runs the primary attempt, then each strategy in order with a
//! short pause between them, and stops at the first success. A strategy
//! error only fails that strategy. Strategies act through
//! [`Session::interact`], never through the recovering entry points, so
//! recovery cannot re-enter itself.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::category::Category;
use crate::driver::{PageDriver, ScrollTarget};
use crate::errors::{ProbeError, ProbeResult};
use crate::session::{Action, Session};

/// Intent-specific parameters for building strategies
#[derive(Debug, Clone)]
pub struct RecoveryContext {
    pub action: Action,
    pub search_term: Option<String>,
    /// Resolve direct navigation against this address instead of the current page
    pub base_url: Option<String>,
}

impl RecoveryContext {
    pub fn for_action(action: &Action) -> Self {
        let search_term = match action {
            Action::Type(text) => Some(text.clone()),
            Action::Click => None,
        };
        Self {
            action: action.clone(),
            search_term,
            base_url: None,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// One way of achieving an intent.
///
/// `Ok(false)` and `Err` both mean this strategy failed; the manager moves on.
#[async_trait]
pub trait RecoveryStrategy<D: PageDriver>: Send + Sync {
    fn name(&self) -> String;

    async fn attempt(&self, session: &mut Session<D>) -> anyhow::Result<bool>;
}

/// Resolve a category and act on it
#[derive(Debug, Clone)]
pub struct ResolveAndAct {
    pub category: Category,
    pub hint: Option<String>,
    pub action: Action,
}

impl ResolveAndAct {
    pub fn new(category: Category, hint: Option<&str>, action: Action) -> Self {
        Self {
            category,
            hint: hint.map(str::to_string),
            action,
        }
    }

    /// Click whatever the phrase describes, with the category inferred from it
    pub fn click_phrase(phrase: &str) -> Self {
        Self::new(Category::detect(phrase), Some(phrase), Action::Click)
    }

    fn describe(&self) -> String {
        let verb = match self.action {
            Action::Click => "click",
            Action::Type(_) => "type into",
        };
        match &self.hint {
            Some(hint) => format!("{} {} '{}'", verb, self.category, hint),
            None => format!("{} {}", verb, self.category),
        }
    }

    async fn run<D: PageDriver>(&self, session: &mut Session<D>) -> anyhow::Result<bool> {
        match session
            .interact(self.category, self.hint.as_deref(), &self.action)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_miss() => {
                debug!("{}: {}", self.describe(), e);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<D: PageDriver> RecoveryStrategy<D> for ResolveAndAct {
    fn name(&self) -> String {
        self.describe()
    }

    async fn attempt(&self, session: &mut Session<D>) -> anyhow::Result<bool> {
        self.run(session).await
    }
}

/// Scroll the window, let the page settle, then retry
#[derive(Debug, Clone)]
pub struct ScrollThenRetry {
    pub target: ScrollTarget,
    pub then: ResolveAndAct,
}

#[async_trait]
impl<D: PageDriver> RecoveryStrategy<D> for ScrollThenRetry {
    fn name(&self) -> String {
        format!("scroll to {:?}, then {}", self.target, self.then.describe())
    }

    async fn attempt(&self, session: &mut Session<D>) -> anyhow::Result<bool> {
        session.driver.scroll(self.target).await?;
        tokio::time::sleep(Duration::from_millis(session.config.recovery.settle_ms)).await;
        self.then.run(session).await
    }
}

/// Reload the page, drop per-page state, then retry
#[derive(Debug, Clone)]
pub struct ReloadThenRetry {
    pub then: ResolveAndAct,
}

#[async_trait]
impl<D: PageDriver> RecoveryStrategy<D> for ReloadThenRetry {
    fn name(&self) -> String {
        format!("reload, then {}", self.then.describe())
    }

    async fn attempt(&self, session: &mut Session<D>) -> anyhow::Result<bool> {
        session.driver.reload().await?;
        session.forget_page();
        tokio::time::sleep(Duration::from_millis(session.config.recovery.settle_ms)).await;
        self.then.run(session).await
    }
}

/// Well-known page of the current site
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    Cart,
    Login,
    Search(String),
}

/// Navigate straight to a site's well-known address and verify the landing path
#[derive(Debug, Clone)]
pub struct NavigateDirect {
    pub destination: Destination,
    pub base_url: Option<String>,
}

impl NavigateDirect {
    pub fn new(destination: Destination, base_url: Option<&str>) -> Self {
        Self {
            destination,
            base_url: base_url.map(str::to_string),
        }
    }
}

/// Path part of a site template, with `{query}` filled in
fn fill_template(template: &str, query: Option<&str>) -> String {
    match query {
        Some(query) => {
            let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
            template.replace("{query}", &encoded)
        }
        None => template.to_string(),
    }
}

#[async_trait]
impl<D: PageDriver> RecoveryStrategy<D> for NavigateDirect {
    fn name(&self) -> String {
        match &self.destination {
            Destination::Cart => "navigate to the cart page".to_string(),
            Destination::Login => "navigate to the login page".to_string(),
            Destination::Search(term) => format!("navigate to search results for '{}'", term),
        }
    }

    async fn attempt(&self, session: &mut Session<D>) -> anyhow::Result<bool> {
        let base = match &self.base_url {
            Some(base) => base.clone(),
            None => session.driver.current_address().await?,
        };
        let Some(site) = session.config.site_for(&base).cloned() else {
            debug!("No site profile for {}", base);
            return Ok(false);
        };
        let (template, query) = match &self.destination {
            Destination::Cart => (site.cart_path, None),
            Destination::Login => (site.login_path, None),
            Destination::Search(term) => (site.search_path, Some(term.as_str())),
        };
        let Some(template) = template else {
            debug!("Site {} has no address for this page", site.name);
            return Ok(false);
        };

        let target = Url::parse(&base)?.join(&fill_template(&template, query))?;
        session.goto(target.as_str()).await?;

        let expected = template.split('?').next().unwrap_or(&template).to_string();
        let landed = Url::parse(&session.driver.current_address().await?)?;
        let ok = landed.path().starts_with(&expected);
        if !ok {
            debug!("Landed on {} instead of {}", landed, expected);
        }
        Ok(ok)
    }
}

/// How an intent was achieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Primary,
    /// `position` is 1-based within the strategy list
    Recovered { strategy: String, position: usize },
}

#[derive(Debug, Clone)]
pub struct RecoveryManager {
    pause: Duration,
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl RecoveryManager {
    pub fn new(pause: Duration) -> Self {
        Self { pause }
    }

    /// Ordered alternatives for an intent; intents without any get an empty list
    pub fn strategies_for<D: PageDriver>(
        intent: Category,
        context: &RecoveryContext,
    ) -> Vec<Box<dyn RecoveryStrategy<D>>> {
        let base = context.base_url.as_deref();
        let mut strategies: Vec<Box<dyn RecoveryStrategy<D>>> = Vec::new();
        match intent {
            Category::Cart => {
                strategies.push(Box::new(NavigateDirect::new(Destination::Cart, base)));
                strategies.push(Box::new(ResolveAndAct::click_phrase("basket")));
                strategies.push(Box::new(ResolveAndAct::click_phrase("cart")));
            }
            Category::AddToCart => {
                strategies.push(Box::new(ResolveAndAct::click_phrase("Hemen Al")));
                strategies.push(Box::new(ScrollThenRetry {
                    target: ScrollTarget::Fraction(0.5),
                    then: ResolveAndAct::click_phrase("Sepete Ekle"),
                }));
                strategies.push(Box::new(ReloadThenRetry {
                    then: ResolveAndAct::click_phrase("Sepete Ekle"),
                }));
            }
            Category::LoginBtn => {
                strategies.push(Box::new(ResolveAndAct::click_phrase("Sign In")));
                strategies.push(Box::new(NavigateDirect::new(Destination::Login, base)));
            }
            Category::Search => {
                if let Some(term) = &context.search_term {
                    strategies.push(Box::new(NavigateDirect::new(
                        Destination::Search(term.clone()),
                        base,
                    )));
                    strategies.push(Box::new(ReloadThenRetry {
                        then: ResolveAndAct::new(
                            Category::Search,
                            Some(Category::Search.default_hint()),
                            Action::Type(term.clone()),
                        ),
                    }));
                }
            }
            Category::Checkout => {
                strategies.push(Box::new(ResolveAndAct::click_phrase("Tamamla")));
                strategies.push(Box::new(ScrollThenRetry {
                    target: ScrollTarget::Bottom,
                    then: ResolveAndAct::click_phrase("Alışverişi Tamamla"),
                }));
            }
            _ => {}
        }
        strategies
    }

    /// Primary attempt, then each strategy in order until one succeeds
    pub async fn attempt_with_strategies<D: PageDriver>(
        &self,
        session: &mut Session<D>,
        intent: Category,
        primary: &dyn RecoveryStrategy<D>,
        strategies: &[Box<dyn RecoveryStrategy<D>>],
    ) -> ProbeResult<RecoveryOutcome> {
        info!("Primary attempt for {}: {}", intent, primary.name());
        match primary.attempt(session).await {
            Ok(true) => return Ok(RecoveryOutcome::Primary),
            Ok(false) => warn!("Primary attempt for {} failed", intent),
            Err(e) => warn!("Primary attempt for {} failed: {:#}", intent, e),
        }

        for (i, strategy) in strategies.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pause).await;
            }
            let name = strategy.name();
            info!("Alternative #{} for {}: {}", i + 1, intent, name);
            match strategy.attempt(session).await {
                Ok(true) => {
                    info!("Alternative #{} succeeded: {}", i + 1, name);
                    return Ok(RecoveryOutcome::Recovered {
                        strategy: name,
                        position: i + 1,
                    });
                }
                Ok(false) => warn!("Alternative #{} failed: {}", i + 1, name),
                Err(e) => error!("Alternative #{} ({}) errored: {:#}", i + 1, name, e),
            }
        }

        error!("{}: all {} alternatives exhausted", intent, strategies.len());
        Err(ProbeError::RecoveryExhausted {
            intent,
            tried: strategies.len(),
        })
    }

    /// Boolean form of [`attempt_with_strategies`](Self::attempt_with_strategies)
    /// using the intent's built-in strategies
    pub async fn attempt_with_recovery<D: PageDriver>(
        &self,
        session: &mut Session<D>,
        intent: Category,
        primary: &dyn RecoveryStrategy<D>,
        context: &RecoveryContext,
    ) -> bool {
        let strategies = Self::strategies_for::<D>(intent, context);
        self.attempt_with_strategies(session, intent, primary, &strategies)
            .await
            .is_ok()
    }
}

#[cfg(test)]
#[path = "recovery_test.rs"]
mod recovery_test;
