// Common test utilities and fixtures
#![allow(dead_code)]

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use intentprobe::{
    ElementDescriptor, EngineConfig, PageDriver, Query, ScrollTarget, Session, SimilarityService,
    VisualModel,
};

/// Prefix of the structural paths handed out by [`FakePage`]
const PATH_PREFIX: &str = "/fake/node/";

struct FakeNode {
    descriptor: ElementDescriptor,
    crop: Vec<u8>,
}

#[derive(Default)]
struct PageState {
    address: String,
    viewport_height: f64,
    nodes: Vec<FakeNode>,
    routes: HashMap<String, Vec<usize>>,
    revealed_on_scroll: Vec<(String, Vec<usize>)>,
    finds: usize,
    clicks: Vec<usize>,
    typed: Vec<(usize, String)>,
    submits: Vec<usize>,
    scrolls: Vec<ScrollTarget>,
    reloads: usize,
    visits: Vec<String>,
}

/// In-memory page: nodes are indices, queries are answered from a routing table
pub struct FakePage {
    state: Mutex<PageState>,
}

impl FakePage {
    pub fn new(address: &str) -> Self {
        Self {
            state: Mutex::new(PageState {
                address: address.to_string(),
                viewport_height: 800.0,
                ..Default::default()
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut PageState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Add a node with the bytes its screenshot returns
    pub fn add(&self, descriptor: ElementDescriptor, crop: &[u8]) -> usize {
        self.with(|s| {
            s.nodes.push(FakeNode {
                descriptor,
                crop: crop.to_vec(),
            });
            s.nodes.len() - 1
        })
    }

    /// Answer `query` with these nodes
    pub fn route(&self, query: &str, ids: &[usize]) {
        self.with(|s| s.routes.insert(query.to_string(), ids.to_vec()));
    }

    /// Route `query` only after the next scroll, like a lazily loaded section
    pub fn reveal_on_scroll(&self, query: &str, ids: &[usize]) {
        self.with(|s| s.revealed_on_scroll.push((query.to_string(), ids.to_vec())));
    }

    pub fn set_displayed(&self, id: usize, displayed: bool) {
        self.with(|s| s.nodes[id].descriptor.displayed = displayed);
    }

    pub fn finds(&self) -> usize {
        self.with(|s| s.finds)
    }

    pub fn clicks(&self) -> Vec<usize> {
        self.with(|s| s.clicks.clone())
    }

    pub fn typed(&self) -> Vec<(usize, String)> {
        self.with(|s| s.typed.clone())
    }

    pub fn submits(&self) -> Vec<usize> {
        self.with(|s| s.submits.clone())
    }

    pub fn scrolls(&self) -> Vec<ScrollTarget> {
        self.with(|s| s.scrolls.clone())
    }

    pub fn reloads(&self) -> usize {
        self.with(|s| s.reloads)
    }

    pub fn visits(&self) -> Vec<String> {
        self.with(|s| s.visits.clone())
    }
}

#[async_trait]
impl PageDriver for FakePage {
    type Node = usize;

    async fn find_nodes(&self, query: &Query) -> Result<Vec<usize>> {
        self.with(|s| {
            s.finds += 1;
            if let Some(id) = query.as_str().strip_prefix(PATH_PREFIX) {
                return Ok(id.parse().map(|id| vec![id]).unwrap_or_default());
            }
            Ok(s.routes.get(query.as_str()).cloned().unwrap_or_default())
        })
    }

    async fn describe(&self, node: &usize) -> Result<ElementDescriptor> {
        self.with(|s| {
            s.nodes
                .get(*node)
                .map(|n| n.descriptor.clone())
                .ok_or_else(|| anyhow!("stale element {}", node))
        })
    }

    async fn screenshot(&self, node: &usize) -> Result<Vec<u8>> {
        self.with(|s| match s.nodes.get(*node) {
            Some(n) if !n.crop.is_empty() => Ok(n.crop.clone()),
            _ => bail!("no screenshot for {}", node),
        })
    }

    async fn click(&self, node: &usize) -> Result<()> {
        self.with(|s| s.clicks.push(*node));
        Ok(())
    }

    async fn type_text(&self, node: &usize, text: &str, _clear: bool) -> Result<()> {
        self.with(|s| s.typed.push((*node, text.to_string())));
        Ok(())
    }

    async fn submit(&self, node: &usize) -> Result<()> {
        self.with(|s| s.submits.push(*node));
        Ok(())
    }

    async fn current_address(&self) -> Result<String> {
        Ok(self.with(|s| s.address.clone()))
    }

    async fn viewport_height(&self) -> Result<f64> {
        Ok(self.with(|s| s.viewport_height))
    }

    async fn structural_path(&self, node: &usize) -> Result<String> {
        Ok(format!("{}{}", PATH_PREFIX, node))
    }

    async fn scroll(&self, target: ScrollTarget) -> Result<()> {
        self.with(|s| {
            s.scrolls.push(target);
            for (query, ids) in std::mem::take(&mut s.revealed_on_scroll) {
                s.routes.insert(query, ids);
            }
        });
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.with(|s| s.reloads += 1);
        Ok(())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.with(|s| {
            s.address = url.to_string();
            s.visits.push(url.to_string());
        });
        Ok(())
    }

    async fn is_page_ready(&self) -> bool {
        true
    }
}

/// Visual model answering from a table keyed by the second image
pub struct ScriptedModel {
    scores: HashMap<Vec<u8>, f64>,
    default: f64,
    calls: Arc<AtomicUsize>,
}

impl ScriptedModel {
    pub fn new(default: f64) -> Self {
        Self {
            scores: HashMap::new(),
            default,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared count of comparisons made, readable after `into_service`
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn score(mut self, crop: &[u8], score: f64) -> Self {
        self.scores.insert(crop.to_vec(), score);
        self
    }

    pub fn into_service(self) -> SimilarityService {
        SimilarityService::new(Arc::new(self))
    }
}

impl VisualModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn compare(&self, _a: &[u8], b: &[u8]) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.scores.get(b).copied().unwrap_or(self.default))
    }
}

/// A displayed, enabled, 120x40 node
pub fn element(tag: &str, id: &str, y: f64) -> ElementDescriptor {
    ElementDescriptor {
        tag: tag.to_string(),
        id: id.to_string(),
        y,
        width: 120.0,
        height: 40.0,
        displayed: true,
        enabled: true,
        ..Default::default()
    }
}

/// Engine config rooted in a temp dir, with short pauses and timeouts
pub fn config_in(dir: &TempDir) -> EngineConfig {
    EngineConfig::default()
        .with_data_dir(dir.path())
        .with_recovery_pause(Duration::from_millis(1))
        .with_locate_timeout(Duration::from_millis(50))
}

pub fn session(page: FakePage, dir: &TempDir) -> Session<FakePage> {
    Session::new(page, config_in(dir))
}

pub fn session_with(page: FakePage, config: EngineConfig, model: ScriptedModel) -> Session<FakePage> {
    Session::with_similarity(page, config, model.into_service())
}

/// Solid-colour PNG
pub fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .expect("encode png");
    buffer
}
