//! Reference image repository.
//!
//! Golden images of named elements, curated category prototypes and
//! auto-captured crops share one directory. Everything about an image is
//! encoded in its file name:
//!
//! ```text
//! {subject}__{provenance}__{site}__{pct}pct__{timestamp_ms}.png
//! ```
//!
//! where `subject` is a category name or `named-{name}`.

use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::category::Category;
use crate::errors::ProbeResult;

const SEPARATOR: &str = "__";
const NAMED_PREFIX: &str = "named-";

/// What a reference image depicts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    /// A durable, named locator
    Named(String),
    Category(Category),
}

impl Subject {
    pub fn named(name: &str) -> Self {
        Subject::Named(sanitize(name))
    }

    fn token(&self) -> String {
        match self {
            Subject::Named(name) => format!("{}{}", NAMED_PREFIX, name),
            Subject::Category(category) => category.as_str().to_string(),
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token.strip_prefix(NAMED_PREFIX) {
            Some(name) if !name.is_empty() => Some(Subject::Named(name.to_string())),
            Some(_) => None,
            None => Category::from_name(token).map(Subject::Category),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

/// Where a reference image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// First known-good screenshot of a named element
    Golden,
    /// Hand-picked category prototype
    Curated,
    /// Harvested from a moderately confident resolution
    Auto,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Golden => "golden",
            Provenance::Curated => "curated",
            Provenance::Auto => "auto",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "golden" => Some(Provenance::Golden),
            "curated" => Some(Provenance::Curated),
            "auto" => Some(Provenance::Auto),
            _ => None,
        }
    }
}

/// Metadata of one stored image, decoded from its file name
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceImage {
    pub path: PathBuf,
    pub subject: Subject,
    pub provenance: Provenance,
    pub site: String,
    /// Confidence at capture time, whole percent
    pub confidence_pct: u32,
    pub timestamp_ms: i64,
}

impl ReferenceImage {
    pub fn file_name(
        subject: &Subject,
        provenance: Provenance,
        site: &str,
        confidence_pct: u32,
        timestamp_ms: i64,
    ) -> String {
        format!(
            "{subject}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{confidence_pct}pct{SEPARATOR}{timestamp_ms}.png",
            provenance.as_str(),
            sanitize(site),
        )
    }

    /// Decode a stored file; `None` for anything not written by the store
    pub fn parse(path: &Path) -> Option<Self> {
        let stem = path.file_name()?.to_str()?.strip_suffix(".png")?;
        let parts: Vec<&str> = stem.split(SEPARATOR).collect();
        let [subject, provenance, site, pct, timestamp] = parts.as_slice() else {
            return None;
        };
        Some(Self {
            path: path.to_path_buf(),
            subject: Subject::parse(subject)?,
            provenance: Provenance::parse(provenance)?,
            site: site.to_string(),
            confidence_pct: pct.strip_suffix("pct")?.parse().ok()?,
            timestamp_ms: timestamp.parse().ok()?,
        })
    }

    pub fn confidence(&self) -> f64 {
        f64::from(self.confidence_pct) / 100.0
    }

    pub fn category(&self) -> Option<Category> {
        match self.subject {
            Subject::Category(category) => Some(category),
            Subject::Named(_) => None,
        }
    }
}

/// Restrict free text to characters that survive the file-name encoding
fn sanitize(raw: &str) -> String {
    let mapped: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let mut out = String::with_capacity(mapped.len());
    for c in mapped.chars() {
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// File-backed repository of reference images
#[derive(Debug, Clone)]
pub struct ReferenceStore {
    dir: PathBuf,
}

impl ReferenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store encoded PNG bytes; the file appears atomically or not at all
    pub fn save(
        &self,
        subject: &Subject,
        provenance: Provenance,
        site: &str,
        confidence: f64,
        png: &[u8],
    ) -> ProbeResult<ReferenceImage> {
        fs::create_dir_all(&self.dir)?;
        let pct = (confidence.clamp(0.0, 1.0) * 100.0).round() as u32;

        let mut timestamp = chrono::Utc::now().timestamp_millis();
        let mut path = self.dir.join(ReferenceImage::file_name(
            subject, provenance, site, pct, timestamp,
        ));
        while path.exists() {
            timestamp += 1;
            path = self.dir.join(ReferenceImage::file_name(
                subject, provenance, site, pct, timestamp,
            ));
        }

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(png)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!("Stored reference {}", path.display());

        ReferenceImage::parse(&path).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unparseable reference name {}", path.display()),
            )
            .into()
        })
    }

    /// Every stored image, newest first; a missing directory is empty
    pub fn list(&self) -> ProbeResult<Vec<ReferenceImage>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut images: Vec<ReferenceImage> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| ReferenceImage::parse(&entry.path()))
            .collect();
        images.sort_by(|a, b| {
            b.timestamp_ms
                .cmp(&a.timestamp_ms)
                .then_with(|| b.path.cmp(&a.path))
        });
        Ok(images)
    }

    /// The golden image of a named element, if one was ever captured
    pub fn golden(&self, name: &str) -> ProbeResult<Option<ReferenceImage>> {
        let subject = Subject::named(name);
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.subject == subject && r.provenance == Provenance::Golden)
            .next_back())
    }

    /// All images of a category with the given provenance, across sites, newest first
    pub fn pool(
        &self,
        category: Category,
        provenance: Provenance,
    ) -> ProbeResult<Vec<ReferenceImage>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.category() == Some(category) && r.provenance == provenance)
            .collect())
    }

    /// The `n` newest images of a category with the given provenance
    pub fn recent(
        &self,
        category: Category,
        provenance: Provenance,
        n: usize,
    ) -> ProbeResult<Vec<ReferenceImage>> {
        let mut pool = self.pool(category, provenance)?;
        pool.truncate(n);
        Ok(pool)
    }

    pub fn read(&self, image: &ReferenceImage) -> ProbeResult<Vec<u8>> {
        Ok(fs::read(&image.path)?)
    }
}

#[cfg(test)]
#[path = "references_test.rs"]
mod references_test;
