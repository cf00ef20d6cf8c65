//! Durable record of which elements worked for each (site, category).
//!
//! Stored as one JSON object keyed `"{site}_{category}"`. A missing or
//! unreadable file is an empty store. Saving re-reads the file under an
//! exclusive lock and replays this session's events onto it, so concurrent
//! runs sharing the file do not lose each other's updates. Entries this
//! version cannot read are written back untouched; a file that is not JSON at
//! all is moved aside before being replaced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::category::Category;
use crate::errors::{ProbeError, ProbeResult};
use crate::types::ElementDescriptor;

/// Best-selector list bound per record
pub const MAX_FINGERPRINTS: usize = 5;
/// Success rate above which learned fingerprints are preferred
pub const PREFER_LEARNED_RATE: f64 = 0.7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    Click,
    Type,
}

/// Compact description of an element that worked before
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub id: String,
    pub class: String,
    pub tag: String,
    pub text: String,
    /// Best final score seen, rounded to three decimals
    pub score: f64,
    pub action_type: ActionType,
    pub success_count: u32,
    pub last_used: DateTime<Utc>,
}

impl Fingerprint {
    pub fn from_descriptor(
        descriptor: &ElementDescriptor,
        action_type: ActionType,
        score: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: descriptor.id.clone(),
            class: descriptor.class.clone(),
            tag: descriptor.tag.clone(),
            text: ElementDescriptor::truncate_text(&descriptor.text),
            score: round3(score),
            action_type,
            success_count: 1,
            last_used: now,
        }
    }

    /// Same element by id and class; an element with neither matches nothing
    pub fn matches(&self, descriptor: &ElementDescriptor) -> bool {
        if self.id.is_empty() && self.class.is_empty() {
            return false;
        }
        self.id == descriptor.id && self.class == descriptor.class
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeRecord {
    pub site: String,
    pub category: Category,
    pub attempts: u32,
    pub successes: u32,
    #[serde(default)]
    pub success_rate: f64,
    /// At most five, most successful first
    pub best_selectors: Vec<Fingerprint>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl KnowledgeRecord {
    fn new(site: &str, category: Category) -> Self {
        Self {
            site: site.to_string(),
            category,
            attempts: 0,
            successes: 0,
            success_rate: 0.0,
            best_selectors: Vec::new(),
            last_updated: None,
        }
    }

    fn refresh_rate(&mut self) {
        self.success_rate = if self.attempts == 0 {
            0.0
        } else {
            f64::from(self.successes) / f64::from(self.attempts)
        };
    }

    fn absorb(&mut self, fingerprint: Fingerprint) {
        if let Some(existing) = self
            .best_selectors
            .iter_mut()
            .find(|f| f.id == fingerprint.id && f.class == fingerprint.class)
        {
            existing.success_count += fingerprint.success_count;
            existing.last_used = fingerprint.last_used;
            existing.score = existing.score.max(fingerprint.score);
        } else {
            self.best_selectors.push(fingerprint);
        }
        // Stable sort keeps older entries ahead on ties
        self.best_selectors
            .sort_by(|a, b| b.success_count.cmp(&a.success_count));
        self.best_selectors.truncate(MAX_FINGERPRINTS);
    }
}

pub fn record_key(site: &str, category: Category) -> String {
    format!("{}_{}", site, category)
}

/// One mutation made during this session, replayed onto the file at save time
#[derive(Debug, Clone)]
enum Event {
    Success {
        site: String,
        category: Category,
        fingerprint: Fingerprint,
    },
    Failure {
        site: String,
        category: Category,
        at: DateTime<Utc>,
    },
}

impl Event {
    fn apply(&self, records: &mut BTreeMap<String, KnowledgeRecord>) {
        match self {
            Event::Success {
                site,
                category,
                fingerprint,
            } => {
                let record = records
                    .entry(record_key(site, *category))
                    .or_insert_with(|| KnowledgeRecord::new(site, *category));
                record.attempts += 1;
                record.successes += 1;
                record.last_updated = Some(fingerprint.last_used);
                record.absorb(fingerprint.clone());
                record.refresh_rate();
            }
            Event::Failure { site, category, at } => {
                let record = records
                    .entry(record_key(site, *category))
                    .or_insert_with(|| KnowledgeRecord::new(site, *category));
                record.attempts += 1;
                record.last_updated = Some(*at);
                record.refresh_rate();
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternSummary {
    pub key: String,
    pub successes: u32,
    pub attempts: u32,
    /// Percent, one decimal
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningStats {
    pub total_patterns: usize,
    pub total_successes: u32,
    pub total_attempts: u32,
    /// Percent, one decimal
    pub avg_success_rate: f64,
    pub top_patterns: Vec<PatternSummary>,
    pub session_learnings: usize,
}

/// File content split into readable records and entries kept verbatim
#[derive(Debug, Default)]
struct StoredRecords {
    records: BTreeMap<String, KnowledgeRecord>,
    unreadable: BTreeMap<String, Value>,
}

impl StoredRecords {
    /// Readable records win over an unreadable entry under the same key
    fn to_document(&self) -> ProbeResult<BTreeMap<String, Value>> {
        let mut document = self.unreadable.clone();
        for (key, record) in &self.records {
            document.insert(key.clone(), serde_json::to_value(record)?);
        }
        Ok(document)
    }
}

#[derive(Debug)]
pub struct LearningStore {
    path: PathBuf,
    records: BTreeMap<String, KnowledgeRecord>,
    pending: Vec<Event>,
    session_learnings: usize,
}

impl LearningStore {
    /// Open the store; missing or corrupt files degrade to an empty store
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match read_records(&path) {
            Ok(stored) => stored.records,
            Err(e) => {
                warn!("{}; starting with an empty knowledge store", e);
                BTreeMap::new()
            }
        };
        info!(
            "Knowledge store {} holds {} patterns",
            path.display(),
            records.len()
        );
        Self {
            path,
            records,
            pending: Vec::new(),
            session_learnings: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, site: &str, category: Category) -> Option<&KnowledgeRecord> {
        self.records.get(&record_key(site, category))
    }

    pub fn records(&self) -> impl Iterator<Item = &KnowledgeRecord> {
        self.records.values()
    }

    pub fn record_success(
        &mut self,
        site: &str,
        category: Category,
        descriptor: &ElementDescriptor,
        action_type: ActionType,
        score: f64,
    ) {
        let event = Event::Success {
            site: site.to_string(),
            category,
            fingerprint: Fingerprint::from_descriptor(descriptor, action_type, score, Utc::now()),
        };
        event.apply(&mut self.records);
        self.pending.push(event);
        self.session_learnings += 1;

        if let Some(record) = self.record(site, category) {
            debug!(
                "Learned {} ({}/{})",
                record_key(site, category),
                record.successes,
                record.attempts
            );
        }
    }

    /// Count an attempt that ended without a usable element
    pub fn record_failure(&mut self, site: &str, category: Category) {
        let event = Event::Failure {
            site: site.to_string(),
            category,
            at: Utc::now(),
        };
        event.apply(&mut self.records);
        self.pending.push(event);
    }

    pub fn best_known(&self, site: &str, category: Category) -> Option<&Fingerprint> {
        self.record(site, category)
            .and_then(|r| r.best_selectors.first())
    }

    pub fn should_prefer_learned(&self, site: &str, category: Category) -> bool {
        self.record(site, category)
            .is_some_and(|r| r.success_rate > PREFER_LEARNED_RATE)
    }

    /// Whether the node matches any remembered fingerprint for the pair
    pub fn is_learned(&self, site: &str, category: Category, descriptor: &ElementDescriptor) -> bool {
        self.record(site, category)
            .is_some_and(|r| r.best_selectors.iter().any(|f| f.matches(descriptor)))
    }

    pub fn stats(&self) -> LearningStats {
        let total_successes: u32 = self.records.values().map(|r| r.successes).sum();
        let total_attempts: u32 = self.records.values().map(|r| r.attempts).sum();
        let avg_success_rate = if total_attempts > 0 {
            round1(f64::from(total_successes) / f64::from(total_attempts) * 100.0)
        } else {
            0.0
        };

        let mut ranked: Vec<(&String, &KnowledgeRecord)> = self.records.iter().collect();
        ranked.sort_by(|a, b| b.1.success_rate.total_cmp(&a.1.success_rate));
        let top_patterns = ranked
            .into_iter()
            .take(5)
            .map(|(key, r)| PatternSummary {
                key: key.clone(),
                successes: r.successes,
                attempts: r.attempts,
                rate: round1(r.success_rate * 100.0),
            })
            .collect();

        LearningStats {
            total_patterns: self.records.len(),
            total_successes,
            total_attempts,
            avg_success_rate,
            top_patterns,
            session_learnings: self.session_learnings,
        }
    }

    /// Merge this session's events into the file and write it atomically
    pub fn save(&mut self) -> ProbeResult<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.path.with_extension("lock"))?;
        lock_exclusive(&lock_file)?;

        let mut merged = match read_records(&self.path) {
            Ok(stored) => stored,
            Err(e) => {
                let backup = corrupt_backup_path(&self.path);
                warn!("{}; moving it to {}", e, backup.display());
                fs::rename(&self.path, &backup)?;
                StoredRecords::default()
            }
        };
        for event in &self.pending {
            event.apply(&mut merged.records);
        }
        let document = merged.to_document()?;

        let tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, &document)?;
            writer.flush()?;
        }
        tmp.persist(&self.path).map_err(|e| e.error)?;

        info!(
            "Knowledge store saved: {} patterns ({} new events, {} kept unread)",
            merged.records.len(),
            self.pending.len(),
            merged.unreadable.len()
        );
        self.records = merged.records;
        self.pending.clear();
        // The lock is released when `lock_file` drops
        drop(lock_file);
        Ok(())
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn corrupt_backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".corrupt");
    PathBuf::from(name)
}

fn read_records(path: &Path) -> ProbeResult<StoredRecords> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoredRecords::default()),
        Err(e) => {
            return Err(ProbeError::StorageCorrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            });
        }
    };
    if raw.trim().is_empty() {
        return Ok(StoredRecords::default());
    }
    let entries: BTreeMap<String, Value> =
        serde_json::from_str(&raw).map_err(|e| ProbeError::StorageCorrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    let mut stored = StoredRecords::default();
    for (key, value) in entries {
        match KnowledgeRecord::deserialize(&value) {
            Ok(record) => {
                stored.records.insert(key, record);
            }
            Err(e) => {
                warn!("Knowledge entry {} unreadable, keeping it as is: {}", key, e);
                stored.unreadable.insert(key, value);
            }
        }
    }
    Ok(stored)
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> ProbeResult<()> {
    use nix::fcntl::{FlockArg, flock};
    use std::os::unix::io::AsRawFd;

    flock(file.as_raw_fd(), FlockArg::LockExclusive).map_err(|e| ProbeError::Io(e.into()))
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> ProbeResult<()> {
    Ok(())
}

#[cfg(test)]
#[path = "learning_test.rs"]
mod learning_test;
