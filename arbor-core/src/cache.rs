//! Parse tree cache
//!
//! Keyed by (project, relative path). Each entry remembers the fingerprint
//! of the bytes it was parsed from; a lookup with a different fingerprint
//! reparses and replaces the entry under the state lock, so callers never
//! see two entries for one key.
//!
//! Concurrent misses on the same key are funnelled through a per-key gate:
//! the first caller parses, the others block on the gate and then pick up
//! the freshly inserted entry.
//!
//! Each project carries a generation. A parse records the generation it
//! started under and its result is only stored if that generation is still
//! current, so invalidating or retiring a project cannot be undone by a
//! parse that was already running.
//!
//! Footprints are approximate: source length plus a fixed cost per syntax
//! node (`NODE_FOOTPRINT_BYTES`) plus `ENTRY_OVERHEAD_BYTES`.

use crate::error::ArborError;
use crate::files::{slash_path, ResolvedFile};
use crate::languages::LanguageHandle;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tree_sitter::{Node, Tree};

/// Estimated bytes per syntax node held by the native tree
pub const NODE_FOOTPRINT_BYTES: usize = 64;
/// Fixed bookkeeping cost per entry
pub const ENTRY_OVERHEAD_BYTES: usize = 256;

/// Content identity used for the cache validity test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub size: u64,
    pub modified: Option<SystemTime>,
    /// Hex SHA-256 of the bytes; catches edits within mtime granularity
    pub digest: String,
}

impl Fingerprint {
    pub fn compute(file: &ResolvedFile, source: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source);
        Self {
            size: source.len() as u64,
            modified: file.modified,
            digest: hex::encode(hasher.finalize()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    project: String,
    path: PathBuf,
}

/// A parsed file owned by the cache and lent out per operation
pub struct ParsedTree {
    project: String,
    path: PathBuf,
    language: String,
    fingerprint: Fingerprint,
    tree: Tree,
    source: Vec<u8>,
    footprint: usize,
    parsed_at: Instant,
}

impl ParsedTree {
    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Root-relative path with forward slashes
    pub fn display_path(&self) -> String {
        slash_path(&self.path)
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn source(&self) -> &[u8] {
        &self.source
    }

    /// Syntax errors are data: the tree is still usable
    pub fn has_errors(&self) -> bool {
        self.tree.root_node().has_error()
    }

    pub fn footprint(&self) -> usize {
        self.footprint
    }
}

/// Parse a buffer without touching any cache
pub fn parse_source(
    language: &LanguageHandle,
    path: &Path,
    source: &[u8],
) -> crate::Result<Tree> {
    let mut parser = language.parser()?;
    parser
        .parse(source, None)
        .ok_or_else(|| ArborError::ParseFailure {
            path: path.to_path_buf(),
            message: "parser produced no tree".to_string(),
        })
}

fn estimate_footprint(source: &[u8], tree: &Tree) -> usize {
    source.len()
        + tree.root_node().descendant_count() * NODE_FOOTPRINT_BYTES
        + ENTRY_OVERHEAD_BYTES
}

/// Cache policy
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_bytes: usize,
    /// `None` disables expiry
    pub ttl: Option<Duration>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: 100 * 1024 * 1024,
            ttl: Some(Duration::from_secs(300)),
        }
    }
}

/// Read-only cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub parses: u64,
    pub footprint_bytes: usize,
    pub max_bytes: usize,
    pub ttl_seconds: Option<u64>,
}

struct Slot {
    entry: Arc<ParsedTree>,
    last_access: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, Slot>,
    in_flight: HashMap<CacheKey, Arc<Mutex<()>>>,
    generations: HashMap<String, u64>,
    /// Removed projects; nothing is stored for them until reactivated
    retired: HashSet<String>,
    footprint: usize,
    tick: u64,
}

impl CacheState {
    fn generation(&self, project: &str) -> u64 {
        self.generations.get(project).copied().unwrap_or(0)
    }

    fn bump_generation(&mut self, project: &str) {
        *self.generations.entry(project.to_string()).or_insert(0) += 1;
    }

    /// Drop gates nobody is waiting on
    fn prune_gates(&mut self) {
        self.in_flight.retain(|_, gate| Arc::strong_count(gate) > 1);
    }
}

#[derive(Clone, Copy)]
enum EvictReason {
    Capacity,
    Expired,
}

impl EvictReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::Expired => "expired",
        }
    }
}

pub struct TreeCache {
    settings: CacheSettings,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    parses: AtomicU64,
}

impl TreeCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            parses: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the cached tree for `file` if `source` still matches it,
    /// otherwise parse `source` and cache the result.
    pub fn get_or_parse(
        &self,
        file: &ResolvedFile,
        source: Vec<u8>,
        language: &LanguageHandle,
    ) -> crate::Result<Arc<ParsedTree>> {
        let fingerprint = Fingerprint::compute(file, &source);

        if !self.settings.enabled {
            return self.parse(file, source, fingerprint, language).map(Arc::new);
        }

        let key = CacheKey {
            project: file.project.clone(),
            path: file.relative.clone(),
        };

        if let Some(hit) = self.lookup(&key, &fingerprint, language.id()) {
            return Ok(hit);
        }

        let (gate, generation) = {
            let mut state = self.lock();
            let generation = state.generation(&key.project);
            (Arc::clone(state.in_flight.entry(key.clone()).or_default()), generation)
        };
        let _guard = gate.lock().unwrap_or_else(|e| e.into_inner());

        // A concurrent caller may have parsed this key while we waited
        if let Some(hit) = self.lookup(&key, &fingerprint, language.id()) {
            self.release_gate(&key, &gate);
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(project = %key.project, path = %key.path.display(), "cache miss");

        let parsed = match self.parse(file, source, fingerprint, language) {
            Ok(parsed) => Arc::new(parsed),
            Err(err) => {
                self.release_gate(&key, &gate);
                return Err(err);
            }
        };
        self.insert(key, Arc::clone(&parsed), &gate, generation);
        Ok(parsed)
    }

    fn lookup(
        &self,
        key: &CacheKey,
        fingerprint: &Fingerprint,
        language: &str,
    ) -> Option<Arc<ParsedTree>> {
        let ttl = self.settings.ttl;
        let mut state = self.lock();
        state.tick += 1;
        let tick = state.tick;
        let slot = state.entries.get_mut(key)?;
        let fresh = slot.entry.fingerprint == *fingerprint
            && slot.entry.language == language
            && ttl.map_or(true, |ttl| slot.entry.parsed_at.elapsed() <= ttl);
        if !fresh {
            return None;
        }
        slot.last_access = tick;
        self.hits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(project = %key.project, path = %key.path.display(), "cache hit");
        Some(Arc::clone(&slot.entry))
    }

    fn parse(
        &self,
        file: &ResolvedFile,
        source: Vec<u8>,
        fingerprint: Fingerprint,
        language: &LanguageHandle,
    ) -> crate::Result<ParsedTree> {
        self.parses.fetch_add(1, Ordering::Relaxed);
        let tree = match parse_source(language, &file.relative, &source) {
            Ok(tree) => tree,
            Err(err) => {
                tracing::warn!(
                    project = %file.project,
                    path = %file.relative.display(),
                    language = language.id(),
                    error = %err,
                    "parse failed"
                );
                return Err(err);
            }
        };
        if tree.root_node().has_error() {
            tracing::debug!(
                project = %file.project,
                path = %file.relative.display(),
                "parsed tree contains syntax errors"
            );
        }
        let footprint = estimate_footprint(&source, &tree);
        Ok(ParsedTree {
            project: file.project.clone(),
            path: file.relative.clone(),
            language: language.id().to_string(),
            fingerprint,
            tree,
            source,
            footprint,
            parsed_at: Instant::now(),
        })
    }

    /// Store a fresh tree unless its project was invalidated or retired
    /// after `generation` was read.
    fn insert(
        &self,
        key: CacheKey,
        entry: Arc<ParsedTree>,
        gate: &Arc<Mutex<()>>,
        generation: u64,
    ) {
        let mut state = self.lock();
        if state
            .in_flight
            .get(&key)
            .is_some_and(|g| Arc::ptr_eq(g, gate))
        {
            state.in_flight.remove(&key);
        }
        if state.retired.contains(&key.project) || state.generation(&key.project) != generation {
            tracing::debug!(
                project = %key.project,
                path = %key.path.display(),
                "project invalidated during parse, result not cached"
            );
            return;
        }
        state.tick += 1;
        let tick = state.tick;
        let footprint = entry.footprint;
        if let Some(stale) = state.entries.insert(
            key.clone(),
            Slot {
                entry,
                last_access: tick,
            },
        ) {
            state.footprint -= stale.entry.footprint;
            tracing::debug!(
                project = %key.project,
                path = %key.path.display(),
                "replaced stale entry"
            );
        }
        state.footprint += footprint;
        self.evict_locked(&mut state, &key);
    }

    fn release_gate(&self, key: &CacheKey, gate: &Arc<Mutex<()>>) {
        let mut state = self.lock();
        if state
            .in_flight
            .get(key)
            .is_some_and(|g| Arc::ptr_eq(g, gate))
        {
            state.in_flight.remove(key);
        }
    }

    /// Bring the footprint under budget (least recently used first), then
    /// drop expired entries. The entry named by `keep` is never evicted.
    fn evict_locked(&self, state: &mut CacheState, keep: &CacheKey) {
        if state.footprint > self.settings.max_bytes {
            tracing::debug!(
                footprint = state.footprint,
                max_bytes = self.settings.max_bytes,
                "cache capacity exceeded"
            );
        }
        while state.footprint > self.settings.max_bytes {
            let victim = state
                .entries
                .iter()
                .filter(|(k, _)| *k != keep)
                .min_by_key(|(_, slot)| slot.last_access)
                .map(|(k, _)| k.clone());
            match victim {
                Some(k) => self.remove_locked(state, &k, EvictReason::Capacity),
                None => break,
            }
        }

        if let Some(ttl) = self.settings.ttl {
            let expired: Vec<CacheKey> = state
                .entries
                .iter()
                .filter(|(k, slot)| *k != keep && slot.entry.parsed_at.elapsed() > ttl)
                .map(|(k, _)| k.clone())
                .collect();
            for k in expired {
                self.remove_locked(state, &k, EvictReason::Expired);
            }
        }
    }

    fn remove_locked(&self, state: &mut CacheState, key: &CacheKey, reason: EvictReason) {
        if let Some(slot) = state.entries.remove(key) {
            state.footprint -= slot.entry.footprint;
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                project = %key.project,
                path = %key.path.display(),
                reason = reason.as_str(),
                footprint = slot.entry.footprint,
                "evicted cache entry"
            );
        }
    }

    /// Drop the entry for one file
    pub fn invalidate(&self, project: &str, path: &Path) -> bool {
        let key = CacheKey {
            project: project.to_string(),
            path: path.to_path_buf(),
        };
        let mut state = self.lock();
        match state.entries.remove(&key) {
            Some(slot) => {
                state.footprint -= slot.entry.footprint;
                self.invalidations.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(project, path = %path.display(), "invalidated cache entry");
                true
            }
            None => false,
        }
    }

    /// Drop every entry of a project; returns the number removed.
    /// Parses already running for the project are not cached.
    pub fn invalidate_project(&self, project: &str) -> usize {
        let mut state = self.lock();
        self.invalidate_project_locked(&mut state, project)
    }

    /// Invalidate a removed project and refuse new entries for it until
    /// `activate_project` is called with the same name
    pub fn retire_project(&self, project: &str) -> usize {
        let mut state = self.lock();
        state.retired.insert(project.to_string());
        self.invalidate_project_locked(&mut state, project)
    }

    /// Accept entries for a (re)registered project
    pub fn activate_project(&self, project: &str) {
        let mut state = self.lock();
        if state.retired.remove(project) {
            tracing::debug!(project, "reactivated project cache");
        }
        state.bump_generation(project);
    }

    fn invalidate_project_locked(&self, state: &mut CacheState, project: &str) -> usize {
        state.bump_generation(project);
        let keys: Vec<CacheKey> = state
            .entries
            .keys()
            .filter(|k| k.project == project)
            .cloned()
            .collect();
        for key in &keys {
            if let Some(slot) = state.entries.remove(key) {
                state.footprint -= slot.entry.footprint;
            }
        }
        state.prune_gates();
        self.invalidations
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
        tracing::debug!(
            project,
            removed = keys.len(),
            "invalidated project cache entries"
        );
        keys.len()
    }

    /// Drop everything; returns the number removed
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let count = state.entries.len();
        state.entries.clear();
        state.footprint = 0;
        state.prune_gates();
        self.invalidations.fetch_add(count as u64, Ordering::Relaxed);
        tracing::debug!(removed = count, "cleared parse tree cache");
        count
    }

    pub fn entry_count(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn project_entry_count(&self, project: &str) -> usize {
        self.lock()
            .entries
            .keys()
            .filter(|k| k.project == project)
            .count()
    }

    /// Per-key gates currently registered
    pub fn pending_gates(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn contains(&self, project: &str, path: &Path) -> bool {
        self.lock().entries.contains_key(&CacheKey {
            project: project.to_string(),
            path: path.to_path_buf(),
        })
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            enabled: self.settings.enabled,
            entries: state.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            parses: self.parses.load(Ordering::Relaxed),
            footprint_bytes: state.footprint,
            max_bytes: self.settings.max_bytes,
            ttl_seconds: self.settings.ttl.map(|t| t.as_secs()),
        }
    }
}
