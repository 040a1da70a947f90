//! Frame-indexed render cache.
//!
//! Emulated chips cannot be random-accessed: reaching frame N means replaying
//! every cycle before it. The render loop therefore keeps recently rendered
//! PCM here, keyed by start frame, so seeking back into already-rendered audio
//! costs a lookup instead of a replay.
//!
//! # Invariants
//!
//! - Segments never overlap; inserting over an existing range trims or splits
//!   the older segments (newest data wins).
//! - Total PCM bytes never exceed the budget. The least-recently-accessed
//!   segment is evicted first.
//! - Entries belong to one `(tune, song)` scope. Changing scope clears the
//!   cache.
//!
//! A miss is never an error. Every caller must be able to re-render.

use crate::config::CacheConfig;
use log::trace;
use sidflow_common::{PcmChunk, PcmFormat};
use std::collections::BTreeMap;

/// Identity of the audio a cache holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheScope {
    /// Hash of the loaded tune bytes.
    pub tune_id: u64,
    /// 1-based selected song.
    pub song: u16,
}

/// Result of [`RenderCache::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// The whole requested range was cached.
    Hit(PcmChunk),
    /// At least part of the range is missing.
    Miss,
}

impl CacheLookup {
    /// Whether the lookup hit.
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    /// The cached chunk, if any.
    pub fn into_chunk(self) -> Option<PcmChunk> {
        match self {
            CacheLookup::Hit(chunk) => Some(chunk),
            CacheLookup::Miss => None,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheSegment {
    chunk: PcmChunk,
    last_access: u64,
}

/// Hit/miss counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups fully served from the cache.
    pub hits: u64,
    /// Lookups that fell back to rendering.
    pub misses: u64,
    /// Segments evicted to stay within budget.
    pub evictions: u64,
}

/// LRU cache of rendered PCM segments
#[derive(Debug, Clone)]
pub struct RenderCache {
    segments: BTreeMap<u64, CacheSegment>,
    channels: u16,
    budget_bytes: usize,
    total_bytes: usize,
    scope: Option<CacheScope>,
    /// Logical clock for LRU ordering
    tick: u64,
    stats: CacheStats,
}

impl RenderCache {
    /// Create an empty cache for `channels`-channel PCM.
    pub fn new(budget_bytes: usize, channels: u16) -> Self {
        Self {
            segments: BTreeMap::new(),
            channels: channels.max(1),
            budget_bytes,
            total_bytes: 0,
            scope: None,
            tick: 0,
            stats: CacheStats::default(),
        }
    }

    /// Create a cache sized from configuration for a session format.
    pub fn from_config(config: &CacheConfig, format: PcmFormat) -> Self {
        let budget = config
            .budget_bytes
            .unwrap_or_else(|| format.bytes_for_seconds(config.budget_seconds));
        Self::new(budget, format.channels)
    }

    /// Re-target the cache at a new session format, dropping all segments.
    pub fn reconfigure(&mut self, config: &CacheConfig, format: PcmFormat) {
        *self = Self::from_config(config, format);
    }

    /// Switch to `scope`, clearing every segment if it differs.
    ///
    /// Returns `true` if the cache was cleared.
    pub fn set_scope(&mut self, scope: CacheScope) -> bool {
        if self.scope == Some(scope) {
            return false;
        }
        self.clear();
        self.scope = Some(scope);
        true
    }

    /// Current scope.
    pub fn scope(&self) -> Option<CacheScope> {
        self.scope
    }

    /// Store a rendered chunk.
    ///
    /// Older segments overlapping its range are trimmed. Chunks with a
    /// different channel count or larger than the whole budget are ignored.
    pub fn put(&mut self, chunk: PcmChunk) {
        if chunk.is_empty() || chunk.channels() != self.channels {
            return;
        }
        let bytes = chunk.byte_len();
        if bytes > self.budget_bytes {
            trace!(
                "render cache: segment at frame {} ({bytes} bytes) exceeds budget",
                chunk.start_frame()
            );
            return;
        }

        self.remove_overlap(chunk.start_frame(), chunk.end_frame());
        while self.total_bytes + bytes > self.budget_bytes {
            if !self.evict_lru() {
                break;
            }
        }

        let last_access = self.next_tick();
        self.total_bytes += bytes;
        self.segments
            .insert(chunk.start_frame(), CacheSegment { chunk, last_access });
    }

    /// Look up exactly `frame_count` frames starting at `start_frame`.
    pub fn get(&mut self, start_frame: u64, frame_count: u64) -> CacheLookup {
        if frame_count == 0 {
            return CacheLookup::Hit(PcmChunk::empty(start_frame, self.channels));
        }
        match self.cached_run(start_frame, frame_count) {
            Some(run) if run.frame_count() == frame_count => {
                self.stats.hits += 1;
                CacheLookup::Hit(run)
            }
            _ => {
                self.stats.misses += 1;
                CacheLookup::Miss
            }
        }
    }

    /// Longest cached run starting at `start_frame`, up to `max_frames`.
    ///
    /// Follows contiguous segments. Every segment touched becomes most
    /// recently used.
    pub fn cached_run(&mut self, start_frame: u64, max_frames: u64) -> Option<PcmChunk> {
        if max_frames == 0 {
            return None;
        }
        let first_key = self.segment_containing(start_frame)?;
        let end_limit = start_frame.saturating_add(max_frames);

        let mut keys = vec![first_key];
        let mut covered_to = self.segments[&first_key].chunk.end_frame();
        while covered_to < end_limit {
            match self.segments.get(&covered_to) {
                Some(next) => {
                    keys.push(covered_to);
                    covered_to = next.chunk.end_frame();
                }
                None => break,
            }
        }

        let tick = self.next_tick();
        let mut parts = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(segment) = self.segments.get_mut(&key) {
                segment.last_access = tick;
                let chunk = &segment.chunk;
                let from = start_frame.max(chunk.start_frame());
                let to = end_limit.min(chunk.end_frame());
                parts.push(chunk.slice_frames(from - chunk.start_frame(), to - from));
            }
        }
        Some(PcmChunk::concat(start_frame, self.channels, &parts))
    }

    /// Whether `frame` is cached.
    pub fn contains(&self, frame: u64) -> bool {
        self.segment_containing(frame).is_some()
    }

    /// Drop every segment (scope is kept).
    pub fn clear(&mut self) {
        self.segments.clear();
        self.total_bytes = 0;
    }

    /// Number of stored segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Bytes of PCM currently stored.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Configured byte budget.
    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    /// Hit/miss/eviction counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Frame ranges currently cached, in order (for diagnostics and tests).
    pub fn ranges(&self) -> Vec<(u64, u64)> {
        self.segments
            .values()
            .map(|s| (s.chunk.start_frame(), s.chunk.end_frame()))
            .collect()
    }

    fn segment_containing(&self, frame: u64) -> Option<u64> {
        self.segments
            .range(..=frame)
            .next_back()
            .filter(|(_, segment)| segment.chunk.end_frame() > frame)
            .map(|(key, _)| *key)
    }

    fn remove_overlap(&mut self, start: u64, end: u64) {
        let head = self.segment_containing(start);
        let mut overlapping: Vec<u64> = head.into_iter().collect();
        overlapping.extend(
            self.segments
                .range(start..end)
                .map(|(key, _)| *key)
                .filter(|key| head != Some(*key)),
        );

        for key in overlapping {
            let Some(segment) = self.segments.remove(&key) else {
                continue;
            };
            self.total_bytes -= segment.chunk.byte_len();
            let chunk = &segment.chunk;

            if chunk.start_frame() < start {
                let head = chunk.slice_frames(0, start - chunk.start_frame());
                self.reinsert(head, segment.last_access);
            }
            if chunk.end_frame() > end {
                let tail = chunk.slice_frames(end - chunk.start_frame(), chunk.end_frame() - end);
                self.reinsert(tail, segment.last_access);
            }
        }
    }

    fn reinsert(&mut self, chunk: PcmChunk, last_access: u64) {
        self.total_bytes += chunk.byte_len();
        self.segments
            .insert(chunk.start_frame(), CacheSegment { chunk, last_access });
    }

    fn evict_lru(&mut self) -> bool {
        let victim = self
            .segments
            .iter()
            .min_by_key(|(_, segment)| segment.last_access)
            .map(|(key, _)| *key);
        match victim.and_then(|key| self.segments.remove(&key)) {
            Some(segment) => {
                self.total_bytes -= segment.chunk.byte_len();
                self.stats.evictions += 1;
                trace!(
                    "render cache: evicted frames {}..{}",
                    segment.chunk.start_frame(),
                    segment.chunk.end_frame()
                );
                true
            }
            None => false,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}
