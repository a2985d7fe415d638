//! Fragment cache for chunk dialects
//!
//! Fragments are grouped per peer tag, then per sign. Each peer cache keeps
//! the signs in first-arrival order so the evictor can find the oldest one.
//! Resident bytes are tracked per peer and globally; when the global total
//! crosses the clear threshold a single background evictor removes the
//! oldest sign across all peers. One victim per breach: the next write
//! re-triggers if memory is still over the threshold.

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::chunk::ChunkDialect;
use super::{AnyDialect, Dialect, DialectFactory};

/// Default clear threshold: 100 MiB
pub const DEFAULT_CLEAR_THRESHOLD: u64 = 100 * 1024 * 1024;

/// How `read` interprets its index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadOrder {
    /// Index is the n-th fragment to arrive. Correct only for in-order delivery.
    #[default]
    Arrival,
    /// Index is the fragment's own `chunk_index`; a repeated index replaces the
    /// earlier fragment instead of being counted twice.
    Declared,
}

#[derive(Debug, Clone)]
struct SignAge {
    sign: String,
    arrived_at: DateTime<Utc>,
    sequence: u64,
}

#[derive(Default)]
struct PeerState {
    signs: HashMap<String, Vec<ChunkDialect>>,
    ages: VecDeque<SignAge>,
}

struct PeerCache {
    state: Mutex<PeerState>,
    data_size: AtomicU64,
}

impl PeerCache {
    fn new() -> Self {
        Self {
            state: Mutex::new(PeerState::default()),
            data_size: AtomicU64::new(0),
        }
    }
}

/// Snapshot of one cached sign
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignStat {
    /// Reassembly key
    pub sign: String,
    /// Fragments received
    pub fragments: usize,
    /// Resident bytes
    pub bytes: u64,
    /// First fragment arrival
    pub arrived_at: DateTime<Utc>,
}

struct ChunkStore {
    caches: RwLock<HashMap<String, Arc<PeerCache>>>,
    memory_size: AtomicU64,
    clear_threshold: u64,
    read_order: ReadOrder,
    evicting: Mutex<bool>,
    evicted: Condvar,
    sequence: AtomicU64,
}

impl ChunkStore {
    fn write(self: &Arc<Self>, tag: &str, chunk: &ChunkDialect) {
        let memory = loop {
            {
                let caches = self.caches.read();
                if let Some(cache) = caches.get(tag) {
                    break self.insert(cache, chunk);
                }
            }
            self.caches
                .write()
                .entry(tag.to_string())
                .or_insert_with(|| Arc::new(PeerCache::new()));
        };

        if memory > self.clear_threshold {
            self.start_evictor(memory);
        }
    }

    /// Insert under the peer lock; returns global resident bytes afterwards
    ///
    /// Both counters move while the peer lock is held, matching `clear`.
    fn insert(&self, cache: &PeerCache, chunk: &ChunkDialect) -> u64 {
        let mut state = cache.state.lock();
        let PeerState { signs, ages } = &mut *state;

        let fragments = signs.entry(chunk.sign().to_string()).or_insert_with(|| {
            ages.push_back(SignAge {
                sign: chunk.sign().to_string(),
                arrived_at: Utc::now(),
                sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            });
            Vec::new()
        });

        if let Some(first) = fragments.first() {
            if first.chunk_num() != chunk.chunk_num() {
                tracing::debug!(
                    sign = %chunk.sign(),
                    expected = first.chunk_num(),
                    got = chunk.chunk_num(),
                    "chunk count differs from first fragment"
                );
            }
        }

        let added = chunk.length() as u64;
        let replaced = match self.read_order {
            ReadOrder::Declared => fragments
                .iter_mut()
                .find(|existing| existing.chunk_index() == chunk.chunk_index()),
            ReadOrder::Arrival => None,
        };
        let removed = match replaced {
            Some(existing) => {
                let removed = existing.length() as u64;
                *existing = chunk.clone();
                removed
            }
            None => {
                fragments.push(chunk.clone());
                0
            }
        };

        if added >= removed {
            let delta = added - removed;
            cache.data_size.fetch_add(delta, Ordering::SeqCst);
            self.memory_size
                .fetch_add(delta, Ordering::SeqCst)
                .saturating_add(delta)
        } else {
            let delta = removed - added;
            cache.data_size.fetch_sub(delta, Ordering::SeqCst);
            self.memory_size
                .fetch_sub(delta, Ordering::SeqCst)
                .saturating_sub(delta)
        }
    }

    fn start_evictor(self: &Arc<Self>, memory: u64) {
        let mut running = self.evicting.lock();
        if *running {
            return;
        }
        *running = true;

        tracing::debug!(memory, threshold = self.clear_threshold, "starting chunk evictor");
        let store = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("chunk-evictor".to_string())
            .spawn(move || store.evict_oldest());

        if let Err(err) = spawned {
            tracing::error!(error = %err, "failed to spawn chunk evictor");
            *running = false;
            self.evicted.notify_all();
        }
    }

    fn evict_oldest(&self) {
        let mut empty = Vec::new();
        let mut victim: Option<(String, SignAge)> = None;
        {
            let caches = self.caches.read();
            for (tag, cache) in caches.iter() {
                let state = cache.state.lock();
                if state.signs.is_empty() {
                    empty.push(tag.clone());
                    continue;
                }
                if let Some(oldest) = state.ages.front() {
                    let older = victim.as_ref().is_none_or(|(_, current)| {
                        (oldest.arrived_at, oldest.sequence) < (current.arrived_at, current.sequence)
                    });
                    if older {
                        victim = Some((tag.clone(), oldest.clone()));
                    }
                }
            }
        }

        if let Some((tag, age)) = victim {
            let freed = self.clear(&tag, &age.sign);
            tracing::info!(
                tag = %tag,
                sign = %age.sign,
                freed,
                memory = self.memory_size.load(Ordering::SeqCst),
                "evicted oldest chunk sign"
            );
        }

        if !empty.is_empty() {
            let mut caches = self.caches.write();
            for tag in empty {
                let still_empty = caches
                    .get(&tag)
                    .is_some_and(|cache| cache.state.lock().signs.is_empty());
                if still_empty {
                    caches.remove(&tag);
                }
            }
        }

        let mut running = self.evicting.lock();
        *running = false;
        self.evicted.notify_all();
    }

    fn clear(&self, tag: &str, sign: &str) -> u64 {
        let (freed, now_empty) = {
            let caches = self.caches.read();
            let Some(cache) = caches.get(tag) else {
                return 0;
            };
            let mut state = cache.state.lock();
            let Some(fragments) = state.signs.remove(sign) else {
                return 0;
            };
            state.ages.retain(|age| age.sign != sign);

            let freed: u64 = fragments.iter().map(|f| f.length() as u64).sum();
            cache.data_size.fetch_sub(freed, Ordering::SeqCst);
            self.memory_size.fetch_sub(freed, Ordering::SeqCst);
            (freed, state.signs.is_empty())
        };

        if now_empty {
            let mut caches = self.caches.write();
            let still_empty = caches
                .get(tag)
                .is_some_and(|cache| cache.state.lock().signs.is_empty());
            if still_empty {
                caches.remove(tag);
            }
        }
        freed
    }

    fn with_fragments<T>(&self, tag: &str, sign: &str, f: impl FnOnce(&[ChunkDialect]) -> T) -> Option<T> {
        let caches = self.caches.read();
        let cache = caches.get(tag)?;
        let state = cache.state.lock();
        state.signs.get(sign).map(|fragments| f(fragments))
    }

    fn locate<'a>(&self, fragments: &'a [ChunkDialect], index: usize) -> Option<&'a ChunkDialect> {
        match self.read_order {
            ReadOrder::Arrival => fragments.get(index),
            ReadOrder::Declared => fragments
                .iter()
                .find(|fragment| fragment.chunk_index() as usize == index),
        }
    }
}

/// Factory and fragment cache for [`ChunkDialect`]
pub struct ChunkDialectFactory {
    store: Arc<ChunkStore>,
}

impl ChunkDialectFactory {
    /// Create a cache evicting above `clear_threshold` resident bytes
    pub fn new(clear_threshold: u64, read_order: ReadOrder) -> Self {
        Self {
            store: Arc::new(ChunkStore {
                caches: RwLock::new(HashMap::new()),
                memory_size: AtomicU64::new(0),
                clear_threshold,
                read_order,
                evicting: Mutex::new(false),
                evicted: Condvar::new(),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    /// Configured clear threshold
    pub fn clear_threshold(&self) -> u64 {
        self.store.clear_threshold
    }

    /// Configured read order
    pub fn read_order(&self) -> ReadOrder {
        self.store.read_order
    }

    /// Cache a fragment under its owner tag and sign
    ///
    /// Never fails on memory pressure; crossing the threshold only schedules
    /// eviction. Fragments without an owner tag cannot be addressed and are
    /// not cached.
    pub fn write(&self, chunk: &ChunkDialect) {
        match chunk.meta().owner_tag() {
            Some(tag) => self.store.write(tag, chunk),
            None => {
                tracing::warn!(sign = %chunk.sign(), "chunk without owner tag not cached");
            }
        }
    }

    /// Copy fragment `index` of a sign into `out`
    ///
    /// Returns the number of bytes copied, or `None` if the fragment is not
    /// cached. In [`ReadOrder::Arrival`] mode `index` counts arrivals, so
    /// callers must ensure in-order delivery before reassembling by index.
    pub fn read(&self, tag: &str, sign: &str, index: usize, out: &mut [u8]) -> Option<usize> {
        self.store
            .with_fragments(tag, sign, |fragments| {
                self.store.locate(fragments, index).map(|fragment| {
                    let len = fragment.length().min(out.len());
                    out[..len].copy_from_slice(&fragment.data()[..len]);
                    len
                })
            })
            .flatten()
    }

    /// Copy of fragment `index` of a sign
    pub fn read_fragment(&self, tag: &str, sign: &str, index: usize) -> Option<ChunkDialect> {
        self.store
            .with_fragments(tag, sign, |fragments| {
                self.store.locate(fragments, index).cloned()
            })
            .flatten()
    }

    /// Valid length of fragment `index` of a sign
    pub fn fragment_length(&self, tag: &str, sign: &str, index: usize) -> Option<usize> {
        self.store
            .with_fragments(tag, sign, |fragments| {
                self.store.locate(fragments, index).map(ChunkDialect::length)
            })
            .flatten()
    }

    /// Fragments received for a sign
    pub fn fragment_count(&self, tag: &str, sign: &str) -> usize {
        self.store
            .with_fragments(tag, sign, <[ChunkDialect]>::len)
            .unwrap_or(0)
    }

    /// Whether as many fragments arrived as the first one announced
    pub fn check_completed(&self, tag: &str, sign: &str) -> bool {
        self.store
            .with_fragments(tag, sign, |fragments| {
                fragments
                    .first()
                    .is_some_and(|first| fragments.len() == first.chunk_num() as usize)
            })
            .unwrap_or(false)
    }

    /// Drop a sign's fragments; returns the bytes freed
    pub fn clear(&self, tag: &str, sign: &str) -> u64 {
        self.store.clear(tag, sign)
    }

    /// Resident bytes across all peers
    pub fn memory_size(&self) -> u64 {
        self.store.memory_size.load(Ordering::SeqCst)
    }

    /// Resident bytes for one peer
    pub fn cache_size(&self, tag: &str) -> u64 {
        self.store
            .caches
            .read()
            .get(tag)
            .map_or(0, |cache| cache.data_size.load(Ordering::SeqCst))
    }

    /// Peer tags with cached fragments
    pub fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.store.caches.read().keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Signs cached for a peer, oldest first
    pub fn signs(&self, tag: &str) -> Vec<SignStat> {
        let caches = self.store.caches.read();
        let Some(cache) = caches.get(tag) else {
            return Vec::new();
        };
        let state = cache.state.lock();
        state
            .ages
            .iter()
            .filter_map(|age| {
                let fragments = state.signs.get(&age.sign)?;
                Some(SignStat {
                    sign: age.sign.clone(),
                    fragments: fragments.len(),
                    bytes: fragments.iter().map(|f| f.length() as u64).sum(),
                    arrived_at: age.arrived_at,
                })
            })
            .collect()
    }

    /// Whether an evictor is currently running
    pub fn is_evicting(&self) -> bool {
        *self.store.evicting.lock()
    }

    /// Block until no evictor is running; `false` on timeout
    pub fn wait_for_eviction(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut running = self.store.evicting.lock();
        while *running {
            if self.store.evicted.wait_until(&mut running, deadline).timed_out() {
                return !*running;
            }
        }
        true
    }

    /// Drop every cached fragment
    pub fn shutdown(&self) {
        let mut caches = self.store.caches.write();
        caches.clear();
        self.store.memory_size.store(0, Ordering::SeqCst);
    }
}

impl Default for ChunkDialectFactory {
    fn default() -> Self {
        Self::new(DEFAULT_CLEAR_THRESHOLD, ReadOrder::default())
    }
}

impl DialectFactory for ChunkDialectFactory {
    fn name(&self) -> &str {
        ChunkDialect::NAME
    }

    fn create(&self, tracker: &str) -> AnyDialect {
        AnyDialect::Chunk(ChunkDialect::with_tracker(tracker))
    }

    fn built(&self, dialect: &AnyDialect) {
        if let Some(chunk) = dialect.as_chunk() {
            self.write(chunk);
        }
    }

    fn shutdown(&self) {
        ChunkDialectFactory::shutdown(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(tag: &str, sign: &str, index: u32, num: u32, data: &[u8]) -> ChunkDialect {
        let mut chunk = ChunkDialect::new(sign, 0, index, num, data.to_vec());
        chunk.meta_mut().set_owner_tag(tag);
        chunk
    }

    #[test]
    fn test_read_missing_sign_returns_none() {
        let factory = ChunkDialectFactory::default();
        let mut buf = [0u8; 8];
        assert_eq!(factory.read("peer", "nothing", 0, &mut buf), None);
        assert!(!factory.check_completed("peer", "nothing"));
    }

    #[test]
    fn test_read_copies_valid_length() {
        let factory = ChunkDialectFactory::default();
        factory.write(&fragment("p", "s", 0, 1, b"abc"));

        let mut buf = [0u8; 8];
        assert_eq!(factory.read("p", "s", 0, &mut buf), Some(3));
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(factory.read("p", "s", 1, &mut buf), None);

        let mut small = [0u8; 2];
        assert_eq!(factory.read("p", "s", 0, &mut small), Some(2));
    }

    #[test]
    fn test_arrival_order_indexes_by_arrival() {
        let factory = ChunkDialectFactory::new(DEFAULT_CLEAR_THRESHOLD, ReadOrder::Arrival);
        factory.write(&fragment("p", "s", 1, 2, b"second"));
        factory.write(&fragment("p", "s", 0, 2, b"first"));

        let mut buf = [0u8; 16];
        let len = factory.read("p", "s", 0, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"second");
    }

    #[test]
    fn test_declared_order_indexes_by_chunk_index() {
        let factory = ChunkDialectFactory::new(DEFAULT_CLEAR_THRESHOLD, ReadOrder::Declared);
        factory.write(&fragment("p", "s", 1, 2, b"second"));
        factory.write(&fragment("p", "s", 1, 2, b"again"));
        assert!(!factory.check_completed("p", "s"));
        assert_eq!(factory.memory_size(), 5);

        factory.write(&fragment("p", "s", 0, 2, b"first"));
        assert!(factory.check_completed("p", "s"));

        let mut buf = [0u8; 16];
        let len = factory.read("p", "s", 0, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"first");
    }

    #[test]
    fn test_clear_updates_totals_and_drops_peer() {
        let factory = ChunkDialectFactory::default();
        factory.write(&fragment("p", "a", 0, 2, &[0; 10]));
        factory.write(&fragment("p", "b", 0, 1, &[0; 5]));
        assert_eq!(factory.memory_size(), 15);
        assert_eq!(factory.cache_size("p"), 15);

        assert_eq!(factory.clear("p", "a"), 10);
        assert_eq!(factory.memory_size(), 5);
        assert_eq!(factory.signs("p").len(), 1);

        assert_eq!(factory.clear("p", "b"), 5);
        assert!(factory.peers().is_empty());
        assert_eq!(factory.clear("p", "b"), 0);
    }

    #[test]
    fn test_built_hook_caches_chunk() {
        let factory = ChunkDialectFactory::default();
        let dialect: AnyDialect = fragment("p", "s", 0, 1, b"x").into();
        factory.built(&dialect);
        assert!(factory.check_completed("p", "s"));
    }
}
