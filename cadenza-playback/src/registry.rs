//! # Stream Registry
//!
//! Process-wide mapping from integer handles to live streams. Handles come
//! from a monotonically increasing allocator and are never reused within a
//! process lifetime.
//!
//! Lock discipline: the registry mutex is always released before a stream's
//! own mutex is taken, giving the strict order registry → stream.

use crate::stream::PcmStream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct RegistryInner {
    streams: HashMap<i64, Arc<PcmStream>>,
    next_handle: i64,
}

/// Handle table for all live PCM streams.
pub struct StreamRegistry {
    inner: Mutex<RegistryInner>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                streams: HashMap::new(),
                next_handle: 1,
            }),
        }
    }

    /// Reserve the next handle. Handles start at 1 and only grow, so a
    /// handle stays invalid forever once its stream is gone.
    pub fn allocate_handle(&self) -> i64 {
        let mut inner = self.inner.lock();
        let handle = inner.next_handle;
        inner.next_handle += 1;
        handle
    }

    pub fn insert(&self, handle: i64, stream: Arc<PcmStream>) {
        self.inner.lock().streams.insert(handle, stream);
    }

    /// Look up a live stream. The returned `Arc` outlives the registry
    /// lock, which is released before the caller touches the stream.
    pub fn get(&self, handle: i64) -> Option<Arc<PcmStream>> {
        self.inner.lock().streams.get(&handle).cloned()
    }

    /// Remove a stream from the table, returning it for teardown.
    pub fn remove(&self, handle: i64) -> Option<Arc<PcmStream>> {
        self.inner.lock().streams.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}
