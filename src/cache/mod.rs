use indexmap::IndexMap;

pub const DEFAULT_CAPACITY: usize = 100;

/// Bounded LRU map from entity id to content body.
///
/// Content bodies are large and loaded lazily, only when an entity becomes
/// selected; this cache keeps recently viewed bodies around so re-selecting
/// an entity does not re-fetch it. A miss is never an error: callers fall
/// back to a backend fetch and write the result back through `put`.
///
/// Recency is refreshed on both reads and writes. Eviction is strict LRU:
/// the entry touched longest ago goes first, regardless of size.
#[derive(Debug)]
pub struct ContentCache {
    entries: IndexMap<String, String>,
    capacity: usize,
}

impl ContentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Look up a body, marking the entry as most recently used.
    pub fn get(&mut self, id: &str) -> Option<&str> {
        // IndexMap keeps insertion order; re-inserting moves the key to the
        // back, which is the "freshest" end.
        let body = self.entries.shift_remove(id)?;
        self.entries.insert(id.to_string(), body);
        self.entries.get(id).map(String::as_str)
    }

    /// Insert or refresh an entry, evicting the least-recently-touched one
    /// when the capacity bound would be exceeded.
    pub fn put(&mut self, id: impl Into<String>, body: impl Into<String>) {
        let id = id.into();
        self.entries.shift_remove(&id);
        if self.entries.len() >= self.capacity {
            if let Some((evicted, _)) = self.entries.shift_remove_index(0) {
                tracing::debug!(%evicted, "content cache full, evicting oldest entry");
            }
        }
        self.entries.insert(id, body.into());
    }

    /// Drop an entry, typically after the entity was deleted.
    pub fn invalidate(&mut self, id: &str) {
        self.entries.shift_remove(id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
