// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Byte-budgeted LRU cache over normalized MPEG-TS segments.
//!
//! One lock protects the whole structure. The linked map keeps the
//! most-recently-used entry at the back and evicts from the front; `get`
//! returns a copy of the bytes, never an alias into the cache's own buffer.

use std::sync::Mutex;
use std::time::Instant;

use base::{bail, Error};
use hashlink::LinkedHashMap;
use uuid::Uuid;

struct Entry {
    data: Vec<u8>,
    created: Instant,
    last_access: Instant,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub current_size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub utilization_percent: f64,
}

struct Inner {
    map: LinkedHashMap<Uuid, Entry>,
    current_size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

pub struct SegmentCache {
    max_size: usize,
    inner: Mutex<Inner>,
}

impl SegmentCache {
    pub fn new(max_size: usize) -> Self {
        SegmentCache {
            max_size,
            inner: Mutex::new(Inner {
                map: LinkedHashMap::new(),
                current_size: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    /// Returns a copy of the cached segment, refreshing its recency.
    pub fn get(&self, clip_id: Uuid) -> Option<Vec<u8>> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        match inner.map.raw_entry_mut().from_key(&clip_id) {
            hashlink::linked_hash_map::RawEntryMut::Occupied(mut occupied) => {
                occupied.to_back();
                let entry = occupied.get_mut();
                entry.last_access = Instant::now();
                let data = entry.data.clone();
                inner.hits += 1;
                Some(data)
            }
            hashlink::linked_hash_map::RawEntryMut::Vacant(_) => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Inserts or replaces a segment, then evicts least-recently-used
    /// entries until the byte budget holds.
    ///
    /// Empty segments and segments larger than the whole budget are
    /// rejected.
    pub fn set(&self, clip_id: Uuid, data: Vec<u8>) -> Result<(), Error> {
        if data.is_empty() {
            bail!(InvalidArgument, msg("refusing to cache an empty segment"));
        }
        if data.len() > self.max_size {
            bail!(
                InvalidArgument,
                msg(
                    "segment of {} bytes exceeds the cache budget of {}",
                    data.len(),
                    self.max_size
                )
            );
        }
        let now = Instant::now();
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        match inner.map.raw_entry_mut().from_key(&clip_id) {
            hashlink::linked_hash_map::RawEntryMut::Occupied(mut occupied) => {
                occupied.to_back();
                let entry = occupied.get_mut();
                let old_len = entry.data.len();
                entry.data = data;
                entry.last_access = now;
                let new_len = entry.data.len();
                inner.current_size = inner.current_size - old_len + new_len;
            }
            hashlink::linked_hash_map::RawEntryMut::Vacant(vacant) => {
                let len = data.len();
                vacant.insert(
                    clip_id,
                    Entry {
                        data,
                        created: now,
                        last_access: now,
                    },
                );
                inner.current_size += len;
            }
        }
        while inner.current_size > self.max_size {
            let (_, evicted) = inner.map.pop_front().expect("nonempty while over budget");
            inner.current_size -= evicted.data.len();
            inner.evictions += 1;
        }
        Ok(())
    }

    pub fn delete(&self, clip_id: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.map.remove(&clip_id) {
            inner.current_size -= entry.data.len();
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.clear();
        inner.current_size = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            entries: inner.map.len(),
            current_size: inner.current_size,
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            utilization_percent: if self.max_size == 0 {
                0.0
            } else {
                inner.current_size as f64 * 100.0 / self.max_size as f64
            },
        }
    }

    /// Age of an entry, for diagnostics.
    #[cfg(test)]
    fn entry_times(&self, clip_id: Uuid) -> Option<(Instant, Instant)> {
        let inner = self.inner.lock().unwrap();
        inner
            .map
            .get(&clip_id)
            .map(|e| (e.created, e.last_access))
    }
}
