// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The capacity-enforced clip storage pipeline.
//!
//! `store_clip` is serialized per client: a lazily-grown map of per-client
//! mutexes makes "check usage, evict oldest, insert new" atomic for one
//! client while uploads from different clients proceed in parallel. The
//! mutex map only grows; its cardinality is bounded by the client count.
//!
//! Size accounting is floor-divided to whole megabytes, matching the
//! operator's unit of configuration. The new clip is stored even when
//! eviction cannot free enough space; running over quota is observable (the
//! capacity-reached notification) but never blocks new footage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base::clock::{Clocks, RealClocks};
use base::{bail, Error};
use jiff::Timestamp;
use tracing::warn;

use crate::clips::Clip;
use crate::db::Database;

/// Capability for capacity notifications. Implementations must not block:
/// actual delivery happens on a background task, and errors are logged there,
/// never propagated into the storage pipeline.
pub trait StorageNotifier: Send + Sync {
    /// Whether current usage warrants a warning (e.g. a percent-full
    /// threshold). The storage manager additionally suppresses the warning
    /// when the same operation is already an overflow.
    fn should_warn(&self, used_megabytes: i64, limit_megabytes: i64) -> bool;

    fn notify_capacity_warning(&self, client_id: &str, used_megabytes: i64, limit_megabytes: i64);

    fn notify_capacity_reached(&self, client_id: &str, used_megabytes: i64, limit_megabytes: i64);
}

/// Capability for motion notifications, fired after a successful store of a
/// clip with motion.
pub trait MotionNotifier: Send + Sync {
    fn notify_motion(&self, client_id: &str, title: &str, at: Timestamp);
}

/// No-op implementation of both notifier capabilities, for tests and for
/// deployments with notifications disabled.
pub struct NopNotifier;

impl StorageNotifier for NopNotifier {
    fn should_warn(&self, _used: i64, _limit: i64) -> bool {
        false
    }
    fn notify_capacity_warning(&self, _client_id: &str, _used: i64, _limit: i64) {}
    fn notify_capacity_reached(&self, _client_id: &str, _used: i64, _limit: i64) {}
}

impl MotionNotifier for NopNotifier {
    fn notify_motion(&self, _client_id: &str, _title: &str, _at: Timestamp) {}
}

pub struct StorageManager<C: Clocks + Clone = RealClocks> {
    db: Arc<Database<C>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    storage_notifier: Arc<dyn StorageNotifier>,
    motion_notifier: Arc<dyn MotionNotifier>,
}

fn to_megabytes(bytes: i64) -> i64 {
    bytes >> 20
}

impl<C: Clocks + Clone> StorageManager<C> {
    pub fn new(
        db: Arc<Database<C>>,
        storage_notifier: Arc<dyn StorageNotifier>,
        motion_notifier: Arc<dyn MotionNotifier>,
    ) -> Self {
        StorageManager {
            db,
            locks: Mutex::new(HashMap::new()),
            storage_notifier,
            motion_notifier,
        }
    }

    /// Load-or-store of the per-client mutex. Entries are never removed.
    fn client_lock(&self, client_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(client_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Stores a clip, evicting the client's oldest clips as needed to honor
    /// its quota.
    pub fn store_clip(&self, clip: Clip) -> Result<(), Error> {
        let limit_mb = match self.db.lock().get_client(&clip.client_id) {
            None => bail!(
                NotFound,
                msg("clip references unknown client {:?}", clip.client_id)
            ),
            Some(c) => c.config.storage_limit_megabytes,
        };

        if limit_mb <= 0 {
            self.db.lock().add_clip(&clip)?;
            self.post_store(&clip);
            return Ok(());
        }

        let lock = self.client_lock(&clip.client_id);
        let guard = lock.lock().unwrap();
        let cid = &clip.client_id;
        let new_mb = to_megabytes(clip.video.data.len() as i64);
        let mut used_mb = to_megabytes(self.db.lock().get_total_storage_usage(cid)?);
        let exceeded = used_mb + new_mb > limit_mb;
        if !exceeded && self.storage_notifier.should_warn(used_mb, limit_mb) {
            self.storage_notifier
                .notify_capacity_warning(cid, used_mb, limit_mb);
        }
        if exceeded {
            self.storage_notifier
                .notify_capacity_reached(cid, used_mb, limit_mb);
        }
        while used_mb + new_mb > limit_mb {
            let oldest = self.db.lock().get_oldest_clips(cid, 1)?;
            let Some(oldest) = oldest.first() else {
                break; // nothing left to evict; store anyway.
            };
            if let Err(e) = self.db.lock().delete_clip(oldest.id) {
                warn!(client = %cid, clip = %oldest.id, err = %e.chain(), "eviction failed");
                break; // store anyway.
            }
            used_mb = to_megabytes(self.db.lock().get_total_storage_usage(cid)?);
        }
        self.db.lock().add_clip(&clip)?;
        drop(guard);
        self.post_store(&clip);
        Ok(())
    }

    fn post_store(&self, clip: &Clip) {
        if clip.has_motion {
            self.motion_notifier
                .notify_motion(&clip.client_id, &clip.title, clip.start);
        }
    }
}
