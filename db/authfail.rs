// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Sliding-window tracking of client authentication failures.
//!
//! The tracker drives two things: rate-limited alert notifications and the
//! auto-disable threshold. Only failures against existing clients should be
//! recorded, so unknown-id scans cannot grow the list.
//!
//! All clients share one list under one mutex. Each call scans the whole
//! window, which is linear in the number of retained failures; that stays
//! cheap because failures are sparse by construction.

use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use jiff::Timestamp;

#[derive(Clone, Debug)]
struct Failure {
    client_id: String,
    #[allow(dead_code)] // recorded for notification bodies.
    addr: Option<IpAddr>,
    at: Timestamp,
}

#[derive(Clone, Copy, Debug)]
pub struct FailureTrackerConfig {
    /// Failure count at which a client is automatically disabled;
    /// zero disables auto-disable entirely.
    pub auto_disable_threshold: usize,

    /// How long a failure stays in the window.
    pub window: Duration,
}

impl Default for FailureTrackerConfig {
    fn default() -> Self {
        FailureTrackerConfig {
            auto_disable_threshold: 10,
            window: Duration::from_secs(3600),
        }
    }
}

pub struct FailureTracker {
    config: FailureTrackerConfig,
    failures: Mutex<Vec<Failure>>,
}

impl FailureTracker {
    pub fn new(config: FailureTrackerConfig) -> Self {
        FailureTracker {
            config,
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Records a failure at `at`, prunes everything strictly older than
    /// `at - window`, and returns how many failures remain for `client_id`.
    ///
    /// A record whose timestamp is exactly at the window boundary is
    /// retained.
    pub fn record_failure(&self, client_id: &str, addr: Option<IpAddr>, at: Timestamp) -> usize {
        let window = jiff::SignedDuration::try_from(self.config.window)
            .expect("window within SignedDuration range");
        let cutoff = at.checked_sub(window).expect("cutoff representable");
        let mut failures = self.failures.lock().unwrap();
        failures.push(Failure {
            client_id: client_id.to_owned(),
            addr,
            at,
        });
        failures.retain(|f| f.at >= cutoff);
        failures.iter().filter(|f| f.client_id == client_id).count()
    }

    /// Whether `count` failures warrant disabling the client.
    pub fn should_auto_disable(&self, count: usize) -> bool {
        self.config.auto_disable_threshold > 0 && count >= self.config.auto_disable_threshold
    }
}
