// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Operator notifications: capacity warnings/overflows, motion events, and
//! authentication-failure alerts.
//!
//! Delivery goes through an injected [`Mailer`] capability; the SMTP wire
//! transport lives outside this crate, and the bundled [`LogMailer`] simply
//! writes to the log. Each notifier rate-limits per client under its own
//! mutex and hands the actual send to a background task, so the request path
//! never waits on delivery. Send errors are logged, never propagated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base::clock::Clocks;
use base::Error;
use jiff::Timestamp;
use tracing::{info, warn};

pub trait Mailer: Send + Sync {
    fn send(&self, subject: &str, body: &str) -> Result<(), Error>;
}

/// Writes would-be emails to the log, noting who they were addressed to.
pub struct LogMailer {
    recipients: Vec<String>,
}

impl LogMailer {
    pub fn new(recipients: Vec<String>) -> Self {
        LogMailer { recipients }
    }
}

impl Mailer for LogMailer {
    fn send(&self, subject: &str, body: &str) -> Result<(), Error> {
        info!(to = ?self.recipients, subject, body, "notification");
        Ok(())
    }
}

/// Capability consulted by the capture surface on authentication failures.
pub trait AuthNotifier: Send + Sync {
    fn should_notify(&self, failure_count: usize) -> bool;
    fn notify_auth_failures(&self, client_id: &str, failure_count: usize);
}

fn send_in_background(mailer: Arc<dyn Mailer>, subject: String, body: String) {
    let send = move || {
        if let Err(e) = mailer.send(&subject, &body) {
            warn!(subject, err = %e.chain(), "notification delivery failed");
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { send() });
        }
        // Outside a runtime (tests, shutdown paths) deliver inline.
        Err(_) => send(),
    }
}

/// Tracks `last_notification_at[client_id]` and enforces a minimum interval.
struct RateLimiter<C: Clocks> {
    clocks: C,
    min_interval: Duration,
    last: Mutex<HashMap<String, Timestamp>>,
}

impl<C: Clocks> RateLimiter<C> {
    fn new(clocks: C, min_interval: Duration) -> Self {
        RateLimiter {
            clocks,
            min_interval,
            last: Mutex::new(HashMap::new()),
        }
    }

    fn allow(&self, client_id: &str) -> bool {
        let now = self.clocks.now();
        let mut last = self.last.lock().unwrap();
        if let Some(prev) = last.get(client_id) {
            let elapsed_ms = now.as_millisecond() - prev.as_millisecond();
            if elapsed_ms < self.min_interval.as_millis() as i64 {
                return false;
            }
        }
        last.insert(client_id.to_owned(), now);
        true
    }
}

pub struct StorageEmailNotifier<C: Clocks> {
    mailer: Arc<dyn Mailer>,
    warn_percent: i64,
    limiter: RateLimiter<C>,
}

impl<C: Clocks> StorageEmailNotifier<C> {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        clocks: C,
        warn_percent: i64,
        min_interval: Duration,
    ) -> Self {
        StorageEmailNotifier {
            mailer,
            warn_percent,
            limiter: RateLimiter::new(clocks, min_interval),
        }
    }
}

impl<C: Clocks> db::storage::StorageNotifier for StorageEmailNotifier<C> {
    fn should_warn(&self, used_megabytes: i64, limit_megabytes: i64) -> bool {
        limit_megabytes > 0 && used_megabytes * 100 >= limit_megabytes * self.warn_percent
    }

    fn notify_capacity_warning(&self, client_id: &str, used_megabytes: i64, limit_megabytes: i64) {
        if !self.limiter.allow(client_id) {
            return;
        }
        send_in_background(
            self.mailer.clone(),
            format!("CryoSpy: storage warning for {client_id}"),
            format!(
                "Client {client_id} has used {used_megabytes} of {limit_megabytes} MB \
                 of clip storage."
            ),
        );
    }

    fn notify_capacity_reached(&self, client_id: &str, used_megabytes: i64, limit_megabytes: i64) {
        if !self.limiter.allow(client_id) {
            return;
        }
        send_in_background(
            self.mailer.clone(),
            format!("CryoSpy: storage limit reached for {client_id}"),
            format!(
                "Client {client_id} has used {used_megabytes} of {limit_megabytes} MB; \
                 the oldest clips are being evicted to make room."
            ),
        );
    }
}

pub struct MotionEmailNotifier<C: Clocks> {
    mailer: Arc<dyn Mailer>,
    limiter: RateLimiter<C>,
}

impl<C: Clocks> MotionEmailNotifier<C> {
    pub fn new(mailer: Arc<dyn Mailer>, clocks: C, min_interval: Duration) -> Self {
        MotionEmailNotifier {
            mailer,
            limiter: RateLimiter::new(clocks, min_interval),
        }
    }
}

impl<C: Clocks> db::storage::MotionNotifier for MotionEmailNotifier<C> {
    fn notify_motion(&self, client_id: &str, title: &str, at: Timestamp) {
        if !self.limiter.allow(client_id) {
            return;
        }
        send_in_background(
            self.mailer.clone(),
            format!("CryoSpy: motion detected by {client_id}"),
            format!("Clip {title} recorded at {at} contains motion."),
        );
    }
}

pub struct AuthEmailNotifier<C: Clocks> {
    mailer: Arc<dyn Mailer>,
    notify_threshold: usize,
    limiter: RateLimiter<C>,
}

impl<C: Clocks> AuthEmailNotifier<C> {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        clocks: C,
        notify_threshold: usize,
        min_interval: Duration,
    ) -> Self {
        AuthEmailNotifier {
            mailer,
            notify_threshold,
            limiter: RateLimiter::new(clocks, min_interval),
        }
    }
}

impl<C: Clocks> AuthNotifier for AuthEmailNotifier<C> {
    fn should_notify(&self, failure_count: usize) -> bool {
        self.notify_threshold > 0 && failure_count >= self.notify_threshold
    }

    fn notify_auth_failures(&self, client_id: &str, failure_count: usize) {
        if !self.limiter.allow(client_id) {
            return;
        }
        send_in_background(
            self.mailer.clone(),
            format!("CryoSpy: repeated authentication failures for {client_id}"),
            format!(
                "{failure_count} failed authentication attempts for client \
                 {client_id} within the tracking window."
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::clock::SimulatedClocks;
    use db::storage::{MotionNotifier as _, StorageNotifier as _};

    #[derive(Default)]
    struct CollectingMailer {
        sent: Mutex<Vec<String>>,
    }

    impl Mailer for CollectingMailer {
        fn send(&self, subject: &str, _body: &str) -> Result<(), Error> {
            self.sent.lock().unwrap().push(subject.to_owned());
            Ok(())
        }
    }

    fn clocks() -> SimulatedClocks {
        SimulatedClocks::new(Timestamp::UNIX_EPOCH)
    }

    #[test]
    fn warn_threshold_math() {
        let n = StorageEmailNotifier::new(
            Arc::new(CollectingMailer::default()),
            clocks(),
            80,
            Duration::from_secs(3600),
        );
        assert!(!n.should_warn(7, 10));
        assert!(n.should_warn(8, 10));
        assert!(n.should_warn(10, 10));
        assert!(!n.should_warn(0, 0)); // unlimited never warns
    }

    #[test]
    fn rate_limit_is_per_client() {
        let mailer = Arc::new(CollectingMailer::default());
        let clocks = clocks();
        let n = MotionEmailNotifier::new(mailer.clone(), clocks.clone(), Duration::from_secs(300));
        let at = Timestamp::UNIX_EPOCH;
        n.notify_motion("cam1", "a", at);
        n.notify_motion("cam1", "b", at);
        n.notify_motion("cam2", "c", at);
        assert_eq!(mailer.sent.lock().unwrap().len(), 2);

        clocks.advance(Duration::from_secs(301));
        n.notify_motion("cam1", "d", at);
        assert_eq!(mailer.sent.lock().unwrap().len(), 3);
    }

    #[test]
    fn storage_notifications_share_one_limit() {
        let mailer = Arc::new(CollectingMailer::default());
        let n = StorageEmailNotifier::new(mailer.clone(), clocks(), 80, Duration::from_secs(3600));
        n.notify_capacity_warning("cam1", 8, 10);
        n.notify_capacity_reached("cam1", 10, 10);
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn auth_notify_threshold() {
        let mailer = Arc::new(CollectingMailer::default());
        let n = AuthEmailNotifier::new(mailer.clone(), clocks(), 3, Duration::from_secs(60));
        assert!(!n.should_notify(2));
        assert!(n.should_notify(3));
        n.notify_auth_failures("cam1", 3);
        assert_eq!(mailer.sent.lock().unwrap()[0], "CryoSpy: repeated authentication failures for cam1");

        let disabled = AuthEmailNotifier::new(mailer, clocks(), 0, Duration::from_secs(60));
        assert!(!disabled.should_notify(100));
    }
}
