// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Clock interface and implementations for testability.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use jiff::Timestamp;

/// Abstract interface to the wall clock. This is for testability.
pub trait Clocks: Send + Sync + 'static {
    /// Gets the current wall time.
    fn now(&self) -> Timestamp;

    /// Causes the current thread to sleep for the specified time.
    fn sleep(&self, how_long: Duration);
}

#[derive(Copy, Clone, Debug, Default)]
pub struct RealClocks;

impl Clocks for RealClocks {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn sleep(&self, how_long: Duration) {
        std::thread::sleep(how_long);
    }
}

/// Simulated clock for testing; time is advanced manually or by `sleep`.
#[derive(Clone)]
pub struct SimulatedClocks(Arc<Mutex<Timestamp>>);

impl SimulatedClocks {
    pub fn new(start: Timestamp) -> Self {
        SimulatedClocks(Arc::new(Mutex::new(start)))
    }

    /// Advances the clock by the given amount without sleeping.
    pub fn advance(&self, how_long: Duration) {
        let mut t = self.0.lock().unwrap();
        *t = t
            .checked_add(jiff::SignedDuration::try_from(how_long).unwrap())
            .unwrap();
    }
}

impl Clocks for SimulatedClocks {
    fn now(&self) -> Timestamp {
        *self.0.lock().unwrap()
    }

    fn sleep(&self, how_long: Duration) {
        self.advance(how_long);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_advances() {
        let c = SimulatedClocks::new(Timestamp::UNIX_EPOCH);
        assert_eq!(c.now(), Timestamp::UNIX_EPOCH);
        c.advance(Duration::from_secs(90));
        assert_eq!(c.now().as_second(), 90);
        c.sleep(Duration::from_secs(10));
        assert_eq!(c.now().as_second(), 100);
    }
}
