// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Utilities for automated testing involving CryoSpy's persistence library.

use std::sync::Arc;

use base::clock::{Clocks, SimulatedClocks};
use jiff::Timestamp;

use crate::clients::ClientChange;
use crate::crypto;
use crate::db::{self, Database};
use crate::json::ClientConfig;
use crate::mek;

/// id of the client created by `TestDb::new` below.
pub const TEST_CLIENT_ID: &str = "testcam";

pub const TEST_PASSWORD: &str = "test-password";

pub struct TestDb {
    pub db: Arc<Database<SimulatedClocks>>,
    pub clocks: SimulatedClocks,

    /// The unwrapped master key, as an operator session would hold it.
    pub mek: [u8; crypto::KEY_LEN],

    /// `testcam`'s secret, as returned once at creation.
    pub client_secret_hex: String,
}

impl TestDb {
    /// Creates an in-memory test database with a master key and one client
    /// with default (unlimited-storage) settings.
    pub fn new() -> Self {
        Self::with_client_config(ClientConfig::default())
    }

    pub fn with_client_config(config: ClientConfig) -> Self {
        base::tracing_setup::install_for_tests();
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        db::init(&mut conn).unwrap();
        let clocks = SimulatedClocks::new(Timestamp::UNIX_EPOCH);
        let db = Arc::new(Database::new(clocks.clone(), conn).unwrap());
        let (mek, client_secret_hex) = {
            let mut l = db.lock();
            let now = clocks.now();
            let rec = l.create_mek(now, TEST_PASSWORD).unwrap();
            let mek = mek::decrypt_mek(&rec, TEST_PASSWORD).unwrap();
            let (_, secret_hex) = l
                .create_client(now, TEST_CLIENT_ID, ClientChange::new(config), &mek)
                .unwrap();
            (mek, secret_hex)
        };
        TestDb {
            db,
            clocks,
            mek,
            client_secret_hex,
        }
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}
