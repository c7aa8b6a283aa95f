// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! CryoSpy's persistence and trust layer: the SQLite-backed store, the key
//! hierarchy (master encryption key and per-client rewraps), the clip
//! repository, and the capacity-enforced storage pipeline.

pub mod authfail;
pub mod clients;
pub mod clips;
pub mod crypto;
mod db;
pub mod json;
pub mod mek;
pub mod storage;
pub mod testutil;

pub use crate::db::{init, open_conn, Database, DatabaseGuard, LockedDatabase, SqlUuid};
