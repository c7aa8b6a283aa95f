// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Database access.
//!
//! The [`Database`] wraps a single writable `rusqlite::Connection` behind a
//! mutex; the returned [`DatabaseGuard`] is the only way to perform (read or
//! write) operations. Client records and the master-key record are small and
//! hot, so they are cached in memory at open; clip blobs are always read
//! from SQLite.

use std::sync::{Mutex, MutexGuard};

use base::clock::{Clocks, RealClocks};
use base::{bail, err, Error, ErrorKind, ResultExt as _};
use rusqlite::params;
use uuid::Uuid;

use crate::clients::{self, ClientChange};
use crate::clips::{self, Clip, ClipInfo, ClipPage, ClipQuery, EncryptedBlob};
use crate::json::ClientConfig;
use crate::mek::{self, MekRecord};

/// SQLite connection pragmas for every open, in-memory test databases
/// included.
static INTEGRITY_PRAGMAS: [&str; 1] = ["pragma foreign_keys = on"];

fn set_integrity_pragmas(conn: &rusqlite::Connection) -> Result<(), Error> {
    for pragma in INTEGRITY_PRAGMAS {
        conn.execute_batch(pragma).err_kind(ErrorKind::Internal)?;
    }
    Ok(())
}

pub(crate) fn check_sqlite_version() -> Result<(), Error> {
    // WAL journaling plus enforced foreign keys; 3.8.2 is a conservative
    // floor with both stable.
    if rusqlite::version_number() < 3008002 {
        bail!(
            FailedPrecondition,
            msg(
                "SQLite version {} is too old; need at least 3.8.2",
                rusqlite::version()
            )
        );
    }
    Ok(())
}

/// Initializes a database.
/// Note this doesn't set journal options, so that it can be used on
/// in-memory databases for test code.
pub fn init(conn: &mut rusqlite::Connection) -> Result<(), Error> {
    check_sqlite_version()?;
    set_integrity_pragmas(conn)?;
    let tx = conn.transaction().err_kind(ErrorKind::Internal)?;
    tx.execute_batch(include_str!("schema.sql"))
        .map_err(|e| err!(Internal, msg("unable to create database schema"), source(e)))?;
    tx.commit().err_kind(ErrorKind::Internal)?;
    Ok(())
}

fn check_initialized(conn: &rusqlite::Connection) -> Result<(), Error> {
    let tables: i32 = conn
        .query_row(
            "select count(*) from sqlite_master where name in ('master_key', 'client', 'clip')",
            params![],
            |row| row.get(0),
        )
        .err_kind(ErrorKind::Internal)?;
    if tables != 3 {
        bail!(
            FailedPrecondition,
            msg("database is missing its schema; run `cryospy init`")
        );
    }
    Ok(())
}

/// A UUID stored as a 16-byte blob.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SqlUuid(pub Uuid);

impl rusqlite::types::FromSql for SqlUuid {
    fn column_result(value: rusqlite::types::ValueRef) -> rusqlite::types::FromSqlResult<Self> {
        let b = value.as_blob()?;
        let u = Uuid::from_slice(b).map_err(|_| rusqlite::types::FromSqlError::InvalidType)?;
        Ok(SqlUuid(u))
    }
}

impl rusqlite::types::ToSql for SqlUuid {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput> {
        Ok(self.0.as_bytes()[..].into())
    }
}

pub(crate) fn ms(ts: jiff::Timestamp) -> i64 {
    ts.as_millisecond()
}

pub(crate) fn from_ms(ms: i64) -> jiff::Timestamp {
    jiff::Timestamp::from_millisecond(ms).expect("stored timestamp within representable range")
}

#[derive(Debug)]
pub struct LockedDatabase {
    pub(crate) conn: rusqlite::Connection,
    mek: mek::State,
    clients: clients::State,
}

impl LockedDatabase {
    // --- master encryption key -------------------------------------------

    /// Creates the singleton MEK record, wrapped under `password`.
    /// Fails with `AlreadyExists` if one is present.
    pub fn create_mek(&mut self, now: jiff::Timestamp, password: &str) -> Result<MekRecord, Error> {
        self.mek.create(&self.conn, now, password)
    }

    pub fn get_mek(&self) -> Result<&MekRecord, Error> {
        self.mek.get()
    }

    /// Rewraps the MEK under a new password; the MEK byte value is unchanged,
    /// so client rewraps stay valid.
    pub fn change_mek_password(
        &mut self,
        now: jiff::Timestamp,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), Error> {
        self.mek.change_password(&self.conn, now, old_password, new_password)
    }

    pub fn delete_mek(&mut self) -> Result<(), Error> {
        self.mek.delete(&self.conn)
    }

    // --- client registry -------------------------------------------------

    /// Creates a client, returning the record and the hex-encoded secret.
    /// The secret is returned only here, at creation.
    pub fn create_client(
        &mut self,
        now: jiff::Timestamp,
        id: &str,
        change: ClientChange,
        mek: &[u8; crate::crypto::KEY_LEN],
    ) -> Result<(clients::Client, String), Error> {
        self.clients.create(&self.conn, now, id, change, mek)
    }

    /// Applies a [`ClientChange`] to an existing client.
    pub fn update_client(
        &mut self,
        now: jiff::Timestamp,
        id: &str,
        change: ClientChange,
    ) -> Result<(), Error> {
        self.clients.apply(&self.conn, now, id, change)
    }

    /// Replaces a client's settings, leaving its enabled state alone.
    pub fn update_client_settings(
        &mut self,
        now: jiff::Timestamp,
        id: &str,
        config: ClientConfig,
    ) -> Result<(), Error> {
        let mut change = match self.clients.get(id) {
            None => bail!(NotFound, msg("no client {id:?}")),
            Some(c) => c.change(),
        };
        change.config = config;
        self.clients.apply(&self.conn, now, id, change)
    }

    /// Toggles a client's enabled state, leaving its settings alone.
    pub fn set_client_enabled(
        &mut self,
        now: jiff::Timestamp,
        id: &str,
        enabled: bool,
    ) -> Result<(), Error> {
        let mut change = match self.clients.get(id) {
            None => bail!(NotFound, msg("no client {id:?}")),
            Some(c) => c.change(),
        };
        change.enabled = enabled;
        self.clients.apply(&self.conn, now, id, change)
    }

    /// Deletes a client and its clips. Idempotent: no error on a missing id.
    pub fn delete_client(&mut self, id: &str) -> Result<(), Error> {
        self.clients.delete(&mut self.conn, id)
    }

    pub fn get_client(&self, id: &str) -> Option<&clients::Client> {
        self.clients.get(id)
    }

    pub fn clients_by_id(&self) -> &std::collections::BTreeMap<String, clients::Client> {
        self.clients.clients_by_id()
    }

    /// Verifies a client's hex-encoded secret, returning the record on
    /// success and a single undifferentiated `Unauthenticated` error on any
    /// failure.
    pub fn verify_client(&self, id: &str, secret_hex: &str) -> Result<&clients::Client, Error> {
        self.clients.verify(id, secret_hex)
    }

    /// Verifies as [`Self::verify_client`], then unwraps the MEK under the
    /// client's secret-derived key.
    pub fn unwrap_mek(
        &self,
        id: &str,
        secret_hex: &str,
    ) -> Result<[u8; crate::crypto::KEY_LEN], Error> {
        self.clients.unwrap_mek(id, secret_hex)
    }

    // --- clip repository -------------------------------------------------

    pub fn add_clip(&mut self, clip: &Clip) -> Result<(), Error> {
        clips::add(&self.conn, clip)
    }

    pub fn get_clip(&self, id: Uuid) -> Result<Option<Clip>, Error> {
        clips::get(&self.conn, id)
    }

    pub fn get_clip_info(&self, id: Uuid) -> Result<Option<ClipInfo>, Error> {
        clips::info(&self.conn, id)
    }

    pub fn query_clips(&self, q: &ClipQuery) -> Result<ClipPage<Clip>, Error> {
        clips::query(&self.conn, q)
    }

    pub fn query_clip_infos(&self, q: &ClipQuery) -> Result<ClipPage<ClipInfo>, Error> {
        clips::query_info(&self.conn, q)
    }

    /// The `n` oldest clips for a client, ascending by timestamp.
    pub fn get_oldest_clips(&self, client_id: &str, n: usize) -> Result<Vec<ClipInfo>, Error> {
        clips::oldest(&self.conn, client_id, n)
    }

    /// Sum of encrypted video byte lengths for a client. Thumbnails are not
    /// counted toward the quota.
    pub fn get_total_storage_usage(&self, client_id: &str) -> Result<i64, Error> {
        clips::total_storage_usage(&self.conn, client_id)
    }

    pub fn get_clip_thumbnail(&self, id: Uuid) -> Result<Option<EncryptedBlob>, Error> {
        clips::thumbnail(&self.conn, id)
    }

    /// Deletes a clip. Idempotent: no error on a missing id.
    pub fn delete_clip(&mut self, id: Uuid) -> Result<(), Error> {
        clips::delete(&self.conn, id)
    }

    /// The next `limit` clip infos for `client_id` at or after `from`,
    /// ascending by timestamp. This feeds the playlist generator.
    pub fn list_upcoming_clips(
        &self,
        client_id: &str,
        from: jiff::Timestamp,
        limit: usize,
    ) -> Result<Vec<ClipInfo>, Error> {
        clips::upcoming(&self.conn, client_id, from, limit)
    }
}

#[derive(Debug)]
pub struct Database<C: Clocks + Clone = RealClocks> {
    db: Mutex<LockedDatabase>,
    clocks: C,
}

impl<C: Clocks + Clone> Database<C> {
    /// Creates the database from a caller-supplied SQLite connection, which
    /// must already have been initialized via [`init`].
    pub fn new(clocks: C, conn: rusqlite::Connection) -> Result<Database<C>, Error> {
        check_sqlite_version()?;
        set_integrity_pragmas(&conn)?;
        check_initialized(&conn)?;
        let mek = mek::State::init(&conn)?;
        let clients = clients::State::init(&conn)?;
        Ok(Database {
            db: Mutex::new(LockedDatabase { conn, mek, clients }),
            clocks,
        })
    }

    #[inline(always)]
    pub fn clocks(&self) -> C {
        self.clocks.clone()
    }

    /// Locks the database; the returned reference is the only way to perform
    /// (read or write) operations.
    pub fn lock(&self) -> DatabaseGuard {
        DatabaseGuard {
            db: self.db.lock().unwrap(),
        }
    }
}

/// Opens an on-disk database with WAL journaling and a 30-second busy
/// timeout.
pub fn open_conn(path: &std::path::Path) -> Result<rusqlite::Connection, Error> {
    let conn = rusqlite::Connection::open(path)
        .map_err(|e| err!(Internal, msg("unable to open {}", path.display()), source(e)))?;
    let _mode: String = conn
        .query_row("pragma journal_mode = wal", params![], |row| row.get(0))
        .err_kind(ErrorKind::Internal)?;
    conn.busy_timeout(std::time::Duration::from_secs(30))
        .err_kind(ErrorKind::Internal)?;
    Ok(conn)
}

/// Reference to a locked database returned by [`Database::lock`].
pub struct DatabaseGuard<'db> {
    db: MutexGuard<'db, LockedDatabase>,
}

impl std::ops::Deref for DatabaseGuard<'_> {
    type Target = LockedDatabase;
    fn deref(&self) -> &LockedDatabase {
        &self.db
    }
}

impl std::ops::DerefMut for DatabaseGuard<'_> {
    fn deref_mut(&mut self) -> &mut LockedDatabase {
        &mut self.db
    }
}
