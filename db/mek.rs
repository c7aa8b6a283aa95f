// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The master encryption key (MEK) store.
//!
//! At most one MEK record ever exists. The MEK itself is a random 32-byte
//! value; the store only ever persists it wrapped (AES-256-GCM) under a key
//! derived from the operator password. Changing the password rewraps the
//! same MEK value, so per-client rewraps (which key off the MEK, not the
//! password) remain valid.

use base::{bail, err, Error, ErrorKind, ResultExt as _};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use jiff::Timestamp;
use rusqlite::{named_params, params, Connection, OptionalExtension as _};
use tracing::info;
use uuid::Uuid;

use crate::crypto;
use crate::db::{from_ms, ms};

/// The singleton password-wrapped MEK record.
#[derive(Clone, Debug)]
pub struct MekRecord {
    pub id: String,
    pub wrapped_key: Vec<u8>,
    pub wrap_salt: Vec<u8>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Unwraps the MEK under the given operator password.
///
/// A wrong password is indistinguishable from a corrupt record here; both
/// surface as `PermissionDenied`.
pub fn decrypt_mek(rec: &MekRecord, password: &str) -> Result<[u8; crypto::KEY_LEN], Error> {
    let wrap_key = crypto::derive_key(password.as_bytes(), &rec.wrap_salt)?;
    let mek = crypto::decrypt(&rec.wrapped_key, &wrap_key)
        .map_err(|_| err!(PermissionDenied, msg("master key decryption failed")))?;
    mek.try_into()
        .map_err(|_| err!(DataLoss, msg("wrapped master key has unexpected length")))
}

#[derive(Debug)]
pub(crate) struct State {
    mek: Option<MekRecord>,
}

impl State {
    pub(crate) fn init(conn: &Connection) -> Result<Self, Error> {
        let mek = conn
            .query_row(
                r#"
                select
                  id,
                  wrapped_key,
                  wrap_salt,
                  created_at_ms,
                  updated_at_ms
                from
                  master_key
                "#,
                params![],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()
            .err_kind(ErrorKind::Internal)?;
        let mek = match mek {
            None => None,
            Some((id, wrapped_key, wrap_salt, created, updated)) => Some(MekRecord {
                id,
                wrapped_key: BASE64_STANDARD
                    .decode(wrapped_key)
                    .err_kind(ErrorKind::DataLoss)?,
                wrap_salt: BASE64_STANDARD
                    .decode(wrap_salt)
                    .err_kind(ErrorKind::DataLoss)?,
                created_at: from_ms(created),
                updated_at: from_ms(updated),
            }),
        };
        Ok(State { mek })
    }

    pub(crate) fn create(
        &mut self,
        conn: &Connection,
        now: Timestamp,
        password: &str,
    ) -> Result<MekRecord, Error> {
        if self.mek.is_some() {
            bail!(AlreadyExists, msg("a master key already exists"));
        }
        let mek_bytes = crypto::generate_key();
        let wrap_salt = crypto::generate_salt();
        let wrap_key = crypto::derive_key(password.as_bytes(), &wrap_salt)?;
        let wrapped = crypto::encrypt(&mek_bytes, &wrap_key)?;
        let rec = MekRecord {
            id: Uuid::new_v4().to_string(),
            wrapped_key: wrapped,
            wrap_salt: wrap_salt.to_vec(),
            created_at: now,
            updated_at: now,
        };
        conn.execute(
            r#"
            insert into master_key (id,  wrapped_key,  wrap_salt,  created_at_ms,  updated_at_ms)
                            values (:id, :wrapped_key, :wrap_salt, :created_at_ms, :updated_at_ms)
            "#,
            named_params! {
                ":id": &rec.id,
                ":wrapped_key": BASE64_STANDARD.encode(&rec.wrapped_key),
                ":wrap_salt": BASE64_STANDARD.encode(&rec.wrap_salt),
                ":created_at_ms": ms(rec.created_at),
                ":updated_at_ms": ms(rec.updated_at),
            },
        )
        .err_kind(ErrorKind::Internal)?;
        info!("master key created");
        self.mek = Some(rec.clone());
        Ok(rec)
    }

    pub(crate) fn get(&self) -> Result<&MekRecord, Error> {
        self.mek
            .as_ref()
            .ok_or_else(|| err!(NotFound, msg("no master key has been set up")))
    }

    pub(crate) fn change_password(
        &mut self,
        conn: &Connection,
        now: Timestamp,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), Error> {
        let rec = self
            .mek
            .as_mut()
            .ok_or_else(|| err!(NotFound, msg("no master key has been set up")))?;
        let mek_bytes = decrypt_mek(rec, old_password)?;
        let wrap_salt = crypto::generate_salt();
        let wrap_key = crypto::derive_key(new_password.as_bytes(), &wrap_salt)?;
        let wrapped = crypto::encrypt(&mek_bytes, &wrap_key)?;
        conn.execute(
            r#"
            update master_key
            set
              wrapped_key = :wrapped_key,
              wrap_salt = :wrap_salt,
              updated_at_ms = :updated_at_ms
            where
              id = :id
            "#,
            named_params! {
                ":wrapped_key": BASE64_STANDARD.encode(&wrapped),
                ":wrap_salt": BASE64_STANDARD.encode(wrap_salt),
                ":updated_at_ms": ms(now),
                ":id": &rec.id,
            },
        )
        .err_kind(ErrorKind::Internal)?;
        rec.wrapped_key = wrapped;
        rec.wrap_salt = wrap_salt.to_vec();
        rec.updated_at = now;
        info!("master key rewrapped under new password");
        Ok(())
    }

    pub(crate) fn delete(&mut self, conn: &Connection) -> Result<(), Error> {
        conn.execute("delete from master_key", params![])
            .err_kind(ErrorKind::Internal)?;
        self.mek = None;
        Ok(())
    }
}
