// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The client registry: per-client authentication material, the MEK
//! rewrapped under each client's secret, and capture/encode settings.
//!
//! Verification collapses every failure (unknown id, undecodable hex, hash
//! mismatch, unwrap failure) into a single `Unauthenticated` error so the
//! capture surface never discloses which part was wrong, and the hash
//! comparison itself is constant-time. Whether a client is disabled is *not*
//! checked here; the calling handler enforces that, so that operators can
//! still inspect a disabled client's record.

use std::collections::BTreeMap;

use base::{bail, err, strutil, Error, ErrorKind, ResultExt as _};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use jiff::Timestamp;
use rusqlite::{named_params, params, Connection};
use tracing::info;

use crate::crypto;
use crate::db::{from_ms, ms};
use crate::json::ClientConfig;

/// A registered capture client.
#[derive(Clone, Debug)]
pub struct Client {
    pub id: String,
    secret_hash: Vec<u8>,
    secret_salt: Vec<u8>,
    wrapped_key: Vec<u8>,
    wrap_salt: Vec<u8>,
    pub disabled: bool,
    pub config: ClientConfig,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Client {
    /// Starts a change from this client's current state.
    pub fn change(&self) -> ClientChange {
        ClientChange {
            config: self.config.clone(),
            enabled: !self.disabled,
        }
    }
}

/// The operator-editable state of a client:
///
///    * an insertion built via `ClientChange::new`.
///    * an update returned via `Client::change`.
///
/// Apply via `LockedDatabase::create_client` / `update_client`. Identity and
/// secret material are fixed at creation and never part of a change.
#[derive(Clone, Debug)]
pub struct ClientChange {
    pub config: ClientConfig,
    pub enabled: bool,
}

impl ClientChange {
    /// A change describing a brand-new, enabled client.
    pub fn new(config: ClientConfig) -> Self {
        ClientChange {
            config,
            enabled: true,
        }
    }
}

#[derive(Debug)]
pub(crate) struct State {
    clients_by_id: BTreeMap<String, Client>,
}

impl State {
    pub(crate) fn init(conn: &Connection) -> Result<Self, Error> {
        let mut state = State {
            clients_by_id: BTreeMap::new(),
        };
        let mut stmt = conn
            .prepare(
                r#"
                select
                  id,
                  secret_hash,
                  secret_salt,
                  wrapped_key,
                  wrap_salt,
                  disabled,
                  config,
                  created_at_ms,
                  updated_at_ms
                from
                  client
                "#,
            )
            .err_kind(ErrorKind::Internal)?;
        let mut rows = stmt.query(params![]).err_kind(ErrorKind::Internal)?;
        while let Some(row) = rows.next().err_kind(ErrorKind::Internal)? {
            let id: String = row.get(0).err_kind(ErrorKind::Internal)?;
            let wrapped_key: String = row.get(3).err_kind(ErrorKind::Internal)?;
            let wrap_salt: String = row.get(4).err_kind(ErrorKind::Internal)?;
            let client = Client {
                id: id.clone(),
                secret_hash: row.get(1).err_kind(ErrorKind::Internal)?,
                secret_salt: row.get(2).err_kind(ErrorKind::Internal)?,
                wrapped_key: BASE64_STANDARD
                    .decode(wrapped_key)
                    .err_kind(ErrorKind::DataLoss)?,
                wrap_salt: BASE64_STANDARD
                    .decode(wrap_salt)
                    .err_kind(ErrorKind::DataLoss)?,
                disabled: row.get(5).err_kind(ErrorKind::Internal)?,
                config: row.get(6).err_kind(ErrorKind::Internal)?,
                created_at: from_ms(row.get(7).err_kind(ErrorKind::Internal)?),
                updated_at: from_ms(row.get(8).err_kind(ErrorKind::Internal)?),
            };
            state.clients_by_id.insert(id, client);
        }
        Ok(state)
    }

    pub(crate) fn create(
        &mut self,
        conn: &Connection,
        now: Timestamp,
        id: &str,
        change: ClientChange,
        mek: &[u8; crypto::KEY_LEN],
    ) -> Result<(Client, String), Error> {
        let id = id.trim();
        if id.is_empty() {
            bail!(InvalidArgument, msg("client id must be non-empty"));
        }
        if self.clients_by_id.contains_key(id) {
            bail!(AlreadyExists, msg("client {id:?} already exists"));
        }
        change.config.validate()?;

        let secret = crypto::generate_key();
        let (secret_hash, secret_salt) = crypto::hash(&secret);
        let wrap_salt = crypto::generate_salt();
        let wrap_key = crypto::derive_key(&secret, &wrap_salt)?;
        let wrapped_key = crypto::encrypt(&mek[..], &wrap_key)?;

        let client = Client {
            id: id.to_owned(),
            secret_hash: secret_hash.to_vec(),
            secret_salt: secret_salt.to_vec(),
            wrapped_key,
            wrap_salt: wrap_salt.to_vec(),
            disabled: !change.enabled,
            config: change.config,
            created_at: now,
            updated_at: now,
        };
        conn.execute(
            r#"
            insert into client (id,  secret_hash,  secret_salt,  wrapped_key,  wrap_salt,
                                disabled,  config,  created_at_ms,  updated_at_ms)
                        values (:id, :secret_hash, :secret_salt, :wrapped_key, :wrap_salt,
                                :disabled, :config, :created_at_ms, :updated_at_ms)
            "#,
            named_params! {
                ":id": &client.id,
                ":secret_hash": &client.secret_hash,
                ":secret_salt": &client.secret_salt,
                ":wrapped_key": BASE64_STANDARD.encode(&client.wrapped_key),
                ":wrap_salt": BASE64_STANDARD.encode(&client.wrap_salt),
                ":disabled": client.disabled,
                ":config": &client.config,
                ":created_at_ms": ms(client.created_at),
                ":updated_at_ms": ms(client.updated_at),
            },
        )
        .err_kind(ErrorKind::Internal)?;
        info!(client = %client.id, "client created");
        let secret_hex = strutil::hex(&secret);
        self.clients_by_id.insert(client.id.clone(), client.clone());
        Ok((client, secret_hex))
    }

    /// Applies a [`ClientChange`] to an existing client.
    pub(crate) fn apply(
        &mut self,
        conn: &Connection,
        now: Timestamp,
        id: &str,
        change: ClientChange,
    ) -> Result<(), Error> {
        change.config.validate()?;
        let Some(client) = self.clients_by_id.get_mut(id) else {
            bail!(NotFound, msg("no client {id:?}"));
        };
        let disabled = !change.enabled;
        conn.execute(
            r#"
            update client
            set
              config = :config,
              disabled = :disabled,
              updated_at_ms = :updated_at_ms
            where
              id = :id
            "#,
            named_params! {
                ":config": &change.config,
                ":disabled": disabled,
                ":updated_at_ms": ms(now),
                ":id": id,
            },
        )
        .err_kind(ErrorKind::Internal)?;
        if client.disabled != disabled {
            info!(client = %id, enabled = change.enabled, "client enabled state changed");
        }
        client.config = change.config;
        client.disabled = disabled;
        client.updated_at = now;
        Ok(())
    }

    pub(crate) fn delete(&mut self, conn: &mut Connection, id: &str) -> Result<(), Error> {
        let tx = conn.transaction().err_kind(ErrorKind::Internal)?;
        tx.execute("delete from clip where client_id = ?", params![id])
            .err_kind(ErrorKind::Internal)?;
        tx.execute("delete from client where id = ?", params![id])
            .err_kind(ErrorKind::Internal)?;
        tx.commit().err_kind(ErrorKind::Internal)?;
        if self.clients_by_id.remove(id).is_some() {
            info!(client = %id, "client deleted");
        }
        Ok(())
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Client> {
        self.clients_by_id.get(id)
    }

    pub(crate) fn clients_by_id(&self) -> &BTreeMap<String, Client> {
        &self.clients_by_id
    }

    pub(crate) fn verify(&self, id: &str, secret_hex: &str) -> Result<&Client, Error> {
        let secret: [u8; crypto::KEY_LEN] = strutil::dehex(secret_hex.as_bytes())
            .map_err(|_| bad_credentials())?;
        let Some(client) = self.clients_by_id.get(id) else {
            // Burn the same hash work as the found path so an id scan can't
            // tell "no such client" from "bad secret" by timing.
            let _ = crypto::compare_hash(&[0u8; 32], &secret, &[0u8; crypto::SALT_LEN]);
            return Err(bad_credentials());
        };
        if !crypto::compare_hash(&client.secret_hash, &secret, &client.secret_salt) {
            return Err(bad_credentials());
        }
        Ok(client)
    }

    pub(crate) fn unwrap_mek(
        &self,
        id: &str,
        secret_hex: &str,
    ) -> Result<[u8; crypto::KEY_LEN], Error> {
        let client = self.verify(id, secret_hex)?;
        let secret: [u8; crypto::KEY_LEN] =
            strutil::dehex(secret_hex.as_bytes()).map_err(|_| bad_credentials())?;
        let wrap_key = crypto::derive_key(&secret, &client.wrap_salt).map_err(|_| bad_credentials())?;
        let mek = crypto::decrypt(&client.wrapped_key, &wrap_key).map_err(|_| bad_credentials())?;
        mek.try_into().map_err(|_| bad_credentials())
    }
}

fn bad_credentials() -> Error {
    err!(Unauthenticated, msg("bad client credentials"))
}
