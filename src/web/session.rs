// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Operator sessions.
//!
//! A session is a random 48-byte id handed to the browser as a cookie; only
//! its blake3 hash is kept server-side, as the key of an in-memory map whose
//! value holds the plaintext MEK for that login. Revoking a session zeroes
//! the MEK buffer before dropping it.

use std::collections::HashMap;
use std::sync::Mutex;

use base::{bail, err, Error};
use base64::prelude::{Engine as _, BASE64_STANDARD_NO_PAD};
use db::crypto;
use jiff::Timestamp;
use ring::rand::{SecureRandom as _, SystemRandom};

/// A raw session id (not base64-encoded). Sensitive; never stored.
pub struct RawSessionId([u8; 48]);

impl RawSessionId {
    fn generate(rand: &SystemRandom) -> Self {
        let mut id = RawSessionId([0u8; 48]);
        rand.fill(&mut id.0).expect("CSPRNG failure");
        id
    }

    pub fn encode_base64(&self) -> String {
        BASE64_STANDARD_NO_PAD.encode(self.0)
    }

    pub fn decode_base64(input: &str) -> Result<Self, Error> {
        let decoded = BASE64_STANDARD_NO_PAD
            .decode(input)
            .map_err(|_| err!(Unauthenticated, msg("malformed session cookie")))?;
        let mut id = RawSessionId([0u8; 48]);
        if decoded.len() != id.0.len() {
            bail!(Unauthenticated, msg("malformed session cookie"));
        }
        id.0.copy_from_slice(&decoded);
        Ok(id)
    }

    /// Hash used as the session's map key, so a memory dump of the table
    /// alone can't be replayed as cookies.
    pub fn hash(&self) -> SessionHash {
        let digest = blake3::hash(&self.0[..]);
        let mut h = SessionHash([0u8; 24]);
        h.0.copy_from_slice(&digest.as_bytes()[0..24]);
        h
    }
}

#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub struct SessionHash(pub [u8; 24]);

struct Session {
    mek: Vec<u8>,
    #[allow(dead_code)] // diagnostic only.
    created_at: Timestamp,
}

pub struct SessionStore {
    rand: SystemRandom,
    sessions: Mutex<HashMap<SessionHash, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            rand: SystemRandom::new(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a session holding the given MEK, returning the base64 cookie
    /// value.
    pub fn create(&self, mek: [u8; crypto::KEY_LEN], now: Timestamp) -> String {
        let id = RawSessionId::generate(&self.rand);
        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(
            id.hash(),
            Session {
                mek: mek.to_vec(),
                created_at: now,
            },
        );
        id.encode_base64()
    }

    /// Looks up the MEK for a presented cookie value.
    pub fn mek(&self, sid_base64: &str) -> Result<[u8; crypto::KEY_LEN], Error> {
        let id = RawSessionId::decode_base64(sid_base64)?;
        let sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get(&id.hash())
            .ok_or_else(|| err!(Unauthenticated, msg("no such session")))?;
        let mut mek = [0u8; crypto::KEY_LEN];
        mek.copy_from_slice(&session.mek);
        Ok(mek)
    }

    /// Removes a session, zeroing its MEK buffer first. A missing or
    /// malformed cookie is not an error.
    pub fn revoke(&self, sid_base64: &str) {
        let Ok(id) = RawSessionId::decode_base64(sid_base64) else {
            return;
        };
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(mut session) = sessions.remove(&id.hash()) {
            session.mek.iter_mut().for_each(|b| *b = 0);
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_fetch_revoke() {
        let store = SessionStore::new();
        let mek = [0x5a; crypto::KEY_LEN];
        let sid = store.create(mek, Timestamp::UNIX_EPOCH);
        assert_eq!(store.mek(&sid).unwrap(), mek);

        store.revoke(&sid);
        assert_eq!(
            store.mek(&sid).unwrap_err().kind(),
            base::ErrorKind::Unauthenticated
        );
        store.revoke(&sid); // idempotent
    }

    #[test]
    fn sessions_are_independent() {
        let store = SessionStore::new();
        let a = store.create([1; crypto::KEY_LEN], Timestamp::UNIX_EPOCH);
        let b = store.create([2; crypto::KEY_LEN], Timestamp::UNIX_EPOCH);
        assert_ne!(a, b);
        store.revoke(&a);
        assert_eq!(store.mek(&b).unwrap()[0], 2);
    }

    #[test]
    fn garbage_cookies_are_rejected() {
        let store = SessionStore::new();
        assert!(store.mek("").is_err());
        assert!(store.mek("not!base64!").is_err());
        assert!(store.mek(&BASE64_STANDARD_NO_PAD.encode([0u8; 10])).is_err());
        store.revoke("not!base64!");
    }
}
