// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Cryptographic primitives: AES-256-GCM, PBKDF2-SHA256 key derivation,
//! salted SHA-256 hashing with constant-time verification, and CSPRNG key and
//! salt generation.
//!
//! The parameters here are fixed so that the stored record formats stay
//! stable: 32-byte keys, 12-byte nonces prepended to ciphertexts, 16-byte
//! salts, and exactly 10,000 PBKDF2 iterations.

use base::{bail, err, Error};
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length in bytes; one fresh nonce is prepended per ciphertext.
pub const NONCE_LEN: usize = aead::NONCE_LEN;

/// Salt length in bytes, for both hashing and key derivation.
pub const SALT_LEN: usize = 16;

/// PBKDF2-HMAC-SHA256 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 10_000;

fn aead_key(key: &[u8]) -> Result<LessSafeKey, Error> {
    if key.len() != KEY_LEN {
        bail!(
            InvalidArgument,
            msg("key must be {KEY_LEN} bytes, got {}", key.len())
        );
    }
    let unbound = UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|_| err!(InvalidArgument, msg("unusable AES-256-GCM key")))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypts `plaintext` under the 32-byte `key`, returning
/// `nonce || ciphertext || tag` with a fresh random nonce.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, Error> {
    let key = aead_key(key)?;
    let mut nonce = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce)
        .expect("CSPRNG failure");
    let mut out = Vec::with_capacity(NONCE_LEN + plaintext.len() + aead::AES_256_GCM.tag_len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(plaintext);
    let tag = key
        .seal_in_place_separate_tag(
            Nonce::assume_unique_for_key(nonce),
            Aad::empty(),
            &mut out[NONCE_LEN..],
        )
        .map_err(|_| err!(Internal, msg("AES-GCM seal failed")))?;
    out.extend_from_slice(tag.as_ref());
    Ok(out)
}

/// Decrypts `nonce || ciphertext || tag` produced by [`encrypt`].
///
/// Fails with `InvalidArgument` on a bad key length or a ciphertext shorter
/// than a nonce, and `PermissionDenied` when the tag does not verify (wrong
/// key or tampered data).
pub fn decrypt(ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, Error> {
    let key = aead_key(key)?;
    if ciphertext.len() < NONCE_LEN {
        bail!(
            InvalidArgument,
            msg("ciphertext too short: {} bytes", ciphertext.len())
        );
    }
    let (nonce, ct) = ciphertext.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce).expect("nonce is NONCE_LEN bytes");
    let mut in_out = ct.to_vec();
    let plaintext_len = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| err!(PermissionDenied, msg("AES-GCM tag verification failed")))?
        .len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

/// Generates a fresh random 32-byte key.
pub fn generate_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    SystemRandom::new().fill(&mut key).expect("CSPRNG failure");
    key
}

/// Generates a fresh random 16-byte salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new().fill(&mut salt).expect("CSPRNG failure");
    salt
}

/// Derives a 32-byte key from a secret via PBKDF2-HMAC-SHA256.
pub fn derive_key(secret: &[u8], salt: &[u8]) -> Result<[u8; KEY_LEN], Error> {
    if salt.is_empty() {
        bail!(InvalidArgument, msg("key derivation requires a salt"));
    }
    let mut out = [0u8; KEY_LEN];
    ring::pbkdf2::derive(
        ring::pbkdf2::PBKDF2_HMAC_SHA256,
        PBKDF2_ITERATIONS.try_into().expect("nonzero"),
        salt,
        secret,
        &mut out,
    );
    Ok(out)
}

/// Hashes `data` with a fresh salt, returning `(SHA256(salt || data), salt)`.
pub fn hash(data: &[u8]) -> ([u8; 32], [u8; SALT_LEN]) {
    let salt = generate_salt();
    (salted_digest(&salt, data), salt)
}

/// Recomputes the salted hash of `plain` and compares it to `stored_hash` in
/// constant time.
pub fn compare_hash(stored_hash: &[u8], plain: &[u8], salt: &[u8]) -> bool {
    let computed = salted_digest(salt, plain);
    ring::constant_time::verify_slices_are_equal(stored_hash, &computed).is_ok()
}

fn salted_digest(salt: &[u8], data: &[u8]) -> [u8; 32] {
    let mut ctx = ring::digest::Context::new(&ring::digest::SHA256);
    ctx.update(salt);
    ctx.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(ctx.finish().as_ref());
    out
}
