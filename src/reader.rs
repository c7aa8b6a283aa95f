// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Authenticated clip retrieval: pulls encrypted records from the repository
//! and decrypts them under the operator's master key.
//!
//! Every plaintext-returning path takes a [`MekSource`] capability (the
//! operator session) as an explicit parameter. Metadata-only paths don't
//! need one.

use std::sync::Arc;

use base::clock::{Clocks, RealClocks};
use base::{err, Error};
use db::clips::{ClipInfo, ClipPage, ClipQuery};
use db::crypto;
use db::Database;
use tracing::warn;
use uuid::Uuid;

/// Capability yielding the plaintext MEK for the current operator session.
pub trait MekSource: Send + Sync {
    /// Fails with `FailedPrecondition` when no MEK is available (forces
    /// setup).
    fn mek(&self) -> Result<[u8; crypto::KEY_LEN], Error>;
}

/// A fixed in-memory MEK, as produced by session authentication.
pub struct SessionMek(pub [u8; crypto::KEY_LEN]);

impl MekSource for SessionMek {
    fn mek(&self) -> Result<[u8; crypto::KEY_LEN], Error> {
        Ok(self.0)
    }
}

/// A decrypted video or thumbnail with its display parameters.
#[derive(Clone, Debug)]
pub struct DecryptedBlob {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub mime: String,
}

/// A clip with its blobs decrypted.
#[derive(Clone, Debug)]
pub struct DecryptedClip {
    pub id: Uuid,
    pub client_id: String,
    pub title: String,
    pub start: jiff::Timestamp,
    pub duration_ns: i64,
    pub has_motion: bool,
    pub video: DecryptedBlob,
    pub thumbnail: Option<DecryptedBlob>,
}

pub struct ClipReader<C: Clocks + Clone = RealClocks> {
    db: Arc<Database<C>>,
}

impl<C: Clocks + Clone> ClipReader<C> {
    pub fn new(db: Arc<Database<C>>) -> Self {
        ClipReader { db }
    }

    fn decrypt_clip(
        clip: db::clips::Clip,
        mek: &[u8; crypto::KEY_LEN],
    ) -> Result<DecryptedClip, Error> {
        let video = DecryptedBlob {
            data: crypto::decrypt(&clip.video.data, mek)?,
            width: clip.video.width,
            height: clip.video.height,
            mime: clip.video.mime,
        };
        // A thumbnail that won't decrypt degrades the clip rather than
        // failing it.
        let thumbnail = clip.thumbnail.and_then(|t| match crypto::decrypt(&t.data, mek) {
            Ok(data) => Some(DecryptedBlob {
                data,
                width: t.width,
                height: t.height,
                mime: t.mime,
            }),
            Err(e) => {
                warn!(clip = %clip.id, err = %e.chain(), "thumbnail decryption failed");
                None
            }
        });
        Ok(DecryptedClip {
            id: clip.id,
            client_id: clip.client_id,
            title: clip.title,
            start: clip.start,
            duration_ns: clip.duration_ns,
            has_motion: clip.has_motion,
            video,
            thumbnail,
        })
    }

    /// Queries and decrypts clips. A clip whose video fails to decrypt is
    /// logged and skipped; `total_count` still reflects the repository's
    /// match count.
    pub fn query_clips(
        &self,
        q: &ClipQuery,
        mek_source: &dyn MekSource,
    ) -> Result<ClipPage<DecryptedClip>, Error> {
        let mek = mek_source.mek()?;
        let page = self.db.lock().query_clips(q)?;
        let mut rows = Vec::with_capacity(page.rows.len());
        for clip in page.rows {
            let id = clip.id;
            match Self::decrypt_clip(clip, &mek) {
                Ok(c) => rows.push(c),
                Err(e) => warn!(clip = %id, err = %e.chain(), "skipping undecryptable clip"),
            }
        }
        Ok(ClipPage {
            rows,
            total_count: page.total_count,
        })
    }

    /// Fetches and decrypts a single clip; unlike the list path, decryption
    /// failure surfaces here.
    pub fn get_clip(&self, id: Uuid, mek_source: &dyn MekSource) -> Result<DecryptedClip, Error> {
        let mek = mek_source.mek()?;
        let clip = self
            .db
            .lock()
            .get_clip(id)?
            .ok_or_else(|| err!(NotFound, msg("no clip {id}")))?;
        Self::decrypt_clip(clip, &mek)
    }

    /// Fetches and decrypts a clip's thumbnail. Decryption failure degrades
    /// to "no thumbnail".
    pub fn get_clip_thumbnail(
        &self,
        id: Uuid,
        mek_source: &dyn MekSource,
    ) -> Result<Option<DecryptedBlob>, Error> {
        let mek = mek_source.mek()?;
        let Some(t) = self.db.lock().get_clip_thumbnail(id)? else {
            return Ok(None);
        };
        match crypto::decrypt(&t.data, &mek) {
            Ok(data) => Ok(Some(DecryptedBlob {
                data,
                width: t.width,
                height: t.height,
                mime: t.mime,
            })),
            Err(e) => {
                warn!(clip = %id, err = %e.chain(), "thumbnail decryption failed");
                Ok(None)
            }
        }
    }

    /// Metadata-only query; requires no MEK.
    pub fn query_clip_infos(&self, q: &ClipQuery) -> Result<ClipPage<ClipInfo>, Error> {
        self.db.lock().query_clip_infos(q)
    }

    /// Metadata-only fetch; requires no MEK.
    pub fn get_clip_info(&self, id: Uuid) -> Result<Option<ClipInfo>, Error> {
        self.db.lock().get_clip_info(id)
    }
}
