// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Normalization of stored clips into uniform MPEG-TS segments for HLS
//! playback, fronted by the byte-budgeted segment cache.

use std::sync::Arc;

use base::{err, Error, ErrorKind, ResultExt as _};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::SegmentCache;
use crate::ffmpeg::{TranscodeParams, Transcoder};

/// Output parameters for normalized segments.
#[derive(Clone, Debug)]
pub struct NormalizeSettings {
    pub width: u32,
    pub height: u32,
    pub video_codec: String,
    pub video_bitrate_kbps: u32,
    pub frame_rate: u32,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        NormalizeSettings {
            width: 854,
            height: 480,
            video_codec: "libx264".to_owned(),
            video_bitrate_kbps: 1000,
            frame_rate: 25,
        }
    }
}

impl NormalizeSettings {
    /// One key frame every two seconds, so segment boundaries stay seekable.
    fn keyframe_interval(&self) -> u32 {
        self.frame_rate * 2
    }
}

pub struct Normalizer {
    transcoder: Arc<dyn Transcoder>,
    cache: Option<Arc<SegmentCache>>,
    settings: NormalizeSettings,
    transcodes: tokio::sync::Semaphore,
}

impl Normalizer {
    /// `max_concurrent` bounds simultaneous transcoder subprocesses;
    /// size it to the CPU count.
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        cache: Option<Arc<SegmentCache>>,
        settings: NormalizeSettings,
        max_concurrent: usize,
    ) -> Self {
        Normalizer {
            transcoder,
            cache,
            settings,
            transcodes: tokio::sync::Semaphore::new(max_concurrent.max(1)),
        }
    }

    /// Returns the MPEG-TS segment for a decrypted clip, transcoding on a
    /// cache miss. Transcode failures propagate and are never cached.
    pub async fn segment(&self, clip_id: Uuid, video: &[u8]) -> Result<Vec<u8>, Error> {
        if let Some(ref cache) = self.cache {
            if let Some(hit) = cache.get(clip_id) {
                debug!(clip = %clip_id, "segment cache hit");
                return Ok(hit);
            }
        }
        let _permit = self
            .transcodes
            .acquire()
            .await
            .map_err(|e| err!(Internal, msg("transcode semaphore closed"), source(e)))?;

        let dir = tempfile::Builder::new()
            .prefix("cryospy-segment")
            .tempdir()
            .err_kind(ErrorKind::Internal)?;
        let input = dir.path().join("source");
        let output = dir.path().join("segment.ts");
        tokio::fs::write(&input, video)
            .await
            .err_kind(ErrorKind::Internal)?;
        let params = TranscodeParams {
            width: self.settings.width,
            height: self.settings.height,
            video_codec: self.settings.video_codec.clone(),
            video_bitrate_kbps: self.settings.video_bitrate_kbps,
            frame_rate: self.settings.frame_rate,
            keyframe_interval: self.settings.keyframe_interval(),
        };
        self.transcoder.transcode(&input, &output, &params).await?;
        let data = tokio::fs::read(&output)
            .await
            .err_kind(ErrorKind::Internal)?;
        drop(dir); // removes both scratch files.

        if let Some(ref cache) = self.cache {
            if let Err(e) = cache.set(clip_id, data.clone()) {
                warn!(clip = %clip_id, err = %e.chain(), "segment not cached");
            }
        }
        Ok(data)
    }
}
