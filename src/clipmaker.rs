// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Turns a raw upload into an encrypted, stored clip: verify the client and
//! unwrap the MEK (before any expensive work), extract metadata, build the
//! canonical title, generate a thumbnail, encrypt, and hand off to the
//! storage manager.

use std::sync::Arc;

use base::clock::{Clocks, RealClocks};
use base::{bail, Error};
use db::clips::{Clip, EncryptedBlob};
use db::crypto;
use db::storage::StorageManager;
use db::Database;
use jiff::Timestamp;
use tracing::warn;
use uuid::Uuid;

use crate::ffmpeg::{MediaProbe, ThumbnailGenerator};

/// A parsed upload from the capture API.
#[derive(Clone, Debug)]
pub struct CreateClipRequest {
    pub timestamp: Timestamp,
    pub duration_seconds: f64,
    pub has_motion: bool,
    pub video: Vec<u8>,
}

/// What the capture API reports back for a stored clip.
#[derive(Clone, Debug)]
pub struct NewClip {
    pub id: Uuid,
    pub title: String,
}

pub struct ClipMaker<C: Clocks + Clone = RealClocks> {
    db: Arc<Database<C>>,
    storage: Arc<StorageManager<C>>,
    probe: Arc<dyn MediaProbe>,
    thumbnailer: Arc<dyn ThumbnailGenerator>,
}

/// `YYYY-MM-DDTHH-MM-SS_<duration>s_<motion|nomotion>.<ext>`, UTC, duration
/// rounded to whole seconds.
fn title(timestamp: Timestamp, duration_seconds: f64, has_motion: bool, extension: &str) -> String {
    format!(
        "{}_{}s_{}.{}",
        timestamp.strftime("%Y-%m-%dT%H-%M-%S"),
        duration_seconds.round() as i64,
        if has_motion { "motion" } else { "nomotion" },
        extension
    )
}

impl<C: Clocks + Clone> ClipMaker<C> {
    pub fn new(
        db: Arc<Database<C>>,
        storage: Arc<StorageManager<C>>,
        probe: Arc<dyn MediaProbe>,
        thumbnailer: Arc<dyn ThumbnailGenerator>,
    ) -> Self {
        ClipMaker {
            db,
            storage,
            probe,
            thumbnailer,
        }
    }

    pub async fn create_clip(
        &self,
        req: CreateClipRequest,
        client_id: &str,
        secret_hex: &str,
    ) -> Result<NewClip, Error> {
        if req.duration_seconds <= 0.0 {
            bail!(InvalidArgument, msg("duration must be positive"));
        }
        if req.video.is_empty() {
            bail!(InvalidArgument, msg("upload contains no video data"));
        }
        let mek = self.db.lock().unwrap_mek(client_id, secret_hex)?;

        let meta = self.probe.probe(&req.video).await?;
        let title = title(
            req.timestamp,
            req.duration_seconds,
            req.has_motion,
            &meta.extension,
        );

        // Thumbnail failure is recoverable: store the clip without one.
        let thumbnail = match self.thumbnailer.thumbnail(&req.video, &meta).await {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(client = %client_id, err = %e.chain(), "thumbnail generation failed");
                None
            }
        };

        // Video and thumbnail are sealed separately; `encrypt` draws a fresh
        // nonce for each.
        let video = EncryptedBlob {
            data: crypto::encrypt(&req.video, &mek)?,
            width: meta.width,
            height: meta.height,
            mime: meta.mime,
        };
        let thumbnail = match thumbnail {
            None => None,
            Some(t) => Some(EncryptedBlob {
                data: crypto::encrypt(&t.data, &mek)?,
                width: t.width,
                height: t.height,
                mime: t.mime,
            }),
        };

        let clip = Clip {
            id: Uuid::new_v4(),
            client_id: client_id.to_owned(),
            title: title.clone(),
            start: req.timestamp,
            duration_ns: (req.duration_seconds * 1e9) as i64,
            has_motion: req.has_motion,
            video,
            thumbnail,
        };
        let id = clip.id;
        self.storage.store_clip(clip)?;
        Ok(NewClip { id, title })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::{Thumbnail, VideoMetadata};
    use async_trait::async_trait;
    use db::storage::NopNotifier;
    use db::testutil::{TestDb, TEST_CLIENT_ID};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProbe {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MediaProbe for FakeProbe {
        async fn probe(&self, _video: &[u8]) -> Result<VideoMetadata, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                base::bail!(InvalidArgument, msg("upload has no video dimensions"));
            }
            Ok(VideoMetadata {
                width: 1280,
                height: 720,
                mime: "video/mp4".to_owned(),
                extension: "mp4".to_owned(),
            })
        }
    }

    struct FakeThumbnailer {
        fail: bool,
    }

    #[async_trait]
    impl ThumbnailGenerator for FakeThumbnailer {
        async fn thumbnail(
            &self,
            _video: &[u8],
            meta: &VideoMetadata,
        ) -> Result<Thumbnail, Error> {
            if self.fail {
                base::bail!(Internal, msg("fake thumbnailer failure"));
            }
            Ok(Thumbnail {
                data: b"jpeg-bytes".to_vec(),
                width: 320,
                height: 320 * meta.height / meta.width,
                mime: "image/jpeg".to_owned(),
            })
        }
    }

    fn maker(
        tdb: &TestDb,
        probe_fail: bool,
        thumb_fail: bool,
    ) -> (ClipMaker<base::clock::SimulatedClocks>, Arc<FakeProbe>) {
        let storage = Arc::new(StorageManager::new(
            tdb.db.clone(),
            Arc::new(NopNotifier),
            Arc::new(NopNotifier),
        ));
        let probe = Arc::new(FakeProbe {
            calls: AtomicUsize::new(0),
            fail: probe_fail,
        });
        (
            ClipMaker::new(
                tdb.db.clone(),
                storage,
                probe.clone(),
                Arc::new(FakeThumbnailer { fail: thumb_fail }),
            ),
            probe,
        )
    }

    fn request() -> CreateClipRequest {
        CreateClipRequest {
            timestamp: "2021-01-01T00:00:00Z".parse().unwrap(),
            duration_seconds: 30.2,
            has_motion: true,
            video: b"raw-video".to_vec(),
        }
    }

    #[tokio::test]
    async fn stores_encrypted_round_trip() {
        let tdb = TestDb::new();
        let (maker, _) = maker(&tdb, false, false);
        let new = maker
            .create_clip(request(), TEST_CLIENT_ID, &tdb.client_secret_hex)
            .await
            .unwrap();
        assert_eq!(new.title, "2021-01-01T00-00-00_30s_motion.mp4");

        let l = tdb.db.lock();
        let clip = l.get_clip(new.id).unwrap().unwrap();
        assert_eq!(clip.client_id, TEST_CLIENT_ID);
        assert!(clip.has_motion);
        assert_eq!(clip.duration_ns, 30_200_000_000);
        // Stored blobs are ciphertext, recoverable only under the MEK.
        assert_ne!(clip.video.data, b"raw-video");
        assert_eq!(crypto::decrypt(&clip.video.data, &tdb.mek).unwrap(), b"raw-video");
        let thumb = clip.thumbnail.unwrap();
        assert_eq!(crypto::decrypt(&thumb.data, &tdb.mek).unwrap(), b"jpeg-bytes");
    }

    #[tokio::test]
    async fn bad_credentials_fail_before_probing() {
        let tdb = TestDb::new();
        let (maker, probe) = maker(&tdb, false, false);
        let wrong = base::strutil::hex(&[0x13; 32]);
        let e = maker
            .create_clip(request(), TEST_CLIENT_ID, &wrong)
            .await
            .unwrap_err();
        assert_eq!(e.kind(), base::ErrorKind::Unauthenticated);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn input_validation() {
        let tdb = TestDb::new();
        let (maker, probe) = maker(&tdb, false, false);
        let mut req = request();
        req.duration_seconds = 0.0;
        assert_eq!(
            maker
                .create_clip(req, TEST_CLIENT_ID, &tdb.client_secret_hex)
                .await
                .unwrap_err()
                .kind(),
            base::ErrorKind::InvalidArgument
        );
        let mut req = request();
        req.video.clear();
        assert_eq!(
            maker
                .create_clip(req, TEST_CLIENT_ID, &tdb.client_secret_hex)
                .await
                .unwrap_err()
                .kind(),
            base::ErrorKind::InvalidArgument
        );
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn probe_failure_fails_upload() {
        let tdb = TestDb::new();
        let (maker, _) = maker(&tdb, true, false);
        let e = maker
            .create_clip(request(), TEST_CLIENT_ID, &tdb.client_secret_hex)
            .await
            .unwrap_err();
        assert_eq!(e.kind(), base::ErrorKind::InvalidArgument);
        assert_eq!(
            tdb.db
                .lock()
                .query_clip_infos(&Default::default())
                .unwrap()
                .total_count,
            0
        );
    }

    #[tokio::test]
    async fn thumbnail_failure_is_recoverable() {
        let tdb = TestDb::new();
        let (maker, _) = maker(&tdb, false, true);
        let new = maker
            .create_clip(request(), TEST_CLIENT_ID, &tdb.client_secret_hex)
            .await
            .unwrap();
        let clip = tdb.db.lock().get_clip(new.id).unwrap().unwrap();
        assert!(clip.thumbnail.is_none());
        assert_eq!(crypto::decrypt(&clip.video.data, &tdb.mek).unwrap(), b"raw-video");
    }

    #[test]
    fn title_format() {
        let t: Timestamp = "2024-06-30T23:59:59.9Z".parse().unwrap();
        assert_eq!(title(t, 29.6, false, "webm"), "2024-06-30T23-59-59_30s_nomotion.webm");
        assert_eq!(title(t, 30.4, true, "mp4"), "2024-06-30T23-59-59_30s_motion.mp4");
    }
}
