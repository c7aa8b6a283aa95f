// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! HLS playlist synthesis over stored clips.
//!
//! The operator replays stored footage on a virtual timeline:
//! `virtual_now = reference_time + (wall_now - start_time)`. Each refresh
//! selects the next window of clips at or after the virtual now and emits an
//! M3U8 document whose media sequence comes from a fixed-epoch sequence
//! clock, so numbers stay small and strictly monotonic across refreshes.

use std::fmt::Write as _;
use std::sync::Arc;

use base::clock::{Clocks, RealClocks};
use base::Error;
use db::Database;
use jiff::Timestamp;
use serde::Serialize;

/// 2021-01-01T00:00:00Z; keeps sequence numbers small.
pub const SEQUENCE_EPOCH_UNIX_SEC: i64 = 1_609_459_200;

/// Fallback target duration when a playlist window is empty, and the floor
/// for the sequence clock's step.
pub const DEFAULT_TARGET_DURATION_SEC: i64 = 30;

/// Monotonic media sequence number for a virtual instant.
pub fn sequence(virtual_time: Timestamp, segment_duration_sec: i64) -> i64 {
    let step = segment_duration_sec.max(DEFAULT_TARGET_DURATION_SEC);
    (virtual_time.as_second() - SEQUENCE_EPOCH_UNIX_SEC).div_euclid(step)
}

#[derive(Serialize)]
struct SegmentMeta<'a> {
    title: &'a str,
    recorded_at: String,
    motion: bool,
}

pub struct PlaylistGenerator<C: Clocks + Clone = RealClocks> {
    db: Arc<Database<C>>,
    look_ahead: usize,
    live: bool,
}

impl<C: Clocks + Clone> PlaylistGenerator<C> {
    /// `look_ahead` is how many upcoming clips each playlist covers. The
    /// operator view is always live (`live = true`); a non-live playlist is
    /// terminated with `#EXT-X-ENDLIST`.
    pub fn new(db: Arc<Database<C>>, look_ahead: usize, live: bool) -> Self {
        PlaylistGenerator {
            db,
            look_ahead,
            live,
        }
    }

    pub fn playlist(
        &self,
        client_id: &str,
        start_time: Timestamp,
        reference_time: Timestamp,
    ) -> Result<String, Error> {
        let wall_now = self.db.clocks().now();
        let virtual_now_ms =
            reference_time.as_millisecond() + (wall_now.as_millisecond() - start_time.as_millisecond());
        let virtual_now = Timestamp::from_millisecond(virtual_now_ms)
            .map_err(|e| base::err!(InvalidArgument, msg("virtual clock out of range"), source(e)))?;

        // Ascending by timestamp, per the repository's ordering contract.
        let clips = self
            .db
            .lock()
            .list_upcoming_clips(client_id, virtual_now, self.look_ahead)?;

        let target_duration = clips
            .iter()
            .map(|c| c.duration_seconds().ceil() as i64)
            .max()
            .unwrap_or(DEFAULT_TARGET_DURATION_SEC);
        let media_sequence = sequence(virtual_now, target_duration);

        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        out.push_str("#EXT-X-VERSION:3\n");
        writeln!(&mut out, "#EXT-X-TARGETDURATION:{target_duration}").unwrap();
        writeln!(&mut out, "#EXT-X-MEDIA-SEQUENCE:{media_sequence}").unwrap();
        for clip in &clips {
            let meta = serde_json::to_string(&SegmentMeta {
                title: &clip.title,
                recorded_at: clip.start.to_string(),
                motion: clip.has_motion,
            })
            .expect("segment metadata serializes");
            writeln!(&mut out, "#EXTINF:{:.1},{meta}", clip.duration_seconds()).unwrap();
            writeln!(&mut out, "/stream/{client_id}/segments/{}", clip.id).unwrap();
        }
        if !self.live {
            out.push_str("#EXT-X-ENDLIST\n");
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::clips::{Clip, EncryptedBlob};
    use db::testutil::{TestDb, TEST_CLIENT_ID};
    use std::time::Duration;

    fn add_clip(tdb: &TestDb, start: Timestamp, duration_sec: f64, motion: bool) -> Clip {
        let clip = Clip {
            id: uuid::Uuid::new_v4(),
            client_id: TEST_CLIENT_ID.to_owned(),
            title: format!("clip-{}", start.as_second()),
            start,
            duration_ns: (duration_sec * 1e9) as i64,
            has_motion: motion,
            video: EncryptedBlob {
                data: vec![0; 16],
                width: 1280,
                height: 720,
                mime: "video/mp4".to_owned(),
            },
            thumbnail: None,
        };
        tdb.db.lock().add_clip(&clip).unwrap();
        clip
    }

    fn epoch_plus(secs: i64) -> Timestamp {
        Timestamp::from_second(SEQUENCE_EPOCH_UNIX_SEC + secs).unwrap()
    }

    #[test]
    fn sequence_clock() {
        assert_eq!(sequence(epoch_plus(0), 30), 0);
        assert_eq!(sequence(epoch_plus(29), 30), 0);
        assert_eq!(sequence(epoch_plus(30), 30), 1);
        assert_eq!(sequence(epoch_plus(3600), 30), 120);
        // Durations below 30 s are floored to a 30 s step.
        assert_eq!(sequence(epoch_plus(3600), 10), 120);
        assert_eq!(sequence(epoch_plus(3600), 60), 60);
        // Pre-epoch times stay monotonic.
        assert_eq!(sequence(epoch_plus(-1), 30), -1);
    }

    #[test]
    fn continuity_across_refreshes() {
        let tdb = TestDb::new();
        let t0 = epoch_plus(3600);
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(add_clip(&tdb, epoch_plus(3600 + 30 * i), 30.0, i == 1).id);
        }
        let gen = PlaylistGenerator::new(tdb.db.clone(), 10, true);

        // startTime == wall now, refTime == t0: the virtual clock sits at t0.
        let start = tdb.clocks.now();
        let m3u8 = gen.playlist(TEST_CLIENT_ID, start, t0).unwrap();
        let lines: Vec<&str> = m3u8.lines().collect();
        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXT-X-VERSION:3");
        assert_eq!(lines[2], "#EXT-X-TARGETDURATION:30");
        assert_eq!(lines[3], "#EXT-X-MEDIA-SEQUENCE:120");
        assert_eq!(
            lines[4],
            "#EXTINF:30.0,{\"title\":\"clip-1609462800\",\
             \"recorded_at\":\"2021-01-01T01:00:00Z\",\"motion\":false}"
        );
        assert_eq!(lines[5], format!("/stream/testcam/segments/{}", ids[0]));
        // Four entries, ascending, and a live playlist: no ENDLIST.
        assert_eq!(lines.len(), 4 + 8);
        assert!(!m3u8.contains("#EXT-X-ENDLIST"));
        let entry_times: Vec<&str> = lines
            .iter()
            .filter(|l| l.starts_with("#EXTINF"))
            .map(|l| *l)
            .collect();
        assert_eq!(entry_times.len(), 4);

        // 30 s later the sequence advances by exactly one and the first clip
        // has rolled off.
        tdb.clocks.advance(Duration::from_secs(30));
        let m3u8 = gen.playlist(TEST_CLIENT_ID, start, t0).unwrap();
        let lines: Vec<&str> = m3u8.lines().collect();
        assert_eq!(lines[3], "#EXT-X-MEDIA-SEQUENCE:121");
        assert_eq!(lines.iter().filter(|l| l.starts_with("#EXTINF")).count(), 3);
        assert_eq!(lines[5], format!("/stream/testcam/segments/{}", ids[1]));
    }

    #[test]
    fn window_is_bounded_by_look_ahead() {
        let tdb = TestDb::new();
        for i in 0..10 {
            add_clip(&tdb, epoch_plus(3600 + 30 * i), 30.0, false);
        }
        let gen = PlaylistGenerator::new(tdb.db.clone(), 3, true);
        let m3u8 = gen
            .playlist(TEST_CLIENT_ID, tdb.clocks.now(), epoch_plus(3600))
            .unwrap();
        assert_eq!(m3u8.lines().filter(|l| l.starts_with("#EXTINF")).count(), 3);
    }

    #[test]
    fn empty_window_defaults() {
        let tdb = TestDb::new();
        let gen = PlaylistGenerator::new(tdb.db.clone(), 5, true);
        let m3u8 = gen
            .playlist(TEST_CLIENT_ID, tdb.clocks.now(), epoch_plus(0))
            .unwrap();
        let lines: Vec<&str> = m3u8.lines().collect();
        assert_eq!(lines[2], "#EXT-X-TARGETDURATION:30");
        assert_eq!(lines[3], "#EXT-X-MEDIA-SEQUENCE:0");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn ended_stream_gets_endlist() {
        let tdb = TestDb::new();
        add_clip(&tdb, epoch_plus(0), 30.0, false);
        let gen = PlaylistGenerator::new(tdb.db.clone(), 5, false);
        let m3u8 = gen
            .playlist(TEST_CLIENT_ID, tdb.clocks.now(), epoch_plus(0))
            .unwrap();
        assert!(m3u8.ends_with("#EXT-X-ENDLIST\n"));
    }

    #[test]
    fn longer_clips_widen_target_duration() {
        let tdb = TestDb::new();
        add_clip(&tdb, epoch_plus(0), 30.0, false);
        add_clip(&tdb, epoch_plus(30), 45.5, false);
        let gen = PlaylistGenerator::new(tdb.db.clone(), 5, true);
        let m3u8 = gen
            .playlist(TEST_CLIENT_ID, tdb.clocks.now(), epoch_plus(0))
            .unwrap();
        let lines: Vec<&str> = m3u8.lines().collect();
        assert_eq!(lines[2], "#EXT-X-TARGETDURATION:46");
        assert!(lines[6].starts_with("#EXTINF:45.5,"));
    }
}
