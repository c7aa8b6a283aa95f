// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The clip repository: persistent encrypted clip records and their indexed
//! queries. Nothing here touches the cached registry state, so these are
//! plain functions over the connection.

use base::{Error, ErrorKind, ResultExt as _};
use jiff::Timestamp;
use rusqlite::{named_params, params, Connection, OptionalExtension as _};
use uuid::Uuid;

use crate::db::{from_ms, ms, SqlUuid};

/// An encrypted video or thumbnail blob: `nonce || ciphertext` plus the
/// plaintext's display parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedBlob {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub mime: String,
}

/// A full clip record, blobs included.
#[derive(Clone, Debug)]
pub struct Clip {
    pub id: Uuid,
    pub client_id: String,
    pub title: String,
    pub start: Timestamp,
    pub duration_ns: i64,
    pub has_motion: bool,
    pub video: EncryptedBlob,
    pub thumbnail: Option<EncryptedBlob>,
}

/// Clip metadata without the blobs.
#[derive(Clone, Debug)]
pub struct ClipInfo {
    pub id: Uuid,
    pub client_id: String,
    pub title: String,
    pub start: Timestamp,
    pub duration_ns: i64,
    pub has_motion: bool,
    pub video_width: i32,
    pub video_height: i32,
    pub video_mime: String,
    /// Encrypted size; what the quota accounting sees.
    pub video_bytes: i64,
    pub has_thumbnail: bool,
}

impl ClipInfo {
    pub fn duration_seconds(&self) -> f64 {
        self.duration_ns as f64 / 1e9
    }
}

/// Filters for [`query`]/[`query_info`]. Time bounds are inclusive and apply
/// to the clip's start time. `page` is 1-based; `page_size` of `None` returns
/// everything.
#[derive(Clone, Debug, Default)]
pub struct ClipQuery {
    pub client_id: Option<String>,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub has_motion: Option<bool>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

/// One page of query results plus the total match count regardless of
/// pagination.
#[derive(Clone, Debug)]
pub struct ClipPage<T> {
    pub rows: Vec<T>,
    pub total_count: i64,
}

const INFO_COLUMNS: &str = r#"
  id,
  client_id,
  title,
  start_time_ms,
  duration_ns,
  has_motion,
  video_width,
  video_height,
  video_mime,
  length(video),
  thumbnail is not null
"#;

const FULL_COLUMNS: &str = r#"
  id,
  client_id,
  title,
  start_time_ms,
  duration_ns,
  has_motion,
  video,
  video_width,
  video_height,
  video_mime,
  thumbnail,
  thumbnail_width,
  thumbnail_height,
  thumbnail_mime
"#;

fn info_from_row(row: &rusqlite::Row) -> rusqlite::Result<ClipInfo> {
    Ok(ClipInfo {
        id: row.get::<_, SqlUuid>(0)?.0,
        client_id: row.get(1)?,
        title: row.get(2)?,
        start: from_ms(row.get(3)?),
        duration_ns: row.get(4)?,
        has_motion: row.get(5)?,
        video_width: row.get(6)?,
        video_height: row.get(7)?,
        video_mime: row.get(8)?,
        video_bytes: row.get(9)?,
        has_thumbnail: row.get(10)?,
    })
}

fn clip_from_row(row: &rusqlite::Row) -> rusqlite::Result<Clip> {
    let thumbnail = match row.get::<_, Option<Vec<u8>>>(10)? {
        None => None,
        Some(data) => Some(EncryptedBlob {
            data,
            width: row.get(11)?,
            height: row.get(12)?,
            mime: row.get(13)?,
        }),
    };
    Ok(Clip {
        id: row.get::<_, SqlUuid>(0)?.0,
        client_id: row.get(1)?,
        title: row.get(2)?,
        start: from_ms(row.get(3)?),
        duration_ns: row.get(4)?,
        has_motion: row.get(5)?,
        video: EncryptedBlob {
            data: row.get(6)?,
            width: row.get(7)?,
            height: row.get(8)?,
            mime: row.get(9)?,
        },
        thumbnail,
    })
}

/// Builds the shared `where` clause and its positional parameters.
fn filter(q: &ClipQuery) -> (String, Vec<Box<dyn rusqlite::types::ToSql>>) {
    let mut clauses: Vec<&'static str> = Vec::new();
    let mut bound: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    if let Some(ref client_id) = q.client_id {
        clauses.push("client_id = ?");
        bound.push(Box::new(client_id.clone()));
    }
    if let Some(start) = q.start_time {
        clauses.push("start_time_ms >= ?");
        bound.push(Box::new(ms(start)));
    }
    if let Some(end) = q.end_time {
        clauses.push("start_time_ms <= ?");
        bound.push(Box::new(ms(end)));
    }
    if let Some(has_motion) = q.has_motion {
        clauses.push("has_motion = ?");
        bound.push(Box::new(has_motion));
    }
    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" where {}", clauses.join(" and "))
    };
    (sql, bound)
}

fn query_inner<T>(
    conn: &Connection,
    q: &ClipQuery,
    columns: &str,
    map: fn(&rusqlite::Row) -> rusqlite::Result<T>,
) -> Result<ClipPage<T>, Error> {
    let (where_sql, mut bound) = filter(q);
    let total_count: i64 = conn
        .query_row(
            &format!("select count(*) from clip{where_sql}"),
            rusqlite::params_from_iter(bound.iter().map(|p| p.as_ref())),
            |row| row.get(0),
        )
        .err_kind(ErrorKind::Internal)?;

    let mut limit_sql = String::new();
    if let Some(page_size) = q.page_size {
        let page = q.page.unwrap_or(1).max(1);
        limit_sql = " limit ? offset ?".to_owned();
        bound.push(Box::new(page_size as i64));
        bound.push(Box::new(((page - 1) * page_size) as i64));
    }
    let sql = format!(
        "select {columns} from clip{where_sql} order by start_time_ms desc, id{limit_sql}"
    );
    let mut stmt = conn.prepare_cached(&sql).err_kind(ErrorKind::Internal)?;
    let mut rows = stmt
        .query(rusqlite::params_from_iter(bound.iter().map(|p| p.as_ref())))
        .err_kind(ErrorKind::Internal)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().err_kind(ErrorKind::Internal)? {
        out.push(map(row).err_kind(ErrorKind::Internal)?);
    }
    Ok(ClipPage {
        rows: out,
        total_count,
    })
}

pub(crate) fn add(conn: &Connection, clip: &Clip) -> Result<(), Error> {
    let mut stmt = conn
        .prepare_cached(
            r#"
            insert into clip (id,  client_id,  title,  start_time_ms,  duration_ns,  has_motion,
                              video,  video_width,  video_height,  video_mime,
                              thumbnail,  thumbnail_width,  thumbnail_height,  thumbnail_mime)
                      values (:id, :client_id, :title, :start_time_ms, :duration_ns, :has_motion,
                              :video, :video_width, :video_height, :video_mime,
                              :thumbnail, :thumbnail_width, :thumbnail_height, :thumbnail_mime)
            "#,
        )
        .err_kind(ErrorKind::Internal)?;
    stmt.execute(named_params! {
        ":id": SqlUuid(clip.id),
        ":client_id": &clip.client_id,
        ":title": &clip.title,
        ":start_time_ms": ms(clip.start),
        ":duration_ns": clip.duration_ns,
        ":has_motion": clip.has_motion,
        ":video": &clip.video.data,
        ":video_width": clip.video.width,
        ":video_height": clip.video.height,
        ":video_mime": &clip.video.mime,
        ":thumbnail": clip.thumbnail.as_ref().map(|t| &t.data),
        ":thumbnail_width": clip.thumbnail.as_ref().map(|t| t.width),
        ":thumbnail_height": clip.thumbnail.as_ref().map(|t| t.height),
        ":thumbnail_mime": clip.thumbnail.as_ref().map(|t| &t.mime),
    })
    .err_kind(ErrorKind::Internal)?;
    Ok(())
}

pub(crate) fn get(conn: &Connection, id: Uuid) -> Result<Option<Clip>, Error> {
    conn.query_row(
        &format!("select {FULL_COLUMNS} from clip where id = ?"),
        params![SqlUuid(id)],
        clip_from_row,
    )
    .optional()
    .err_kind(ErrorKind::Internal)
}

pub(crate) fn info(conn: &Connection, id: Uuid) -> Result<Option<ClipInfo>, Error> {
    conn.query_row(
        &format!("select {INFO_COLUMNS} from clip where id = ?"),
        params![SqlUuid(id)],
        info_from_row,
    )
    .optional()
    .err_kind(ErrorKind::Internal)
}

pub(crate) fn query(conn: &Connection, q: &ClipQuery) -> Result<ClipPage<Clip>, Error> {
    query_inner(conn, q, FULL_COLUMNS, clip_from_row)
}

pub(crate) fn query_info(conn: &Connection, q: &ClipQuery) -> Result<ClipPage<ClipInfo>, Error> {
    query_inner(conn, q, INFO_COLUMNS, info_from_row)
}

pub(crate) fn oldest(
    conn: &Connection,
    client_id: &str,
    n: usize,
) -> Result<Vec<ClipInfo>, Error> {
    let mut stmt = conn
        .prepare_cached(&format!(
            r#"
            select {INFO_COLUMNS}
            from clip
            where client_id = :client_id
            order by start_time_ms, id
            limit :limit
            "#
        ))
        .err_kind(ErrorKind::Internal)?;
    let mut rows = stmt
        .query(named_params! { ":client_id": client_id, ":limit": n as i64 })
        .err_kind(ErrorKind::Internal)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().err_kind(ErrorKind::Internal)? {
        out.push(info_from_row(row).err_kind(ErrorKind::Internal)?);
    }
    Ok(out)
}

pub(crate) fn upcoming(
    conn: &Connection,
    client_id: &str,
    from: Timestamp,
    limit: usize,
) -> Result<Vec<ClipInfo>, Error> {
    let mut stmt = conn
        .prepare_cached(&format!(
            r#"
            select {INFO_COLUMNS}
            from clip
            where client_id = :client_id and start_time_ms >= :from_ms
            order by start_time_ms, id
            limit :limit
            "#
        ))
        .err_kind(ErrorKind::Internal)?;
    let mut rows = stmt
        .query(named_params! {
            ":client_id": client_id,
            ":from_ms": ms(from),
            ":limit": limit as i64,
        })
        .err_kind(ErrorKind::Internal)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().err_kind(ErrorKind::Internal)? {
        out.push(info_from_row(row).err_kind(ErrorKind::Internal)?);
    }
    Ok(out)
}

pub(crate) fn total_storage_usage(conn: &Connection, client_id: &str) -> Result<i64, Error> {
    conn.query_row(
        "select coalesce(sum(length(video)), 0) from clip where client_id = ?",
        params![client_id],
        |row| row.get(0),
    )
    .err_kind(ErrorKind::Internal)
}

pub(crate) fn thumbnail(conn: &Connection, id: Uuid) -> Result<Option<EncryptedBlob>, Error> {
    let row = conn
        .query_row(
            r#"
            select thumbnail, thumbnail_width, thumbnail_height, thumbnail_mime
            from clip
            where id = ?
            "#,
            params![SqlUuid(id)],
            |row| {
                Ok(match row.get::<_, Option<Vec<u8>>>(0)? {
                    None => None,
                    Some(data) => Some(EncryptedBlob {
                        data,
                        width: row.get(1)?,
                        height: row.get(2)?,
                        mime: row.get(3)?,
                    }),
                })
            },
        )
        .optional()
        .err_kind(ErrorKind::Internal)?;
    Ok(row.flatten())
}

pub(crate) fn delete(conn: &Connection, id: Uuid) -> Result<(), Error> {
    conn.execute("delete from clip where id = ?", params![SqlUuid(id)])
        .err_kind(ErrorKind::Internal)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestDb;
    use itertools::Itertools as _;

    fn make_clip(client_id: &str, start_sec: i64, motion: bool, video_len: usize) -> Clip {
        Clip {
            id: Uuid::new_v4(),
            client_id: client_id.to_owned(),
            title: format!("clip-at-{start_sec}"),
            start: Timestamp::from_second(start_sec).unwrap(),
            duration_ns: 30_000_000_000,
            has_motion: motion,
            video: EncryptedBlob {
                data: vec![0xab; video_len],
                width: 1280,
                height: 720,
                mime: "video/mp4".to_owned(),
            },
            thumbnail: Some(EncryptedBlob {
                data: vec![0xcd; 100],
                width: 320,
                height: 180,
                mime: "image/jpeg".to_owned(),
            }),
        }
    }

    #[test]
    fn add_get_round_trip() {
        let tdb = TestDb::new();
        let clip = make_clip(crate::testutil::TEST_CLIENT_ID, 100, true, 1000);
        let mut l = tdb.db.lock();
        l.add_clip(&clip).unwrap();
        let got = l.get_clip(clip.id).unwrap().unwrap();
        assert_eq!(got.title, clip.title);
        assert_eq!(got.start, clip.start);
        assert_eq!(got.video, clip.video);
        assert_eq!(got.thumbnail, clip.thumbnail);
        assert!(l.get_clip(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn query_filters_and_order() {
        let tdb = TestDb::new();
        let cid = crate::testutil::TEST_CLIENT_ID;
        let mut l = tdb.db.lock();
        for (t, motion) in [(100, false), (200, true), (300, false), (400, true)] {
            l.add_clip(&make_clip(cid, t, motion, 10)).unwrap();
        }
        let q = ClipQuery {
            client_id: Some(cid.to_owned()),
            ..Default::default()
        };
        let page = l.query_clip_infos(&q).unwrap();
        assert_eq!(page.total_count, 4);
        // Ordered by timestamp descending.
        let times = page.rows.iter().map(|c| c.start.as_second()).collect_vec();
        assert_eq!(times, vec![400, 300, 200, 100]);

        // Inclusive time bounds.
        let q = ClipQuery {
            start_time: Some(Timestamp::from_second(200).unwrap()),
            end_time: Some(Timestamp::from_second(300).unwrap()),
            ..Default::default()
        };
        let page = l.query_clip_infos(&q).unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(
            page.rows.iter().map(|c| c.start.as_second()).collect_vec(),
            vec![300, 200]
        );

        // Motion filter.
        let q = ClipQuery {
            has_motion: Some(true),
            ..Default::default()
        };
        assert_eq!(l.query_clip_infos(&q).unwrap().total_count, 2);

        // Unknown client matches nothing.
        let q = ClipQuery {
            client_id: Some("nope".to_owned()),
            ..Default::default()
        };
        let page = l.query_clip_infos(&q).unwrap();
        assert_eq!(page.total_count, 0);
        assert!(page.rows.is_empty());
    }

    #[test]
    fn pagination_and_total_count() {
        let tdb = TestDb::new();
        let cid = crate::testutil::TEST_CLIENT_ID;
        let mut l = tdb.db.lock();
        for t in 0..10 {
            l.add_clip(&make_clip(cid, t * 100, false, 10)).unwrap();
        }
        let q = ClipQuery {
            page: Some(2),
            page_size: Some(3),
            ..Default::default()
        };
        let page = l.query_clip_infos(&q).unwrap();
        // total_count is independent of pagination.
        assert_eq!(page.total_count, 10);
        assert_eq!(
            page.rows.iter().map(|c| c.start.as_second()).collect_vec(),
            vec![600, 500, 400]
        );

        // Past the end: empty rows, same count.
        let q = ClipQuery {
            page: Some(5),
            page_size: Some(3),
            ..Default::default()
        };
        let page = l.query_clip_infos(&q).unwrap();
        assert_eq!(page.total_count, 10);
        assert_eq!(page.rows.iter().map(|c| c.start.as_second()).collect_vec(), Vec::<i64>::new());
    }

    #[test]
    fn oldest_and_upcoming() {
        let tdb = TestDb::new();
        let cid = crate::testutil::TEST_CLIENT_ID;
        let mut l = tdb.db.lock();
        for t in [300, 100, 200, 400] {
            l.add_clip(&make_clip(cid, t, false, 10)).unwrap();
        }
        let oldest = l.get_oldest_clips(cid, 2).unwrap();
        assert_eq!(
            oldest.iter().map(|c| c.start.as_second()).collect_vec(),
            vec![100, 200]
        );
        let upcoming = l
            .list_upcoming_clips(cid, Timestamp::from_second(200).unwrap(), 10)
            .unwrap();
        assert_eq!(
            upcoming.iter().map(|c| c.start.as_second()).collect_vec(),
            vec![200, 300, 400]
        );
    }

    #[test]
    fn storage_usage_counts_video_only() {
        let tdb = TestDb::new();
        let cid = crate::testutil::TEST_CLIENT_ID;
        let mut l = tdb.db.lock();
        assert_eq!(l.get_total_storage_usage(cid).unwrap(), 0);
        l.add_clip(&make_clip(cid, 100, false, 1000)).unwrap();
        let mut no_thumb = make_clip(cid, 200, false, 500);
        no_thumb.thumbnail = None;
        l.add_clip(&no_thumb).unwrap();
        // Thumbnails (100 bytes each) are not part of the quota.
        assert_eq!(l.get_total_storage_usage(cid).unwrap(), 1500);
    }

    #[test]
    fn thumbnail_fetch() {
        let tdb = TestDb::new();
        let cid = crate::testutil::TEST_CLIENT_ID;
        let mut l = tdb.db.lock();
        let clip = make_clip(cid, 100, false, 10);
        l.add_clip(&clip).unwrap();
        let t = l.get_clip_thumbnail(clip.id).unwrap().unwrap();
        assert_eq!(t, clip.thumbnail.unwrap());

        let mut no_thumb = make_clip(cid, 200, false, 10);
        no_thumb.thumbnail = None;
        l.add_clip(&no_thumb).unwrap();
        assert!(l.get_clip_thumbnail(no_thumb.id).unwrap().is_none());
        assert!(l.get_clip_thumbnail(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn delete_is_idempotent() {
        let tdb = TestDb::new();
        let cid = crate::testutil::TEST_CLIENT_ID;
        let mut l = tdb.db.lock();
        let clip = make_clip(cid, 100, false, 10);
        l.add_clip(&clip).unwrap();
        l.delete_clip(clip.id).unwrap();
        assert!(l.get_clip(clip.id).unwrap().is_none());
        l.delete_clip(clip.id).unwrap();
    }
}
