// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The two HTTP surfaces: the per-client capture API (HTTP Basic auth) and
//! the operator API (session cookie holding the MEK).

mod path;
pub mod session;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use base::clock::{Clocks, RealClocks};
use base::{err, Error, ErrorKind};
use bytes::Bytes;
use db::authfail::FailureTracker;
use db::clips::ClipQuery;
use db::Database;
use futures::StreamExt as _;
use http::header::{self, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt as _;
use jiff::Timestamp;
use memchr::memchr;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::form_urlencoded;
use uuid::Uuid;

use self::path::Path;
use self::session::SessionStore;
use crate::cache::SegmentCache;
use crate::clipmaker::{ClipMaker, CreateClipRequest};
use crate::json;
use crate::normalize::Normalizer;
use crate::notify::AuthNotifier;
use crate::playlist::PlaylistGenerator;
use crate::reader::{ClipReader, MekSource as _, SessionMek};

pub type Body = http_body_util::Full<Bytes>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An HTTP error response.
///
/// This is a thin wrapper over the hyper response type; its purpose is to
/// allow automatic conversion from `base::Error` in handlers that return
/// `ResponseResult`.
#[derive(Debug)]
struct HttpError(Response<Body>);

impl From<Response<Body>> for HttpError {
    fn from(response: Response<Body>) -> Self {
        HttpError(response)
    }
}

impl From<Error> for HttpError {
    fn from(err: Error) -> Self {
        HttpError(from_base_error(err))
    }
}

type ResponseResult = Result<Response<Body>, HttpError>;

fn plain_response<B: Into<Body>>(status: StatusCode, body: B) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))
        .body(body.into())
        .expect("hardcoded head should be valid")
}

fn not_found<B: Into<Body>>(body: B) -> HttpError {
    HttpError(plain_response(StatusCode::NOT_FOUND, body))
}

fn bad_req<B: Into<Body>>(body: B) -> HttpError {
    HttpError(plain_response(StatusCode::BAD_REQUEST, body))
}

fn unauthenticated() -> HttpError {
    let mut resp = plain_response(StatusCode::UNAUTHORIZED, "unauthenticated");
    resp.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"cryospy\""),
    );
    HttpError(resp)
}

fn from_base_error(err: Error) -> Response<Body> {
    use ErrorKind::*;
    let status_code = match err.kind() {
        Unauthenticated => StatusCode::UNAUTHORIZED,
        PermissionDenied => StatusCode::FORBIDDEN,
        InvalidArgument | FailedPrecondition => StatusCode::BAD_REQUEST,
        NotFound => StatusCode::NOT_FOUND,
        AlreadyExists => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    plain_response(status_code, err.to_string())
}

/// On the capture path every error collapses to 400, 401, or an opaque 500;
/// nothing else about the failure is disclosed.
fn capture_error(err: Error) -> HttpError {
    use ErrorKind::*;
    HttpError(match err.kind() {
        InvalidArgument => plain_response(StatusCode::BAD_REQUEST, err.to_string()),
        Unauthenticated => plain_response(StatusCode::UNAUTHORIZED, "unauthenticated"),
        _ => {
            warn!(err = %err.chain(), "upload failed");
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    })
}

fn json_response<T: serde::Serialize>(status: StatusCode, out: &T) -> ResponseResult {
    let body = serde_json::to_vec(out)
        .map_err(|e| err!(Internal, msg("serializing response"), source(e)))?;
    Ok(Response::builder()
        .status(status)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )
        .body(body.into())
        .expect("hardcoded head should be valid"))
}

fn no_content() -> ResponseResult {
    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::default())
        .expect("hardcoded head should be valid"))
}

fn require_method<B>(req: &Request<B>, method: Method) -> Result<(), HttpError> {
    if *req.method() != method {
        return Err(HttpError(plain_response(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("{method} expected"),
        )));
    }
    Ok(())
}

/// Parses an `Authorization: Basic` header into `(client_id, secret_hex)`.
fn basic_auth<B>(req: &Request<B>) -> Option<(String, String)> {
    use base64::prelude::{Engine as _, BASE64_STANDARD};
    let header = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let b64 = header.strip_prefix("Basic ")?;
    let decoded = BASE64_STANDARD.decode(b64).ok()?;
    let colon = memchr(b':', &decoded)?;
    let id = std::str::from_utf8(&decoded[..colon]).ok()?.to_owned();
    let secret = std::str::from_utf8(&decoded[colon + 1..]).ok()?.to_owned();
    Some((id, secret))
}

/// Pulls the `s` session cookie out of the request, if any.
fn extract_sid<B>(req: &Request<B>) -> Option<String> {
    let cookies = req.headers().get(header::COOKIE)?.to_str().ok()?;
    for cookie in cookies.split(';') {
        if let Some(sid) = cookie.trim().strip_prefix("s=") {
            return Some(sid.to_owned());
        }
    }
    None
}

fn parse_clip_query(query: &str) -> Result<ClipQuery, HttpError> {
    let mut q = ClipQuery::default();
    for (k, v) in form_urlencoded::parse(query.as_bytes()) {
        match k.as_ref() {
            "client_id" => q.client_id = Some(v.into_owned()),
            "start_time" => {
                q.start_time =
                    Some(v.parse().map_err(|_| bad_req("unparseable start_time"))?)
            }
            "end_time" => {
                q.end_time = Some(v.parse().map_err(|_| bad_req("unparseable end_time"))?)
            }
            "has_motion" => q.has_motion = Some(v.as_ref() == "true" || v.as_ref() == "1"),
            "page" => q.page = Some(v.parse().map_err(|_| bad_req("unparseable page"))?),
            "page_size" => {
                q.page_size = Some(v.parse().map_err(|_| bad_req("unparseable page_size"))?)
            }
            _ => return Err(bad_req(format!("unknown query parameter {k}"))),
        }
    }
    Ok(q)
}

async fn extract_json_body<B, T>(req: Request<B>) -> Result<T, HttpError>
where
    B: http_body::Body<Data = Bytes>,
    B::Error: Into<BoxError>,
    T: DeserializeOwned,
{
    let limited = http_body_util::Limited::new(req.into_body(), 1 << 16);
    let bytes = limited
        .collect()
        .await
        .map_err(|_| bad_req("unreadable or oversized request body"))?
        .to_bytes();
    serde_json::from_slice(&bytes).map_err(|e| bad_req(format!("bad request body: {e}")))
}

/// Which bind a request arrived on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Surface {
    Operator,
    Capture,
}

/// Reverse proxies whose forwarded-peer headers are trusted, per surface.
#[derive(Clone, Debug, Default)]
pub struct TrustedProxies {
    pub operator: Vec<IpAddr>,
    pub capture: Vec<IpAddr>,
}

pub struct Service<C: Clocks + Clone = RealClocks> {
    db: Arc<Database<C>>,
    clipmaker: ClipMaker<C>,
    reader: ClipReader<C>,
    normalizer: Arc<Normalizer>,
    playlists: PlaylistGenerator<C>,
    failures: FailureTracker,
    auth_notifier: Arc<dyn AuthNotifier>,
    cache: Option<Arc<SegmentCache>>,
    sessions: SessionStore,
    max_upload_bytes: u64,
    trusted_proxies: TrustedProxies,
}

enum CaptureAuth {
    Ok,
    Disabled,
    BadSecret,
    UnknownClient,
}

impl<C: Clocks + Clone> Service<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database<C>>,
        clipmaker: ClipMaker<C>,
        reader: ClipReader<C>,
        normalizer: Arc<Normalizer>,
        playlists: PlaylistGenerator<C>,
        failures: FailureTracker,
        auth_notifier: Arc<dyn AuthNotifier>,
        cache: Option<Arc<SegmentCache>>,
        max_upload_bytes: u64,
        trusted_proxies: TrustedProxies,
    ) -> Self {
        Service {
            db,
            clipmaker,
            reader,
            normalizer,
            playlists,
            failures,
            auth_notifier,
            cache,
            sessions: SessionStore::new(),
            max_upload_bytes,
            trusted_proxies,
        }
    }

    pub async fn serve<B>(
        self: Arc<Self>,
        surface: Surface,
        peer: SocketAddr,
        req: Request<B>,
    ) -> Result<Response<Body>, std::convert::Infallible>
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let decoded = Path::decode(req.uri().path());
        let method = req.method().clone();
        let uri_path = req.uri().path().to_owned();
        let result = match surface {
            Surface::Capture => self.serve_capture(decoded, peer, req).await,
            Surface::Operator => self.serve_operator(decoded, req).await,
        };
        let response = result.unwrap_or_else(|e| e.0);
        debug!(%method, path = %uri_path, status = %response.status().as_u16(), "request");
        Ok(response)
    }

    fn effective_peer<B>(&self, surface: Surface, peer: SocketAddr, req: &Request<B>) -> IpAddr {
        let trusted = match surface {
            Surface::Operator => &self.trusted_proxies.operator,
            Surface::Capture => &self.trusted_proxies.capture,
        };
        if trusted.contains(&peer.ip()) {
            if let Some(forwarded) = req
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse().ok())
            {
                return forwarded;
            }
        }
        peer.ip()
    }

    // --- capture surface -------------------------------------------------

    async fn serve_capture<B>(
        &self,
        path: Path,
        peer: SocketAddr,
        req: Request<B>,
    ) -> ResponseResult
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        match path {
            Path::Clips => {
                require_method(&req, Method::POST)?;
                self.capture_upload(peer, req).await
            }
            Path::CaptureSettings => {
                require_method(&req, Method::GET)?;
                self.capture_settings(peer, req).await
            }
            _ => Err(not_found("no such capture endpoint")),
        }
    }

    /// Authenticates a capture request, driving the failure tracker, the
    /// auto-disable threshold, and the auth notifier on the way.
    fn authenticate_capture<B>(
        &self,
        req: &Request<B>,
        peer_ip: IpAddr,
    ) -> Result<(String, String), HttpError> {
        let Some((client_id, secret_hex)) = basic_auth(req) else {
            return Err(unauthenticated());
        };
        let verdict = {
            let l = self.db.lock();
            if l.get_client(&client_id).is_none() {
                // Unknown ids are rejected without being tracked, so scans
                // can't fill the failure list.
                CaptureAuth::UnknownClient
            } else {
                match l.verify_client(&client_id, &secret_hex) {
                    Ok(c) if c.disabled => CaptureAuth::Disabled,
                    Ok(_) => CaptureAuth::Ok,
                    Err(_) => CaptureAuth::BadSecret,
                }
            }
        };
        match verdict {
            CaptureAuth::Ok => Ok((client_id, secret_hex)),
            CaptureAuth::UnknownClient | CaptureAuth::Disabled => Err(unauthenticated()),
            CaptureAuth::BadSecret => {
                self.note_auth_failure(&client_id, peer_ip);
                Err(unauthenticated())
            }
        }
    }

    fn note_auth_failure(&self, client_id: &str, peer_ip: IpAddr) {
        let now = self.db.clocks().now();
        let count = self
            .failures
            .record_failure(client_id, Some(peer_ip), now);
        info!(client = %client_id, peer = %peer_ip, count, "authentication failure");
        if self.failures.should_auto_disable(count) {
            match self.db.lock().set_client_enabled(now, client_id, false) {
                Ok(()) => warn!(client = %client_id, count, "auto-disabled after repeated failures"),
                Err(e) => warn!(client = %client_id, err = %e.chain(), "unable to auto-disable"),
            }
        }
        if self.auth_notifier.should_notify(count) {
            self.auth_notifier.notify_auth_failures(client_id, count);
        }
    }

    async fn capture_upload<B>(&self, peer: SocketAddr, req: Request<B>) -> ResponseResult
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let peer_ip = self.effective_peer(Surface::Capture, peer, &req);
        let (client_id, secret_hex) = self.authenticate_capture(&req, peer_ip)?;

        if let Some(length) = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
        {
            if length > self.max_upload_bytes {
                return Err(HttpError(plain_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("upload limit is {} bytes", self.max_upload_bytes),
                )));
            }
        }
        let boundary = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| multer::parse_boundary(v).ok())
            .ok_or_else(|| bad_req("expected multipart/form-data"))?;

        let limited =
            http_body_util::Limited::new(req.into_body(), self.max_upload_bytes as usize);
        let frames = http_body_util::BodyStream::new(limited).filter_map(|result| async move {
            match result {
                Ok(frame) => frame.into_data().ok().map(Ok),
                Err(e) => Some(Err(e)),
            }
        });
        let mut multipart = multer::Multipart::new(frames, boundary);

        let mut timestamp: Option<Timestamp> = None;
        let mut duration: Option<f64> = None;
        let mut has_motion = false;
        let mut video: Option<Vec<u8>> = None;
        loop {
            let field = match multipart.next_field().await {
                Ok(Some(f)) => f,
                Ok(None) => break,
                Err(e) => return Err(bad_req(format!("bad multipart body: {e}"))),
            };
            let name = field.name().map(|n| n.to_owned());
            match name.as_deref() {
                Some("timestamp") => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| bad_req(format!("bad timestamp field: {e}")))?;
                    timestamp =
                        Some(text.trim().parse().map_err(|_| {
                            bad_req("timestamp must be RFC 3339")
                        })?);
                }
                Some("duration") => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| bad_req(format!("bad duration field: {e}")))?;
                    duration = Some(
                        text.trim()
                            .parse()
                            .map_err(|_| bad_req("duration must be seconds"))?,
                    );
                }
                Some("has_motion") => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| bad_req(format!("bad has_motion field: {e}")))?;
                    has_motion = matches!(text.trim(), "true" | "1" | "on");
                }
                Some("video") => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| bad_req(format!("bad video field: {e}")))?;
                    video = Some(bytes.to_vec());
                }
                _ => {
                    // Drain and ignore unrecognized fields.
                    let _ = field.bytes().await;
                }
            }
        }
        let create = CreateClipRequest {
            timestamp: timestamp.ok_or_else(|| bad_req("missing timestamp field"))?,
            duration_seconds: duration.ok_or_else(|| bad_req("missing duration field"))?,
            has_motion,
            video: video.ok_or_else(|| bad_req("missing video field"))?,
        };
        match self
            .clipmaker
            .create_clip(create, &client_id, &secret_hex)
            .await
        {
            Ok(new) => json_response(
                StatusCode::CREATED,
                &json::UploadResponse {
                    message: "clip stored",
                    clip_id: new.id,
                    title: new.title,
                },
            ),
            Err(e) => Err(capture_error(e)),
        }
    }

    async fn capture_settings<B>(&self, peer: SocketAddr, req: Request<B>) -> ResponseResult
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let peer_ip = self.effective_peer(Surface::Capture, peer, &req);
        let (client_id, _) = self.authenticate_capture(&req, peer_ip)?;
        let l = self.db.lock();
        let client = l
            .get_client(&client_id)
            .ok_or_else(unauthenticated)?;
        json_response(StatusCode::OK, &json::CaptureSettingsResponse::from(client))
    }

    // --- operator surface ------------------------------------------------

    async fn serve_operator<B>(&self, path: Path, req: Request<B>) -> ResponseResult
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        match path {
            Path::TopLevel => json_response(
                StatusCode::OK,
                &serde_json::json!({
                    "service": "cryospy",
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            ),
            Path::AuthSetup => {
                require_method(&req, Method::POST)?;
                self.auth_setup(req).await
            }
            Path::AuthLogin => {
                require_method(&req, Method::POST)?;
                self.auth_login(req).await
            }
            Path::AuthLogout => {
                require_method(&req, Method::POST)?;
                self.auth_logout(req).await
            }
            Path::AuthPassword => {
                require_method(&req, Method::POST)?;
                self.auth_password(req).await
            }
            Path::Clients => {
                if *req.method() == Method::GET {
                    self.clients_list(&req)
                } else if *req.method() == Method::POST {
                    self.client_create(req).await
                } else {
                    Err(HttpError(plain_response(
                        StatusCode::METHOD_NOT_ALLOWED,
                        "GET or POST expected",
                    )))
                }
            }
            Path::Client(id) => {
                if *req.method() == Method::GET {
                    self.client_get(&id, req)
                } else if *req.method() == Method::PUT {
                    self.client_update(id, req).await
                } else if *req.method() == Method::DELETE {
                    self.client_delete(&id, req)
                } else {
                    Err(HttpError(plain_response(
                        StatusCode::METHOD_NOT_ALLOWED,
                        "GET, PUT, or DELETE expected",
                    )))
                }
            }
            Path::ClientEnable(id) => {
                require_method(&req, Method::POST)?;
                self.client_set_enabled(&id, req, true)
            }
            Path::ClientDisable(id) => {
                require_method(&req, Method::POST)?;
                self.client_set_enabled(&id, req, false)
            }
            Path::Clips => {
                require_method(&req, Method::GET)?;
                self.clips_query(req)
            }
            Path::Clip(id) => {
                require_method(&req, Method::GET)?;
                self.clip_get(id, req)
            }
            Path::ClipThumbnail(id) => {
                require_method(&req, Method::GET)?;
                self.clip_thumbnail(id, req)
            }
            Path::ClipVideo(id) => {
                require_method(&req, Method::GET)?;
                self.clip_video(id, req)
            }
            Path::ClipsDelete => {
                require_method(&req, Method::POST)?;
                self.clips_delete(req).await
            }
            Path::CacheStats => {
                require_method(&req, Method::GET)?;
                self.cache_stats(&req)
            }
            Path::CacheClear => {
                require_method(&req, Method::POST)?;
                self.cache_clear(&req)
            }
            Path::StreamPlaylist(client_id) => {
                require_method(&req, Method::GET)?;
                self.stream_playlist(&client_id, req)
            }
            Path::StreamSegment(client_id, clip_id) => {
                require_method(&req, Method::GET)?;
                self.stream_segment(&client_id, clip_id, req).await
            }
            _ => Err(not_found("no such operator endpoint")),
        }
    }

    /// Authenticates an operator request by its session cookie, yielding the
    /// session's MEK capability.
    fn authenticate_operator<B>(&self, req: &Request<B>) -> Result<SessionMek, HttpError> {
        let sid = extract_sid(req).ok_or_else(|| {
            HttpError(plain_response(StatusCode::UNAUTHORIZED, "login required"))
        })?;
        Ok(SessionMek(self.sessions.mek(&sid)?))
    }

    async fn auth_setup<B>(&self, req: Request<B>) -> ResponseResult
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let r: json::SetupRequest = extract_json_body(req).await?;
        if r.password.is_empty() {
            return Err(bad_req("password must be non-empty"));
        }
        let now = self.db.clocks().now();
        self.db.lock().create_mek(now, &r.password)?;
        no_content()
    }

    async fn auth_login<B>(&self, req: Request<B>) -> ResponseResult
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let r: json::LoginRequest = extract_json_body(req).await?;
        let mek = {
            let l = self.db.lock();
            let rec = l.get_mek().map_err(|_| {
                HttpError(plain_response(
                    StatusCode::BAD_REQUEST,
                    "no master key; run setup first",
                ))
            })?;
            db::mek::decrypt_mek(rec, &r.password).map_err(|_| {
                HttpError(plain_response(StatusCode::UNAUTHORIZED, "bad password"))
            })?
        };
        let sid = self.sessions.create(mek, self.db.clocks().now());
        info!("operator logged in");
        let cookie = format!("s={sid}; HttpOnly; SameSite=Lax; Path=/");
        let mut resp = plain_response(StatusCode::NO_CONTENT, "");
        resp.headers_mut().insert(
            header::SET_COOKIE,
            HeaderValue::try_from(cookie).expect("cookie can't have invalid bytes"),
        );
        Ok(resp)
    }

    async fn auth_logout<B>(&self, req: Request<B>) -> ResponseResult
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        if let Some(sid) = extract_sid(&req) {
            self.sessions.revoke(&sid);
            info!("operator logged out");
        }
        let mut resp = plain_response(StatusCode::NO_CONTENT, "");
        resp.headers_mut().insert(
            header::SET_COOKIE,
            HeaderValue::from_static("s=; Max-Age=0; Path=/"),
        );
        Ok(resp)
    }

    async fn auth_password<B>(&self, req: Request<B>) -> ResponseResult
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        self.authenticate_operator(&req)?;
        let r: json::ChangePasswordRequest = extract_json_body(req).await?;
        if r.new_password.is_empty() {
            return Err(bad_req("new password must be non-empty"));
        }
        let now = self.db.clocks().now();
        self.db
            .lock()
            .change_mek_password(now, &r.old_password, &r.new_password)
            .map_err(|e| match e.kind() {
                ErrorKind::PermissionDenied => {
                    HttpError(plain_response(StatusCode::UNAUTHORIZED, "bad password"))
                }
                _ => HttpError::from(e),
            })?;
        no_content()
    }

    fn clients_list<B>(&self, req: &Request<B>) -> ResponseResult {
        self.authenticate_operator(req)?;
        let l = self.db.lock();
        let clients: Vec<json::ClientView> =
            l.clients_by_id().values().map(json::ClientView::from).collect();
        json_response(StatusCode::OK, &clients)
    }

    async fn client_create<B>(&self, req: Request<B>) -> ResponseResult
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let mek = self.authenticate_operator(&req)?;
        let r: json::ClientCreateRequest = extract_json_body(req).await?;
        let now = self.db.clocks().now();
        let (client, secret) = self.db.lock().create_client(
            now,
            &r.id,
            db::clients::ClientChange::new(r.settings),
            &mek.mek()?,
        )?;
        json_response(
            StatusCode::CREATED,
            &json::ClientCreateResponse {
                id: client.id,
                secret,
            },
        )
    }

    fn client_get<B>(&self, id: &str, req: Request<B>) -> ResponseResult {
        self.authenticate_operator(&req)?;
        let l = self.db.lock();
        let client = l
            .get_client(id)
            .ok_or_else(|| not_found(format!("no client {id:?}")))?;
        json_response(StatusCode::OK, &json::ClientView::from(client))
    }

    async fn client_update<B>(&self, id: String, req: Request<B>) -> ResponseResult
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        self.authenticate_operator(&req)?;
        let r: json::ClientUpdateRequest = extract_json_body(req).await?;
        let now = self.db.clocks().now();
        self.db.lock().update_client_settings(now, &id, r.settings)?;
        no_content()
    }

    fn client_delete<B>(&self, id: &str, req: Request<B>) -> ResponseResult {
        self.authenticate_operator(&req)?;
        self.db.lock().delete_client(id)?;
        no_content()
    }

    fn client_set_enabled<B>(&self, id: &str, req: Request<B>, enabled: bool) -> ResponseResult {
        self.authenticate_operator(&req)?;
        let now = self.db.clocks().now();
        self.db.lock().set_client_enabled(now, id, enabled)?;
        no_content()
    }

    fn clips_query<B>(&self, req: Request<B>) -> ResponseResult {
        self.authenticate_operator(&req)?;
        let q = parse_clip_query(req.uri().query().unwrap_or(""))?;
        let page = self.reader.query_clip_infos(&q)?;
        json_response(
            StatusCode::OK,
            &json::ClipListResponse {
                clips: page.rows.iter().map(json::ClipView::from).collect(),
                total_count: page.total_count,
            },
        )
    }

    fn clip_get<B>(&self, id: Uuid, req: Request<B>) -> ResponseResult {
        self.authenticate_operator(&req)?;
        let info = self
            .reader
            .get_clip_info(id)?
            .ok_or_else(|| not_found(format!("no clip {id}")))?;
        json_response(StatusCode::OK, &json::ClipView::from(&info))
    }

    fn clip_thumbnail<B>(&self, id: Uuid, req: Request<B>) -> ResponseResult {
        let mek = self.authenticate_operator(&req)?;
        let thumbnail = self
            .reader
            .get_clip_thumbnail(id, &mek)?
            .ok_or_else(|| not_found(format!("no thumbnail for clip {id}")))?;
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::try_from(thumbnail.mime).expect("stored mime is a valid header"),
            )
            .body(thumbnail.data.into())
            .expect("hardcoded head should be valid"))
    }

    fn clip_video<B>(&self, id: Uuid, req: Request<B>) -> ResponseResult {
        let mek = self.authenticate_operator(&req)?;
        let clip = self.reader.get_clip(id, &mek)?;
        let disposition = format!("attachment; filename=\"{}\"", clip.title);
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::try_from(clip.video.mime).expect("stored mime is a valid header"),
            )
            .header(
                header::CONTENT_DISPOSITION,
                HeaderValue::try_from(disposition).expect("title has no control characters"),
            )
            .body(clip.video.data.into())
            .expect("hardcoded head should be valid"))
    }

    async fn clips_delete<B>(&self, req: Request<B>) -> ResponseResult
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        self.authenticate_operator(&req)?;
        let r: json::BulkDeleteRequest = extract_json_body(req).await?;
        let mut l = self.db.lock();
        for id in &r.ids {
            l.delete_clip(*id)?;
            if let Some(ref cache) = self.cache {
                cache.delete(*id);
            }
        }
        no_content()
    }

    fn cache_stats<B>(&self, req: &Request<B>) -> ResponseResult {
        self.authenticate_operator(req)?;
        let stats = match self.cache {
            Some(ref cache) => cache.stats(),
            None => Default::default(),
        };
        json_response(StatusCode::OK, &json::CacheStatsView::from(stats))
    }

    fn cache_clear<B>(&self, req: &Request<B>) -> ResponseResult {
        self.authenticate_operator(req)?;
        if let Some(ref cache) = self.cache {
            cache.clear();
        }
        no_content()
    }

    fn stream_playlist<B>(&self, client_id: &str, req: Request<B>) -> ResponseResult {
        self.authenticate_operator(&req)?;
        if self.db.lock().get_client(client_id).is_none() {
            return Err(not_found(format!("no client {client_id:?}")));
        }
        let now = self.db.clocks().now();
        let mut start_time = now;
        let mut reference_time = now;
        for (k, v) in form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes()) {
            match k.as_ref() {
                "startTime" => {
                    start_time = v.parse().map_err(|_| bad_req("unparseable startTime"))?
                }
                "refTime" => {
                    reference_time = v.parse().map_err(|_| bad_req("unparseable refTime"))?
                }
                _ => return Err(bad_req(format!("unknown query parameter {k}"))),
            }
        }
        let m3u8 = self
            .playlists
            .playlist(client_id, start_time, reference_time)?;
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/vnd.apple.mpegurl"),
            )
            .body(m3u8.into())
            .expect("hardcoded head should be valid"))
    }

    async fn stream_segment<B>(
        &self,
        client_id: &str,
        clip_id: Uuid,
        req: Request<B>,
    ) -> ResponseResult {
        let mek = self.authenticate_operator(&req)?;
        let clip = self.reader.get_clip(clip_id, &mek)?;
        if clip.client_id != client_id {
            return Err(not_found(format!("no clip {clip_id} for {client_id:?}")));
        }
        let segment = self.normalizer.segment(clip_id, &clip.video.data).await?;
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("video/mp2t"),
            )
            .body(segment.into())
            .expect("hardcoded head should be valid"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::{MediaProbe, Thumbnail, ThumbnailGenerator, VideoMetadata};
    use crate::normalize::NormalizeSettings;
    use async_trait::async_trait;
    use base::clock::SimulatedClocks;
    use base64::prelude::{Engine as _, BASE64_STANDARD};
    use db::authfail::FailureTrackerConfig;
    use db::storage::{NopNotifier, StorageManager};
    use db::testutil::{TestDb, TEST_CLIENT_ID, TEST_PASSWORD};
    use std::time::Duration;

    struct FakeProbe;

    #[async_trait]
    impl MediaProbe for FakeProbe {
        async fn probe(&self, _video: &[u8]) -> Result<VideoMetadata, Error> {
            Ok(VideoMetadata {
                width: 1280,
                height: 720,
                mime: "video/mp4".to_owned(),
                extension: "mp4".to_owned(),
            })
        }
    }

    struct FakeThumbnailer;

    #[async_trait]
    impl ThumbnailGenerator for FakeThumbnailer {
        async fn thumbnail(
            &self,
            _video: &[u8],
            _meta: &VideoMetadata,
        ) -> Result<Thumbnail, Error> {
            Ok(Thumbnail {
                data: b"jpeg".to_vec(),
                width: 320,
                height: 180,
                mime: "image/jpeg".to_owned(),
            })
        }
    }

    struct FakeTranscoder;

    #[async_trait]
    impl crate::ffmpeg::Transcoder for FakeTranscoder {
        async fn transcode(
            &self,
            input: &std::path::Path,
            output: &std::path::Path,
            _params: &crate::ffmpeg::TranscodeParams,
        ) -> Result<(), Error> {
            let mut data = b"ts:".to_vec();
            data.extend_from_slice(&tokio::fs::read(input).await.unwrap());
            tokio::fs::write(output, data).await.unwrap();
            Ok(())
        }
    }

    struct NopAuthNotifier;

    impl AuthNotifier for NopAuthNotifier {
        fn should_notify(&self, _count: usize) -> bool {
            false
        }
        fn notify_auth_failures(&self, _client_id: &str, _count: usize) {}
    }

    fn service(tdb: &TestDb) -> Arc<Service<SimulatedClocks>> {
        let storage = Arc::new(StorageManager::new(
            tdb.db.clone(),
            Arc::new(NopNotifier),
            Arc::new(NopNotifier),
        ));
        let cache = Arc::new(SegmentCache::new(1 << 20));
        Arc::new(Service::new(
            tdb.db.clone(),
            ClipMaker::new(
                tdb.db.clone(),
                storage,
                Arc::new(FakeProbe),
                Arc::new(FakeThumbnailer),
            ),
            ClipReader::new(tdb.db.clone()),
            Arc::new(Normalizer::new(
                Arc::new(FakeTranscoder),
                Some(cache.clone()),
                NormalizeSettings::default(),
                2,
            )),
            PlaylistGenerator::new(tdb.db.clone(), 5, true),
            FailureTracker::new(FailureTrackerConfig {
                auto_disable_threshold: 3,
                window: Duration::from_secs(3600),
            }),
            Arc::new(NopAuthNotifier),
            Some(cache),
            100 << 20,
            TrustedProxies::default(),
        ))
    }

    fn peer() -> SocketAddr {
        "192.0.2.9:4000".parse().unwrap()
    }

    fn basic(id: &str, secret: &str) -> String {
        format!("Basic {}", BASE64_STANDARD.encode(format!("{id}:{secret}")))
    }

    fn multipart_upload(secret: &str, timestamp: &str, motion: bool) -> Request<Body> {
        let boundary = "cryospy-test-boundary";
        let mut body = String::new();
        for (name, value) in [
            ("timestamp", timestamp),
            ("duration", "30.0"),
            ("has_motion", if motion { "true" } else { "false" }),
        ] {
            body.push_str(&format!(
                "--{boundary}\r\ncontent-disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        body.push_str(&format!(
            "--{boundary}\r\ncontent-disposition: form-data; name=\"video\"; \
             filename=\"clip.mp4\"\r\ncontent-type: video/mp4\r\n\r\nraw-video-bytes\r\n"
        ));
        body.push_str(&format!("--{boundary}--\r\n"));
        Request::builder()
            .method(Method::POST)
            .uri("/api/clips")
            .header(header::AUTHORIZATION, basic(TEST_CLIENT_ID, secret))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn login(svc: &Arc<Service<SimulatedClocks>>) -> String {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/auth/login")
            .body(Body::from(format!("{{\"password\":\"{TEST_PASSWORD}\"}}")))
            .unwrap();
        let resp = svc
            .clone()
            .serve(Surface::Operator, peer(), req)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap();
        cookie.split(';').next().unwrap().to_owned()
    }

    fn operator_get(uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(header::COOKIE, cookie)
            .body(Body::default())
            .unwrap()
    }

    async fn body_bytes(resp: Response<Body>) -> Vec<u8> {
        resp.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    #[tokio::test]
    async fn upload_then_browse_and_stream() {
        let tdb = TestDb::new();
        let svc = service(&tdb);

        // Capture: upload one clip with motion.
        let req = multipart_upload(&tdb.client_secret_hex, "2021-01-01T01:00:00Z", true);
        let resp = svc
            .clone()
            .serve(Surface::Capture, peer(), req)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let upload: serde_json::Value =
            serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(upload["title"], "2021-01-01T01-00-00_30s_motion.mp4");
        let clip_id = upload["clip_id"].as_str().unwrap().to_owned();

        // Operator: list clips.
        let cookie = login(&svc).await;
        let resp = svc
            .clone()
            .serve(Surface::Operator, peer(), operator_get("/api/clips", &cookie))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let list: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(list["total_count"], 1);
        assert_eq!(list["clips"][0]["id"].as_str().unwrap(), clip_id);

        // Operator: download decrypted video bytes.
        let resp = svc
            .clone()
            .serve(
                Surface::Operator,
                peer(),
                operator_get(&format!("/api/clips/{clip_id}/video"), &cookie),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp).await, b"raw-video-bytes");

        // Operator: thumbnail decrypts too.
        let resp = svc
            .clone()
            .serve(
                Surface::Operator,
                peer(),
                operator_get(&format!("/api/clips/{clip_id}/thumbnail"), &cookie),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp).await, b"jpeg");

        // Operator: playlist covers the clip and the segment transcodes.
        let resp = svc
            .clone()
            .serve(
                Surface::Operator,
                peer(),
                operator_get(
                    &format!(
                        "/stream/{TEST_CLIENT_ID}/playlist.m3u8?startTime=1970-01-01T00:00:00Z&refTime=2021-01-01T01:00:00Z"
                    ),
                    &cookie,
                ),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let m3u8 = String::from_utf8(body_bytes(resp).await).unwrap();
        assert!(m3u8.contains(&format!("/stream/{TEST_CLIENT_ID}/segments/{clip_id}")));

        let resp = svc
            .clone()
            .serve(
                Surface::Operator,
                peer(),
                operator_get(
                    &format!("/stream/{TEST_CLIENT_ID}/segments/{clip_id}"),
                    &cookie,
                ),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            HeaderValue::from_static("video/mp2t")
        );
        assert_eq!(body_bytes(resp).await, b"ts:raw-video-bytes");

        // The segment was cached on the way out.
        let resp = svc
            .clone()
            .serve(
                Surface::Operator,
                peer(),
                operator_get("/api/cache/stats", &cookie),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let stats: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(stats["entries"], 1);
        assert_eq!(stats["misses"], 1);
    }

    #[tokio::test]
    async fn repeated_failures_auto_disable() {
        let tdb = TestDb::new();
        let svc = service(&tdb);
        let wrong = base::strutil::hex(&[0x55; 32]);

        for i in 0..4 {
            let req = multipart_upload(&wrong, "2021-01-01T01:00:00Z", false);
            let resp = svc
                .clone()
                .serve(Surface::Capture, peer(), req)
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "attempt {i}");
        }
        assert!(tdb.db.lock().get_client(TEST_CLIENT_ID).unwrap().disabled);

        // Even the correct secret is rejected while disabled.
        let req = multipart_upload(&tdb.client_secret_hex, "2021-01-01T01:00:00Z", false);
        let resp = svc
            .clone()
            .serve(Surface::Capture, peer(), req)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_client_is_not_tracked() {
        let tdb = TestDb::new();
        let svc = service(&tdb);
        for _ in 0..10 {
            let req = Request::builder()
                .method(Method::GET)
                .uri("/api/client/settings")
                .header(header::AUTHORIZATION, basic("ghost", &tdb.client_secret_hex))
                .body(Body::default())
                .unwrap();
            let resp = svc
                .clone()
                .serve(Surface::Capture, peer(), req)
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
        // The real client is untouched by the scan.
        assert!(!tdb.db.lock().get_client(TEST_CLIENT_ID).unwrap().disabled);
        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/client/settings")
            .header(
                header::AUTHORIZATION,
                basic(TEST_CLIENT_ID, &tdb.client_secret_hex),
            )
            .body(Body::default())
            .unwrap();
        let resp = svc
            .clone()
            .serve(Surface::Capture, peer(), req)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let settings: serde_json::Value =
            serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(settings["id"], TEST_CLIENT_ID);
        assert_eq!(settings["clip_duration_seconds"], 60);
    }

    #[tokio::test]
    async fn operator_endpoints_require_session() {
        let tdb = TestDb::new();
        let svc = service(&tdb);
        let stream_uri = format!("/stream/{TEST_CLIENT_ID}/playlist.m3u8");
        for uri in ["/api/clips", "/api/clients", stream_uri.as_str()] {
            let req = Request::builder()
                .method(Method::GET)
                .uri(uri)
                .body(Body::default())
                .unwrap();
            let resp = svc
                .clone()
                .serve(Surface::Operator, peer(), req)
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn client_lifecycle_over_http() {
        let tdb = TestDb::new();
        let svc = service(&tdb);
        let cookie = login(&svc).await;

        // Create a second client; the secret comes back exactly once.
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/clients")
            .header(header::COOKIE, &cookie)
            .body(Body::from(
                r#"{"id": "cam2", "settings": {"storage_limit_megabytes": 10}}"#,
            ))
            .unwrap();
        let resp = svc
            .clone()
            .serve(Surface::Operator, peer(), req)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: serde_json::Value =
            serde_json::from_slice(&body_bytes(resp).await).unwrap();
        let secret = created["secret"].as_str().unwrap();

        // The new secret authenticates on the capture surface.
        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/client/settings")
            .header(header::AUTHORIZATION, basic("cam2", secret))
            .body(Body::default())
            .unwrap();
        let resp = svc
            .clone()
            .serve(Surface::Capture, peer(), req)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // Disable, then delete.
        for (uri, method) in [
            ("/api/clients/cam2/disable", Method::POST),
            ("/api/clients/cam2", Method::DELETE),
        ] {
            let req = Request::builder()
                .method(method)
                .uri(uri)
                .header(header::COOKIE, &cookie)
                .body(Body::default())
                .unwrap();
            let resp = svc
                .clone()
                .serve(Surface::Operator, peer(), req)
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        }
        assert!(tdb.db.lock().get_client("cam2").is_none());
    }

    #[tokio::test]
    async fn logout_revokes_the_session() {
        let tdb = TestDb::new();
        let svc = service(&tdb);
        let cookie = login(&svc).await;
        let req = Request::builder()
            .method(Method::POST)
            .uri("/auth/logout")
            .header(header::COOKIE, &cookie)
            .body(Body::default())
            .unwrap();
        let resp = svc
            .clone()
            .serve(Surface::Operator, peer(), req)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = svc
            .clone()
            .serve(Surface::Operator, peer(), operator_get("/api/clips", &cookie))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn helper_parsing() {
        let req = Request::builder()
            .header(header::AUTHORIZATION, basic("cam1", "deadbeef"))
            .body(())
            .unwrap();
        assert_eq!(
            basic_auth(&req),
            Some(("cam1".to_owned(), "deadbeef".to_owned()))
        );

        let req = Request::builder()
            .header(header::COOKIE, "theme=dark; s=abc123; other=1")
            .body(())
            .unwrap();
        assert_eq!(extract_sid(&req), Some("abc123".to_owned()));

        let q = parse_clip_query(
            "client_id=cam1&start_time=2021-01-01T00:00:00Z&has_motion=true&page=2&page_size=10",
        )
        .unwrap();
        assert_eq!(q.client_id.as_deref(), Some("cam1"));
        assert_eq!(q.has_motion, Some(true));
        assert_eq!(q.page, Some(2));
        assert_eq!(q.page_size, Some(10));
        assert!(parse_clip_query("nope=1").is_err());
    }
}
