// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Decodes request paths.

use std::str::FromStr;
use uuid::Uuid;

/// A decoded request path.
#[derive(Debug, Eq, PartialEq)]
pub(super) enum Path {
    TopLevel,                   // "/api/"
    Clips,                      // "/api/clips" (capture POST; operator GET)
    ClipsDelete,                // "/api/clips/delete"
    Clip(Uuid),                 // "/api/clips/<uuid>"
    ClipThumbnail(Uuid),        // "/api/clips/<uuid>/thumbnail"
    ClipVideo(Uuid),            // "/api/clips/<uuid>/video"
    CaptureSettings,            // "/api/client/settings"
    Clients,                    // "/api/clients"
    Client(String),             // "/api/clients/<id>"
    ClientEnable(String),       // "/api/clients/<id>/enable"
    ClientDisable(String),      // "/api/clients/<id>/disable"
    AuthSetup,                  // "/auth/setup"
    AuthLogin,                  // "/auth/login"
    AuthLogout,                 // "/auth/logout"
    AuthPassword,               // "/auth/password"
    CacheStats,                 // "/api/cache/stats"
    CacheClear,                 // "/api/cache/clear"
    StreamPlaylist(String),     // "/stream/<client>/playlist.m3u8"
    StreamSegment(String, Uuid), // "/stream/<client>/segments/<uuid>"
    NotFound,
}

impl Path {
    /// Decodes a request path, notably not including any request parameters.
    pub(super) fn decode(path: &str) -> Self {
        if let Some(rest) = path.strip_prefix("/auth/") {
            return match rest {
                "setup" => Path::AuthSetup,
                "login" => Path::AuthLogin,
                "logout" => Path::AuthLogout,
                "password" => Path::AuthPassword,
                _ => Path::NotFound,
            };
        }
        if let Some(rest) = path.strip_prefix("/stream/") {
            let Some((client, rest)) = rest.split_once('/') else {
                return Path::NotFound;
            };
            if client.is_empty() {
                return Path::NotFound;
            }
            if rest == "playlist.m3u8" {
                return Path::StreamPlaylist(client.to_owned());
            }
            if let Some(id) = rest.strip_prefix("segments/") {
                if let Ok(id) = Uuid::from_str(id) {
                    return Path::StreamSegment(client.to_owned(), id);
                }
            }
            return Path::NotFound;
        }
        let Some(path) = path.strip_prefix("/api/") else {
            return Path::NotFound;
        };
        match path {
            "" => return Path::TopLevel,
            "clips" => return Path::Clips,
            "clips/delete" => return Path::ClipsDelete,
            "client/settings" => return Path::CaptureSettings,
            "clients" => return Path::Clients,
            "cache/stats" => return Path::CacheStats,
            "cache/clear" => return Path::CacheClear,
            _ => {}
        }
        if let Some(rest) = path.strip_prefix("clips/") {
            let (id, tail) = match rest.split_once('/') {
                Some((id, tail)) => (id, Some(tail)),
                None => (rest, None),
            };
            let Ok(id) = Uuid::from_str(id) else {
                return Path::NotFound;
            };
            return match tail {
                None => Path::Clip(id),
                Some("thumbnail") => Path::ClipThumbnail(id),
                Some("video") => Path::ClipVideo(id),
                Some(_) => Path::NotFound,
            };
        }
        if let Some(rest) = path.strip_prefix("clients/") {
            let (id, tail) = match rest.split_once('/') {
                Some((id, tail)) => (id, Some(tail)),
                None => (rest, None),
            };
            if id.is_empty() {
                return Path::NotFound;
            }
            return match tail {
                None => Path::Client(id.to_owned()),
                Some("enable") => Path::ClientEnable(id.to_owned()),
                Some("disable") => Path::ClientDisable(id.to_owned()),
                Some(_) => Path::NotFound,
            };
        }
        Path::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths() {
        let uuid = Uuid::parse_str("35144640-ff1e-4619-b0d5-4c74c185741c").unwrap();
        assert_eq!(Path::decode("/api/"), Path::TopLevel);
        assert_eq!(Path::decode("/api/clips"), Path::Clips);
        assert_eq!(Path::decode("/api/clips/delete"), Path::ClipsDelete);
        assert_eq!(
            Path::decode("/api/clips/35144640-ff1e-4619-b0d5-4c74c185741c"),
            Path::Clip(uuid)
        );
        assert_eq!(
            Path::decode("/api/clips/35144640-ff1e-4619-b0d5-4c74c185741c/thumbnail"),
            Path::ClipThumbnail(uuid)
        );
        assert_eq!(
            Path::decode("/api/clips/35144640-ff1e-4619-b0d5-4c74c185741c/video"),
            Path::ClipVideo(uuid)
        );
        assert_eq!(Path::decode("/api/clips/x"), Path::NotFound);
        assert_eq!(
            Path::decode("/api/clips/35144640-ff1e-4619-b0d5-4c74c185741c/x"),
            Path::NotFound
        );
        assert_eq!(Path::decode("/api/client/settings"), Path::CaptureSettings);
        assert_eq!(Path::decode("/api/clients"), Path::Clients);
        assert_eq!(
            Path::decode("/api/clients/cam1"),
            Path::Client("cam1".to_owned())
        );
        assert_eq!(
            Path::decode("/api/clients/cam1/enable"),
            Path::ClientEnable("cam1".to_owned())
        );
        assert_eq!(
            Path::decode("/api/clients/cam1/disable"),
            Path::ClientDisable("cam1".to_owned())
        );
        assert_eq!(Path::decode("/api/clients/"), Path::NotFound);
        assert_eq!(Path::decode("/api/cache/stats"), Path::CacheStats);
        assert_eq!(Path::decode("/api/cache/clear"), Path::CacheClear);
        assert_eq!(Path::decode("/auth/login"), Path::AuthLogin);
        assert_eq!(Path::decode("/auth/setup"), Path::AuthSetup);
        assert_eq!(Path::decode("/auth/logout"), Path::AuthLogout);
        assert_eq!(Path::decode("/auth/password"), Path::AuthPassword);
        assert_eq!(Path::decode("/auth/x"), Path::NotFound);
        assert_eq!(
            Path::decode("/stream/cam1/playlist.m3u8"),
            Path::StreamPlaylist("cam1".to_owned())
        );
        assert_eq!(
            Path::decode("/stream/cam1/segments/35144640-ff1e-4619-b0d5-4c74c185741c"),
            Path::StreamSegment("cam1".to_owned(), uuid)
        );
        assert_eq!(Path::decode("/stream/cam1/segments/nope"), Path::NotFound);
        assert_eq!(Path::decode("/stream//playlist.m3u8"), Path::NotFound);
        assert_eq!(Path::decode("/"), Path::NotFound);
        assert_eq!(Path::decode("/favicon.ico"), Path::NotFound);
    }
}
