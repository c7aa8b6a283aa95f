// This file is part of CryoSpy, a self-hosted video surveillance recorder.
// Copyright (C) 2026 The CryoSpy Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Error handling: the [`Error`] type used throughout CryoSpy and macros for
//! constructing it tersely.

use std::error::Error as StdError;
use std::fmt;

/// Error kind.
///
/// These codes are taken from
/// [grpc::StatusCode](https://github.com/grpc/grpc/blob/master/include/grpcpp/impl/codegen/status_code_enum.h),
/// which is a nice general-purpose classification of errors. See that link for
/// descriptions of each error.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[non_exhaustive]
#[rustfmt::skip]
pub enum ErrorKind {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        use ErrorKind::*;
        match self {
            Cancelled => "cancelled",
            Unknown => "unknown",
            InvalidArgument => "invalid argument",
            DeadlineExceeded => "deadline exceeded",
            NotFound => "not found",
            AlreadyExists => "already exists",
            PermissionDenied => "permission denied",
            Unauthenticated => "unauthenticated",
            ResourceExhausted => "resource exhausted",
            FailedPrecondition => "failed precondition",
            Aborted => "aborted",
            OutOfRange => "out of range",
            Unimplemented => "unimplemented",
            Internal => "internal",
            Unavailable => "unavailable",
            DataLoss => "data loss",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Inner {
    kind: ErrorKind,
    msg: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

/// The error type for everything in CryoSpy that can fail.
///
/// Boxed so that `Result<T, Error>` is cheap to return; construct via the
/// [`err!`](crate::err) and [`bail!`](crate::bail) macros.
pub struct Error(Box<Inner>);

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error(Box::new(Inner {
            kind,
            msg: None,
            source: None,
        }))
    }

    /// Wraps another error, annotating it with the given kind.
    pub fn wrap<E: Into<Box<dyn StdError + Send + Sync>>>(kind: ErrorKind, source: E) -> Self {
        Error(Box::new(Inner {
            kind,
            msg: None,
            source: Some(source.into()),
        }))
    }

    #[doc(hidden)]
    pub fn with_msg(mut self, msg: String) -> Self {
        self.0.msg = Some(msg);
        self
    }

    #[doc(hidden)]
    pub fn with_source<E: Into<Box<dyn StdError + Send + Sync>>>(mut self, source: E) -> Self {
        self.0.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.0.kind
    }

    pub fn msg(&self) -> Option<&str> {
        self.0.msg.as_deref()
    }

    /// Returns a `Display` adapter which writes the full source chain,
    /// suitable for logging: `error!(err = %e.chain(), "...")`.
    pub fn chain(&self) -> ErrorChain<'_> {
        ErrorChain(self)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0.msg {
            Some(ref msg) => write!(f, "{}: {}", self.0.kind, msg),
            None => fmt::Display::fmt(&self.0.kind, f),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error({})", self.chain())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0
            .source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn StdError + 'static))
    }
}

/// `Display` adapter writing an [`Error`] and all its causes.
pub struct ErrorChain<'a>(&'a Error);

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self.0, f)?;
        let mut cur: Option<&(dyn StdError + 'static)> = self.0.source();
        while let Some(e) = cur {
            write!(f, ": {e}")?;
            cur = e.source();
        }
        Ok(())
    }
}

/// Extension methods for `Result`.
pub trait ResultExt<T> {
    /// Annotates an error with the given kind.
    fn err_kind(self, k: ErrorKind) -> Result<T, Error>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    fn err_kind(self, k: ErrorKind) -> Result<T, Error> {
        self.map_err(|e| Error::wrap(k, e))
    }
}

/// Constructs an [`Error`], tersely.
///
/// The first argument is an [`ErrorKind`] variant name; it may be followed by
/// `msg(...)` (`format!` arguments) and/or `source(...)` (any boxable error),
/// in that order.
///
/// Example:
/// ```
/// use cryospy_base::err;
/// let e = err!(InvalidArgument, msg("bad argument {}", 42));
/// assert_eq!(e.kind(), cryospy_base::ErrorKind::InvalidArgument);
/// assert_eq!(e.to_string(), "invalid argument: bad argument 42");
/// ```
#[macro_export]
macro_rules! err {
    ($kind:ident) => {
        $crate::Error::new($crate::ErrorKind::$kind)
    };
    ($kind:ident, msg($($msg:tt)+)) => {
        $crate::Error::new($crate::ErrorKind::$kind).with_msg(format!($($msg)+))
    };
    ($kind:ident, source($source:expr)) => {
        $crate::Error::new($crate::ErrorKind::$kind).with_source($source)
    };
    ($kind:ident, msg($($msg:tt)+), source($source:expr)) => {
        $crate::Error::new($crate::ErrorKind::$kind)
            .with_msg(format!($($msg)+))
            .with_source($source)
    };
}

/// Like [`err!`], but returns from the enclosing function.
#[macro_export]
macro_rules! bail {
    ($($t:tt)*) => {
        return Err($crate::err!($($t)*).into())
    };
}
