//! Closed error taxonomy shared by every layer of the acquisition runtime.
//!
//! The enum and its integer codes are frozen: new kinds may be appended, but
//! an existing kind's `code()` never changes once published.

use thiserror::Error;

/// The closed set of error kinds the runtime can return.
///
/// Every variant has a stable integer `code()` and a stable short `name()`,
/// independent of the `Display` text `thiserror` generates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// No error; present for parity with callers that round-trip a code.
    #[error("success")]
    Ok,
    /// Unspecified failure.
    #[error("generic error")]
    Generic,
    /// Allocation failure.
    #[error("allocation failure")]
    Alloc,
    /// Invalid argument.
    #[error("invalid argument")]
    Arg,
    /// Programming error in a caller.
    #[error("internal error (bug)")]
    Bug,
    /// Requested samplerate is not achievable.
    #[error("invalid samplerate")]
    Samplerate,
    /// Operation is not applicable to this device/key/driver.
    #[error("not applicable")]
    NotApplicable,
    /// Device instance is not open.
    #[error("device instance was closed")]
    DeviceClosed,
    /// Operation timed out.
    #[error("timeout")]
    Timeout,
    /// Operation required a channel group but none was supplied.
    #[error("channel group required")]
    ChannelGroupRequired,
    /// Data received did not parse as expected.
    #[error("bad data")]
    BadData,
    /// Transport-level I/O failure.
    #[error("I/O error")]
    Io,
}

impl ErrorKind {
    /// Stable integer code. Frozen per kind; never renumbered.
    pub const fn code(&self) -> i32 {
        match self {
            ErrorKind::Ok => 0,
            ErrorKind::Generic => -1,
            ErrorKind::Alloc => -2,
            ErrorKind::Arg => -3,
            ErrorKind::Bug => -4,
            ErrorKind::Samplerate => -5,
            ErrorKind::NotApplicable => -6,
            ErrorKind::DeviceClosed => -7,
            ErrorKind::Timeout => -8,
            ErrorKind::ChannelGroupRequired => -9,
            ErrorKind::BadData => -10,
            ErrorKind::Io => -11,
        }
    }

    /// Stable short name, e.g. `"arg"`.
    pub const fn name(&self) -> &'static str {
        match self {
            ErrorKind::Ok => "ok",
            ErrorKind::Generic => "generic",
            ErrorKind::Alloc => "alloc",
            ErrorKind::Arg => "arg",
            ErrorKind::Bug => "bug",
            ErrorKind::Samplerate => "samplerate",
            ErrorKind::NotApplicable => "not_applicable",
            ErrorKind::DeviceClosed => "device_closed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ChannelGroupRequired => "channel_group_required",
            ErrorKind::BadData => "bad_data",
            ErrorKind::Io => "io",
        }
    }
}

/// The runtime's error type: a kind plus optional transport-level context.
#[derive(Debug, Error)]
pub enum Error {
    /// A kind from the closed taxonomy, with a human-readable message.
    #[error("{kind}: {message}")]
    Kind {
        /// The closed error kind.
        kind: ErrorKind,
        /// Context message for logs/diagnostics.
        message: String,
    },
    /// A serial transport error.
    #[error("serial transport error: {0}")]
    Serial(#[from] serialport::Error),
    /// A USB transport error.
    #[error("usb transport error: {0}")]
    Usb(#[from] rusb::Error),
    /// A raw I/O error (raw TCP, file-backed transports).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Construct an error carrying only a kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error::Kind {
            kind,
            message: message.into(),
        }
    }

    /// The closed kind this error maps to. Transport errors map to `Io`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Kind { kind, .. } => kind.clone(),
            Error::Serial(_) | Error::Usb(_) | Error::Io(_) => ErrorKind::Io,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Shorthand for constructing an `Err(Error::new(kind, ...))`.
#[macro_export]
macro_rules! bail {
    ($kind:expr, $($arg:tt)*) => {
        return Err($crate::error::Error::new($kind, format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorKind::Ok.code(), 0);
        assert_eq!(ErrorKind::Arg.code(), -3);
        assert_eq!(ErrorKind::Io.code(), -11);
    }

    #[test]
    fn names_are_snake_case() {
        assert_eq!(ErrorKind::NotApplicable.name(), "not_applicable");
        assert_eq!(ErrorKind::ChannelGroupRequired.name(), "channel_group_required");
    }

    #[test]
    fn error_kind_roundtrips_through_new() {
        let e = Error::new(ErrorKind::BadData, "short read");
        assert_eq!(e.kind(), ErrorKind::BadData);
    }
}
