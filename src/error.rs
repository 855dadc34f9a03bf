//! Unified status taxonomy (spec §7) and the internal error type components
//! operate in before it is translated at the façade boundary.

use thiserror::Error;

/// Internal error type. Every component (C1–C8) returns `RsmiResult`;
/// the façade (C9) is the only place this gets narrowed to [`RsmiStatus`].
#[derive(Error, Debug)]
pub enum RsmiError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid arguments")]
    InvalidArgs,

    #[error("attribute not supported on this device")]
    NotSupported,

    #[error("permission denied, try elevated privileges")]
    Permission,

    #[error("resource busy")]
    Busy,

    #[error("out of resources")]
    OutOfResources,

    #[error("internal exception: {0}")]
    Internal(String),

    #[error("input out of bounds")]
    InputOutOfBounds,

    #[error("library not initialized or refcount misuse")]
    InitError,

    #[error("not yet implemented")]
    NotYetImplemented,

    #[error("not found")]
    NotFound,

    #[error("buffer too small, need {needed} bytes")]
    InsufficientSize { needed: usize },

    #[error("operation interrupted")]
    Interrupt,

    #[error("unexpected data size")]
    UnexpectedSize,

    #[error("no data available")]
    NoData,

    #[error("unexpected or malformed data")]
    UnexpectedData,

    #[error("refcount overflow")]
    RefcountOverflow,

    #[error("setting unavailable")]
    SettingUnavailable,
}

pub type RsmiResult<T> = Result<T, RsmiError>;

impl RsmiError {
    /// Maps a raw `io::Error` encountered while touching a sysfs/kernel file
    /// to the taxonomy per spec §4.2 / §7. Short reads that fail parsing are
    /// mapped by the caller (they don't surface as `io::Error`).
    pub fn from_io_access(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Self::NotSupported,
            ErrorKind::PermissionDenied => Self::Permission,
            _ => match err.raw_os_error() {
                Some(libc::EBUSY) => Self::Busy,
                Some(libc::EINTR) => Self::Interrupt,
                _ => Self::Io(err),
            },
        }
    }
}

/// The stable, C-ABI-shaped status taxonomy from spec §7. Names and ordinal
/// values are part of the public surface and must stay stable across
/// versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RsmiStatus {
    Success = 0,
    InvalidArgs,
    NotSupported,
    FileError,
    Permission,
    OutOfResources,
    InternalException,
    InputOutOfBounds,
    InitError,
    NotYetImplemented,
    NotFound,
    InsufficientSize,
    Interrupt,
    UnexpectedSize,
    NoData,
    UnexpectedData,
    Busy,
    RefcountOverflow,
    SettingUnavailable,
    UnknownError = 0xFFFF_FFFF,
}

impl From<&RsmiError> for RsmiStatus {
    fn from(err: &RsmiError) -> Self {
        match err {
            RsmiError::Io(_) => Self::FileError,
            RsmiError::InvalidArgs => Self::InvalidArgs,
            RsmiError::NotSupported => Self::NotSupported,
            RsmiError::Permission => Self::Permission,
            RsmiError::Busy => Self::Busy,
            RsmiError::OutOfResources => Self::OutOfResources,
            RsmiError::Internal(_) => Self::InternalException,
            RsmiError::InputOutOfBounds => Self::InputOutOfBounds,
            RsmiError::InitError => Self::InitError,
            RsmiError::NotYetImplemented => Self::NotYetImplemented,
            RsmiError::NotFound => Self::NotFound,
            RsmiError::InsufficientSize { .. } => Self::InsufficientSize,
            RsmiError::Interrupt => Self::Interrupt,
            RsmiError::UnexpectedSize => Self::UnexpectedSize,
            RsmiError::NoData => Self::NoData,
            RsmiError::UnexpectedData => Self::UnexpectedData,
            RsmiError::RefcountOverflow => Self::RefcountOverflow,
            RsmiError::SettingUnavailable => Self::SettingUnavailable,
        }
    }
}

impl RsmiStatus {
    /// A short English description, mirroring `rsmi_status_string`.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Success => "operation was successful",
            Self::InvalidArgs => "passed in arguments are not valid",
            Self::NotSupported => "requested information or action is not available",
            Self::FileError => "problem accessing a file",
            Self::Permission => {
                "permission denied, try running with elevated privileges"
            }
            Self::OutOfResources => "unable to acquire memory or other resource",
            Self::InternalException => "an internal exception was caught",
            Self::InputOutOfBounds => "the provided input is out of allowable range",
            Self::InitError => "an error occurred during initialization",
            Self::NotYetImplemented => "the requested function has not been implemented",
            Self::NotFound => "an item was searched for but not found",
            Self::InsufficientSize => "not enough resources were available for the call",
            Self::Interrupt => "an interrupt occurred during execution",
            Self::UnexpectedSize => "an unexpected amount of data was read",
            Self::NoData => "no data was found for a given input",
            Self::UnexpectedData => "the data read or provided was not what was expected",
            Self::Busy => "a resource or mutex could not be acquired",
            Self::RefcountOverflow => "an internal reference counter overflowed",
            Self::SettingUnavailable => "requested setting is not available",
            Self::UnknownError => "an unknown error occurred",
        }
    }
}
