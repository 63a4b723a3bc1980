#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use core::fmt::Arguments;
use core::str::Utf8Error;

use snafu::prelude::*;

use crate::proto::StatusCode;
use crate::sftpwire::WireError;

/// The sunset-sftp error type.
///
/// [`Error::WouldBlock`] is not a failure: it signals that the stream could
/// not make progress and the same call should be made again later. Every
/// other variant is terminal for the operation that returned it.
#[non_exhaustive]
#[derive(Snafu, Debug)]
#[snafu(context(suffix(false)))]
#[snafu(visibility(pub))]
pub enum Error {
    /// The stream would block. Retry the same call later.
    WouldBlock,

    /// The stream's flow control window is full.
    ///
    /// Returned by [`Stream::send()`](crate::Stream::send), normally handled
    /// internally by calling [`Stream::pump()`](crate::Stream::pump).
    WindowFull,

    /// Output buffer ran out of room
    NoRoom,

    /// Input buffer ran out
    RanOut,

    /// Not a UTF-8 string
    BadString,

    /// Malformed SFTP packet
    SftpProtoError,

    #[snafu(display("Unexpected packet type {number}"))]
    UnexpectedPacket { number: u8 },

    #[snafu(display("Reply id {got} doesn't match request id {expect}"))]
    ReqIdMismatch { expect: u32, got: u32 },

    #[snafu(display("Packet size {size} too large"))]
    BigPacket { size: usize },

    /// Handle is too long or doesn't refer to an open file
    BadHandle,

    /// The peer replied with a failure status.
    #[snafu(display("Peer returned {code:?}"))]
    Status { code: StatusCode },

    /// The peer or local filesystem denied permission.
    ///
    /// Kept distinct from [`Error::Status`] so that callers can skip
    /// rather than abort, for example in a batch transfer.
    PermissionDenied,

    /// A local file doesn't exist
    FileNotFound,

    /// A local file operation failed, or transferred a short length
    BadFile,

    /// The stream was closed by the peer
    ConnectionLost,

    /// An operation was attempted before the version exchange completed
    NotInitialized,

    /// Bad application usage
    ///
    /// Returned from an API call when the API is used incorrectly,
    /// for example an empty path or a zero sized buffer.
    BadUsage,

    #[snafu(display("{msg}"))]
    Custom { msg: &'static str },

    /// IO Error
    IoError { source: std::io::Error },

    /// Program bug
    Bug,
}

impl Error {
    pub fn msg(m: &'static str) -> Error {
        Error::Custom { msg: m }
    }

    /// Returns `true` for [`Error::WouldBlock`], the resumable condition.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::WouldBlock)
    }

    /// Returns the peer's status code when the error came from a STATUS reply.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status { code } => Some(*code),
            Error::PermissionDenied => Some(StatusCode::SSH_FX_PERMISSION_DENIED),
            _ => None,
        }
    }

    #[cold]
    #[track_caller]
    /// Panics in debug builds, returns [`Error::Bug`] in release.
    pub fn bug() -> Error {
        // Easier to track the source of errors in development,
        // but release builds shouldn't panic.
        if cfg!(debug_assertions) {
            panic!("Hit a bug");
        } else {
            Error::Bug
        }
    }

    /// Like [`bug()`](Error::bug) but with a message
    ///
    /// The message can be used instead of a code comment, is logged at `debug` level.
    #[cold]
    pub fn bug_fmt(args: Arguments) -> Error {
        if cfg!(debug_assertions) {
            panic!("Hit a bug: {args}");
        } else {
            debug!("Hit a bug: {args}");
            Error::Bug
        }
    }

    #[cold]
    pub fn bug_msg<T>(msg: &str) -> Result<T, Error> {
        Err(Self::bug_fmt(format_args!("{}", msg)))
    }
}

#[cfg(feature = "embedded-io")]
impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Error::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            Error::FileNotFound => embedded_io::ErrorKind::NotFound,
            Error::ConnectionLost => embedded_io::ErrorKind::ConnectionReset,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

/// A sunset-sftp specific Result type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

pub trait TrapBug<T> {
    /// `.trap()` should be used like `.unwrap()`, in situations
    /// never expected to fail. Instead it calls [`Error::bug()`].
    /// (or debug builds may panic)
    fn trap(self) -> Result<T, Error>;
}

impl<T, E> TrapBug<T> for Result<T, E> {
    fn trap(self) -> Result<T, Error> {
        // call directly so that Location::caller() works
        if let Ok(i) = self {
            Ok(i)
        } else {
            Err(Error::bug())
        }
    }
}

impl<T> TrapBug<T> for Option<T> {
    #[track_caller]
    fn trap(self) -> Result<T, Error> {
        if let Some(i) = self {
            Ok(i)
        } else {
            Err(Error::bug())
        }
    }
}

impl From<Utf8Error> for Error {
    fn from(_e: Utf8Error) -> Error {
        Error::BadString
    }
}

impl From<WireError> for Error {
    fn from(w: WireError) -> Self {
        match w {
            WireError::NoRoom => Error::NoRoom,
            WireError::RanOut => Error::RanOut,
            WireError::BadString => Error::BadString,
            WireError::UnknownPacket { number } => Error::UnexpectedPacket { number },
            w => {
                trace!("wire error {w:?}");
                Error::SftpProtoError
            }
        }
    }
}

impl From<sunset::Error> for Error {
    fn from(e: sunset::Error) -> Self {
        match e {
            sunset::Error::NoRoom { .. } => Error::NoRoom,
            sunset::Error::RanOut { .. } => Error::RanOut,
            sunset::Error::BadString => Error::BadString,
            sunset::Error::UnknownPacket { number } => Error::UnexpectedPacket { number },
            e => {
                trace!("wire error {e:?}");
                Error::SftpProtoError
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match value.kind() {
            ErrorKind::WouldBlock => Error::WouldBlock,
            ErrorKind::NotFound => Error::FileNotFound,
            ErrorKind::PermissionDenied => Error::PermissionDenied,
            _ => Self::IoError { source: value },
        }
    }
}
