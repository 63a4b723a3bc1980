//! A resumable, non-blocking SFTP version 3 client and server.
//!
//! The protocol runs over any [`Stream`], normally a SSH channel. Neither
//! side ever blocks: operations return [`Error::WouldBlock`] when the stream
//! can't make progress and are called again later to continue.

#![forbid(unsafe_code)]

// avoids headscratching
#![deny(unused_must_use)]

pub mod sftpwire;
pub mod proto;
pub mod config;
pub mod error;
pub mod fs;

mod buffer;
mod stream;
mod reply;
mod request;
mod handles;
mod offsets;

mod client;
mod clitransfer;

mod server;

mod sftplog;

// sunset-sshwire-derive 0.2.0 (required by sunset 0.3) expands to crate::sshwire
use sunset::sshwire;

// Application API
pub use client::Client;
pub use clitransfer::{Interrupt, TransferOutcome};
pub use offsets::{Direction, SavedOffset, SavedOffsets};
pub use server::{clean_path, Server};

pub use stream::{IoStream, Stream};
pub use error::{Error, Result};
pub use config::SftpConfig;
pub use fs::{Filesystem, StdFilesystem};
pub use proto::{Attrs, FileHandle, NameEntry, OpenFlags, StatusCode};
