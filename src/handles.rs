//! Server side handle registry.
//!
//! Handles are scoped to a session. Each is a 64 bit id from the session's
//! counter, sent on the wire as 8 bytes (two big endian `u32` halves).

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::collections::BTreeMap;

use crate::fs::Filesystem;
use crate::proto::FileHandle;

const HANDLE_LEN: usize = 8;

pub(crate) enum OpenHandle<F: Filesystem> {
    File {
        file: F::File,
        path: String,
    },
    Dir {
        dir: F::Dir,
        path: String,
        /// Set once the directory has been read to the end. Later
        /// READDIRs report EOF without reading the filesystem.
        eof: bool,
    },
}

impl<F: Filesystem> OpenHandle<F> {
    pub fn path(&self) -> &str {
        match self {
            OpenHandle::File { path, .. } | OpenHandle::Dir { path, .. } => path,
        }
    }
}

impl<F: Filesystem> core::fmt::Debug for OpenHandle<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            OpenHandle::File { path, .. } => write!(f, "File({path:?})"),
            OpenHandle::Dir { path, eof, .. } => write!(f, "Dir({path:?}, eof {eof})"),
        }
    }
}

pub(crate) struct HandleTable<F: Filesystem> {
    next_id: u64,
    entries: BTreeMap<u64, OpenHandle<F>>,
    capacity: usize,
}

impl<F: Filesystem> HandleTable<F> {
    pub fn new(capacity: usize) -> Self {
        Self { next_id: 0, entries: BTreeMap::new(), capacity }
    }

    /// Fails with [`Error::NoRoom`] when another handle can't be added.
    ///
    /// Called before opening so that a native file isn't opened only to be
    /// discarded.
    pub fn check_room(&self) -> Result<()> {
        if self.entries.len() >= self.capacity {
            debug!("{} handles already open", self.entries.len());
            return Err(Error::NoRoom);
        }
        Ok(())
    }

    pub fn insert(&mut self, h: OpenHandle<F>) -> Result<FileHandle> {
        self.check_room()?;
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        trace!("new handle {id} {h:?}");
        self.entries.insert(id, h);
        FileHandle::new(&Self::encode(id))
    }

    fn encode(id: u64) -> [u8; HANDLE_LEN] {
        let hi = (id >> 32) as u32;
        let lo = id as u32;
        let mut b = [0u8; HANDLE_LEN];
        b[..4].copy_from_slice(&hi.to_be_bytes());
        b[4..].copy_from_slice(&lo.to_be_bytes());
        b
    }

    fn decode(handle: &[u8]) -> Result<u64> {
        let b: [u8; HANDLE_LEN] = handle.try_into().map_err(|_| {
            debug!("handle length {}", handle.len());
            Error::BadHandle
        })?;
        let hi = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        let lo = u32::from_be_bytes([b[4], b[5], b[6], b[7]]);
        Ok((u64::from(hi) << 32) | u64::from(lo))
    }

    pub fn get_mut(&mut self, handle: &[u8]) -> Result<&mut OpenHandle<F>> {
        let id = Self::decode(handle)?;
        self.entries.get_mut(&id).ok_or(Error::BadHandle)
    }

    pub fn remove(&mut self, handle: &[u8]) -> Result<OpenHandle<F>> {
        let id = Self::decode(handle)?;
        self.entries.remove(&id).ok_or(Error::BadHandle)
    }

    /// Removes every handle, for session teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = OpenHandle<F>> {
        core::mem::take(&mut self.entries).into_values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
