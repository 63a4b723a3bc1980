//! Multi step client transfers: `get`, `put` and `ls`.
//!
//! These are built from the single request operations in [`Client`] and
//! are resumable in the same way. Each keeps its state in the client
//! between calls.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::client::{settle, Client};
use crate::config::DEFAULT_FILE_MODE;
use crate::fs::Filesystem;
use crate::offsets::Direction;
use crate::proto::{Attrs, FileHandle, NameEntry, OpenFlags};
use crate::stream::Stream;

/// Requests that a running `get` or `put` stop.
///
/// Checked after each complete chunk. The flag is cleared when a transfer
/// observes it.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns whether the flag was set, clearing it.
    pub(crate) fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Result of a `get` or `put`, with the file offset reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Complete(u64),
    /// Stopped by an [`Interrupt`]. The offset is saved for resuming.
    Interrupted(u64),
}

impl TransferOutcome {
    pub fn offset(&self) -> u64 {
        match self {
            Self::Complete(o) | Self::Interrupted(o) => *o,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum GetPhase {
    Lstat,
    OpenRemote,
    LookupOffset,
    OpenLocal,
    Read,
    CloseRemote,
    CloseLocal,
}

pub(crate) struct GetState<F: Filesystem> {
    phase: GetPhase,
    attrs: Attrs,
    remote: Option<FileHandle>,
    local: Option<F::File>,
    offset: u64,
    buf: Vec<u8>,
    interrupted: bool,
    /// First failure, returned once both files are closed
    err: Option<Error>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PutPhase {
    LookupOffset,
    OpenLocal,
    OpenRemote,
    Write,
    CloseLocal,
    CloseRemote,
}

pub(crate) struct PutState<F: Filesystem> {
    phase: PutPhase,
    local: Option<F::File>,
    remote: Option<FileHandle>,
    offset: u64,
    buf: Vec<u8>,
    /// Length of the chunk in `buf` that is being written
    chunk_len: Option<usize>,
    interrupted: bool,
    err: Option<Error>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LsPhase {
    RealPath,
    OpenDir,
    ReadDir,
    Close,
}

#[derive(Debug)]
pub(crate) struct LsState {
    phase: LsPhase,
    path: String,
    handle: Option<FileHandle>,
    entries: Vec<NameEntry>,
    err: Option<Error>,
}

/// Records a failure and moves on to cleanup. `WouldBlock` is passed through.
fn record(err: &mut Option<Error>, e: Error) -> Result<()> {
    if e.is_would_block() {
        return Err(e);
    }
    debug!("transfer failed: {e:?}");
    err.get_or_insert(e);
    Ok(())
}

impl<S: Stream, F: Filesystem> Client<S, F> {
    /// Downloads remote `from` to local `to`.
    ///
    /// With `resume` an offset saved by an interrupted get of the same pair
    /// is continued, appending to `to`. `progress` is called with the offset
    /// after each chunk. Both files are closed even when the transfer fails.
    pub fn get(
        &mut self,
        from: &str,
        to: &str,
        resume: bool,
        progress: &mut dyn FnMut(u64),
    ) -> Result<TransferOutcome> {
        self.check_init()?;
        let mut st = match self.get_st.take() {
            Some(st) => st,
            None => {
                debug!("get {from} -> {to}");
                GetState {
                    phase: GetPhase::Lstat,
                    attrs: Attrs::default(),
                    remote: None,
                    local: None,
                    offset: 0,
                    buf: vec![0u8; self.config.rw_chunk],
                    interrupted: false,
                    err: None,
                }
            }
        };
        let r = self.get_run(&mut st, from, to, resume, progress);
        settle(&mut self.get_st, st, &r);
        r
    }

    fn get_run(
        &mut self,
        st: &mut GetState<F>,
        from: &str,
        to: &str,
        resume: bool,
        progress: &mut dyn FnMut(u64),
    ) -> Result<TransferOutcome> {
        loop {
            let r = match st.phase {
                GetPhase::Lstat => self.lstat(from).and_then(|a| {
                    if a.is_dir() {
                        debug!("{from} is a directory");
                        return Err(Error::BadUsage);
                    }
                    st.attrs = a;
                    st.phase = GetPhase::OpenRemote;
                    Ok(())
                }),
                GetPhase::OpenRemote => self.open(from, OpenFlags::READ, &Attrs::default()).map(|h| {
                    st.remote = Some(h);
                    st.phase = GetPhase::LookupOffset;
                }),
                GetPhase::LookupOffset => {
                    if resume {
                        st.offset = self.offsets.lookup(Direction::Get, to, from);
                    }
                    st.phase = GetPhase::OpenLocal;
                    Ok(())
                }
                GetPhase::OpenLocal => {
                    let mut flags = OpenFlags::WRITE | OpenFlags::CREAT;
                    if st.offset > 0 {
                        debug!("resuming {from} at {}", st.offset);
                        flags = flags | OpenFlags::APPEND;
                    } else {
                        flags = flags | OpenFlags::TRUNC;
                    }
                    let mode = st.attrs.permissions.map(|p| p & 0o777).unwrap_or(DEFAULT_FILE_MODE);
                    self.fs.open(to, flags, mode).map(|f| {
                        st.local = Some(f);
                        st.phase = GetPhase::Read;
                    })
                }
                GetPhase::Read => self.get_chunk(st, to, from, progress),
                GetPhase::CloseRemote => {
                    if let Some(h) = st.remote.as_ref() {
                        if let Err(e) = self.close(h) {
                            record(&mut st.err, e)?;
                        }
                    }
                    st.remote = None;
                    st.phase = GetPhase::CloseLocal;
                    Ok(())
                }
                GetPhase::CloseLocal => {
                    if let Some(f) = st.local.take() {
                        if let Err(e) = self.fs.close(f) {
                            record(&mut st.err, e)?;
                        }
                    }
                    return self.finish(st.err.take(), st.interrupted, Direction::Get, to, from, st.offset);
                }
            };
            if let Err(e) = r {
                record(&mut st.err, e)?;
                st.phase = GetPhase::CloseRemote;
            }
        }
    }

    /// One READ and the matching local write
    fn get_chunk(
        &mut self,
        st: &mut GetState<F>,
        to: &str,
        from: &str,
        progress: &mut dyn FnMut(u64),
    ) -> Result<()> {
        let n = self.read(st.remote.as_ref().trap()?, st.offset, &mut st.buf)?;
        if n == 0 {
            st.phase = GetPhase::CloseRemote;
            return Ok(());
        }
        let local = st.local.as_mut().trap()?;
        let w = self.fs.write(local, st.offset, &st.buf[..n])?;
        if w != n {
            debug!("short local write {w} of {n}");
            return Err(Error::BadFile);
        }
        st.offset += n as u64;
        progress(st.offset);
        if self.interrupt.take() {
            info!("get interrupted at {}", st.offset);
            // saved before closing, a failed close keeps the resume point
            self.offsets.save(Direction::Get, to, from, st.offset);
            st.interrupted = true;
            st.phase = GetPhase::CloseRemote;
        }
        Ok(())
    }

    /// Uploads local `from` to remote `to`.
    ///
    /// With `resume` an offset saved by an interrupted put of the same pair
    /// is continued, keeping the partial remote file. `progress` is called
    /// with the offset after each chunk.
    pub fn put(
        &mut self,
        from: &str,
        to: &str,
        resume: bool,
        progress: &mut dyn FnMut(u64),
    ) -> Result<TransferOutcome> {
        self.check_init()?;
        let mut st = match self.put_st.take() {
            Some(st) => st,
            None => {
                debug!("put {from} -> {to}");
                PutState {
                    phase: PutPhase::LookupOffset,
                    local: None,
                    remote: None,
                    offset: 0,
                    buf: vec![0u8; self.config.rw_chunk],
                    chunk_len: None,
                    interrupted: false,
                    err: None,
                }
            }
        };
        let r = self.put_run(&mut st, from, to, resume, progress);
        settle(&mut self.put_st, st, &r);
        r
    }

    fn put_run(
        &mut self,
        st: &mut PutState<F>,
        from: &str,
        to: &str,
        resume: bool,
        progress: &mut dyn FnMut(u64),
    ) -> Result<TransferOutcome> {
        loop {
            let r = match st.phase {
                PutPhase::LookupOffset => {
                    if resume {
                        st.offset = self.offsets.lookup(Direction::Put, from, to);
                    }
                    st.phase = PutPhase::OpenLocal;
                    Ok(())
                }
                PutPhase::OpenLocal => self.fs.open(from, OpenFlags::READ, 0).map(|f| {
                    st.local = Some(f);
                    st.phase = PutPhase::OpenRemote;
                }),
                PutPhase::OpenRemote => self.put_open_remote(st, to),
                PutPhase::Write => self.put_chunk(st, from, to, progress),
                PutPhase::CloseLocal => {
                    if let Some(f) = st.local.take() {
                        if let Err(e) = self.fs.close(f) {
                            record(&mut st.err, e)?;
                        }
                    }
                    st.phase = PutPhase::CloseRemote;
                    Ok(())
                }
                PutPhase::CloseRemote => {
                    if let Some(h) = st.remote.as_ref() {
                        if let Err(e) = self.close(h) {
                            record(&mut st.err, e)?;
                        }
                    }
                    st.remote = None;
                    return self.finish(st.err.take(), st.interrupted, Direction::Put, from, to, st.offset);
                }
            };
            if let Err(e) = r {
                record(&mut st.err, e)?;
                st.phase = PutPhase::CloseLocal;
            }
        }
    }

    fn put_open_remote(&mut self, st: &mut PutState<F>, to: &str) -> Result<()> {
        let local = st.local.as_ref().trap()?;
        let mode = self.fs.fstat(local)?.permissions.map(|p| p & 0o777);
        let attrs = Attrs { permissions: mode, ..Default::default() };
        let flags = if st.offset > 0 {
            debug!("resuming {to} at {}", st.offset);
            OpenFlags::WRITE
        } else {
            OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::TRUNC
        };
        let h = self.open(to, flags, &attrs)?;
        st.remote = Some(h);
        st.phase = PutPhase::Write;
        Ok(())
    }

    /// One local read and the matching WRITE
    fn put_chunk(
        &mut self,
        st: &mut PutState<F>,
        from: &str,
        to: &str,
        progress: &mut dyn FnMut(u64),
    ) -> Result<()> {
        let n = match st.chunk_len {
            Some(n) => n,
            None => {
                let local = st.local.as_mut().trap()?;
                let n = self.fs.read(local, st.offset, &mut st.buf)?;
                if n == 0 {
                    st.phase = PutPhase::CloseLocal;
                    return Ok(());
                }
                st.chunk_len = Some(n);
                n
            }
        };
        let w = self.write(st.remote.as_ref().trap()?, st.offset, &st.buf[..n])?;
        st.chunk_len = None;
        if w != n {
            return Err(Error::BadFile);
        }
        st.offset += n as u64;
        progress(st.offset);
        if self.interrupt.take() {
            info!("put interrupted at {}", st.offset);
            self.offsets.save(Direction::Put, from, to, st.offset);
            st.interrupted = true;
            st.phase = PutPhase::CloseLocal;
        }
        Ok(())
    }

    /// Final step for both directions, once files are closed.
    ///
    /// An interrupted transfer's offset was already saved when the
    /// interrupt was seen.
    fn finish(
        &mut self,
        err: Option<Error>,
        interrupted: bool,
        direction: Direction,
        local: &str,
        remote: &str,
        offset: u64,
    ) -> Result<TransferOutcome> {
        if let Some(e) = err {
            return Err(e);
        }
        if interrupted {
            Ok(TransferOutcome::Interrupted(offset))
        } else {
            self.offsets.clear(direction, local, remote);
            debug!("{direction:?} {remote} complete, {offset} bytes");
            Ok(TransferOutcome::Complete(offset))
        }
    }

    /// Lists a remote directory.
    ///
    /// Entries are in the order the server sent them.
    pub fn ls(&mut self, dir: &str) -> Result<Vec<NameEntry>> {
        self.check_init()?;
        let mut st = self.ls_st.take().unwrap_or(LsState {
            phase: LsPhase::RealPath,
            path: String::new(),
            handle: None,
            entries: Vec::new(),
            err: None,
        });
        let r = self.ls_run(&mut st, dir);
        settle(&mut self.ls_st, st, &r);
        r
    }

    fn ls_run(&mut self, st: &mut LsState, dir: &str) -> Result<Vec<NameEntry>> {
        loop {
            match st.phase {
                LsPhase::RealPath => {
                    let p = self.realpath(dir)?;
                    trace!("ls {dir} is {}", p.filename);
                    st.path = p.filename;
                    st.phase = LsPhase::OpenDir;
                }
                LsPhase::OpenDir => {
                    st.handle = Some(self.opendir(&st.path)?);
                    st.phase = LsPhase::ReadDir;
                }
                LsPhase::ReadDir => match self.readdir(st.handle.as_ref().trap()?) {
                    Ok(Some(mut v)) => st.entries.append(&mut v),
                    Ok(None) => st.phase = LsPhase::Close,
                    Err(e) => {
                        record(&mut st.err, e)?;
                        st.phase = LsPhase::Close;
                    }
                },
                LsPhase::Close => {
                    if let Err(e) = self.close(st.handle.as_ref().trap()?) {
                        record(&mut st.err, e)?;
                    }
                    if let Some(e) = st.err.take() {
                        return Err(e);
                    }
                    return Ok(core::mem::take(&mut st.entries));
                }
            }
        }
    }
}
