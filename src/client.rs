//! SFTP client
//!
//! Every operation is resumable. When the stream can't make progress an
//! operation returns [`Error::WouldBlock`] and keeps its state, the caller
//! repeats the same call with the same arguments once the stream is ready.
//! A second call to an operation that is already in progress resumes it
//! rather than starting another request.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use crate::clitransfer::{GetState, Interrupt, LsState, PutState};
use crate::config::{SftpConfig, SFTP_VERSION};
use crate::fs::{Filesystem, StdFilesystem};
use crate::offsets::SavedOffsets;
use crate::proto::{
    set_header, Attrs, FSetStat, FileHandle, HandleReq, NameEntry, OpenFlags, Open,
    PacketHeader, PathAttrs, PathReq, Read, Rename, SftpNum, StatusCode, WriteHeader,
    SFTP_FIELD_LEN_LENGTH, SFTP_HEADER_SZ, SFTP_WRITE_OVERHEAD,
};
use crate::reply::create_version;
use crate::request::{
    expect_ok, parse_attrs, parse_handle, parse_names, parse_status, status_error, unexpected,
    Exchange,
};
use crate::buffer::{recv_slice, ScratchBuffer};
use crate::sftpwire::{encode_vec, split_string, BinString, Offset};
use crate::stream::Stream;

/// Operation kinds with a request slot. Only one request of each kind
/// is in progress at a time.
#[derive(Debug, Clone, Copy)]
enum Op {
    Open,
    OpenDir,
    Write,
    Close,
    Stat,
    FStat,
    SetStat,
    FSetStat,
    Mkdir,
    Rmdir,
    Remove,
    Rename,
    ReadDir,
    RealPath,
}

const NUM_OPS: usize = Op::RealPath as usize + 1;

/// Keeps `st` in `slot` if `r` is the suspend signal, otherwise drops it.
pub(crate) fn settle<St, T>(slot: &mut Option<St>, st: St, r: &Result<T>) {
    if matches!(r, Err(Error::WouldBlock)) {
        *slot = Some(st);
    }
}

/// READ state. DATA is copied straight into the caller's buffer.
#[derive(Debug)]
pub(crate) struct ReadState {
    ex: Exchange,
    len: ScratchBuffer,
    data_len: Option<usize>,
    idx: usize,
}

impl ReadState {
    fn run<S: Stream>(&mut self, stream: &mut S, out: &mut [u8]) -> Result<usize> {
        let h = self.ex.header(stream, &[])?;
        match h.ty {
            SftpNum::SSH_FXP_DATA => {
                let l = match self.data_len {
                    Some(l) => l,
                    None => {
                        if self.len.is_empty() {
                            self.len.create(SFTP_FIELD_LEN_LENGTH);
                        }
                        self.len.read(stream)?;
                        self.len.rewind();
                        let l = self.len.get_u32()? as usize;
                        if l + SFTP_FIELD_LEN_LENGTH != h.payload_len() {
                            debug!("data length {l}, packet {}", h.payload_len());
                            return Err(Error::SftpProtoError);
                        }
                        if l > out.len() {
                            debug!("data length {l}, requested {}", out.len());
                            return Err(Error::BigPacket { size: l });
                        }
                        self.data_len = Some(l);
                        l
                    }
                };
                recv_slice(stream, &mut out[..l], &mut self.idx)?;
                Ok(l)
            }
            SftpNum::SSH_FXP_STATUS => {
                let (_, p) = self.ex.reply(stream, &[])?;
                match parse_status(p)? {
                    StatusCode::SSH_FX_OK | StatusCode::SSH_FX_EOF => Ok(0),
                    code => Err(status_error(code, false)),
                }
            }
            ty => Err(unexpected(ty)),
        }
    }
}

/// A SFTP client session.
///
/// `F` is the local filesystem used by [`get()`](Client::get) and
/// [`put()`](Client::put).
pub struct Client<S: Stream, F: Filesystem = StdFilesystem> {
    pub(crate) stream: S,
    pub(crate) fs: F,
    pub(crate) config: SftpConfig,

    req_id: u32,
    server_version: Option<u32>,

    pub(crate) interrupt: Interrupt,
    pub(crate) offsets: SavedOffsets,

    connect_st: Option<Exchange>,
    read_st: Option<ReadState>,
    slots: [Option<Exchange>; NUM_OPS],

    pub(crate) get_st: Option<GetState<F>>,
    pub(crate) put_st: Option<PutState<F>>,
    pub(crate) ls_st: Option<LsState>,
}

impl<S: Stream, F: Filesystem> core::fmt::Debug for Client<S, F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client")
            .field("req_id", &self.req_id)
            .field("server_version", &self.server_version)
            .field("offsets", &self.offsets)
            .finish_non_exhaustive()
    }
}

impl<S: Stream> Client<S, StdFilesystem> {
    pub fn new(stream: S, config: SftpConfig) -> Result<Self> {
        Self::new_with_fs(stream, StdFilesystem::new(), config)
    }
}

impl<S: Stream, F: Filesystem> Client<S, F> {
    pub fn new_with_fs(stream: S, fs: F, config: SftpConfig) -> Result<Self> {
        config.validate()?;
        let offsets = SavedOffsets::new(config.saved_offsets);
        Ok(Self {
            stream,
            fs,
            config,
            req_id: 0,
            server_version: None,
            interrupt: Interrupt::new(),
            offsets,
            connect_st: None,
            read_st: None,
            slots: Default::default(),
            get_st: None,
            put_st: None,
            ls_st: None,
        })
    }

    /// The request id the next request will use
    pub fn request_id(&self) -> u32 {
        self.req_id
    }

    /// The version from the server's VERSION, once connected
    pub fn server_version(&self) -> Option<u32> {
        self.server_version
    }

    /// A handle that can interrupt `get` or `put` from elsewhere
    pub fn interrupter(&self) -> Interrupt {
        self.interrupt.clone()
    }

    pub fn set_interrupt(&mut self, interrupt: bool) {
        if interrupt {
            self.interrupt.set()
        } else {
            self.interrupt.clear()
        }
    }

    /// Offsets of interrupted transfers
    pub fn saved_offsets(&self) -> &SavedOffsets {
        &self.offsets
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn fs_mut(&mut self) -> &mut F {
        &mut self.fs
    }

    pub(crate) fn check_init(&self) -> Result<()> {
        if self.server_version.is_none() {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    fn complete<T>(&mut self, r: Result<T>) -> Result<T> {
        if r.is_ok() {
            self.req_id = self.req_id.wrapping_add(1);
        }
        r
    }

    /// Runs the request in `op`'s slot, building it with `build` if none
    /// is in progress. `finish` interprets the reply.
    fn run<T>(
        &mut self,
        op: Op,
        build: impl FnOnce(u32, usize) -> Result<Exchange>,
        tail: &[u8],
        finish: impl FnOnce(&PacketHeader, &[u8]) -> Result<T>,
    ) -> Result<T> {
        self.check_init()?;
        let mut ex = match self.slots[op as usize].take() {
            Some(ex) => ex,
            None => {
                trace!("{op:?} id {}", self.req_id);
                build(self.req_id, self.config.max_packet)?
            }
        };
        let r = ex.reply(&mut self.stream, tail).and_then(|(h, p)| finish(&h, p));
        settle(&mut self.slots[op as usize], ex, &r);
        self.complete(r)
    }

    fn check_path(path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(Error::BadUsage);
        }
        Ok(())
    }

    /// Sends INIT and waits for the server's VERSION, returning the version.
    ///
    /// Other operations fail with [`Error::NotInitialized`] until this completes.
    pub fn connect(&mut self) -> Result<u32> {
        if let Some(v) = self.server_version {
            return Ok(v);
        }
        let mut ex = match self.connect_st.take() {
            Some(ex) => ex,
            None => {
                let p = create_version(SftpNum::SSH_FXP_INIT, SFTP_VERSION, &[])?;
                Exchange::from_packet(p, None, self.config.max_packet)
            }
        };
        let r = ex.reply(&mut self.stream, &[]).and_then(|(h, p)| {
            if h.ty != SftpNum::SSH_FXP_VERSION {
                return Err(unexpected(h.ty));
            }
            let mut rest = p;
            while !rest.is_empty() {
                let (name, r) = split_string(rest)?;
                let (_data, r) = split_string(r)?;
                debug!("server extension {}", String::from_utf8_lossy(name));
                rest = r;
            }
            Ok(h.req_id)
        });
        settle(&mut self.connect_st, ex, &r);
        let v = r?;
        if v != SFTP_VERSION {
            warn!("server version {v}, continuing with {SFTP_VERSION}");
        }
        info!("connected, server version {v}");
        self.server_version = Some(v);
        Ok(v)
    }

    /// Opens a remote file
    pub fn open(&mut self, path: &str, flags: OpenFlags, attrs: &Attrs) -> Result<FileHandle> {
        Self::check_path(path)?;
        self.run(
            Op::Open,
            |id, max| {
                let o = Open { filename: path.into(), pflags: flags.0, attrs: attrs.clone() };
                Exchange::request(SftpNum::SSH_FXP_OPEN, id, &o, max)
            },
            &[],
            |h, p| parse_handle(h, p),
        )
    }

    pub fn opendir(&mut self, path: &str) -> Result<FileHandle> {
        Self::check_path(path)?;
        self.run(
            Op::OpenDir,
            |id, max| Exchange::request(SftpNum::SSH_FXP_OPENDIR, id, &PathReq { path: path.into() }, max),
            &[],
            |h, p| parse_handle(h, p),
        )
    }

    /// Reads from `offset` into `out`, returning the length read.
    ///
    /// Returns 0 at end of file. The server may return less than requested.
    pub fn read(&mut self, handle: &FileHandle, offset: u64, out: &mut [u8]) -> Result<usize> {
        self.check_init()?;
        if out.is_empty() {
            return Err(Error::BadUsage);
        }
        let mut st = match self.read_st.take() {
            Some(st) => st,
            None => {
                let len: u32 = out.len().try_into().map_err(|_| Error::BadUsage)?;
                let r = Read { handle: BinString(handle.as_bytes()), offset: Offset(offset), len };
                let ex = Exchange::request(SftpNum::SSH_FXP_READ, self.req_id, &r, self.config.max_packet)?;
                ReadState { ex, len: ScratchBuffer::new(), data_len: None, idx: 0 }
            }
        };
        let r = st.run(&mut self.stream, out);
        settle(&mut self.read_st, st, &r);
        self.complete(r)
    }

    /// Writes `data` at `offset`.
    ///
    /// `data` is sent straight from the caller's buffer. It must fit a packet
    /// along with the request fields.
    pub fn write(&mut self, handle: &FileHandle, offset: u64, data: &[u8]) -> Result<usize> {
        if data.len() + SFTP_WRITE_OVERHEAD > self.config.max_packet {
            return Err(Error::BadUsage);
        }
        self.run(
            Op::Write,
            |id, max| {
                let w = WriteHeader {
                    handle: BinString(handle.as_bytes()),
                    offset: Offset(offset),
                    data_len: data.len().try_into().map_err(|_| Error::BadUsage)?,
                };
                let mut p = vec![0u8; SFTP_HEADER_SZ];
                encode_vec(&mut p, &w)?;
                let plen = p.len() - SFTP_HEADER_SZ + data.len();
                set_header(id, SftpNum::SSH_FXP_WRITE, plen, &mut p)?;
                Ok(Exchange::from_packet(p, Some(id), max))
            },
            data,
            |h, p| expect_ok(h, p, false).map(|_| data.len()),
        )
    }

    pub fn close(&mut self, handle: &FileHandle) -> Result<()> {
        self.run(
            Op::Close,
            |id, max| {
                let r = HandleReq { handle: BinString(handle.as_bytes()) };
                Exchange::request(SftpNum::SSH_FXP_CLOSE, id, &r, max)
            },
            &[],
            |h, p| expect_ok(h, p, false),
        )
    }

    fn stat_common(&mut self, ty: SftpNum, path: &str) -> Result<Attrs> {
        Self::check_path(path)?;
        self.run(
            Op::Stat,
            |id, max| Exchange::request(ty, id, &PathReq { path: path.into() }, max),
            &[],
            |h, p| parse_attrs(h, p, true),
        )
    }

    /// Attributes of `path`, following symlinks.
    ///
    /// A permission failure is [`Error::PermissionDenied`].
    pub fn stat(&mut self, path: &str) -> Result<Attrs> {
        self.stat_common(SftpNum::SSH_FXP_STAT, path)
    }

    /// Attributes of `path` itself rather than a symlink's target.
    ///
    /// A permission failure is [`Error::PermissionDenied`].
    pub fn lstat(&mut self, path: &str) -> Result<Attrs> {
        self.stat_common(SftpNum::SSH_FXP_LSTAT, path)
    }

    pub fn fstat(&mut self, handle: &FileHandle) -> Result<Attrs> {
        self.run(
            Op::FStat,
            |id, max| {
                let r = HandleReq { handle: BinString(handle.as_bytes()) };
                Exchange::request(SftpNum::SSH_FXP_FSTAT, id, &r, max)
            },
            &[],
            |h, p| parse_attrs(h, p, false),
        )
    }

    pub fn setstat(&mut self, path: &str, attrs: &Attrs) -> Result<()> {
        Self::check_path(path)?;
        self.run(
            Op::SetStat,
            |id, max| {
                let r = PathAttrs { path: path.into(), attrs: attrs.clone() };
                Exchange::request(SftpNum::SSH_FXP_SETSTAT, id, &r, max)
            },
            &[],
            |h, p| expect_ok(h, p, false),
        )
    }

    pub fn fsetstat(&mut self, handle: &FileHandle, attrs: &Attrs) -> Result<()> {
        self.run(
            Op::FSetStat,
            |id, max| {
                let r = FSetStat { handle: BinString(handle.as_bytes()), attrs: attrs.clone() };
                Exchange::request(SftpNum::SSH_FXP_FSETSTAT, id, &r, max)
            },
            &[],
            |h, p| expect_ok(h, p, false),
        )
    }

    /// Creates a directory. A permission failure is [`Error::PermissionDenied`].
    pub fn mkdir(&mut self, path: &str, attrs: &Attrs) -> Result<()> {
        Self::check_path(path)?;
        self.run(
            Op::Mkdir,
            |id, max| {
                let r = PathAttrs { path: path.into(), attrs: attrs.clone() };
                Exchange::request(SftpNum::SSH_FXP_MKDIR, id, &r, max)
            },
            &[],
            |h, p| expect_ok(h, p, true),
        )
    }

    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        Self::check_path(path)?;
        self.run(
            Op::Rmdir,
            |id, max| Exchange::request(SftpNum::SSH_FXP_RMDIR, id, &PathReq { path: path.into() }, max),
            &[],
            |h, p| expect_ok(h, p, false),
        )
    }

    /// Removes a file.
    ///
    /// The file is checked with LSTAT first, a missing file fails
    /// without sending REMOVE.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        Self::check_path(path)?;
        if self.slots[Op::Remove as usize].is_none() {
            self.lstat(path)?;
        }
        self.run(
            Op::Remove,
            |id, max| Exchange::request(SftpNum::SSH_FXP_REMOVE, id, &PathReq { path: path.into() }, max),
            &[],
            |h, p| expect_ok(h, p, false),
        )
    }

    /// Renames `old` to `new`.
    ///
    /// `old` is checked with STAT first, a missing source fails without
    /// sending RENAME. A permission failure is [`Error::PermissionDenied`].
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        Self::check_path(old)?;
        Self::check_path(new)?;
        if self.slots[Op::Rename as usize].is_none() {
            self.stat(old)?;
        }
        self.run(
            Op::Rename,
            |id, max| {
                let r = Rename { oldpath: old.into(), newpath: new.into() };
                Exchange::request(SftpNum::SSH_FXP_RENAME, id, &r, max)
            },
            &[],
            |h, p| expect_ok(h, p, true),
        )
    }

    /// Reads the next batch of entries from a directory handle,
    /// `None` once the listing is complete.
    pub fn readdir(&mut self, handle: &FileHandle) -> Result<Option<Vec<NameEntry>>> {
        self.run(
            Op::ReadDir,
            |id, max| {
                let r = HandleReq { handle: BinString(handle.as_bytes()) };
                Exchange::request(SftpNum::SSH_FXP_READDIR, id, &r, max)
            },
            &[],
            |h, p| parse_names(h, p),
        )
    }

    /// Canonicalizes `path` on the server
    pub fn realpath(&mut self, path: &str) -> Result<NameEntry> {
        Self::check_path(path)?;
        self.run(
            Op::RealPath,
            |id, max| Exchange::request(SftpNum::SSH_FXP_REALPATH, id, &PathReq { path: path.into() }, max),
            &[],
            |h, p| match parse_names(h, p)? {
                Some(mut v) if v.len() == 1 => v.pop().trap(),
                Some(v) => {
                    debug!("realpath returned {} names", v.len());
                    Err(Error::SftpProtoError)
                }
                None => Err(Error::SftpProtoError),
            },
        )
    }
}
