//! SFTP server
//!
//! A [`Server`] serves one session over a [`Stream`], performing requests
//! through a [`Filesystem`]. Like the client it never blocks: when the
//! stream can't make progress [`Error::WouldBlock`] is returned and the same
//! call continues later.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use crate::buffer::ScratchBuffer;
use crate::config::{SftpConfig, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, SFTP_VERSION};
use crate::fs::{Filesystem, StdFilesystem};
use crate::handles::{HandleTable, OpenHandle};
use crate::proto::{
    get_header, FSetStat, HandleReq, NameEntry, Open, OpenFlags, PacketHeader, PathAttrs,
    PathReq, Read, Rename, SftpNum, StatusCode, Write,
};
use crate::reply::{
    create_attrs, create_data_header, create_handle, create_long_name, create_name,
    create_status, create_version, DATA_HEADER_SZ,
};
use crate::sftpwire::{read_sftp, TextString};
use crate::stream::Stream;

/// Joins `path` to `cwd` when relative, then collapses `.`, `..` and
/// repeated separators. `..` at the root stays at the root.
///
/// The result is always absolute. Symlinks are not resolved.
pub fn clean_path(cwd: &str, path: &str) -> String {
    let base = if path.starts_with('/') { "" } else { cwd };
    let mut parts = Vec::new();
    for seg in base.split('/').chain(path.split('/')) {
        match seg {
            "" | "." => (),
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    let mut out = String::with_capacity(path.len() + cwd.len() + 1);
    for p in parts {
        out.push('/');
        out.push_str(p);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// A SFTP server session
pub struct Server<S: Stream, F: Filesystem = StdFilesystem> {
    stream: S,
    pub(crate) fs: F,
    config: SftpConfig,
    pub(crate) handles: HandleTable<F>,
    version: Option<u32>,

    /// Incoming header, then payload
    rx: ScratchBuffer,
    rx_header: Option<PacketHeader>,
    /// Reply being sent
    tx: ScratchBuffer,
}

impl<S: Stream, F: Filesystem> core::fmt::Debug for Server<S, F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Server")
            .field("version", &self.version)
            .field("handles", &self.handles.len())
            .field("rx", &self.rx)
            .field("tx", &self.tx)
            .finish_non_exhaustive()
    }
}

impl<S: Stream> Server<S, StdFilesystem> {
    pub fn new(stream: S, config: SftpConfig) -> Result<Self> {
        Self::new_with_fs(stream, StdFilesystem::new(), config)
    }
}

impl<S: Stream, F: Filesystem> Server<S, F> {
    pub fn new_with_fs(stream: S, fs: F, config: SftpConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            stream,
            fs,
            handles: HandleTable::new(config.max_open_handles),
            config,
            version: None,
            rx: ScratchBuffer::new(),
            rx_header: None,
            tx: ScratchBuffer::new(),
        })
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Waits for the client's INIT and replies with VERSION.
    ///
    /// Any other packet first is [`Error::NotInitialized`]. Returns `Ok`
    /// once VERSION has been sent, and immediately after that.
    pub fn accept(&mut self) -> Result<()> {
        if self.version.is_none() {
            let h = self.recv_packet()?;
            self.rx.clear();
            if h.ty != SftpNum::SSH_FXP_INIT {
                debug!("{:?} before INIT", h.ty);
                return Err(Error::NotInitialized);
            }
            info!("client version {}", h.req_id);
            let v = create_version(SftpNum::SSH_FXP_VERSION, SFTP_VERSION, &[])?;
            self.tx = ScratchBuffer::from_vec(v);
            self.version = Some(SFTP_VERSION);
        }
        self.tx.send(&mut self.stream)
    }

    /// Handles one request.
    ///
    /// A reply still pending from an earlier call is flushed first. Returns
    /// [`Error::WouldBlock`] when no complete request is available or the
    /// reply couldn't be sent yet. Errors from the filesystem are sent to
    /// the client as a STATUS, only stream and framing failures are
    /// returned.
    pub fn process(&mut self) -> Result<()> {
        if self.version.is_none() {
            return Err(Error::NotInitialized);
        }
        if !self.tx.is_done() {
            self.tx.send(&mut self.stream)?;
        }

        let h = self.recv_packet()?;
        let rx = core::mem::take(&mut self.rx);
        trace!("request {:?} id {}", h.ty, h.req_id);
        let reply = match self.dispatch(&h, rx.data()) {
            Ok(r) => r,
            Err(e) => {
                let code = StatusCode::from_error(&e);
                debug!("{:?} id {} failed: {e:?}, {code:?}", h.ty, h.req_id);
                create_status(code, h.req_id, code.message(), "")?
            }
        };
        self.tx = ScratchBuffer::from_vec(reply);
        self.tx.send(&mut self.stream)
    }

    /// Closes every open handle. The session can't be used afterwards.
    pub fn close(&mut self) {
        let handles: Vec<_> = self.handles.drain().collect();
        debug!("closing {} handles", handles.len());
        for h in handles {
            let r = match h {
                OpenHandle::File { file, path } => {
                    trace!("close {path}");
                    self.fs.close(file)
                }
                OpenHandle::Dir { dir, path, .. } => {
                    trace!("closedir {path}");
                    self.fs.closedir(dir)
                }
            };
            if let Err(e) = r {
                warn!("close failed: {e:?}");
            }
        }
        self.version = None;
    }

    /// Reads a whole packet. The payload is left in `self.rx`.
    fn recv_packet(&mut self) -> Result<PacketHeader> {
        let h = match self.rx_header {
            Some(h) => h,
            None => {
                let h = get_header(&mut self.rx, &mut self.stream)?;
                if h.payload_len() > self.config.max_packet {
                    debug!("request {:?} length {}", h.ty, h.payload_len());
                    return Err(Error::BigPacket { size: h.payload_len() });
                }
                self.rx.create(h.payload_len());
                self.rx_header = Some(h);
                h
            }
        };
        self.rx.read(&mut self.stream)?;
        self.rx_header = None;
        Ok(h)
    }

    fn resolve(&self, path: &TextString) -> Result<String> {
        Ok(clean_path(&self.config.default_dir, path.as_str()?))
    }

    fn ok(req_id: u32) -> Result<Vec<u8>> {
        let code = StatusCode::SSH_FX_OK;
        create_status(code, req_id, code.message(), "")
    }

    fn eof(req_id: u32) -> Result<Vec<u8>> {
        let code = StatusCode::SSH_FX_EOF;
        create_status(code, req_id, code.message(), "")
    }

    fn dispatch(&mut self, h: &PacketHeader, p: &[u8]) -> Result<Vec<u8>> {
        let id = h.req_id;
        match h.ty {
            SftpNum::SSH_FXP_OPEN => {
                let o: Open = read_sftp(p)?;
                let path = self.resolve(&o.filename)?;
                let flags = OpenFlags(o.pflags);
                debug!("open {path} {flags:?}");
                self.handles.check_room()?;
                let mode = o.attrs.permissions.map(|m| m & 0o7777).unwrap_or(DEFAULT_FILE_MODE);
                let file = self.fs.open(&path, flags, mode)?;
                let fh = self.handles.insert(OpenHandle::File { file, path })?;
                create_handle(id, &fh)
            }
            SftpNum::SSH_FXP_OPENDIR => {
                let r: PathReq = read_sftp(p)?;
                let path = self.resolve(&r.path)?;
                debug!("opendir {path}");
                self.handles.check_room()?;
                let dir = self.fs.opendir(&path)?;
                let fh = self.handles.insert(OpenHandle::Dir { dir, path, eof: false })?;
                create_handle(id, &fh)
            }
            SftpNum::SSH_FXP_CLOSE => {
                let r: HandleReq = read_sftp(p)?;
                match self.handles.remove(r.handle.0)? {
                    OpenHandle::File { file, path } => {
                        trace!("close {path}");
                        self.fs.close(file)?
                    }
                    OpenHandle::Dir { dir, path, .. } => {
                        trace!("closedir {path}");
                        self.fs.closedir(dir)?
                    }
                }
                Self::ok(id)
            }
            SftpNum::SSH_FXP_READ => {
                let r: Read = read_sftp(p)?;
                let OpenHandle::File { file, .. } = self.handles.get_mut(r.handle.0)? else {
                    return Err(Error::BadHandle);
                };
                // the DATA payload is the length field and data
                let len = (r.len as usize).min(self.config.max_packet - 4);
                let mut v = vec![0u8; DATA_HEADER_SZ + len];
                let n = self.fs.read(file, r.offset.0, &mut v[DATA_HEADER_SZ..])?;
                if n == 0 {
                    return Self::eof(id);
                }
                v.truncate(DATA_HEADER_SZ + n);
                create_data_header(id, n, &mut v)?;
                Ok(v)
            }
            SftpNum::SSH_FXP_WRITE => {
                let w: Write = read_sftp(p)?;
                let OpenHandle::File { file, .. } = self.handles.get_mut(w.handle.0)? else {
                    return Err(Error::BadHandle);
                };
                let n = self.fs.write(file, w.offset.0, w.data.0)?;
                if n != w.data.0.len() {
                    debug!("short write {n} of {}", w.data.0.len());
                    return Err(Error::BadFile);
                }
                Self::ok(id)
            }
            SftpNum::SSH_FXP_LSTAT | SftpNum::SSH_FXP_STAT => {
                let r: PathReq = read_sftp(p)?;
                let path = self.resolve(&r.path)?;
                let a = self.fs.stat(&path, h.ty == SftpNum::SSH_FXP_STAT)?;
                create_attrs(id, &a)
            }
            SftpNum::SSH_FXP_FSTAT => {
                let r: HandleReq = read_sftp(p)?;
                let a = match self.handles.get_mut(r.handle.0)? {
                    OpenHandle::File { file, .. } => self.fs.fstat(file)?,
                    OpenHandle::Dir { path, .. } => self.fs.stat(path, true)?,
                };
                create_attrs(id, &a)
            }
            SftpNum::SSH_FXP_SETSTAT => {
                let r: PathAttrs = read_sftp(p)?;
                let path = self.resolve(&r.path)?;
                self.fs.setstat(&path, &r.attrs)?;
                Self::ok(id)
            }
            SftpNum::SSH_FXP_FSETSTAT => {
                let r: FSetStat = read_sftp(p)?;
                match self.handles.get_mut(r.handle.0)? {
                    OpenHandle::File { file, .. } => self.fs.fsetstat(file, &r.attrs)?,
                    OpenHandle::Dir { path, .. } => self.fs.setstat(path, &r.attrs)?,
                }
                Self::ok(id)
            }
            SftpNum::SSH_FXP_READDIR => {
                let r: HandleReq = read_sftp(p)?;
                self.readdir(id, r.handle.0)
            }
            SftpNum::SSH_FXP_REMOVE => {
                let r: PathReq = read_sftp(p)?;
                let path = self.resolve(&r.path)?;
                debug!("remove {path}");
                self.fs.remove(&path)?;
                Self::ok(id)
            }
            SftpNum::SSH_FXP_MKDIR => {
                let r: PathAttrs = read_sftp(p)?;
                let path = self.resolve(&r.path)?;
                debug!("mkdir {path}");
                let mode = r.attrs.permissions.map(|m| m & 0o7777).unwrap_or(DEFAULT_DIR_MODE);
                self.fs.mkdir(&path, mode)?;
                Self::ok(id)
            }
            SftpNum::SSH_FXP_RMDIR => {
                let r: PathReq = read_sftp(p)?;
                let path = self.resolve(&r.path)?;
                debug!("rmdir {path}");
                self.fs.rmdir(&path)?;
                Self::ok(id)
            }
            SftpNum::SSH_FXP_REALPATH => {
                let r: PathReq = read_sftp(p)?;
                let path = self.resolve(&r.path)?;
                let e = NameEntry { filename: path.clone(), longname: path, ..Default::default() };
                create_name(&[e], id, self.config.max_packet)
            }
            SftpNum::SSH_FXP_RENAME => {
                let r: Rename = read_sftp(p)?;
                let old = self.resolve(&r.oldpath)?;
                let new = self.resolve(&r.newpath)?;
                debug!("rename {old} {new}");
                // an existing target is an error rather than replaced
                if self.fs.stat(&new, false).is_ok() {
                    debug!("{new} exists");
                    return Err(Error::Status { code: StatusCode::SSH_FX_FAILURE });
                }
                self.fs.rename(&old, &new)?;
                Self::ok(id)
            }
            ty => {
                let code = if ty.is_request() {
                    debug!("unsupported {ty:?}");
                    StatusCode::SSH_FX_OP_UNSUPPORTED
                } else {
                    debug!("{ty:?} isn't a request");
                    StatusCode::SSH_FX_BAD_MESSAGE
                };
                create_status(code, id, code.message(), "")
            }
        }
    }

    /// One entry per NAME reply. Once the directory is exhausted the
    /// handle only returns EOF.
    fn readdir(&mut self, id: u32, handle: &[u8]) -> Result<Vec<u8>> {
        let OpenHandle::Dir { dir, path, eof } = self.handles.get_mut(handle)? else {
            return Err(Error::BadHandle);
        };
        if *eof {
            trace!("readdir {path} already at eof");
            return Self::eof(id);
        }
        let Some(filename) = self.fs.readdir(dir)? else {
            *eof = true;
            return Self::eof(id);
        };
        let full = clean_path(path, &filename);
        let attrs = self.fs.stat(&full, false).unwrap_or_else(|e| {
            debug!("no attributes for {full}: {e:?}");
            Default::default()
        });
        let longname = create_long_name(&filename, &attrs);
        let e = NameEntry { filename, longname, attrs };
        create_name(&[e], id, self.config.max_packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{encode_packet, Attrs, FileHandle, Status, SFTP_HEADER_SZ};
    use crate::sftpwire::read_sftp_exact;
    use crate::test::*;

    fn tmpdir() -> (tempfile::TempDir, String) {
        let t = tempfile::tempdir().unwrap();
        let p = t.path().to_string_lossy().into_owned();
        (t, p)
    }

    /// A server that has accepted INIT, and the raw client end
    fn raw_server(dir: &str) -> (MemStream, Server<MemStream>) {
        crate::sftplog::init_test_log();
        let (mut a, b) = pipe();
        let mut s = Server::new(b, SftpConfig::new().default_dir(dir)).unwrap();
        a.push_raw(&create_version(SftpNum::SSH_FXP_INIT, 3, &[]).unwrap());
        s.accept().unwrap();
        (a, s)
    }

    /// Status code of the last reply sent by `s`
    fn last_status(s: &mut Server<MemStream>) -> StatusCode {
        let sent = s.stream_mut().sent().to_vec();
        let mut pos = 0;
        let mut last = None;
        while pos < sent.len() {
            let h = PacketHeader::parse(&sent[pos..]).unwrap();
            let end = pos + SFTP_HEADER_SZ + h.payload_len();
            last = Some((h, pos + SFTP_HEADER_SZ, end));
            pos = end;
        }
        let (h, start, end) = last.unwrap();
        assert_eq!(h.ty, SftpNum::SSH_FXP_STATUS);
        let st: Status = read_sftp_exact(&sent[start..end]).unwrap();
        st.code
    }

    #[test]
    fn clean_paths() {
        assert_eq!(clean_path("/home/u", "file"), "/home/u/file");
        assert_eq!(clean_path("/home/u", "."), "/home/u");
        assert_eq!(clean_path("/home/u", ""), "/home/u");
        assert_eq!(clean_path("/home/u", "../v//x/./y"), "/home/v/x/y");
        assert_eq!(clean_path("/home/u", "/etc/../tmp/"), "/tmp");
        assert_eq!(clean_path("/", "../../.."), "/");
        assert_eq!(clean_path("/a", "/../../b"), "/b");
        assert_eq!(clean_path("/", "."), "/");
    }

    #[test]
    fn not_initialized() {
        let (mut a, b) = pipe();
        let mut s = Server::new(b, SftpConfig::new()).unwrap();
        assert!(matches!(s.process(), Err(Error::NotInitialized)));
        a.push_raw(&encode_packet(SftpNum::SSH_FXP_STAT, 0, &PathReq { path: "/".into() }).unwrap());
        assert!(matches!(s.accept(), Err(Error::NotInitialized)));
        // nothing sent
        assert!(s.stream_mut().sent().is_empty());
    }

    #[test]
    fn accept_idempotent() {
        let (mut a, b) = pipe();
        let mut s = Server::new(b, SftpConfig::new()).unwrap();
        assert!(matches!(s.accept(), Err(Error::WouldBlock)));
        a.push_raw(&create_version(SftpNum::SSH_FXP_INIT, 3, &[]).unwrap());
        s.accept().unwrap();
        s.accept().unwrap();
        assert_eq!(s.stream_mut().sent(), [0, 0, 0, 5, 2, 0, 0, 0, 3]);
        assert!(matches!(s.process(), Err(Error::WouldBlock)));
    }

    #[test]
    fn unsupported_requests() {
        let (_t, dir) = tmpdir();
        let (mut a, mut s) = raw_server(&dir);
        for ty in [SftpNum::SSH_FXP_READLINK, SftpNum::SSH_FXP_SYMLINK, SftpNum::SSH_FXP_EXTENDED] {
            a.push_raw(&encode_packet(ty, 4, &PathReq { path: "x".into() }).unwrap());
            service(&mut s);
            assert_eq!(last_status(&mut s), StatusCode::SSH_FX_OP_UNSUPPORTED);
        }
        // a second INIT isn't a request
        a.push_raw(&create_version(SftpNum::SSH_FXP_INIT, 3, &[]).unwrap());
        service(&mut s);
        assert_eq!(last_status(&mut s), StatusCode::SSH_FX_BAD_MESSAGE);
    }

    #[test]
    fn malformed_request() {
        let (_t, dir) = tmpdir();
        let (mut a, mut s) = raw_server(&dir);
        // a STAT with a truncated path
        a.push_raw(&[0, 0, 0, 7, 17, 0, 0, 0, 1, 0, 9]);
        service(&mut s);
        assert_eq!(last_status(&mut s), StatusCode::SSH_FX_BAD_MESSAGE);
    }

    #[test]
    fn pending_reply_then_next_request() {
        let (_t, dir) = tmpdir();
        let (mut a, mut s) = raw_server(&dir);
        let start = s.stream_mut().sent().len();
        // a reply left unsent by an earlier call
        s.tx = ScratchBuffer::from_vec(create_status(StatusCode::SSH_FX_OK, 1, "", "").unwrap());
        a.push_raw(&encode_packet(SftpNum::SSH_FXP_STAT, 2, &PathReq { path: ".".into() }).unwrap());

        // one call flushes and handles the request
        s.process().unwrap();
        assert!(matches!(s.process(), Err(Error::WouldBlock)));

        let sent = s.stream_mut().sent()[start..].to_vec();
        let mut replies = vec![];
        let mut pos = 0;
        while pos < sent.len() {
            let h = PacketHeader::parse(&sent[pos..]).unwrap();
            replies.push((h.ty, h.req_id));
            pos += SFTP_HEADER_SZ + h.payload_len();
        }
        assert_eq!(replies, [(SftpNum::SSH_FXP_STATUS, 1), (SftpNum::SSH_FXP_ATTRS, 2)]);
    }

    #[test]
    fn oversize_request() {
        let (_t, dir) = tmpdir();
        let (mut a, mut s) = raw_server(&dir);
        a.push_raw(&[0, 2, 0, 0, 17, 0, 0, 0, 1]);
        assert!(matches!(s.process(), Err(Error::BigPacket { .. })));
    }

    #[test]
    fn bad_handles() {
        let (_t, dir) = tmpdir();
        let (mut c, mut s) = std_connected(&dir);
        let fh = FileHandle::new(&[0, 0, 0, 0, 0, 0, 0, 9]).unwrap();
        let r = drive(&mut s, || c.close(&fh));
        assert!(matches!(r, Err(Error::Status { code: StatusCode::SSH_FX_FAILURE })));
        let r = drive(&mut s, || c.fstat(&FileHandle::new(b"junk").unwrap()));
        assert!(matches!(r, Err(Error::Status { code: StatusCode::SSH_FX_FAILURE })));

        // a directory handle can't be read
        let dh = drive(&mut s, || c.opendir(&dir)).unwrap();
        let r = drive(&mut s, || c.read(&dh, 0, &mut [0u8; 10]));
        assert!(matches!(r, Err(Error::Status { code: StatusCode::SSH_FX_FAILURE })));
    }

    // Scenario: READDIR after EOF doesn't touch the filesystem
    #[test]
    fn readdir_after_eof() -> anyhow::Result<()> {
        let (_t, dir) = tmpdir();
        std::fs::write(format!("{dir}/a"), b"")?;
        std::fs::write(format!("{dir}/b"), b"")?;
        let fs = FaultFs::new();
        let reads = fs.readdirs.clone();
        let (mut c, mut s) = connected(&dir, fs);

        let h = drive(&mut s, || c.opendir("."))?;
        let mut n = 0;
        while let Some(v) = drive(&mut s, || c.readdir(&h))? {
            assert_eq!(v.len(), 1);
            n += 1;
        }
        assert_eq!(n, 2);
        // two entries and the end
        assert_eq!(reads.get(), 3);

        assert_eq!(drive(&mut s, || c.readdir(&h))?, None);
        assert_eq!(drive(&mut s, || c.readdir(&h))?, None);
        assert_eq!(reads.get(), 3);
        drive(&mut s, || c.close(&h))?;
        Ok(())
    }

    #[test]
    fn handle_limit() -> anyhow::Result<()> {
        let (_t, dir) = tmpdir();
        std::fs::write(format!("{dir}/f"), b"")?;
        let conf = SftpConfig::new().default_dir(&dir).max_open_handles(2);
        let (mut c, mut s) = connected_conf(conf, crate::fs::StdFilesystem::new());
        let a = drive(&mut s, || c.open("f", OpenFlags::READ, &Attrs::default()))?;
        drive(&mut s, || c.opendir("."))?;
        let r = drive(&mut s, || c.open("f", OpenFlags::READ, &Attrs::default()));
        assert!(matches!(r, Err(Error::Status { code: StatusCode::SSH_FX_FAILURE })));

        drive(&mut s, || c.close(&a))?;
        drive(&mut s, || c.open("f", OpenFlags::READ, &Attrs::default()))?;
        assert_eq!(s.handles.len(), 2);
        s.close();
        assert_eq!(s.handles.len(), 0);
        Ok(())
    }

    #[test]
    fn relative_paths_and_modes() -> anyhow::Result<()> {
        let (_t, dir) = tmpdir();
        let (mut c, mut s) = std_connected(&dir);
        let flags = OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::EXCL;
        let attrs = Attrs { permissions: Some(0o600), ..Default::default() };
        let h = drive(&mut s, || c.open("sub/.././new", flags, &attrs))?;
        drive(&mut s, || c.close(&h))?;
        let a = drive(&mut s, || c.stat("new"))?;
        assert!(a.is_regular());
        #[cfg(unix)]
        assert_eq!(a.permissions.unwrap() & 0o777, 0o600);

        // exclusive create of an existing file
        let r = drive(&mut s, || c.open("new", flags, &attrs));
        assert!(matches!(r, Err(Error::Status { code: StatusCode::SSH_FX_FAILURE })));
        Ok(())
    }

    #[test]
    fn rename_existing_target() -> anyhow::Result<()> {
        let (_t, dir) = tmpdir();
        std::fs::write(format!("{dir}/a"), b"a")?;
        std::fs::write(format!("{dir}/b"), b"b")?;
        let (mut c, mut s) = std_connected(&dir);
        let r = drive(&mut s, || c.rename("a", "b"));
        assert!(matches!(r, Err(Error::Status { code: StatusCode::SSH_FX_FAILURE })));
        assert_eq!(std::fs::read(format!("{dir}/b"))?, b"b");
        Ok(())
    }

    #[test]
    fn read_past_end() -> anyhow::Result<()> {
        let (_t, dir) = tmpdir();
        std::fs::write(format!("{dir}/f"), b"abc")?;
        let (mut c, mut s) = std_connected(&dir);
        let h = drive(&mut s, || c.open("f", OpenFlags::READ, &Attrs::default()))?;
        let mut b = [0u8; 100];
        assert_eq!(drive(&mut s, || c.read(&h, 1, &mut b))?, 2);
        assert_eq!(&b[..2], b"bc");
        assert_eq!(drive(&mut s, || c.read(&h, 100, &mut b))?, 0);
        Ok(())
    }

    #[test]
    fn client_sees_closed_stream() {
        let (_t, dir) = tmpdir();
        let (mut c, mut s) = std_connected(&dir);
        s.stream_mut().close();
        let r = c.stat("x");
        assert!(matches!(r, Err(Error::ConnectionLost)));
    }
}
