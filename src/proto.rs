//! SFTP v3 packet definitions
//!
//! As defined by [draft-ietf-secsh-filexfer-02](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-02).
//! A packet is `u32 length`, `u8 type`, `u32 request id` then a type specific
//! payload. The length counts everything after itself. INIT and VERSION carry
//! the protocol version in place of the request id.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use num_enum::FromPrimitive;
use pretty_hex::PrettyHex;
use sunset_sshwire_derive::{SSHDecode, SSHEncode};

use crate::buffer::ScratchBuffer;
use crate::config::MAX_HANDLE;
use crate::sftpwire::{
    lossy, read_sftp, BinString, Offset, SSHDecode, SSHEncode, SSHSink, SSHSource, TextString,
    WireError, WireResult,
};
use crate::stream::Stream;

/// Size of the length field at the start of every packet
pub const SFTP_FIELD_LEN_LENGTH: usize = 4;

/// Length, type and request id
pub const SFTP_HEADER_SZ: usize = 9;

/// Type and request id, counted by the length field
const SFTP_TYPE_ID_SZ: usize = 5;

/// Space needed around the data of a maximum size WRITE request,
/// excluding the length field.
pub const SFTP_WRITE_OVERHEAD: usize = SFTP_TYPE_ID_SZ + 4 + MAX_HANDLE + 8 + 4;

/// SFTP packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum SftpNum {
    SSH_FXP_INIT = 1,
    SSH_FXP_VERSION = 2,
    SSH_FXP_OPEN = 3,
    SSH_FXP_CLOSE = 4,
    SSH_FXP_READ = 5,
    SSH_FXP_WRITE = 6,
    SSH_FXP_LSTAT = 7,
    SSH_FXP_FSTAT = 8,
    SSH_FXP_SETSTAT = 9,
    SSH_FXP_FSETSTAT = 10,
    SSH_FXP_OPENDIR = 11,
    SSH_FXP_READDIR = 12,
    SSH_FXP_REMOVE = 13,
    SSH_FXP_MKDIR = 14,
    SSH_FXP_RMDIR = 15,
    SSH_FXP_REALPATH = 16,
    SSH_FXP_STAT = 17,
    SSH_FXP_RENAME = 18,
    SSH_FXP_READLINK = 19,
    SSH_FXP_SYMLINK = 20,
    SSH_FXP_STATUS = 101,
    SSH_FXP_HANDLE = 102,
    SSH_FXP_DATA = 103,
    SSH_FXP_NAME = 104,
    SSH_FXP_ATTRS = 105,
    SSH_FXP_EXTENDED = 200,
    SSH_FXP_EXTENDED_REPLY = 201,
    #[num_enum(catch_all)]
    Other(u8),
}

impl From<SftpNum> for u8 {
    fn from(n: SftpNum) -> u8 {
        match n {
            SftpNum::SSH_FXP_INIT => 1,
            SftpNum::SSH_FXP_VERSION => 2,
            SftpNum::SSH_FXP_OPEN => 3,
            SftpNum::SSH_FXP_CLOSE => 4,
            SftpNum::SSH_FXP_READ => 5,
            SftpNum::SSH_FXP_WRITE => 6,
            SftpNum::SSH_FXP_LSTAT => 7,
            SftpNum::SSH_FXP_FSTAT => 8,
            SftpNum::SSH_FXP_SETSTAT => 9,
            SftpNum::SSH_FXP_FSETSTAT => 10,
            SftpNum::SSH_FXP_OPENDIR => 11,
            SftpNum::SSH_FXP_READDIR => 12,
            SftpNum::SSH_FXP_REMOVE => 13,
            SftpNum::SSH_FXP_MKDIR => 14,
            SftpNum::SSH_FXP_RMDIR => 15,
            SftpNum::SSH_FXP_REALPATH => 16,
            SftpNum::SSH_FXP_STAT => 17,
            SftpNum::SSH_FXP_RENAME => 18,
            SftpNum::SSH_FXP_READLINK => 19,
            SftpNum::SSH_FXP_SYMLINK => 20,
            SftpNum::SSH_FXP_STATUS => 101,
            SftpNum::SSH_FXP_HANDLE => 102,
            SftpNum::SSH_FXP_DATA => 103,
            SftpNum::SSH_FXP_NAME => 104,
            SftpNum::SSH_FXP_ATTRS => 105,
            SftpNum::SSH_FXP_EXTENDED => 200,
            SftpNum::SSH_FXP_EXTENDED_REPLY => 201,
            SftpNum::Other(number) => number,
        }
    }
}

impl SftpNum {
    pub fn is_request(&self) -> bool {
        (3..=20).contains(&u8::from(*self)) || *self == SftpNum::SSH_FXP_EXTENDED
    }

    pub fn is_response(&self) -> bool {
        (101..=105).contains(&u8::from(*self)) || *self == SftpNum::SSH_FXP_EXTENDED_REPLY
    }
}

impl SSHEncode for SftpNum {
    fn enc(&self, s: &mut dyn SSHSink) -> WireResult<()> {
        u8::from(*self).enc(s)
    }
}

impl<'de> SSHDecode<'de> for SftpNum {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        Ok(SftpNum::from(u8::dec(s)?))
    }
}

/// Status codes carried by SSH_FXP_STATUS
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
#[allow(non_camel_case_types)]
pub enum StatusCode {
    SSH_FX_OK = 0,
    SSH_FX_EOF = 1,
    SSH_FX_NO_SUCH_FILE = 2,
    SSH_FX_PERMISSION_DENIED = 3,
    SSH_FX_FAILURE = 4,
    SSH_FX_BAD_MESSAGE = 5,
    SSH_FX_NO_CONNECTION = 6,
    SSH_FX_CONNECTION_LOST = 7,
    SSH_FX_OP_UNSUPPORTED = 8,
    #[num_enum(catch_all)]
    Other(u32),
}

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> u32 {
        match c {
            StatusCode::SSH_FX_OK => 0,
            StatusCode::SSH_FX_EOF => 1,
            StatusCode::SSH_FX_NO_SUCH_FILE => 2,
            StatusCode::SSH_FX_PERMISSION_DENIED => 3,
            StatusCode::SSH_FX_FAILURE => 4,
            StatusCode::SSH_FX_BAD_MESSAGE => 5,
            StatusCode::SSH_FX_NO_CONNECTION => 6,
            StatusCode::SSH_FX_CONNECTION_LOST => 7,
            StatusCode::SSH_FX_OP_UNSUPPORTED => 8,
            StatusCode::Other(c) => c,
        }
    }
}

impl StatusCode {
    /// Default reason text sent with a STATUS reply
    pub fn message(&self) -> &'static str {
        match self {
            StatusCode::SSH_FX_OK => "Success",
            StatusCode::SSH_FX_EOF => "End of file",
            StatusCode::SSH_FX_NO_SUCH_FILE => "No such file",
            StatusCode::SSH_FX_PERMISSION_DENIED => "Permission denied",
            StatusCode::SSH_FX_FAILURE => "Failure",
            StatusCode::SSH_FX_BAD_MESSAGE => "Bad message",
            StatusCode::SSH_FX_NO_CONNECTION => "No connection",
            StatusCode::SSH_FX_CONNECTION_LOST => "Connection lost",
            StatusCode::SSH_FX_OP_UNSUPPORTED => "Operation unsupported",
            StatusCode::Other(_) => "Unknown error",
        }
    }

    /// Maps a local error to the status reported to a peer
    pub fn from_error(e: &Error) -> Self {
        match e {
            Error::FileNotFound => StatusCode::SSH_FX_NO_SUCH_FILE,
            Error::PermissionDenied => StatusCode::SSH_FX_PERMISSION_DENIED,
            Error::Status { code } => *code,
            Error::SftpProtoError | Error::RanOut | Error::BadString => {
                StatusCode::SSH_FX_BAD_MESSAGE
            }
            _ => StatusCode::SSH_FX_FAILURE,
        }
    }
}

impl SSHEncode for StatusCode {
    fn enc(&self, s: &mut dyn SSHSink) -> WireResult<()> {
        u32::from(*self).enc(s)
    }
}

impl<'de> SSHDecode<'de> for StatusCode {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        Ok(StatusCode::from(u32::dec(s)?))
    }
}

/// `pflags` of SSH_FXP_OPEN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const READ: OpenFlags = OpenFlags(0x01);
    pub const WRITE: OpenFlags = OpenFlags(0x02);
    pub const APPEND: OpenFlags = OpenFlags(0x04);
    pub const CREAT: OpenFlags = OpenFlags(0x08);
    pub const TRUNC: OpenFlags = OpenFlags(0x10);
    pub const EXCL: OpenFlags = OpenFlags(0x20);

    pub fn contains(&self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

/// Attribute presence flags
#[repr(u32)]
#[allow(non_camel_case_types)]
pub enum AttrsFlags {
    SSH_FILEXFER_ATTR_SIZE = 0x01,
    SSH_FILEXFER_ATTR_UIDGID = 0x02,
    SSH_FILEXFER_ATTR_PERMISSIONS = 0x04,
    SSH_FILEXFER_ATTR_ACMODTIME = 0x08,
    SSH_FILEXFER_ATTR_EXTENDED = 0x80000000,
}

impl core::ops::AddAssign<AttrsFlags> for u32 {
    fn add_assign(&mut self, other: AttrsFlags) {
        *self |= other as u32;
    }
}

impl core::ops::BitAnd<AttrsFlags> for u32 {
    type Output = u32;

    fn bitand(self, rhs: AttrsFlags) -> Self::Output {
        self & rhs as u32
    }
}

// File type bits of `permissions`, as POSIX st_mode
pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;

/// An extension name/data pair, in attributes or the version exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtPair {
    pub name: String,
    pub data: Vec<u8>,
}

impl SSHEncode for ExtPair {
    fn enc(&self, s: &mut dyn SSHSink) -> WireResult<()> {
        TextString::from(self.name.as_str()).enc(s)?;
        BinString(&self.data).enc(s)
    }
}

impl<'de> SSHDecode<'de> for ExtPair {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let name = lossy(&TextString::dec(s)?);
        let data = BinString::dec(s)?.0.to_vec();
        Ok(ExtPair { name, data })
    }
}

/// File attributes
///
/// The wire flags are derived from which fields are set. `uid`/`gid` and
/// `atime`/`mtime` travel as pairs, a missing half is sent as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attrs {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub permissions: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
    pub extended: Vec<ExtPair>,
}

impl Attrs {
    pub fn flags(&self) -> u32 {
        let mut flags: u32 = 0;
        if self.size.is_some() {
            flags += AttrsFlags::SSH_FILEXFER_ATTR_SIZE
        }
        if self.uid.is_some() || self.gid.is_some() {
            flags += AttrsFlags::SSH_FILEXFER_ATTR_UIDGID
        }
        if self.permissions.is_some() {
            flags += AttrsFlags::SSH_FILEXFER_ATTR_PERMISSIONS
        }
        if self.atime.is_some() || self.mtime.is_some() {
            flags += AttrsFlags::SSH_FILEXFER_ATTR_ACMODTIME
        }
        if !self.extended.is_empty() {
            flags += AttrsFlags::SSH_FILEXFER_ATTR_EXTENDED
        }
        flags
    }

    /// Encoded length in bytes
    pub fn wire_len(&self) -> usize {
        let flags = self.flags();
        let mut l = 4;
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_SIZE != 0 {
            l += 8;
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_UIDGID != 0 {
            l += 8;
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_PERMISSIONS != 0 {
            l += 4;
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_ACMODTIME != 0 {
            l += 8;
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_EXTENDED != 0 {
            l += 4;
            l += self.extended.iter().map(|e| 8 + e.name.len() + e.data.len()).sum::<usize>();
        }
        l
    }

    pub fn file_type(&self) -> Option<u32> {
        self.permissions.map(|p| p & S_IFMT)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(S_IFDIR)
    }

    pub fn is_regular(&self) -> bool {
        self.file_type() == Some(S_IFREG)
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == Some(S_IFLNK)
    }
}

impl SSHEncode for Attrs {
    fn enc(&self, s: &mut dyn SSHSink) -> WireResult<()> {
        let flags = self.flags();
        flags.enc(s)?;

        // Order matters, it is interpreted together with the flags
        if let Some(value) = self.size {
            Offset(value).enc(s)?
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_UIDGID != 0 {
            self.uid.unwrap_or(0).enc(s)?;
            self.gid.unwrap_or(0).enc(s)?;
        }
        if let Some(value) = self.permissions.as_ref() {
            value.enc(s)?
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_ACMODTIME != 0 {
            self.atime.unwrap_or(0).enc(s)?;
            self.mtime.unwrap_or(0).enc(s)?;
        }
        if !self.extended.is_empty() {
            let count: u32 = self.extended.len().try_into().map_err(|_| WireError::NoRoom)?;
            count.enc(s)?;
            for e in self.extended.iter() {
                e.enc(s)?;
            }
        }
        Ok(())
    }
}

impl<'de> SSHDecode<'de> for Attrs {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let mut attrs = Attrs::default();
        let flags = u32::dec(s)?;
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_SIZE != 0 {
            attrs.size = Some(Offset::dec(s)?.0);
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_UIDGID != 0 {
            attrs.uid = Some(u32::dec(s)?);
            attrs.gid = Some(u32::dec(s)?);
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_PERMISSIONS != 0 {
            attrs.permissions = Some(u32::dec(s)?);
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_ACMODTIME != 0 {
            attrs.atime = Some(u32::dec(s)?);
            attrs.mtime = Some(u32::dec(s)?);
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_EXTENDED != 0 {
            let count = u32::dec(s)?;
            // count isn't trusted for allocation, a short packet runs out first
            for _ in 0..count {
                attrs.extended.push(ExtPair::dec(s)?);
            }
        }
        Ok(attrs)
    }
}

/// An opaque handle, as returned by OPEN or OPENDIR
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct FileHandle(heapless::Vec<u8, MAX_HANDLE>);

impl FileHandle {
    /// Fails with [`Error::BadHandle`] when longer than [`MAX_HANDLE`]
    pub fn new(b: &[u8]) -> Result<Self> {
        heapless::Vec::from_slice(b).map(FileHandle).map_err(|_| {
            debug!("handle length {} too long", b.len());
            Error::BadHandle
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl core::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "FileHandle({:?})", self.0.hex_dump())
    }
}

impl SSHEncode for FileHandle {
    fn enc(&self, s: &mut dyn SSHSink) -> WireResult<()> {
        BinString(&self.0).enc(s)
    }
}

// Requests

#[derive(Debug, Clone, PartialEq, SSHEncode, SSHDecode)]
pub struct Open<'a> {
    pub filename: TextString<'a>,
    pub pflags: u32,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq, SSHEncode, SSHDecode)]
pub struct Read<'a> {
    pub handle: BinString<'a>,
    pub offset: Offset,
    pub len: u32,
}

/// SSH_FXP_WRITE. The client sends the fixed part followed by the data
/// bytes without copying, see [`WriteHeader`].
#[derive(Debug, Clone, PartialEq, SSHEncode, SSHDecode)]
pub struct Write<'a> {
    pub handle: BinString<'a>,
    pub offset: Offset,
    pub data: BinString<'a>,
}

/// The part of SSH_FXP_WRITE preceding the data bytes
#[derive(Debug, Clone, PartialEq, SSHEncode, SSHDecode)]
pub struct WriteHeader<'a> {
    pub handle: BinString<'a>,
    pub offset: Offset,
    pub data_len: u32,
}

/// Requests carrying only a path: LSTAT, STAT, OPENDIR, REMOVE,
/// RMDIR, REALPATH, READLINK
#[derive(Debug, Clone, PartialEq, SSHEncode, SSHDecode)]
pub struct PathReq<'a> {
    pub path: TextString<'a>,
}

/// Requests carrying only a handle: CLOSE, FSTAT, READDIR
#[derive(Debug, Clone, PartialEq, SSHEncode, SSHDecode)]
pub struct HandleReq<'a> {
    pub handle: BinString<'a>,
}

/// SETSTAT and MKDIR
#[derive(Debug, Clone, PartialEq, SSHEncode, SSHDecode)]
pub struct PathAttrs<'a> {
    pub path: TextString<'a>,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq, SSHEncode, SSHDecode)]
pub struct FSetStat<'a> {
    pub handle: BinString<'a>,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq, SSHEncode, SSHDecode)]
pub struct Rename<'a> {
    pub oldpath: TextString<'a>,
    pub newpath: TextString<'a>,
}

// Responses

/// SSH_FXP_STATUS
///
/// Some early servers omit the message and language, they decode as empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Status<'a> {
    pub code: StatusCode,
    pub message: TextString<'a>,
    pub lang: TextString<'a>,
}

impl SSHEncode for Status<'_> {
    fn enc(&self, s: &mut dyn SSHSink) -> WireResult<()> {
        self.code.enc(s)?;
        self.message.enc(s)?;
        self.lang.enc(s)
    }
}

impl<'de> SSHDecode<'de> for Status<'de> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let code = StatusCode::dec(s)?;
        let message = TextString::dec(s).unwrap_or(TextString(&[]));
        let lang = TextString::dec(s).unwrap_or(TextString(&[]));
        Ok(Status { code, message, lang })
    }
}

/// One entry of a SSH_FXP_NAME reply
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NameEntry {
    pub filename: String,
    /// An "ls -l" style line. Informational only, clients shouldn't parse it.
    pub longname: String,
    pub attrs: Attrs,
}

impl SSHEncode for NameEntry {
    fn enc(&self, s: &mut dyn SSHSink) -> WireResult<()> {
        TextString::from(self.filename.as_str()).enc(s)?;
        TextString::from(self.longname.as_str()).enc(s)?;
        self.attrs.enc(s)
    }
}

impl<'de> SSHDecode<'de> for NameEntry {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let filename = lossy(&TextString::dec(s)?);
        let longname = lossy(&TextString::dec(s)?);
        let attrs = Attrs::dec(s)?;
        Ok(NameEntry { filename, longname, attrs })
    }
}

/// The entries of a SSH_FXP_NAME reply
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Names(pub Vec<NameEntry>);

impl SSHEncode for Names {
    fn enc(&self, s: &mut dyn SSHSink) -> WireResult<()> {
        let count: u32 = self.0.len().try_into().map_err(|_| WireError::NoRoom)?;
        count.enc(s)?;
        for e in self.0.iter() {
            e.enc(s)?;
        }
        Ok(())
    }
}

impl<'de> SSHDecode<'de> for Names {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let count = u32::dec(s)?;
        let mut v = Vec::new();
        for _ in 0..count {
            v.push(NameEntry::dec(s)?);
        }
        Ok(Names(v))
    }
}

/// Fixed size packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Length field, counts type, id and payload
    pub len: u32,
    pub ty: SftpNum,
    /// Request id, or the protocol version for INIT and VERSION
    pub req_id: u32,
}

impl<'de> SSHDecode<'de> for PacketHeader {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let len = u32::dec(s)?;
        let ty = SftpNum::dec(s)?;
        let req_id = u32::dec(s)?;
        Ok(Self { len, ty, req_id })
    }
}

impl PacketHeader {
    /// Parses the first [`SFTP_HEADER_SZ`] bytes of `b`
    pub fn parse(b: &[u8]) -> Result<Self> {
        let h: Self = read_sftp(b)?;
        if (h.len as usize) < SFTP_TYPE_ID_SZ {
            debug!("bad packet length {}", h.len);
            return Err(Error::SftpProtoError);
        }
        Ok(h)
    }

    /// Length of the payload following the header
    pub fn payload_len(&self) -> usize {
        self.len as usize - SFTP_TYPE_ID_SZ
    }
}

/// Writes a header for a packet with `payload_len` bytes following it
/// into the start of `out`.
pub fn set_header(req_id: u32, ty: SftpNum, payload_len: usize, out: &mut [u8]) -> Result<()> {
    if out.len() < SFTP_HEADER_SZ {
        return Err(Error::NoRoom);
    }
    let len: u32 =
        (payload_len + SFTP_TYPE_ID_SZ).try_into().map_err(|_| Error::BigPacket { size: payload_len })?;
    out[..4].copy_from_slice(&len.to_be_bytes());
    out[4] = ty.into();
    out[5..9].copy_from_slice(&req_id.to_be_bytes());
    Ok(())
}

/// Writes a packet with a single length prefixed `data` payload into `out`,
/// returning the total length.
pub fn create_packet(ty: SftpNum, req_id: u32, out: &mut [u8], data: &[u8]) -> Result<usize> {
    let total = SFTP_HEADER_SZ + 4 + data.len();
    if out.len() < total {
        return Err(Error::NoRoom);
    }
    set_header(req_id, ty, 4 + data.len(), out)?;
    crate::sftpwire::write_sftp(&mut out[SFTP_HEADER_SZ..], &BinString(data))?;
    Ok(total)
}

/// Encodes a whole packet into a new buffer
pub fn encode_packet<P>(ty: SftpNum, req_id: u32, payload: &P) -> Result<Vec<u8>>
where
    P: SSHEncode + ?Sized,
{
    let mut v = vec![0u8; SFTP_HEADER_SZ];
    crate::sftpwire::encode_vec(&mut v, payload)?;
    let plen = v.len() - SFTP_HEADER_SZ;
    set_header(req_id, ty, plen, &mut v)?;
    trace!("encoded {ty:?} id {req_id} {:?}", v.hex_dump());
    Ok(v)
}

/// Reads a packet header from `stream`.
///
/// `buf` holds the partial header between calls, it is resized to
/// [`SFTP_HEADER_SZ`] if it is empty. Returns [`Error::WouldBlock`] until
/// the whole header has arrived.
pub fn get_header<S: Stream>(buf: &mut ScratchBuffer, stream: &mut S) -> Result<PacketHeader> {
    if buf.is_empty() {
        buf.create(SFTP_HEADER_SZ);
    }
    if buf.size() != SFTP_HEADER_SZ {
        return Error::bug_msg("header buffer size");
    }
    buf.read(stream)?;
    let h = PacketHeader::parse(buf.filled())?;
    trace!("got header {h:?}");
    Ok(h)
}
