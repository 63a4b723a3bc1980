//! Builders for server replies.
//!
//! Each builder encodes a complete packet in a single pass into a new
//! `Vec`, which is then handed to a [`ScratchBuffer`](crate::buffer::ScratchBuffer)
//! for sending.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use crate::proto::{
    encode_packet, set_header, Attrs, ExtPair, FileHandle, NameEntry, SftpNum, Status,
    StatusCode, SFTP_FIELD_LEN_LENGTH, SFTP_HEADER_SZ, S_IFDIR, S_IFLNK, S_IFMT,
};
use crate::sftpwire::{encode_vec, TextString};

/// Length of a DATA packet's header and data length field
pub const DATA_HEADER_SZ: usize = SFTP_HEADER_SZ + SFTP_FIELD_LEN_LENGTH;

pub fn create_status(code: StatusCode, req_id: u32, reason: &str, lang: &str) -> Result<Vec<u8>> {
    let st = Status { code, message: TextString::from(reason), lang: TextString::from(lang) };
    encode_packet(SftpNum::SSH_FXP_STATUS, req_id, &st)
}

/// Builds a NAME reply.
///
/// Fails with [`Error::NoRoom`] once the packet would exceed `max` bytes.
/// The size is checked as each entry is written.
pub fn create_name(entries: &[NameEntry], req_id: u32, max: usize) -> Result<Vec<u8>> {
    let mut v = vec![0u8; SFTP_HEADER_SZ];
    let count: u32 = entries.len().try_into().map_err(|_| Error::NoRoom)?;
    encode_vec(&mut v, &count)?;
    for e in entries {
        encode_vec(&mut v, e)?;
        if v.len() > max {
            debug!("name reply exceeds {max} at {:?}", e.filename);
            return Err(Error::NoRoom);
        }
    }
    let plen = v.len() - SFTP_HEADER_SZ;
    set_header(req_id, SftpNum::SSH_FXP_NAME, plen, &mut v)?;
    Ok(v)
}

pub fn create_handle(req_id: u32, handle: &FileHandle) -> Result<Vec<u8>> {
    encode_packet(SftpNum::SSH_FXP_HANDLE, req_id, handle)
}

pub fn create_attrs(req_id: u32, attrs: &Attrs) -> Result<Vec<u8>> {
    encode_packet(SftpNum::SSH_FXP_ATTRS, req_id, attrs)
}

/// Writes the header of a DATA packet carrying `data_len` bytes into
/// `out[..DATA_HEADER_SZ]`. The data follows directly.
pub fn create_data_header(req_id: u32, data_len: usize, out: &mut [u8]) -> Result<()> {
    if out.len() < DATA_HEADER_SZ {
        return Err(Error::NoRoom);
    }
    let l: u32 = data_len.try_into().map_err(|_| Error::BigPacket { size: data_len })?;
    set_header(req_id, SftpNum::SSH_FXP_DATA, 4 + data_len, out)?;
    out[SFTP_HEADER_SZ..DATA_HEADER_SZ].copy_from_slice(&l.to_be_bytes());
    Ok(())
}

/// VERSION or INIT. The version takes the place of the request id.
pub fn create_version(ty: SftpNum, version: u32, extensions: &[ExtPair]) -> Result<Vec<u8>> {
    let mut v = vec![0u8; SFTP_HEADER_SZ];
    for e in extensions {
        encode_vec(&mut v, e)?;
    }
    let plen = v.len() - SFTP_HEADER_SZ;
    set_header(version, ty, plen, &mut v)?;
    Ok(v)
}

fn perm_string(mode: u32) -> String {
    let mut s = String::with_capacity(10);
    s.push(match mode & S_IFMT {
        S_IFDIR => 'd',
        S_IFLNK => 'l',
        _ => '-',
    });
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}

#[cfg(feature = "calendar")]
fn date_string(mtime: u32) -> Option<String> {
    const MONTHS: [&str; 12] =
        ["Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"];
    let t = time::OffsetDateTime::from_unix_timestamp(mtime.into()).ok()?;
    let mon = MONTHS.get(usize::from(u8::from(t.month())) - 1)?;
    Some(format!("{mon} {:>2} {:02}:{:02}", t.day(), t.hour(), t.minute()))
}

#[cfg(not(feature = "calendar"))]
fn date_string(_mtime: u32) -> Option<String> {
    None
}

/// Formats a `ls -l` style line for a NAME entry.
///
/// The link count is always 1. With no attributes this is only the name.
pub fn create_long_name(filename: &str, attrs: &Attrs) -> String {
    if attrs.flags() == 0 {
        return filename.into();
    }
    let perm = perm_string(attrs.permissions.unwrap_or(0));
    let uid = attrs.uid.unwrap_or(0);
    let gid = attrs.gid.unwrap_or(0);
    let size = attrs.size.unwrap_or(0);
    match attrs.mtime.and_then(date_string) {
        Some(date) => format!("{perm} {:>3} {uid:<8} {gid:<8} {size:>8} {date} {filename}", 1),
        None => format!("{perm} {:>3} {uid:<8} {gid:<8} {size:>8} {filename}", 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{PacketHeader, S_IFREG};
    use crate::sftplog::init_test_log;
    use crate::proto::Names;
    use crate::sftpwire::{read_sftp, read_sftp_exact};

    fn body(p: &[u8]) -> (PacketHeader, &[u8]) {
        let h = PacketHeader::parse(p).unwrap();
        assert_eq!(h.payload_len(), p.len() - SFTP_HEADER_SZ);
        (h, &p[SFTP_HEADER_SZ..])
    }

    #[test]
    fn status_layout() {
        init_test_log();
        let p = create_status(StatusCode::SSH_FX_EOF, 9, "End", "en").unwrap();
        assert_eq!(
            p,
            [
                0, 0, 0, 22, 101, 0, 0, 0, 9, // header
                0, 0, 0, 1, // code
                0, 0, 0, 3, b'E', b'n', b'd', 0, 0, 0, 2, b'e', b'n',
            ]
        );
        let (h, b) = body(&p);
        assert_eq!(h.ty, SftpNum::SSH_FXP_STATUS);
        let st: Status = read_sftp_exact(b).unwrap();
        assert_eq!(st.code, StatusCode::SSH_FX_EOF);
        assert_eq!(st.message.as_str().unwrap(), "End");
    }

    #[test]
    fn name_entries() {
        let entries = [
            NameEntry { filename: "a".into(), longname: "la".into(), attrs: Attrs::default() },
            NameEntry {
                filename: "b".into(),
                longname: "lb".into(),
                attrs: Attrs { size: Some(3), ..Default::default() },
            },
        ];
        let p = create_name(&entries, 4, 1000).unwrap();
        let (h, b) = body(&p);
        assert_eq!(h.req_id, 4);
        let names: Names = read_sftp(b).unwrap();
        assert_eq!(names.0, entries);
    }

    #[test]
    fn name_too_big() {
        let e = NameEntry { filename: "x".repeat(100), ..Default::default() };
        assert!(matches!(create_name(&[e.clone()], 1, 50), Err(Error::NoRoom)));
        create_name(&[e], 1, 200).unwrap();
    }

    #[test]
    fn data_header() {
        let mut b = [0u8; DATA_HEADER_SZ];
        create_data_header(7, 10, &mut b).unwrap();
        assert_eq!(b, [0, 0, 0, 19, 103, 0, 0, 0, 7, 0, 0, 0, 10]);
    }

    #[test]
    fn version_packet() {
        let p = create_version(SftpNum::SSH_FXP_VERSION, 3, &[]).unwrap();
        assert_eq!(p, [0, 0, 0, 5, 2, 0, 0, 0, 3]);
        let ext = [ExtPair { name: "a".into(), data: b"1".to_vec() }];
        let p = create_version(SftpNum::SSH_FXP_VERSION, 3, &ext).unwrap();
        assert_eq!(body(&p).1, [0, 0, 0, 1, b'a', 0, 0, 0, 1, b'1']);
    }

    #[test]
    fn long_names() {
        assert_eq!(create_long_name("plain", &Attrs::default()), "plain");
        let a = Attrs {
            size: Some(1234),
            uid: Some(1000),
            gid: Some(100),
            permissions: Some(S_IFDIR | 0o755),
            ..Default::default()
        };
        assert_eq!(
            create_long_name("dir", &a),
            "drwxr-xr-x   1 1000     100          1234 dir"
        );
        let a = Attrs { permissions: Some(S_IFREG | 0o640), ..Default::default() };
        assert!(create_long_name("f", &a).starts_with("-rw-r----- "));
    }

    #[cfg(feature = "calendar")]
    #[test]
    fn long_name_date() {
        let a = Attrs {
            size: Some(10),
            uid: Some(0),
            gid: Some(0),
            permissions: Some(S_IFREG | 0o644),
            // 2023-11-14 22:13:20 UTC
            mtime: Some(1_700_000_000),
            atime: Some(0),
            ..Default::default()
        };
        assert_eq!(
            create_long_name("a.txt", &a),
            "-rw-r--r--   1 0        0              10 Nov 14 22:13 a.txt"
        );
    }
}
