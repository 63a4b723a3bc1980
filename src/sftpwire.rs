//! SFTP wire format reading/writing.
//!
//! SFTP packets use the SSH wire primitives from [`sunset::sshwire`]: big
//! endian integers and `u32` length prefixed strings. This module adds the
//! parts SFTP needs on top, `u64` file offsets, encoding into a growing
//! `Vec`, and decoding into crate [`Error`]s. Used in conjunction with the
//! [`proto`](crate::proto) packet definitions.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

pub use sunset::sshwire::{
    BinString, SSHDecode, SSHEncode, SSHSink, SSHSource, TextString, WireError, WireResult,
};

/// Decodes a `T` from the start of `b`. Trailing bytes are permitted.
pub fn read_sftp<'a, T: SSHDecode<'a>>(b: &'a [u8]) -> Result<T> {
    Ok(sunset::sshwire::read_ssh(b, None)?)
}

/// Decodes a `T` that must consume all of `b`.
///
/// `T`'s encoding must be canonical, the consumed length is taken from
/// encoding it again.
pub fn read_sftp_exact<'a, T>(b: &'a [u8]) -> Result<T>
where
    T: SSHDecode<'a> + SSHEncode,
{
    let t: T = read_sftp(b)?;
    let l = length_enc(&t)? as usize;
    if l != b.len() {
        trace!("decoded {l} of {} bytes", b.len());
        return Err(Error::SftpProtoError);
    }
    Ok(t)
}

/// Serializes `value` into `target`, returning the length written.
pub fn write_sftp<T: SSHEncode>(target: &mut [u8], value: &T) -> Result<usize> {
    Ok(sunset::sshwire::write_ssh(target, value)?)
}

/// Appends the serialized `value` to `out`.
pub fn encode_vec<T>(out: &mut Vec<u8>, value: &T) -> Result<()>
where
    T: SSHEncode + ?Sized,
{
    let mut s = EncodeVec { out };
    value.enc(&mut s)?;
    Ok(())
}

/// Returns `WireError::NoRoom` if larger than `u32`
pub fn length_enc<T>(value: &T) -> WireResult<u32>
where
    T: SSHEncode + ?Sized,
{
    let mut s = EncodeLen { pos: 0 };
    value.enc(&mut s)?;
    s.pos.try_into().map_err(|_| WireError::NoRoom)
}

/// Splits a length prefixed string off the front of `b`, returning it
/// and the rest. For walking a sequence whose count isn't sent, such as
/// the extensions following VERSION.
pub fn split_string(b: &[u8]) -> Result<(&[u8], &[u8])> {
    let s: BinString = read_sftp(b)?;
    let l = s.0.len();
    Ok((s.0, &b[4 + l..]))
}

struct EncodeVec<'a> {
    out: &'a mut Vec<u8>,
}

impl SSHSink for EncodeVec<'_> {
    fn push(&mut self, v: &[u8]) -> WireResult<()> {
        self.out.extend_from_slice(v);
        Ok(())
    }
}

struct EncodeLen {
    pos: usize,
}

impl SSHSink for EncodeLen {
    fn push(&mut self, v: &[u8]) -> WireResult<()> {
        self.pos += v.len();
        Ok(())
    }
}

/// A file offset or size.
///
/// SFTP v3 sends `uint64`, as the high then low `u32` halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Offset(pub u64);

impl Offset {
    pub fn from_halves(hi: u32, lo: u32) -> Self {
        Offset((u64::from(hi) << 32) | u64::from(lo))
    }

    pub fn hi(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn lo(&self) -> u32 {
        self.0 as u32
    }
}

impl SSHEncode for Offset {
    fn enc(&self, s: &mut dyn SSHSink) -> WireResult<()> {
        self.hi().enc(s)?;
        self.lo().enc(s)
    }
}

impl<'de> SSHDecode<'de> for Offset {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let hi = u32::dec(s)?;
        let lo = u32::dec(s)?;
        Ok(Offset::from_halves(hi, lo))
    }
}

/// Returns the string, replacing invalid UTF-8 sequences.
pub fn lossy(t: &TextString) -> String {
    String::from_utf8_lossy(t.0).into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::sftplog::init_test_log;
    use crate::sftpwire::*;

    #[test]
    fn string_prefix() {
        init_test_log();
        let mut buf = [0u8; 9];
        let l = write_sftp(&mut buf, &TextString::from("hello")).unwrap();
        assert_eq!(l, 9);
        assert_eq!(&buf, b"\x00\x00\x00\x05hello");
        assert_eq!(length_enc(&TextString::from("hello")).unwrap(), 9);

        let t: TextString = read_sftp(&buf).unwrap();
        assert_eq!(t.0, b"hello");
    }

    #[test]
    fn no_room() {
        let mut buf = [0u8; 8];
        assert!(matches!(
            write_sftp(&mut buf, &TextString::from("hello")),
            Err(Error::NoRoom)
        ));
    }

    #[test]
    fn ran_out() {
        // claims 6 bytes, has 5
        let buf = b"\x00\x00\x00\x06hello";
        let r: Result<BinString> = read_sftp(buf);
        assert!(matches!(r, Err(Error::RanOut)));
    }

    #[test]
    fn exact_rejects_trailing() {
        let buf = [0, 0, 0, 7, 1];
        let r: Result<u32> = read_sftp_exact(&buf);
        assert!(matches!(r, Err(Error::SftpProtoError)));
        let v: u32 = read_sftp(&buf).unwrap();
        assert_eq!(v, 7);
    }

    #[test]
    fn offsets_big_endian() {
        let mut v = vec![];
        encode_vec(&mut v, &0x01020304u32).unwrap();
        encode_vec(&mut v, &Offset(0x05060708090a0b0c)).unwrap();
        assert_eq!(v, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        let o: Offset = read_sftp(&v[4..]).unwrap();
        assert_eq!(o.0, 0x05060708090a0b0c);
        assert_eq!((o.hi(), o.lo()), (0x05060708, 0x090a0b0c));
    }

    #[test]
    fn split_strings() {
        let b = [0, 0, 0, 1, b'a', 0, 0, 0, 0, 9];
        let (a, rest) = split_string(&b).unwrap();
        assert_eq!(a, b"a");
        let (e, rest) = split_string(rest).unwrap();
        assert!(e.is_empty());
        assert_eq!(rest, [9]);
        assert!(matches!(split_string(rest), Err(Error::RanOut)));
    }

    #[test]
    fn text_lossy() {
        let t = TextString(&[b'a', 0xff, b'b']);
        assert!(t.as_str().is_err());
        assert_eq!(lossy(&t), "a\u{fffd}b");
    }
}
