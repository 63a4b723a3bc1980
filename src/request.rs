//! A single client request and its reply.
//!
//! [`Exchange`] holds everything needed to resume a request after
//! [`Error::WouldBlock`]: the encoded request, how much of it was sent,
//! and the partially received reply.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use crate::buffer::{send_slice, ScratchBuffer};
use crate::proto::{
    encode_packet, get_header, Attrs, FileHandle, NameEntry, Names, PacketHeader, SftpNum,
    Status, StatusCode, SFTP_HEADER_SZ,
};
use crate::sftpwire::{length_enc, lossy, read_sftp, read_sftp_exact, BinString, SSHEncode};
use crate::stream::Stream;

#[derive(Debug, Clone, Copy)]
enum Phase {
    /// Sending the buffered request
    Send,
    /// Sending trailing data passed by the caller
    SendTail,
    /// Receiving the reply header
    Header,
    /// Header received, the payload is still in the stream
    Reply(PacketHeader),
    /// Receiving the payload into the buffer
    Body(PacketHeader),
}

#[derive(Debug)]
pub(crate) struct Exchange {
    /// Request id the reply must carry. `None` for the version exchange.
    expect: Option<u32>,
    max_packet: usize,
    buf: ScratchBuffer,
    tail_idx: usize,
    phase: Phase,
}

impl Exchange {
    pub fn request<P>(ty: SftpNum, req_id: u32, payload: &P, max_packet: usize) -> Result<Self>
    where
        P: SSHEncode + ?Sized,
    {
        let p = encode_packet(ty, req_id, payload)?;
        Ok(Self::from_packet(p, Some(req_id), max_packet))
    }

    /// `packet` is a complete encoded request, or the start of one when
    /// the remainder is passed as `tail` when running.
    pub fn from_packet(packet: Vec<u8>, expect: Option<u32>, max_packet: usize) -> Self {
        Self {
            expect,
            max_packet,
            buf: ScratchBuffer::from_vec(packet),
            tail_idx: 0,
            phase: Phase::Send,
        }
    }

    /// Sends the request followed by `tail`, then waits for the reply header.
    ///
    /// `tail` must be the same on every call. Once the header has arrived it
    /// is returned again by later calls.
    pub fn header<S: Stream>(&mut self, stream: &mut S, tail: &[u8]) -> Result<PacketHeader> {
        loop {
            match self.phase {
                Phase::Send => {
                    self.buf.send(stream)?;
                    self.phase = Phase::SendTail;
                }
                Phase::SendTail => {
                    send_slice(stream, tail, &mut self.tail_idx)?;
                    self.buf.create(SFTP_HEADER_SZ);
                    self.phase = Phase::Header;
                }
                Phase::Header => {
                    let h = get_header(&mut self.buf, stream)?;
                    let reply_type = match self.expect {
                        Some(_) => h.ty.is_response(),
                        None => h.ty == SftpNum::SSH_FXP_VERSION,
                    };
                    if !reply_type {
                        return Err(unexpected(h.ty));
                    }
                    if let Some(expect) = self.expect {
                        if h.req_id != expect {
                            return Err(Error::ReqIdMismatch { expect, got: h.req_id });
                        }
                    }
                    if h.payload_len() > self.max_packet {
                        debug!("reply {:?} length {}", h.ty, h.payload_len());
                        return Err(Error::BigPacket { size: h.payload_len() });
                    }
                    self.phase = Phase::Reply(h);
                }
                Phase::Reply(h) | Phase::Body(h) => return Ok(h),
            }
        }
    }

    /// Runs the exchange to completion, returning the reply header and payload.
    pub fn reply<S: Stream>(&mut self, stream: &mut S, tail: &[u8]) -> Result<(PacketHeader, &[u8])> {
        let h = self.header(stream, tail)?;
        if let Phase::Reply(h) = self.phase {
            self.buf.create(h.payload_len());
            self.phase = Phase::Body(h);
        }
        self.buf.read(stream)?;
        Ok((h, self.buf.data()))
    }
}

pub(crate) fn unexpected(ty: SftpNum) -> Error {
    debug!("unexpected reply {ty:?}");
    Error::UnexpectedPacket { number: ty.into() }
}

/// Maps a failure status. `distinguish` reports permission failures as
/// [`Error::PermissionDenied`].
pub(crate) fn status_error(code: StatusCode, distinguish: bool) -> Error {
    match code {
        StatusCode::SSH_FX_PERMISSION_DENIED if distinguish => Error::PermissionDenied,
        code => Error::Status { code },
    }
}

/// Parses a STATUS payload. The reason text is only logged.
pub(crate) fn parse_status(payload: &[u8]) -> Result<StatusCode> {
    let st: Status = read_sftp(payload)?;
    match st.code {
        StatusCode::SSH_FX_OK | StatusCode::SSH_FX_EOF => {
            trace!("status {:?}", st.code)
        }
        _ => debug!("status {:?}: {}", st.code, lossy(&st.message)),
    }
    Ok(st.code)
}

/// The reply must be a STATUS of OK
pub(crate) fn expect_ok(h: &PacketHeader, payload: &[u8], distinguish: bool) -> Result<()> {
    match h.ty {
        SftpNum::SSH_FXP_STATUS => match parse_status(payload)? {
            StatusCode::SSH_FX_OK => Ok(()),
            code => Err(status_error(code, distinguish)),
        },
        ty => Err(unexpected(ty)),
    }
}

/// HANDLE reply, or a STATUS failure
pub(crate) fn parse_handle(h: &PacketHeader, payload: &[u8]) -> Result<FileHandle> {
    match h.ty {
        SftpNum::SSH_FXP_HANDLE => {
            let b: BinString = read_sftp_exact(payload)?;
            FileHandle::new(b.0)
        }
        SftpNum::SSH_FXP_STATUS => Err(status_error(parse_status(payload)?, false)),
        ty => Err(unexpected(ty)),
    }
}

/// ATTRS reply, or a STATUS failure
pub(crate) fn parse_attrs(h: &PacketHeader, payload: &[u8], distinguish: bool) -> Result<Attrs> {
    match h.ty {
        SftpNum::SSH_FXP_ATTRS => read_sftp_exact(payload),
        SftpNum::SSH_FXP_STATUS => Err(status_error(parse_status(payload)?, distinguish)),
        ty => Err(unexpected(ty)),
    }
}

/// NAME reply, or `None` for a STATUS of EOF.
///
/// Entries are returned in the order they were sent, though servers give
/// no ordering guarantee.
pub(crate) fn parse_names(h: &PacketHeader, payload: &[u8]) -> Result<Option<Vec<NameEntry>>> {
    match h.ty {
        SftpNum::SSH_FXP_NAME => {
            let names: Names = read_sftp(payload)?;
            let l = length_enc(&names)? as usize;
            if l < payload.len() {
                debug!("{} trailing bytes in NAME", payload.len() - l);
                return Err(Error::SftpProtoError);
            }
            Ok(Some(names.0))
        }
        SftpNum::SSH_FXP_STATUS => match parse_status(payload)? {
            StatusCode::SSH_FX_EOF => Ok(None),
            StatusCode::SSH_FX_OK => Err(Error::SftpProtoError),
            code => Err(status_error(code, false)),
        },
        ty => Err(unexpected(ty)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::PathReq;
    use crate::reply::{create_name, create_status};
    use crate::sftplog::init_test_log;
    use crate::test::{pipe, Choke};

    fn run<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
        loop {
            match f() {
                Err(Error::WouldBlock) => continue,
                r => return r,
            }
        }
    }

    #[test]
    fn exchange_choked() {
        init_test_log();
        let (mut cli, mut serv) = pipe();
        cli.set_choke(Choke { max_chunk: 3, block_every: 1, window_full_every: 4 });
        let req = PathReq { path: "/x".into() };
        let mut ex = Exchange::request(SftpNum::SSH_FXP_STAT, 5, &req, 1000).unwrap();
        assert!(matches!(ex.header(&mut cli, &[]), Err(Error::WouldBlock)));

        let reply = create_status(StatusCode::SSH_FX_NO_SUCH_FILE, 5, "gone", "").unwrap();
        serv.push_raw(&reply);
        let (h, p) = run(|| ex.reply(&mut cli, &[]).map(|(h, p)| (h, p.to_vec()))).unwrap();
        assert_eq!(h.ty, SftpNum::SSH_FXP_STATUS);
        assert_eq!(parse_status(&p).unwrap(), StatusCode::SSH_FX_NO_SUCH_FILE);

        let expect = encode_packet(SftpNum::SSH_FXP_STAT, 5, &req).unwrap();
        assert_eq!(cli.sent(), expect);
    }

    #[test]
    fn exchange_tail() {
        let (mut cli, mut serv) = pipe();
        let mut ex = Exchange::from_packet(vec![1, 2, 3], Some(1), 1000);
        serv.push_raw(&create_status(StatusCode::SSH_FX_OK, 1, "", "").unwrap());
        let (h, _) = ex.reply(&mut cli, &[4, 5]).unwrap();
        assert_eq!(h.req_id, 1);
        assert_eq!(cli.sent(), [1, 2, 3, 4, 5]);
    }

    #[test]
    fn mismatched_id() {
        let (mut cli, mut serv) = pipe();
        let mut ex = Exchange::request(SftpNum::SSH_FXP_CLOSE, 2, &0u32, 1000).unwrap();
        serv.push_raw(&create_status(StatusCode::SSH_FX_OK, 3, "", "").unwrap());
        assert!(matches!(
            ex.reply(&mut cli, &[]),
            Err(Error::ReqIdMismatch { expect: 2, got: 3 })
        ));
    }

    #[test]
    fn oversize_reply() {
        let (mut cli, mut serv) = pipe();
        let mut ex = Exchange::request(SftpNum::SSH_FXP_CLOSE, 2, &0u32, 10).unwrap();
        let big = NameEntry { filename: "x".repeat(20), ..Default::default() };
        serv.push_raw(&create_name(&[big], 2, 1000).unwrap());
        assert!(matches!(ex.reply(&mut cli, &[]), Err(Error::BigPacket { .. })));
    }

    #[test]
    fn status_mapping() {
        let h = PacketHeader { len: 0, ty: SftpNum::SSH_FXP_STATUS, req_id: 0 };
        let denied = &create_status(StatusCode::SSH_FX_PERMISSION_DENIED, 0, "no", "").unwrap()
            [SFTP_HEADER_SZ..];
        assert!(matches!(expect_ok(&h, denied, true), Err(Error::PermissionDenied)));
        assert!(matches!(
            expect_ok(&h, denied, false),
            Err(Error::Status { code: StatusCode::SSH_FX_PERMISSION_DENIED })
        ));
        assert!(matches!(parse_attrs(&h, denied, true), Err(Error::PermissionDenied)));

        let fail = &create_status(StatusCode::SSH_FX_FAILURE, 0, "", "").unwrap()[SFTP_HEADER_SZ..];
        assert!(matches!(
            expect_ok(&h, fail, true),
            Err(Error::Status { code: StatusCode::SSH_FX_FAILURE })
        ));

        let eof = &create_status(StatusCode::SSH_FX_EOF, 0, "", "").unwrap()[SFTP_HEADER_SZ..];
        assert_eq!(parse_names(&h, eof).unwrap(), None);

        let h = PacketHeader { len: 0, ty: SftpNum::SSH_FXP_DATA, req_id: 0 };
        assert!(matches!(expect_ok(&h, eof, false), Err(Error::UnexpectedPacket { number: 103 })));
    }

    #[test]
    fn names_in_order() {
        let entries: Vec<NameEntry> = ["one", "two", "three"]
            .iter()
            .map(|n| NameEntry { filename: n.to_string(), ..Default::default() })
            .collect();
        let p = create_name(&entries, 0, 1000).unwrap();
        let h = PacketHeader::parse(&p).unwrap();
        let got = parse_names(&h, &p[SFTP_HEADER_SZ..]).unwrap().unwrap();
        assert_eq!(got, entries);

        // count larger than the entries present
        let mut bad = p[SFTP_HEADER_SZ..].to_vec();
        bad[3] = 200;
        assert!(matches!(parse_names(&h, &bad), Err(Error::RanOut)));
    }

    #[test]
    fn handle_reply() {
        let h = PacketHeader { len: 0, ty: SftpNum::SSH_FXP_HANDLE, req_id: 0 };
        let fh = parse_handle(&h, &[0, 0, 0, 2, 7, 8]).unwrap();
        assert_eq!(fh.as_bytes(), [7, 8]);
        let mut long = vec![0, 0, 1, 1];
        long.extend_from_slice(&[0u8; 257]);
        assert!(matches!(parse_handle(&h, &long), Err(Error::BadHandle)));
    }
}
