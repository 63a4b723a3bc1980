//! Staging buffers for packets that may be partially sent or received.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use crate::stream::Stream;

/// Sends `data[*idx..]`, advancing `idx`.
///
/// `WindowFull` is handled by pumping the stream and retrying, so this
/// only returns early with `WouldBlock` or a failure. `idx` reflects
/// the bytes already sent in either case.
pub(crate) fn send_slice<S: Stream>(stream: &mut S, data: &[u8], idx: &mut usize) -> Result<()> {
    while *idx < data.len() {
        match stream.send(&data[*idx..]) {
            // a stream that can't take anything is blocked
            Ok(0) => return Err(Error::WouldBlock),
            Ok(l) => *idx += l,
            Err(Error::WindowFull) => {
                trace!("window full, pumping");
                stream.pump()?;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Fills `out[*idx..]`, advancing `idx`.
///
/// Stream EOF before `out` is full is [`Error::ConnectionLost`].
pub(crate) fn recv_slice<S: Stream>(stream: &mut S, out: &mut [u8], idx: &mut usize) -> Result<()> {
    while *idx < out.len() {
        let l = stream.recv(&mut out[*idx..])?;
        if l == 0 {
            debug!("stream closed with {} bytes pending", out.len() - *idx);
            return Err(Error::ConnectionLost);
        }
        *idx += l;
    }
    Ok(())
}

/// A byte buffer with a cursor.
///
/// `data[..sz]` is the logical content. `idx` is the read or write
/// position, `idx <= sz` always holds. The buffer is owned by a single
/// operation's state and freed with it.
#[derive(Default)]
pub struct ScratchBuffer {
    data: Vec<u8>,
    sz: usize,
    idx: usize,
}

impl core::fmt::Debug for ScratchBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScratchBuffer")
            .field("sz", &self.sz)
            .field("idx", &self.idx)
            .finish_non_exhaustive()
    }
}

impl ScratchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts an encoded packet for sending, with the cursor at the start.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let sz = data.len();
        Self { data, sz, idx: 0 }
    }

    /// Sizes the buffer to `size` zeroed bytes and resets the cursor.
    ///
    /// Storage is only reallocated when the size differs.
    pub fn create(&mut self, size: usize) {
        if self.data.len() != size {
            self.data = vec![0u8; size];
        } else {
            self.data.fill(0);
        }
        self.sz = size;
        self.idx = 0;
    }

    pub fn size(&self) -> usize {
        self.sz
    }

    pub fn idx(&self) -> usize {
        self.idx
    }

    pub fn remaining(&self) -> usize {
        self.sz - self.idx
    }

    pub fn is_empty(&self) -> bool {
        self.sz == 0
    }

    /// The cursor has reached the end
    pub fn is_done(&self) -> bool {
        self.idx == self.sz
    }

    /// Bytes before the cursor
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.idx]
    }

    /// The whole logical content
    pub fn data(&self) -> &[u8] {
        &self.data[..self.sz]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.sz]
    }

    /// Reads from `stream` until the buffer is full.
    ///
    /// On `WouldBlock` the cursor keeps the bytes received so far, so a later
    /// call continues where this one stopped.
    pub fn read<S: Stream>(&mut self, stream: &mut S) -> Result<()> {
        let r = recv_slice(stream, &mut self.data[..self.sz], &mut self.idx);
        debug_assert!(self.idx <= self.sz);
        r
    }

    /// Sends from the cursor to the end of the buffer.
    ///
    /// Either everything is sent, or an error is returned with the cursor
    /// past the bytes that were sent.
    pub fn send<S: Stream>(&mut self, stream: &mut S) -> Result<()> {
        let r = send_slice(stream, &self.data[..self.sz], &mut self.idx);
        debug_assert!(self.idx <= self.sz);
        r
    }

    /// Moves the cursor to `start + offset`
    pub fn seek(&mut self, start: usize, offset: usize) -> Result<()> {
        let pos = start.checked_add(offset).ok_or(Error::BadUsage)?;
        if pos > self.sz {
            return Err(Error::BadUsage);
        }
        self.idx = pos;
        Ok(())
    }

    /// Writes a big endian `u32` at the cursor, advancing it.
    pub fn put_u32(&mut self, v: u32) -> Result<()> {
        if self.remaining() < 4 {
            return Err(Error::NoRoom);
        }
        self.data[self.idx..self.idx + 4].copy_from_slice(&v.to_be_bytes());
        self.idx += 4;
        Ok(())
    }

    /// Reads a big endian `u32` at the cursor, advancing it.
    pub fn get_u32(&mut self) -> Result<u32> {
        if self.remaining() < 4 {
            return Err(Error::RanOut);
        }
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.data[self.idx..self.idx + 4]);
        self.idx += 4;
        Ok(u32::from_be_bytes(b))
    }

    pub fn rewind(&mut self) {
        self.idx = 0;
    }

    /// Frees the storage
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftplog::init_test_log;
    use crate::test::{pipe, Choke};

    #[test]
    fn cursor_ops() {
        let mut b = ScratchBuffer::new();
        assert!(b.is_empty());
        b.create(8);
        b.put_u32(0xdeadbeef).unwrap();
        b.put_u32(7).unwrap();
        assert!(matches!(b.put_u32(1), Err(Error::NoRoom)));
        b.rewind();
        assert_eq!(b.get_u32().unwrap(), 0xdeadbeef);
        b.seek(0, 4).unwrap();
        assert_eq!(b.get_u32().unwrap(), 7);
        assert!(matches!(b.get_u32(), Err(Error::RanOut)));
        assert!(b.seek(4, 5).is_err());
        b.clear();
        assert_eq!(b.size(), 0);
    }

    #[test]
    fn recreate_resets() {
        let mut b = ScratchBuffer::from_vec(vec![1, 2, 3]);
        b.seek(0, 2).unwrap();
        b.create(3);
        assert_eq!(b.idx(), 0);
        assert_eq!(b.data(), [0, 0, 0]);
        b.create(5);
        assert_eq!(b.size(), 5);
    }

    #[test]
    fn send_resumes() {
        init_test_log();
        let (mut a, mut b) = pipe();
        a.set_choke(Choke { max_chunk: 3, block_every: 2, window_full_every: 3 });
        let msg: Vec<u8> = (0..50).collect();
        let mut buf = ScratchBuffer::from_vec(msg.clone());
        let mut blocked = 0;
        loop {
            match buf.send(&mut a) {
                Ok(()) => break,
                Err(Error::WouldBlock) => blocked += 1,
                Err(e) => panic!("{e:?}"),
            }
        }
        assert!(blocked > 0);
        assert!(a.pumps() > 0);
        assert!(buf.is_done());
        assert_eq!(a.sent(), msg);

        let mut rx = ScratchBuffer::new();
        rx.create(50);
        b.set_choke(Choke { max_chunk: 7, block_every: 1, ..Default::default() });
        loop {
            match rx.read(&mut b) {
                Ok(()) => break,
                Err(Error::WouldBlock) => (),
                Err(e) => panic!("{e:?}"),
            }
        }
        assert_eq!(rx.data(), msg);
    }

    #[test]
    fn read_closed() {
        let (mut a, mut b) = pipe();
        a.push_raw(&[1, 2]);
        let mut rx = ScratchBuffer::new();
        rx.create(4);
        assert!(matches!(rx.read(&mut b), Err(Error::WouldBlock)));
        assert_eq!(rx.filled(), [1, 2]);
        a.close();
        assert!(matches!(rx.read(&mut b), Err(Error::ConnectionLost)));
    }
}
