#[allow(unused_imports)]
use {
    crate::error::{Error, Result},
    log::{debug, error, info, log, trace, warn},
};

/// The protocol version spoken, draft-ietf-secsh-filexfer-02
pub const SFTP_VERSION: u32 = 3;

/// Largest handle accepted from a peer. draft-ietf-secsh-filexfer-02
/// limits handles to 256 bytes.
pub const MAX_HANDLE: usize = 256;

/// Number of interrupted transfers that can be remembered for resuming.
pub const MAX_SAVED_OFFSETS: usize = 3;

/// Length requested by each READ and sent by each WRITE during `get`/`put`.
pub const DEFAULT_RW_CHUNK: usize = 1024 * 16;

/// Largest packet accepted from a peer, excluding the length field.
// Enough for DEFAULT_RW_CHUNK of data plus a maximum size handle
pub const DEFAULT_MAX_PACKET: usize = 1024 * 64;

/// Number of files and directories a server session may hold open at once.
pub const MAX_OPEN_HANDLES: usize = 64;

pub const DEFAULT_FILE_MODE: u32 = 0o644;
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Runtime settings for a [`Client`](crate::Client) or [`Server`](crate::Server).
///
/// `Default` uses the constants in this module.
#[derive(Debug, Clone)]
pub struct SftpConfig {
    pub(crate) rw_chunk: usize,
    pub(crate) max_packet: usize,
    pub(crate) saved_offsets: usize,
    pub(crate) max_open_handles: usize,
    pub(crate) default_dir: String,
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self {
            rw_chunk: DEFAULT_RW_CHUNK,
            max_packet: DEFAULT_MAX_PACKET,
            saved_offsets: MAX_SAVED_OFFSETS,
            max_open_handles: MAX_OPEN_HANDLES,
            default_dir: "/".into(),
        }
    }
}

impl SftpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rw_chunk(mut self, rw_chunk: usize) -> Self {
        self.rw_chunk = rw_chunk;
        self
    }

    pub fn max_packet(mut self, max_packet: usize) -> Self {
        self.max_packet = max_packet;
        self
    }

    /// Capacity of the saved offset table used by `get`/`put` resume.
    pub fn saved_offsets(mut self, saved_offsets: usize) -> Self {
        self.saved_offsets = saved_offsets;
        self
    }

    pub fn max_open_handles(mut self, max_open_handles: usize) -> Self {
        self.max_open_handles = max_open_handles;
        self
    }

    /// Server working directory, relative request paths are resolved against it.
    /// Must be absolute.
    pub fn default_dir(mut self, dir: &str) -> Self {
        self.default_dir = dir.into();
        self
    }

    /// Checks that the settings can be used together.
    pub fn validate(&self) -> Result<()> {
        if self.rw_chunk == 0 || self.max_packet == 0 || self.max_open_handles == 0 {
            debug!("zero sized config {self:?}");
            return Err(Error::BadUsage);
        }
        if self.rw_chunk + crate::proto::SFTP_WRITE_OVERHEAD > self.max_packet {
            debug!("rw_chunk {} doesn't fit max_packet {}", self.rw_chunk, self.max_packet);
            return Err(Error::BadUsage);
        }
        if !self.default_dir.starts_with('/') {
            debug!("default_dir {:?} isn't absolute", self.default_dir);
            return Err(Error::BadUsage);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        SftpConfig::default().validate().unwrap();
    }

    #[test]
    fn chunk_must_fit_packet() {
        let c = SftpConfig::new().rw_chunk(4096).max_packet(4096);
        assert!(matches!(c.validate(), Err(Error::BadUsage)));
        let c = SftpConfig::new().rw_chunk(0);
        assert!(matches!(c.validate(), Err(Error::BadUsage)));
        let c = SftpConfig::new().default_dir("relative/dir");
        assert!(matches!(c.validate(), Err(Error::BadUsage)));
    }
}
