//! Local filesystem access.
//!
//! The server performs requests through a [`Filesystem`], and the client
//! uses one for the local side of `get` and `put`.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::fs::{self, File, OpenOptions, ReadDir};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::proto::{Attrs, OpenFlags};

/// Filesystem operations, named after their POSIX equivalents.
///
/// Paths are absolute. Failures should be [`Error::FileNotFound`] or
/// [`Error::PermissionDenied`] where applicable, other errors are reported
/// to a peer as a generic failure.
pub trait Filesystem {
    type File;
    type Dir;

    /// `mode` applies when a file is created
    fn open(&mut self, path: &str, flags: OpenFlags, mode: u32) -> Result<Self::File>;

    fn read(&mut self, file: &mut Self::File, offset: u64, buf: &mut [u8]) -> Result<usize>;

    fn write(&mut self, file: &mut Self::File, offset: u64, buf: &[u8]) -> Result<usize>;

    fn close(&mut self, file: Self::File) -> Result<()>;

    fn fstat(&mut self, file: &Self::File) -> Result<Attrs>;

    fn fsetstat(&mut self, file: &mut Self::File, attrs: &Attrs) -> Result<()>;

    /// Attributes of `path`. Symlinks are followed when `follow_links` is set.
    fn stat(&mut self, path: &str, follow_links: bool) -> Result<Attrs>;

    fn setstat(&mut self, path: &str, attrs: &Attrs) -> Result<()>;

    fn mkdir(&mut self, path: &str, mode: u32) -> Result<()>;

    fn rmdir(&mut self, path: &str) -> Result<()>;

    fn remove(&mut self, path: &str) -> Result<()>;

    fn rename(&mut self, old: &str, new: &str) -> Result<()>;

    fn opendir(&mut self, path: &str) -> Result<Self::Dir>;

    /// Returns the next entry's name, or `None` once the directory is exhausted.
    fn readdir(&mut self, dir: &mut Self::Dir) -> Result<Option<String>>;

    fn closedir(&mut self, dir: Self::Dir) -> Result<()>;
}

/// [`Filesystem`] backed by `std::fs`
#[derive(Debug, Default, Clone)]
pub struct StdFilesystem;

impl StdFilesystem {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
fn attrs_from_metadata(m: &fs::Metadata) -> Attrs {
    use std::os::unix::fs::MetadataExt;
    Attrs {
        size: Some(m.size()),
        uid: Some(m.uid()),
        gid: Some(m.gid()),
        permissions: Some(m.mode()),
        atime: Some(u32::try_from(m.atime()).unwrap_or(0)),
        mtime: Some(u32::try_from(m.mtime()).unwrap_or(0)),
        extended: Vec::new(),
    }
}

#[cfg(not(unix))]
fn attrs_from_metadata(m: &fs::Metadata) -> Attrs {
    use crate::proto::{S_IFDIR, S_IFLNK, S_IFREG};
    let ft = m.file_type();
    let kind = if ft.is_dir() {
        S_IFDIR
    } else if ft.is_symlink() {
        S_IFLNK
    } else {
        S_IFREG
    };
    let perm = if m.permissions().readonly() { 0o444 } else { 0o644 };
    let mtime = m
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .and_then(|d| u32::try_from(d.as_secs()).ok());
    Attrs {
        size: Some(m.len()),
        permissions: Some(kind | perm),
        mtime,
        atime: mtime,
        ..Default::default()
    }
}

fn apply_attrs(path: &Path, file: Option<&File>, attrs: &Attrs) -> Result<()> {
    if let Some(size) = attrs.size {
        match file {
            Some(f) => f.set_len(size)?,
            None => OpenOptions::new().write(true).open(path)?.set_len(size)?,
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(perm) = attrs.permissions {
            fs::set_permissions(path, fs::Permissions::from_mode(perm & 0o7777))?;
        }
        if attrs.uid.is_some() || attrs.gid.is_some() {
            std::os::unix::fs::chown(path, attrs.uid, attrs.gid)?;
        }
    }

    if attrs.atime.is_some() || attrs.mtime.is_some() {
        let t = |secs: u32| std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs.into());
        let mut times = fs::FileTimes::new();
        if let Some(a) = attrs.atime {
            times = times.set_accessed(t(a));
        }
        if let Some(m) = attrs.mtime {
            times = times.set_modified(t(m));
        }
        match file {
            Some(f) => f.set_times(times)?,
            None => File::open(path)?.set_times(times)?,
        }
    }
    Ok(())
}

/// An open file, with the path it was opened by
#[derive(Debug)]
pub struct StdFile {
    file: File,
    path: String,
}

impl Filesystem for StdFilesystem {
    type File = StdFile;
    type Dir = ReadDir;

    fn open(&mut self, path: &str, flags: OpenFlags, mode: u32) -> Result<StdFile> {
        // std rejects truncate with append, and create or truncate without write
        let append = flags.contains(OpenFlags::APPEND);
        let truncate = flags.contains(OpenFlags::TRUNC) && !append;
        let write = flags.contains(OpenFlags::WRITE) || flags.contains(OpenFlags::CREAT) || truncate;
        if append && flags.contains(OpenFlags::TRUNC) {
            trace!("{path}: ignoring TRUNC with APPEND");
        }
        let mut opts = OpenOptions::new();
        opts.read(flags.contains(OpenFlags::READ)).write(write).append(append).truncate(truncate);
        if flags.contains(OpenFlags::CREAT) {
            if flags.contains(OpenFlags::EXCL) {
                opts.create_new(true);
            } else {
                opts.create(true);
            }
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(mode & 0o7777);
        }
        #[cfg(not(unix))]
        let _ = mode;

        let file = opts.open(path)?;
        trace!("opened {path} {flags:?}");
        Ok(StdFile { file, path: path.into() })
    }

    fn read(&mut self, file: &mut StdFile, offset: u64, buf: &mut [u8]) -> Result<usize> {
        file.file.seek(SeekFrom::Start(offset))?;
        // fill as much as possible, short reads only at EOF
        let mut l = 0;
        while l < buf.len() {
            let n = file.file.read(&mut buf[l..])?;
            if n == 0 {
                break;
            }
            l += n;
        }
        Ok(l)
    }

    fn write(&mut self, file: &mut StdFile, offset: u64, buf: &[u8]) -> Result<usize> {
        file.file.seek(SeekFrom::Start(offset))?;
        file.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn close(&mut self, file: StdFile) -> Result<()> {
        trace!("closing {}", file.path);
        drop(file);
        Ok(())
    }

    fn fstat(&mut self, file: &StdFile) -> Result<Attrs> {
        Ok(attrs_from_metadata(&file.file.metadata()?))
    }

    fn fsetstat(&mut self, file: &mut StdFile, attrs: &Attrs) -> Result<()> {
        apply_attrs(Path::new(&file.path), Some(&file.file), attrs)
    }

    fn stat(&mut self, path: &str, follow_links: bool) -> Result<Attrs> {
        let m = if follow_links { fs::metadata(path) } else { fs::symlink_metadata(path) };
        let m = m.map_err(|e| {
            trace!("stat {path}: {e}");
            Error::from(e)
        })?;
        Ok(attrs_from_metadata(&m))
    }

    fn setstat(&mut self, path: &str, attrs: &Attrs) -> Result<()> {
        apply_attrs(Path::new(path), None, attrs)
    }

    fn mkdir(&mut self, path: &str, mode: u32) -> Result<()> {
        let mut b = fs::DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            b.mode(mode & 0o7777);
        }
        #[cfg(not(unix))]
        let _ = mode;
        b.create(path)?;
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        Ok(fs::remove_dir(path)?)
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        Ok(fs::remove_file(path)?)
    }

    fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        Ok(fs::rename(old, new)?)
    }

    fn opendir(&mut self, path: &str) -> Result<ReadDir> {
        Ok(fs::read_dir(path)?)
    }

    fn readdir(&mut self, dir: &mut ReadDir) -> Result<Option<String>> {
        match dir.next() {
            Some(ent) => Ok(Some(ent?.file_name().to_string_lossy().into_owned())),
            None => Ok(None),
        }
    }

    fn closedir(&mut self, _dir: ReadDir) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftplog::init_test_log;

    fn p(dir: &tempfile::TempDir, name: &str) -> String {
        dir.path().join(name).to_string_lossy().into_owned()
    }

    #[test]
    fn stat_kinds() -> anyhow::Result<()> {
        init_test_log();
        let dir = tempfile::tempdir()?;
        let mut fs = StdFilesystem::new();
        fs::write(p(&dir, "f"), b"hello")?;
        let a = fs.stat(&p(&dir, "f"), true)?;
        assert_eq!(a.size, Some(5));
        assert!(a.is_regular());
        assert!(fs.stat(&dir.path().to_string_lossy(), true)?.is_dir());
        assert!(matches!(fs.stat(&p(&dir, "missing"), false), Err(Error::FileNotFound)));
        Ok(())
    }

    #[test]
    fn positional_io() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut fs = StdFilesystem::new();
        let path = p(&dir, "f");
        let mut f = fs.open(&path, OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::READ, 0o600)?;
        assert_eq!(fs.write(&mut f, 0, b"0123456789")?, 10);
        assert_eq!(fs.write(&mut f, 2, b"ab")?, 2);
        let mut b = [0u8; 20];
        assert_eq!(fs.read(&mut f, 1, &mut b)?, 9);
        assert_eq!(&b[..9], b"1ab456789");
        assert_eq!(fs.read(&mut f, 10, &mut b)?, 0);
        assert_eq!(fs.fstat(&f)?.size, Some(10));
        fs.close(f)?;
        Ok(())
    }

    #[test]
    fn loose_open_flags() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut fs = StdFilesystem::new();
        let path = p(&dir, "f");

        // CREAT alone still creates
        let f = fs.open(&path, OpenFlags::CREAT, 0o644)?;
        fs.close(f)?;
        assert!(Path::new(&path).exists());

        fs::write(&path, b"abc")?;
        // APPEND wins over TRUNC
        let mut f = fs.open(&path, OpenFlags::APPEND | OpenFlags::TRUNC, 0)?;
        fs.write(&mut f, 0, b"de")?;
        fs.close(f)?;
        assert_eq!(fs::read(&path)?, b"abcde");

        // TRUNC without WRITE
        let f = fs.open(&path, OpenFlags::READ | OpenFlags::TRUNC, 0)?;
        fs.close(f)?;
        assert_eq!(fs::read(&path)?, b"");
        Ok(())
    }

    #[test]
    fn exclusive_create() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut fs = StdFilesystem::new();
        let path = p(&dir, "f");
        let flags = OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::EXCL;
        let f = fs.open(&path, flags, 0o644)?;
        fs.close(f)?;
        assert!(fs.open(&path, flags, 0o644).is_err());
        Ok(())
    }

    #[test]
    fn dir_listing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut fs = StdFilesystem::new();
        fs.mkdir(&p(&dir, "sub"), 0o755)?;
        fs::write(p(&dir, "a"), b"")?;
        let mut d = fs.opendir(&dir.path().to_string_lossy())?;
        let mut names = vec![];
        while let Some(n) = fs.readdir(&mut d)? {
            names.push(n);
        }
        fs.closedir(d)?;
        names.sort();
        assert_eq!(names, ["a", "sub"]);
        fs.rmdir(&p(&dir, "sub"))?;
        fs.rename(&p(&dir, "a"), &p(&dir, "b"))?;
        fs.remove(&p(&dir, "b"))?;
        assert!(matches!(fs.remove(&p(&dir, "b")), Err(Error::FileNotFound)));
        Ok(())
    }

    #[test]
    fn set_attributes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut fs = StdFilesystem::new();
        let path = p(&dir, "f");
        fs::write(&path, b"0123456789")?;
        let a = Attrs { size: Some(4), mtime: Some(1_000_000), atime: Some(999), ..Default::default() };
        fs.setstat(&path, &a)?;
        let got = fs.stat(&path, true)?;
        assert_eq!(got.size, Some(4));
        assert_eq!(got.mtime, Some(1_000_000));
        #[cfg(unix)]
        {
            fs.setstat(&path, &Attrs { permissions: Some(0o600), ..Default::default() })?;
            assert_eq!(fs.stat(&path, true)?.permissions.map(|p| p & 0o777), Some(0o600));
        }
        Ok(())
    }
}
