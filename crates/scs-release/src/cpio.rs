//! cpio "newc" (SVR4, no CRC) archive codec. The release payload is a
//! gzipped newc archive so the wrapper can extract with the stock cpio
//! binary on any managed host. Entries are written with zeroed times and
//! ownership and sequential inodes so identical inputs produce identical
//! bytes.

use std::io::{Read, Write};

use scs_core::error::{Result, ScsError};

const MAGIC: &str = "070701";
const TRAILER: &str = "TRAILER!!!";

const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

pub struct CpioWriter<W: Write> {
    inner: W,
    ino: u32,
}

impl<W: Write> CpioWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, ino: 0 }
    }

    pub fn append_file(&mut self, path: &str, mode: u32, data: &[u8]) -> Result<()> {
        self.append(path, S_IFREG | (mode & 0o7777), data)
    }

    pub fn append_dir(&mut self, path: &str, mode: u32) -> Result<()> {
        self.append(path, S_IFDIR | (mode & 0o7777), &[])
    }

    pub fn append_symlink(&mut self, path: &str, target: &str) -> Result<()> {
        self.append(path, S_IFLNK | 0o777, target.as_bytes())
    }

    fn append(&mut self, path: &str, mode: u32, data: &[u8]) -> Result<()> {
        self.ino += 1;
        let name = path.trim_start_matches('/');
        self.header(self.ino, mode, data.len() as u32, name)?;
        self.inner.write_all(data)?;
        self.pad(data.len())?;
        Ok(())
    }

    fn header(&mut self, ino: u32, mode: u32, filesize: u32, name: &str) -> Result<()> {
        let mut h = String::with_capacity(110);
        h.push_str(MAGIC);
        for field in [
            ino,      // c_ino
            mode,     // c_mode
            0,        // c_uid
            0,        // c_gid
            1,        // c_nlink
            0,        // c_mtime
            filesize, // c_filesize
            0,        // c_devmajor
            0,        // c_devminor
            0,        // c_rdevmajor
            0,        // c_rdevminor
            name.len() as u32 + 1,
            0, // c_check (zero for newc)
        ] {
            h.push_str(&format!("{:08X}", field));
        }
        self.inner.write_all(h.as_bytes())?;
        self.inner.write_all(name.as_bytes())?;
        self.inner.write_all(&[0])?;
        // header (110) + name + NUL padded to 4
        self.pad(110 + name.len() + 1)?;
        Ok(())
    }

    fn pad(&mut self, written: usize) -> Result<()> {
        let rem = written % 4;
        if rem != 0 {
            self.inner.write_all(&[0u8; 4][..4 - rem])?;
        }
        Ok(())
    }

    /// Write the trailer and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.ino += 1;
        self.header(self.ino, 0, 0, TRAILER)?;
        Ok(self.inner)
    }
}

/// One archive entry as read back. Used by tests and `--extract`-style
/// verification; production extraction happens remotely via cpio itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpioEntry {
    pub name: String,
    pub mode: u32,
    pub data: Vec<u8>,
}

impl CpioEntry {
    pub fn is_dir(&self) -> bool {
        self.mode & 0o170000 == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & 0o170000 == S_IFLNK
    }

    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Read every entry of a newc archive.
pub fn read_all<R: Read>(mut reader: R) -> Result<Vec<CpioEntry>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    let mut pos = 0usize;
    let mut entries = Vec::new();

    loop {
        if pos + 110 > buf.len() {
            return Err(ScsError::validation("truncated cpio archive"));
        }
        let header = std::str::from_utf8(&buf[pos..pos + 110])
            .map_err(|_| ScsError::validation("bad cpio header"))?;
        if &header[..6] != MAGIC {
            return Err(ScsError::validation(format!(
                "bad cpio magic '{}'",
                &header[..6]
            )));
        }
        let field = |i: usize| -> Result<u32> {
            u32::from_str_radix(&header[6 + i * 8..6 + (i + 1) * 8], 16)
                .map_err(|_| ScsError::validation("bad cpio header field"))
        };
        let mode = field(1)?;
        let filesize = field(6)? as usize;
        let namesize = field(11)? as usize;

        let name_start = pos + 110;
        let name = std::str::from_utf8(&buf[name_start..name_start + namesize - 1])
            .map_err(|_| ScsError::validation("bad cpio entry name"))?
            .to_string();
        let data_start = align4(name_start + namesize);
        if name == TRAILER {
            return Ok(entries);
        }
        let data = buf
            .get(data_start..data_start + filesize)
            .ok_or_else(|| ScsError::validation("truncated cpio entry"))?
            .to_vec();
        entries.push(CpioEntry { name, mode, data });
        pos = align4(data_start + filesize);
    }
}

fn align4(v: usize) -> usize {
    v.div_ceil(4) * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_sample() -> Vec<u8> {
        let mut w = CpioWriter::new(Vec::new());
        w.append_dir("etc", 0o755).unwrap();
        w.append_file("etc/motd", 0o644, b"welcome\n").unwrap();
        w.append_symlink("etc/alias", "/etc/motd").unwrap();
        w.finish().unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let entries = read_all(build_sample().as_slice()).unwrap();
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].name, "etc");
        assert!(entries[0].is_dir());
        assert_eq!(entries[0].permissions(), 0o755);

        assert_eq!(entries[1].name, "etc/motd");
        assert_eq!(entries[1].data, b"welcome\n");
        assert_eq!(entries[1].permissions(), 0o644);

        assert!(entries[2].is_symlink());
        assert_eq!(entries[2].data, b"/etc/motd");
        assert_eq!(entries[2].permissions(), 0o777);
    }

    #[test]
    fn test_deterministic_bytes() {
        assert_eq!(build_sample(), build_sample());
    }

    #[test]
    fn test_alignment() {
        // 1-byte payload exercises data padding; 110+namesize exercises
        // header padding
        let mut w = CpioWriter::new(Vec::new());
        w.append_file("x", 0o600, b"a").unwrap();
        let bytes = w.finish().unwrap();
        assert_eq!(bytes.len() % 4, 0);
        let entries = read_all(bytes.as_slice()).unwrap();
        assert_eq!(entries[0].data, b"a");
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = build_sample();
        bytes[0] = b'9';
        assert!(read_all(bytes.as_slice()).is_err());
    }

    #[test]
    fn test_truncated_rejected() {
        let bytes = build_sample();
        assert!(read_all(&bytes[..40]).is_err());
    }

    #[test]
    fn test_leading_slash_stripped() {
        let mut w = CpioWriter::new(Vec::new());
        w.append_file("/etc/motd", 0o644, b"x").unwrap();
        let entries = read_all(w.finish().unwrap().as_slice()).unwrap();
        assert_eq!(entries[0].name, "etc/motd");
    }
}
