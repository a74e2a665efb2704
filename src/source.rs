// A short read means EOF; any sticky EOF state must be cleared before the
// next request can read again (a later request may legitimately ask for an
// earlier offset that is no longer at EOF).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

pub struct ReadResult {
    pub bytes_read: usize,
    pub eof: bool,
}

pub trait ByteSource: Send {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<ReadResult>;
    fn clear_eof(&mut self);
}

pub struct FileSource {
    file: File,
}

impl FileSource {
    pub fn open(path: impl AsRef<std::path::Path>) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }
}

impl ByteSource for FileSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<ReadResult> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            let n = self.file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(ReadResult {
            bytes_read: total,
            eof: total < buf.len(),
        })
    }

    fn clear_eof(&mut self) {
        // std files have no sticky EOF flag; next read_at re-seeks and reads fresh.
    }
}

// In-memory ByteSource, used by tests.
pub struct CursorSource {
    data: Vec<u8>,
}

impl CursorSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ByteSource for CursorSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<ReadResult> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(ReadResult {
                bytes_read: 0,
                eof: true,
            });
        }
        let available = &self.data[offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(ReadResult {
            bytes_read: n,
            eof: n < buf.len(),
        })
    }

    fn clear_eof(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_source_short_read_signals_eof() {
        let mut src = CursorSource::new(b"ABCDE".to_vec());
        let mut buf = [0u8; 3];
        let res = src.read_at(3, &mut buf).unwrap();
        assert_eq!(res.bytes_read, 2);
        assert!(res.eof);
        assert_eq!(&buf[..2], b"DE");
    }

    #[test]
    fn cursor_source_full_read_is_not_eof() {
        let mut src = CursorSource::new(b"ABCDEFGH".to_vec());
        let mut buf = [0u8; 4];
        let res = src.read_at(0, &mut buf).unwrap();
        assert_eq!(res.bytes_read, 4);
        assert!(!res.eof);
        assert_eq!(&buf, b"ABCD");
    }

    #[test]
    fn cursor_source_past_end_is_empty_eof() {
        let mut src = CursorSource::new(b"AB".to_vec());
        let mut buf = [0u8; 4];
        let res = src.read_at(10, &mut buf).unwrap();
        assert_eq!(res.bytes_read, 0);
        assert!(res.eof);
    }
}
