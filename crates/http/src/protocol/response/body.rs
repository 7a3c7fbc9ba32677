//! Response body representations and the pull cursor the engine reads from.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use bytes::{Bytes, BytesMut};

use crate::protocol::SendError;

/// The body of a [`Response`](super::Response): exactly one of an in-memory
/// buffer or an open file.
#[derive(Debug)]
pub enum ResponseBody {
    Buffered(BytesMut),
    File(FileBody),
}

impl Default for ResponseBody {
    fn default() -> Self {
        ResponseBody::Buffered(BytesMut::new())
    }
}

impl ResponseBody {
    /// Size of the body in bytes, `None` when it can not be known up front.
    pub fn size(&self) -> Option<u64> {
        match self {
            ResponseBody::Buffered(buf) => Some(buf.len() as u64),
            ResponseBody::File(file) => file.size,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, ResponseBody::File(_))
    }

    /// Turns the body into a cursor that yields it in bounded chunks.
    pub fn into_writer(self) -> BodyWriter {
        let source = match self {
            ResponseBody::Buffered(buf) => Source::Buffered(buf.freeze()),
            ResponseBody::File(FileBody { file, size }) => Source::File { file, remaining: size },
        };
        BodyWriter { source, finished: false }
    }
}

/// An open file served as a response body.
#[derive(Debug)]
pub struct FileBody {
    file: File,
    size: Option<u64>,
}

impl FileBody {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata().ok().map(|metadata| metadata.len());
        Ok(Self { file, size })
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }
}

/// One chunk produced by [`BodyWriter::pull`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyChunk {
    pub data: Bytes,
    /// Set when another pull is needed to finish the body
    pub more: bool,
}

#[derive(Debug)]
enum Source {
    Buffered(Bytes),
    File { file: File, remaining: Option<u64> },
}

/// Pull cursor over a response body.
///
/// Every pull returns at most the requested number of bytes. Exactly one pull
/// returns a chunk with `more` cleared, after that the writer only yields empty
/// final chunks.
#[derive(Debug)]
pub struct BodyWriter {
    source: Source,
    finished: bool,
}

impl BodyWriter {
    /// Takes the next chunk of at most `max` bytes.
    ///
    /// A file that ends before the size it had when it was opened is an invalid body.
    pub fn pull(&mut self, max: usize) -> Result<BodyChunk, SendError> {
        if self.finished {
            return Ok(BodyChunk { data: Bytes::new(), more: false });
        }

        let chunk = match &mut self.source {
            Source::Buffered(remaining) => {
                let data = remaining.split_to(max.min(remaining.len()));
                BodyChunk { data, more: !remaining.is_empty() }
            }
            Source::File { file, remaining: Some(remaining) } => {
                let length = usize::try_from(*remaining).map_or(max, |remaining| remaining.min(max));
                let mut buf = vec![0; length];
                match file.read_exact(&mut buf) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        return Err(SendError::invalid_body(format!("file ended {remaining} bytes before its recorded size")));
                    }
                    Err(e) => return Err(e.into()),
                }
                *remaining -= length as u64;
                BodyChunk { data: Bytes::from(buf), more: *remaining > 0 }
            }
            // size unknown: a short read ends the body
            Source::File { file, remaining: None } => {
                let mut buf = BytesMut::zeroed(max);
                let read = read_up_to(file, &mut buf)?;
                buf.truncate(read);
                BodyChunk { data: buf.freeze(), more: read == max && max > 0 }
            }
        };

        self.finished = !chunk.more;
        Ok(chunk)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn file_body(content: &[u8]) -> (tempfile::NamedTempFile, ResponseBody) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(content).unwrap();
        tmp.flush().unwrap();
        let body = ResponseBody::File(FileBody::open(tmp.path()).unwrap());
        (tmp, body)
    }

    #[test]
    fn empty_buffer_ends_on_first_pull() {
        let mut writer = ResponseBody::default().into_writer();
        let chunk = writer.pull(16).unwrap();
        assert!(chunk.data.is_empty());
        assert!(!chunk.more);
        assert!(writer.is_finished());
    }

    #[test]
    fn buffered_pulls_never_exceed_the_limit() {
        let body = ResponseBody::Buffered(BytesMut::from(&b"0123456789"[..]));
        let mut writer = body.into_writer();

        assert_eq!(writer.pull(4).unwrap(), BodyChunk { data: Bytes::from_static(b"0123"), more: true });
        assert_eq!(writer.pull(4).unwrap(), BodyChunk { data: Bytes::from_static(b"4567"), more: true });
        assert_eq!(writer.pull(4).unwrap(), BodyChunk { data: Bytes::from_static(b"89"), more: false });
        assert_eq!(writer.pull(4).unwrap(), BodyChunk { data: Bytes::new(), more: false });
    }

    #[test]
    fn file_of_known_size_takes_ceil_pulls() {
        let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let (_tmp, body) = file_body(&content);
        assert_eq!(body.size(), Some(10_000));

        let mut writer = body.into_writer();
        let mut received = Vec::new();
        let mut pulls = 0;
        loop {
            let chunk = writer.pull(3_000).unwrap();
            assert!(chunk.data.len() <= 3_000);
            pulls += 1;
            received.extend_from_slice(&chunk.data);
            if !chunk.more {
                break;
            }
        }

        assert_eq!(pulls, 4);
        assert_eq!(received, content);
    }

    #[test]
    fn file_of_exact_multiple_ends_with_last_data_chunk() {
        let (_tmp, body) = file_body(&[7u8; 4096]);
        let mut writer = body.into_writer();

        assert!(writer.pull(2048).unwrap().more);
        let last = writer.pull(2048).unwrap();
        assert_eq!(last.data.len(), 2048);
        assert!(!last.more);
    }

    #[test]
    fn file_truncated_after_open_is_an_invalid_body() {
        let (tmp, body) = file_body(b"0123456789");
        tmp.as_file().set_len(4).unwrap();

        let mut writer = body.into_writer();
        let result = writer.pull(1024);
        assert!(matches!(result, Err(SendError::InvalidBody { .. })));
    }

    #[test]
    fn empty_file_ends_on_first_pull() {
        let (_tmp, body) = file_body(b"");
        let mut writer = body.into_writer();
        let chunk = writer.pull(1024).unwrap();
        assert!(chunk.data.is_empty());
        assert!(!chunk.more);
    }
}
