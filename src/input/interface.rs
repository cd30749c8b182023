use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::Read;

/// gzip magic bytes
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// [Interface] to the raw input stream
pub enum Interface {
    /// Plain (uncompressed) content
    Plain(Box<dyn Read + Send>),

    /// Gzip compressed content, possibly made of several members
    Gzip(MultiGzDecoder<Box<dyn Read + Send>>),
}

impl Interface {
    /// Creates a new plain [Interface]
    pub fn from_file_handle(handle: File) -> Self {
        Self::Plain(Box::new(handle))
    }

    /// Creates a new gzip [Interface]
    pub fn from_gzip_file_handle(handle: File) -> Self {
        Self::Gzip(MultiGzDecoder::new(Box::new(handle)))
    }

    /// Creates a new gzip [Interface] over in-memory content
    pub fn from_gzip_bytes(bytes: Vec<u8>) -> Self {
        Self::Gzip(MultiGzDecoder::new(Box::new(std::io::Cursor::new(bytes))))
    }
}

impl std::io::Read for Interface {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(r) => r.read(buf),
            Self::Gzip(r) => r.read(buf),
        }
    }
}
