use flate2::{Compression, write::GzEncoder};
use std::{fs::File, io::Write, path::Path};

pub enum FileDescriptor {
    Plain(File),
    Gzip(GzEncoder<File>),
}

impl std::io::Write for FileDescriptor {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(data),
            Self::Gzip(w) => w.write(data),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
        }
    }
}

impl FileDescriptor {
    pub fn new(gzip: bool, path: &Path) -> std::io::Result<Self> {
        let fd = File::create(path)?;

        if gzip {
            let compression = Compression::new(5);
            Ok(Self::Gzip(GzEncoder::new(fd, compression)))
        } else {
            Ok(Self::Plain(fd))
        }
    }

    /// Terminates the stream (gzip trailer included) and syncs it to disk
    pub fn finish(self) -> std::io::Result<()> {
        let mut fd = match self {
            Self::Plain(fd) => fd,
            Self::Gzip(w) => w.finish()?,
        };
        fd.flush()?;
        fd.sync_all()
    }
}
