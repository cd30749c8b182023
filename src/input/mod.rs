use std::{fs::File, io::Read, path::Path};

use log::debug;

mod interface;

use interface::{GZIP_MAGIC, Interface};

use crate::{classifier::Format, error::Error};

/// [RawInput] is the immutable content of one uploaded file.
#[derive(Debug, Clone)]
pub struct RawInput {
    /// Declared file name, without compression suffix
    filename: String,

    /// Declared format, bypassing classification
    declared: Option<Format>,

    /// Raw (inflated) bytes
    bytes: Vec<u8>,

    /// Lossy UTF-8 view of the bytes
    text: String,
}

impl RawInput {
    /// Reads [RawInput] from given path. Gzip files are inflated,
    /// whether they are terminated with '.gz' or not.
    pub fn open(path: &Path, declared: Option<Format>) -> Result<Self, Error> {
        let fullpath = path.to_string_lossy().to_string();

        let io_error = |source: std::io::Error| Error::Io {
            path: fullpath.clone(),
            source,
        };

        let handle = File::open(path).map_err(io_error)?;

        let mut interface = if fullpath.ends_with(".gz") {
            Interface::from_gzip_file_handle(handle)
        } else {
            Interface::from_file_handle(handle)
        };

        let mut bytes = Vec::with_capacity(8192);
        interface.read_to_end(&mut bytes).map_err(io_error)?;

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or(fullpath.clone());

        let raw = Self::from_bytes(&filename, bytes).map_err(io_error)?;

        debug!("{} - loaded {} bytes", raw.filename, raw.bytes.len());

        Ok(raw.with_declared_format(declared))
    }

    /// Builds [RawInput] from in-memory content (upload collaborator).
    /// Gzip content is detected by its magic bytes.
    pub fn from_bytes(filename: &str, bytes: Vec<u8>) -> std::io::Result<Self> {
        let bytes = if bytes.starts_with(&GZIP_MAGIC) {
            let mut inflated = Vec::with_capacity(bytes.len() * 4);
            Interface::from_gzip_bytes(bytes).read_to_end(&mut inflated)?;
            inflated
        } else {
            bytes
        };

        let filename = filename.strip_suffix(".gz").unwrap_or(filename).to_string();
        let text = String::from_utf8_lossy(&bytes).to_string();

        Ok(Self {
            filename,
            declared: None,
            bytes,
            text,
        })
    }

    /// Copies [Self] with a declared [Format]
    pub fn with_declared_format(mut self, declared: Option<Format>) -> Self {
        self.declared = declared;
        self
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn declared_format(&self) -> Option<Format> {
        self.declared
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Lower case file extension (compression suffix excluded)
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
    }

    /// File name without its extension
    pub fn stem(&self) -> String {
        Path::new(&self.filename)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| self.filename.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use flate2::{Compression, write::GzEncoder};
    use std::io::Write;

    #[test]
    fn plain_content() {
        let raw = RawInput::from_bytes("track.nmea", b"$GPGGA,".to_vec()).unwrap();
        assert_eq!(raw.filename(), "track.nmea");
        assert_eq!(raw.extension().as_deref(), Some("nmea"));
        assert_eq!(raw.stem(), "track");
        assert_eq!(raw.text(), "$GPGGA,");
    }

    #[test]
    fn gzip_content() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(5));
        encoder.write_all(b"hello rinex").unwrap();
        let compressed = encoder.finish().unwrap();

        let raw = RawInput::from_bytes("ABCD0010.20O.gz", compressed).unwrap();
        assert_eq!(raw.filename(), "ABCD0010.20O");
        assert_eq!(raw.extension().as_deref(), Some("20o"));
        assert_eq!(raw.bytes(), b"hello rinex");
    }

    #[test]
    fn open_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.nmea.gz");

        let fd = File::create(&path).unwrap();
        let mut encoder = GzEncoder::new(fd, Compression::new(5));
        encoder.write_all(b"$GPRMC,\n").unwrap();
        encoder.finish().unwrap();

        let raw = RawInput::open(&path, Some(Format::Nmea)).unwrap();
        assert_eq!(raw.filename(), "log.nmea");
        assert_eq!(raw.text(), "$GPRMC,\n");
        assert_eq!(raw.declared_format(), Some(Format::Nmea));

        let missing = RawInput::open(&dir.path().join("nope.obs"), None);
        assert!(matches!(missing, Err(Error::Io { .. })));
    }

    #[test]
    fn gz_suffix_without_gzip_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.nmea.gz");
        std::fs::write(&path, b"$GPGGA,123519,4807.038,N\n").unwrap();

        match RawInput::open(&path, None) {
            Err(Error::Io { path: failed, .. }) => assert!(failed.ends_with("track.nmea.gz")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
