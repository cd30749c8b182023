use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use log::debug;

mod fd;
mod settings;

pub use settings::Settings;

use fd::FileDescriptor;

use crate::{error::Error, record::LocationRecord};

/// Temporary suffix of an artifact being written
const PARTIAL_SUFFIX: &str = ".partial";

fn partial_path(path: &Path) -> PathBuf {
    let mut partial = path.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    PathBuf::from(partial)
}

fn write_partial(path: &Path, gzip: bool, records: &[LocationRecord]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(FileDescriptor::new(gzip, path)?);

    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }

    writer.into_inner().map_err(|e| e.into_error())?.finish()
}

/// Writes the JSONL artifact, one [LocationRecord] per line.
/// Content goes to a `.partial` sibling first, renamed once complete:
/// a failed write never exposes a partial artifact.
pub fn write_jsonl(path: &Path, gzip: bool, records: &[LocationRecord]) -> Result<(), Error> {
    let partial = partial_path(path);

    let output_error = |source: std::io::Error| Error::Output {
        path: path.to_string_lossy().to_string(),
        source,
    };

    match write_partial(&partial, gzip, records).and_then(|_| fs::rename(&partial, path)) {
        Ok(_) => {
            debug!("{} - {} records written", path.display(), records.len());
            Ok(())
        },
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(output_error(e))
        },
    }
}
