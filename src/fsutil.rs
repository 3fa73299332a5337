use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

/// Error returned when a pseudo-filesystem file cannot be opened.
///
/// Carries the offending path so callers can report *which* kernel table
/// was unavailable.
#[derive(Debug, thiserror::Error)]
#[error("failed to open file `{path}`: {source}")]
pub struct FileOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Opens the file at `path` wrapped in a [`BufReader`].
///
/// All kernel tables this crate consumes are re-opened on every read; none
/// of the readers produced here are cached or rewound.
///
/// # Errors
///
/// Returns a [`FileOpenError`] naming the path if the open fails.
pub fn open_file_reader(path: impl AsRef<Path>) -> Result<BufReader<File>, FileOpenError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| FileOpenError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}
