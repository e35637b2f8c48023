//! Scan cursor persistence (spec.md §6): a single file whose only content
//! is the ASCII decimal block height to resume scanning from. Kept out of
//! the database on purpose, so the cursor survives a database rebuild and
//! stays trivially inspectable with `cat`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub struct Cursor {
    path: PathBuf,
}

impl Cursor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Cursor { path: path.into() }
    }

    /// Read the persisted height, or `None` if the file does not exist yet
    /// (a fresh database with no prior scan).
    pub fn read(&self) -> io::Result<Option<u32>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let height = contents.trim().parse::<u32>().map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("cursor file {} is not a decimal integer: {e}", self.path.display()),
                    )
                })?;
                Ok(Some(height))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Persist `height`, replacing the file's entire contents. Written via
    /// a temp file + rename so a crash mid-write never leaves a truncated
    /// cursor behind.
    pub fn write(&self, height: u32) -> io::Result<()> {
        let tmp = tmp_path(&self.path);
        fs::write(&tmp, height.to_string())?;
        fs::rename(&tmp, &self.path)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
