//! Upload staging area.
//!
//! Spreadsheets dropped here are picked up later by the batch worker. Files are
//! addressed by bare name only; anything that could escape the directory is
//! refused.

use log::info;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const EXTENSIONS: &[&str] = &[".xlsx", ".xls"];

#[derive(Debug)]
pub enum StagingError {
    /// Not a bare `.xlsx`/`.xls` file name
    InvalidName(String),
    /// Zero-byte upload
    Empty(String),
    NotFound(String),
    Io(io::Error),
}

impl fmt::Display for StagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StagingError::InvalidName(name) => write!(
                f,
                "Invalid file name '{name}': only bare .xlsx or .xls names are accepted"
            ),
            StagingError::Empty(name) => write!(f, "File '{name}' is empty"),
            StagingError::NotFound(name) => write!(f, "File '{name}' does not exist"),
            StagingError::Io(e) => write!(f, "Staging I/O error: {e}"),
        }
    }
}

impl std::error::Error for StagingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StagingError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StagingError {
    fn from(e: io::Error) -> Self {
        StagingError::Io(e)
    }
}

/// A file now sitting in the staging area
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedFile {
    pub name: String,
    pub size: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

fn is_spreadsheet(name: &str) -> bool {
    EXTENSIONS.iter().any(|ext| name.len() > ext.len() && name.ends_with(ext))
}

fn check_name(name: &str) -> Result<(), StagingError> {
    let bare = !name.contains(['/', '\\']) && name != ".." && !name.starts_with("..");
    if !bare || !is_spreadsheet(name) {
        return Err(StagingError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` as `name`, replacing any existing file. Creates the directory.
    pub fn store(&self, name: &str, bytes: &[u8]) -> Result<StagedFile, StagingError> {
        check_name(name)?;
        if bytes.is_empty() {
            return Err(StagingError::Empty(name.to_string()));
        }
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        fs::write(&path, bytes)?;
        info!("Staged {} ({} bytes)", path.display(), bytes.len());
        Ok(StagedFile {
            name: name.to_string(),
            size: bytes.len() as u64,
            path,
        })
    }

    /// Spreadsheet names in the area, sorted. A missing directory is an empty area.
    pub fn list(&self) -> Result<Vec<String>, StagingError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_spreadsheet(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>, StagingError> {
        check_name(name)?;
        fs::read(self.dir.join(name)).map_err(|e| not_found_or_io(name, e))
    }

    pub fn remove(&self, name: &str) -> Result<(), StagingError> {
        check_name(name)?;
        fs::remove_file(self.dir.join(name)).map_err(|e| not_found_or_io(name, e))?;
        info!("Removed staged file {name}");
        Ok(())
    }
}

fn not_found_or_io(name: &str, e: io::Error) -> StagingError {
    if e.kind() == io::ErrorKind::NotFound {
        StagingError::NotFound(name.to_string())
    } else {
        StagingError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_list_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path().join("data"));
        assert!(area.list().unwrap().is_empty());

        let staged = area.store("vga_2024.xlsx", b"PK\x03\x04").unwrap();
        assert_eq!(staged.size, 4);
        area.store("mb.xls", b"legacy").unwrap();
        fs::write(dir.path().join("data").join("notes.txt"), b"x").unwrap();

        assert_eq!(area.list().unwrap(), vec!["mb.xls", "vga_2024.xlsx"]);
        assert_eq!(area.read("mb.xls").unwrap(), b"legacy");

        area.store("mb.xls", b"replaced").unwrap();
        assert_eq!(area.read("mb.xls").unwrap(), b"replaced");

        area.remove("mb.xls").unwrap();
        assert!(matches!(area.remove("mb.xls"), Err(StagingError::NotFound(_))));
        assert_eq!(area.list().unwrap(), vec!["vga_2024.xlsx"]);
    }

    #[test]
    fn test_names_are_restricted() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        for name in ["../escape.xlsx", "sub/dir.xlsx", "a\\b.xls", "report.csv", ".xlsx", "..xlsx"] {
            assert!(
                matches!(area.store(name, b"x"), Err(StagingError::InvalidName(_))),
                "{name}"
            );
        }
        assert!(matches!(area.read("nope.xlsx"), Err(StagingError::NotFound(_))));
    }

    #[test]
    fn test_empty_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        assert!(matches!(area.store("empty.xlsx", b""), Err(StagingError::Empty(_))));
    }
}
