use std::path::Path;

/// A cataloged game as stored in the `games` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEntry {
    pub id: i64,
    pub name: String,
    pub path: String,
}

/// A game that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGame {
    pub name: String,
    pub path: String,
}

impl NewGame {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Builds an entry named after the executable's file name.
    pub fn from_executable(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().into_owned();
        Some(Self::new(name, path.to_string_lossy().into_owned()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub added: usize,
    pub skipped: usize,
}

/// Result of a completed scan, delivered once after the final progress event.
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub found: Vec<NewGame>,
    pub visited: u64,
    pub unreadable: u64,
}
