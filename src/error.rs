use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("the game {name} is already added")]
    Duplicate { name: String },
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("catalog file error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("a scan is already running")]
    AlreadyRunning,
    #[error("failed to start scan thread: {0}")]
    Spawn(#[source] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("executable not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("not a runnable executable: {}", .0.display())]
    NotExecutable(PathBuf),
    #[error("failed to start {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to request elevation for {}: {reason}", .path.display())]
    Elevation { path: PathBuf, reason: String },
}
