use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, Transaction, ffi, params};

use crate::error::CatalogError;
use crate::models::{GameEntry, IngestReport, NewGame};

type Result<T> = std::result::Result<T, CatalogError>;

const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Handle to the persisted game catalog.
///
/// Every call commits before returning; there is no deferred write.
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Opens (or creates) the catalog file at `path`.
    ///
    /// A corrupt file is moved aside as `*.corrupt.<timestamp>` and replaced by
    /// an empty catalog. Any other failure is returned to the caller.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = match open_file(path) {
            Ok(conn) => conn,
            Err(err) if is_corruption_error(&err) => {
                warn!("catalog at {} is corrupt ({err}), starting fresh", path.display());
                backup_corrupt_db_files(path)?;
                open_file(path)?
            }
            Err(err) => return Err(err),
        };

        info!("opened catalog at {}", path.display());
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        apply_migrations(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn add(&self, name: &str, path: &str) -> Result<GameEntry> {
        insert_game(&self.conn, name, path)?;
        let id = self.conn.last_insert_rowid();
        debug!("added game {name} ({path}) as #{id}");
        Ok(GameEntry {
            id,
            name: name.to_string(),
            path: path.to_string(),
        })
    }

    pub fn all(&self) -> Result<Vec<GameEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, path FROM games ORDER BY id")?;
        let rows = stmt
            .query_map([], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Case-insensitive (ASCII) substring match on the game name.
    ///
    /// `%`, `_` and `\` in `text` match themselves. An empty `text` returns
    /// every entry.
    pub fn find_by_name_substring(&self, text: &str) -> Result<Vec<GameEntry>> {
        if text.is_empty() {
            return self.all();
        }

        let mut stmt = self.conn.prepare(
            r"SELECT id, name, path FROM games
              WHERE name LIKE ?1 ESCAPE '\'
              ORDER BY id",
        )?;
        let rows = stmt
            .query_map([like_pattern(text)], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Removes every entry and returns how many were deleted.
    pub fn clear(&self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM games", [])?;
        info!("cleared catalog ({removed} entries)");
        Ok(removed)
    }

    /// Inserts a batch, skipping entries whose name is already cataloged.
    ///
    /// Each candidate is attempted on its own; a duplicate never aborts the
    /// batch. Storage failures do, and roll back the whole batch.
    pub fn ingest(&self, games: &[NewGame]) -> Result<IngestReport> {
        let tx = self.conn.unchecked_transaction()?;
        let mut report = IngestReport::default();
        for game in games {
            match insert_game(&tx, &game.name, &game.path) {
                Ok(()) => report.added += 1,
                Err(CatalogError::Duplicate { name }) => {
                    debug!("skipping duplicate {name}");
                    report.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }
        tx.commit()?;
        info!(
            "ingested {} games, skipped {} duplicates",
            report.added, report.skipped
        );
        Ok(report)
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM games", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        let any: bool = self
            .conn
            .query_row("SELECT EXISTS(SELECT 1 FROM games)", [], |row| row.get(0))?;
        Ok(!any)
    }
}

fn open_file(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_READ_WRITE,
    )?;
    conn.pragma_update(None, "journal_mode", &"WAL")?;
    conn.pragma_update(None, "synchronous", &"NORMAL")?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

fn insert_game(conn: &Connection, name: &str, path: &str) -> Result<()> {
    match conn.execute(
        "INSERT INTO games(name, path) VALUES (?1, ?2)",
        params![name, path],
    ) {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(code, _))
            if code.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Err(CatalogError::Duplicate {
                name: name.to_string(),
            })
        }
        Err(err) => Err(err.into()),
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<GameEntry> {
    Ok(GameEntry {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
    })
}

fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

fn backup_corrupt_db_files(db_file: &Path) -> Result<()> {
    let stamp = unix_timestamp();
    for file in [
        db_file.to_path_buf(),
        PathBuf::from(format!("{}-wal", db_file.display())),
        PathBuf::from(format!("{}-shm", db_file.display())),
    ] {
        if file.exists() {
            let backup = PathBuf::from(format!("{}.corrupt.{stamp}", file.display()));
            std::fs::rename(&file, &backup)?;
            warn!("moved {} to {}", file.display(), backup.display());
        }
    }
    Ok(())
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn is_corruption_error(err: &CatalogError) -> bool {
    matches!(
        err,
        CatalogError::Storage(rusqlite::Error::SqliteFailure(code, _))
            if code.code == ErrorCode::DatabaseCorrupt
                || code.code == ErrorCode::NotADatabase
    )
}

fn apply_migrations(conn: &mut Connection) -> Result<()> {
    create_schema_version_table(conn)?;
    let mut version = get_schema_version(conn)?;

    while version < CURRENT_SCHEMA_VERSION {
        let target = version + 1;
        let tx = conn.transaction()?;
        match target {
            1 => migrate_to_v1(&tx)?,
            _ => unreachable!("unsupported schema version migration: {target}"),
        }
        set_schema_version(&tx, target)?;
        tx.commit()?;
        version = target;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i64> {
    Ok(conn
        .query_row(
            "SELECT version FROM schema_version WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0))
}

fn set_schema_version(tx: &Transaction<'_>, version: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO schema_version(id, version) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET version = excluded.version",
        [version],
    )?;
    Ok(())
}

fn migrate_to_v1(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS games (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            path TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}
