//! Anchor-identifier store.
//!
//! Persistent mapping from external document key to anchor identifier, kept
//! in SQLite so million-document corpora never need the full key set in
//! memory. Identifiers are dense, start at 0, and are never reused.
//!
//! Minting happens inside an [`AnchorBatch`] (one transaction per ingestion
//! pass). The batch holds `&mut AnchorStore`, so only one writer can mint at a
//! time and two records for the same new key always get the same identifier.

use folio_common::AnchorId;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum AnchorError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line} of anchor file is not 'identifier<TAB>key': {content:?}")]
    MalformedLine { line: usize, content: String },

    #[error("anchor space exhausted: {max} is the largest {bits}-bit identifier")]
    Exhausted { max: u64, bits: u32 },
}

pub type AnchorResult<T> = std::result::Result<T, AnchorError>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS anchors (
        key TEXT PRIMARY KEY NOT NULL,
        id  INTEGER NOT NULL UNIQUE
    );
";

/// SQLite-backed key → anchor mapping.
pub struct AnchorStore {
    conn: Connection,
    /// Largest identifier the anchor column can hold.
    max_id: u64,
    bits: u32,
}

impl AnchorStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path, anchor_bits: u32) -> AnchorResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn, anchor_bits)
    }

    /// A throwaway store, for tests and dry runs.
    pub fn open_in_memory(anchor_bits: u32) -> AnchorResult<Self> {
        Self::init(Connection::open_in_memory()?, anchor_bits)
    }

    fn init(conn: Connection, bits: u32) -> AnchorResult<Self> {
        conn.execute_batch(SCHEMA)?;
        let max_id = if bits >= 32 {
            u64::from(u32::MAX)
        } else {
            (1u64 << bits) - 1
        };
        Ok(Self { conn, max_id, bits })
    }

    pub fn lookup(&self, key: &str) -> AnchorResult<Option<AnchorId>> {
        lookup(&self.conn, key)
    }

    pub fn len(&self) -> AnchorResult<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM anchors", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn is_empty(&self) -> AnchorResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Start a minting transaction.
    pub fn batch(&mut self) -> AnchorResult<AnchorBatch<'_>> {
        let tx = self.conn.transaction()?;
        let next = next_id(&tx)?;
        Ok(AnchorBatch {
            tx,
            next,
            max_id: self.max_id,
            bits: self.bits,
            minted: 0,
        })
    }

    /// Bulk-load `identifier\tkey` lines. Blank lines are skipped; any other
    /// line that does not parse is an error and nothing is committed.
    /// Existing keys keep their identifiers.
    pub fn import_flat(&mut self, path: &Path) -> AnchorResult<u64> {
        let reader = BufReader::new(File::open(path)?);
        let tx = self.conn.transaction()?;
        let mut inserted = 0u64;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO anchors (key, id) VALUES (?1, ?2)")?;
            for (idx, line) in reader.lines().enumerate() {
                let line = line?;
                let trimmed = line.trim_end_matches('\r');
                if trimmed.trim().is_empty() {
                    continue;
                }
                let malformed = || AnchorError::MalformedLine {
                    line: idx + 1,
                    content: trimmed.to_string(),
                };
                let (id, key) = trimmed.split_once('\t').ok_or_else(malformed)?;
                let id: u64 = id.trim().parse().map_err(|_| malformed())?;
                if key.is_empty() {
                    return Err(malformed());
                }
                if id > self.max_id {
                    return Err(AnchorError::Exhausted {
                        max: self.max_id,
                        bits: self.bits,
                    });
                }
                inserted += stmt.execute(params![key, id as i64])? as u64;
            }
        }
        tx.commit()?;
        info!(path = %path.display(), inserted, "anchor file imported");
        Ok(inserted)
    }

    /// Write every mapping as `identifier\tkey`, ordered by identifier.
    pub fn export_flat(&self, path: &Path) -> AnchorResult<u64> {
        let mut out = BufWriter::new(File::create(path)?);
        let mut stmt = self.conn.prepare("SELECT id, key FROM anchors ORDER BY id")?;
        let mut rows = stmt.query([])?;
        let mut written = 0u64;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let key: String = row.get(1)?;
            writeln!(out, "{id}\t{key}")?;
            written += 1;
        }
        out.flush()?;
        debug!(path = %path.display(), written, "anchor file exported");
        Ok(written)
    }
}

fn lookup(conn: &Connection, key: &str) -> AnchorResult<Option<AnchorId>> {
    let id: Option<i64> = conn
        .query_row("SELECT id FROM anchors WHERE key = ?1", params![key], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(id.map(|id| AnchorId(id as u32)))
}

fn next_id(conn: &Connection) -> AnchorResult<u64> {
    let max: Option<i64> = conn.query_row("SELECT MAX(id) FROM anchors", [], |r| r.get(0))?;
    Ok(max.map_or(0, |m| m as u64 + 1))
}

/// An open minting transaction. Dropping it without [`commit`](Self::commit)
/// rolls back every identifier minted through it.
pub struct AnchorBatch<'a> {
    tx: Transaction<'a>,
    next: u64,
    max_id: u64,
    bits: u32,
    minted: u64,
}

impl AnchorBatch<'_> {
    pub fn lookup(&self, key: &str) -> AnchorResult<Option<AnchorId>> {
        lookup(&self.tx, key)
    }

    /// Existing identifier for `key`, or the next identifier if it is new.
    pub fn resolve_or_mint(&mut self, key: &str) -> AnchorResult<AnchorId> {
        if let Some(id) = self.lookup(key)? {
            return Ok(id);
        }
        if self.next > self.max_id {
            return Err(AnchorError::Exhausted {
                max: self.max_id,
                bits: self.bits,
            });
        }
        let id = self.next;
        self.tx.execute(
            "INSERT INTO anchors (key, id) VALUES (?1, ?2)",
            params![key, id as i64],
        )?;
        self.next += 1;
        self.minted += 1;
        Ok(AnchorId(id as u32))
    }

    pub fn commit(self) -> AnchorResult<u64> {
        let minted = self.minted;
        self.tx.commit()?;
        Ok(minted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_minting_is_dense_and_stable() {
        let mut store = AnchorStore::open_in_memory(24).unwrap();
        let mut batch = store.batch().unwrap();
        assert_eq!(batch.resolve_or_mint("a.txt").unwrap(), AnchorId(0));
        assert_eq!(batch.resolve_or_mint("b.txt").unwrap(), AnchorId(1));
        assert_eq!(batch.resolve_or_mint("a.txt").unwrap(), AnchorId(0));
        assert_eq!(batch.commit().unwrap(), 2);

        let mut batch = store.batch().unwrap();
        assert_eq!(batch.resolve_or_mint("c.txt").unwrap(), AnchorId(2));
        batch.commit().unwrap();
        assert_eq!(store.lookup("b.txt").unwrap(), Some(AnchorId(1)));
        assert_eq!(store.len().unwrap(), 3);
    }

    #[test]
    fn test_uncommitted_batch_rolls_back() {
        let mut store = AnchorStore::open_in_memory(24).unwrap();
        {
            let mut batch = store.batch().unwrap();
            batch.resolve_or_mint("a.txt").unwrap();
        }
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_width_exhaustion() {
        let mut store = AnchorStore::open_in_memory(8).unwrap();
        let mut batch = store.batch().unwrap();
        for i in 0..256 {
            batch.resolve_or_mint(&format!("doc{i}")).unwrap();
        }
        assert!(matches!(
            batch.resolve_or_mint("one-too-many"),
            Err(AnchorError::Exhausted { max: 255, bits: 8 })
        ));
    }

    #[test]
    fn test_flat_file_roundtrip_and_persistence() {
        let dir = TempDir::new().unwrap();
        let flat = dir.path().join("anchors.txt");
        std::fs::write(&flat, "0\ta.txt\n\n5\tb.txt\r\n").unwrap();

        let db = dir.path().join("anchors.sqlite");
        {
            let mut store = AnchorStore::open(&db, 24).unwrap();
            assert_eq!(store.import_flat(&flat).unwrap(), 2);
            let mut batch = store.batch().unwrap();
            // continues after the largest imported id
            assert_eq!(batch.resolve_or_mint("c.txt").unwrap(), AnchorId(6));
            batch.commit().unwrap();
        }

        let store = AnchorStore::open(&db, 24).unwrap();
        let out = dir.path().join("out.txt");
        assert_eq!(store.export_flat(&out).unwrap(), 3);
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "0\ta.txt\n5\tb.txt\n6\tc.txt\n"
        );
    }

    #[test]
    fn test_malformed_flat_line_rejected() {
        let dir = TempDir::new().unwrap();
        let flat = dir.path().join("anchors.txt");
        std::fs::write(&flat, "0\ta.txt\nnot-a-number\tb.txt\n").unwrap();
        let mut store = AnchorStore::open_in_memory(24).unwrap();
        let err = store.import_flat(&flat).unwrap_err();
        assert!(matches!(err, AnchorError::MalformedLine { line: 2, .. }));
        assert!(store.is_empty().unwrap());
    }
}
