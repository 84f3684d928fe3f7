use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use itertools::Itertools;
use rusqlite::limits::Limit;
use rusqlite::{params, params_from_iter, Connection};
use tracing::{debug, info_span, trace, warn, Span};

use crate::error::{IndexError, Result};
use crate::index::{create_dir_all, remove_path, IndexLocation, ShinglesIndex};
use crate::{CandidateSketches, DocumentId, DocumentIds, ShingleHash, Sketch};

const BACKEND_NAME: &str = "sqlite";
const FILE_EXTENSION: &str = "sqlite3";

pub const DEFAULT_BATCH_WIDTH: usize = 200;
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS document_hashes (
    document_id INTEGER NOT NULL,
    hash INTEGER NOT NULL,
    PRIMARY KEY (document_id, hash)
);

CREATE INDEX IF NOT EXISTS idx_document_hashes_hash ON document_hashes(hash);

CREATE TABLE IF NOT EXISTS document_similarities (
    master_id INTEGER NOT NULL,
    similar_id INTEGER NOT NULL,
    PRIMARY KEY (master_id, similar_id)
);
";

/// What to do with a sketch that has more hashes than fit into one candidate
/// query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BatchOverflow {
    /// Split the hashes into several queries and union the results.
    #[default]
    Chunk,
    /// Fail with [`IndexError::CapacityExceeded`].
    Reject,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SqliteOptions {
    batch_width: usize,
    overflow: BatchOverflow,
    busy_timeout: Duration,
}

impl SqliteOptions {
    /// Maximum number of hashes bound into one candidate query. Must not be
    /// greater than the host parameter limit SQLite was compiled with.
    pub fn with_batch_width(mut self, batch_width: usize) -> Self {
        self.batch_width = batch_width.max(1);
        self
    }

    pub fn with_overflow(mut self, overflow: BatchOverflow) -> Self {
        self.overflow = overflow;
        self
    }

    /// How long a statement waits on a locked database before failing.
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn batch_width(&self) -> usize {
        self.batch_width
    }

    pub fn overflow(&self) -> BatchOverflow {
        self.overflow
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }
}

impl Default for SqliteOptions {
    fn default() -> Self {
        SqliteOptions {
            batch_width: DEFAULT_BATCH_WIDTH,
            overflow: BatchOverflow::default(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Index stored in an SQLite database file `<base_path>/<name>.sqlite3`.
///
/// One row per (document, hash) pair and one row per similarity edge. Ids and
/// hashes are stored bit for bit as signed 64-bit integers.
///
/// Candidate lookups run one statement per chunk of at most
/// [`batch_width`](SqliteOptions::with_batch_width) hashes; each statement
/// returns every row of every candidate document.
pub struct SqliteShinglesIndex {
    conn: Connection,
    path: PathBuf,
    options: SqliteOptions,
    span: Span,
}

impl SqliteShinglesIndex {
    pub fn open(location: IndexLocation, options: SqliteOptions) -> Result<Self> {
        let span = info_span!("shingles_index", backend = BACKEND_NAME, name = location.name());
        let path = location.file_with_extension(FILE_EXTENSION);
        let conn = {
            let _enter = span.enter();
            create_dir_all(location.base_path())?;
            let conn = Connection::open(&path).map_err(|err| storage_error("open", err))?;
            conn.busy_timeout(options.busy_timeout)
                .map_err(|err| storage_error("busy timeout", err))?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )
            .map_err(|err| storage_error("pragmas", err))?;

            let limit = usize::try_from(conn.limit(Limit::SQLITE_LIMIT_VARIABLE_NUMBER)).unwrap_or(0);
            if options.batch_width > limit {
                warn!(batch_width = options.batch_width, limit, "Batch width over the host parameter limit");
                return Err(IndexError::CapacityExceeded {
                    backend: BACKEND_NAME,
                    requested: options.batch_width,
                    limit,
                });
            }
            conn.execute_batch(SCHEMA_SQL)
                .map_err(|err| storage_error("create schema", err))?;
            debug!(?path, batch_width = options.batch_width, "Opened index");
            conn
        };
        Ok(SqliteShinglesIndex {
            conn,
            path,
            options,
            span,
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &SqliteOptions {
        &self.options
    }

    fn insert_documents<I>(&mut self, documents: I) -> rusqlite::Result<usize>
    where
        I: IntoIterator<Item = (DocumentId, Sketch)>,
    {
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut delete = tx.prepare_cached("DELETE FROM document_hashes WHERE document_id = ?1")?;
            let mut insert = tx.prepare_cached(
                "INSERT OR IGNORE INTO document_hashes (document_id, hash) VALUES (?1, ?2)",
            )?;
            for (document_id, sketch) in documents {
                delete.execute(params![document_id as i64])?;
                for hash in &sketch {
                    insert.execute(params![document_id as i64, *hash as i64])?;
                }
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn query_documents_for_sketch(&self, sketch: &Sketch) -> rusqlite::Result<CandidateSketches> {
        let hashes: Vec<i64> = sketch.iter().map(|hash| *hash as i64).collect();
        let mut candidates = CandidateSketches::default();
        for chunk in hashes.chunks(self.options.batch_width) {
            let mut stmt = self.conn.prepare_cached(&candidate_query(chunk.len()))?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, i64>(0)? as DocumentId, row.get::<_, i64>(1)? as ShingleHash))
            })?;
            for row in rows {
                let (document_id, hash) = row?;
                candidates.entry(document_id).or_default().insert(hash);
            }
        }
        Ok(candidates)
    }

    fn query_ids(&self, sql: &str, key: u64) -> rusqlite::Result<DocumentIds> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params![key as i64], |row| row.get::<_, i64>(0))?;
        rows.map(|row| row.map(|value| value as u64)).collect()
    }
}

/// All rows of every document that has at least one of `width` hashes.
fn candidate_query(width: usize) -> String {
    format!(
        "SELECT document_id, hash FROM document_hashes WHERE document_id IN \
         (SELECT document_id FROM document_hashes WHERE hash IN ({}))",
        std::iter::repeat("?").take(width).join(", ")
    )
}

fn storage_error(operation: &'static str, err: rusqlite::Error) -> IndexError {
    warn!(operation, %err, "SQLite operation failed");
    IndexError::Sqlite(err)
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

impl ShinglesIndex for SqliteShinglesIndex {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn add_document(&mut self, document_id: DocumentId, sketch: &Sketch) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        trace!(document_id, hashes = sketch.len(), "add_document");
        self.insert_documents(std::iter::once((document_id, sketch.clone())))
            .map_err(|err| storage_error("add_document", err))?;
        Ok(())
    }

    fn add_documents<I>(&mut self, documents: I) -> Result<()>
    where
        I: IntoIterator<Item = (DocumentId, Sketch)>,
    {
        let span = self.span.clone();
        let _enter = span.enter();
        let added = self
            .insert_documents(documents)
            .map_err(|err| storage_error("add_documents", err))?;
        debug!(added, "add_documents");
        Ok(())
    }

    fn documents_for_hash(&self, hash: ShingleHash) -> Result<DocumentIds> {
        let _enter = self.span.enter();
        trace!(hash, "documents_for_hash");
        self.query_ids("SELECT document_id FROM document_hashes WHERE hash = ?1", hash)
            .map_err(|err| storage_error("documents_for_hash", err))
    }

    fn sketch_for_document(&self, document_id: DocumentId) -> Result<Option<Sketch>> {
        let _enter = self.span.enter();
        trace!(document_id, "sketch_for_document");
        let hashes = self
            .query_ids("SELECT hash FROM document_hashes WHERE document_id = ?1", document_id)
            .map_err(|err| storage_error("sketch_for_document", err))?;
        Ok(Some(hashes).filter(|sketch| !sketch.is_empty()))
    }

    fn documents_for_sketch(&self, sketch: &Sketch) -> Result<CandidateSketches> {
        let _enter = self.span.enter();
        trace!(hashes = sketch.len(), "documents_for_sketch");
        if sketch.is_empty() {
            return Ok(CandidateSketches::default());
        }
        if sketch.len() > self.options.batch_width && self.options.overflow == BatchOverflow::Reject {
            warn!(
                hashes = sketch.len(),
                batch_width = self.options.batch_width,
                "Sketch wider than the batch width"
            );
            return Err(IndexError::CapacityExceeded {
                backend: BACKEND_NAME,
                requested: sketch.len(),
                limit: self.options.batch_width,
            });
        }
        self.query_documents_for_sketch(sketch)
            .map_err(|err| storage_error("documents_for_sketch", err))
    }

    fn add_document_similarity(&mut self, master: DocumentId, similar: DocumentId) -> Result<()> {
        let _enter = self.span.enter();
        trace!(master, similar, "add_document_similarity");
        self.conn
            .prepare_cached(
                "INSERT OR IGNORE INTO document_similarities (master_id, similar_id) VALUES (?1, ?2)",
            )
            .and_then(|mut stmt| stmt.execute(params![master as i64, similar as i64]))
            .map_err(|err| storage_error("add_document_similarity", err))?;
        Ok(())
    }

    fn similar_documents(&self, document_id: DocumentId) -> Result<DocumentIds> {
        let _enter = self.span.enter();
        self.query_ids(
            "SELECT similar_id FROM document_similarities WHERE master_id = ?1",
            document_id,
        )
        .map_err(|err| storage_error("similar_documents", err))
    }

    fn all_similar_documents(&self) -> Result<BTreeMap<DocumentId, DocumentIds>> {
        let _enter = self.span.enter();
        let query = || -> rusqlite::Result<BTreeMap<DocumentId, DocumentIds>> {
            let mut stmt = self
                .conn
                .prepare_cached("SELECT master_id, similar_id FROM document_similarities")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)? as DocumentId, row.get::<_, i64>(1)? as DocumentId))
            })?;
            let mut similarities: BTreeMap<DocumentId, DocumentIds> = BTreeMap::new();
            for row in rows {
                let (master, similar) = row?;
                similarities.entry(master).or_default().insert(similar);
            }
            Ok(similarities)
        };
        query().map_err(|err| storage_error("all_similar_documents", err))
    }

    fn number_of_documents(&self) -> Result<usize> {
        let _enter = self.span.enter();
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(DISTINCT document_id) FROM document_hashes", [], |row| {
                row.get(0)
            })
            .map_err(|err| storage_error("number_of_documents", err))?;
        Ok(count as usize)
    }

    fn clear(&mut self) -> Result<()> {
        let _enter = self.span.enter();
        debug!("clear");
        let clear_tables = |conn: &mut Connection| -> rusqlite::Result<()> {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM document_hashes", [])?;
            tx.execute("DELETE FROM document_similarities", [])?;
            tx.commit()
        };
        clear_tables(&mut self.conn).map_err(|err| storage_error("clear", err))
    }

    fn save_index(&mut self) -> Result<()> {
        let _enter = self.span.enter();
        self.conn
            .query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))
            .map_err(|err| storage_error("save_index", err))?;
        debug!(path = ?self.path, "Checkpointed index");
        Ok(())
    }

    fn delete_index(self) -> Result<()> {
        let SqliteShinglesIndex { conn, path, span, .. } = self;
        let _enter = span.enter();
        conn.close()
            .map_err(|(_, err)| storage_error("close", err))?;
        let removed = remove_path(&path)?;
        for suffix in ["-wal", "-shm"] {
            remove_path(&sibling_path(&path, suffix))?;
        }
        debug!(?path, removed, "Deleted index");
        Ok(())
    }
}
