//! Typed, transactional view over the relational database file.
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS objects (
    sha  TEXT PRIMARY KEY CHECK(length(sha) = 40),
    kind TEXT NOT NULL CHECK(kind IN ('blob', 'tree', 'commit', 'tag')),
    data BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS objects_kind_idx ON objects(kind);

CREATE TABLE IF NOT EXISTS refs (
    name  TEXT PRIMARY KEY,
    sha   TEXT NOT NULL REFERENCES objects(sha),
    class TEXT NOT NULL CHECK(class IN ('branch', 'tag', 'remote'))
);
CREATE INDEX IF NOT EXISTS refs_sha_idx ON refs(sha);

CREATE TABLE IF NOT EXISTS symrefs (
    name   TEXT PRIMARY KEY,
    target TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS config (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS packs (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS pack_entries (
    pack_id INTEGER NOT NULL REFERENCES packs(id),
    sha     TEXT NOT NULL,
    data    BLOB NOT NULL,
    PRIMARY KEY (pack_id, sha)
);
";

/// The literal prefix that marks a `put_ref` value as a symbolic-ref target.
pub const SYMREF_PREFIX: &str = "ref: ";

#[derive(Debug, Error)]
pub enum Error {
    /// Connection could not be opened.
    #[error("failed to open database: {0}")]
    Open(#[source] rusqlite::Error),
    /// Schema creation failed.
    #[error("failed to initialize schema: {0}")]
    Init(#[source] rusqlite::Error),
    /// Coarse read failure.
    #[error("read failed: {0}")]
    Read(#[source] rusqlite::Error),
    /// Coarse write failure, including constraint violations (bad SHA
    /// shape, unknown kind, missing ref target).
    #[error("write failed: {0}")]
    Write(#[source] rusqlite::Error),
    /// A SHA string does not have the required shape.
    #[error("invalid sha: `{0}`")]
    InvalidSha(String),
}

/// The closed set of Git object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }

    pub const ALL: [ObjectKind; 4] = [Self::Blob, Self::Tree, Self::Commit, Self::Tag];
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blob" => Ok(Self::Blob),
            "tree" => Ok(Self::Tree),
            "commit" => Ok(Self::Commit),
            "tag" => Ok(Self::Tag),
            other => Err(Error::Write(rusqlite::Error::InvalidParameterName(
                format!("unknown object kind `{other}`"),
            ))),
        }
    }
}

/// The closed set of ref classes a regular ref row may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefClass {
    Branch,
    Tag,
    Remote,
}

impl RefClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Branch => "branch",
            Self::Tag => "tag",
            Self::Remote => "remote",
        }
    }
}

/// A ref as surfaced by `iterate_refs`: either a regular ref, or a
/// symbolic ref that has been resolved to its target's SHA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    pub name: String,
    pub sha: String,
    pub class: RefEntryClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefEntryClass {
    Branch,
    Tag,
    Remote,
    Symbolic,
}

impl RefEntryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Branch => "branch",
            Self::Tag => "tag",
            Self::Remote => "remote",
            Self::Symbolic => "symbolic",
        }
    }
}

impl From<RefClass> for RefEntryClass {
    fn from(c: RefClass) -> Self {
        match c {
            RefClass::Branch => Self::Branch,
            RefClass::Tag => Self::Tag,
            RefClass::Remote => Self::Remote,
        }
    }
}

fn is_valid_sha(sha: &str) -> bool {
    sha.len() == 40 && sha.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// A connection to the relational store, guarded for single-writer
/// access within a process (see the concurrency model in the design
/// notes: one connection per session, never shared with concurrent
/// writers).
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if absent) the database at `path` and ensure the
    /// full schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let conn = Connection::open(path).map_err(Error::Open)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(Error::Init)?;
        conn.execute_batch(SCHEMA).map_err(Error::Init)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database, primarily for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(Error::Open)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(Error::Init)?;
        conn.execute_batch(SCHEMA).map_err(Error::Init)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn close(self) {
        drop(self)
    }

    // -- objects --------------------------------------------------------

    pub fn put_object(&self, sha: &str, kind: ObjectKind, bytes: &[u8]) -> Result<(), Error> {
        if !is_valid_sha(sha) {
            return Err(Error::InvalidSha(sha.to_string()));
        }
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO objects (sha, kind, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(sha) DO UPDATE SET kind = excluded.kind, data = excluded.data",
            params![sha, kind.as_str(), bytes],
        )
        .map_err(Error::Write)?;
        Ok(())
    }

    pub fn has_object(&self, sha: &str) -> Result<bool, Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT 1 FROM objects WHERE sha = ?1",
            params![sha],
            |_| Ok(()),
        )
        .optional()
        .map_err(Error::Read)
        .map(|r| r.is_some())
    }

    pub fn get_object(&self, sha: &str) -> Result<Option<(ObjectKind, Vec<u8>)>, Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let row = conn
            .query_row(
                "SELECT kind, data FROM objects WHERE sha = ?1",
                params![sha],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .optional()
            .map_err(Error::Read)?;
        match row {
            Some((kind, data)) => Ok(Some((ObjectKind::from_str(&kind)?, data))),
            None => Ok(None),
        }
    }

    pub fn iterate_objects_by_kind(&self, kind: ObjectKind) -> Result<Vec<String>, Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT sha FROM objects WHERE kind = ?1 ORDER BY sha ASC")
            .map_err(Error::Read)?;
        let rows = stmt
            .query_map(params![kind.as_str()], |row| row.get::<_, String>(0))
            .map_err(Error::Read)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Error::Read)
    }

    pub fn count_objects(&self) -> Result<u64, Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row("SELECT COUNT(*) FROM objects", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as u64)
        .map_err(Error::Read)
    }

    // -- refs -------------------------------------------------------------

    /// Upsert `name`. If `value` begins with [`SYMREF_PREFIX`] the suffix
    /// is stored as a symbolic-ref target; otherwise a regular ref row is
    /// upserted with `value` as the target SHA.
    pub fn put_ref(&self, name: &str, value: &str, class: RefClass) -> Result<(), Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        if let Some(target) = value.strip_prefix(SYMREF_PREFIX) {
            conn.execute(
                "INSERT INTO symrefs (name, target) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET target = excluded.target",
                params![name, target],
            )
            .map_err(Error::Write)?;
        } else {
            if !is_valid_sha(value) {
                return Err(Error::InvalidSha(value.to_string()));
            }
            conn.execute(
                "INSERT INTO refs (name, sha, class) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET sha = excluded.sha, class = excluded.class",
                params![name, value, class.as_str()],
            )
            .map_err(Error::Write)?;
        }
        Ok(())
    }

    pub fn get_ref(&self, name: &str) -> Result<Option<String>, Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT sha FROM refs WHERE name = ?1",
            params![name],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(Error::Read)
    }

    pub fn delete_ref(&self, name: &str) -> Result<(), Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute("DELETE FROM refs WHERE name = ?1", params![name])
            .map_err(Error::Write)?;
        Ok(())
    }

    /// All regular refs ordered by name, followed by all symbolic refs
    /// whose targets resolve in the ref table (unresolved symrefs are
    /// omitted), each reported with `class = Symbolic`.
    pub fn iterate_refs(&self) -> Result<Vec<RefEntry>, Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut entries = Vec::new();

        let mut stmt = conn
            .prepare("SELECT name, sha, class FROM refs ORDER BY name ASC")
            .map_err(Error::Read)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(Error::Read)?;
        for row in rows {
            let (name, sha, class) = row.map_err(Error::Read)?;
            let class = match class.as_str() {
                "branch" => RefEntryClass::Branch,
                "tag" => RefEntryClass::Tag,
                _ => RefEntryClass::Remote,
            };
            entries.push(RefEntry { name, sha, class });
        }
        drop(stmt);

        let mut stmt = conn
            .prepare("SELECT s.name, r.sha FROM symrefs s JOIN refs r ON r.name = s.target ORDER BY s.name ASC")
            .map_err(Error::Read)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(Error::Read)?;
        for row in rows {
            let (name, sha) = row.map_err(Error::Read)?;
            entries.push(RefEntry {
                name,
                sha,
                class: RefEntryClass::Symbolic,
            });
        }

        Ok(entries)
    }

    // -- config -----------------------------------------------------------

    pub fn put_config(&self, key: &str, value: &str) -> Result<(), Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(Error::Write)?;
        Ok(())
    }

    pub fn get_config(&self, key: &str) -> Result<Option<String>, Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT value FROM config WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(Error::Read)
    }

    pub fn unset_config(&self, key: &str) -> Result<(), Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute("DELETE FROM config WHERE key = ?1", params![key])
            .map_err(Error::Write)?;
        Ok(())
    }

    pub fn iterate_config(&self) -> Result<Vec<(String, String)>, Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT key, value FROM config ORDER BY key ASC")
            .map_err(Error::Read)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(Error::Read)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Error::Read)
    }

    // -- raw / transactions -------------------------------------------------

    pub fn exec(&self, sql: &str) -> Result<(), Error> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute_batch(sql).map_err(Error::Write)
    }

    pub fn begin(&self) -> Result<(), Error> {
        log::trace!("BEGIN IMMEDIATE");
        self.exec("BEGIN IMMEDIATE")
    }

    pub fn commit(&self) -> Result<(), Error> {
        log::trace!("COMMIT");
        self.exec("COMMIT")
    }

    pub fn rollback(&self) -> Result<(), Error> {
        self.exec("ROLLBACK")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_object_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let sha = "a".repeat(40);
        store.put_object(&sha, ObjectKind::Blob, b"hello").unwrap();
        assert!(store.has_object(&sha).unwrap());
        let (kind, data) = store.get_object(&sha).unwrap().unwrap();
        assert_eq!(kind, ObjectKind::Blob);
        assert_eq!(data, b"hello");
    }

    #[test]
    fn test_invalid_sha_rejected() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.put_object("deadbeef", ObjectKind::Blob, b"x").is_err());
    }

    #[test]
    fn test_ref_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let sha = "b".repeat(40);
        store.put_object(&sha, ObjectKind::Commit, b"c").unwrap();
        store.put_ref("refs/heads/main", &sha, RefClass::Branch).unwrap();
        assert_eq!(store.get_ref("refs/heads/main").unwrap(), Some(sha.clone()));

        store.delete_ref("refs/heads/main").unwrap();
        assert_eq!(store.get_ref("refs/heads/main").unwrap(), None);
    }

    #[test]
    fn test_ref_requires_existing_object() {
        let store = Store::open_in_memory().unwrap();
        let sha = "c".repeat(40);
        assert!(store.put_ref("refs/heads/main", &sha, RefClass::Branch).is_err());
    }

    #[test]
    fn test_symbolic_ref_flattens_to_target_sha() {
        let store = Store::open_in_memory().unwrap();
        let sha = "d".repeat(40);
        store.put_object(&sha, ObjectKind::Commit, b"c").unwrap();
        store.put_ref("refs/heads/main", &sha, RefClass::Branch).unwrap();
        store.put_ref("HEAD", "ref: refs/heads/main", RefClass::Branch).unwrap();

        let entries = store.iterate_refs().unwrap();
        let head = entries.iter().find(|e| e.name == "HEAD").unwrap();
        assert_eq!(head.sha, sha);
        assert_eq!(head.class, RefEntryClass::Symbolic);
    }

    #[test]
    fn test_symbolic_ref_with_missing_target_is_omitted() {
        let store = Store::open_in_memory().unwrap();
        store
            .put_ref("HEAD", "ref: refs/heads/nonexistent", RefClass::Branch)
            .unwrap();
        let entries = store.iterate_refs().unwrap();
        assert!(entries.iter().all(|e| e.name != "HEAD"));
    }

    #[test]
    fn test_config_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        store.put_config("receive.denyDeletes", "true").unwrap();
        assert_eq!(
            store.get_config("receive.denyDeletes").unwrap(),
            Some("true".to_string())
        );
        store.unset_config("receive.denyDeletes").unwrap();
        assert_eq!(store.get_config("receive.denyDeletes").unwrap(), None);
    }

    #[test]
    fn test_transaction_rollback() {
        let store = Store::open_in_memory().unwrap();
        let sha = "e".repeat(40);
        store.begin().unwrap();
        store.put_object(&sha, ObjectKind::Blob, b"x").unwrap();
        store.rollback().unwrap();
        assert!(!store.has_object(&sha).unwrap());
    }

    #[test]
    fn test_fresh_database_has_no_refs() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.iterate_refs().unwrap().is_empty());
        assert_eq!(store.count_objects().unwrap(), 0);
    }
}
