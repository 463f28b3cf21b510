use std::io::Write;
use std::marker::PhantomData;
use std::path::PathBuf;

use scs_core::error::{Result, ScsError};
use scs_core::{Config, fields};

/// A typed record persisted as one comma-separated line in its entity file.
///
/// `parse` receives the comma-split fields of one line; `fields` produces
/// them back. The codec rejects lines with the wrong field count, and every
/// field written through the store is checked for embedded commas and
/// newlines.
pub trait Record: Sized {
    /// Entity file name relative to the repository root.
    const FILE: &'static str;
    /// Human name used in error messages.
    const KIND: &'static str;
    /// Exact number of comma-separated fields per line.
    const FIELD_COUNT: usize;

    /// Unique key of this record within its file.
    fn key(&self) -> String;

    fn parse(fields: &[&str]) -> Result<Self>;

    fn fields(&self) -> Vec<String>;

    /// Record-level validation applied before any write.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Generic accessor for one entity kind. Scans are linear over the file;
/// there is no in-memory index.
pub struct Store<R: Record> {
    path: PathBuf,
    _marker: PhantomData<R>,
}

impl<R: Record> Store<R> {
    pub fn new(cfg: &Config) -> Self {
        Self {
            path: cfg.repo_path(R::FILE),
            _marker: PhantomData,
        }
    }

    /// All records, in file order. A missing file is an empty store.
    pub fn list(&self) -> Result<Vec<R>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() != R::FIELD_COUNT {
                return Err(ScsError::integrity(format!(
                    "{}:{}: expected {} fields, found {}",
                    R::FILE,
                    lineno + 1,
                    R::FIELD_COUNT,
                    parts.len()
                )));
            }
            records.push(R::parse(&parts)?);
        }
        Ok(records)
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.list()?.iter().map(R::key).collect())
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.list()?.iter().any(|r| r.key() == key))
    }

    pub fn load(&self, key: &str) -> Result<R> {
        self.list()?
            .into_iter()
            .find(|r| r.key() == key)
            .ok_or_else(|| ScsError::missing(format!("{} '{}' does not exist", R::KIND, key)))
    }

    /// Insert a new record. Duplicate keys are a conflict (invariant I1).
    pub fn create(&self, record: R) -> Result<()> {
        record.validate()?;
        let mut records = self.list()?;
        if records.iter().any(|r| r.key() == record.key()) {
            return Err(ScsError::conflict(format!(
                "{} '{}' already exists",
                R::KIND,
                record.key()
            )));
        }
        records.push(record);
        self.save_all(records)
    }

    /// Replace the record at `key`. Renames are allowed as long as the new
    /// key does not collide.
    pub fn update(&self, key: &str, record: R) -> Result<()> {
        record.validate()?;
        let mut records = self.list()?;
        let pos = records
            .iter()
            .position(|r| r.key() == key)
            .ok_or_else(|| ScsError::missing(format!("{} '{}' does not exist", R::KIND, key)))?;
        if record.key() != key && records.iter().any(|r| r.key() == record.key()) {
            return Err(ScsError::conflict(format!(
                "{} '{}' already exists",
                R::KIND,
                record.key()
            )));
        }
        records[pos] = record;
        self.save_all(records)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let mut records = self.list()?;
        let before = records.len();
        records.retain(|r| r.key() != key);
        if records.len() == before {
            return Err(ScsError::missing(format!("{} '{}' does not exist", R::KIND, key)));
        }
        self.save_all(records)
    }

    pub fn filter(&self, pred: impl Fn(&R) -> bool) -> Result<Vec<R>> {
        Ok(self.list()?.into_iter().filter(|r| pred(r)).collect())
    }

    /// Write the full record set, sorted by key, atomically (temp file +
    /// rename within the repository).
    pub fn save_all(&self, mut records: Vec<R>) -> Result<()> {
        for r in &records {
            for (i, field) in r.fields().iter().enumerate() {
                fields::validate_field(&format!("{}[{}]", R::KIND, i), field)?;
            }
        }
        records.sort_by_key(R::key);

        let dir = self
            .path
            .parent()
            .ok_or_else(|| ScsError::validation(format!("bad store path {:?}", self.path)))?;
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        for r in &records {
            writeln!(tmp, "{}", r.fields().join(","))?;
        }
        tmp.persist(&self.path)
            .map_err(|e| ScsError::Io(e.error))?;
        Ok(())
    }
}
