#![forbid(unsafe_code)]

use std::{
    fmt,
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use tracing::debug;

/// Storage engine layout a set of files belongs to.
///
/// The type takes part in file naming so that two engines never share files
/// for the same cache id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum BackendType {
    /// Append-only record log plus a single-frame redo journal.
    #[default]
    Log,
}

impl BackendType {
    /// Every known type, used when enumerating files on disk.
    pub const ALL: [BackendType; 1] = [BackendType::Log];

    /// Short tag used as the file-name prefix.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Log => "log",
        }
    }

    /// Extension of the primary data file.
    #[must_use]
    pub fn db_extension(self) -> &'static str {
        match self {
            Self::Log => "db",
        }
    }

    /// Extension of the journal file.
    #[must_use]
    pub fn journal_extension(self) -> &'static str {
        match self {
            Self::Log => "journal",
        }
    }

    /// Whether `ext` is one of the extensions this type writes.
    #[must_use]
    pub fn owns_extension(self, ext: &str) -> bool {
        ext == self.db_extension() || ext == self.journal_extension()
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Rights requested for the vended handles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AccessRights {
    ReadOnly,
    #[default]
    ReadWrite,
}

impl AccessRights {
    #[must_use]
    pub fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// Open file handles needed to operate one backend instance.
///
/// ## Normative
/// - A valid value holds both handles. A value produced after a filesystem
///   failure holds neither ([`BackendParams::is_valid`] is `false`); callers
///   must check before use.
/// - Dropping the value closes the handles. Files stay on disk.
/// - [`BackendParams::copy`] yields a value with its own cursors, so the copy
///   can be handed across threads without sharing file position.
pub struct BackendParams {
    pub backend_type: BackendType,
    pub db_file: Option<File>,
    pub db_file_is_writable: bool,
    pub journal_file: Option<File>,
    pub journal_file_is_writable: bool,
    db_path: PathBuf,
    journal_path: PathBuf,
}

impl BackendParams {
    /// Open handles on two existing files with the given rights.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error; no half-open value is produced.
    pub fn open(
        backend_type: BackendType,
        db_path: impl Into<PathBuf>,
        journal_path: impl Into<PathBuf>,
        rights: AccessRights,
    ) -> io::Result<Self> {
        let db_path = db_path.into();
        let journal_path = journal_path.into();
        let writable = rights.is_writable();
        let db_file = open_handle(&db_path, writable)?;
        let journal_file = open_handle(&journal_path, writable)?;
        Ok(Self {
            backend_type,
            db_file: Some(db_file),
            db_file_is_writable: writable,
            journal_file: Some(journal_file),
            journal_file_is_writable: writable,
            db_path,
            journal_path,
        })
    }

    /// A clearly-invalid value pointing at where the files would have been.
    #[must_use]
    pub fn invalid(
        backend_type: BackendType,
        db_path: impl Into<PathBuf>,
        journal_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend_type,
            db_file: None,
            db_file_is_writable: false,
            journal_file: None,
            journal_file_is_writable: false,
            db_path: db_path.into(),
            journal_path: journal_path.into(),
        }
    }

    /// Both handles are open.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.db_file.is_some() && self.journal_file.is_some()
    }

    /// Both handles are open for writing.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.is_valid() && self.db_file_is_writable && self.journal_file_is_writable
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    /// Duplicate the handles into an independently usable value.
    ///
    /// Each handle is re-opened from its path so the copy has its own cursor.
    /// If the path can no longer be opened the handle is duplicated instead.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            backend_type: self.backend_type,
            db_file: copy_handle(self.db_file.as_ref(), &self.db_path, self.db_file_is_writable),
            db_file_is_writable: self.db_file_is_writable,
            journal_file: copy_handle(
                self.journal_file.as_ref(),
                &self.journal_path,
                self.journal_file_is_writable,
            ),
            journal_file_is_writable: self.journal_file_is_writable,
            db_path: self.db_path.clone(),
            journal_path: self.journal_path.clone(),
        }
    }

    /// Take both handles out, `None` if the value is not valid.
    #[must_use]
    pub fn into_files(self) -> Option<(File, File)> {
        match (self.db_file, self.journal_file) {
            (Some(db), Some(journal)) => Some((db, journal)),
            _ => None,
        }
    }
}

impl fmt::Debug for BackendParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendParams")
            .field("backend_type", &self.backend_type)
            .field("db_path", &self.db_path)
            .field("db_open", &self.db_file.is_some())
            .field("db_writable", &self.db_file_is_writable)
            .field("journal_path", &self.journal_path)
            .field("journal_open", &self.journal_file.is_some())
            .field("journal_writable", &self.journal_file_is_writable)
            .finish()
    }
}

fn open_handle(path: &Path, writable: bool) -> io::Result<File> {
    OpenOptions::new().read(true).write(writable).open(path)
}

fn copy_handle(file: Option<&File>, path: &Path, writable: bool) -> Option<File> {
    let file = file?;
    match open_handle(path, writable) {
        Ok(reopened) => Some(reopened),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "reopen failed, duplicating handle");
            file.try_clone().ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom, Write};

    use rstest::rstest;

    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        File::create(&path).unwrap();
        path
    }

    #[rstest]
    fn open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db = touch(dir.path(), "a.db");
        let res = BackendParams::open(
            BackendType::Log,
            db,
            dir.path().join("missing.journal"),
            AccessRights::ReadWrite,
        );
        assert!(res.is_err());
    }

    #[rstest]
    #[case(AccessRights::ReadWrite, true)]
    #[case(AccessRights::ReadOnly, false)]
    fn open_records_writability(#[case] rights: AccessRights, #[case] writable: bool) {
        let dir = tempfile::tempdir().unwrap();
        let db = touch(dir.path(), "a.db");
        let journal = touch(dir.path(), "a.journal");
        let params = BackendParams::open(BackendType::Log, db, journal, rights).unwrap();
        assert!(params.is_valid());
        assert_eq!(params.is_writable(), writable);
        assert_eq!(params.db_file_is_writable, writable);
    }

    #[rstest]
    fn invalid_copies_stay_invalid() {
        let params = BackendParams::invalid(BackendType::Log, "/nope/a.db", "/nope/a.journal");
        assert!(!params.is_valid());
        assert!(!params.copy().is_valid());
        assert!(params.into_files().is_none());
    }

    #[rstest]
    fn copy_has_independent_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let db = touch(dir.path(), "a.db");
        let journal = touch(dir.path(), "a.journal");
        let params =
            BackendParams::open(BackendType::Log, db, journal, AccessRights::ReadWrite).unwrap();
        let copy = params.copy();

        let (mut original_db, _) = params.into_files().unwrap();
        original_db.write_all(b"hello world").unwrap();

        let (mut copy_db, _) = copy.into_files().unwrap();
        assert_eq!(copy_db.stream_position().unwrap(), 0);
        let mut buf = String::new();
        copy_db.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "hello world");

        original_db.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(copy_db.stream_position().unwrap(), 11);
    }

    #[rstest]
    #[cfg(unix)]
    fn copy_falls_back_to_duplicate_when_path_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let db = touch(dir.path(), "a.db");
        let journal = touch(dir.path(), "a.journal");
        let params = BackendParams::open(
            BackendType::Log,
            db.clone(),
            journal.clone(),
            AccessRights::ReadWrite,
        )
        .unwrap();
        std::fs::remove_file(&db).unwrap();
        std::fs::remove_file(&journal).unwrap();

        assert!(params.copy().is_valid());
    }

    #[rstest]
    fn type_owns_its_extensions() {
        let ty = BackendType::Log;
        assert!(ty.owns_extension("db"));
        assert!(ty.owns_extension("journal"));
        assert!(!ty.owns_extension("tmp"));
        assert_eq!(ty.to_string(), "log");
    }
}
