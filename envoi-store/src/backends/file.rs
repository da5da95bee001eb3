use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use envoi_common::{ContentFingerprint, Recipient, SendUnit, SessionSettings, internal};
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex};

use super::{TEMP_PREFIX, write_atomic};
use crate::{
    Result, SessionId, StoreError, ValidationError,
    ledger::{LedgerBook, LedgerEntry, LedgerSnapshot, LedgerStats, LedgerStore, ResetConfirmation},
    session::{Checkpoint, SessionRecord, SessionStore, SessionSummary, newest_first},
    types::SESSION_EXTENSION,
};

/// File name of the ledger inside the store directory
pub const LEDGER_FILE: &str = "ledger.ron";

/// Directory holding one file per session inside the store directory
pub const SESSIONS_DIR: &str = "sessions";

const SENSITIVE_PREFIXES: [&str; 9] = [
    "/etc",
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "/boot",
    "/sys",
    "/proc",
    "/dev",
];

/// Location of the on-disk store
///
/// ```text
/// {path}/ledger.ron
/// {path}/sessions/{session id}.ron
/// ```
///
/// Every file is RON, so both can be inspected and edited by hand, and every
/// write goes through a temporary file followed by a rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStore {
    path: PathBuf,
}

impl Default for FileStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/envoi"),
        }
    }
}

impl<'de> Deserialize<'de> for FileStore {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FileStoreHelper {
            path: PathBuf,
        }

        let helper = FileStoreHelper::deserialize(deserializer)?;
        Self::validate_path(&helper.path).map_err(serde::de::Error::custom)?;

        Ok(Self { path: helper.path })
    }
}

impl FileStore {
    /// Validate a store path
    ///
    /// # Security Checks
    /// - Rejects paths containing `..`
    /// - Rejects relative paths
    /// - Rejects paths inside system directories
    ///
    /// # Errors
    /// Returns the first check the path fails
    pub fn validate_path(path: &Path) -> std::result::Result<(), ValidationError> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(ValidationError::ParentComponent(path.display().to_string()));
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(path.display().to_string()));
        }

        if let Some(prefix) = SENSITIVE_PREFIXES
            .iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(ValidationError::SystemDirectory {
                prefix: (*prefix).to_owned(),
                path: path.display().to_string(),
            });
        }

        Ok(())
    }

    #[must_use]
    pub fn builder() -> FileStoreBuilder {
        FileStoreBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory layout and open both stores
    ///
    /// # Errors
    /// If the directories cannot be created, the path is not a directory, or
    /// an existing ledger cannot be read
    pub async fn open(&self) -> Result<(FileLedger, FileSessionStore)> {
        internal!("Opening store at {}", self.path.display());

        ensure_dir(&self.path).await?;
        let ledger = FileLedger::open(self.path.join(LEDGER_FILE)).await?;
        let sessions = FileSessionStore::new(self.path.join(SESSIONS_DIR));
        sessions.init().await?;

        Ok((ledger, sessions))
    }
}

/// Builder for [`FileStore`]
#[derive(Debug, Default)]
pub struct FileStoreBuilder {
    path: PathBuf,
}

impl FileStoreBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// # Errors
    /// Returns an error if the path fails [`FileStore::validate_path`]
    pub fn build(self) -> std::result::Result<FileStore, ValidationError> {
        FileStore::validate_path(&self.path)?;
        Ok(FileStore { path: self.path })
    }
}

async fn ensure_dir(path: &Path) -> Result<()> {
    if !fs::try_exists(path).await? {
        internal!("{} does not exist, creating...", path.display());
        fs::create_dir_all(path).await?;
    } else if !fs::metadata(path).await?.is_dir() {
        return Err(ValidationError::NotDirectory(path.display().to_string()).into());
    }
    Ok(())
}

/// The ledger as a single RON file, rewritten on every new success.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    book: Mutex<LedgerBook>,
}

impl FileLedger {
    /// Load the ledger at `path`, starting empty if the file does not exist
    ///
    /// # Errors
    /// If the file exists but cannot be read or decoded
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let book = if fs::try_exists(&path).await? {
            let contents = fs::read_to_string(&path).await?;
            ron::from_str(&contents)?
        } else {
            LedgerBook::default()
        };

        internal!(
            level = DEBUG,
            "Loaded ledger with {} recipients from {}",
            book.recipients.len(),
            path.display()
        );

        Ok(Self {
            path,
            book: Mutex::new(book),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, book: &LedgerBook) -> Result<()> {
        let contents = ron::ser::to_string_pretty(book, ron::ser::PrettyConfig::default())?;
        write_atomic(&self.path, contents.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for FileLedger {
    async fn is_duplicate(
        &self,
        recipient: &Recipient,
        fingerprint: &ContentFingerprint,
    ) -> Result<bool> {
        Ok(self.book.lock().await.contains(recipient, fingerprint))
    }

    #[tracing::instrument(level = "debug", skip(self, fingerprint), fields(recipient = recipient.normalized()))]
    async fn record_success(
        &self,
        recipient: &Recipient,
        fingerprint: &ContentFingerprint,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut book = self.book.lock().await;
        let previous = book.history(recipient);
        let last_updated = book.last_updated;

        if !book.record(recipient, fingerprint, at) {
            return Ok(false);
        }

        if let Err(e) = self.persist(&book).await {
            book.rollback(recipient, previous, last_updated);
            return Err(e);
        }

        Ok(true)
    }

    async fn stats(&self) -> Result<LedgerStats> {
        Ok(self.book.lock().await.stats())
    }

    async fn history(&self, recipient: &Recipient) -> Result<Option<LedgerEntry>> {
        Ok(self.book.lock().await.history(recipient))
    }

    async fn export(&self) -> Result<LedgerSnapshot> {
        Ok(self.book.lock().await.snapshot())
    }

    async fn reset(&self, _confirmation: ResetConfirmation) -> Result<()> {
        let mut book = self.book.lock().await;
        let empty = LedgerBook::default();
        self.persist(&empty).await?;
        *book = empty;

        internal!(level = WARN, "Ledger at {} was reset", self.path.display());
        Ok(())
    }
}

/// Sessions as one RON file each.
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the sessions directory and remove temporary files left by a
    /// crash mid-write
    ///
    /// # Errors
    /// If the directory cannot be created or read
    pub async fn init(&self) -> Result<()> {
        ensure_dir(&self.dir).await?;

        let mut entries = fs::read_dir(&self.dir).await?;
        let mut cleaned = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                fs::remove_file(entry.path()).await?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned temporary files from {}",
                self.dir.display()
            );
        }

        Ok(())
    }

    fn record_path(&self, id: &SessionId) -> PathBuf {
        self.dir.join(id.filename())
    }

    async fn read(&self, id: &SessionId) -> Result<SessionRecord> {
        let path = self.record_path(id);
        if !fs::try_exists(&path).await? {
            return Err(StoreError::NotFound(*id));
        }

        let contents = fs::read_to_string(&path).await?;
        Ok(ron::from_str(&contents)?)
    }

    async fn write(&self, record: &SessionRecord) -> Result<()> {
        let contents = ron::ser::to_string_pretty(record, ron::ser::PrettyConfig::default())?;
        write_atomic(&self.record_path(&record.id), contents.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    #[tracing::instrument(level = "debug", skip(self, units), fields(units = units.len()))]
    async fn create(&self, units: Vec<SendUnit>, settings: SessionSettings) -> Result<SessionId> {
        let _guard = self.write_lock.lock().await;

        let id = SessionId::generate();
        if fs::try_exists(self.record_path(&id)).await? {
            return Err(StoreError::AlreadyExists(id));
        }

        let record = SessionRecord::new(id, units, settings);
        self.write(&record).await?;

        internal!(level = DEBUG, "Created session {id} in {}", self.dir.display());
        Ok(id)
    }

    #[tracing::instrument(level = "debug", skip(self, checkpoint), fields(session = %id, cursor = checkpoint.cursor))]
    async fn checkpoint(&self, id: &SessionId, checkpoint: &Checkpoint) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut record = self.read(id).await?;
        record.apply(checkpoint)?;
        self.write(&record).await
    }

    async fn load(&self, id: &SessionId) -> Result<SessionRecord> {
        self.read(id).await
    }

    async fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut summaries = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.ends_with(SESSION_EXTENSION)
                && !filename.starts_with(TEMP_PREFIX)
                && let Some(id) = SessionId::from_filename(&filename)
            {
                summaries.push(self.read(&id).await?.summary());
            }
        }

        newest_first(&mut summaries);
        Ok(summaries)
    }

    async fn delete(&self, id: &SessionId) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let path = self.record_path(id);
        if !fs::try_exists(&path).await? {
            return Err(StoreError::NotFound(*id));
        }

        fs::remove_file(&path).await?;
        internal!(level = DEBUG, "Deleted session {id}");
        Ok(())
    }
}
