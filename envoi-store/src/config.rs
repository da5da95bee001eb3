use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    backends::{FileStore, MemoryLedger, MemorySessionStore},
    ledger::LedgerStore,
    session::SessionStore,
};

/// Configuration for the ledger and session store
///
/// File-backed store in RON config:
/// ```ron
/// Envoi (
///     store: File((
///         path: "/var/lib/envoi",
///     )),
/// )
/// ```
///
/// Memory-backed store for dry runs, forgotten on exit:
/// ```ron
/// Envoi (
///     store: Memory,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreConfig {
    /// RON files on disk (production)
    File(FileStore),
    /// Process memory (testing/development)
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File(FileStore::default())
    }
}

/// The opened stores, ready to hand to a dispatcher.
#[derive(Debug, Clone)]
pub struct Stores {
    pub ledger: Arc<dyn LedgerStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl StoreConfig {
    /// The filesystem path for file-backed stores
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File(store) => Some(store.path()),
            Self::Memory => None,
        }
    }

    /// Open the configured stores
    ///
    /// # Errors
    /// Returns an error if a file-backed store cannot be initialised
    pub async fn open(&self) -> crate::Result<Stores> {
        match self {
            Self::File(store) => {
                let (ledger, sessions) = store.open().await?;
                Ok(Stores {
                    ledger: Arc::new(ledger),
                    sessions: Arc::new(sessions),
                })
            }
            Self::Memory => Ok(Stores {
                ledger: Arc::new(MemoryLedger::new()),
                sessions: Arc::new(MemorySessionStore::new()),
            }),
        }
    }
}
