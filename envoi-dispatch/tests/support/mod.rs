#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use envoi_common::{ContentFingerprint, Recipient, SendOutcome, SendUnit};
use envoi_dispatch::{
    DispatchConfig, Dispatcher, GateConfig, RateLimitConfig, RetryPolicy, Transport,
};
use envoi_store::{
    LedgerEntry, LedgerSnapshot, LedgerStats, LedgerStore, MemoryLedger, MemorySessionStore,
    ResetConfirmation, SessionStore,
};
use parking_lot::Mutex;
use tokio::time::Instant;

type Hook = Box<dyn Fn(usize) + Send + Sync>;

/// One call to [`MockTransport::send`]
#[derive(Debug, Clone)]
pub struct Attempt {
    pub recipient: String,
    pub row_index: usize,
    pub at: Instant,
}

/// A scriptable transport that records every attempt with its time.
///
/// Recipients without a script always succeed.
#[derive(Default)]
pub struct MockTransport {
    attempts: Mutex<Vec<Attempt>>,
    scripts: Mutex<HashMap<String, VecDeque<SendOutcome>>>,
    delay: Mutex<Option<Duration>>,
    on_send: Mutex<Option<Hook>>,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("attempts", &self.attempts.lock().len())
            .finish_non_exhaustive()
    }
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue outcomes for a recipient, consumed one per attempt
    pub fn script(&self, recipient: &str, outcomes: impl IntoIterator<Item = SendOutcome>) {
        self.scripts
            .lock()
            .entry(envoi_common::Recipient::normalize(recipient))
            .or_default()
            .extend(outcomes);
    }

    /// Make every send take `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Called with the running attempt count after every send
    pub fn on_send(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.on_send.lock() = Some(Box::new(hook));
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn attempts_for(&self, recipient: &str) -> Vec<Attempt> {
        let normalized = envoi_common::Recipient::normalize(recipient);
        self.attempts
            .lock()
            .iter()
            .filter(|a| a.recipient == normalized)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, unit: &SendUnit) -> SendOutcome {
        let recipient = unit.recipient().normalized().to_owned();
        let count = {
            let mut attempts = self.attempts.lock();
            attempts.push(Attempt {
                recipient: recipient.clone(),
                row_index: unit.row_index(),
                at: Instant::now(),
            });
            attempts.len()
        };

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .scripts
            .lock()
            .get_mut(&recipient)
            .and_then(VecDeque::pop_front)
            .unwrap_or(SendOutcome::Success);

        if let Some(hook) = self.on_send.lock().as_ref() {
            hook(count);
        }

        outcome
    }
}

/// A memory ledger that calls a hook with the running count after every
/// recorded success
#[derive(Default)]
pub struct HookedLedger {
    inner: MemoryLedger,
    recorded: Mutex<usize>,
    on_record: Mutex<Option<Hook>>,
}

impl fmt::Debug for HookedLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookedLedger")
            .field("recorded", &*self.recorded.lock())
            .finish_non_exhaustive()
    }
}

impl HookedLedger {
    pub fn on_record(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.on_record.lock() = Some(Box::new(hook));
    }
}

#[async_trait]
impl LedgerStore for HookedLedger {
    async fn is_duplicate(
        &self,
        recipient: &Recipient,
        fingerprint: &ContentFingerprint,
    ) -> envoi_store::Result<bool> {
        self.inner.is_duplicate(recipient, fingerprint).await
    }

    async fn record_success(
        &self,
        recipient: &Recipient,
        fingerprint: &ContentFingerprint,
        at: DateTime<Utc>,
    ) -> envoi_store::Result<bool> {
        let recorded = self.inner.record_success(recipient, fingerprint, at).await;
        let count = {
            let mut count = self.recorded.lock();
            *count += 1;
            *count
        };
        if let Some(hook) = self.on_record.lock().as_ref() {
            hook(count);
        }
        recorded
    }

    async fn stats(&self) -> envoi_store::Result<LedgerStats> {
        self.inner.stats().await
    }

    async fn history(&self, recipient: &Recipient) -> envoi_store::Result<Option<LedgerEntry>> {
        self.inner.history(recipient).await
    }

    async fn export(&self) -> envoi_store::Result<LedgerSnapshot> {
        self.inner.export().await
    }

    async fn reset(&self, confirmation: ResetConfirmation) -> envoi_store::Result<()> {
        self.inner.reset(confirmation).await
    }
}

/// A configuration with the given pacing and no jitter
pub fn config(messages_per_second: f64, batch_size: usize, max_workers: usize) -> DispatchConfig {
    DispatchConfig {
        batch_size,
        max_workers,
        rate: RateLimitConfig {
            messages_per_second,
            batch_pause_ms: 0,
            ..RateLimitConfig::default()
        },
        retry: RetryPolicy::default(),
        gate: GateConfig::default(),
        ..DispatchConfig::default()
    }
}

/// `len` units to distinct valid recipients with the same text
pub fn plan(dispatcher: &Dispatcher, len: usize) -> Vec<SendUnit> {
    (0..len)
        .map(|i| dispatcher.unit(i, format!("336{i:08}"), "Hello from envoi").build())
        .collect()
}

pub fn recipient(i: usize) -> String {
    format!("336{i:08}")
}

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub transport: Arc<MockTransport>,
    pub ledger: Arc<MemoryLedger>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Harness {
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_sessions(config, Arc::new(MemorySessionStore::new()))
    }

    pub fn with_sessions(config: DispatchConfig, sessions: Arc<dyn SessionStore>) -> Self {
        let transport = MockTransport::new();
        let ledger = Arc::new(MemoryLedger::new());
        let dispatcher = Dispatcher::new(
            config,
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&ledger) as Arc<dyn LedgerStore>,
            Arc::clone(&sessions),
        )
        .unwrap();

        Self {
            dispatcher,
            transport,
            ledger,
            sessions,
        }
    }
}
