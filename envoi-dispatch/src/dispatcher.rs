use std::sync::Arc;

use ahash::AHashSet;
use envoi_common::{
    Recipient, SendUnit, SendUnitBuilder, SessionState,
    tracing::{info, warn},
};
use envoi_store::{LedgerStore, SessionId, SessionStore, SessionSummary};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
    AntiSpamGate, DispatchConfig, DispatchError, DispatchEvent, GateDecision, GateVerdict,
    PolicyError, RunControl, Transport,
    events::EVENT_CAPACITY,
    processor::{self, Engine, SessionReport},
};

/// A plan accepted into the session store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedSession {
    pub id: SessionId,
    /// Units stored in the session
    pub accepted: usize,
    /// Units dropped because the ledger or an earlier unit in the plan
    /// already covers their `(recipient, fingerprint)` pair
    pub duplicates: Vec<SendUnit>,
}

/// The result of [`Dispatcher::dispatch`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub verdict: GateVerdict,
    /// Units removed by truncation
    pub discarded: Vec<SendUnit>,
    pub duplicates: Vec<SendUnit>,
    /// One report per session, in slice order
    pub sessions: Vec<SessionReport>,
}

/// Entry point for bulk dispatch.
///
/// Clones share the same engine, control handle and event channel.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    engine: Arc<Engine>,
    gate: AntiSpamGate,
}

impl Dispatcher {
    /// # Errors
    /// [`DispatchError::Configuration`] if `config` does not validate
    pub fn new(
        config: DispatchConfig,
        transport: Arc<dyn Transport>,
        ledger: Arc<dyn LedgerStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, DispatchError> {
        config.validate()?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let gate = AntiSpamGate::new(config.gate.clone());

        Ok(Self {
            engine: Arc::new(Engine {
                config,
                transport,
                ledger,
                sessions,
                control: RunControl::new(),
                events,
            }),
            gate,
        })
    }

    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.engine.config
    }

    /// A unit builder using the configured fingerprint strategy
    pub fn unit(
        &self,
        row_index: usize,
        recipient: impl Into<Recipient>,
        content: impl Into<String>,
    ) -> SendUnitBuilder {
        SendUnit::builder(row_index, recipient, content)
            .fingerprint_strategy(self.engine.config.fingerprint)
    }

    #[must_use]
    pub const fn evaluate(&self, plan_size: usize) -> GateVerdict {
        self.gate.evaluate(plan_size)
    }

    /// Filter a plan and persist it as a new session.
    ///
    /// Units whose pair is already in the ledger, or repeats a unit earlier in
    /// the plan, are returned as duplicates. The first occurrence wins.
    ///
    /// # Errors
    /// [`PolicyError::ExceedsLimit`] if the filtered plan is still over the
    /// limit, or a store error
    #[tracing::instrument(level = "debug", skip_all, fields(units = units.len()))]
    pub async fn create_session(
        &self,
        units: Vec<SendUnit>,
    ) -> Result<PlannedSession, DispatchError> {
        let mut seen = AHashSet::with_capacity(units.len());
        let mut accepted = Vec::with_capacity(units.len());
        let mut duplicates = Vec::new();

        for unit in units {
            let key = (
                unit.recipient().normalized().to_owned(),
                unit.fingerprint().clone(),
            );
            if seen.contains(&key)
                || self
                    .engine
                    .ledger
                    .is_duplicate(unit.recipient(), unit.fingerprint())
                    .await?
            {
                duplicates.push(unit);
                continue;
            }
            seen.insert(key);
            accepted.push(unit);
        }

        if accepted.len() > self.gate.limit() {
            return Err(PolicyError::ExceedsLimit {
                size: accepted.len(),
                limit: self.gate.limit(),
            }
            .into());
        }

        let count = accepted.len();
        let id = self
            .engine
            .sessions
            .create(accepted, self.engine.config.session_settings())
            .await?;

        info!(
            session = %id,
            accepted = count,
            duplicates = duplicates.len(),
            "Created session"
        );

        Ok(PlannedSession {
            id,
            accepted: count,
            duplicates,
        })
    }

    /// Run a new or interrupted session until it completes, is cancelled or
    /// halts.
    ///
    /// A cancel left over from an earlier run is cleared first.
    ///
    /// # Errors
    /// [`DispatchError::NotResumable`] for final sessions or sessions with no
    /// work left, [`DispatchError::Halted`] on a store failure during the run
    pub async fn run(&self, id: &SessionId) -> Result<SessionReport, DispatchError> {
        self.engine.control.rearm();
        self.start(id).await
    }

    /// [`Self::run`] for a session found through [`Self::list_resumable`]
    ///
    /// # Errors
    /// See [`Self::run`]
    pub async fn resume(&self, id: &SessionId) -> Result<SessionReport, DispatchError> {
        info!(session = %id, "Resuming session");
        self.run(id).await
    }

    /// # Errors
    /// Returns a store error if the sessions cannot be listed
    pub async fn list_resumable(&self) -> Result<Vec<SessionSummary>, DispatchError> {
        Ok(self.engine.sessions.list_resumable().await?)
    }

    /// Gate a plan, then create and run one session per slice.
    ///
    /// Stops after the first slice that is cancelled; later slices are never
    /// created.
    ///
    /// # Errors
    /// [`PolicyError::ExceedsLimit`] if the plan is over the limit and
    /// `decision` is [`GateDecision::Proceed`]; nothing is dispatched then.
    /// Store errors and halts stop the remaining slices.
    pub async fn dispatch(
        &self,
        plan: Vec<SendUnit>,
        decision: GateDecision,
    ) -> Result<DispatchReport, DispatchError> {
        let gated = self.gate.apply(plan, decision)?;
        if gated.verdict == GateVerdict::WarnLargeVolume {
            warn!(
                units = gated.slices.iter().map(Vec::len).sum::<usize>(),
                threshold = self.engine.config.gate.warn_threshold,
                "Large volume dispatch"
            );
        }
        if !gated.discarded.is_empty() {
            info!(discarded = gated.discarded.len(), "Plan truncated to the limit");
        }

        self.engine.control.rearm();

        let mut report = DispatchReport {
            verdict: gated.verdict,
            discarded: gated.discarded,
            duplicates: Vec::new(),
            sessions: Vec::new(),
        };

        for slice in gated.slices {
            let planned = self.create_session(slice).await?;
            report.duplicates.extend(planned.duplicates);

            let session = self.start(&planned.id).await?;
            let cancelled = session.state == SessionState::Cancelled;
            report.sessions.push(session);

            if cancelled {
                break;
            }
        }

        Ok(report)
    }

    /// Pause, resume and cancel for whatever this dispatcher is running
    #[must_use]
    pub fn control(&self) -> &RunControl {
        &self.engine.control
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.engine.events.subscribe()
    }

    async fn start(&self, id: &SessionId) -> Result<SessionReport, DispatchError> {
        let record = self.engine.sessions.load(id).await?;
        if !(record.is_resumable() || record.state == SessionState::Created) {
            return Err(DispatchError::NotResumable {
                session: record.id,
                state: record.state,
            });
        }

        processor::run_session(&self.engine, record).await
    }
}
