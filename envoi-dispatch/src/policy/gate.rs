//! Anti-spam limits on how many units one session may dispatch.

use envoi_common::SendUnit;
use serde::{Deserialize, Serialize};

use crate::PolicyError;

/// Volume thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Plans larger than this need acknowledgement
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: usize,

    /// Hard ceiling on units per session
    #[serde(default = "default_max_units")]
    pub max_units: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            warn_threshold: default_warn_threshold(),
            max_units: default_max_units(),
        }
    }
}

const fn default_warn_threshold() -> usize {
    1000
}

const fn default_max_units() -> usize {
    2500
}

/// How a plan's size compares to the thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateVerdict {
    Proceed,
    /// Informational; the caller proceeds after acknowledging it.
    WarnLargeVolume,
    /// The caller must truncate or split the plan.
    ExceedsLimit,
}

/// What the caller chose to do with the plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateDecision {
    /// Dispatch as is. Refused for plans over the limit.
    #[default]
    Proceed,
    /// Keep the first `max_units` units, in order, and discard the rest.
    TruncateToLimit,
    /// Run every unit, across as many sessions as needed.
    SplitIntoSessions,
}

/// A plan after the gate, ready to become one session per slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatedPlan {
    pub verdict: GateVerdict,
    pub slices: Vec<Vec<SendUnit>>,
    /// Units dropped by truncation, in their original order
    pub discarded: Vec<SendUnit>,
}

#[derive(Debug, Clone, Default)]
pub struct AntiSpamGate {
    config: GateConfig,
}

impl AntiSpamGate {
    #[must_use]
    pub const fn new(config: GateConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn limit(&self) -> usize {
        self.config.max_units
    }

    #[must_use]
    pub const fn evaluate(&self, plan_size: usize) -> GateVerdict {
        if plan_size > self.config.max_units {
            GateVerdict::ExceedsLimit
        } else if plan_size > self.config.warn_threshold {
            GateVerdict::WarnLargeVolume
        } else {
            GateVerdict::Proceed
        }
    }

    /// Keep the first `max_units` units, returning `(kept, discarded)`
    #[must_use]
    pub fn truncate_to_limit(&self, mut plan: Vec<SendUnit>) -> (Vec<SendUnit>, Vec<SendUnit>) {
        let discarded = if plan.len() > self.config.max_units {
            plan.split_off(self.config.max_units)
        } else {
            Vec::new()
        };
        (plan, discarded)
    }

    /// Cut the plan into consecutive slices of at most `limit` units
    #[must_use]
    pub fn split_into_sessions(plan: Vec<SendUnit>, limit: usize) -> Vec<Vec<SendUnit>> {
        let limit = limit.max(1);
        let mut slices = Vec::with_capacity(plan.len().div_ceil(limit));
        let mut remaining = plan.into_iter().peekable();

        while remaining.peek().is_some() {
            slices.push(remaining.by_ref().take(limit).collect());
        }
        slices
    }

    /// Apply the caller's decision.
    ///
    /// Plans within the limit always come back as a single slice.
    ///
    /// # Errors
    /// [`PolicyError::ExceedsLimit`] if the plan is over the limit and the
    /// decision is [`GateDecision::Proceed`]
    pub fn apply(
        &self,
        plan: Vec<SendUnit>,
        decision: GateDecision,
    ) -> Result<GatedPlan, PolicyError> {
        let verdict = self.evaluate(plan.len());
        if verdict != GateVerdict::ExceedsLimit {
            return Ok(GatedPlan {
                verdict,
                slices: vec![plan],
                discarded: Vec::new(),
            });
        }

        match decision {
            GateDecision::Proceed => Err(PolicyError::ExceedsLimit {
                size: plan.len(),
                limit: self.config.max_units,
            }),
            GateDecision::TruncateToLimit => {
                let (kept, discarded) = self.truncate_to_limit(plan);
                Ok(GatedPlan {
                    verdict,
                    slices: vec![kept],
                    discarded,
                })
            }
            GateDecision::SplitIntoSessions => Ok(GatedPlan {
                verdict,
                slices: Self::split_into_sessions(plan, self.config.max_units),
                discarded: Vec::new(),
            }),
        }
    }
}
