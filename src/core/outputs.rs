//! Per-output gamma control bookkeeping.
//!
//! The table is an id-indexed arena of [`OutputRecord`]s. Every record moves
//! through `Uninitialized → AwaitingSize → Ready ⇄ Failed`; the `Failed` state
//! carries the time of its next recreation attempt, so the actor drives all
//! retries from a single scan instead of one timer per failure.
//!
//! Nothing here touches protocol objects. The actor owns the protocol and
//! updates the table to mirror what it did.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::backend::OutputId;
use crate::config::EngineTiming;
use crate::constants::{FAILURE_LOG_INTERVAL, VIRTUAL_OUTPUT_PREFIX};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlState {
    /// No control object exists.
    Uninitialized,
    /// Control requested, gamma size not reported yet.
    AwaitingSize,
    Ready { ramp_size: u32 },
    /// The control failed. `retry_at` is `None` once the output is abandoned.
    Failed {
        last_fail: Instant,
        retry_at: Option<Instant>,
    },
}

#[derive(Debug, Clone)]
pub struct OutputRecord {
    pub id: OutputId,
    pub name: String,
    pub registry_name: u32,
    pub is_virtual: bool,
    pub state: ControlState,
    pub retry_count: u32,
}

impl OutputRecord {
    pub fn has_control(&self) -> bool {
        matches!(
            self.state,
            ControlState::AwaitingSize | ControlState::Ready { .. }
        )
    }

    pub fn ramp_size(&self) -> Option<u32> {
        match self.state {
            ControlState::Ready { ramp_size } => Some(ramp_size),
            _ => None,
        }
    }
}

/// Outcome of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Failure {
    pub retry_count: u32,
    pub retry_at: Instant,
    /// Only the first and every fifth consecutive failure is worth a log line.
    pub should_log: bool,
}

/// What a due retry should do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    Recreate,
    Abandon,
    Skip,
}

#[derive(Debug, Default)]
pub struct OutputTable {
    records: BTreeMap<OutputId, OutputRecord>,
    controls_initialized: bool,
}

impl OutputTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn controls_initialized(&self) -> bool {
        self.controls_initialized
    }

    pub fn set_controls_initialized(&mut self, initialized: bool) {
        self.controls_initialized = initialized;
    }

    pub fn get(&self, id: OutputId) -> Option<&OutputRecord> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn add(&mut self, id: OutputId, registry_name: u32) {
        self.records.insert(
            id,
            OutputRecord {
                id,
                name: String::new(),
                registry_name,
                is_virtual: false,
                state: ControlState::Uninitialized,
                retry_count: 0,
            },
        );
    }

    /// Record the connector name. Returns true if this marked the output
    /// virtual while it still held a control, which the caller must destroy.
    pub fn set_name(&mut self, id: OutputId, name: String) -> bool {
        let Some(record) = self.records.get_mut(&id) else {
            return false;
        };
        record.is_virtual = name.starts_with(VIRTUAL_OUTPUT_PREFIX);
        record.name = name;

        if record.is_virtual && record.state != ControlState::Uninitialized {
            let had_control = record.has_control();
            record.state = ControlState::Uninitialized;
            return had_control;
        }
        false
    }

    /// Remove the output whose global had this registry name.
    ///
    /// Clears the initialized flag once no physical outputs remain, so the
    /// next hot-plug sets controls up from scratch.
    pub fn remove_by_registry(&mut self, registry_name: u32) -> Option<OutputRecord> {
        let id = self
            .records
            .values()
            .find(|r| r.registry_name == registry_name)
            .map(|r| r.id)?;
        let record = self.records.remove(&id);

        if self.physical_count() == 0 {
            self.controls_initialized = false;
        }
        record
    }

    pub fn physical_count(&self) -> usize {
        self.records.values().filter(|r| !r.is_virtual).count()
    }

    /// Physical outputs that currently have no live control.
    pub fn without_control(&self) -> Vec<OutputId> {
        self.records
            .values()
            .filter(|r| !r.is_virtual && !r.has_control())
            .map(|r| r.id)
            .collect()
    }

    /// Outputs whose control should be destroyed on teardown.
    pub fn with_control(&self) -> Vec<OutputId> {
        self.records
            .values()
            .filter(|r| r.state != ControlState::Uninitialized)
            .map(|r| r.id)
            .collect()
    }

    pub fn mark_awaiting(&mut self, id: OutputId) {
        if let Some(record) = self.records.get_mut(&id) {
            record.state = ControlState::AwaitingSize;
        }
    }

    /// Give an abandoned output a fresh retry budget.
    pub fn reset_retry_count(&mut self, id: OutputId) {
        if let Some(record) = self.records.get_mut(&id) {
            record.retry_count = 0;
        }
    }

    /// The compositor reported the gamma size: the output is usable and its
    /// failure count starts over. Returns false for unknown outputs.
    pub fn mark_ready(&mut self, id: OutputId, ramp_size: u32) -> bool {
        let Some(record) = self.records.get_mut(&id) else {
            return false;
        };
        record.state = ControlState::Ready { ramp_size };
        record.retry_count = 0;
        true
    }

    pub fn mark_failed(&mut self, id: OutputId, now: Instant, timing: &EngineTiming) -> Option<Failure> {
        let record = self.records.get_mut(&id)?;
        record.retry_count += 1;
        let retry_at = now + timing.backoff(record.retry_count);
        record.state = ControlState::Failed {
            last_fail: now,
            retry_at: Some(retry_at),
        };

        Some(Failure {
            retry_count: record.retry_count,
            retry_at,
            should_log: record.retry_count == 1 || record.retry_count % FAILURE_LOG_INTERVAL == 0,
        })
    }

    /// Outputs whose scheduled retry time has passed.
    pub fn due_retries(&self, now: Instant) -> Vec<OutputId> {
        self.records
            .values()
            .filter(|r| {
                matches!(r.state, ControlState::Failed { retry_at: Some(at), .. } if at <= now)
            })
            .map(|r| r.id)
            .collect()
    }

    pub fn next_retry_at(&self) -> Option<Instant> {
        self.records
            .values()
            .filter_map(|r| match r.state {
                ControlState::Failed { retry_at, .. } => retry_at,
                _ => None,
            })
            .min()
    }

    /// Decide what a due retry does, given whether the feature is enabled.
    pub fn retry_decision(&self, id: OutputId, enabled: bool, max_retries: u32) -> RetryDecision {
        let Some(record) = self.records.get(&id) else {
            return RetryDecision::Skip;
        };
        if !enabled || !self.controls_initialized || record.is_virtual {
            return RetryDecision::Abandon;
        }
        if record.retry_count >= max_retries {
            return RetryDecision::Abandon;
        }
        RetryDecision::Recreate
    }

    /// Stop retrying this output until it is hot-plugged again.
    pub fn abandon(&mut self, id: OutputId) {
        if let Some(record) = self.records.get_mut(&id)
            && let ControlState::Failed { retry_at, .. } = &mut record.state
        {
            *retry_at = None;
        }
    }

    /// Ready outputs and their table sizes.
    pub fn ready_outputs(&self) -> Vec<(OutputId, u32)> {
        self.records
            .values()
            .filter_map(|r| r.ramp_size().map(|size| (r.id, size)))
            .collect()
    }

    /// True when at least one control exists and none is still waiting for
    /// its gamma size. Failed outputs, retrying or abandoned, never hold back
    /// the healthy ones.
    pub fn all_ready(&self) -> bool {
        let mut controls = self
            .records
            .values()
            .filter(|r| !r.is_virtual && r.has_control())
            .peekable();
        controls.peek().is_some() && controls.all(|r| r.ramp_size().is_some())
    }

    /// Forget every control after teardown. Records stay so hot-plug removal
    /// and later re-enabling still find them.
    pub fn reset_controls(&mut self) {
        for record in self.records.values_mut() {
            record.state = ControlState::Uninitialized;
            record.retry_count = 0;
        }
        self.controls_initialized = false;
    }
}
