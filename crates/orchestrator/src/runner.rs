//! The pipeline runner: claims eligible phases one at a time, invokes their
//! handlers, records outcomes, and contains failures to true dependents.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use db::{
    DbError, ExecutionRepository, PhaseRecordRepository, PhaseTransition, SqlitePool,
};
use events::{Event, EventBus};
use serplens_core::{
    CoreError, ExecutionSummary, PhaseOutput, PhaseRecord, PhaseRegistry, PhaseStatus,
    PipelineExecution,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::PhaseContext;
use crate::error::{OrchestratorError, Result};
use crate::handler::{HandlerRegistry, PhaseHandler};
use crate::scheduler;

/// Error message stored on a running record reclaimed after its lease expired.
const RECLAIM_ERROR: &str = "stale running phase reclaimed";

/// Drives pipeline executions against the durable phase store.
///
/// One runner serves any number of executions; within an execution the run
/// loop is strictly sequential. Every state mutation goes through the store's
/// guarded transitions, so concurrent runners over the same execution never
/// double-invoke a handler.
#[derive(Clone)]
pub struct PipelineRunner {
    registry: Arc<PhaseRegistry>,
    handlers: HandlerRegistry,
    executions: ExecutionRepository,
    records: PhaseRecordRepository,
    event_bus: Option<EventBus>,
    reclaim_after: Option<Duration>,
}

impl PipelineRunner {
    pub fn new(registry: PhaseRegistry, pool: SqlitePool) -> Self {
        Self {
            registry: Arc::new(registry),
            handlers: HandlerRegistry::new(),
            executions: ExecutionRepository::new(pool.clone()),
            records: PhaseRecordRepository::new(pool),
            event_bus: None,
            reclaim_after: None,
        }
    }

    /// Publish lifecycle events to `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Treat a `running` record older than `stale_after` as abandoned at the
    /// start of a run: it is failed in place and its dependents blocked, which
    /// puts it within reach of `retry_phase`. Off by default; without a lease
    /// a foreign running record is assumed to belong to a live process.
    pub fn with_reclaim_after(mut self, stale_after: Duration) -> Self {
        self.reclaim_after = Some(stale_after);
        self
    }

    /// Register the handler that executes `phase_name`.
    pub fn register_handler(
        &mut self,
        phase_name: impl Into<String>,
        handler: impl PhaseHandler + 'static,
    ) {
        self.handlers.register(phase_name, handler);
    }

    /// Create an execution and one pending record per enabled phase.
    ///
    /// Enabled phases must be registered, free of repeats, and
    /// dependency-closed: every dependency of an enabled phase must itself be
    /// enabled. Re-initializing an existing execution with the same phase set
    /// is a no-op; with a different set it is rejected.
    pub async fn initialize_pipeline(
        &self,
        execution_id: Uuid,
        enabled_phases: &[String],
        config: serde_json::Value,
    ) -> Result<PipelineExecution> {
        let mut seen = HashSet::new();
        for phase in enabled_phases {
            if !self.registry.contains(phase) {
                return Err(CoreError::UnknownPhase(phase.clone()).into());
            }
            if !seen.insert(phase.as_str()) {
                return Err(OrchestratorError::DuplicateEnabledPhase {
                    phase: phase.clone(),
                });
            }
        }
        for phase in enabled_phases {
            for dep in self.registry.dependencies_of(phase)? {
                if !enabled_phases.iter().any(|p| p == dep) {
                    return Err(OrchestratorError::DependencyNotEnabled {
                        phase: phase.clone(),
                        dependency: dep.to_string(),
                    });
                }
            }
        }

        let execution = PipelineExecution::new(execution_id, enabled_phases.to_vec(), config);
        let inserted = self.executions.create(&execution).await?;
        let stored = self.executions.get(execution_id).await?;

        if !inserted {
            let mut requested = execution.enabled_phases.clone();
            let mut existing = stored.enabled_phases.clone();
            requested.sort_unstable();
            existing.sort_unstable();
            if requested != existing {
                return Err(OrchestratorError::DuplicateExecution { execution_id });
            }
            debug!(execution_id = %execution_id, "initialize re-entry with unchanged phase set");
        }

        let created = self.records.initialize(execution_id, &stored.enabled_phases).await?;
        if created > 0 {
            info!(
                execution_id = %execution_id,
                phases = stored.enabled_phases.len(),
                "pipeline execution initialized"
            );
            self.emit(Event::ExecutionInitialized {
                execution_id,
                enabled_phases: stored.enabled_phases.clone(),
            });
        }

        Ok(stored)
    }

    /// Drive `execution_id` until no phase is claimable, then derive and
    /// persist the outcome.
    ///
    /// Safe to call repeatedly: completed phases are never re-invoked, and a
    /// run over an already-finished execution returns its summary untouched.
    /// Fails up front if any enabled phase lacks a handler.
    pub async fn run(&self, execution_id: Uuid) -> Result<ExecutionSummary> {
        let execution = self.executions.get(execution_id).await?;

        let missing = self.handlers.missing_from(&execution.enabled_phases);
        if let Some(phase) = missing.into_iter().next() {
            return Err(OrchestratorError::MissingHandler(phase));
        }

        // An execution row without its records means initialization was cut
        // short; recreate them before scheduling.
        let created = self
            .records
            .initialize(execution_id, &execution.enabled_phases)
            .await?;
        if created > 0 {
            warn!(execution_id = %execution_id, created, "recreated missing phase records");
        }

        if let Some(stale_after) = self.reclaim_after {
            self.reclaim_stale(execution_id, stale_after).await?;
        }
        self.repair_blocking(execution_id).await?;

        debug!(execution_id = %execution_id, "entering run loop");

        loop {
            let records = self.records.list(execution_id).await?;
            if scheduler::has_running(&records) {
                // The in-flight phase belongs to another process; let it finish.
                debug!(execution_id = %execution_id, "a phase is already running elsewhere");
                break;
            }
            let Some(phase) = scheduler::next_phase(self.registry.as_ref(), &records)? else {
                break;
            };

            match self
                .records
                .transition(execution_id, &phase, PhaseStatus::Pending, PhaseTransition::Started)
                .await
            {
                Ok(_) => {}
                Err(DbError::InvalidTransition { from, .. }) => {
                    // Lost the claim race; re-evaluate against fresh state.
                    warn!(execution_id = %execution_id, phase = %phase, found = %from, "claim lost, re-polling");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            info!(execution_id = %execution_id, phase = %phase, "phase started");
            self.emit(Event::PhaseStarted {
                execution_id,
                phase: phase.clone(),
            });

            let ctx = self.build_context(&execution, &phase, &records)?;
            let handler = self
                .handlers
                .get(&phase)
                .ok_or_else(|| OrchestratorError::MissingHandler(phase.clone()))?;

            match handler.execute(&ctx).await {
                Ok(output) if output.success => {
                    self.complete_phase(execution_id, &phase, output).await?;
                }
                Ok(output) => {
                    let message = output
                        .error
                        .unwrap_or_else(|| "phase reported failure".to_string());
                    self.fail_phase(execution_id, &phase, message).await?;
                }
                Err(e) => {
                    self.fail_phase(execution_id, &phase, format!("{e:#}")).await?;
                }
            }
        }

        self.finalize(execution_id).await
    }

    /// Reset a failed or blocked phase to pending so the next run re-attempts
    /// it. Records it had blocked go back to pending too, and blocking is
    /// re-propagated from any other failure that still stands.
    pub async fn retry_phase(&self, execution_id: Uuid, phase_name: &str) -> Result<()> {
        self.executions.get(execution_id).await?;
        let record = self.records.get(execution_id, phase_name).await?;

        if !matches!(record.status, PhaseStatus::Failed | PhaseStatus::Blocked) {
            return Err(OrchestratorError::InvalidRetry {
                phase: phase_name.to_string(),
                reason: format!("phase is {}", record.status),
            });
        }

        let records = self.records.list(execution_id).await?;
        let by_name: HashMap<&str, &PhaseRecord> = records
            .iter()
            .map(|r| (r.phase_name.as_str(), r))
            .collect();
        for dep in self.registry.dependencies_of(phase_name)? {
            let ready = by_name
                .get(dep)
                .map(|r| r.status == PhaseStatus::Completed)
                .unwrap_or(false);
            if !ready {
                return Err(OrchestratorError::InvalidRetry {
                    phase: phase_name.to_string(),
                    reason: format!("dependency {dep} is not completed"),
                });
            }
        }

        match self
            .records
            .transition(execution_id, phase_name, record.status, PhaseTransition::Reset)
            .await
        {
            Ok(_) => {}
            Err(DbError::InvalidTransition { from, .. }) => {
                return Err(OrchestratorError::InvalidRetry {
                    phase: phase_name.to_string(),
                    reason: format!("phase moved to {from} concurrently"),
                });
            }
            Err(e) => return Err(e.into()),
        }

        info!(execution_id = %execution_id, phase = %phase_name, "phase reset for retry");
        self.emit(Event::PhaseRetried {
            execution_id,
            phase: phase_name.to_string(),
        });

        // Free the records this phase had blocked, then let propagation from
        // any remaining failure decide which of them stay runnable.
        for blocked in self
            .records
            .find_by_status(execution_id, PhaseStatus::Blocked)
            .await?
        {
            if blocked.blocked_by.as_deref() != Some(phase_name) {
                continue;
            }
            match self
                .records
                .transition(
                    execution_id,
                    &blocked.phase_name,
                    PhaseStatus::Blocked,
                    PhaseTransition::Reset,
                )
                .await
            {
                Ok(_) => {
                    debug!(execution_id = %execution_id, phase = %blocked.phase_name, "unblocked by retry");
                }
                Err(DbError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.repair_blocking(execution_id).await?;

        if self.executions.reopen(execution_id).await? {
            info!(execution_id = %execution_id, "execution reopened");
        }

        Ok(())
    }

    /// Skip every pending phase. A running phase is left to finish naturally
    /// and its outcome is still recorded.
    pub async fn cancel(&self, execution_id: Uuid) -> Result<()> {
        self.executions.get(execution_id).await?;

        let pending = self
            .records
            .find_by_status(execution_id, PhaseStatus::Pending)
            .await?;
        let mut skipped = 0;
        for record in pending {
            match self
                .records
                .transition(
                    execution_id,
                    &record.phase_name,
                    PhaseStatus::Pending,
                    PhaseTransition::Skipped,
                )
                .await
            {
                Ok(_) => {
                    skipped += 1;
                    info!(execution_id = %execution_id, phase = %record.phase_name, "phase skipped");
                    self.emit(Event::PhaseSkipped {
                        execution_id,
                        phase: record.phase_name.clone(),
                    });
                }
                // Claimed in the meantime; it finishes on its own.
                Err(DbError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!(execution_id = %execution_id, skipped, "execution cancelled");
        self.emit(Event::ExecutionCancelled {
            execution_id,
            skipped,
        });

        // With nothing in flight the terminal status can land now; otherwise
        // the active runner finalizes when its phase returns.
        let records = self.records.list(execution_id).await?;
        if !scheduler::has_running(&records) {
            self.finalize(execution_id).await?;
        }
        Ok(())
    }

    /// Current phase records for an execution, ordered by phase name.
    pub async fn get_status(&self, execution_id: Uuid) -> Result<Vec<PhaseRecord>> {
        self.executions.get(execution_id).await?;
        Ok(self.records.list(execution_id).await?)
    }

    /// Aggregate view over the current records, without driving anything.
    pub async fn summary(&self, execution_id: Uuid) -> Result<ExecutionSummary> {
        let records = self.get_status(execution_id).await?;
        Ok(ExecutionSummary::from_records(execution_id, records))
    }

    fn build_context(
        &self,
        execution: &PipelineExecution,
        phase: &str,
        records: &[PhaseRecord],
    ) -> Result<PhaseContext> {
        let ancestors = self.registry.transitive_dependencies(phase)?;
        let mut upstream = HashMap::new();
        for record in records {
            if record.status != PhaseStatus::Completed {
                continue;
            }
            if !ancestors.contains(&record.phase_name.as_str()) {
                continue;
            }
            if let Some(data) = &record.result_data {
                upstream.insert(record.phase_name.clone(), data.clone());
            }
        }
        Ok(PhaseContext::new(
            execution.id,
            phase,
            execution.config.clone(),
            upstream,
        ))
    }

    async fn complete_phase(
        &self,
        execution_id: Uuid,
        phase: &str,
        output: PhaseOutput,
    ) -> Result<()> {
        let result_data = serde_json::to_value(&output).unwrap_or(serde_json::Value::Null);
        match self
            .records
            .transition(
                execution_id,
                phase,
                PhaseStatus::Running,
                PhaseTransition::Completed { result_data },
            )
            .await
        {
            Ok(_) => {
                info!(execution_id = %execution_id, phase = %phase, "phase completed");
                self.emit(Event::PhaseCompleted {
                    execution_id,
                    phase: phase.to_string(),
                });
                Ok(())
            }
            Err(DbError::InvalidTransition { from, .. }) => {
                // The record moved under us, e.g. reclaimed by another runner.
                warn!(execution_id = %execution_id, phase = %phase, found = %from, "completion write lost ownership");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fail_phase(&self, execution_id: Uuid, phase: &str, message: String) -> Result<()> {
        error!(execution_id = %execution_id, phase = %phase, error = %message, "phase failed");
        match self
            .records
            .transition(
                execution_id,
                phase,
                PhaseStatus::Running,
                PhaseTransition::Failed {
                    error_message: message.clone(),
                },
            )
            .await
        {
            Ok(_) => {}
            Err(DbError::InvalidTransition { from, .. }) => {
                warn!(execution_id = %execution_id, phase = %phase, found = %from, "failure write lost ownership");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        self.emit(Event::PhaseFailed {
            execution_id,
            phase: phase.to_string(),
            error: message,
        });
        self.block_dependents(execution_id, phase).await
    }

    /// Mark every still-pending transitive dependent of `failed_phase` as
    /// blocked, recording the failure as the cause. A record that moved in
    /// the meantime, or was already blocked by an earlier failure, keeps its
    /// state: the first writer wins.
    async fn block_dependents(&self, execution_id: Uuid, failed_phase: &str) -> Result<()> {
        let records = self.records.list(execution_id).await?;
        let cone = scheduler::blocked_cone(self.registry.as_ref(), &records, failed_phase)?;

        for phase in cone {
            match self
                .records
                .transition(
                    execution_id,
                    &phase,
                    PhaseStatus::Pending,
                    PhaseTransition::Blocked {
                        blocked_by: failed_phase.to_string(),
                    },
                )
                .await
            {
                Ok(_) => {
                    info!(execution_id = %execution_id, phase = %phase, blocked_by = %failed_phase, "phase blocked");
                    self.emit(Event::PhaseBlocked {
                        execution_id,
                        phase,
                        blocked_by: failed_phase.to_string(),
                    });
                }
                Err(DbError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Re-run blocking propagation for every failed record. Heals the window
    /// where a crash separated a failure write from its propagation.
    async fn repair_blocking(&self, execution_id: Uuid) -> Result<()> {
        let failed = self
            .records
            .find_by_status(execution_id, PhaseStatus::Failed)
            .await?;
        for record in failed {
            self.block_dependents(execution_id, &record.phase_name).await?;
        }
        Ok(())
    }

    async fn reclaim_stale(&self, execution_id: Uuid, stale_after: Duration) -> Result<()> {
        let cutoff = Utc::now() - stale_after;
        let running = self
            .records
            .find_by_status(execution_id, PhaseStatus::Running)
            .await?;
        for record in running {
            if record.updated_at > cutoff {
                continue;
            }
            warn!(execution_id = %execution_id, phase = %record.phase_name, "reclaiming stale running phase");
            match self
                .records
                .transition(
                    execution_id,
                    &record.phase_name,
                    PhaseStatus::Running,
                    PhaseTransition::Failed {
                        error_message: RECLAIM_ERROR.to_string(),
                    },
                )
                .await
            {
                Ok(_) => {
                    self.emit(Event::PhaseFailed {
                        execution_id,
                        phase: record.phase_name.clone(),
                        error: RECLAIM_ERROR.to_string(),
                    });
                    self.block_dependents(execution_id, &record.phase_name).await?;
                }
                // The owner finished in the meantime.
                Err(DbError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn finalize(&self, execution_id: Uuid) -> Result<ExecutionSummary> {
        let records = self.records.list(execution_id).await?;
        let summary = ExecutionSummary::from_records(execution_id, records);

        if summary.status.is_terminal() {
            let finished = self
                .executions
                .finish(execution_id, summary.status, Utc::now())
                .await?;
            if finished {
                info!(
                    execution_id = %execution_id,
                    status = %summary.status,
                    completed = summary.completed,
                    failed = summary.failed,
                    blocked = summary.blocked,
                    skipped = summary.skipped,
                    "execution finished"
                );
                self.emit(Event::ExecutionFinished {
                    execution_id,
                    status: summary.status.as_str().to_string(),
                });
            }
        } else {
            debug!(execution_id = %execution_id, "execution still has work in flight");
        }

        Ok(summary)
    }

    fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}
