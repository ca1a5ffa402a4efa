//! Scheduler façade: schedule lifecycle, timer arming, manual runs,
//! and condition previews. This is the only layer the CLI talks to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rentrelay_core::clock::Clock;
use rentrelay_core::config::RentRelayConfig;
use rentrelay_core::error::{RentRelayError, Result};
use rentrelay_core::types::Tenant;
use rentrelay_channels::SmsGateway;

use crate::executor::{next_fire_for, ExecutionReport, Executor};
use crate::registry::TimerRegistry;
use crate::rules::RuleTree;
use crate::schedule::{
    validate_name, validate_template, NewSchedule, Schedule, ScheduleStatus, ScheduleUpdate,
};
use crate::store::Store;
use crate::trigger::TriggerSpec;

/// Snapshot of one schedule's runtime state.
#[derive(Debug)]
pub struct JobStatus {
    pub schedule: Schedule,
    /// A timer task is registered for it.
    pub armed: bool,
    /// An execution is in flight right now.
    pub firing: bool,
}

/// Dry-run result of a condition tree against the current tenants.
#[derive(Debug)]
pub struct ConditionPreview {
    pub matched: usize,
    pub total_active: usize,
    pub summary: String,
    pub tenants: Vec<Tenant>,
}

pub struct SchedulerService {
    store: Arc<Store>,
    registry: Arc<TimerRegistry>,
    executor: Arc<Executor>,
    clock: Arc<dyn Clock>,
    misfire_grace: chrono::Duration,
    strict_rules: bool,
    running: AtomicBool,
}

impl SchedulerService {
    pub fn new(
        store: Arc<Store>,
        gateway: Arc<dyn SmsGateway>,
        clock: Arc<dyn Clock>,
        config: &RentRelayConfig,
    ) -> Self {
        let executor = Arc::new(Executor::new(
            Arc::clone(&store),
            gateway,
            Arc::clone(&clock),
            config.company_name.clone(),
            Duration::from_millis(config.sms.send_delay_ms),
            config.sms.test_mode,
        ));
        Self {
            store,
            registry: Arc::new(TimerRegistry::new()),
            executor,
            clock,
            misfire_grace: chrono::Duration::seconds(config.scheduler.misfire_grace_secs as i64),
            strict_rules: config.scheduler.strict_rules,
            running: AtomicBool::new(false),
        }
    }

    // ─── Lifecycle ──────────────────────────────────────

    /// Arm a timer for every active schedule. Returns how many were
    /// armed. Must run inside a tokio runtime.
    pub fn start(&self) -> Result<usize> {
        self.running.store(true, Ordering::SeqCst);
        let active = self.store.list_schedules_by_status(ScheduleStatus::Active)?;
        let mut armed = 0;
        for schedule in &active {
            match self.arm(schedule) {
                Ok(()) => armed += 1,
                Err(e) => tracing::warn!("Could not arm schedule {}: {e}", schedule.id),
            }
        }
        tracing::info!("Scheduler started with {armed} active schedule(s)");
        Ok(armed)
    }

    /// Abort all timers. In-flight executions finish on their own.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.registry.clear();
        tracing::info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// First fire instant for a schedule being armed. A stored next
    /// run that was missed by less than the misfire grace fires
    /// immediately; older ones skip to the next occurrence.
    fn first_fire(&self, schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match schedule.next_run_at {
            Some(stored) if stored > now => Some(stored),
            Some(stored) if now - stored <= self.misfire_grace => {
                tracing::info!(
                    "Schedule {} missed its {} run within grace, firing now",
                    schedule.id,
                    stored
                );
                Some(now)
            }
            _ => next_fire_for(schedule, now),
        }
    }

    fn arm(&self, schedule: &Schedule) -> Result<()> {
        let spec = TriggerSpec::parse(schedule.trigger_type, &schedule.trigger_value)?;
        let now = self.clock.now();
        let mut fire_at = self.first_fire(schedule, now).ok_or_else(|| {
            RentRelayError::Validation(format!(
                "schedule {} has no future fire time",
                schedule.id
            ))
        })?;
        if schedule.next_run_at != Some(fire_at) {
            self.store.set_next_run(schedule.id, Some(fire_at), now)?;
        }

        let id = schedule.id;
        let registry = Arc::clone(&self.registry);
        let executor = Arc::clone(&self.executor);
        let clock = Arc::clone(&self.clock);

        let handle = tokio::spawn(async move {
            loop {
                let delay = (fire_at - clock.now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(delay).await;

                match registry.try_begin_fire(id) {
                    Some(guard) => {
                        let executor = Arc::clone(&executor);
                        // Detached: pausing or deleting the schedule
                        // aborts this timer, never the execution.
                        tokio::spawn(async move {
                            let _guard = guard;
                            if let Err(e) = executor.execute(id).await {
                                tracing::warn!("Scheduled execution of {id} failed: {e}");
                            }
                        });
                    }
                    None => {
                        tracing::warn!(
                            "Schedule {id} fired while still executing, skipping this run"
                        );
                    }
                }

                fire_at = match spec.next_fire(clock.now()) {
                    Some(next) => next,
                    None => {
                        tracing::warn!("Schedule {id} has no further fire times, timer ending");
                        break;
                    }
                };
            }
        });
        self.registry.arm(id, handle);
        Ok(())
    }

    // ─── Schedule CRUD ──────────────────────────────────────

    pub fn create_schedule(&self, input: NewSchedule) -> Result<Schedule> {
        let name = validate_name(&input.name)?;
        let message_template = validate_template(&input.message_template)?;
        let spec = TriggerSpec::parse(input.trigger_type, &input.trigger_value)?;
        let conditions = RuleTree::parse_opt(input.conditions.as_ref(), self.strict_rules)?;

        let now = self.clock.now();
        let mut schedule = Schedule {
            id: 0,
            name,
            message_template,
            trigger_type: input.trigger_type,
            trigger_value: input.trigger_value.trim().to_string(),
            conditions,
            status: ScheduleStatus::Active,
            test_mode: input.test_mode,
            last_run_at: None,
            next_run_at: spec.next_fire(now),
            run_count: 0,
            success_count: 0,
            failure_count: 0,
            last_execution_stats: None,
            created_at: now,
            updated_at: now,
        };
        schedule.id = self.store.insert_schedule(&schedule)?;
        tracing::info!("Created schedule '{}' (id={})", schedule.name, schedule.id);

        if self.is_running() {
            self.arm(&schedule)?;
        }
        Ok(schedule)
    }

    pub fn update_schedule(&self, id: i64, update: ScheduleUpdate) -> Result<Schedule> {
        let mut schedule = self.store.get_schedule(id)?;

        if let Some(name) = update.name {
            schedule.name = validate_name(&name)?;
        }
        if let Some(template) = update.message_template {
            schedule.message_template = validate_template(&template)?;
        }
        let mut trigger_changed = false;
        if let Some(trigger_type) = update.trigger_type {
            trigger_changed = trigger_changed || trigger_type != schedule.trigger_type;
            schedule.trigger_type = trigger_type;
        }
        if let Some(trigger_value) = update.trigger_value {
            let trimmed = trigger_value.trim().to_string();
            trigger_changed = trigger_changed || trimmed != schedule.trigger_value;
            schedule.trigger_value = trimmed;
        }
        if let Some(conditions) = update.conditions {
            schedule.conditions = RuleTree::parse_opt(Some(&conditions), self.strict_rules)?;
        }
        if let Some(test_mode) = update.test_mode {
            schedule.test_mode = test_mode;
        }

        let now = self.clock.now();
        let spec = TriggerSpec::parse(schedule.trigger_type, &schedule.trigger_value)?;
        if trigger_changed {
            // paused and disabled schedules carry no next run; resume
            // recomputes from the new trigger
            schedule.next_run_at = if schedule.status == ScheduleStatus::Active {
                spec.next_fire(now)
            } else {
                None
            };
        }
        schedule.updated_at = now;
        self.store.update_schedule(&schedule)?;
        tracing::info!("Updated schedule '{}' (id={})", schedule.name, schedule.id);

        if trigger_changed && self.is_running() && schedule.status == ScheduleStatus::Active {
            self.arm(&schedule)?;
        }
        Ok(schedule)
    }

    pub fn pause_schedule(&self, id: i64) -> Result<()> {
        let schedule = self.store.get_schedule(id)?;
        if schedule.status != ScheduleStatus::Active {
            return Err(RentRelayError::Validation(format!(
                "schedule {id} is {}, only active schedules can be paused",
                schedule.status.as_str()
            )));
        }
        let now = self.clock.now();
        self.store.set_schedule_status(id, ScheduleStatus::Paused, now)?;
        self.store.set_next_run(id, None, now)?;
        self.registry.disarm(id);
        tracing::info!("Paused schedule '{}' (id={id})", schedule.name);
        Ok(())
    }

    pub fn resume_schedule(&self, id: i64) -> Result<()> {
        let mut schedule = self.store.get_schedule(id)?;
        if schedule.status != ScheduleStatus::Paused {
            return Err(RentRelayError::Validation(format!(
                "schedule {id} is {}, only paused schedules can be resumed",
                schedule.status.as_str()
            )));
        }
        let now = self.clock.now();
        self.store.set_schedule_status(id, ScheduleStatus::Active, now)?;
        schedule.status = ScheduleStatus::Active;
        schedule.next_run_at = next_fire_for(&schedule, now);
        self.store.set_next_run(id, schedule.next_run_at, now)?;
        if self.is_running() {
            self.arm(&schedule)?;
        }
        tracing::info!("Resumed schedule '{}' (id={id})", schedule.name);
        Ok(())
    }

    /// Take a schedule out of service without deleting its history.
    /// Disabled schedules never fire again and cannot be resumed.
    pub fn disable_schedule(&self, id: i64) -> Result<()> {
        let schedule = self.store.get_schedule(id)?;
        let now = self.clock.now();
        self.store.set_schedule_status(id, ScheduleStatus::Disabled, now)?;
        self.store.set_next_run(id, None, now)?;
        self.registry.disarm(id);
        tracing::info!("Disabled schedule '{}' (id={id})", schedule.name);
        Ok(())
    }

    /// Idempotent: deleting a schedule that no longer exists succeeds.
    pub fn delete_schedule(&self, id: i64) -> Result<()> {
        self.registry.disarm(id);
        match self.store.delete_schedule(id) {
            Ok(()) => {
                tracing::info!("Deleted schedule {id}");
                Ok(())
            }
            Err(RentRelayError::NotFound(_)) => {
                tracing::debug!("Schedule {id} already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ─── Execution ──────────────────────────────────────

    /// Execute a schedule immediately, outside its timer. Refused
    /// while a timer-driven run of the same schedule is in flight.
    pub async fn run_now(&self, id: i64) -> Result<ExecutionReport> {
        let schedule = self.store.get_schedule(id)?;
        if schedule.status != ScheduleStatus::Active {
            return Err(RentRelayError::Validation(format!(
                "schedule {id} is {} and cannot be run",
                schedule.status.as_str()
            )));
        }
        let _guard = self
            .registry
            .try_begin_fire(id)
            .ok_or(RentRelayError::AlreadyRunning(id))?;
        self.executor.execute(id).await
    }

    pub fn job_status(&self, id: i64) -> Result<JobStatus> {
        let schedule = self.store.get_schedule(id)?;
        Ok(JobStatus {
            armed: self.registry.is_armed(schedule.id),
            firing: self.registry.is_firing(schedule.id),
            schedule,
        })
    }

    pub fn list_jobs(&self) -> Result<Vec<JobStatus>> {
        Ok(self
            .store
            .list_schedules()?
            .into_iter()
            .map(|schedule| JobStatus {
                armed: self.registry.is_armed(schedule.id),
                firing: self.registry.is_firing(schedule.id),
                schedule,
            })
            .collect())
    }

    // ─── Conditions ──────────────────────────────────────

    /// Evaluate a condition tree without sending anything.
    pub fn test_conditions(&self, conditions: Option<&serde_json::Value>) -> Result<ConditionPreview> {
        let tree = RuleTree::parse_opt(conditions, self.strict_rules)?;
        let now = self.clock.now();
        let total_active = self.store.select_eligible(None, now)?.len();
        let tenants = self.store.select_eligible(tree.as_ref(), now)?;
        Ok(ConditionPreview {
            matched: tenants.len(),
            total_active,
            summary: tree
                .as_ref()
                .map(|t| t.summarize())
                .unwrap_or_else(|| "All active tenants".into()),
            tenants,
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}
