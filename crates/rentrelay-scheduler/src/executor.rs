//! Schedule execution: select recipients, render, send, record.
//!
//! An execution is one pass over a schedule's eligible tenants. Every
//! pass is recorded against the schedule, including passes that found
//! nobody to message. A failed send for one tenant never aborts the
//! rest of the pass.

use std::sync::Arc;
use std::time::Duration;

use rentrelay_core::clock::Clock;
use rentrelay_core::error::Result;
use rentrelay_core::types::OutcomeRecord;
use rentrelay_channels::SmsGateway;

use crate::schedule::{ExecutionStats, Schedule, ScheduleStatus};
use crate::store::Store;
use crate::template::{self, RenderContext};
use crate::trigger::TriggerSpec;

/// What one execution did, returned to manual callers. Timer-driven
/// executions log it and drop it.
#[derive(Debug)]
pub struct ExecutionReport {
    pub schedule_id: i64,
    pub stats: ExecutionStats,
    pub outcomes: Vec<OutcomeRecord>,
}

pub struct Executor {
    store: Arc<Store>,
    gateway: Arc<dyn SmsGateway>,
    clock: Arc<dyn Clock>,
    company_name: String,
    /// Pause between consecutive sends, for provider rate limits.
    send_delay: Duration,
    /// Forces test-mode sends regardless of per-schedule settings.
    global_test_mode: bool,
}

impl Executor {
    pub fn new(
        store: Arc<Store>,
        gateway: Arc<dyn SmsGateway>,
        clock: Arc<dyn Clock>,
        company_name: String,
        send_delay: Duration,
        global_test_mode: bool,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            company_name,
            send_delay,
            global_test_mode,
        }
    }

    /// Run one execution pass for a schedule.
    pub async fn execute(&self, schedule_id: i64) -> Result<ExecutionReport> {
        let schedule = self.store.get_schedule(schedule_id)?;
        if schedule.status != ScheduleStatus::Active {
            // Can happen when a timer fires in the same instant the
            // schedule is paused. Nothing is sent or recorded.
            tracing::warn!(
                "Schedule {schedule_id} is {}, skipping execution",
                schedule.status.as_str()
            );
            return Ok(ExecutionReport {
                schedule_id,
                stats: ExecutionStats::new(0, 0, 0, self.clock.now()),
                outcomes: Vec::new(),
            });
        }

        let now = self.clock.now();
        let tenants = self
            .store
            .select_eligible(schedule.conditions.as_ref(), now)?;
        tracing::info!(
            "Executing schedule '{}' (id={}) for {} tenant(s)",
            schedule.name,
            schedule.id,
            tenants.len()
        );

        let test_mode = schedule.test_mode || self.global_test_mode;
        let ctx = RenderContext::new(self.company_name.clone(), now);

        let mut outcomes = Vec::with_capacity(tenants.len());
        let mut successful = 0usize;
        let mut failed = 0usize;

        for (i, tenant) in tenants.iter().enumerate() {
            if i > 0 && !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }

            let content = template::render(&schedule.message_template, tenant, &ctx);
            let receipt = match self.gateway.send(&tenant.contact, &content, test_mode).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Send to tenant {} failed: {e}", tenant.id);
                    rentrelay_core::types::SendReceipt::failure(e.to_string())
                }
            };

            if receipt.success {
                successful += 1;
            } else {
                failed += 1;
            }

            let mut record = OutcomeRecord {
                id: 0,
                schedule_id: Some(schedule.id),
                tenant_id: tenant.id,
                content,
                success: receipt.success,
                message_id: receipt.message_id,
                error: receipt.error,
                test_mode,
                sent_at: self.clock.now(),
            };
            match self.store.log_outcome(&record) {
                Ok(id) => record.id = id,
                // The send already happened; a logging failure must
                // not stop the pass.
                Err(e) => tracing::error!("Failed to log outcome for tenant {}: {e}", tenant.id),
            }
            outcomes.push(record);
        }

        let executed_at = self.clock.now();
        let stats = ExecutionStats::new(tenants.len(), successful, failed, executed_at);
        let next_run = next_fire_for(&schedule, executed_at);
        self.store.record_execution(schedule.id, &stats, next_run)?;

        tracing::info!(
            "Schedule '{}' done: {}/{} sent ({}% success)",
            schedule.name,
            stats.successful_sends,
            stats.total_recipients,
            stats.success_rate
        );

        Ok(ExecutionReport {
            schedule_id: schedule.id,
            stats,
            outcomes,
        })
    }
}

/// Next fire time from a schedule's stored trigger, or None when the
/// stored value no longer parses.
pub fn next_fire_for(
    schedule: &Schedule,
    after: chrono::DateTime<chrono::Utc>,
) -> Option<chrono::DateTime<chrono::Utc>> {
    match TriggerSpec::parse(schedule.trigger_type, &schedule.trigger_value) {
        Ok(spec) => spec.next_fire(after),
        Err(e) => {
            tracing::warn!("Schedule {} has unusable trigger: {e}", schedule.id);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rentrelay_core::clock::ManualClock;
    use rentrelay_core::types::{SendReceipt, Tenant};
    use std::collections::HashSet;
    use std::sync::Mutex;

    use crate::rules::RuleTree;
    use crate::schedule::TriggerType;

    /// Records every send; fails for phone numbers in `fail`.
    #[derive(Default)]
    struct RecordingGateway {
        calls: Mutex<Vec<(String, String, bool)>>,
        fail: HashSet<String>,
    }

    #[async_trait]
    impl SmsGateway for RecordingGateway {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, phone: &str, body: &str, test_mode: bool) -> Result<SendReceipt> {
            self.calls
                .lock()
                .unwrap()
                .push((phone.to_string(), body.to_string(), test_mode));
            if self.fail.contains(phone) {
                return Ok(SendReceipt::failure("Out of quota"));
            }
            Ok(SendReceipt {
                success: true,
                message_id: Some(format!("msg-{phone}")),
                error: None,
                quota_remaining: Some(40),
            })
        }
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 10, 9, 0, 0).unwrap()
    }

    fn tenant(name: &str, phone: &str, paid: bool) -> Tenant {
        Tenant {
            id: 0,
            name: name.into(),
            contact: phone.into(),
            building: None,
            tenant_type: "residential".into(),
            rent_amount: Some(1000),
            due_date: None,
            active: true,
            is_current_month_rent_paid: paid,
            last_payment_date: None,
            late_fee_applicable: false,
            sms_opt_in_status: "opted_in".into(),
            notes: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn schedule(conditions: Option<RuleTree>) -> Schedule {
        Schedule {
            id: 0,
            name: "rent reminder".into(),
            message_template: "Hi {name}, rent is due.".into(),
            trigger_type: TriggerType::Daily,
            trigger_value: "09:00".into(),
            conditions,
            status: ScheduleStatus::Active,
            test_mode: false,
            last_run_at: None,
            next_run_at: Some(now()),
            run_count: 0,
            success_count: 0,
            failure_count: 0,
            last_execution_stats: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn executor(store: Arc<Store>, gateway: Arc<RecordingGateway>) -> Executor {
        Executor::new(
            store,
            gateway,
            Arc::new(ManualClock::new(now())),
            "Jannah Properties".into(),
            Duration::from_millis(0),
            false,
        )
    }

    #[tokio::test]
    async fn sends_to_matching_tenants_and_records_everything() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.insert_tenant(&tenant("Alma", "5550000001", false)).unwrap();
        store.insert_tenant(&tenant("Ben", "5550000002", true)).unwrap();
        store.insert_tenant(&tenant("Cleo", "5550000003", false)).unwrap();

        let unpaid = RuleTree::parse(
            &serde_json::json!({"rules": [
                {"field": "is_current_month_rent_paid", "operator": "eq", "value": false}
            ]}),
            false,
        )
        .unwrap();
        let sched_id = store.insert_schedule(&schedule(Some(unpaid))).unwrap();

        let gateway = Arc::new(RecordingGateway::default());
        let report = executor(store.clone(), gateway.clone())
            .execute(sched_id)
            .await
            .unwrap();

        assert_eq!(report.stats.total_recipients, 2);
        assert_eq!(report.stats.successful_sends, 2);
        assert_eq!(report.stats.success_rate, 100.0);

        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "5550000001");
        assert_eq!(calls[0].1, "Hi Alma, rent is due.");

        // Bookkeeping landed on the schedule row.
        let loaded = store.get_schedule(sched_id).unwrap();
        assert_eq!(loaded.run_count, 1);
        assert_eq!(loaded.success_count, 2);
        assert_eq!(loaded.last_run_at, Some(now()));
        // Daily 09:00 executed at 09:00 → next fire tomorrow.
        assert_eq!(
            loaded.next_run_at,
            Some(Utc.with_ymd_and_hms(2026, 8, 11, 9, 0, 0).unwrap())
        );

        // One outcome row per recipient.
        let outcomes = store.outcomes_for_schedule(sched_id).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.success));
    }

    #[tokio::test]
    async fn one_failed_send_does_not_abort_the_pass() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.insert_tenant(&tenant("Alma", "5550000001", false)).unwrap();
        store.insert_tenant(&tenant("Ben", "5550000002", false)).unwrap();
        store.insert_tenant(&tenant("Cleo", "5550000003", false)).unwrap();
        let sched_id = store.insert_schedule(&schedule(None)).unwrap();

        let gateway = Arc::new(RecordingGateway {
            fail: HashSet::from(["5550000002".to_string()]),
            ..Default::default()
        });
        let report = executor(store.clone(), gateway.clone())
            .execute(sched_id)
            .await
            .unwrap();

        assert_eq!(report.stats.total_recipients, 3);
        assert_eq!(report.stats.successful_sends, 2);
        assert_eq!(report.stats.failed_sends, 1);
        assert_eq!(report.stats.success_rate, 66.7);
        assert_eq!(gateway.calls.lock().unwrap().len(), 3);

        let outcomes = store.outcomes_for_schedule(sched_id).unwrap();
        assert_eq!(outcomes.iter().filter(|o| !o.success).count(), 1);
        let failed = outcomes.iter().find(|o| !o.success).unwrap();
        assert_eq!(failed.error.as_deref(), Some("Out of quota"));
    }

    #[tokio::test]
    async fn zero_recipients_still_records_a_run() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let sched_id = store.insert_schedule(&schedule(None)).unwrap();

        let gateway = Arc::new(RecordingGateway::default());
        let report = executor(store.clone(), gateway.clone())
            .execute(sched_id)
            .await
            .unwrap();

        assert_eq!(report.stats.total_recipients, 0);
        assert_eq!(report.stats.success_rate, 0.0);
        assert!(gateway.calls.lock().unwrap().is_empty());

        let loaded = store.get_schedule(sched_id).unwrap();
        assert_eq!(loaded.run_count, 1);
        assert!(loaded.next_run_at.is_some());
    }

    #[tokio::test]
    async fn schedule_test_mode_reaches_the_gateway() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.insert_tenant(&tenant("Alma", "5550000001", false)).unwrap();
        let mut sched = schedule(None);
        sched.test_mode = true;
        let sched_id = store.insert_schedule(&sched).unwrap();

        let gateway = Arc::new(RecordingGateway::default());
        executor(store.clone(), gateway.clone())
            .execute(sched_id)
            .await
            .unwrap();

        assert!(gateway.calls.lock().unwrap()[0].2);
        let outcomes = store.outcomes_for_schedule(sched_id).unwrap();
        assert!(outcomes[0].test_mode);
    }

    #[tokio::test]
    async fn paused_schedule_is_a_silent_no_op() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.insert_tenant(&tenant("Alma", "5550000001", false)).unwrap();
        let mut sched = schedule(None);
        sched.status = ScheduleStatus::Paused;
        let sched_id = store.insert_schedule(&sched).unwrap();

        let gateway = Arc::new(RecordingGateway::default());
        let report = executor(store.clone(), gateway.clone())
            .execute(sched_id)
            .await
            .unwrap();

        // Unlike a zero-recipient run, nothing is sent or recorded.
        assert_eq!(report.stats.total_recipients, 0);
        assert!(gateway.calls.lock().unwrap().is_empty());
        assert_eq!(store.get_schedule(sched_id).unwrap().run_count, 0);
    }
}
