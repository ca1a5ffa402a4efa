//! SQLite-backed persistence for schedules, tenants, and the message
//! log. One database file, short-lived lock holds, RFC3339 timestamps.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rentrelay_core::error::{RentRelayError, Result};
use rentrelay_core::types::{OutcomeRecord, Tenant};

use crate::rules::RuleTree;
use crate::schedule::{ExecutionStats, Schedule, ScheduleStatus, TriggerType};

const SCHEDULE_COLS: &str = "id, name, message_template, trigger_type, trigger_value, conditions, \
     status, test_mode, last_run_at, next_run_at, run_count, success_count, failure_count, \
     last_execution_stats, created_at, updated_at";

const TENANT_COLS: &str = "id, name, contact, building, tenant_type, rent_amount, due_date, \
     active, is_current_month_rent_paid, last_payment_date, late_fee_applicable, \
     sms_opt_in_status, notes, created_at, updated_at";

/// Shared database handle. Lock is held only for the duration of one
/// statement; timer tasks and the CLI go through the same instance.
pub struct Store {
    conn: Mutex<rusqlite::Connection>,
}

impl Store {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RentRelayError::Persistence(format!("create db dir: {e}")))?;
        }
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| RentRelayError::Persistence(format!("db open: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| RentRelayError::Persistence(format!("db open: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS schedules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                message_template TEXT NOT NULL,
                trigger_type TEXT NOT NULL,      -- 'daily', 'weekly', 'monthly', 'cron'
                trigger_value TEXT NOT NULL,
                conditions TEXT,                 -- JSON rule tree, NULL = all active tenants
                status TEXT NOT NULL DEFAULT 'active',
                test_mode INTEGER NOT NULL DEFAULT 0,
                last_run_at TEXT,
                next_run_at TEXT,
                run_count INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                last_execution_stats TEXT,       -- JSON
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tenants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                contact TEXT NOT NULL,
                building TEXT,
                tenant_type TEXT NOT NULL DEFAULT 'residential',
                rent_amount INTEGER,
                due_date TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                is_current_month_rent_paid INTEGER NOT NULL DEFAULT 0,
                last_payment_date TEXT,
                late_fee_applicable INTEGER NOT NULL DEFAULT 0,
                sms_opt_in_status TEXT NOT NULL DEFAULT 'opted_in',
                notes TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Append-only send log
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                schedule_id INTEGER,
                tenant_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                success INTEGER NOT NULL,
                message_id TEXT,
                error TEXT,
                test_mode INTEGER NOT NULL DEFAULT 0,
                sent_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_schedule ON messages(schedule_id);
            CREATE INDEX IF NOT EXISTS idx_messages_tenant ON messages(tenant_id);
         ",
            )
            .map_err(|e| RentRelayError::Persistence(format!("migration: {e}")))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| RentRelayError::Persistence("db lock poisoned".into()))
    }

    // ─── Schedules ──────────────────────────────────────

    /// Insert a schedule (id ignored) and return it with its new id.
    pub fn insert_schedule(&self, sched: &Schedule) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO schedules
             (name, message_template, trigger_type, trigger_value, conditions, status, test_mode,
              last_run_at, next_run_at, run_count, success_count, failure_count,
              last_execution_stats, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            rusqlite::params![
                sched.name,
                sched.message_template,
                sched.trigger_type.as_str(),
                sched.trigger_value,
                sched.conditions.as_ref().map(|c| c.to_value().to_string()),
                sched.status.as_str(),
                sched.test_mode as i32,
                sched.last_run_at.map(|t| t.to_rfc3339()),
                sched.next_run_at.map(|t| t.to_rfc3339()),
                sched.run_count,
                sched.success_count,
                sched.failure_count,
                sched
                    .last_execution_stats
                    .as_ref()
                    .and_then(|s| serde_json::to_string(s).ok()),
                sched.created_at.to_rfc3339(),
                sched.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| RentRelayError::Persistence(format!("insert schedule: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    /// Overwrite the definition fields of an existing schedule.
    pub fn update_schedule(&self, sched: &Schedule) -> Result<()> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE schedules SET name = ?1, message_template = ?2, trigger_type = ?3,
                 trigger_value = ?4, conditions = ?5, test_mode = ?6, next_run_at = ?7,
                 updated_at = ?8 WHERE id = ?9",
                rusqlite::params![
                    sched.name,
                    sched.message_template,
                    sched.trigger_type.as_str(),
                    sched.trigger_value,
                    sched.conditions.as_ref().map(|c| c.to_value().to_string()),
                    sched.test_mode as i32,
                    sched.next_run_at.map(|t| t.to_rfc3339()),
                    sched.updated_at.to_rfc3339(),
                    sched.id,
                ],
            )
            .map_err(|e| RentRelayError::Persistence(format!("update schedule: {e}")))?;
        if changed == 0 {
            return Err(RentRelayError::NotFound(format!("schedule {}", sched.id)));
        }
        Ok(())
    }

    pub fn get_schedule(&self, id: i64) -> Result<Schedule> {
        self.lock()?
            .query_row(
                &format!("SELECT {SCHEDULE_COLS} FROM schedules WHERE id = ?1"),
                [id],
                row_to_schedule,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    RentRelayError::NotFound(format!("schedule {id}"))
                }
                other => RentRelayError::Persistence(format!("get schedule: {other}")),
            })
    }

    pub fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {SCHEDULE_COLS} FROM schedules ORDER BY id"))
            .map_err(|e| RentRelayError::Persistence(format!("list schedules: {e}")))?;
        let rows = stmt
            .query_map([], row_to_schedule)
            .map_err(|e| RentRelayError::Persistence(format!("list schedules: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RentRelayError::Persistence(format!("list schedules: {e}")))
    }

    pub fn list_schedules_by_status(&self, status: ScheduleStatus) -> Result<Vec<Schedule>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SCHEDULE_COLS} FROM schedules WHERE status = ?1 ORDER BY id"
            ))
            .map_err(|e| RentRelayError::Persistence(format!("list schedules: {e}")))?;
        let rows = stmt
            .query_map([status.as_str()], row_to_schedule)
            .map_err(|e| RentRelayError::Persistence(format!("list schedules: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RentRelayError::Persistence(format!("list schedules: {e}")))
    }

    pub fn set_schedule_status(&self, id: i64, status: ScheduleStatus, now: DateTime<Utc>) -> Result<()> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE schedules SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status.as_str(), now.to_rfc3339(), id],
            )
            .map_err(|e| RentRelayError::Persistence(format!("set status: {e}")))?;
        if changed == 0 {
            return Err(RentRelayError::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }

    pub fn set_next_run(&self, id: i64, next_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<()> {
        self.lock()?
            .execute(
                "UPDATE schedules SET next_run_at = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![next_run.map(|t| t.to_rfc3339()), now.to_rfc3339(), id],
            )
            .map_err(|e| RentRelayError::Persistence(format!("set next run: {e}")))?;
        Ok(())
    }

    /// Fold one execution into the schedule's bookkeeping counters.
    pub fn record_execution(
        &self,
        id: i64,
        stats: &ExecutionStats,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let stats_json = serde_json::to_string(stats)?;
        let changed = self
            .lock()?
            .execute(
                "UPDATE schedules SET
                 run_count = run_count + 1,
                 success_count = success_count + ?1,
                 failure_count = failure_count + ?2,
                 last_run_at = ?3,
                 next_run_at = ?4,
                 last_execution_stats = ?5,
                 updated_at = ?3
                 WHERE id = ?6",
                rusqlite::params![
                    stats.successful_sends as i64,
                    stats.failed_sends as i64,
                    stats.executed_at.to_rfc3339(),
                    next_run.map(|t| t.to_rfc3339()),
                    stats_json,
                    id,
                ],
            )
            .map_err(|e| RentRelayError::Persistence(format!("record execution: {e}")))?;
        if changed == 0 {
            return Err(RentRelayError::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }

    pub fn delete_schedule(&self, id: i64) -> Result<()> {
        let changed = self
            .lock()?
            .execute("DELETE FROM schedules WHERE id = ?1", [id])
            .map_err(|e| RentRelayError::Persistence(format!("delete schedule: {e}")))?;
        if changed == 0 {
            return Err(RentRelayError::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }

    // ─── Tenants ──────────────────────────────────────

    /// Insert a tenant (id ignored) and return its new id.
    pub fn insert_tenant(&self, tenant: &Tenant) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tenants
             (name, contact, building, tenant_type, rent_amount, due_date, active,
              is_current_month_rent_paid, last_payment_date, late_fee_applicable,
              sms_opt_in_status, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            rusqlite::params![
                tenant.name,
                tenant.contact,
                tenant.building,
                tenant.tenant_type,
                tenant.rent_amount,
                tenant.due_date,
                tenant.active as i32,
                tenant.is_current_month_rent_paid as i32,
                tenant.last_payment_date.map(|t| t.to_rfc3339()),
                tenant.late_fee_applicable as i32,
                tenant.sms_opt_in_status,
                tenant.notes,
                tenant.created_at.to_rfc3339(),
                tenant.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| RentRelayError::Persistence(format!("insert tenant: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_tenant(&self, id: i64) -> Result<Tenant> {
        self.lock()?
            .query_row(
                &format!("SELECT {TENANT_COLS} FROM tenants WHERE id = ?1"),
                [id],
                row_to_tenant,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    RentRelayError::NotFound(format!("tenant {id}"))
                }
                other => RentRelayError::Persistence(format!("get tenant: {other}")),
            })
    }

    pub fn list_active_tenants(&self) -> Result<Vec<Tenant>> {
        self.select_eligible(None, Utc::now())
    }

    /// Active tenants matching a rule tree, selected in one query.
    /// `None` means no conditions, i.e. every active tenant.
    pub fn select_eligible(
        &self,
        rules: Option<&RuleTree>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Tenant>> {
        let (clause, params) = match rules {
            Some(tree) => tree.sql_filter(now),
            None => ("1=1".to_string(), Vec::new()),
        };
        let sql = format!(
            "SELECT {TENANT_COLS} FROM tenants WHERE active = 1 AND {clause} ORDER BY id"
        );

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| RentRelayError::Persistence(format!("select tenants: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), row_to_tenant)
            .map_err(|e| RentRelayError::Persistence(format!("select tenants: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RentRelayError::Persistence(format!("select tenants: {e}")))
    }

    /// Flip the rent-paid flag; paying also stamps last_payment_date.
    pub fn set_rent_paid(&self, id: i64, paid: bool, now: DateTime<Utc>) -> Result<()> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE tenants SET is_current_month_rent_paid = ?1,
                 last_payment_date = CASE WHEN ?1 THEN ?2 ELSE last_payment_date END,
                 updated_at = ?2 WHERE id = ?3",
                rusqlite::params![paid as i32, now.to_rfc3339(), id],
            )
            .map_err(|e| RentRelayError::Persistence(format!("set rent paid: {e}")))?;
        if changed == 0 {
            return Err(RentRelayError::NotFound(format!("tenant {id}")));
        }
        Ok(())
    }

    pub fn set_opt_in_status(&self, id: i64, status: &str, now: DateTime<Utc>) -> Result<()> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE tenants SET sms_opt_in_status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status, now.to_rfc3339(), id],
            )
            .map_err(|e| RentRelayError::Persistence(format!("set opt-in: {e}")))?;
        if changed == 0 {
            return Err(RentRelayError::NotFound(format!("tenant {id}")));
        }
        Ok(())
    }

    // ─── Message log ──────────────────────────────────────

    /// Append one send outcome (id ignored) and return its new id.
    pub fn log_outcome(&self, record: &OutcomeRecord) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO messages
             (schedule_id, tenant_id, content, success, message_id, error, test_mode, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                record.schedule_id,
                record.tenant_id,
                record.content,
                record.success as i32,
                record.message_id,
                record.error,
                record.test_mode as i32,
                record.sent_at.to_rfc3339(),
            ],
        )
        .map_err(|e| RentRelayError::Persistence(format!("log outcome: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn recent_outcomes(&self, limit: usize) -> Result<Vec<OutcomeRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, schedule_id, tenant_id, content, success, message_id, error,
                 test_mode, sent_at FROM messages ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| RentRelayError::Persistence(format!("recent outcomes: {e}")))?;
        let rows = stmt
            .query_map([limit as i64], row_to_outcome)
            .map_err(|e| RentRelayError::Persistence(format!("recent outcomes: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RentRelayError::Persistence(format!("recent outcomes: {e}")))
    }

    pub fn outcomes_for_schedule(&self, schedule_id: i64) -> Result<Vec<OutcomeRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, schedule_id, tenant_id, content, success, message_id, error,
                 test_mode, sent_at FROM messages WHERE schedule_id = ?1 ORDER BY id",
            )
            .map_err(|e| RentRelayError::Persistence(format!("outcomes: {e}")))?;
        let rows = stmt
            .query_map([schedule_id], row_to_outcome)
            .map_err(|e| RentRelayError::Persistence(format!("outcomes: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RentRelayError::Persistence(format!("outcomes: {e}")))
    }
}

// ─── Row mapping ──────────────────────────────────────

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Schedule> {
    let trigger_type_str: String = row.get(3)?;
    let conditions_str: Option<String> = row.get(5)?;
    let status_str: String = row.get(6)?;
    let last_run_str: Option<String> = row.get(8)?;
    let next_run_str: Option<String> = row.get(9)?;
    let stats_str: Option<String> = row.get(13)?;
    let created_str: String = row.get(14)?;
    let updated_str: String = row.get(15)?;

    // Stored rows were validated on the way in; anything unreadable
    // degrades rather than failing the whole listing.
    let trigger_type = TriggerType::parse(&trigger_type_str).unwrap_or(TriggerType::Daily);
    let status = ScheduleStatus::parse(&status_str).unwrap_or(ScheduleStatus::Disabled);
    let conditions = conditions_str
        .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
        .and_then(|v| RuleTree::parse(&v, false).ok());
    let last_execution_stats =
        stats_str.and_then(|s| serde_json::from_str::<ExecutionStats>(&s).ok());

    Ok(Schedule {
        id: row.get(0)?,
        name: row.get(1)?,
        message_template: row.get(2)?,
        trigger_type,
        trigger_value: row.get(4)?,
        conditions,
        status,
        test_mode: row.get::<_, i32>(7)? != 0,
        last_run_at: parse_opt_ts(last_run_str),
        next_run_at: parse_opt_ts(next_run_str),
        run_count: row.get(10)?,
        success_count: row.get(11)?,
        failure_count: row.get(12)?,
        last_execution_stats,
        created_at: parse_ts(&created_str),
        updated_at: parse_ts(&updated_str),
    })
}

fn row_to_tenant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tenant> {
    let last_payment_str: Option<String> = row.get(9)?;
    let created_str: String = row.get(13)?;
    let updated_str: String = row.get(14)?;
    Ok(Tenant {
        id: row.get(0)?,
        name: row.get(1)?,
        contact: row.get(2)?,
        building: row.get(3)?,
        tenant_type: row.get(4)?,
        rent_amount: row.get(5)?,
        due_date: row.get(6)?,
        active: row.get::<_, i32>(7)? != 0,
        is_current_month_rent_paid: row.get::<_, i32>(8)? != 0,
        last_payment_date: parse_opt_ts(last_payment_str),
        late_fee_applicable: row.get::<_, i32>(10)? != 0,
        sms_opt_in_status: row.get(11)?,
        notes: row.get(12)?,
        created_at: parse_ts(&created_str),
        updated_at: parse_ts(&updated_str),
    })
}

fn row_to_outcome(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutcomeRecord> {
    let sent_str: String = row.get(8)?;
    Ok(OutcomeRecord {
        id: row.get(0)?,
        schedule_id: row.get(1)?,
        tenant_id: row.get(2)?,
        content: row.get(3)?,
        success: row.get::<_, i32>(4)? != 0,
        message_id: row.get(5)?,
        error: row.get(6)?,
        test_mode: row.get::<_, i32>(7)? != 0,
        sent_at: parse_ts(&sent_str),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 10, 12, 0, 0).unwrap()
    }

    fn tenant(name: &str) -> Tenant {
        Tenant {
            id: 0,
            name: name.into(),
            contact: "5550001111".into(),
            building: Some("A".into()),
            tenant_type: "residential".into(),
            rent_amount: Some(1000),
            due_date: Some("2026-08-05".into()),
            active: true,
            is_current_month_rent_paid: false,
            last_payment_date: None,
            late_fee_applicable: false,
            sms_opt_in_status: "opted_in".into(),
            notes: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn schedule(name: &str) -> Schedule {
        Schedule {
            id: 0,
            name: name.into(),
            message_template: "Hello {name}, rent is due.".into(),
            trigger_type: TriggerType::Daily,
            trigger_value: "09:00".into(),
            conditions: None,
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

    #[test]
    fn schedule_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let mut sched = schedule("rent reminder");
        sched.conditions = RuleTree::parse(
            &serde_json::json!({
                "operator": "and",
                "rules": [{"field": "is_current_month_rent_paid", "operator": "eq", "value": false}]
            }),
            false,
        )
        .ok();

        let id = store.insert_schedule(&sched).unwrap();
        let loaded = store.get_schedule(id).unwrap();
        assert_eq!(loaded.name, "rent reminder");
        assert_eq!(loaded.trigger_type, TriggerType::Daily);
        assert_eq!(loaded.conditions, sched.conditions);
        assert_eq!(loaded.next_run_at, Some(now()));
    }

    #[test]
    fn get_missing_schedule_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.get_schedule(42),
            Err(RentRelayError::NotFound(_))
        ));
        assert!(matches!(
            store.delete_schedule(42),
            Err(RentRelayError::NotFound(_))
        ));
    }

    #[test]
    fn record_execution_accumulates_counters() {
        let store = Store::open_in_memory().unwrap();
        let id = store.insert_schedule(&schedule("s")).unwrap();

        let stats = ExecutionStats::new(3, 2, 1, now());
        store.record_execution(id, &stats, Some(now())).unwrap();
        store.record_execution(id, &stats, None).unwrap();

        let loaded = store.get_schedule(id).unwrap();
        assert_eq!(loaded.run_count, 2);
        assert_eq!(loaded.success_count, 4);
        assert_eq!(loaded.failure_count, 2);
        assert_eq!(loaded.last_run_at, Some(now()));
        assert_eq!(loaded.last_execution_stats, Some(stats));
        assert_eq!(loaded.success_rate(), 66.7);
    }

    #[test]
    fn select_eligible_matches_boolean_evaluation() {
        let store = Store::open_in_memory().unwrap();

        let mut t1 = tenant("Alma");
        t1.is_current_month_rent_paid = false;
        let mut t2 = tenant("Ben");
        t2.is_current_month_rent_paid = true;
        let mut t3 = tenant("Cleo");
        t3.building = Some("B".into());
        t3.rent_amount = None;
        let mut t4 = tenant("Drew");
        t4.active = false; // never selected
        for t in [&t1, &t2, &t3, &t4] {
            store.insert_tenant(t).unwrap();
        }

        let trees = [
            None,
            RuleTree::parse(
                &serde_json::json!({"rules": [
                    {"field": "is_current_month_rent_paid", "operator": "eq", "value": false}
                ]}),
                false,
            )
            .ok(),
            RuleTree::parse(
                &serde_json::json!({"operator": "or", "rules": [
                    {"field": "building", "operator": "eq", "value": "B"},
                    {"field": "rent_amount", "operator": "gt", "value": 900},
                ]}),
                false,
            )
            .ok(),
            RuleTree::parse(
                &serde_json::json!({"rules": [
                    {"field": "rent_amount", "operator": "is_null"}
                ]}),
                false,
            )
            .ok(),
            // mixed-case needle: LIKE is case-insensitive, so both
            // forms must select Alma
            RuleTree::parse(
                &serde_json::json!({"rules": [
                    {"field": "name", "operator": "contains", "value": "alma"}
                ]}),
                false,
            )
            .ok(),
        ];

        let all_active = store.select_eligible(None, now()).unwrap();
        assert_eq!(all_active.len(), 3);

        // The SQL path must agree with per-tenant evaluation.
        for tree in &trees {
            let selected = store.select_eligible(tree.as_ref(), now()).unwrap();
            let expected: Vec<i64> = all_active
                .iter()
                .filter(|t| tree.as_ref().map_or(true, |r| r.matches(t, now())))
                .map(|t| t.id)
                .collect();
            let got: Vec<i64> = selected.iter().map(|t| t.id).collect();
            assert_eq!(got, expected);
        }

        // and the contains tree actually selects someone
        let matched = store
            .select_eligible(trees[4].as_ref(), now())
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "Alma");
    }

    #[test]
    fn rent_paid_stamps_payment_date() {
        let store = Store::open_in_memory().unwrap();
        let id = store.insert_tenant(&tenant("Alma")).unwrap();

        store.set_rent_paid(id, true, now()).unwrap();
        let t = store.get_tenant(id).unwrap();
        assert!(t.is_current_month_rent_paid);
        assert_eq!(t.last_payment_date, Some(now()));

        // Unpaying keeps the historical payment date.
        store.set_rent_paid(id, false, now()).unwrap();
        let t = store.get_tenant(id).unwrap();
        assert!(!t.is_current_month_rent_paid);
        assert_eq!(t.last_payment_date, Some(now()));
    }

    #[test]
    fn message_log_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let tenant_id = store.insert_tenant(&tenant("Alma")).unwrap();
        let sched_id = store.insert_schedule(&schedule("s")).unwrap();

        let record = OutcomeRecord {
            id: 0,
            schedule_id: Some(sched_id),
            tenant_id,
            content: "Hello Alma, rent is due.".into(),
            success: true,
            message_id: Some("tb-123".into()),
            error: None,
            test_mode: false,
            sent_at: now(),
        };
        store.log_outcome(&record).unwrap();
        store
            .log_outcome(&OutcomeRecord {
                success: false,
                message_id: None,
                error: Some("Out of quota".into()),
                ..record.clone()
            })
            .unwrap();

        let recent = store.recent_outcomes(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(!recent[0].success); // newest first
        assert_eq!(recent[0].error.as_deref(), Some("Out of quota"));

        let by_schedule = store.outcomes_for_schedule(sched_id).unwrap();
        assert_eq!(by_schedule.len(), 2);
        assert!(by_schedule[0].success);
    }
}
