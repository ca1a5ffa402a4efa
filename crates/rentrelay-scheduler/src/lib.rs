//! # RentRelay Scheduler
//!
//! Condition-based scheduling engine for outbound tenant messaging.
//!
//! ## Architecture
//! ```text
//! SchedulerService (façade)
//!   ├── Store (SQLite): schedules, tenants, message log
//!   ├── TimerRegistry: one tokio timer task per active schedule
//!   │     └── on fire → Executor (detached task)
//!   ├── Executor: select via RuleTree → render → SmsGateway
//!   │             → outcome records → bookkeeping → reschedule
//!   ├── TriggerSpec: daily / weekly / monthly / cron → next fire
//!   └── RuleTree: typed condition tree, one walker for both the
//!                 per-tenant boolean form and the SQL filter form
//! ```

pub mod cron;
pub mod executor;
pub mod registry;
pub mod rules;
pub mod schedule;
pub mod service;
pub mod store;
pub mod template;
pub mod trigger;

pub use executor::{ExecutionReport, Executor};
pub use registry::TimerRegistry;
pub use rules::RuleTree;
pub use schedule::{ExecutionStats, NewSchedule, Schedule, ScheduleStatus, ScheduleUpdate, TriggerType};
pub use service::{ConditionPreview, JobStatus, SchedulerService};
pub use store::Store;
pub use trigger::TriggerSpec;
