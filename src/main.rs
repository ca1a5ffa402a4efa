//! # RentRelay — condition-gated SMS scheduler
//!
//! Recurring, rule-filtered SMS notifications for tenant rosters.
//!
//! Usage:
//!   rentrelay serve                              # Run the scheduler daemon
//!   rentrelay schedule create --name ...         # Define a schedule
//!   rentrelay schedule run-now 3                 # Execute one immediately
//!   rentrelay tenant add --name ... --phone ...  # Manage the roster

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rentrelay_channels::{ConsoleGateway, SmsGateway, TextbeltClient};
use rentrelay_core::clock::SystemClock;
use rentrelay_core::config::RentRelayConfig;
use rentrelay_core::types::Tenant;
use rentrelay_scheduler::{
    NewSchedule, ScheduleUpdate, SchedulerService, Store, TriggerType,
};

#[derive(Parser)]
#[command(name = "rentrelay", version, about = "📨 RentRelay — condition-gated SMS scheduler")]
struct Cli {
    /// Config file (default: ~/.rentrelay/config.toml)
    #[arg(long)]
    config: Option<String>,

    /// Database path (overrides config)
    #[arg(long)]
    db_path: Option<String>,

    /// Log messages to the console instead of sending SMS
    #[arg(long)]
    console: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler daemon until interrupted
    Serve,
    /// Manage schedules
    #[command(subcommand)]
    Schedule(ScheduleCmd),
    /// Manage the tenant roster
    #[command(subcommand)]
    Tenant(TenantCmd),
    /// Show recent send outcomes
    Log {
        /// Number of entries
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Probe the SMS API key without delivering anything
    CheckKey,
}

#[derive(Subcommand)]
enum ScheduleCmd {
    /// Create a schedule
    Create {
        #[arg(long)]
        name: String,
        /// Message template; supports {name}, {rent_amount}, {due_date}, ...
        #[arg(long)]
        template: String,
        /// daily, weekly, monthly, or cron
        #[arg(long)]
        trigger_type: String,
        /// "HH:MM", "monday 09:30", "5 14:30", or a cron expression
        #[arg(long)]
        trigger_value: String,
        /// Condition tree as JSON; omit for all active tenants
        #[arg(long)]
        conditions: Option<String>,
        /// Send through the provider's test key
        #[arg(long)]
        test_mode: bool,
    },
    /// List all schedules
    List,
    /// Show one schedule in detail
    Show { id: i64 },
    /// Update fields of a schedule
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        template: Option<String>,
        #[arg(long)]
        trigger_type: Option<String>,
        #[arg(long)]
        trigger_value: Option<String>,
        /// New condition tree as JSON; "null" clears it
        #[arg(long)]
        conditions: Option<String>,
    },
    /// Pause an active schedule
    Pause { id: i64 },
    /// Resume a paused schedule
    Resume { id: i64 },
    /// Permanently take a schedule out of service, keeping its history
    Disable { id: i64 },
    /// Delete a schedule
    Delete { id: i64 },
    /// Execute a schedule immediately
    RunNow { id: i64 },
    /// Preview who a condition tree matches, without sending
    TestConditions {
        /// Condition tree as JSON; omit for all active tenants
        #[arg(long)]
        conditions: Option<String>,
    },
}

#[derive(Subcommand)]
enum TenantCmd {
    /// Add a tenant
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        building: Option<String>,
        #[arg(long, default_value = "residential")]
        tenant_type: String,
        #[arg(long)]
        rent_amount: Option<i64>,
        /// Due date as entered, e.g. "2026-09-01"
        #[arg(long)]
        due_date: Option<String>,
    },
    /// List active tenants
    List,
    /// Mark a tenant's rent paid (or unpaid with --unpaid)
    MarkPaid {
        id: i64,
        #[arg(long)]
        unpaid: bool,
    },
    /// Set a tenant's SMS opt-in status
    OptIn {
        id: i64,
        /// pending, opted_in, or opted_out
        #[arg(long, default_value = "opted_in")]
        status: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "rentrelay=debug,rentrelay_scheduler=debug,rentrelay_channels=debug"
    } else {
        "rentrelay=info,rentrelay_scheduler=info,rentrelay_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => RentRelayConfig::load_from(std::path::Path::new(path))?,
        None => RentRelayConfig::load()?,
    };
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }

    let db_path = shellexpand::tilde(&config.db_path).to_string();
    let store = Arc::new(Store::open(std::path::Path::new(&db_path))?);

    let gateway: Arc<dyn SmsGateway> = if cli.console {
        Arc::new(ConsoleGateway)
    } else {
        if config.sms.api_key.is_empty() {
            tracing::warn!("No SMS API key configured; sends will fail. Use --console for local runs.");
        }
        Arc::new(TextbeltClient::new(&config.sms.api_base, &config.sms.api_key))
    };

    let service = SchedulerService::new(store, gateway.clone(), Arc::new(SystemClock), &config);

    match cli.command {
        Command::Serve => serve(&service, &config, &db_path).await,
        Command::Schedule(cmd) => schedule_cmd(&service, cmd).await,
        Command::Tenant(cmd) => tenant_cmd(&service, cmd),
        Command::Log { limit } => {
            for record in service.store().recent_outcomes(limit)? {
                let mark = if record.success { "✅" } else { "❌" };
                let mode = if record.test_mode { " [test]" } else { "" };
                println!(
                    "{mark} {} tenant {} schedule {}{mode} {}",
                    record.sent_at.format("%Y-%m-%d %H:%M"),
                    record.tenant_id,
                    record
                        .schedule_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".into()),
                    record.error.as_deref().unwrap_or("sent"),
                );
            }
            Ok(())
        }
        Command::CheckKey => {
            let client = TextbeltClient::new(&config.sms.api_base, &config.sms.api_key);
            let receipt = client.check_key().await?;
            if receipt.success {
                println!("✅ API key is valid");
                if let Some(quota) = receipt.quota_remaining {
                    println!("   Quota remaining: {quota}");
                }
            } else {
                println!("❌ API key rejected: {}", receipt.error.as_deref().unwrap_or("unknown"));
            }
            Ok(())
        }
    }
}

async fn serve(service: &SchedulerService, config: &RentRelayConfig, db_path: &str) -> Result<()> {
    println!("📨 RentRelay v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Database: {db_path}");
    println!("   🏢 Company:  {}", config.company_name);
    if config.sms.test_mode {
        println!("   🧪 Test mode: ON (no real SMS will be delivered)");
    }

    let armed = service.start()?;
    println!("   ⏰ {armed} schedule(s) armed. Ctrl-C to stop.\n");

    tokio::signal::ctrl_c().await?;
    println!("\n👋 Shutting down...");
    service.stop();
    Ok(())
}

async fn schedule_cmd(service: &SchedulerService, cmd: ScheduleCmd) -> Result<()> {
    match cmd {
        ScheduleCmd::Create {
            name,
            template,
            trigger_type,
            trigger_value,
            conditions,
            test_mode,
        } => {
            let schedule = service.create_schedule(NewSchedule {
                name,
                message_template: template,
                trigger_type: TriggerType::parse(&trigger_type)?,
                trigger_value,
                conditions: parse_conditions(conditions.as_deref())?,
                test_mode,
            })?;
            println!("✅ Created schedule '{}' (id={})", schedule.name, schedule.id);
            if let Some(next) = schedule.next_run_at {
                println!("   ⏰ Next run: {}", next.format("%Y-%m-%d %H:%M UTC"));
            }
        }
        ScheduleCmd::List => {
            for job in service.list_jobs()? {
                let s = &job.schedule;
                let next = s
                    .next_run_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{:>4}  {:<10} {:<8} {:<20} next: {} runs: {}  {}",
                    s.id,
                    s.status.as_str(),
                    s.trigger_type.as_str(),
                    s.trigger_value,
                    next,
                    s.run_count,
                    s.name,
                );
            }
        }
        ScheduleCmd::Show { id } => {
            let job = service.job_status(id)?;
            let s = &job.schedule;
            println!("Schedule {} — {}", s.id, s.name);
            println!("   Status:    {} (armed: {}, firing: {})", s.status.as_str(), job.armed, job.firing);
            println!("   Trigger:   {} {}", s.trigger_type.as_str(), s.trigger_value);
            println!("   Template:  {}", s.message_template);
            println!(
                "   Audience:  {}",
                s.conditions
                    .as_ref()
                    .map(|c| c.summarize())
                    .unwrap_or_else(|| "All active tenants".into())
            );
            println!("   Test mode: {}", s.test_mode);
            if let Some(next) = s.next_run_at {
                println!("   Next run:  {}", next.format("%Y-%m-%d %H:%M UTC"));
            }
            println!(
                "   History:   {} run(s), {} sent, {} failed ({}% success)",
                s.run_count,
                s.success_count,
                s.failure_count,
                s.success_rate(),
            );
            if let Some(stats) = &s.last_execution_stats {
                println!(
                    "   Last run:  {} → {}/{} sent",
                    stats.executed_at.format("%Y-%m-%d %H:%M"),
                    stats.successful_sends,
                    stats.total_recipients,
                );
            }
        }
        ScheduleCmd::Update {
            id,
            name,
            template,
            trigger_type,
            trigger_value,
            conditions,
        } => {
            let trigger_type = trigger_type.map(|s| TriggerType::parse(&s)).transpose()?;
            let conditions = match conditions.as_deref() {
                Some(raw) => Some(serde_json::from_str(raw)?),
                None => None,
            };
            let schedule = service.update_schedule(
                id,
                ScheduleUpdate {
                    name,
                    message_template: template,
                    trigger_type,
                    trigger_value,
                    conditions,
                    test_mode: None,
                },
            )?;
            println!("✅ Updated schedule '{}' (id={})", schedule.name, schedule.id);
        }
        ScheduleCmd::Pause { id } => {
            service.pause_schedule(id)?;
            println!("⏸️  Paused schedule {id}");
        }
        ScheduleCmd::Resume { id } => {
            service.resume_schedule(id)?;
            println!("▶️  Resumed schedule {id}");
        }
        ScheduleCmd::Disable { id } => {
            service.disable_schedule(id)?;
            println!("🚫 Disabled schedule {id}");
        }
        ScheduleCmd::Delete { id } => {
            service.delete_schedule(id)?;
            println!("🗑️  Deleted schedule {id}");
        }
        ScheduleCmd::RunNow { id } => {
            let report = service.run_now(id).await?;
            println!(
                "✅ Executed schedule {id}: {}/{} sent ({}% success)",
                report.stats.successful_sends,
                report.stats.total_recipients,
                report.stats.success_rate,
            );
            for outcome in report.outcomes.iter().filter(|o| !o.success) {
                println!(
                    "   ❌ tenant {}: {}",
                    outcome.tenant_id,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        ScheduleCmd::TestConditions { conditions } => {
            let preview = service.test_conditions(parse_conditions(conditions.as_deref())?.as_ref())?;
            println!("🔍 {}", preview.summary);
            println!("   Matches {} of {} active tenant(s):", preview.matched, preview.total_active);
            for tenant in &preview.tenants {
                println!("   • {} ({})", tenant.name, tenant.contact);
            }
        }
    }
    Ok(())
}

fn tenant_cmd(service: &SchedulerService, cmd: TenantCmd) -> Result<()> {
    let store = service.store();
    match cmd {
        TenantCmd::Add {
            name,
            phone,
            building,
            tenant_type,
            rent_amount,
            due_date,
        } => {
            let now = chrono::Utc::now();
            let id = store.insert_tenant(&Tenant {
                id: 0,
                name: name.clone(),
                contact: phone,
                building,
                tenant_type,
                rent_amount,
                due_date,
                active: true,
                is_current_month_rent_paid: false,
                last_payment_date: None,
                late_fee_applicable: false,
                sms_opt_in_status: "pending".into(),
                notes: None,
                created_at: now,
                updated_at: now,
            })?;
            println!("✅ Added tenant '{name}' (id={id})");
        }
        TenantCmd::List => {
            for t in store.list_active_tenants()? {
                let paid = if t.is_current_month_rent_paid { "paid" } else { "unpaid" };
                println!(
                    "{:>4}  {:<20} {:<12} {:<10} {:<8} rent: {}",
                    t.id,
                    t.name,
                    t.contact,
                    t.building.as_deref().unwrap_or("-"),
                    paid,
                    t.rent_amount.map(|r| r.to_string()).unwrap_or_else(|| "-".into()),
                );
            }
        }
        TenantCmd::MarkPaid { id, unpaid } => {
            store.set_rent_paid(id, !unpaid, chrono::Utc::now())?;
            println!("✅ Tenant {id} marked {}", if unpaid { "unpaid" } else { "paid" });
        }
        TenantCmd::OptIn { id, status } => {
            if !["pending", "opted_in", "opted_out"].contains(&status.as_str()) {
                anyhow::bail!("opt-in status must be pending, opted_in, or opted_out");
            }
            store.set_opt_in_status(id, &status, chrono::Utc::now())?;
            println!("✅ Tenant {id} opt-in status set to {status}");
        }
    }
    Ok(())
}

fn parse_conditions(raw: Option<&str>) -> Result<Option<serde_json::Value>> {
    match raw {
        None => Ok(None),
        Some(s) if s.trim() == "null" => Ok(None),
        Some(s) => Ok(Some(serde_json::from_str(s)?)),
    }
}
