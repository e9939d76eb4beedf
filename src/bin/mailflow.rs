use anyhow::Result;
use mailflow::{
    automation::AutomationProcessor,
    config::{Config, Environment},
    engine::executor::ActionExecutor,
    events::EventRouter,
    mailer::TemplateMailer,
    queue_adapter::MpscQueueAdapter,
    sequence::{catalog::SequenceCatalog, engine::SequenceEngine},
    storage::{
        automation_rule::{AutomationStorage, MemoryAutomationStorage, PostgresAutomationStorage},
        contact::{ContactStorage, MemoryContactStorage, PostgresContactStorage},
        execution::{ExecutionStorage, MemoryExecutionStorage, PostgresExecutionStorage},
        scheduled::{
            MemoryScheduledWorkStorage, PostgresScheduledWorkStorage, ScheduledUnit,
            ScheduledWorkStorage,
        },
        template::{MemoryTemplateStorage, PostgresTemplateStorage, TemplateStorage},
    },
    tasks::{SchedulerTask, WorkerTask, spawn_managed_task},
    transport::{CaptureTransport, EmailTransport, ResendTransport},
    validation::Validator,
};
use sqlx::postgres::PgPoolOptions;
use std::{env, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_ORGANIZATION: &str = "default";

struct Storages {
    contacts: Arc<dyn ContactStorage>,
    executions: Arc<dyn ExecutionStorage>,
    automation_rules: Arc<dyn AutomationStorage>,
    templates: Arc<dyn TemplateStorage>,
    scheduled: Arc<dyn ScheduledWorkStorage>,
}

async fn build_storages(config: &Config) -> Result<Storages> {
    match &config.database_url {
        Some(url) => {
            info!("Using PostgreSQL storage");
            let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
            Ok(Storages {
                contacts: Arc::new(PostgresContactStorage::new(pool.clone())),
                executions: Arc::new(PostgresExecutionStorage::new(pool.clone())),
                automation_rules: Arc::new(PostgresAutomationStorage::new(pool.clone())),
                templates: Arc::new(PostgresTemplateStorage::new(pool.clone())),
                scheduled: Arc::new(PostgresScheduledWorkStorage::new(pool)),
            })
        }
        None => {
            info!("No DATABASE_URL configured, using in-memory storage");
            Ok(Storages {
                contacts: Arc::new(MemoryContactStorage::new()),
                executions: Arc::new(MemoryExecutionStorage::new()),
                automation_rules: Arc::new(MemoryAutomationStorage::new()),
                templates: Arc::new(MemoryTemplateStorage::new()),
                scheduled: Arc::new(MemoryScheduledWorkStorage::new()),
            })
        }
    }
}

fn build_transport(config: &Config) -> Arc<dyn EmailTransport> {
    match &config.resend_api_key {
        Some(api_key) => {
            info!("Using Resend email transport");
            Arc::new(ResendTransport::new(api_key.clone()))
        }
        None => {
            warn!("No RESEND_API_KEY configured, capturing email in memory");
            Arc::new(CaptureTransport::new())
        }
    }
}

/// Read newline-delimited `{"type": ..., "data": ...}` events from stdin
/// and feed them through the router. The HTTP/webhook layer in front of
/// this process is expected to deliver events in exactly this shape.
async fn consume_stdin_events(router: Arc<EventRouter>, cancel_token: CancellationToken) {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("Event input closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = ?e, "Failed to read event input");
                        break;
                    }
                };

                if line.trim().is_empty() {
                    continue;
                }

                let parsed: serde_json::Value = match serde_json::from_str(&line) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(error = ?e, "Skipping malformed event line");
                        continue;
                    }
                };

                let Some(raw_type) = parsed.get("type").and_then(|v| v.as_str()) else {
                    warn!("Event line missing type field, skipping");
                    continue;
                };
                let data = parsed.get("data").cloned().unwrap_or(serde_json::json!({}));

                let outcome = router.process(raw_type, &data).await;
                if !outcome.success {
                    warn!(error = ?outcome.error, event_type = %raw_type, "Event processed with errors");
                }
            }
            () = cancel_token.cancelled() => {
                info!("Event consumer cancelled");
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    for arg in env::args() {
        if arg == "--version" {
            println!("{}", mailflow::config::version());
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,mailflow=debug")
        }))
        .init();

    let config = Config::new()?;
    info!(
        version = %config.version,
        environment = ?config.environment,
        "Starting mailflow"
    );
    if config.environment == Environment::Development {
        info!(redirect = %config.redirect_address.as_ref(), "Development mode: outbound email is redirected");
    }

    let storages = build_storages(&config).await?;
    let transport = build_transport(&config);

    let catalog = Arc::new(SequenceCatalog::predefined());
    for sequence in catalog.all() {
        Validator::validate_sequence(sequence)?;
    }
    info!(sequences = catalog.all().len(), "Sequence catalog loaded");

    let mailer = Arc::new(TemplateMailer::new(
        storages.templates.clone(),
        transport,
        config.from_address.as_ref(),
        config.redirect_address.as_ref(),
        config.environment,
    ));

    let executor = Arc::new(ActionExecutor::new(
        storages.contacts.clone(),
        storages.executions.clone(),
        mailer.clone(),
        DEFAULT_ORGANIZATION,
    ));

    let sequences = Arc::new(SequenceEngine::new(
        catalog,
        storages.contacts.clone(),
        storages.executions.clone(),
        storages.scheduled.clone(),
        executor,
    ));

    let automation = Arc::new(AutomationProcessor::new(
        storages.automation_rules.clone(),
        storages.contacts.clone(),
        mailer,
        storages.scheduled.clone(),
        DEFAULT_ORGANIZATION,
    ));

    let router = Arc::new(EventRouter::new(
        storages.contacts.clone(),
        automation.clone(),
        sequences.clone(),
    ));

    let queue = Arc::new(MpscQueueAdapter::<ScheduledUnit>::new(
        *config.queue_capacity.as_ref(),
    ));

    let cancel_token = CancellationToken::new();
    let tracker = TaskTracker::new();

    let scheduler = SchedulerTask::new(
        storages.scheduled.clone(),
        queue.clone(),
        cancel_token.clone(),
        *config.scheduler_poll_interval.as_ref(),
    );
    spawn_managed_task(&tracker, cancel_token.clone(), "scheduler", async move {
        scheduler.run().await.map_err(Into::into)
    });

    let worker = WorkerTask::new(queue, sequences, automation, cancel_token.clone());
    spawn_managed_task(&tracker, cancel_token.clone(), "worker", async move {
        worker.run().await.map_err(Into::into)
    });

    let consumer_token = cancel_token.clone();
    tracker.spawn(consume_stdin_events(router, consumer_token));

    info!("mailflow running, feed events on stdin; ctrl-c to stop");
    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    cancel_token.cancel();
    tracker.close();
    tracker.wait().await;
    info!("Shutdown complete");

    Ok(())
}
