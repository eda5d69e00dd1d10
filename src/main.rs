use alphabench::ai::AnyProvider;
use alphabench::artifacts::{ArtifactStore, LocalArtifactStore};
use alphabench::backtest::{
    BacktestPipeline, DbTaskQueue, Supervisor, TaskQueue, WorkerPool,
};
use alphabench::commands::{self, SubmitRequest};
use alphabench::config::Settings;
use alphabench::market::{MarketDataSource, TickDataStore};
use alphabench::notify::{ws_server, ConnectionRegistry, Notifier};
use alphabench::sandbox::SandboxRunner;
use alphabench::storage;
use alphabench::synth::{LlmSynthesizer, StrategySynthesizer, SynthModels};
use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::{info, warn};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Turns natural-language trading strategies into validated, executed and reported backtests.
#[derive(Parser)]
#[command(name = "alphabench", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the stage workers, the supervisor and the websocket notifier.
    Worker {
        /// Overrides WORKER_COUNT.
        #[arg(long)]
        workers: Option<usize>,
        /// Do not start the websocket endpoint.
        #[arg(long)]
        no_ws: bool,
    },
    /// Create a backtest request and queue script generation.
    Submit {
        #[arg(long, env = "ALPHABENCH_USER")]
        user: String,
        #[arg(long)]
        symbol: String,
        /// First day, YYYY-MM-DD.
        #[arg(long)]
        from: NaiveDate,
        /// Last day (inclusive), YYYY-MM-DD.
        #[arg(long)]
        to: NaiveDate,
        /// Strategy description in plain language.
        description: String,
    },
    /// Show one request.
    Status {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// List a user's requests, newest first.
    List {
        #[arg(long, env = "ALPHABENCH_USER")]
        user: String,
    },
    /// Request counts per status and queue health.
    Stats,
    /// Queue the entry job for a stuck request's current status.
    Retrigger { id: String },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    // a missing .env is fine; everything can come from the process environment
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .filter_module("alphabench", log::LevelFilter::Info)
        .filter_module("sqlx", log::LevelFilter::Error)
        .filter_module("sea_orm", log::LevelFilter::Error)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    let db = Arc::new(
        storage::establish_connection(&settings.database_url)
            .await
            .with_context(|| format!("connecting to {}", settings.database_url))?,
    );
    let queue = DbTaskQueue::new(db.clone());

    match cli.command {
        Command::Worker { workers, no_ws } => run_worker(settings, db, queue, workers, no_ws).await,
        Command::Submit {
            user,
            symbol,
            from,
            to,
            description,
        } => {
            let synth = synthesizer(&settings)?;
            let created = commands::submit::run(
                SubmitRequest {
                    owner_id: user,
                    instrument_symbol: symbol,
                    from_date: from,
                    to_date: to,
                    strategy_description: description,
                },
                &db,
                synth.as_ref(),
                &queue,
                &Notifier::new(ConnectionRegistry::default()),
            )
            .await?;
            println!("{}", created.id);
            Ok(())
        }
        Command::Status { id, json } => {
            let out = if json {
                commands::status::show_json(&db, &id).await?
            } else {
                commands::status::show(&db, &id).await?
            };
            println!("{}", out.trim_end());
            Ok(())
        }
        Command::List { user } => {
            print!("{}", commands::status::list(&db, &user).await?);
            Ok(())
        }
        Command::Stats => {
            print!("{}", commands::status::stats(&db, &queue).await?);
            Ok(())
        }
        Command::Retrigger { id } => {
            let job = commands::retrigger::run(&id, &db, &queue).await?;
            println!("queued {} #{} for {}", job.stage, job.attempt, job.request_id);
            Ok(())
        }
    }
}

fn synthesizer(settings: &Settings) -> anyhow::Result<Arc<dyn StrategySynthesizer>> {
    let provider = AnyProvider::from_config(&settings.llm).context("configuring the LLM provider")?;
    info!("llm provider: {}", provider.name());
    Ok(Arc::new(LlmSynthesizer::new(provider, SynthModels::from_env())))
}

async fn run_worker(
    settings: Settings,
    db: Arc<DatabaseConnection>,
    queue: DbTaskQueue,
    workers: Option<usize>,
    no_ws: bool,
) -> anyhow::Result<()> {
    let registry = ConnectionRegistry::default();
    let notifier = Notifier::new(registry.clone());

    let artifacts: Arc<dyn ArtifactStore> = Arc::new(
        LocalArtifactStore::open(&settings.artifact_dir, settings.artifact_public_url.clone())
            .with_context(|| format!("opening artifact store at {}", settings.artifact_dir))?,
    );
    let market: Arc<dyn MarketDataSource> = Arc::new(TickDataStore::new(db.clone()));
    let sandbox = Arc::new(SandboxRunner::new(settings.sandbox.clone()));
    let task_queue: Arc<dyn TaskQueue> = Arc::new(queue.clone());

    let pipeline = Arc::new(BacktestPipeline::new(
        db.clone(),
        artifacts,
        synthesizer(&settings)?,
        market,
        sandbox,
        task_queue.clone(),
        notifier.clone(),
        settings.pipeline.clone(),
    ));

    if !no_ws {
        let listener = tokio::net::TcpListener::bind(&settings.ws_bind)
            .await
            .with_context(|| format!("binding websocket endpoint {}", settings.ws_bind))?;
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = ws_server::serve(listener, registry).await {
                warn!("websocket endpoint stopped: {}", e);
            }
        });
    }

    let pool = WorkerPool::new(
        pipeline,
        queue.clone(),
        workers.unwrap_or(settings.worker_count),
        settings.job_poll,
    );
    pool.recover(settings.supervisor.stage_budget).await;
    let handles = pool.start();
    info!(
        "{} workers started (sandbox: {:?})",
        handles.len(),
        settings.sandbox.backend
    );

    let supervisor = Supervisor::new(db, task_queue, notifier, settings.supervisor.clone());
    let sup = supervisor.spawn(queue);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    sup.abort();
    for h in handles {
        h.abort();
    }
    Ok(())
}
