// mimir/src/main.rs

mod cli;

use clap::Parser;
use cli::{Cli, Commands, ScheduleCommands};
use comfy_table::Table;
use mimir_core::application::{
    parse_pipeline, CatchupLimit, ParsedPipeline, PluginRegistry, Scheduler, StatefulExecutor, WorkTaskDispatcher,
};
use mimir_core::domain::access::PermissionManager;
use mimir_core::domain::schedule::Schedule;
use mimir_core::domain::worktask::{WorkTask, WorkTaskSpec, WorkTaskStatus, WorkTaskType};
use mimir_core::infrastructure::config::EngineConfig;
use mimir_core::infrastructure::context::ContextService;
use mimir_core::infrastructure::plugins::{JsonInputPlugin, MultiplyPlugin, NoopPlugin, StdoutOutputPlugin};
use mimir_core::infrastructure::store::JsonRecordStore;
use mimir_core::ports::context::ContextStore;
use mimir_core::ports::storage::{BinaryStore, RecordStore};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const EXIT_OK: u8 = 0;
const EXIT_USAGE: u8 = 1;
const EXIT_VALIDATION_FAILURE: u8 = 2;
const EXIT_RUNTIME_FAILURE: u8 = 3;

/// Everything `run`, `serve`, and `schedule` need: a registry of the
/// built-in plugins, the context service, and the dispatcher/scheduler
/// pair wired to the same persistent store (§4, §6).
struct Engine {
    dispatcher: Arc<WorkTaskDispatcher>,
    scheduler: Scheduler,
}

fn build_engine(config: &EngineConfig) -> Engine {
    let mut registry = PluginRegistry::new();
    let _ = registry.register(Arc::new(JsonInputPlugin));
    let _ = registry.register(Arc::new(MultiplyPlugin));
    let _ = registry.register(Arc::new(NoopPlugin));
    let _ = registry.register(Arc::new(StdoutOutputPlugin));

    let binary_store: Arc<dyn BinaryStore> = Arc::new(JsonRecordStore::new(&config.context_storage_base_path));
    let record_store: Arc<dyn RecordStore> = Arc::new(JsonRecordStore::new(&config.context_storage_base_path));
    let context: Arc<dyn ContextStore> = Arc::new(ContextService::new(
        PermissionManager::default(),
        binary_store,
        Arc::clone(&record_store),
    ));
    let executor = Arc::new(StatefulExecutor::new(Arc::new(registry), context));
    let dispatcher = Arc::new(WorkTaskDispatcher::new(executor, config.worker_pool_size));

    let scheduler = Scheduler::new(record_store, Arc::clone(&dispatcher), CatchupLimit(config.scheduler_catchup_limit));

    Engine { dispatcher, scheduler }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let mut config = EngineConfig::from_env();
    if let Some(path) = &cli.storage_path {
        config.context_storage_base_path = path.display().to_string();
    }

    let code = match cli.command {
        Commands::Run { pipeline, namespace } => run_pipeline_once(&config, &pipeline, namespace).await,
        Commands::Validate { pipeline } => validate_pipeline(&pipeline).await,
        Commands::Serve => serve(&config).await,
        Commands::Schedule { command } => schedule_command(&config, command).await,
    };

    ExitCode::from(code)
}

async fn read_parsed_pipeline(path: &Path) -> Result<ParsedPipeline, u8> {
    let yaml = match tokio::fs::read_to_string(path).await {
        Ok(yaml) => yaml,
        Err(e) => {
            eprintln!("could not read '{}': {e}", path.display());
            return Err(EXIT_VALIDATION_FAILURE);
        }
    };
    let (parsed, errors) = parse_pipeline(&yaml);
    if !errors.is_empty() {
        for error in &errors {
            eprintln!("pipeline error: {error}");
        }
        return Err(EXIT_VALIDATION_FAILURE);
    }
    parsed.ok_or(EXIT_VALIDATION_FAILURE)
}

async fn validate_pipeline(path: &Path) -> u8 {
    match read_parsed_pipeline(path).await {
        Ok(parsed) => {
            println!(
                "'{}' is valid: {} step(s) in '{}'",
                path.display(),
                parsed.graph.steps.len(),
                parsed.def.name
            );
            EXIT_OK
        }
        Err(code) => code,
    }
}

async fn run_pipeline_once(config: &EngineConfig, path: &Path, namespace: Option<String>) -> u8 {
    let parsed = match read_parsed_pipeline(path).await {
        Ok(parsed) => parsed,
        Err(code) => return code,
    };
    let namespace = namespace.unwrap_or_else(|| parsed.def.name.clone());

    let engine = build_engine(config);
    let task = WorkTask::new(WorkTaskType::PipelineExecution, 0, "cli", WorkTaskSpec::default(), chrono::Utc::now());
    let id = engine.dispatcher.submit(task, Arc::new(parsed), namespace).await;

    loop {
        if let Some(record) = engine.dispatcher.get(id).await
            && record.task.status.is_terminal()
        {
            return match record.task.status {
                WorkTaskStatus::Completed => {
                    println!("pipeline completed");
                    EXIT_OK
                }
                other => {
                    eprintln!("pipeline {other:?}: {}", record.error.unwrap_or_default());
                    EXIT_RUNTIME_FAILURE
                }
            };
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn serve(config: &EngineConfig) -> u8 {
    let engine = build_engine(config);
    if let Err(e) = engine.scheduler.load().await {
        eprintln!("{:?}", miette::Report::new(e));
        return EXIT_RUNTIME_FAILURE;
    }
    tracing::info!("mimir serve: scheduler and dispatcher running, ctrl-c to stop");

    let (source, token) = mimir_core::ports::cancellation::CancellationSource::new();
    tokio::select! {
        () = engine.scheduler.run(token) => {}
        _ = tokio::signal::ctrl_c() => {
            source.cancel();
        }
    }
    EXIT_OK
}

async fn schedule_command(config: &EngineConfig, command: ScheduleCommands) -> u8 {
    let engine = build_engine(config);
    if let Err(e) = engine.scheduler.load().await {
        eprintln!("{:?}", miette::Report::new(e));
        return EXIT_RUNTIME_FAILURE;
    }

    match command {
        ScheduleCommands::Add {
            project,
            name,
            cron,
            pipelines,
        } => add_schedule(&engine, config, project, name, cron, pipelines).await,
        ScheduleCommands::List => {
            let mut table = Table::new();
            table.set_header(vec!["id", "name", "cron", "enabled", "next_run"]);
            for schedule in engine.scheduler.list().await {
                table.add_row(vec![
                    schedule.id.to_string(),
                    schedule.name,
                    schedule.cron_expression,
                    schedule.enabled.to_string(),
                    schedule.next_run.map(|t| t.to_rfc3339()).unwrap_or_default(),
                ]);
            }
            println!("{table}");
            EXIT_OK
        }
        ScheduleCommands::Remove { id } => match id.parse::<Uuid>() {
            Ok(id) => match engine.scheduler.remove(id).await {
                Ok(()) => {
                    println!("removed schedule {id}");
                    EXIT_OK
                }
                Err(e) => {
                    eprintln!("{:?}", miette::Report::new(e));
                    EXIT_RUNTIME_FAILURE
                }
            },
            Err(_) => {
                eprintln!("'{id}' is not a valid schedule id");
                EXIT_VALIDATION_FAILURE
            }
        },
    }
}

async fn add_schedule(
    engine: &Engine,
    config: &EngineConfig,
    project: String,
    name: String,
    cron: String,
    pipelines: Vec<std::path::PathBuf>,
) -> u8 {
    let record_store: Arc<dyn RecordStore> = Arc::new(JsonRecordStore::new(&config.context_storage_base_path));
    let mut pipeline_ids = Vec::with_capacity(pipelines.len());
    for path in &pipelines {
        let yaml = match tokio::fs::read_to_string(path).await {
            Ok(yaml) => yaml,
            Err(e) => {
                eprintln!("could not read '{}': {e}", path.display());
                return EXIT_VALIDATION_FAILURE;
            }
        };
        let (_, errors) = parse_pipeline(&yaml);
        if !errors.is_empty() {
            for error in &errors {
                eprintln!("pipeline error in '{}': {error}", path.display());
            }
            return EXIT_VALIDATION_FAILURE;
        }
        let id = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| Uuid::new_v4().to_string());
        if let Err(e) = record_store.save("pipelines", &id, &serde_json::json!({"yaml": yaml})).await {
            eprintln!("{:?}", miette::Report::new(e));
            return EXIT_RUNTIME_FAILURE;
        }
        pipeline_ids.push(id);
    }

    let schedule = Schedule::new(project, name, pipeline_ids, cron);
    match engine.scheduler.add(schedule).await {
        Ok(id) => {
            println!("schedule {id} registered");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            EXIT_VALIDATION_FAILURE
        }
    }
}
