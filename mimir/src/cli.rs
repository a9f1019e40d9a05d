// mimir/src/cli.rs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mimir")]
#[command(version)]
#[command(about = "YAML pipeline engine: plugin dispatch, scheduling, schema inference", long_about = None)]
pub struct Cli {
    /// Storage base path (overrides CONTEXT_STORAGE_BASE_PATH)
    #[arg(long, global = true)]
    pub storage_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline YAML file once and wait for completion
    Run {
        /// Path to the pipeline YAML file
        pipeline: PathBuf,

        /// Namespace to execute the run under (defaults to the pipeline name)
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Start the scheduler and dispatcher as a long-running process
    Serve,

    /// Parse and validate a pipeline YAML file without running it
    Validate {
        /// Path to the pipeline YAML file
        pipeline: PathBuf,
    },

    /// Manage cron schedules
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },
}

#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// Register a new schedule
    Add {
        /// Project identifier the schedule belongs to
        #[arg(long)]
        project: String,

        /// Human-readable schedule name
        #[arg(long)]
        name: String,

        /// Five-field cron expression
        #[arg(long)]
        cron: String,

        /// Pipeline YAML files to register and fire together
        pipelines: Vec<PathBuf>,
    },

    /// List all registered schedules
    List,

    /// Remove a schedule by id
    Remove {
        /// Schedule UUID
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_namespace() {
        let args = Cli::parse_from(["mimir", "run", "pipeline.yaml", "--namespace", "nightly"]);
        match args.command {
            Commands::Run { pipeline, namespace } => {
                assert_eq!(pipeline, PathBuf::from("pipeline.yaml"));
                assert_eq!(namespace, Some("nightly".to_string()));
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn parses_schedule_add() {
        let args = Cli::parse_from([
            "mimir",
            "schedule",
            "add",
            "--project",
            "p1",
            "--name",
            "nightly",
            "--cron",
            "0 0 * * *",
            "a.yaml",
            "b.yaml",
        ]);
        match args.command {
            Commands::Schedule {
                command: ScheduleCommands::Add { project, pipelines, .. },
            } => {
                assert_eq!(project, "p1");
                assert_eq!(pipelines.len(), 2);
            }
            _ => panic!("expected Schedule Add command"),
        }
    }

    #[test]
    fn parses_validate() {
        let args = Cli::parse_from(["mimir", "validate", "pipeline.yaml"]);
        assert!(matches!(args.command, Commands::Validate { .. }));
    }
}
