use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use assessment_detail_api::{AssessmentDetailApi, DetailRequest};
use assessment_detail_store::DocumentStore;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "assessment-detail")]
#[command(about = "Assessment detail assembler CLI")]
struct Cli {
    /// JSON document bundle holding frameworks, criteria and submissions
    #[arg(long, env = "ASSESSMENT_STORE", default_value = "./assessment_store.json")]
    store: PathBuf,

    /// Tracing filter directive, e.g. `info` or `assessment_detail_core=debug`
    #[arg(long, env = "ASSESSMENT_LOG", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Assemble the detail payload for one entity
    Detail(DetailArgs),
    /// List the criteria ids of a framework's theme tree
    Flatten(FlattenArgs),
    /// Report malformed themes and matrix questions
    Lint(FrameworkArgs),
    Submission {
        #[command(subcommand)]
        command: SubmissionCommand,
    },
    Store {
        #[command(subcommand)]
        command: StoreCommand,
    },
}

#[derive(Debug, Args)]
struct FrameworkArgs {
    #[arg(long)]
    framework_id: String,
}

#[derive(Debug, Args)]
struct DetailArgs {
    #[arg(long)]
    framework_id: String,
    #[arg(long)]
    entity_id: String,
    #[arg(long)]
    program_id: Option<String>,
}

#[derive(Debug, Args)]
struct FlattenArgs {
    #[arg(long)]
    framework_id: String,
    #[arg(long, default_value_t = false)]
    weighted: bool,
}

#[derive(Debug, Subcommand)]
enum SubmissionCommand {
    Show(SubmissionShowArgs),
}

#[derive(Debug, Args)]
struct SubmissionShowArgs {
    #[arg(long)]
    submission_id: String,
}

#[derive(Debug, Subcommand)]
enum StoreCommand {
    Stats,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing(directive: &str) -> Result<()> {
    let filter = EnvFilter::try_new(directive)
        .with_context(|| format!("invalid log filter `{directive}`"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("failed to initialise tracing: {err}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;
    debug!(store = %cli.store.display(), "opening document store");

    let store = DocumentStore::open(&cli.store)?;
    let mut api = AssessmentDetailApi::new(store);
    match cli.command {
        Command::Detail(args) => run_detail(args, &mut api),
        Command::Flatten(args) => {
            let flattened = api.flatten(&args.framework_id, args.weighted)?;
            emit_json(serde_json::to_value(&flattened).context("failed to serialize criteria ids")?)
        }
        Command::Lint(args) => {
            let lint = api.lint(&args.framework_id)?;
            emit_json(serde_json::to_value(&lint).context("failed to serialize lint report")?)
        }
        Command::Submission { command } => run_submission(command, &api),
        Command::Store { command } => match command {
            StoreCommand::Stats => emit_json(
                serde_json::to_value(api.store().stats()).context("failed to serialize store stats")?,
            ),
        },
    }
}

fn run_detail(args: DetailArgs, api: &mut AssessmentDetailApi<DocumentStore>) -> Result<()> {
    let result = api.detail(&DetailRequest {
        framework_id: args.framework_id,
        entity_id: args.entity_id,
        program_id: args.program_id,
    })?;

    emit_json(serde_json::json!({
        "digest": result.digest,
        "detail": serde_json::to_value(&result.detail).context("failed to serialize assessment detail")?,
    }))
}

fn run_submission(command: SubmissionCommand, api: &AssessmentDetailApi<DocumentStore>) -> Result<()> {
    match command {
        SubmissionCommand::Show(args) => {
            let submission = api.submission_show(&args.submission_id)?;
            emit_json(serde_json::to_value(&submission).context("failed to serialize submission")?)
        }
    }
}
