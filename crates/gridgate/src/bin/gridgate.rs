use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::LocalSet;

use gridgate::admission::SubmitRequest;
use gridgate::admission::audit::{AuditSink, FileAuditSink, LogAuditSink};
use gridgate::broker::{Broker, BrokerService, create_broker_service, run_broker};
use gridgate::common::setup::setup_logging;
use gridgate::config::{ConfigRef, ConfigStore};
use gridgate::gridengine::submit::{build_submit_args, format_command_line};
use gridgate::gridengine::template::JobSpec;
use gridgate::gridengine::{ControlAction, GridEngine, GridEngineCommands};
use gridgate::session::cli::CliBackend;
use gridgate::{GRIDGATE_VERSION, JobId};

#[derive(Parser)]
#[command(author, version = GRIDGATE_VERSION, about = "Rate-limited gateway into a Grid Engine cluster")]
struct RootOptions {
    /// Enables debug logging
    #[arg(long, global = true, env = "GRIDGATE_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Starts the broker and serves JSON requests read from stdin
    Serve(ServeOpts),
    /// Validates a job spec and prints the qsub invocation without submitting it
    Check(CheckOpts),
    /// Prints the name and version of the grid engine
    BackendInfo(BackendInfoOpts),
}

#[derive(clap::Args)]
struct ServeOpts {
    /// Path to the JSON configuration file
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    config: Option<PathBuf>,
}

#[derive(clap::Args)]
struct CheckOpts {
    /// Path to the job spec
    job: PathBuf,
}

#[derive(clap::Args)]
struct BackendInfoOpts {
    /// Path to the JSON configuration file
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    config: Option<PathBuf>,
}

/// One line of the serve protocol.
#[derive(Deserialize)]
#[serde(untagged)]
enum ServeRequest {
    Submit(SubmitRequest),
    #[serde(rename_all = "camelCase")]
    Control {
        job_id: JobId,
        action: ControlAction,
    },
    #[serde(rename_all = "camelCase")]
    Get {
        job_id: JobId,
    },
    Tracked {
        tracked: bool,
    },
}

#[derive(Serialize)]
struct Acknowledgement {
    status: bool,
}

async fn open_config(path: Option<PathBuf>) -> ConfigRef {
    ConfigRef::new(ConfigStore::open(path).await)
}

fn create_engine(config: &ConfigRef) -> GridEngine {
    GridEngine::new(GridEngineCommands::from_config(config.get().config()))
}

async fn handle_line(service: &BrokerService, line: &str) -> anyhow::Result<serde_json::Value> {
    let request: ServeRequest = serde_json::from_str(line)?;
    let response = match request {
        ServeRequest::Submit(request) => match service.submit(request).await {
            Ok(job) => serde_json::to_value(job)?,
            Err(error) => serde_json::to_value(error.to_rejection())?,
        },
        ServeRequest::Control { job_id, action } => {
            service.control(job_id, action).await?;
            serde_json::to_value(Acknowledgement { status: true })?
        }
        ServeRequest::Get { job_id } => match service.get_job(job_id.clone()).await? {
            Some(job) => serde_json::to_value(job)?,
            None => anyhow::bail!("Job {job_id} not found"),
        },
        ServeRequest::Tracked { tracked: true } => {
            serde_json::to_value(service.tracked_jobs().await?)?
        }
        ServeRequest::Tracked { tracked: false } => {
            serde_json::to_value(Acknowledgement { status: true })?
        }
    };
    Ok(response)
}

async fn serve_stdin(service: &BrokerService) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(service, &line).await.unwrap_or_else(|error| {
            log::debug!("Request `{line}` failed: {error:?}");
            serde_json::json!({"status": false, "description": error.to_string()})
        });
        let mut data = serde_json::to_vec(&response)?;
        data.push(b'\n');
        stdout.write_all(&data).await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn command_serve(opts: ServeOpts) -> anyhow::Result<()> {
    let config = open_config(opts.config).await;
    let backend = Rc::new(CliBackend::new(create_engine(&config)));

    let audit_path = config.get().config().audit_log_path.clone();
    let (audit, audit_writer): (Rc<dyn AuditSink>, _) = match audit_path {
        Some(path) => {
            log::info!("Writing audit records into {}", path.display());
            let (sink, handle) = FileAuditSink::start(path);
            (Rc::new(sink), Some(handle))
        }
        None => (Rc::new(LogAuditSink), None),
    };

    let broker = Broker::new(config, backend, audit);
    let (service, receiver) = create_broker_service();

    let local_set = LocalSet::new();
    let result = local_set
        .run_until(async move {
            let broker_handle = tokio::task::spawn_local(run_broker(broker, receiver));
            let result = serve_stdin(&service).await;
            service.stop();
            broker_handle.await?;
            result
        })
        .await;

    if let Some(handle) = audit_writer {
        handle.await?;
    }
    result
}

async fn command_check(opts: CheckOpts) -> anyhow::Result<()> {
    let spec = JobSpec::load(&opts.job).await?;
    let template = spec.to_template()?;
    let array = spec.array_params();
    let args = build_submit_args(&template, array.as_ref())?;
    println!(
        "{}",
        format_command_line(&GridEngineCommands::default().qsub, &args)
    );
    Ok(())
}

async fn command_backend_info(opts: BackendInfoOpts) -> anyhow::Result<()> {
    let config = open_config(opts.config).await;
    let info = create_engine(&config).backend_info().await?;
    println!("{} {}", info.name, info.version);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let opts = RootOptions::parse();
    setup_logging(opts.debug);

    let result = match opts.subcmd {
        SubCommand::Serve(opts) => command_serve(opts).await,
        SubCommand::Check(opts) => {
            let path = opts.job.clone();
            command_check(opts)
                .await
                .with_context(|| format!("Job spec {} was rejected", path.display()))
        }
        SubCommand::BackendInfo(opts) => command_backend_info(opts).await,
    };

    if let Err(error) = result {
        log::error!("{error:?}");
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{RootOptions, ServeRequest};

    #[test]
    fn verify_root_cli() {
        use clap::CommandFactory;
        RootOptions::command().debug_assert()
    }

    #[test]
    fn parse_serve_requests() {
        let request: ServeRequest =
            serde_json::from_str(r#"{"ip": "1.2.3.4", "time": 10, "jobPath": "/tmp/job.json"}"#)
                .unwrap();
        assert!(matches!(request, ServeRequest::Submit(_)));

        let request: ServeRequest =
            serde_json::from_str(r#"{"jobId": "12", "action": "TERMINATE"}"#).unwrap();
        assert!(matches!(request, ServeRequest::Control { .. }));

        let request: ServeRequest = serde_json::from_str(r#"{"jobId": "12"}"#).unwrap();
        assert!(matches!(request, ServeRequest::Get { .. }));

        let request: ServeRequest = serde_json::from_str(r#"{"tracked": true}"#).unwrap();
        assert!(matches!(request, ServeRequest::Tracked { .. }));
    }
}
