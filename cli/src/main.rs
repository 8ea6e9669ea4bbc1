mod arg_parser;
mod client_cli;
mod testcases;

use arg_parser::{ArgParser, JobCommand, SubCommand};
use clap::Parser;
use client_cli::ClientCli;
use harness::config::TlsConfig;
use harness::machine::CommandSpec;
use harness::trigger::trigger_controllers;
use harness::{HarnessConfig, MachineRegistry, Runner, Trigger};
use protobuf::output_request;
use std::error;
use std::path::Path;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type CliResult<T> = Result<T, Box<dyn error::Error>>;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let verbose = std::env::var("RUST_LOG")
        .map(|level| level.contains("debug") || level.contains("trace"))
        .unwrap_or(false);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(verbose)
                .with_line_number(verbose),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> CliResult<ExitCode> {
    let args = ArgParser::parse();
    init_tracing();

    let success = match args.sub_command {
        SubCommand::Run {
            config,
            testcases,
            report,
        } => run(&config, &testcases, report.as_deref()).await?,
        SubCommand::List => {
            for case in testcases::builtin() {
                println!("{:<20} {}", case.id(), case.name());
            }
            true
        }
        SubCommand::Trigger {
            config,
            file,
            remote_path,
            command,
            machines,
        } => trigger(&config, &file, &remote_path, &command, &machines).await?,
        SubCommand::Job {
            server,
            tls,
            command,
        } => {
            job(&server, tls.config()?.as_ref(), command).await?;
            true
        }
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run(config: &Path, ids: &[String], report: Option<&Path>) -> CliResult<bool> {
    let config = HarnessConfig::from_file(config)?;
    let cases = testcases::select(ids)?;
    let runner = Runner::from_config(&config)?;
    info!(run_id = %runner.run_id(), testcases = cases.len(), "starting run");

    let summary = runner.run_all(cases).await;
    let disconnect = runner.shutdown().await;
    if !disconnect.is_clean() {
        warn!(%disconnect, "failed to disconnect machines");
    }

    println!("{}", summary);
    if let Some(path) = report {
        std::fs::write(path, serde_json::to_vec_pretty(&summary)?)?;
        info!(path = %path.display(), "wrote run report");
    }
    Ok(summary.all_passed())
}

async fn trigger(
    config: &Path,
    file: &Path,
    remote_path: &str,
    command: &str,
    names: &[String],
) -> CliResult<bool> {
    let config = HarnessConfig::from_file(config)?;
    let registry = MachineRegistry::from_config(&config, &config.poll_policy()?);
    let machines = if names.is_empty() {
        registry.all()
    } else {
        names
            .iter()
            .map(|name| registry.get(name))
            .collect::<harness::Result<Vec<_>>>()?
    };
    let trigger = Trigger::from_file(file)?;

    let command = CommandSpec::shell(command);
    let report = trigger_controllers(machines, &trigger, remote_path, &command).await?;
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(output) => println!("{:<16} ok      {}", outcome.target, output.stdout.trim()),
            Err(err) => println!("{:<16} FAILED  {}", outcome.target, err),
        }
    }
    let disconnect = registry.disconnect_all().await;
    if !disconnect.is_clean() {
        warn!(%disconnect, "failed to disconnect machines");
    }
    Ok(report.failed().count() == 0)
}

async fn job(server: &str, tls: Option<&TlsConfig>, command: JobCommand) -> CliResult<()> {
    let mut client = ClientCli::connect(server, tls).await?;
    match command {
        JobCommand::Start {
            command,
            args,
            dir,
            envs,
        } => {
            client.start_job(&command, &args, &dir, &envs).await?;
        }
        JobCommand::Stop { job_id } => {
            client.stop_job(job_id).await?;
        }
        JobCommand::Status { job_id } => {
            client.query_status(job_id).await?;
        }
        JobCommand::Output {
            job_id,
            output_type,
        } => {
            let output_type = match output_type {
                arg_parser::OutputType::Stdout => output_request::OutputType::Stdout,
                arg_parser::OutputType::Stderr => output_request::OutputType::Stderr,
                arg_parser::OutputType::All => output_request::OutputType::All,
            };
            client.stream_output(job_id, output_type).await?
        }
    }
    Ok(())
}
