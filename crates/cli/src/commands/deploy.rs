//! `moor deploy`: resolve the spec and apply it to this host.

use std::path::Path;
use std::sync::Arc;

use moor_deploy::{Executor, InterruptState, LogSink, ShellRunner};
use serde_json::json;

use crate::args::{Cli, SpecArgs};
use crate::error::{CliError, Result};

const FALLBACK_LOG: &str = "moor.log";

pub fn run(cli: &Cli, args: &SpecArgs) -> Result<()> {
    let spec = super::resolve_spec(args)?;
    moor_deploy::require_root()?;
    moor_deploy::check_host_os();

    let sink = Arc::new(LogSink::open(&cli.log_file, Path::new(FALLBACK_LOG)));
    let interrupt = InterruptState::new();
    {
        let interrupt = interrupt.clone();
        ctrlc::set_handler(move || interrupt.request())
            .map_err(|err| CliError::Output(format!("installing signal handler: {err}")))?;
    }
    let runner = ShellRunner::new(interrupt, Arc::clone(&sink));

    if spec.tune_docker_daemon() {
        moor_deploy::tune_docker_daemon(&runner)?;
    }

    let report = Executor::new(&spec, &runner).apply()?;
    sink.line(&format!("deploy of {} complete", spec.service_name()));

    if cli.json {
        let payload = json!({
            "service": spec.service_name(),
            "stages": report.stages.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "artifacts": report.artifacts,
            "endpoints": report.endpoints,
            "followups": report.followups,
            "log": sink.path(),
        });
        let text = serde_json::to_string_pretty(&payload)
            .map_err(|err| CliError::Output(format!("serializing report: {err}")))?;
        println!("{text}");
        return Ok(());
    }

    println!("deployed {}", spec.service_name());
    for endpoint in &report.endpoints {
        println!("  -> {endpoint}");
    }
    if spec.auth_token().is_some() {
        println!("  requests need 'Authorization: Bearer <token>'");
    }
    if !report.followups.is_empty() {
        println!("manage with:");
        for command in &report.followups {
            println!("  {command}");
        }
    }
    println!("log: {}", sink.path().display());
    Ok(())
}
