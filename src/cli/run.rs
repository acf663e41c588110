use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use dialoguer::{Input, Password};
use handoff_agent_core::{
    ActionOracle, AgentError, InputRequest, JobEvent, JobEventKind, JobManager, JobOptions,
    JobPhase, StartUrlOracle,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use url::Url;

use super::context::CliContext;
use super::output::OutputFormat;
use crate::driver::HttpDriver;
use crate::llm::build_oracle;

#[derive(Args, Clone)]
pub struct RunArgs {
    /// Natural-language goal for the job
    #[arg(long)]
    pub goal: String,

    /// Page to open before the oracle is consulted
    #[arg(long = "start-url", value_name = "URL")]
    pub start_url: Option<String>,

    /// Browser driver endpoint (defaults to driver.endpoint)
    #[arg(long = "driver-endpoint", value_name = "URL")]
    pub driver_endpoint: Option<String>,

    /// Finish once this many results were extracted
    #[arg(long = "top-k", value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub top_k: Option<u64>,
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let goal = args.goal.trim();
    if goal.is_empty() {
        bail!("--goal must not be empty");
    }

    let mut config = ctx.config().clone();
    if let Some(endpoint) = args.driver_endpoint.clone() {
        config.driver.endpoint = Some(endpoint);
    }
    let services = config
        .services()
        .context("invalid privacy configuration")?;
    let manager = JobManager::new(config.engine.clone(), services);

    let mut oracle: Arc<dyn ActionOracle> = build_oracle(&config.oracle).with_context(|| {
        format!(
            "{} action oracle unavailable; set {} or oracle.api_key",
            config.oracle.provider.as_str(),
            config.oracle.api_key_env()
        )
    })?;
    if let Some(raw) = args.start_url.as_deref() {
        let url = Url::parse(raw.trim()).with_context(|| format!("invalid --start-url {raw}"))?;
        oracle = Arc::new(StartUrlOracle::new(url.to_string(), oracle));
    }
    let driver = Arc::new(
        HttpDriver::from_settings(&config.driver)
            .context("browser driver unavailable; set driver.endpoint or --driver-endpoint")?,
    );

    let mut events = manager.subscribe();
    let options = JobOptions {
        result_budget: args.top_k.map(|top_k| top_k as usize),
    };
    let job_id = manager.spawn_with_options(goal, options, oracle, driver);
    info!(job_id = %job_id, "job started");

    loop {
        let event = match events.recv().await {
            Ok(event) if event.job_id == job_id => event,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event stream lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        print_event(&event, output)?;

        match event.kind {
            JobEventKind::InputRequested => {
                let Some(request) = manager.get_pending_request(&job_id)? else {
                    continue;
                };
                let value = prompt_human(request).await?;
                match manager.submit_response(&job_id, value) {
                    Ok(()) => {}
                    Err(AgentError::NoPendingRequest(_)) => {
                        warn!(job_id = %job_id, "input request expired before the answer arrived");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            kind if kind.is_terminal() => break,
            _ => {}
        }
    }

    let snapshot = manager.wait(&job_id).await?;
    let redactor = &manager.services().redactor;
    match snapshot.phase {
        JobPhase::Completed => {
            let summary = snapshot
                .summary
                .as_deref()
                .map(|summary| redactor.text(summary))
                .unwrap_or_else(|| "goal reached".to_string());
            println!("Job {} completed: {}", job_id, summary);
            print_results(&snapshot.public_results(redactor), output)?;
            let usage = snapshot.total_usage();
            if usage.total() > 0 {
                info!(
                    job_id = %job_id,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "oracle token usage"
                );
            }
            Ok(())
        }
        _ => {
            let reason = snapshot
                .reason
                .as_deref()
                .map(|reason| redactor.text(reason))
                .unwrap_or_else(|| "unknown reason".to_string());
            bail!("job {} failed: {}", job_id, reason)
        }
    }
}

async fn prompt_human(request: InputRequest) -> Result<String> {
    tokio::task::spawn_blocking(move || -> Result<String> {
        let prompt = format!("{} ({})", request.prompt, request.kind);
        let value = if request.is_redacted() {
            Password::new()
                .with_prompt(prompt)
                .allow_empty_password(true)
                .interact()?
        } else {
            Input::<String>::new()
                .with_prompt(prompt)
                .allow_empty(true)
                .interact_text()?
        };
        Ok(value)
    })
    .await
    .context("input prompt task panicked")?
}

fn print_results(results: &[serde_json::Value], output: OutputFormat) -> Result<()> {
    if results.is_empty() {
        return Ok(());
    }
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string(results)?),
        OutputFormat::Yaml => print!("---\n{}", serde_yaml::to_string(results)?),
        OutputFormat::Human => {
            println!("Results ({}):", results.len());
            for (index, item) in results.iter().enumerate() {
                println!("  {}. {}", index + 1, item);
            }
        }
    }
    Ok(())
}

fn print_event(event: &JobEvent, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
        OutputFormat::Yaml => print!("---\n{}", serde_yaml::to_string(event)?),
        OutputFormat::Human => {
            let details = match &event.details {
                serde_json::Value::Null => String::new(),
                serde_json::Value::Object(map) if map.is_empty() => String::new(),
                other => format!(" {}", other),
            };
            println!("[step {}] {}{}", event.step, event.kind, details);
        }
    }
    Ok(())
}
