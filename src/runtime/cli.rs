use clap::Parser;
use owo_colors::OwoColorize;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::config::{CheckConfig, CheckOptions, Settings, DEFAULT_MODEL_ID};
use crate::adapters::emitter::LogEmitter;
use crate::adapters::llm::ChatLlmAdapter;
use crate::core::agent::{ComplianceStatus, RunOutcome, DEFAULT_MAX_STEPS};
use crate::error::CheckError;

use super::check::run_check;

#[derive(Parser, Debug)]
#[command(
    name = "netbox-compliance",
    version,
    about = "Check NetBox against a compliance rule written in plain English"
)]
pub struct Cli {
    #[arg(value_name = "RULE", help = "Rule to check, e.g. \"every device should have a primary IPv4 or IPv6\"")]
    pub rule: String,
    #[arg(long, conflicts_with_all = ["rack", "device"], help = "Only check objects in this site")]
    pub site: Option<String>,
    #[arg(long, conflicts_with_all = ["site", "device"], help = "Only check objects in this rack")]
    pub rack: Option<String>,
    #[arg(long, conflicts_with_all = ["site", "rack"], help = "Only check this device")]
    pub device: Option<String>,
    #[arg(long, help = format!("Model as provider/model [default: {DEFAULT_MODEL_ID}]"))]
    pub model: Option<String>,
    #[arg(long, env = "API_KEY", hide_env_values = true, help = "API key for the model provider")]
    pub api_key: Option<String>,
    #[arg(long, env = "NETBOX_URL", help = "NetBox base URL")]
    pub netbox_url: Option<String>,
    #[arg(long, env = "NETBOX_TOKEN", hide_env_values = true, help = "NetBox API token")]
    pub netbox_token: Option<String>,
    #[arg(long, env = "MCP_SERVER_DIR", help = "Checkout of netbox-mcp-server")]
    pub mcp_dir: Option<String>,
    #[arg(long, help = "Ask the model to check at most this many objects")]
    pub limit: Option<u32>,
    #[arg(long, help = format!("Maximum model round-trips [default: {DEFAULT_MAX_STEPS}]"))]
    pub max_steps: Option<u32>,
    #[arg(long, env = "NETBOX_COMPLIANCE_CONFIG", help = "Settings file (TOML)")]
    pub config: Option<PathBuf>,
    #[arg(long, help = "Output machine-readable JSON")]
    pub json: bool,
    #[arg(short, long, help = "Log agent progress to stderr")]
    pub verbose: bool,
}

impl Cli {
    fn into_options(self) -> CheckOptions {
        CheckOptions {
            rule: self.rule,
            site: self.site,
            rack: self.rack,
            device: self.device,
            model: self.model,
            api_key: self.api_key,
            netbox_url: self.netbox_url,
            netbox_token: self.netbox_token,
            mcp_dir: self.mcp_dir,
            limit: self.limit,
            max_steps: self.max_steps,
        }
    }
}

fn init_logging(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if verbose {
        builder.filter_module("netbox_compliance", log::LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} failed to start async runtime: {e}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(execute(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<(), CheckError> {
    let json_output = cli.json;
    let settings = Settings::load_optional(cli.config.as_deref())?;
    let config = CheckConfig::resolve(cli.into_options(), &settings)?;

    if !json_output {
        print_header(&config);
    }

    let outcome = run_check(
        &config,
        Arc::new(ChatLlmAdapter::default()),
        Arc::new(LogEmitter),
    )
    .await?;

    if json_output {
        print_json(&config, &outcome);
    } else {
        print_report(&outcome);
    }
    Ok(())
}

fn header_line(label: &str, value: impl std::fmt::Display) -> String {
    format!("{} {value}", format!("{label}:").bold())
}

fn print_header(config: &CheckConfig) {
    println!("{}", header_line("Rule", &config.rule));
    println!("{}", header_line("Scope", &config.scope));
    println!("{}", header_line("Model", &config.model_id));
    if let Some(limit) = config.limit {
        println!("{}", header_line("Limit", format!("{limit} objects")));
    }
    println!();
    println!("{}", "Running compliance check...".dimmed());
}

fn colored_status(status: ComplianceStatus) -> String {
    match status {
        ComplianceStatus::Pass => status.as_str().bright_green().bold().to_string(),
        ComplianceStatus::Fail => status.as_str().bright_red().bold().to_string(),
        ComplianceStatus::NotSupported => status.as_str().yellow().bold().to_string(),
        ComplianceStatus::Unknown => status.as_str().dimmed().to_string(),
    }
}

fn print_report(outcome: &RunOutcome) {
    let seconds = outcome.duration_ms as f64 / 1000.0;
    println!(
        "Completed in {seconds:.1}s with {} tool call(s) over {} step(s)",
        outcome.tool_calls, outcome.steps
    );
    println!("Status: {}", colored_status(outcome.output.status()));
    if outcome.output.is_degraded() {
        println!(
            "{}",
            "[INCOMPLETE] the model did not reach a final answer".yellow()
        );
    }
    println!();
    println!("{}", outcome.output.text().trim_end());
}

fn print_json(config: &CheckConfig, outcome: &RunOutcome) {
    let document = json!({
        "run_id": outcome.run_id,
        "rule": config.rule,
        "scope": config.scope,
        "model": config.model_id,
        "status": outcome.output.status(),
        "state": outcome.state,
        "degraded": outcome.output.is_degraded(),
        "steps": outcome.steps,
        "tool_calls": outcome.tool_calls,
        "duration_ms": outcome.duration_ms,
        "token_usage": outcome.token_usage,
        "report": outcome.output.report(),
        "raw_output": outcome.output.text(),
    });
    println!("{document:#}");
}
