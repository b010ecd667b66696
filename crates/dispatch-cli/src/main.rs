//! `dispatch`: command-line surface for the job dispatch core
//!
//! Every command prints a JSON document on stdout. Logs go to stderr and are
//! filtered with `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use job_coordination::gate::{TokenVerdict, PERMISSION_OPS_ACTION};
use job_coordination::{
    Confirmation, DispatchConfig, ExecutorRegistry, HttpExecutor, JobOutcome, JobPacket, Pipeline,
};
use serde_json::{json, Value};
use tracing::{info, warn};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Queue and ops root (overrides config and DISPATCH_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a job packet
    Submit(SubmitArgs),
    /// Show the derived status of a job
    Status { job_id: String },
    /// Show a job result
    Result { job_id: String },
    /// Show a job receipt
    Receipt { job_id: String },
    /// Process one job, or every job in the New bucket
    Run { job_id: Option<String> },
    /// Confirm a held job
    Confirm {
        job_id: String,
        /// OPS token id
        #[arg(long)]
        token: Option<String>,
        /// Acknowledge that sensitive data may leave the machine
        #[arg(long, default_value_t = false)]
        sensitive_confirmed: bool,
    },
    /// Manage OPS tokens
    #[command(subcommand)]
    Token(TokenCommand),
    /// Fail held jobs older than the confirmation window
    Expire,
    /// Resubmit a FAILED job with its retry count bumped
    Retry { job_id: String },
}

#[derive(Subcommand, Debug)]
enum TokenCommand {
    /// Issue a token
    Issue {
        /// Permission to grant (repeatable)
        #[arg(long = "permission", default_value = PERMISSION_OPS_ACTION)]
        permissions: Vec<String>,
        /// Lifetime in hours (defaults to the policy TTL)
        #[arg(long)]
        ttl_hours: Option<i64>,
    },
    /// Check a token
    Check { token_id: String },
}

#[derive(Args, Debug)]
struct SubmitArgs {
    /// Free-text instruction
    prompt: String,
    /// Path or resource the job may touch (repeatable)
    #[arg(long = "target")]
    targets: Vec<String>,
    #[arg(long, default_value_t = false)]
    sensitive: bool,
    #[arg(long, default_value_t = false)]
    allow_online: bool,
    #[arg(long, default_value_t = 1)]
    priority: u8,
    #[arg(long)]
    role: Option<String>,
    #[arg(long)]
    mode: Option<String>,
    #[arg(long)]
    user: Option<String>,
    /// Workspace the routing brain inspects
    #[arg(long)]
    workspace: Option<String>,
    /// Process the job right after submitting it
    #[arg(long, default_value_t = false)]
    process: bool,
}

impl SubmitArgs {
    fn into_packet(self) -> JobPacket {
        let mut packet = JobPacket::new(self.prompt)
            .with_targets(self.targets)
            .sensitive(self.sensitive)
            .allow_online(self.allow_online)
            .with_priority(self.priority);
        if let Some(role) = self.role {
            packet = packet.with_role(role);
        }
        if let Some(mode) = self.mode {
            packet = packet.with_mode(mode);
        }
        if let Some(user) = self.user {
            packet = packet.with_user(user);
        }
        if let Some(workspace) = self.workspace {
            packet = packet.with_workspace(workspace);
        }
        packet
    }
}

fn load_config(cli: &Cli) -> Result<DispatchConfig> {
    let mut config = DispatchConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    Ok(config)
}

fn build_executors(config: &DispatchConfig) -> Result<ExecutorRegistry> {
    let timeout = Duration::from_secs(config.executor_timeout_secs);
    let mut registry = ExecutorRegistry::new();
    for (name, url) in &config.executors {
        let executor = HttpExecutor::new(name, url, timeout)
            .with_context(|| format!("Failed to build executor '{}'", name))?;
        registry.register(Arc::new(executor));
    }
    if registry.names().is_empty() {
        warn!("No executors configured; every dispatch will fail");
    }
    Ok(registry)
}

fn outcome_json(outcome: &JobOutcome) -> Result<Value> {
    Ok(match outcome {
        JobOutcome::Held { job_id, reasons } => json!({
            "job_id": job_id,
            "status": "REQUIRES_CONFIRMATION",
            "reasons": reasons.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }),
        JobOutcome::Completed { result, receipt } => json!({
            "job_id": result.job_id,
            "status": result.status,
            "result": serde_json::to_value(result)?,
            "receipt": serde_json::to_value(receipt)?,
        }),
    })
}

fn print(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let executors = build_executors(&config)?;
    // Policy or token store corruption is fatal here, never per job
    let pipeline = Arc::new(Pipeline::open(&config, executors).context("Failed to open dispatch root")?);
    info!(root = %config.root.display(), "Dispatch ready");

    match cli.command {
        Command::Submit(args) => {
            let process = args.process;
            let id = pipeline.submit(args.into_packet())?;
            if process {
                let outcome = pipeline.process(&id).await?;
                print(&outcome_json(&outcome)?)?;
            } else {
                print(&json!({ "job_id": id, "status": pipeline.status(&id)? }))?;
            }
        }
        Command::Status { job_id } => {
            print(&json!({ "job_id": job_id, "status": pipeline.status(&job_id)? }))?;
        }
        Command::Result { job_id } => {
            print(&serde_json::to_value(pipeline.result(&job_id)?)?)?;
        }
        Command::Receipt { job_id } => {
            print(&serde_json::to_value(pipeline.receipt(&job_id)?)?)?;
        }
        Command::Run { job_id: Some(job_id) } => {
            let outcome = pipeline.process(&job_id).await?;
            print(&outcome_json(&outcome)?)?;
        }
        Command::Run { job_id: None } => {
            let mut rows = Vec::new();
            for (id, outcome) in pipeline.run_pending().await? {
                rows.push(match outcome {
                    Ok(outcome) => outcome_json(&outcome)?,
                    Err(e) => json!({ "job_id": id, "error": e.to_string(), "code": e.code() }),
                });
            }
            print(&Value::Array(rows))?;
        }
        Command::Confirm {
            job_id,
            token,
            sensitive_confirmed,
        } => {
            let confirmation = Confirmation {
                token_id: token,
                sensitive_confirmed,
            };
            let outcome = pipeline.confirm(&job_id, &confirmation).await?;
            print(&outcome_json(&outcome)?)?;
        }
        Command::Token(TokenCommand::Issue {
            permissions,
            ttl_hours,
        }) => {
            let token_id = pipeline.ops().issue_token(permissions, ttl_hours)?;
            print(&json!({ "token_id": token_id }))?;
        }
        Command::Token(TokenCommand::Check { token_id }) => {
            let verdict = pipeline.ops().check_token(&token_id)?;
            let expires_at = match &verdict {
                TokenVerdict::Valid(t) | TokenVerdict::Expired(t) | TokenVerdict::Tampered(t) => {
                    Some(t.expires_at)
                }
                TokenVerdict::Unknown => None,
            };
            print(&json!({
                "valid": verdict.is_valid(),
                "reason": verdict.reason(),
                "expires_at": expires_at,
            }))?;
        }
        Command::Expire => {
            let expired = pipeline.expire_abandoned(Utc::now())?;
            print(&json!({ "expired": expired }))?;
        }
        Command::Retry { job_id } => {
            let id = pipeline.resubmit(&job_id)?;
            print(&json!({ "job_id": id, "retry_of": job_id }))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_submit() {
        let cli = Cli::try_parse_from([
            "dispatch",
            "--root",
            "/tmp/q",
            "submit",
            "search the web for X",
            "--target",
            "a.txt",
            "--target",
            "b.txt",
            "--allow-online",
        ])
        .unwrap();

        let Command::Submit(args) = cli.command else {
            panic!("expected submit");
        };
        let packet = args.into_packet();
        assert_eq!(packet.targets, vec!["a.txt", "b.txt"]);
        assert!(packet.allow_online);
        assert!(!packet.sensitive);
    }

    #[test]
    fn test_token_issue_defaults_to_ops_permission() {
        let cli = Cli::try_parse_from(["dispatch", "token", "issue"]).unwrap();
        match cli.command {
            Command::Token(TokenCommand::Issue { permissions, ttl_hours }) => {
                assert_eq!(permissions, vec![PERMISSION_OPS_ACTION]);
                assert!(ttl_hours.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_outcome_json_for_held() {
        let outcome = JobOutcome::Held {
            job_id: "job-1".to_string(),
            reasons: vec![job_coordination::HoldReason::OpsToken],
        };
        let value = outcome_json(&outcome).unwrap();
        assert_eq!(value["status"], "REQUIRES_CONFIRMATION");
        assert_eq!(value["reasons"][0], "requires OPS confirmation");
    }
}
