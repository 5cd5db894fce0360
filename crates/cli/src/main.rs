mod config;
mod file_store;
mod retry_queue;
mod sinks;

use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use provisio_engine::{
    ExecutionOutcome, ExecutionReport, ExistenceCheck, Host, IntegrationRunner, IntegrationStore, ReqwestTransport,
    parse_manifest_file, retry_run,
};
use provisio_util::redact_json;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::config::CliConfig;
use crate::file_store::FileStore;
use crate::retry_queue::FileRetryQueue;
use crate::sinks::{JsonlNotifications, OutboxMessages};

fn main() -> ExitCode {
    init_tracing();
    let matches = build_cli().get_matches();
    match run(&matches) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    let integration = || {
        Arg::new("integration")
            .long("integration")
            .short('i')
            .required(true)
            .value_parser(value_parser!(u64))
            .help("Integration id")
    };
    let actor = |required: bool| {
        Arg::new("actor")
            .long("actor")
            .short('a')
            .required(required)
            .value_parser(value_parser!(u64))
            .help("Actor id")
    };

    Command::new("provisio")
        .about("Run integration manifests against third-party APIs")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .global(true)
                .action(ArgAction::Set)
                .help("Directory holding integrations/, actors/ and the retry queue"),
        )
        .subcommand(
            Command::new("validate")
                .about("Check a manifest file and print a summary")
                .arg(Arg::new("manifest").required(true).help("Path to a JSON or YAML manifest")),
        )
        .subcommand(
            Command::new("execute")
                .about("Run the execute steps of an integration")
                .arg(integration())
                .arg(actor(false))
                .arg(
                    Arg::new("param")
                        .long("param")
                        .short('p')
                        .action(ArgAction::Append)
                        .value_parser(parse_param)
                        .help("key=value run parameter; JSON values are decoded"),
                ),
        )
        .subcommand(
            Command::new("exists")
                .about("Ask the third party whether the actor already has an account")
                .arg(integration())
                .arg(actor(true)),
        )
        .subcommand(
            Command::new("revoke")
                .about("Run the revoke steps for an actor")
                .arg(integration())
                .arg(actor(true)),
        )
        .subcommand(
            Command::new("needs-info")
                .about("Report whether the actor must answer questions before provisioning")
                .arg(integration())
                .arg(actor(true)),
        )
        .subcommand(
            Command::new("authorize-url")
                .about("Print the OAuth consent URL")
                .arg(integration()),
        )
        .subcommand(
            Command::new("authorize")
                .about("Exchange an OAuth authorization code for the first token")
                .arg(integration())
                .arg(Arg::new("code").long("code").action(ArgAction::Set)),
        )
        .subcommand(
            Command::new("retry")
                .about("Run queued retries that are due")
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Run every queued retry regardless of its due time"),
                ),
        )
}

/// Parse `key=value`. Values holding valid JSON are decoded, anything else stays text.
fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Collaborators rooted at the data directory.
struct Workspace {
    config: CliConfig,
    store: FileStore,
    queue: FileRetryQueue,
    notifications: JsonlNotifications,
    messages: OutboxMessages,
}

impl Workspace {
    fn open(config: CliConfig) -> Self {
        let root = config.data_dir.clone();
        Self {
            store: FileStore::new(&root),
            queue: FileRetryQueue::new(root.join("retries.json")),
            notifications: JsonlNotifications::new(root.join("notifications.jsonl")),
            messages: OutboxMessages::new(root.join("outbox.jsonl")),
            config,
        }
    }

    fn host(&self) -> Host<'_> {
        Host {
            store: &self.store,
            scheduler: &self.queue,
            notifications: &self.notifications,
            messages: &self.messages,
        }
    }
}

fn run(matches: &ArgMatches) -> Result<bool> {
    let (name, sub) = matches.subcommand().context("expected a subcommand")?;
    if name == "validate" {
        return validate(sub);
    }

    let config = CliConfig::load(sub.get_one::<String>("data-dir").map(String::as_str))?;
    let workspace = Workspace::open(config);
    let settings = &workspace.config.settings;
    let transport = ReqwestTransport::new(settings.request_timeout)?;

    if name == "retry" {
        return run_retries(&workspace, &transport, sub.get_flag("all"));
    }

    let integration_id = *sub.get_one::<u64>("integration").context("--integration is required")?;
    let integration = workspace.store.load_integration(integration_id)?;
    let mut actor = sub
        .get_one::<u64>("actor")
        .map(|actor_id| workspace.store.load_actor(*actor_id))
        .transpose()?;
    let mut runner = IntegrationRunner::new(integration, settings, &transport, workspace.host());

    match name {
        "execute" => {
            let params: Map<String, Value> = sub
                .get_many::<(String, Value)>("param")
                .into_iter()
                .flatten()
                .cloned()
                .collect();
            let report = runner.execute(actor.as_mut(), params);
            print_json(&report_json(&report))?;
            Ok(report.outcome.is_success())
        }
        "exists" => {
            let actor = actor.context("--actor is required")?;
            let check = runner.exists(&actor);
            let answer = match check {
                ExistenceCheck::Present => "present",
                ExistenceCheck::Absent => "absent",
                ExistenceCheck::Unknown => "unknown",
            };
            print_json(&json!({"integration_id": integration_id, "actor_id": actor.id, "exists": answer}))?;
            Ok(check != ExistenceCheck::Unknown)
        }
        "revoke" => {
            let actor = actor.context("--actor is required")?;
            runner.revoke(&actor)?;
            print_json(&json!({"integration_id": integration_id, "actor_id": actor.id, "revoked": true}))?;
            Ok(true)
        }
        "needs-info" => {
            let actor = actor.context("--actor is required")?;
            print_json(&json!({"needs_user_info": runner.needs_user_info(&actor)}))?;
            Ok(true)
        }
        "authorize-url" => {
            let url = runner
                .authorize_url()
                .context("integration has no oauth section")?;
            println!("{url}");
            Ok(true)
        }
        "authorize" => {
            runner.complete_authorization(sub.get_one::<String>("code").map(String::as_str))?;
            print_json(&json!({"integration_id": integration_id, "authorized": true}))?;
            Ok(true)
        }
        other => Err(anyhow!("unknown subcommand '{other}'")),
    }
}

fn validate(sub: &ArgMatches) -> Result<bool> {
    let path = sub.get_one::<String>("manifest").context("manifest path is required")?;
    let manifest = parse_manifest_file(path)?;
    print_json(&json!({
        "valid": true,
        "execute": manifest.execute.len(),
        "revoke": manifest.revoke.len(),
        "exists": manifest.exists.is_some(),
        "oauth": manifest.has_oauth(),
        "post_execute_notification": manifest.post_execute_notification.len(),
    }))?;
    Ok(true)
}

fn run_retries(workspace: &Workspace, transport: &ReqwestTransport, all: bool) -> Result<bool> {
    let now = if all { chrono::DateTime::<Utc>::MAX_UTC } else { Utc::now() };
    let due = workspace.queue.take_due(now)?;
    info!(count = due.len(), "running due retries");

    let mut all_succeeded = true;
    let mut results = Vec::with_capacity(due.len());
    for entry in due {
        match retry_run(&entry.job, &workspace.config.settings, transport, workspace.host()) {
            Ok(report) => {
                all_succeeded &= report.outcome.is_success();
                results.push(json!({"name": entry.name, "report": report_json(&report)}));
            }
            Err(error) => {
                warn!(job = %entry.name, error = %format!("{error:#}"), "retry could not run");
                all_succeeded = false;
                results.push(json!({"name": entry.name, "error": format!("{error:#}")}));
            }
        }
    }
    print_json(&Value::Array(results))?;
    Ok(all_succeeded)
}

fn report_json(report: &ExecutionReport) -> Value {
    let outcome = match &report.outcome {
        ExecutionOutcome::Succeeded { response } => json!({
            "status": "succeeded",
            "http_status": response.as_ref().map(|response| response.status),
        }),
        ExecutionOutcome::Failed { reason } => json!({"status": "failed", "reason": reason}),
        ExecutionOutcome::Blocked { reason } => json!({"status": "blocked", "reason": reason}),
        ExecutionOutcome::RenewalFailed => json!({"status": "renewal_failed"}),
    };
    json!({
        "integration_id": report.state.integration_id,
        "actor_id": report.state.actor_id,
        "outcome": outcome,
        "responses": redact_json(&Value::Array(report.responses().to_vec())),
        "telemetry": report.state.telemetry(),
    })
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_decode_json_values() {
        assert_eq!(parse_param("count=3"), Ok(("count".into(), json!(3))));
        assert_eq!(parse_param("team=ops"), Ok(("team".into(), json!("ops"))));
        assert_eq!(parse_param("note=a=b"), Ok(("note".into(), json!("a=b"))));
        assert!(parse_param("=x").is_err());
        assert!(parse_param("novalue").is_err());
    }

    #[test]
    fn execute_accepts_repeated_params() {
        let matches = build_cli()
            .try_get_matches_from(["provisio", "execute", "-i", "5", "--param", "a=1", "-p", "b=two"])
            .expect("parse");
        let (_, sub) = matches.subcommand().expect("subcommand");
        let params: Vec<_> = sub
            .get_many::<(String, Value)>("param")
            .expect("params")
            .cloned()
            .collect();
        assert_eq!(params, vec![("a".into(), json!(1)), ("b".into(), json!("two"))]);
        assert_eq!(sub.get_one::<u64>("integration"), Some(&5));
    }

    #[test]
    fn probes_require_an_actor() {
        assert!(
            build_cli()
                .try_get_matches_from(["provisio", "exists", "-i", "5"])
                .is_err()
        );
        assert!(
            build_cli()
                .try_get_matches_from(["provisio", "revoke", "-i", "5", "-a", "9", "--data-dir", "/tmp/p"])
                .is_ok()
        );
    }

    #[test]
    fn command_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn validate_summarizes_a_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("manifest.yaml");
        std::fs::write(&path, "execute:\n  - url: https://api.example/users\n").expect("write");
        let matches = build_cli()
            .try_get_matches_from(["provisio", "validate", path.to_str().expect("utf-8 path")])
            .expect("parse");
        assert!(run(&matches).expect("validate"));
    }
}
