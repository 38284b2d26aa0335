//! bosun -- run admin-authored shell commands from Slack.
//!
//! Wires the pipeline together: one Socket Mode listener feeding a bounded
//! request queue, `num_workers` executor workers, and one writer draining
//! the output queue back into Slack.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bosun_command::{build_matchers, run_worker, CommandRunner, ComposeRunner, ExecRunner, HttpRunner};
use bosun_slack::{run_listener, run_writer, ListenerPolicy, SlackApi};
use bosun_types::{load_config, BridgeError, RunnerKind};

/// Oversized relative to the worker count so transport acks stay prompt
/// during bursts; overflow is shed, not queued.
const REQUEST_QUEUE_CAPACITY: usize = 50;

#[derive(Parser, Debug)]
#[command(name = "bosun", version, about = "Slack chat-ops command bridge")]
struct Cli {
    /// Info-level logging
    #[arg(short, long)]
    verbose: bool,

    /// Error-only logging
    #[arg(short, long)]
    quiet: bool,

    /// Debug logging, including transport internals
    #[arg(long)]
    debug: bool,

    /// Configuration file
    #[arg(long, default_value = "config.toml")]
    config_file: PathBuf,
}

impl Cli {
    fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.quiet {
            "error"
        } else if self.verbose {
            "info"
        } else {
            "warn"
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli).await {
        eprintln!("Fatal: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), BridgeError> {
    let cfg = load_config(&cli.config_file)?;
    let specs = cfg.validate()?;
    info!(
        workers = cfg.num_workers,
        commands = specs.len(),
        config = %cli.config_file.display(),
        "starting bosun"
    );

    // One stateless exec runner and one lazy compose runner are shared by
    // every definition; HTTP runners carry their definition and get one
    // instance each.
    let exec_runner: Arc<dyn CommandRunner> = Arc::new(ExecRunner::new());
    let compose_runner: Arc<dyn CommandRunner> = Arc::new(ComposeRunner::new(None, Vec::new()));
    let matchers = build_matchers(specs, |spec| match spec.runner {
        RunnerKind::Exec => exec_runner.clone(),
        RunnerKind::Compose => compose_runner.clone(),
        RunnerKind::Http => Arc::new(HttpRunner::new(spec.clone())) as Arc<dyn CommandRunner>,
    })?;

    let (request_tx, request_rx) = async_channel::bounded(REQUEST_QUEUE_CAPACITY);
    let (output_tx, output_rx) = tokio::sync::mpsc::channel(cfg.num_workers);

    let api = Arc::new(SlackApi::new(
        cfg.slack_bot_token.clone(),
        cfg.slack_app_token.clone(),
    ));

    for _ in 0..cfg.num_workers {
        tokio::spawn(run_worker(
            request_rx.clone(),
            output_tx.clone(),
            matchers.clone(),
        ));
    }
    drop(output_tx);

    let writer_api = api.clone();
    tokio::spawn(async move { run_writer(&writer_api, output_rx).await });

    let policy = ListenerPolicy::from_config(&cfg);
    run_listener(&api, request_tx, policy).await;
    Ok(())
}
