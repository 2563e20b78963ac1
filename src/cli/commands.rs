use crate::{
    prefix_suffix_worker, Admission, CompletionTracker, Dispatcher, DispatcherConfig, Outcome,
    Request,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::info;

/// Command-line interface for brrtpipe
#[derive(Parser, Debug)]
#[command(name = "brrtpipe")]
#[command(about = "Bounded multi-stage pipeline dispatcher", long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the prefix/suffix reference pipeline and print every outcome
    ///
    /// Each worker uppercases the input, appends the suffix and then prepends
    /// the prefix. `{id}` in the prefix is replaced with the worker id.
    Demo {
        /// Number of workers to launch
        #[arg(short, long, default_value_t = 3)]
        workers: usize,

        /// Number of requests to submit
        #[arg(short, long, default_value_t = 10)]
        requests: usize,

        /// Queue capacity (overrides the configuration)
        #[arg(short, long)]
        capacity: Option<usize>,

        /// Prefix added by the last stage
        #[arg(long, default_value = "Worker id: {id} -> ")]
        prefix: String,

        /// Suffix added by the second stage
        #[arg(long, default_value = " World")]
        suffix: String,

        /// Admission timeout in milliseconds (overrides the configuration)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Configuration file (YAML, TOML or JSON)
        #[arg(long, env = "BRRTP_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration as YAML
    ///
    /// Defaults, then the optional file, then `BRRTP_*` environment variables.
    Config {
        /// Configuration file (YAML, TOML or JSON)
        #[arg(long, env = "BRRTP_CONFIG")]
        config: Option<PathBuf>,
    },
}

/// Execute a parsed command line
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Demo {
            workers,
            requests,
            capacity,
            prefix,
            suffix,
            timeout_ms,
            config,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(capacity) = capacity {
                config.queue_capacity = capacity;
            }
            if let Some(timeout_ms) = timeout_ms {
                config.admission_timeout_ms = timeout_ms;
            }
            run_demo(config, workers, requests, &prefix, &suffix)
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            let yaml = serde_yaml::to_string(&config).context("Failed to render configuration")?;
            print!("{yaml}");
            Ok(())
        }
    }
}

/// Defaults or the given file, with `BRRTP_*` environment overrides on top
pub fn load_config(path: Option<&Path>) -> Result<DispatcherConfig> {
    let config = match path {
        Some(path) => DispatcherConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => DispatcherConfig::default(),
    };
    let config = config.apply_env();
    config.validate()?;
    Ok(config)
}

fn run_demo(
    config: DispatcherConfig,
    workers: usize,
    requests: usize,
    prefix: &str,
    suffix: &str,
) -> Result<()> {
    if workers == 0 {
        anyhow::bail!("demo needs at least one worker");
    }

    let dispatcher = Dispatcher::with_config(config);
    let mut handles = Vec::with_capacity(workers);
    for id in 1..=workers {
        let prefix = prefix.replace("{id}", &id.to_string());
        let worker = prefix_suffix_worker::<String>(id, &prefix, suffix)?;
        handles.push(dispatcher.launch_worker(&worker)?);
    }

    let tracker = CompletionTracker::new();
    let (tx, rx) = mpsc::channel::<String>();
    let mut rejected = 0_usize;

    for n in 0..requests {
        let tx = tx.clone();
        let request = Request::tracked(format!("hello {n}"), &tracker, move |outcome| {
            let line = match outcome {
                Outcome::Completed(text) => text,
                Outcome::Failed(failure) => format!("failed: {failure}"),
            };
            tx.send(line).ok();
        });
        match dispatcher.make_request(request) {
            Admission::Admitted => {}
            other => {
                rejected += 1;
                println!("request {n} not admitted: {other}");
            }
        }
    }
    drop(tx);

    // Rejected requests release their tracker slot when dropped.
    tracker.wait();

    dispatcher.stop();
    for handle in handles {
        handle.join()?;
    }

    for line in rx.try_iter() {
        println!("{line}");
    }

    let metrics = dispatcher.metrics();
    info!(rejected = rejected, completed = metrics.completed, "Demo finished");
    println!(
        "{}",
        serde_json::to_string_pretty(&metrics).context("Failed to render metrics")?
    );
    Ok(())
}
