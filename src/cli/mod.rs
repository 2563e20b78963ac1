//! # CLI Module
//!
//! Command-line front end for the `brrtpipe` binary.
//!
//! ## Commands
//!
//! ### `demo`
//!
//! Run the prefix/suffix reference pipeline and print each outcome followed
//! by a JSON metrics snapshot:
//!
//! ```bash
//! brrtpipe demo --workers 3 --requests 10
//! ```
//!
//! Options:
//! - `--workers <N>` - Workers to launch (default: 3)
//! - `--requests <N>` - Requests to submit (default: 10)
//! - `--capacity <N>` - Queue capacity, `0` for hand-off
//! - `--prefix <TEXT>` - Prefix; `{id}` expands to the worker id (default: `Worker id: {id} -> `)
//! - `--suffix <TEXT>` - Suffix (default: ` World`)
//! - `--timeout-ms <MS>` - Admission timeout
//! - `--config <FILE>` - YAML, TOML or JSON configuration (also `BRRTP_CONFIG`)
//!
//! ### `config`
//!
//! Print the effective configuration as YAML:
//!
//! ```bash
//! BRRTP_BACKPRESSURE_MODE=shed brrtpipe config --config pipeline.toml
//! ```
//!
//! ## Usage from Code
//!
//! ```rust,no_run
//! use brrtpipe::cli::{run_cli, Cli};
//! use clap::Parser;
//!
//! run_cli(Cli::parse()).unwrap();
//! ```

mod commands;


pub use commands::{load_config, run_cli, Cli, Commands};
