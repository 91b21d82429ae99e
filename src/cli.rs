//! CLI surface (§6 "Ambient additions"): `run` executes a business code against a JSON payload,
//! `lower` prints the canonical source for a surface rule definition, for authoring/debugging.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Business-rule execution engine")]
pub struct Args {
    /// Path to a JSON config file (see `EngineConfig`).
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[clap(short, long, default_value = "info")]
    pub log_level: String,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute the rules for a business code against a JSON payload.
    Run {
        /// Business code to look up in the configured rule store.
        business_code: String,
        /// Path to a JSON file containing the input payload.
        input: PathBuf,
        /// Path to a JSON array of rule records to seed the reference in-memory store with.
        #[clap(short, long)]
        rules: Option<PathBuf>,
    },
    /// Lower a surface rule-definition JSON file into canonical rule source.
    Lower {
        /// Path to a JSON file containing a surface rule definition.
        rule: PathBuf,
        /// Expression dialect the definition's expressions are written in.
        #[clap(short, long, default_value = "sql")]
        dialect: String,
    },
}
