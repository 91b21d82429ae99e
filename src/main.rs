use std::fs;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::EnvFilter;

use rule_engine::cache::{Cache, CacheBackend, InProcessCache, NullCache, RemoteCache};
use rule_engine::evaluator::GrlEvaluator;
use rule_engine::lowering::{lower_all, RuleDefinition};
use rule_engine::model::{ResultMap, Rule};
use rule_engine::parser::{Dialect, ExpressionParser};
use rule_engine::store::InMemoryRuleStore;
use rule_engine::{Engine, EngineConfig, ResolvedConfig};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(message) => {
            error!(error = %message, "invalid configuration");
            eprintln!("error: {message}");
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        Command::Run { business_code, input, rules } => run(&config, &business_code, &input, rules.as_deref()).await,
        Command::Lower { rule, dialect } => lower(&rule, &dialect),
    };

    match result {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(message) => {
            error!(error = %message, "command failed");
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

/// Loads and resolves the engine config (§6), defaulting to an all-env-driven configuration
/// when no `--config` file is given; a missing file is not itself an error, but an invalid
/// resolved config is.
fn load_config(config_path: Option<&std::path::Path>) -> Result<ResolvedConfig, String> {
    let mut config = match config_path {
        Some(path) => EngineConfig::load_from_file(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    config.apply_env_overrides();
    config.resolve().map_err(|e| e.to_string())
}

/// Builds the configured cache backend (§4.1, §6 "cacheBackend") for the rule cache.
fn build_cache(config: &ResolvedConfig) -> Arc<dyn Cache> {
    match config.cache_backend {
        CacheBackend::None => Arc::new(NullCache),
        CacheBackend::InProcess => InProcessCache::new(config.max_cache_size as i64, Duration::from_secs(30)),
        CacheBackend::Remote => Arc::new(RemoteCache::new(
            config.remote_addr.clone().unwrap_or_default(),
            config.remote_namespace.clone().unwrap_or_default(),
            config.remote_secret.clone().unwrap_or_default(),
        )),
    }
}

async fn run(
    config: &ResolvedConfig,
    business_code: &str,
    input_path: &std::path::Path,
    rules_path: Option<&std::path::Path>,
) -> Result<String, String> {
    let store = Arc::new(InMemoryRuleStore::new());
    if let Some(rules_path) = rules_path {
        let bytes = fs::read(rules_path).map_err(|e| format!("reading rules file: {e}"))?;
        let rules: Vec<Rule> = serde_json::from_slice(&bytes).map_err(|e| format!("parsing rules file: {e}"))?;
        let mut by_code: std::collections::HashMap<String, Vec<Rule>> = std::collections::HashMap::new();
        for r in rules {
            by_code.entry(r.business_code.clone()).or_default().push(r);
        }
        for (code, rules) in by_code {
            store.put_rules(&code, rules);
        }
    }

    let engine = Engine::new(
        store,
        build_cache(config),
        config.cache_ttl,
        Arc::new(GrlEvaluator),
        config.cache_ttl,
    );

    let payload_bytes = fs::read(input_path).map_err(|e| format!("reading input file: {e}"))?;
    let payload: serde_json::Value =
        serde_json::from_slice(&payload_bytes).map_err(|e| format!("parsing input file: {e}"))?;

    let result: ResultMap = engine
        .exec(CancellationToken::new(), business_code, &payload)
        .await
        .map_err(|e| e.to_string())?;

    serde_json::to_string_pretty(&result).map_err(|e| format!("serialising result: {e}"))
}

fn lower(rule_path: &std::path::Path, dialect: &str) -> Result<String, String> {
    let bytes = fs::read(rule_path).map_err(|e| format!("reading rule file: {e}"))?;
    let def: RuleDefinition = serde_json::from_slice(&bytes).map_err(|e| format!("parsing rule file: {e}"))?;
    let dialect: Dialect = dialect.parse().map_err(|e: rule_engine::DialectError| e.to_string())?;
    let parser = ExpressionParser::new(dialect);
    lower_all(&[def], &parser).map_err(|errs| {
        errs.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
    })
}
