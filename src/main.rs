// src/main.rs
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use pipeline_cache::{
    cache::{derive_key, CacheHandle, CallArgs},
    config::load_config,
    utils::{parse_level, setup_logging},
};
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "pipeline-cache", about = "Inspect and maintain the pipeline result cache")]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect with the environment settings and report availability
    Ping,
    /// Print the cache key a producer call would use
    Key {
        producer: String,
        /// Positional argument, parsed as JSON when possible
        #[arg(long = "arg")]
        args: Vec<String>,
        /// Named argument as name=value
        #[arg(long = "kwarg")]
        kwargs: Vec<String>,
    },
    /// Print the cached value stored under a key
    Get { key: String },
    /// Delete one key
    Del { key: String },
    /// Delete every key matching a glob pattern
    Invalidate { pattern: String },
    /// Delete every memoized entry of a producer
    Purge { producer: String },
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn build_args(args: &[String], kwargs: &[String]) -> Result<CallArgs> {
    let mut call_args = CallArgs::new();
    for raw in args {
        call_args = call_args.with_raw_arg(parse_value(raw));
    }
    for pair in kwargs {
        let (name, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("--kwarg expects name=value, got '{}'", pair))?;
        call_args = call_args.with_raw_kwarg(name.trim(), parse_value(raw));
    }
    Ok(call_args)
}

fn connect() -> Result<CacheHandle> {
    let settings = load_config().context("Failed to load cache configuration")?;
    Ok(CacheHandle::connect(&settings))
}

fn run(command: Command) -> Result<()> {
    if let Command::Key { producer, args, kwargs } = &command {
        println!("{}", derive_key(producer, &build_args(args, kwargs)?));
        return Ok(());
    }

    let cache = connect()?;
    if !cache.is_available() {
        warn!("Cache backend unavailable; nothing to do.");
        println!("unavailable");
        return Ok(());
    }

    match command {
        Command::Ping => println!("available"),
        Command::Get { key } => match cache.get_json::<Value>(&key) {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => println!("(miss)"),
        },
        Command::Del { key } => println!("{}", if cache.delete(&key) { "deleted" } else { "not found" }),
        Command::Invalidate { pattern } => println!("{}", cache.invalidate_pattern(&pattern)),
        Command::Purge { producer } => println!("{}", cache.invalidate_producer(&producer)),
        Command::Key { .. } => {}
    }

    cache.close();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(parse_level(&cli.log_level)).map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
    info!("pipeline-cache {}", env!("CARGO_PKG_VERSION"));
    run(cli.command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cli_values_parse_as_json_or_string() {
        assert_eq!(parse_value("42"), Value::from(42));
        assert_eq!(parse_value("HPG"), Value::String("HPG".to_string()));
        assert_eq!(parse_value("\"HPG\""), Value::String("HPG".to_string()));
    }

    #[test]
    fn cli_keys_match_library_keys() {
        let from_cli = build_args(&["7".to_string()], &["ticker=HPG".to_string()]).unwrap();
        let from_code = CallArgs::new().arg(&7).kwarg("ticker", "HPG");
        assert_eq!(derive_key("fetch", &from_cli), derive_key("fetch", &from_code));
    }

    #[test]
    fn malformed_kwarg_is_rejected() {
        assert!(build_args(&[], &["ticker".to_string()]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
