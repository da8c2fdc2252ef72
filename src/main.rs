use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ratewarden::config::AppConfig;
use ratewarden::{Admission, RateLimiter, RedisStore};

/// Query and manage fixed-window rate limits held in Redis.
#[derive(Debug, Parser)]
#[command(name = "ratewarden", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Redis URL, overriding the configuration
    #[arg(long)]
    redis_url: Option<String>,

    /// Print results and logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Consume one event for an identifier and report the decision
    Allow(Target),
    /// Report the quota left for an identifier without consuming any
    Remaining(Target),
    /// Clear the counter for an identifier
    Reset(Target),
    /// List the configured limiter profiles
    Profiles,
}

#[derive(Debug, Args)]
struct Target {
    /// Name of the limiter profile
    #[arg(short, long)]
    limiter: String,

    /// The subject being limited, e.g. an IP address or account id
    identifier: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    debug!(version = env!("CARGO_PKG_VERSION"), "Starting ratewarden");

    let mut config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(url) = cli.redis_url {
        config.store.url = url;
    }

    let target = match cli.command {
        Command::Profiles => {
            print_profiles(&config, cli.json)?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Allow(ref target) | Command::Remaining(ref target) | Command::Reset(ref target) => {
            target
        }
    };

    let limiter_config = config.limiter(&target.limiter)?;
    let store = RedisStore::connect_with_config(config.store.clone())
        .await
        .with_context(|| format!("failed to connect to {}", config.store.url))?;
    let limiter = RateLimiter::new(Arc::new(store), limiter_config);

    match cli.command {
        Command::Allow(_) => {
            let admission = limiter.check(&target.identifier).await?;
            print_admission(&target.identifier, &admission, cli.json);
            Ok(if admission.allowed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Command::Remaining(_) => {
            let remaining = limiter.remaining(&target.identifier).await?;
            if cli.json {
                println!(
                    "{}",
                    json!({ "identifier": target.identifier, "remaining": remaining })
                );
            } else {
                println!("{} remaining={}", target.identifier, remaining);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Reset(_) => {
            limiter.reset(&target.identifier).await?;
            info!(
                limiter = %target.limiter,
                identifier = %target.identifier,
                "Counter reset"
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Profiles => unreachable!("handled before connecting"),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_admission(identifier: &str, admission: &Admission, json: bool) {
    let reset_after_ms = admission.reset_after.map(|d| d.as_millis() as u64);
    if json {
        println!(
            "{}",
            json!({
                "identifier": identifier,
                "allowed": admission.allowed,
                "remaining": admission.remaining,
                "reset_after_ms": reset_after_ms,
            })
        );
        return;
    }

    let verdict = if admission.allowed { "allowed" } else { "denied" };
    match reset_after_ms {
        Some(ms) => println!(
            "{} {} remaining={} reset_after_ms={}",
            identifier, verdict, admission.remaining, ms
        ),
        None => println!("{} {} remaining={}", identifier, verdict, admission.remaining),
    }
}

fn print_profiles(config: &AppConfig, json: bool) -> anyhow::Result<()> {
    for name in config.limiters.keys() {
        let limiter = config.limiter(name)?;
        let window_ms = limiter.window().as_millis() as u64;
        if json {
            println!(
                "{}",
                json!({
                    "name": name,
                    "capacity": limiter.capacity(),
                    "namespace": limiter.namespace(),
                    "action": limiter.action(),
                    "window_ms": window_ms,
                })
            );
        } else {
            println!(
                "{}: capacity={} namespace={} action={} window_ms={}",
                name,
                limiter.capacity(),
                limiter.namespace(),
                limiter.action(),
                window_ms
            );
        }
    }
    Ok(())
}
