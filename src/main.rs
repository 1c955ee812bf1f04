//! Tenant Authorizer - Lambda bootstrap
//!
//! Loads configuration, warms the key cache once per process and then serves
//! authorizer invocations until the runtime shuts the process down.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use clap::Parser;
use lambda_runtime::{LambdaEvent, service_fn};
use serde_json::{Value, json};
use tracing::{error, info};

use tenant_authorizer::{
    authorizer::{Authorizer, Invocation},
    cli::{Cli, Command},
    config::Config,
    directory,
    keys::{HttpKeySource, Issuer, KeySource},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let format = cli.log_format.as_deref().unwrap_or(&config.log_format);
    if let Err(e) = setup_tracing(level, Some(format)) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Some(Command::Check { token, method_arn }) => run_check(&config, &token, &method_arn).await,
        Some(Command::Keys { issuer }) => run_keys(&config, &issuer).await,
        Some(Command::Serve) | None => run_server(&config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Build the authorizer and pre-fetch every listed issuer's keys.
async fn bootstrap(config: &Config) -> anyhow::Result<Arc<Authorizer>> {
    let authorizer = Arc::new(Authorizer::from_config(config).context("building authorizer")?);

    let directory = directory::from_config(&config.directory, &config.region)
        .await
        .context("building issuer directory")?;
    authorizer.cache().initialize(directory.as_ref()).await;

    Ok(authorizer)
}

/// Run the Lambda runtime loop
async fn run_server(config: &Config) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        region = %config.region,
        issuer_base_url = %config.resolved_issuer_base_url(),
        deny_mode = ?config.deny_mode,
        "Starting tenant authorizer"
    );

    let authorizer = bootstrap(config).await?;

    lambda_runtime::run_concurrent(service_fn(move |event: LambdaEvent<Value>| {
        let authorizer = Arc::clone(&authorizer);
        async move {
            let invocation = Invocation::from_lambda(&event.context.request_id, event.context.deadline);
            authorizer.handle(&event.payload, &invocation).await
        }
    }))
    .await
    .map_err(|e| anyhow!(e))
    .context("Lambda runtime failed")?;

    info!("Tenant authorizer shutdown complete");
    Ok(())
}

/// Evaluate one token as a TOKEN authorizer event and print the response
async fn run_check(config: &Config, token: &str, method_arn: &str) -> anyhow::Result<()> {
    let authorizer = bootstrap(config).await?;

    let event = json!({
        "type": "TOKEN",
        "authorizationToken": token,
        "methodArn": method_arn,
    });
    let response = authorizer
        .handle(&event, &Invocation::default())
        .await
        .context("authorizer rejected the request")?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Fetch and list one issuer's published keys
async fn run_keys(config: &Config, pool_id: &str) -> anyhow::Result<()> {
    let issuer = Issuer::new(&config.resolved_issuer_base_url(), pool_id)?;
    let source = HttpKeySource::new(config.fetch_timeout)?;
    let set = source
        .fetch(&issuer)
        .await
        .with_context(|| format!("fetching {}", issuer.jwks_url()))?;

    println!("{} ({} keys)", issuer.url(), set.len());
    for key in set.keys() {
        println!(
            "  {:<40} {:<4} {:<6} {}",
            key.kid(),
            key.kty(),
            key.alg().unwrap_or("-"),
            if key.is_usable() { "usable" } else { "ignored" }
        );
    }
    Ok(())
}
