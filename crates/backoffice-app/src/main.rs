//! Back-office application binary - composition root.
//!
//! Ties the vault services into one executable:
//! 1. Load `.env`, configuration from TOML, then env and CLI overrides
//! 2. Initialise tracing
//! 3. Build message clients (dry-run, wrapped in retry) and the handler registry
//! 4. Run the selected agent until Ctrl-C, or run a one-shot command

mod cli;

use std::sync::Arc;

use backoffice_action::approval::ApprovalManager;
use backoffice_action::claim::ClaimManager;
use backoffice_action::cloud::CloudAgent;
use backoffice_action::dispatcher::ApprovalDispatcher;
use backoffice_action::handler::{ActionRegistry, DryRunClient, MessageClient, MessageSendHandler};
use backoffice_action::orchestrator::Orchestrator;
use backoffice_action::rate_limit::RateLimiter;
use backoffice_action::reasoner::{CommandReasoner, Reasoner};
use backoffice_action::retry::{RetryPolicy, RetryingClient};
use backoffice_core::audit::AuditLogger;
use backoffice_core::clock::{Clock, SystemClock};
use backoffice_core::config::BackofficeConfig;
use backoffice_core::vault::Vault;
use clap::Parser;

use crate::cli::{CliArgs, Command};

/// Message-sending actions and the channel each one goes through.
const MESSAGE_ACTIONS: [(&str, &str); 4] = [
    ("email_send", "email"),
    ("email_reply", "email"),
    ("whatsapp_reply", "whatsapp"),
    ("social_post", "social"),
];

fn channel_for(action: &str) -> &str {
    MESSAGE_ACTIONS
        .iter()
        .find(|(a, _)| *a == action)
        .map(|(_, channel)| *channel)
        .unwrap_or(action)
}

/// Client for `channel`, wrapped in the configured retry policy.
fn message_client(config: &BackofficeConfig, channel: &str) -> Arc<dyn MessageClient> {
    if !config.general.dry_run {
        tracing::warn!(channel, "No provider client configured; sends are logged only");
    }
    Arc::new(RetryingClient::new(
        Arc::new(DryRunClient::new(channel)),
        RetryPolicy::from(&config.agent.retry),
    ))
}

fn build_registry(config: &BackofficeConfig) -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    for (action, channel) in MESSAGE_ACTIONS {
        registry.register(Arc::new(MessageSendHandler::new(
            action,
            message_client(config, channel),
        )));
    }
    registry
}

fn build_reasoner(config: &BackofficeConfig) -> Result<Arc<dyn Reasoner>, Box<dyn std::error::Error>> {
    let reasoner = CommandReasoner::from_config(&config.agent).map_err(|e| {
        tracing::error!("Set agent.reasoning_command in the config file to run an agent");
        e
    })?;
    Ok(Arc::new(reasoner))
}

/// Wait for Ctrl-C, then call `stop`. Returns early if `handle` finishes first.
async fn run_until_ctrl_c<E>(
    mut handle: tokio::task::JoinHandle<Result<(), E>>,
    stop: impl FnOnce(),
) -> Result<(), Box<dyn std::error::Error>>
where
    E: std::error::Error + 'static,
{
    tokio::select! {
        res = &mut handle => {
            res??;
            return Ok(());
        }
        sig = tokio::signal::ctrl_c() => sig?,
    }
    tracing::info!("Ctrl-C received, shutting down");
    stop();
    handle.await??;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = BackofficeConfig::load_or_default(&config_file);
    config.apply_env_overrides();
    if let Some(vault) = &args.vault {
        config.general.vault_path = vault.display().to_string();
    }
    if args.dry_run {
        config.general.dry_run = true;
    }

    // Tracing.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting backoffice v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        path = %config_file.display(),
        vault = %config.vault_root().display(),
        dry_run = config.general.dry_run,
        "Configuration resolved"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let vault = Vault::new(config.vault_root());

    match args.command {
        Command::Orchestrator => {
            let reasoner = build_reasoner(&config)?;
            let mut orchestrator =
                Orchestrator::new(config.clone(), clock, build_registry(&config), reasoner);
            for action in &config.dispatch.polled_actions {
                orchestrator = orchestrator
                    .with_polled_client(action, message_client(&config, channel_for(action)));
            }
            let orchestrator = Arc::new(orchestrator);
            let runner = Arc::clone(&orchestrator);
            let handle = tokio::spawn(async move { runner.run().await });
            run_until_ctrl_c(handle, || orchestrator.shutdown()).await?;
        }
        Command::CloudAgent => {
            let reasoner = build_reasoner(&config)?;
            let agent = Arc::new(CloudAgent::new(config.clone(), clock, reasoner));
            let runner = Arc::clone(&agent);
            let handle = tokio::spawn(async move { runner.run().await });
            run_until_ctrl_c(handle, || agent.shutdown()).await?;
        }
        Command::Dispatcher { action, once } => {
            vault.ensure_layout()?;
            let audit = Arc::new(AuditLogger::new(&vault, clock));
            let dispatcher = Arc::new(
                ApprovalDispatcher::new(
                    vault.clone(),
                    action.as_str(),
                    message_client(&config, channel_for(&action)),
                    audit,
                )
                .with_rate_limiter(Arc::new(RateLimiter::from_config(&config.rate_limits))),
            );
            if once {
                let sent = dispatcher.process_pending().await;
                println!("Sent {} {} request(s)", sent.len(), action);
                for name in sent {
                    println!("  {}", name);
                }
            } else {
                let interval = std::time::Duration::from_secs(config.dispatch.poll_interval_secs);
                let runner = Arc::clone(&dispatcher);
                let handle = tokio::spawn(async move {
                    runner.run_forever(interval).await;
                    Ok::<(), std::io::Error>(())
                });
                run_until_ctrl_c(handle, || dispatcher.shutdown()).await?;
            }
        }
        Command::SweepExpired => {
            vault.ensure_layout()?;
            let audit = Arc::new(AuditLogger::new(&vault, Arc::clone(&clock)));
            let approvals = ApprovalManager::from_config(vault.clone(), audit, &config.approval, clock);
            let expired = approvals.check_expired()?;
            println!("Expired {} approval request(s)", expired.len());
            for path in expired {
                println!("  {}", path.display());
            }
        }
        Command::Claims { agent } => {
            let audit = Arc::new(AuditLogger::new(&vault, clock));
            let claims = ClaimManager::for_vault(&vault, audit).list_claims(agent.as_deref());
            if claims.is_empty() {
                println!("No active claims");
            }
            for claim in claims {
                println!("{}\t{}", claim.agent, claim.file);
            }
        }
    }

    Ok(())
}
