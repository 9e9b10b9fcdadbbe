//! ssup - state-server engine upgrade coordinator.
//!
//! Upgrades the database engine of a replica set in a fixed order:
//! - Notify every member's agent of the pending upgrade
//! - Quiesce all secondaries
//! - Upgrade the primary
//! - Rehydrate secondaries from the upgraded primary
//! - Verify the cluster

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use dialoguer::{Confirm, theme::ColorfulTheme};
use tracing::{debug, error, warn};

use ssup::config::{Args, AuthoritySource, Config, TransportKind, VERSION};
use ssup::output::{
    ConsoleObserver, ConsoleSink, ReportDocument, create_spinner, print_plan, print_session,
    save_report,
};
use ssup::remote::{LocalTransport, LogSink, OutputSink, RemoteTransport, SshTransport};
use ssup::topology::authority::{CommandAuthority, InventoryAuthority};
use ssup::topology::{Discoverer, MembershipAuthority};
use ssup::upgrade::{Orchestrator, create_upgrade_plan};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    if let Err(e) = init_tracing(&args.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    debug!("Starting ssup {}", VERSION);

    match run(&config).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing(log_level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {}", e))?;

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}

/// Main application logic. Returns whether the session succeeded.
async fn run(config: &Config) -> Result<bool> {
    let authority = build_authority(&config.authority)?;
    let transport = build_transport(&config.transport);

    println!(
        "Discovering topology via {} for engine {}...",
        authority.name().bold(),
        config.target
    );
    let discoverer = Discoverer::new(Arc::clone(&authority));
    let plan = create_upgrade_plan(&discoverer, &config.target, &config.session).await?;
    print_plan(&plan, &config.session);

    if config.dry_run {
        println!(
            "{}",
            "[DRY RUN] Upgrade plan generated. No commands were run.".yellow()
        );
        return Ok(true);
    }

    if config.is_interactive() {
        println!(
            "{}",
            "This will stop every secondary and upgrade the primary in place. The primary upgrade cannot be undone."
                .yellow()
                .bold()
        );
        let proceed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Upgrade {} members via {}?",
                plan.topology.len(),
                transport.name()
            ))
            .default(false)
            .interact()?;
        if !proceed {
            anyhow::bail!("Upgrade cancelled by user");
        }
    }

    let spinner = create_spinner();
    let sink: Arc<dyn OutputSink> = if config.quiet_output {
        Arc::new(LogSink)
    } else {
        Arc::new(ConsoleSink::new(spinner.clone()))
    };

    let orchestrator = Orchestrator::new(authority, transport, sink, config.session.clone())?
        .with_observer(Arc::new(ConsoleObserver::new(spinner.clone())));

    let token = orchestrator.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling upgrade session");
            token.cancel();
        }
    });

    let session = orchestrator.run(&config.target).await;
    interrupt.abort();
    spinner.finish_and_clear();

    print_session(&session);

    if let Some(path) = &config.report {
        match save_report(&ReportDocument::from_session(&session), path) {
            Ok(saved) => println!("Report saved: {}", saved.display()),
            Err(e) => warn!("Failed to save report: {:#}", e),
        }
    }

    Ok(session.is_success())
}

fn build_authority(source: &AuthoritySource) -> Result<Arc<dyn MembershipAuthority>> {
    let authority: Arc<dyn MembershipAuthority> = match source {
        AuthoritySource::Inventory(path) => Arc::new(InventoryAuthority::new(path.clone())),
        AuthoritySource::Command(command_line) => {
            Arc::new(CommandAuthority::from_command_line(command_line)?)
        }
    };
    Ok(authority)
}

fn build_transport(kind: &TransportKind) -> Arc<dyn RemoteTransport> {
    match kind {
        TransportKind::Local => Arc::new(LocalTransport),
        TransportKind::Ssh {
            user,
            options,
            connect_timeout,
        } => Arc::new(
            SshTransport::new(user.clone(), options.clone())
                .with_connect_timeout(*connect_timeout),
        ),
    }
}
