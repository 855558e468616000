//! Echo Bot
//!
//! Logs in, keeps the data channel alive and follows the selected contact
//! into lobbies. A small stdin console drives contact selection and status.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Spawn the `SessionCoordinator` and the event printer
//! 3. Log in over HTTPS and open the data channel
//! 4. Run the console until `quit`, EOF, Ctrl+C or SIGTERM
//! 5. Shut the coordinator down

#![warn(clippy::pedantic)]

use anyhow::{anyhow, Context};
use common::login::HttpsLogin;
use echo_bot::actors::{BotEvent, CoordinatorHandle};
use echo_bot::config::Config;
use echo_bot::console::{render_event, render_roster, render_snapshot, Command, CommandError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Depth of the coordinator's event channel.
const EVENT_CHANNEL_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "echo_bot=debug,common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Echo Bot");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        email = %config.email,
        game_host = %config.game_host,
        data_port = config.data_port,
        lobby_port = config.lobby_port,
        client_version = %config.client_version,
        keepalive_interval_seconds = config.keepalive_interval_seconds,
        follow_contact_id = ?config.follow_contact_id,
        "Configuration loaded successfully"
    );

    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_BUFFER);
    let (coordinator, coordinator_task) =
        CoordinatorHandle::spawn(config.coordinator_config(), events_tx);
    let printer = tokio::spawn(print_events(events_rx));

    let login = HttpsLogin::new(config.login_config()).context("Failed to build login client")?;

    if let Err(e) = coordinator.start(&login).await {
        error!(error = %e, error_kind = e.error_kind(), "Failed to start bot");
        coordinator.shutdown().await;
        drop(coordinator);
        let _ = coordinator_task.await;
        // All event senders are gone now, so the printer drains and exits.
        let _ = printer.await;
        return Err(anyhow!(e).context("Echo Bot could not start"));
    }

    info!("Echo Bot running - type a command or press Ctrl+C to shutdown");

    tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received, initiating graceful shutdown...");
        }
        () = command_loop(&coordinator) => {
            info!("Console closed, initiating graceful shutdown...");
        }
    }

    coordinator.shutdown().await;
    if let Err(e) = coordinator_task.await {
        warn!(error = %e, "Coordinator task ended abnormally");
    }
    printer.abort();

    info!("Echo Bot shutdown complete");
    Ok(())
}

async fn print_events(mut events: mpsc::Receiver<BotEvent>) {
    while let Some(event) = events.recv().await {
        println!("{}", render_event(&event));
    }
}

/// Read commands from stdin until `quit` or EOF.
async fn command_loop(coordinator: &CoordinatorHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Failed to read console input");
                return;
            }
        };

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(CommandError::Empty) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        if command == Command::Quit {
            return;
        }

        if let Err(e) = run_command(coordinator, command).await {
            println!("{e}");
        }
    }
}

async fn run_command(coordinator: &CoordinatorHandle, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Pick(position) => {
            let roster = coordinator.roster().await?;
            let contact = position
                .checked_sub(1)
                .and_then(|index| roster.get(index))
                .cloned()
                .ok_or_else(|| anyhow!("no roster entry {position}"))?;
            println!("following {contact}");
            coordinator.select_contact(contact).await?;
        }
        Command::Select(id) => {
            let roster = coordinator.roster().await?;
            let contact = roster
                .into_iter()
                .find(|c| c.id == id)
                .ok_or_else(|| anyhow!("no contact with id {id}"))?;
            println!("following {contact}");
            coordinator.select_contact(contact).await?;
        }
        Command::Clear => coordinator.clear_contact().await?,
        Command::Status(value) => coordinator.set_status(value).await?,
        Command::Roster => println!("{}", render_roster(&coordinator.roster().await?)),
        Command::State => println!("{}", render_snapshot(&coordinator.snapshot().await?)),
        Command::Quit => {}
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
