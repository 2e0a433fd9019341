use color_eyre::{eyre::eyre, Result};
use servo_console::config::ConsoleConfig;
use servo_console::console::{Console, OperatorIntent};
use servo_console::device::events::{AlertSource, ConsoleEvent};
use servo_console::device::state::DeviceState;
use servo_console::mqtt::config::ConnectionProfile;
use servo_console::mqtt::mqtt_handler::MqttHandler;
use servo_console::mqtt::session::SessionState;
use servo_console::mqtt::transport::event_channel;
use servo_console::operator::{parse_line, OperatorCommand, HELP};
use servo_console::persistence::file_store::default_dir;
use servo_console::persistence::{FileStore, ProfileStore};
use servo_console::runtime::{ConsoleHandle, ConsoleRuntime};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup()?;

    let dir = default_dir();
    let config = ConsoleConfig::load(&dir).await?;
    let store = Arc::new(FileStore::new(&dir));
    let mut profile = load_profile(&store).await;

    let (transport_tx, transport_rx) = event_channel();
    let transport = MqttHandler::new(transport_tx, config.timing.connect_timeout());
    let console = Console::new(transport, &config);

    let events = console.subscribe_events();
    let session_state = console.session_state();
    let device_state = console.device_state();
    tokio::spawn(report_events(events));
    tokio::spawn(report_session(session_state.clone()));

    let (runtime, handle) = ConsoleRuntime::new(console, store, transport_rx);
    let runtime_task = tokio::spawn(runtime.run());

    if profile.auto_connect {
        info!("Auto-connecting to {}", profile.host);
        if let Err(e) = handle.connect(profile.clone()).await {
            warn!("Auto-connect failed: {}", e);
        }
    }

    info!("Ready, type 'help' for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| eyre!("Failed to read stdin: {}", e))?
    {
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };
        if command == OperatorCommand::Quit {
            break;
        }
        run_command(command, &handle, &mut profile, &session_state, &device_state).await;
    }

    drop(handle);
    runtime_task
        .await
        .map_err(|e| eyre!("Console runtime failed: {}", e))?;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn setup_logging_env() {
    let directives = std::env::var("RUST_LOG").ok();
    FmtSubscriber::builder()
        .with_env_filter(log_filter(directives.as_deref()))
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}

async fn load_profile(store: &FileStore) -> ConnectionProfile {
    match store.load_profile().await {
        Ok(Some(profile)) => {
            info!("Loaded connection profile for {}", profile.host);
            profile
        }
        Ok(None) => {
            info!("No saved connection profile, using defaults");
            ConnectionProfile::default()
        }
        Err(e) => {
            warn!("Saved connection profile unusable, using defaults: {}", e);
            ConnectionProfile::default()
        }
    }
}

async fn run_command(
    command: OperatorCommand,
    handle: &ConsoleHandle,
    profile: &mut ConnectionProfile,
    session: &watch::Receiver<SessionState>,
    device: &watch::Receiver<DeviceState>,
) {
    let result = match command {
        OperatorCommand::Connect => handle.connect(profile.clone()).await,
        OperatorCommand::Save => {
            handle
                .send(OperatorIntent::SaveProfile(profile.clone()))
                .await
        }
        OperatorCommand::Edit(edit) => {
            edit.apply(profile);
            info!(
                "Profile: {}:{} ({:?})",
                profile.host, profile.port, profile.transport
            );
            Ok(())
        }
        OperatorCommand::Intent(intent) => handle.send(intent).await,
        OperatorCommand::Status => {
            let state = device.borrow().clone();
            info!(
                "Session {:?} | angle {} | mode {:?} | slot {:?} | lockout {} | sensors {:?}",
                *session.borrow(),
                state.servo_angle,
                state.mode,
                state.active_recipe_slot,
                state.emergency_lockout,
                state.last_sensor_sample
            );
            if let Some(draft) = state.last_ai_recipe {
                info!("Accepted draft: angles {:?} delays {:?}", draft.angles, draft.delays);
            }
            Ok(())
        }
        OperatorCommand::Help => {
            println!("{}", HELP);
            Ok(())
        }
        OperatorCommand::Quit => Ok(()),
    };

    if let Err(e) = result {
        warn!("{}", e);
    }
}

async fn report_events(mut events: broadcast::Receiver<ConsoleEvent>) {
    loop {
        match events.recv().await {
            Ok(ConsoleEvent::AlertRaised(alert)) => {
                let at = alert.raised_at.format("%H:%M:%S");
                match alert.source {
                    AlertSource::Emergency => error!("[{}] {}", at, alert.text),
                    AlertSource::Device => warn!("[{}] {}", at, alert.text),
                }
            }
            Ok(ConsoleEvent::LockoutChanged(true)) => error!("Controls locked"),
            Ok(ConsoleEvent::LockoutChanged(false)) => info!("Controls unlocked"),
            Ok(ConsoleEvent::TelemetryUpdated(sample)) => info!(
                "Sensors: gas {:?} flame {:?} temp {:?}",
                sample.gas, sample.flame, sample.temp
            ),
            Ok(ConsoleEvent::AngleUpdated(angle)) => info!("Angle {}", angle),
            Ok(ConsoleEvent::ModeUpdated(mode)) => info!("Mode {:?}", mode),
            Ok(ConsoleEvent::RecipeSlotUpdated(slot)) => info!("Recipe slot {}", slot),
            Ok(ConsoleEvent::AiDraftReady(draft)) => info!(
                "AI draft ready: angles {:?} delays {:?}",
                draft.angles, draft.delays
            ),
            Ok(ConsoleEvent::AiDraftFailed(reason)) => warn!("AI draft rejected: {}", reason),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Skipped {} console events", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn report_session(mut state: watch::Receiver<SessionState>) {
    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        info!("Session {:?}", current);
    }
}
