pub mod calibration;
pub mod device;
pub mod error;
pub mod motion;
pub mod settings;
pub mod utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use calibration::commands::{ConsoleCommand, OperatorConsole, HELP};
use calibration::CalibrationSession;
use device::{Connector, SimulatedConnector, SimulatedDevice, TcpConnector};
use settings::SettingsStore;

const SETTINGS_ENV: &str = "LASERMOUNT_SETTINGS";
const SIMULATE_ENV: &str = "LASERMOUNT_SIMULATE";
const DEFAULT_SETTINGS_FILE: &str = "lasermount-settings.json";

fn settings_path() -> PathBuf {
    std::env::var_os(SETTINGS_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE))
}

fn simulate_requested() -> bool {
    std::env::var(SIMULATE_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("lasermount starting up...");

    if let Err(err) = run_console() {
        log::error!("lasermount failed: {err:#}");
        std::process::exit(1);
    }
}

fn run_console() -> anyhow::Result<()> {
    let store = Arc::new(SettingsStore::new(settings_path())?);
    let settings = store.settings();
    log::info!("settings loaded from {}", store.path().display());

    let connector: Arc<dyn Connector> = if simulate_requested() {
        log::info!("using simulated controller");
        Arc::new(SimulatedConnector::new(SimulatedDevice::default()))
    } else {
        Arc::new(TcpConnector::new(settings.connect_poll_interval()))
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async move {
        let session = CalibrationSession::new(connector, &settings);
        let mut console = OperatorConsole::new(session, store);
        let result = console_loop(&mut console).await;
        console.session().reset().await;
        result
    })
}

async fn console_loop(console: &mut OperatorConsole) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{HELP}\n").as_bytes()).await?;

    loop {
        let step = console.session().get_state().await.step;
        stdout.write_all(format!("[{step}] > ").as_bytes()).await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read operator input")?,
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted, shutting down");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(err) => {
                stdout.write_all(format!("{err}\n").as_bytes()).await?;
                continue;
            }
        };
        let quit = command == ConsoleCommand::Quit;

        let reply = match console.execute(command).await {
            Ok(text) => text,
            Err(err) => format!("error: {err}"),
        };
        stdout.write_all(format!("{reply}\n").as_bytes()).await?;

        if quit {
            return Ok(());
        }
    }
}
