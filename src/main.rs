use std::{env, num::ParseIntError, path::PathBuf, sync::Arc};

use colored::Colorize;
use jambox_collab::Collab;
use jambox_core::{Config, ConfigError, Extractor};
use jambox_impls::{SocketExtractor, YtDlpExtractor};
use jambox_server::{run_server, DEFAULT_PORT};
use log::{error, info};
use thiserror::Error;
use tokio::runtime;

mod logging;

#[derive(Debug, Error)]
enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("JAMBOX_SERVER_PORT must be a port number: {0}")]
    Port(#[from] ParseIntError),

    #[error("Could not build the async runtime: {0}")]
    Runtime(std::io::Error),

    #[error("The server stopped unexpectedly: {0}")]
    Server(std::io::Error),
}

impl StartupError {
    fn hint(&self) -> String {
        match self {
            StartupError::Config(_) => {
                "Check the environment variables jambox reads its settings from, and make sure each one holds a number.".to_string()
            }
            StartupError::Port(_) => "Set JAMBOX_SERVER_PORT to a value between 1 and 65535, or unset it to use the default.".to_string(),
            StartupError::Runtime(_) => "This error is fatal, and should not happen.".to_string(),
            StartupError::Server(_) => {
                "Make sure no other process is listening on the same port, then try again.".to_string()
            }
        }
    }
}

fn extractor() -> Arc<dyn Extractor> {
    match env::var_os("YTDLPY_SOCKET_PATH") {
        Some(path) if !path.is_empty() => {
            let path = PathBuf::from(path);
            info!("Using extraction service at {}", path.display());
            Arc::new(SocketExtractor::new(path))
        }
        _ => {
            info!("Using yt-dlp for extraction");
            Arc::new(YtDlpExtractor::new())
        }
    }
}

fn port() -> Result<u16, StartupError> {
    match env::var("JAMBOX_SERVER_PORT") {
        Ok(value) if !value.is_empty() => Ok(value.parse::<u16>()?),
        _ => Ok(DEFAULT_PORT),
    }
}

fn run() -> Result<(), StartupError> {
    let config = Config::from_env()?;
    let port = port()?;

    info!("Building async runtime...");
    let runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("jambox-async")
        .build()
        .map_err(StartupError::Runtime)?;

    runtime.block_on(async move {
        let collab = Arc::new(Collab::new(config, extractor()));
        info!("Initialized successfully.");

        let result = run_server(collab.clone(), port).await;
        collab.shutdown().await;

        result.map_err(StartupError::Server)
    })
}

fn main() {
    logging::init_logger();

    if let Err(error) = run() {
        error!(
            "{} Read the error below to troubleshoot the issue.",
            "jambox failed to start!".bold().red()
        );
        error!("{}", error);
        error!(
            "{}",
            format!("Hint: {}", error.hint()).bright_black().italic()
        );
    }
}
