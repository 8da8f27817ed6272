use std::error::Error;

use tokio::io::BufReader;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use txsink_core::config::Settings;

mod cmdline;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let matches = cmdline::root_cli().get_matches();
    let mut settings = match matches.get_one::<String>(cmdline::CONFIG_ARG) {
        Some(path) => Settings::load_file(path).await?,
        None => Settings::load()?,
    };
    if let Some(state_path) = matches.get_one::<String>(cmdline::STATE_PATH_ARG) {
        settings.state_path = state_path.into();
    }
    info!(
        topic = %settings.sink.topic,
        semantics = %settings.sink.semantics,
        state_path = %settings.state_path.display(),
        "Starting transactional sink"
    );

    let cancel = CancellationToken::new();
    let shutdown_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let input = BufReader::new(tokio::io::stdin());
    let result = txsink_core::run(settings, input, cancel).await;
    shutdown_handle.abort();
    result.map_err(|e| format!("Error running transactional sink: {e}"))?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("Received Ctrl+C signal");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
        info!("Received terminate signal");
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
