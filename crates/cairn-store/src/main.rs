//! The cairn-store daemon.
//!
//! Serves clients on a unix socket until SIGTERM (clean exit) or a fatal
//! error (non-zero exit). All state is in-process; the arena's backing
//! files are anonymous temporaries, so nothing survives the process.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, prelude::*};

use cairn_store::{FatalError, Server};

#[derive(Parser, Debug)]
#[command(name = "cairn-store")]
#[command(about = "Local shared-memory object store daemon")]
struct Args {
    /// Socket path for incoming client connections.
    #[arg(short = 's', value_name = "PATH")]
    socket: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to build runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(serve(&args.socket)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn serve(socket: &Path) -> Result<(), FatalError> {
    let server = Server::bind(socket)?;
    info!(socket = %socket.display(), "listening");

    let mut sigterm = signal(SignalKind::terminate()).map_err(FatalError::Signal)?;

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("SIGTERM received, exiting");
                    Ok(())
                }
                result = server.run() => result,
            }
        })
        .await
}
