pub mod config;
pub mod consts;
pub mod log;

#[cfg(unix)]
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::signal;

use net::error::Code;
use net::net::Net;
use net::trigger::Trigger;

// `threads` (spec §4.1) sizes the worker pool every strand ultimately runs
// on, so the runtime is built by hand here rather than via
// `#[tokio::main]`, whose flavor/worker-count are fixed at compile time.
fn main() -> anyhow::Result<()> {
    log::setup_logging(consts::DEFAULT_LOG_LEVEL);
    tracing::info!(version = consts::VERSION, "starting p2p-node");

    let settings = config::load_default()?;
    let threads = settings.threads.max(1);
    tracing::info!(threads, "configuration loaded");

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .enable_all()
        .build()?
        .block_on(run(settings))
}

async fn run(settings: net::settings::Settings) -> anyhow::Result<()> {
    let net = Net::new(settings, Some(std::path::PathBuf::from("hosts.txt")));
    net.start().await;

    let stop = Trigger::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            let ctrl_c = signal::ctrl_c();
            #[cfg(unix)]
            let mut terminate =
                unix_signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            #[cfg(unix)]
            tokio::select! {
                _ = ctrl_c => {
                    tracing::info!("received Ctrl-C, shutting down");
                }
                _ = terminate.recv() => {
                    tracing::info!("received SIGTERM, shutting down");
                }
            }
            #[cfg(not(unix))]
            {
                ctrl_c.await.expect("failed to listen for Ctrl-C");
                tracing::info!("received Ctrl-C, shutting down");
            }
            stop.trigger();
        });
    }

    stop.wait_async().await;
    net.stop(Code::ServiceStopped).await;
    tracing::info!("shutdown complete");
    Ok(())
}
