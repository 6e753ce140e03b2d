//! Socket controllers runner.
//!
//! Phase order: bind → wait → stop. Shutdown can be driven by OS signals, an external
//! `CancellationToken`, or an arbitrary future. Triggers are armed only after binding,
//! so a shutdown future may already talk to the bound controllers.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use super::host_runtime::SocketRuntime;
use super::options::SocketControllersOptions;
use super::shutdown;

/// How the runner decides when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, shutdown starts.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

/// Bind every controller, wait for the shutdown trigger, then stop background work.
pub async fn run(opts: SocketControllersOptions, stop: ShutdownOptions) -> anyhow::Result<()> {
    let cancel = match &stop {
        ShutdownOptions::Token(t) => t.clone(),
        _ => CancellationToken::new(),
    };

    let running = SocketRuntime::new(opts, cancel.clone()).start()?;

    match stop {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = shutdown::wait_for_shutdown().await {
                    tracing::warn!(
                        error = %e,
                        "shutdown: primary waiter failed; falling back to ctrl_c()"
                    );
                    let _ = tokio::signal::ctrl_c().await;
                }
                tracing::info!("shutdown: signal received");
                c.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            });
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token will control lifecycle");
        }
    }

    tracing::info!("Phase: wait");
    cancel.cancelled().await;
    running.shutdown().await;
    Ok(())
}
