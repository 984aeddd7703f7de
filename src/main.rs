use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::TlsAcceptor;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shiftd::config::Config;
use shiftd::identity::JwtIdentity;
use shiftd::observability;
use shiftd::tenant::TenantManager;
use shiftd::wire::{self, ShiftdFactory};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;
    observability::init(config.metrics_port)?;
    let tls = shiftd::tls::load_tls_acceptor(config.tls.as_ref())?;

    std::fs::create_dir_all(&config.data_dir)?;
    let tenants =
        Arc::new(TenantManager::open(config.data_dir.clone(), config.compact_threshold).await?);
    let factory = ShiftdFactory::new(
        tenants.clone(),
        Arc::new(JwtIdentity::new(config.jwt_secret.as_bytes())),
        config.password.clone(),
        config.token_ttl,
    );
    let slots = Arc::new(Semaphore::new(config.max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(
        %addr,
        data_dir = %config.data_dir.display(),
        businesses = tenants.len(),
        max_connections = config.max_connections,
        tls = tls.is_some(),
        "shiftd listening"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    if let Some(permit) = admit(&slots, peer) {
                        spawn_session(socket, peer, permit, factory.clone(), tls.clone());
                    }
                }
                Err(e) => tracing::error!("accept error: {e}"),
            },
            _ = &mut shutdown => {
                info!("shutdown requested, no longer accepting");
                break;
            }
        }
    }

    drain(&slots, config.max_connections).await;
    info!("shiftd stopped");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM where the platform has it.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("SIGTERM handler unavailable: {e}"),
        }
    }
    tokio::signal::ctrl_c().await.ok();
}

/// Take a connection slot, or turn the peer away when all are in use.
fn admit(slots: &Arc<Semaphore>, peer: SocketAddr) -> Option<OwnedSemaphorePermit> {
    match slots.clone().try_acquire_owned() {
        Ok(permit) => {
            metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
            Some(permit)
        }
        Err(_) => {
            warn!("connection limit reached, rejecting {peer}");
            metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
            None
        }
    }
}

fn spawn_session(
    socket: TcpStream,
    peer: SocketAddr,
    permit: OwnedSemaphorePermit,
    factory: ShiftdFactory,
    tls: Option<TlsAcceptor>,
) {
    tracing::debug!("connection from {peer}");
    metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
    tokio::spawn(async move {
        if let Err(e) = wire::process_connection(socket, factory, tls).await {
            tracing::error!("connection error from {peer}: {e}");
        }
        metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
        drop(permit);
    });
}

/// Wait until every slot is returned, giving up after `DRAIN_TIMEOUT`.
async fn drain(slots: &Semaphore, capacity: usize) {
    info!("draining connections");
    let all_returned = async {
        while slots.available_permits() < capacity {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, all_returned).await {
        Ok(()) => info!("all connections drained"),
        Err(_) => {
            let open = capacity - slots.available_permits();
            warn!("drain timeout, {open} connections still open");
        }
    }
}
