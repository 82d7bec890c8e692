use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use marquee::auth::Roles;
use marquee::config::Config;
use marquee::engine::Engine;
use marquee::notify::NotifyHub;
use marquee::observability::{CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL};
use marquee::{observability, reaper, tls, wire};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("marquee=info")))
        .init();

    let config = Config::load()?;
    let server = config.server;
    observability::init(server.metrics_port);

    let tls_acceptor = tls::load_tls_acceptor(server.tls_cert.as_deref(), server.tls_key.as_deref())?;

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::with_system_clock(config.policy.clone(), notify));
    let roles = Arc::new(Roles::new(server.staff_users.iter().cloned()));
    let max_connections = server.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    if config.policy.sweep_interval_secs > 0 {
        let period = Duration::from_secs(config.policy.sweep_interval_secs);
        tokio::spawn(reaper::run_reaper(engine.clone(), period));
    }

    let addr = format!("{}:{}", server.bind, server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("marquee listening on {addr}");
    info!("  max_connections: {max_connections}");
    info!("  staff users: {}", server.staff_users.len());
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!(
        "  metrics: {}",
        server.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );
    info!(
        "  policy: hold ttl {}s, {} seats max, cancel cutoff {}h, {} days notice",
        config.policy.hold_ttl_secs,
        config.policy.max_seats_per_reservation,
        config.policy.cancel_cutoff_hours,
        config.policy.min_advance_days,
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("cannot register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let roles = roles.clone();
                let password = server.password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, engine, roles, password, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    info!("marquee stopped");
    Ok(())
}
