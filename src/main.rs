use arm_rig::bridge::run_bridge_client;
use arm_rig::config::{RigConfig, bind_listener};
use arm_rig::reconcile::Reconciler;
use arm_rig::rig::RigActor;
use arm_rig::{CcdSolver, server};
use tokio::sync::mpsc;
use tracing::{error, info};

const BRIDGE_EVENT_CAPACITY: usize = 256;
const COMMAND_CAPACITY: usize = 64;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = RigConfig::from_env_and_args(&args);
    info!(
        "arm convention: {} (override with ARM_CONVENTION)",
        config.convention.label()
    );
    info!(
        "ik: {} iterations, damping {}; snapshots every {:?} while dragging",
        config.ik.iterations, config.ik.damping, config.emit_interval
    );

    let reconciler = Reconciler::new(config.convention.right_arm(), CcdSolver::new(config.ik))
        .with_dial(config.dial)
        .with_emit_interval(config.emit_interval);
    let (bridge_tx, bridge_rx) = mpsc::channel(BRIDGE_EVENT_CAPACITY);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (actor, rig) = RigActor::new(reconciler, bridge_rx, command_tx);
    tokio::spawn(actor.run());
    tokio::spawn(run_bridge_client(config.bridge_url.clone(), bridge_tx, command_rx));

    let app = server::router(rig);
    let (listener, addr) = match bind_listener(&config.bind_host, config.bind_port).await {
        Ok(bound) => bound,
        Err(message) => {
            error!("{message}");
            return;
        }
    };
    info!("arm-rig listening on http://{addr} (views connect to /api/rig/ws)");
    if let Err(err) = axum::serve(listener, app).await {
        error!("server exited unexpectedly: {err}");
    }
}
