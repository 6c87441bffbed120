use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use netviz_editor::controller::{Command, PointerEvent};
use netviz_editor::editor::{Editor, EditorInput};
use netviz_editor::graph::{DeviceType, Point, SurfaceSize, DEVICE_HEIGHT, DEVICE_WIDTH};
use netviz_editor::handlers;
use netviz_editor::ports::Detached;
use netviz_editor::render::DisplayList;
use netviz_editor::scheduler::RefreshScheduler;
use netviz_editor::state::{AppState, Config};
use netviz_editor::sync::{spawn_worker, SyncGateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("netviz_editor=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();
    let state = Arc::new(AppState::new(config.clone()));
    let app = handlers::router(state);

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    info!("Listening on http://{}", listener.local_addr()?);

    if config.simulate_devices > 0 {
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = simulate(config).await {
                error!("simulation session failed: {e:#}");
            }
        });
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

/// Headless editor session against this service: lays out
/// `SIMULATE_DEVICES` devices, chains them through connect mode and keeps
/// the metrics and anomaly refresh running until Ctrl-C.
async fn simulate(config: Config) -> anyhow::Result<()> {
    let gateway = SyncGateway::new(&config.gateway())?;
    let (sync, reports, worker) = spawn_worker(gateway);
    let editor = Editor::new(
        config.editor_options(),
        DisplayList::new(SurfaceSize::new(1200.0, 800.0)),
        sync,
        Box::new(Detached),
        Box::new(Detached),
    )?;

    let (tick_tx, tick_rx) = mpsc::channel(4);
    let scheduler = RefreshScheduler::start(config.schedule(), tick_tx).await?;

    let (input_tx, input_rx) = mpsc::channel(64);
    let count = config.simulate_devices;
    tokio::spawn(async move {
        let mut inputs = Vec::new();
        let origins: Vec<Point> = (0..count)
            .map(|i| {
                Point::new(
                    40.0 + (i % 6) as f64 * 180.0,
                    40.0 + (i / 6) as f64 * 140.0,
                )
            })
            .collect();
        for (i, origin) in origins.iter().enumerate() {
            inputs.push(EditorInput::Command(Command::AddDevice {
                name: format!("Device {}", i + 1),
                device_type: DeviceType::ALL[i % DeviceType::ALL.len()],
                position: *origin,
            }));
        }
        let middle = Point::new(DEVICE_WIDTH / 2.0, DEVICE_HEIGHT / 2.0);
        for pair in origins.windows(2) {
            inputs.push(EditorInput::Command(Command::ToggleConnectMode));
            inputs.push(EditorInput::Pointer(PointerEvent::Click(pair[0] + middle)));
            inputs.push(EditorInput::Pointer(PointerEvent::Click(pair[1] + middle)));
        }
        for input in inputs {
            if input_tx.send(input).await.is_err() {
                return;
            }
        }
        let _ = tokio::signal::ctrl_c().await;
        let _ = input_tx.send(EditorInput::Shutdown).await;
    });

    let editor = editor.run(input_rx, tick_rx, reports).await;
    scheduler.shutdown().await?;
    drop(editor);
    worker.await?;
    info!("simulation session finished");
    Ok(())
}
