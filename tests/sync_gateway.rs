use axum::{routing::get, Json, Router};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use netviz_editor::anomaly::{AnomalyMetric, AnomalyStatus};
use netviz_editor::error::TopologyError;
use netviz_editor::graph::{DeviceId, DeviceMetrics};
use netviz_editor::handlers;
use netviz_editor::models::{
    ConnectionCreateRequest, ConnectionRecord, DevicePatch, DeviceRecord, LinkMetrics, PinRecord,
    ProjectDocument,
};
use netviz_editor::state::{AppState, Config};
use netviz_editor::sync::{spawn_worker, GatewayConfig, SyncCommand, SyncGateway, SyncReport};

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/api")
}

async fn service(projects: &std::path::Path) -> SyncGateway {
    let mut config = Config::from_lookup(|_| None);
    config.projects_dir = projects.to_path_buf();
    let base_url = serve(handlers::router(Arc::new(AppState::new(config)))).await;
    SyncGateway::new(&GatewayConfig {
        base_url,
        timeout: Duration::from_secs(5),
        retries: 0,
    })
    .unwrap()
}

fn device(id: &str, cpu: u32) -> DeviceRecord {
    serde_json::from_value(serde_json::json!({
        "id": id, "name": format!("Device {id}"), "type": "server", "x": 10, "y": 20,
        "metrics": {"cpu": cpu, "memory": 40, "disk": 30, "vulnerability": 5,
                    "network": 100, "temperature": 45}
    }))
    .unwrap()
}

fn link(source: &str, target: &str) -> ConnectionCreateRequest {
    ConnectionCreateRequest {
        id: None,
        source_device_id: source.into(),
        target_device_id: target.into(),
        connection_type: "fiber".into(),
        bandwidth: 10000.0,
        metrics: LinkMetrics {
            latency: 2.0,
            packet_loss: 0.0,
        },
    }
}

#[tokio::test]
async fn test_device_and_connection_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = service(dir.path()).await;

    for (id, cpu) in [("a", 10), ("b", 20), ("c", 90)] {
        let created = gateway.add_device(&device(id, cpu)).await.unwrap();
        assert_eq!(created.id, Some(DeviceId::from(id)));
    }
    gateway.add_connection(&link("a", "b")).await.unwrap();
    gateway.add_connection(&link("b", "c")).await.unwrap();

    let patch = DevicePatch {
        x: Some(300.0),
        ..Default::default()
    };
    assert_eq!(
        gateway.update_device(&"a".into(), &patch).await.unwrap(),
        "Device updated"
    );
    let metrics = DeviceMetrics {
        cpu: 15,
        memory: 40,
        disk: 30,
        vulnerability: 5,
        network: 100,
        temperature: 45,
    };
    gateway.update_metrics(&"a".into(), &metrics).await.unwrap();

    let devices = gateway.list_devices().await.unwrap();
    assert_eq!(devices[0].x, 300.0);
    assert_eq!(devices[0].metrics.unwrap().cpu, 15);

    gateway.delete_device(&"b".into()).await.unwrap();
    assert!(gateway.list_connections().await.unwrap().is_empty());

    let err = gateway.delete_device(&"b".into()).await.unwrap_err();
    assert!(matches!(err, TopologyError::Backend { status: 404, .. }));
    let err = gateway.add_connection(&link("a", "a")).await.unwrap_err();
    assert!(
        matches!(&err, TopologyError::Backend { status: 400, message } if message.contains("itself"))
    );
}

#[tokio::test]
async fn test_projects_files_and_scores() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = service(dir.path()).await;
    for (id, cpu) in [("1", 10), ("2", 20), ("3", 30)] {
        gateway.add_device(&device(id, cpu)).await.unwrap();
    }

    let doc = ProjectDocument {
        name: Some("office".into()),
        devices: gateway.list_devices().await.unwrap(),
        connections: Vec::new(),
    };
    let summary = gateway.save_project(&doc).await.unwrap();
    assert_eq!(summary.device_count, 3);
    assert_eq!(gateway.list_projects().await.unwrap().len(), 1);
    assert_eq!(gateway.list_json_files().await.unwrap(), vec!["office.json"]);
    assert_eq!(gateway.load_project(summary.id).await.unwrap(), doc);

    let details = gateway.topology_details().await.unwrap();
    let first = details.devices[0].zscores.as_ref().unwrap();
    assert!((first["cpu_usage"].zscore.unwrap() + 1.0).abs() < 1e-9);
    let status = gateway.status_summary().await.unwrap();
    assert_eq!(status.normal, 3);

    let pin: PinRecord = serde_json::from_value(
        serde_json::json!({"pin_name": "Office", "latitude": 40.7, "longitude": -74.0}),
    )
    .unwrap();
    let pin = gateway.add_pin(&pin).await.unwrap();
    assert_eq!(gateway.list_pins().await.unwrap().len(), 1);
    gateway.delete_pin(pin.id.unwrap()).await.unwrap();
    assert!(gateway.list_pins().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_device_analysis_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = service(dir.path()).await;
    for i in 0..9 {
        gateway.add_device(&device(&format!("d{i}"), 10)).await.unwrap();
    }
    gateway.add_device(&device("hot", 60)).await.unwrap();

    let analysis = gateway.device_zscores(&"hot".into()).await.unwrap();
    let cpu = analysis.metrics["cpu_usage"];
    assert_eq!(cpu.current_value, 60.0);
    assert!((cpu.population_mean - 15.0).abs() < 1e-9);
    assert_eq!(cpu.status, AnomalyStatus::Critical);
    assert_eq!(analysis.zscore_mean.unwrap().metric_count, 4);
    let err = gateway.device_zscores(&"nope".into()).await.unwrap_err();
    assert!(matches!(err, TopologyError::Backend { status: 404, .. }));

    let anomalies = gateway.network_anomalies(None, None).await.unwrap();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].device_name, "Device hot");
    assert_eq!(anomalies[0].anomalies[0].metric, "cpu_usage");
    assert!(gateway.network_anomalies(Some(3.5), None).await.unwrap().is_empty());
    let by_disk = gateway
        .network_anomalies(None, Some(AnomalyMetric::DiskUsage))
        .await
        .unwrap();
    assert!(by_disk.is_empty());

    let rankings = gateway.metric_rankings(None).await.unwrap();
    assert_eq!(rankings.len(), 5);
    assert_eq!(rankings["cpu_usage"][0].device_id, DeviceId::from("hot"));
    let only_cpu = gateway
        .metric_rankings(Some(AnomalyMetric::CpuUsage))
        .await
        .unwrap();
    assert_eq!(only_cpu.len(), 1);
    assert_eq!(only_cpu["cpu_usage"].len(), 10);

    let metrics = DeviceMetrics {
        cpu: 12,
        memory: 40,
        disk: 30,
        vulnerability: 5,
        network: 100,
        temperature: 45,
    };
    gateway.update_metrics(&"hot".into(), &metrics).await.unwrap();
    let raw = gateway.metrics_history(&"hot".into()).await.unwrap();
    let cpus: Vec<u32> = raw.iter().map(|s| s.metrics.cpu).collect();
    assert_eq!(cpus, vec![12, 60]);

    let history = gateway
        .device_history(&"hot".into(), Some(5), Some(AnomalyMetric::CpuUsage))
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].metrics["cpu_usage"].value, Some(60.0));
    assert!(history.iter().all(|e| e.metrics.len() == 1));
}

#[tokio::test]
async fn test_replaced_topology_accepts_metrics_for_loaded_devices() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = service(dir.path()).await;
    gateway.add_device(&device("stale", 10)).await.unwrap();

    let mut connection: ConnectionRecord = serde_json::from_value(serde_json::json!({
        "id": "l1", "source_device_id": "p1", "target_device_id": "p2",
        "type": "ethernet", "bandwidth": 100
    }))
    .unwrap();
    let doc = ProjectDocument {
        name: Some("restored".into()),
        devices: vec![device("p1", 20), device("p2", 30)],
        connections: vec![connection.clone()],
    };
    let (handle, mut reports, task) = spawn_worker(gateway.clone());
    assert!(handle.queue(SyncCommand::ReplaceTopology(doc)));
    match reports.recv().await.unwrap() {
        SyncReport::Completed { message, .. } => {
            assert_eq!(message, "Topology replaced with 2 device(s) and 1 connection(s)")
        }
        other => panic!("unexpected report {other:?}"),
    }
    drop(handle);
    task.await.unwrap();

    let ids: Vec<DeviceId> = gateway
        .list_devices()
        .await
        .unwrap()
        .into_iter()
        .filter_map(|d| d.id)
        .collect();
    assert_eq!(ids, vec![DeviceId::from("p1"), DeviceId::from("p2")]);
    let metrics = DeviceMetrics {
        cpu: 50,
        memory: 40,
        disk: 30,
        vulnerability: 5,
        network: 100,
        temperature: 45,
    };
    gateway.update_metrics(&"p1".into(), &metrics).await.unwrap();

    connection.target_device_id = "stale".into();
    let bad = ProjectDocument {
        name: None,
        devices: vec![device("p1", 20)],
        connections: vec![connection],
    };
    let err = gateway.replace_topology(&bad).await.unwrap_err();
    assert!(matches!(err, TopologyError::Backend { status: 404, .. }));
    assert_eq!(gateway.list_connections().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_timeouts_are_retried_then_reported() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let app = Router::new().route(
        "/api/devices",
        get(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(Vec::<DeviceRecord>::new())
            }
        }),
    );
    let gateway = SyncGateway::new(&GatewayConfig {
        base_url: serve(app).await,
        timeout: Duration::from_millis(100),
        retries: 2,
    })
    .unwrap();

    let err = gateway.list_devices().await.unwrap_err();
    assert!(matches!(err, TopologyError::Timeout { attempts: 3, .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_worker_reports_in_queue_order() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = service(dir.path()).await;
    let (handle, mut reports, task) = spawn_worker(gateway);

    assert!(handle.queue(SyncCommand::CreateDevice(device("w", 50))));
    assert!(handle.queue(SyncCommand::DeleteDevice("missing".into())));
    assert!(handle.queue(SyncCommand::FetchAnomalies));

    match reports.recv().await.unwrap() {
        SyncReport::Completed { message, background, .. } => {
            assert_eq!(message, "Device 'Device w' saved");
            assert!(!background);
        }
        other => panic!("unexpected report {other:?}"),
    }
    assert!(matches!(
        reports.recv().await.unwrap(),
        SyncReport::Failed {
            label: "delete device",
            error: TopologyError::Backend { status: 404, .. }
        }
    ));
    assert!(matches!(reports.recv().await.unwrap(), SyncReport::Anomalies(_)));

    drop(handle);
    task.await.unwrap();
}
