//! Editor session: wires the store, controller, renderer and sync queue
//! together and runs them on one task.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::anomaly::{AnomalyMetric, AnomalyOverlay};
use crate::controller::{Command, Controller, ControllerOptions, Key, PointerEvent};
use crate::data;
use crate::error::Result;
use crate::graph::{DeviceId, Point, SurfaceSize};
use crate::notice::NoticeBoard;
use crate::ports::{ChartPort, MarkerPort};
use crate::render::{FrameReport, RenderOptions, Renderer, Surface, ViewTransform};
use crate::scheduler::RefreshTick;
use crate::store::{EventKind, StoreEvent, Store};
use crate::sync::{codec, SyncCommand, SyncHandle, SyncReport};

/// Chart series fed with the selected device's CPU after each metrics tick.
pub const CPU_SERIES: &str = "cpu";

#[derive(Debug, Clone, PartialEq)]
pub enum EditorInput {
    Pointer(PointerEvent),
    Key(Key),
    Command(Command),
    /// The canvas is now displayed at `displayed` size with its top-left
    /// corner at `origin` in client coordinates.
    Viewport { displayed: SurfaceSize, origin: Point },
    AnomalyMetric(AnomalyMetric),
    Shutdown,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EditorOptions {
    pub render: RenderOptions,
    pub controller: ControllerOptions,
    /// Fixed RNG seed; entropy when `None`.
    pub seed: Option<u64>,
}

pub struct Editor<S: Surface> {
    store: Store,
    renderer: Renderer,
    controller: Controller,
    overlay: AnomalyOverlay,
    dirty: Arc<AtomicBool>,
    /// Devices removed from the store whose scores are still in `overlay`.
    removed: Arc<Mutex<Vec<DeviceId>>>,
    sync: SyncHandle,
    rng: StdRng,
    surface: S,
    chart: Box<dyn ChartPort>,
    markers: Box<dyn MarkerPort>,
}

impl<S: Surface> Editor<S> {
    /// Initializes the store against the surface size. Failure here ends
    /// the session.
    pub fn new(
        options: EditorOptions,
        surface: S,
        sync: SyncHandle,
        chart: Box<dyn ChartPort>,
        markers: Box<dyn MarkerPort>,
    ) -> Result<Self> {
        let mut store = Store::new();
        let dirty = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&dirty);
        store.subscribe(&EventKind::REDRAW, move |_: &StoreEvent| -> anyhow::Result<()> {
            flag.store(true, Ordering::Release);
            Ok(())
        });
        let removed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&removed);
        store.subscribe(
            &[EventKind::DeviceRemoved],
            move |event: &StoreEvent| -> anyhow::Result<()> {
                if let StoreEvent::DeviceRemoved { device, .. } = event {
                    sink.lock()
                        .map_err(|_| anyhow::anyhow!("removed device queue poisoned"))?
                        .push(device.id().clone());
                }
                Ok(())
            },
        );
        store.initialize(surface.size())?;

        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            store,
            renderer: Renderer::new(options.render),
            controller: Controller::new(options.controller),
            overlay: AnomalyOverlay::new(),
            dirty,
            removed,
            sync,
            rng,
            surface,
            chart,
            markers,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn notices(&self) -> &NoticeBoard {
        self.controller.notices()
    }

    pub fn overlay(&self) -> &AnomalyOverlay {
        &self.overlay
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn needs_redraw(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn forget_removed(&mut self) {
        let ids = match self.removed.lock() {
            Ok(mut ids) => std::mem::take(&mut *ids),
            Err(_) => return,
        };
        for id in &ids {
            self.overlay.forget(id);
        }
    }

    fn queue(&self, commands: Vec<SyncCommand>) {
        for command in commands {
            self.sync.queue(command);
        }
    }

    pub fn handle_input(&mut self, input: EditorInput) {
        match input {
            EditorInput::Pointer(event) => {
                let effects = self
                    .controller
                    .handle_pointer(&mut self.store, event, &mut self.rng);
                self.queue(effects);
            }
            EditorInput::Key(key) => {
                let effects = self.controller.handle_key(&mut self.store, key);
                self.queue(effects);
            }
            EditorInput::Command(command) => self.dispatch(command),
            EditorInput::Viewport { displayed, origin } => {
                let fitted = self
                    .store
                    .surface()
                    .and_then(|logical| ViewTransform::fit(displayed, logical, origin));
                match fitted {
                    Ok(transform) => self.controller.set_transform(transform),
                    Err(e) => warn!("viewport ignored: {e}"),
                }
            }
            EditorInput::AnomalyMetric(metric) => {
                self.overlay.set_metric(metric);
                self.dirty.store(true, Ordering::Release);
            }
            EditorInput::Shutdown => {}
        }
        self.forget_removed();
    }

    fn dispatch(&mut self, command: Command) {
        if matches!(command, Command::LoadProject(_)) {
            self.overlay.clear();
        }
        let effects = self
            .controller
            .handle_command(&mut self.store, command, &mut self.rng);
        self.queue(effects);
    }

    pub fn on_tick(&mut self, tick: RefreshTick) -> Result<()> {
        match tick {
            RefreshTick::Metrics => {
                let snapshot = self.store.refresh_metrics(&mut self.rng)?;
                debug!(devices = snapshot.len(), "metrics refreshed");
                for (id, metrics) in snapshot {
                    self.sync.queue(SyncCommand::PushMetrics { id, metrics });
                }
                if let Some(device) = self.store.selected_device() {
                    self.chart.append_point(CPU_SERIES, f64::from(device.metrics.cpu));
                }
            }
            RefreshTick::Anomalies => {
                self.sync.queue(SyncCommand::FetchAnomalies);
            }
        }
        Ok(())
    }

    pub fn on_report(&mut self, report: SyncReport) {
        match report {
            SyncReport::Completed {
                label,
                message,
                background,
            } => {
                if background {
                    debug!(command = label, "{message}");
                } else {
                    self.controller.notices_mut().report_success(message);
                }
            }
            SyncReport::ProjectSaved(summary) => {
                info!(project = summary.id, name = %summary.name, "project saved");
                self.controller
                    .notices_mut()
                    .report_success(format!("Project '{}' saved", summary.name));
            }
            SyncReport::ProjectLoaded(doc) => self.dispatch(Command::LoadProject(doc)),
            SyncReport::Anomalies(details) => {
                let applied = self.overlay.apply(&details, self.store.graph());
                debug!(applied, "anomaly scores applied");
                self.dirty.store(true, Ordering::Release);
            }
            SyncReport::Pins(pins) => {
                for pin in &pins {
                    self.markers.add_marker(pin.latitude, pin.longitude, &pin.pin_name);
                }
                debug!(pins = pins.len(), "map pins loaded");
            }
            SyncReport::Failed { label, error } => {
                self.controller
                    .notices_mut()
                    .report_error(format!("Failed to {label}: {error}"));
            }
        }
        self.forget_removed();
    }

    /// Draws a frame if anything changed since the last one.
    pub fn redraw(&mut self) -> Option<FrameReport> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return None;
        }
        let report = self
            .renderer
            .draw(&self.store, &self.overlay, &mut self.surface);
        if report.failures > 0 {
            warn!(failures = report.failures, "frame drawn with failures");
        }
        Some(report)
    }

    /// Replaces the graph with the project stored at `path`.
    pub fn import_project(&mut self, path: &Path) {
        match data::load_project_file(path) {
            Ok(doc) => self.dispatch(Command::LoadProject(doc)),
            Err(e) => self
                .controller
                .notices_mut()
                .report_error(format!("Failed to import {}: {e}", path.display())),
        }
    }

    pub fn export_project(&mut self, path: &Path, name: Option<String>) -> Result<()> {
        let doc = codec::graph_to_project(self.store.graph(), name);
        data::save_project_file(path, &doc)?;
        self.controller
            .notices_mut()
            .report_success(format!("Exported {}", path.display()));
        Ok(())
    }

    /// Runs until `Shutdown` arrives or every input sender is gone, then
    /// tears the store down and hands the session back.
    pub async fn run(
        mut self,
        mut inputs: mpsc::Receiver<EditorInput>,
        mut ticks: mpsc::Receiver<RefreshTick>,
        mut reports: mpsc::UnboundedReceiver<SyncReport>,
    ) -> Self {
        self.redraw();
        loop {
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(EditorInput::Shutdown) | None => break,
                    Some(input) => self.handle_input(input),
                },
                Some(tick) = ticks.recv() => {
                    if let Err(e) = self.on_tick(tick) {
                        warn!(?tick, "refresh failed: {e}");
                    }
                }
                Some(report) = reports.recv() => self.on_report(report),
            }
            self.controller.notices_mut().dismiss_expired(Instant::now());
            self.redraw();
        }
        info!("editor session closing");
        self.store.teardown();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DeviceType;
    use crate::models::TopologyDetails;
    use crate::notice::NoticeKind;
    use crate::ports::Detached;
    use crate::anomaly::AnomalyScore;
    use crate::graph::Rect;
    use crate::render::{DisplayList, DrawCommand, Stroke, TextStyle};
    use std::sync::Mutex;

    /// Chart port that shares what it receives with the test.
    #[derive(Clone, Default)]
    struct SharedChart(Arc<Mutex<Vec<(String, f64)>>>);

    impl ChartPort for SharedChart {
        fn append_point(&mut self, series: &str, value: f64) {
            self.0.lock().unwrap().push((series.to_string(), value));
        }
    }

    #[derive(Clone, Default)]
    struct SharedMarkers(Arc<Mutex<Vec<(f64, f64, String)>>>);

    impl MarkerPort for SharedMarkers {
        fn add_marker(&mut self, lat: f64, lng: f64, label: &str) {
            self.0.lock().unwrap().push((lat, lng, label.to_string()));
        }
    }

    fn editor(
        chart: Box<dyn ChartPort>,
    ) -> (Editor<DisplayList>, mpsc::UnboundedReceiver<SyncCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let editor = Editor::new(
            EditorOptions {
                seed: Some(3),
                ..Default::default()
            },
            DisplayList::new(SurfaceSize::new(800.0, 600.0)),
            SyncHandle::new(tx),
            chart,
            Box::new(Detached),
        )
        .unwrap();
        (editor, rx)
    }

    fn add_device(editor: &mut Editor<DisplayList>, name: &str, x: f64) {
        editor.handle_input(EditorInput::Command(Command::AddDevice {
            name: name.into(),
            device_type: DeviceType::Server,
            position: Point::new(x, 100.0),
        }));
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SyncCommand>) -> Vec<SyncCommand> {
        let mut out = Vec::new();
        while let Ok(command) = rx.try_recv() {
            out.push(command);
        }
        out
    }

    #[test]
    fn test_unusable_surface_is_fatal() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = Editor::new(
            EditorOptions::default(),
            DisplayList::new(SurfaceSize::new(0.0, 600.0)),
            SyncHandle::new(tx),
            Box::new(Detached),
            Box::new(Detached),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_redraw_only_after_change() {
        let (mut editor, _rx) = editor(Box::new(Detached));
        assert!(editor.redraw().is_some());
        assert!(editor.redraw().is_none());
        add_device(&mut editor, "S1", 100.0);
        let frame = editor.redraw().unwrap();
        assert_eq!(frame.devices, 1);
        assert!(editor.redraw().is_none());
    }

    #[test]
    fn test_add_device_queues_create() {
        let (mut editor, mut rx) = editor(Box::new(Detached));
        add_device(&mut editor, "S1", 100.0);
        assert!(matches!(&drain(&mut rx)[..], [SyncCommand::CreateDevice(r)] if r.name == "S1"));
    }

    #[test]
    fn test_metrics_tick_pushes_live_devices_and_feeds_chart() {
        let chart = SharedChart::default();
        let (mut editor, mut rx) = editor(Box::new(chart.clone()));
        add_device(&mut editor, "S1", 100.0);
        add_device(&mut editor, "S2", 400.0);
        editor.handle_input(EditorInput::Pointer(PointerEvent::Click(Point::new(110.0, 110.0))));
        let removed = editor.store().devices()[1].id().clone();
        editor.handle_input(EditorInput::Command(Command::RemoveDevice(removed.clone())));
        drain(&mut rx);

        editor.on_tick(RefreshTick::Metrics).unwrap();
        let pushed = drain(&mut rx);
        assert_eq!(pushed.len(), 1);
        assert!(matches!(&pushed[0], SyncCommand::PushMetrics { id, .. } if id != &removed));

        let cpu = f64::from(editor.store().devices()[0].metrics.cpu);
        assert_eq!(chart.0.lock().unwrap().as_slice(), &[(CPU_SERIES.to_string(), cpu)]);
    }

    #[test]
    fn test_failed_report_becomes_error_notice() {
        let (mut editor, _rx) = editor(Box::new(Detached));
        editor.on_report(SyncReport::Failed {
            label: "add device",
            error: crate::error::TopologyError::Timeout {
                endpoint: "POST /add_device".into(),
                attempts: 3,
            },
        });
        let notice = editor.notices().latest(NoticeKind::Error).unwrap();
        assert!(notice.message.starts_with("Failed to add device: request timeout"));
    }

    #[test]
    fn test_background_completion_is_silent() {
        let (mut editor, _rx) = editor(Box::new(Detached));
        editor.on_report(SyncReport::Completed {
            label: "update metrics",
            message: "ok".into(),
            background: true,
        });
        assert!(editor.notices().latest(NoticeKind::Success).is_none());
    }

    #[test]
    fn test_anomaly_report_draws_badges() {
        let (mut editor, _rx) = editor(Box::new(Detached));
        add_device(&mut editor, "S1", 100.0);
        let id = editor.store().devices()[0].id().clone();
        let details: TopologyDetails = serde_json::from_value(serde_json::json!({
            "devices": [
                {"id": id.as_str(), "name": "S1",
                 "zscores": {"cpu_usage": {"zscore": 2.5, "status": "critical"}}},
                {"id": "ghost", "zscores": {"cpu_usage": {"zscore": 1.0}}}
            ]
        }))
        .unwrap();
        editor.redraw();
        editor.on_report(SyncReport::Anomalies(details));
        let frame = editor.redraw().unwrap();
        assert_eq!(frame.badges, 1);
        assert!(editor.surface().texts().any(|t| t == "z=2.50"));
    }

    #[test]
    fn test_removed_device_leaves_overlay() {
        let (mut editor, _rx) = editor(Box::new(Detached));
        add_device(&mut editor, "S1", 100.0);
        add_device(&mut editor, "S2", 400.0);
        let kept = editor.store().devices()[0].id().clone();
        let gone = editor.store().devices()[1].id().clone();
        for id in [&kept, &gone] {
            editor
                .overlay
                .insert(id.clone(), AnomalyMetric::CpuUsage, AnomalyScore::new(1.5));
        }

        editor.handle_input(EditorInput::Command(Command::RemoveDevice(gone.clone())));
        assert!(editor.overlay().score_for(&gone).is_none());
        assert!(editor.overlay().score_for(&kept).is_some());

        editor.handle_input(EditorInput::Pointer(PointerEvent::Click(Point::new(110.0, 110.0))));
        editor.handle_input(EditorInput::Key(Key::Delete));
        assert!(editor.store().devices().is_empty());
        assert!(editor.overlay().is_empty());
    }

    #[test]
    fn test_pins_become_markers() {
        let markers = SharedMarkers::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut editor = Editor::new(
            EditorOptions::default(),
            DisplayList::new(SurfaceSize::new(800.0, 600.0)),
            SyncHandle::new(tx),
            Box::new(Detached),
            Box::new(markers.clone()),
        )
        .unwrap();
        let pins = serde_json::from_value(serde_json::json!([
            {"pin_name": "HQ", "latitude": 52.5, "longitude": 13.4}
        ]))
        .unwrap();
        editor.on_report(SyncReport::Pins(pins));
        assert_eq!(
            markers.0.lock().unwrap().as_slice(),
            &[(52.5, 13.4, "HQ".to_string())]
        );
    }

    #[test]
    fn test_export_then_import_restores_graph() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.json");
        let (mut editor, _rx) = editor(Box::new(Detached));
        add_device(&mut editor, "S1", 100.0);
        add_device(&mut editor, "S2", 400.0);
        editor.export_project(&path, Some("lab".into())).unwrap();

        let (mut fresh, _rx2) = self::editor(Box::new(Detached));
        fresh.import_project(&path);
        let names: Vec<&str> = fresh.store().devices().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["S1", "S2"]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_tears_down() {
        let (editor, _rx) = editor(Box::new(Detached));
        let (input_tx, input_rx) = mpsc::channel(8);
        let (_tick_tx, tick_rx) = mpsc::channel(1);
        let (_report_tx, report_rx) = mpsc::unbounded_channel();
        input_tx
            .send(EditorInput::Command(Command::SetLayer("logical".into())))
            .await
            .unwrap();
        input_tx.send(EditorInput::Shutdown).await.unwrap();
        let editor = editor.run(input_rx, tick_rx, report_rx).await;
        assert!(!editor.store().is_initialized());
    }

    /// Display list that refuses to be cleared.
    struct Unclearable(DisplayList);

    impl Surface for Unclearable {
        fn size(&self) -> SurfaceSize {
            self.0.size()
        }
        fn clear(&mut self) -> Result<()> {
            Err(crate::error::TopologyError::invalid("context lost"))
        }
        fn reset_transform(&mut self) -> Result<()> {
            self.0.reset_transform()
        }
        fn stroke_line(&mut self, from: Point, to: Point, stroke: &Stroke) -> Result<()> {
            self.0.stroke_line(from, to, stroke)
        }
        fn fill_rect(&mut self, rect: Rect, fill: &'static str, outline: &Stroke) -> Result<()> {
            self.0.fill_rect(rect, fill, outline)
        }
        fn fill_circle(&mut self, center: Point, radius: f64, fill: &'static str) -> Result<()> {
            self.0.fill_circle(center, radius, fill)
        }
        fn fill_text(&mut self, text: &str, at: Point, style: &TextStyle) -> Result<()> {
            self.0.fill_text(text, at, style)
        }
    }

    #[tokio::test]
    async fn test_surface_errors_do_not_end_session() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let editor = Editor::new(
            EditorOptions::default(),
            Unclearable(DisplayList::new(SurfaceSize::new(800.0, 600.0))),
            SyncHandle::new(tx),
            Box::new(Detached),
            Box::new(Detached),
        )
        .unwrap();
        let (input_tx, input_rx) = mpsc::channel(8);
        let (_tick_tx, tick_rx) = mpsc::channel(1);
        let (_report_tx, report_rx) = mpsc::unbounded_channel();
        input_tx
            .send(EditorInput::Command(Command::AddDevice {
                name: "S1".into(),
                device_type: DeviceType::Server,
                position: Point::new(100.0, 100.0),
            }))
            .await
            .unwrap();
        input_tx.send(EditorInput::Shutdown).await.unwrap();

        let editor = editor.run(input_rx, tick_rx, report_rx).await;
        assert_eq!(editor.store().devices().len(), 1);
        assert!(!editor.store().is_initialized());
        assert!(editor.surface().0.commands().iter().any(|c| matches!(c, DrawCommand::Rect { .. })));
    }
}
