//! State store: the single owner of the topology graph and the transient UI
//! state (selection, drag, active layer).
//!
//! Every successful mutation emits exactly one [`StoreEvent`] to the
//! subscribers registered for its [`EventKind`], synchronously and in
//! subscription order. Listeners only see the event payload; a failing or
//! panicking listener is logged and skipped without affecting the others.

use rand::Rng;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

use crate::error::{Result, TopologyError};
use crate::graph::{
    Connection, Device, DeviceConfigUpdate, DeviceId, DeviceMetrics, ConnectionId, ConnectionType,
    Layer, MetricsUpdate, Point, SurfaceSize, TopologyGraph,
};

/// Tag of a store notification, used for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Initialized,
    DeviceAdded,
    DeviceRemoved,
    DeviceUpdated,
    DeviceSelected,
    ConnectionAdded,
    ConnectionRemoved,
    LayerChanged,
    DragChanged,
    MetricsRefreshed,
    GraphReplaced,
    TornDown,
}

impl EventKind {
    /// Kinds after which the canvas must be redrawn.
    pub const REDRAW: [EventKind; 10] = [
        EventKind::Initialized,
        EventKind::DeviceAdded,
        EventKind::DeviceRemoved,
        EventKind::DeviceUpdated,
        EventKind::DeviceSelected,
        EventKind::ConnectionAdded,
        EventKind::ConnectionRemoved,
        EventKind::LayerChanged,
        EventKind::MetricsRefreshed,
        EventKind::GraphReplaced,
    ];
}

/// Payload of a store notification.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Initialized(SurfaceSize),
    DeviceAdded(Device),
    /// A removal carries the cascaded connections and whether the selection
    /// was cleared by it.
    DeviceRemoved {
        device: Device,
        connections: Vec<Connection>,
        selection_cleared: bool,
    },
    DeviceUpdated(Device),
    DeviceSelected(Option<DeviceId>),
    ConnectionAdded(Connection),
    ConnectionRemoved(Connection),
    LayerChanged(Layer),
    DragChanged(Option<DragState>),
    MetricsRefreshed(Vec<DeviceId>),
    GraphReplaced { devices: usize, connections: usize },
    TornDown,
}

impl StoreEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StoreEvent::Initialized(_) => EventKind::Initialized,
            StoreEvent::DeviceAdded(_) => EventKind::DeviceAdded,
            StoreEvent::DeviceRemoved { .. } => EventKind::DeviceRemoved,
            StoreEvent::DeviceUpdated(_) => EventKind::DeviceUpdated,
            StoreEvent::DeviceSelected(_) => EventKind::DeviceSelected,
            StoreEvent::ConnectionAdded(_) => EventKind::ConnectionAdded,
            StoreEvent::ConnectionRemoved(_) => EventKind::ConnectionRemoved,
            StoreEvent::LayerChanged(_) => EventKind::LayerChanged,
            StoreEvent::DragChanged(_) => EventKind::DragChanged,
            StoreEvent::MetricsRefreshed(_) => EventKind::MetricsRefreshed,
            StoreEvent::GraphReplaced { .. } => EventKind::GraphReplaced,
            StoreEvent::TornDown => EventKind::TornDown,
        }
    }
}

/// Active drag: the dragged device and the pointer offset from its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct DragState {
    pub device: DeviceId,
    pub offset: Point,
}

/// Receiver of store notifications.
pub trait StoreListener: Send {
    fn on_event(&mut self, event: &StoreEvent) -> anyhow::Result<()>;
}

impl<F> StoreListener for F
where
    F: FnMut(&StoreEvent) -> anyhow::Result<()> + Send,
{
    fn on_event(&mut self, event: &StoreEvent) -> anyhow::Result<()> {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kinds: Vec<EventKind>,
    listener: Box<dyn StoreListener>,
}

pub struct Store {
    surface: Option<SurfaceSize>,
    graph: TopologyGraph,
    selected: Option<DeviceId>,
    drag: Option<DragState>,
    layer: Layer,
    subscriptions: Vec<Subscription>,
    next_subscription: u64,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            surface: None,
            graph: TopologyGraph::new(),
            selected: None,
            drag: None,
            layer: Layer::Physical,
            subscriptions: Vec::new(),
            next_subscription: 1,
        }
    }

    /// One-time setup against the drawing surface.
    pub fn initialize(&mut self, surface: SurfaceSize) -> Result<()> {
        if self.surface.is_some() {
            return Err(TopologyError::invalid("store already initialized"));
        }
        if !surface.is_usable() {
            return Err(TopologyError::invalid(format!(
                "invalid render surface {}x{}",
                surface.width, surface.height
            )));
        }
        self.surface = Some(surface);
        debug!(width = surface.width, height = surface.height, "store initialized");
        self.emit(StoreEvent::Initialized(surface));
        Ok(())
    }

    /// Drops the graph and transient state; the store must be initialized
    /// again before further use. Subscriptions survive.
    pub fn teardown(&mut self) {
        if self.surface.take().is_none() {
            return;
        }
        self.graph = TopologyGraph::new();
        self.selected = None;
        self.drag = None;
        self.layer = Layer::Physical;
        self.emit(StoreEvent::TornDown);
    }

    pub fn is_initialized(&self) -> bool {
        self.surface.is_some()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.surface.is_some() {
            Ok(())
        } else {
            Err(TopologyError::NotInitialized)
        }
    }

    pub fn surface(&self) -> Result<SurfaceSize> {
        self.surface.ok_or(TopologyError::NotInitialized)
    }

    pub fn graph(&self) -> &TopologyGraph {
        &self.graph
    }

    pub fn devices(&self) -> &[Device] {
        self.graph.devices()
    }

    pub fn connections(&self) -> &[Connection] {
        self.graph.connections()
    }

    pub fn active_layer(&self) -> Layer {
        self.layer
    }

    pub fn selected_id(&self) -> Option<&DeviceId> {
        self.selected.as_ref()
    }

    pub fn selected_device(&self) -> Option<&Device> {
        self.selected.as_ref().and_then(|id| self.graph.device(id).ok())
    }

    pub fn drag_state(&self) -> Option<&DragState> {
        self.drag.as_ref()
    }

    // --- subscriptions ---

    pub fn subscribe<L>(&mut self, kinds: &[EventKind], listener: L) -> SubscriptionId
    where
        L: StoreListener + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscriptions.push(Subscription {
            id,
            kinds: kinds.to_vec(),
            listener: Box::new(listener),
        });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    fn emit(&mut self, event: StoreEvent) {
        let kind = event.kind();
        for sub in self
            .subscriptions
            .iter_mut()
            .filter(|s| s.kinds.contains(&kind))
        {
            let listener = &mut sub.listener;
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(subscription = sub.id.0, kind = ?kind, "store listener failed: {e:#}")
                }
                Err(_) => warn!(subscription = sub.id.0, kind = ?kind, "store listener panicked"),
            }
        }
    }

    // --- devices ---

    pub fn add_device(&mut self, device: Device) -> Result<&Device> {
        self.ensure_initialized()?;
        let id = device.id().clone();
        self.graph.insert_device(device.clone())?;
        self.emit(StoreEvent::DeviceAdded(device));
        self.graph.device(&id)
    }

    /// Removes a device, its connections and any selection or drag on it.
    /// Unknown ids are a no-op returning `None`.
    pub fn remove_device(&mut self, id: &DeviceId) -> Result<Option<Device>> {
        self.ensure_initialized()?;
        let Some((device, connections)) = self.graph.remove_device(id) else {
            debug!(device = %id, "remove_device: unknown id, nothing to do");
            return Ok(None);
        };
        let selection_cleared = self.selected.as_ref() == Some(id);
        if selection_cleared {
            self.selected = None;
        }
        if self.drag.as_ref().is_some_and(|d| &d.device == id) {
            self.drag = None;
        }
        self.emit(StoreEvent::DeviceRemoved {
            device: device.clone(),
            connections,
            selection_cleared,
        });
        Ok(Some(device))
    }

    pub fn update_device(&mut self, id: &DeviceId, update: &DeviceConfigUpdate) -> Result<&Device> {
        self.ensure_initialized()?;
        let device = self.graph.update_device(id, |d| d.apply_config(update))?.clone();
        self.emit(StoreEvent::DeviceUpdated(device));
        self.graph.device(id)
    }

    pub fn update_device_metrics(&mut self, id: &DeviceId, update: &MetricsUpdate) -> Result<&Device> {
        self.ensure_initialized()?;
        let device = self.graph.update_device(id, |d| d.metrics.apply(update))?.clone();
        self.emit(StoreEvent::DeviceUpdated(device));
        self.graph.device(id)
    }

    /// Relocates a device; attached connections are re-anchored in the same
    /// step.
    pub fn move_device(&mut self, id: &DeviceId, position: Point) -> Result<&Device> {
        self.ensure_initialized()?;
        let device = self.graph.move_device(id, position)?.clone();
        self.emit(StoreEvent::DeviceUpdated(device));
        self.graph.device(id)
    }

    // --- connections ---

    pub fn add_connection(&mut self, connection: Connection) -> Result<&Connection> {
        self.ensure_initialized()?;
        let id = connection.id().clone();
        let inserted = self.graph.insert_connection(connection)?.clone();
        self.emit(StoreEvent::ConnectionAdded(inserted));
        self.graph.connection(&id)
    }

    /// Validates, builds and adds a connection between two devices.
    pub fn connect<R: Rng + ?Sized>(
        &mut self,
        source: &DeviceId,
        target: &DeviceId,
        connection_type: ConnectionType,
        bandwidth: f64,
        rng: &mut R,
    ) -> Result<&Connection> {
        self.ensure_initialized()?;
        let inserted = self
            .graph
            .connect(source, target, connection_type, bandwidth, rng)?
            .clone();
        let id = inserted.id().clone();
        self.emit(StoreEvent::ConnectionAdded(inserted));
        self.graph.connection(&id)
    }

    /// Unknown ids are a no-op returning `None`.
    pub fn remove_connection(&mut self, id: &ConnectionId) -> Result<Option<Connection>> {
        self.ensure_initialized()?;
        let Some(connection) = self.graph.remove_connection(id) else {
            debug!(connection = %id, "remove_connection: unknown id, nothing to do");
            return Ok(None);
        };
        self.emit(StoreEvent::ConnectionRemoved(connection.clone()));
        Ok(Some(connection))
    }

    // --- selection, layer, drag ---

    pub fn set_selected_device(&mut self, id: Option<DeviceId>) -> Result<()> {
        self.ensure_initialized()?;
        if let Some(id) = &id {
            self.graph.device(id)?;
        }
        self.selected = id.clone();
        self.emit(StoreEvent::DeviceSelected(id));
        Ok(())
    }

    /// Switches the active layer. Re-selecting the current layer still
    /// notifies.
    pub fn set_active_layer(&mut self, name: &str) -> Result<Layer> {
        self.ensure_initialized()?;
        let layer: Layer = name.parse()?;
        self.layer = layer;
        self.emit(StoreEvent::LayerChanged(layer));
        Ok(layer)
    }

    pub fn set_drag_state(&mut self, drag: Option<DragState>) -> Result<()> {
        self.ensure_initialized()?;
        if let Some(drag) = &drag {
            self.graph.device(&drag.device)?;
        }
        self.drag = drag.clone();
        self.emit(StoreEvent::DragChanged(drag));
        Ok(())
    }

    // --- bulk operations ---

    /// Scheduler tick: re-randomizes metrics of every live device and
    /// connection. Returns the new device snapshots for persistence.
    pub fn refresh_metrics<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Vec<(DeviceId, DeviceMetrics)>> {
        self.ensure_initialized()?;
        self.graph.randomize_metrics(rng);
        let snapshot: Vec<(DeviceId, DeviceMetrics)> = self
            .graph
            .devices()
            .iter()
            .map(|d| (d.id().clone(), d.metrics))
            .collect();
        self.emit(StoreEvent::MetricsRefreshed(
            snapshot.iter().map(|(id, _)| id.clone()).collect(),
        ));
        Ok(snapshot)
    }

    /// Per-device refresh. A device that no longer exists is skipped
    /// silently, so a late timer can never resurrect it.
    pub fn refresh_device_metrics<R: Rng + ?Sized>(
        &mut self,
        id: &DeviceId,
        rng: &mut R,
    ) -> Result<Option<DeviceMetrics>> {
        self.ensure_initialized()?;
        if !self.graph.contains_device(id) {
            debug!(device = %id, "metrics refresh for removed device skipped");
            return Ok(None);
        }
        let device = self.graph.update_device(id, |d| d.randomize_metrics(rng))?.clone();
        let metrics = device.metrics;
        self.emit(StoreEvent::DeviceUpdated(device));
        Ok(Some(metrics))
    }

    /// Swaps in a freshly loaded graph, clearing selection and drag.
    pub fn replace_graph(&mut self, graph: TopologyGraph) -> Result<()> {
        self.ensure_initialized()?;
        let (devices, connections) = (graph.devices().len(), graph.connections().len());
        self.graph = graph;
        self.selected = None;
        self.drag = None;
        self.emit(StoreEvent::GraphReplaced {
            devices,
            connections,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DeviceType;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::{Arc, Mutex};

    fn ready_store() -> Store {
        let mut store = Store::new();
        store.initialize(SurfaceSize::new(800.0, 400.0)).unwrap();
        store
    }

    fn recorder(store: &mut Store, kinds: &[EventKind]) -> Arc<Mutex<Vec<StoreEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(kinds, move |event: &StoreEvent| -> anyhow::Result<()> {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });
        seen
    }

    fn add(store: &mut Store, x: f64, name: &str, t: DeviceType) -> DeviceId {
        let mut rng = StdRng::seed_from_u64(5);
        let device = Device::new(Point::new(x, 50.0), name, t, &mut rng).unwrap();
        store.add_device(device).unwrap().id().clone()
    }

    mod lifecycle_tests {
        use super::*;

        #[test]
        fn test_operations_before_initialize_fail() {
            let mut store = Store::new();
            let mut rng = StdRng::seed_from_u64(1);
            let device = Device::new(Point::new(0.0, 0.0), "A", DeviceType::Server, &mut rng).unwrap();
            assert!(matches!(store.add_device(device), Err(TopologyError::NotInitialized)));
            assert!(matches!(
                store.set_active_layer("logical"),
                Err(TopologyError::NotInitialized)
            ));
            assert!(matches!(
                store.remove_device(&DeviceId::from("x")),
                Err(TopologyError::NotInitialized)
            ));
        }

        #[test]
        fn test_initialize_twice_fails() {
            let mut store = ready_store();
            assert!(store.initialize(SurfaceSize::new(10.0, 10.0)).is_err());
        }

        #[test]
        fn test_initialize_rejects_empty_surface() {
            let mut store = Store::new();
            assert!(store.initialize(SurfaceSize::new(0.0, 0.0)).is_err());
            assert!(!store.is_initialized());
        }

        #[test]
        fn test_teardown_resets_state() {
            let mut store = ready_store();
            add(&mut store, 0.0, "A", DeviceType::Server);
            store.teardown();
            assert!(store.devices().is_empty());
            assert!(matches!(store.surface(), Err(TopologyError::NotInitialized)));
        }
    }

    mod layer_tests {
        use super::*;

        #[test]
        fn test_invalid_layer_leaves_layer_unchanged() {
            let mut store = ready_store();
            store.set_active_layer("logical").unwrap();
            let seen = recorder(&mut store, &[EventKind::LayerChanged]);
            let err = store.set_active_layer("bogus").unwrap_err();
            assert!(matches!(err, TopologyError::InvalidLayer(_)));
            assert_eq!(store.active_layer(), Layer::Logical);
            assert!(seen.lock().unwrap().is_empty());
        }

        #[test]
        fn test_same_layer_still_notifies() {
            let mut store = ready_store();
            let seen = recorder(&mut store, &[EventKind::LayerChanged]);
            store.set_active_layer("physical").unwrap();
            store.set_active_layer("physical").unwrap();
            assert_eq!(seen.lock().unwrap().len(), 2);
        }
    }

    mod removal_tests {
        use super::*;

        #[test]
        fn test_remove_device_cascades_in_one_notification() {
            let mut store = ready_store();
            let a = add(&mut store, 50.0, "A", DeviceType::Workstation);
            let b = add(&mut store, 250.0, "B", DeviceType::Router);
            let mut rng = StdRng::seed_from_u64(2);
            store.connect(&a, &b, ConnectionType::Ethernet, 1000.0, &mut rng).unwrap();
            store.set_selected_device(Some(a.clone())).unwrap();

            let seen = recorder(&mut store, &EventKind::REDRAW);
            store.remove_device(&a).unwrap();

            assert!(store.connections().is_empty());
            assert!(store.selected_id().is_none());
            let events = seen.lock().unwrap();
            assert_eq!(events.len(), 1);
            match &events[0] {
                StoreEvent::DeviceRemoved {
                    device,
                    connections,
                    selection_cleared,
                } => {
                    assert_eq!(device.id(), &a);
                    assert_eq!(connections.len(), 1);
                    assert!(selection_cleared);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        #[test]
        fn test_remove_unknown_device_is_silent_noop() {
            let mut store = ready_store();
            let seen = recorder(&mut store, &EventKind::REDRAW);
            assert!(store.remove_device(&DeviceId::from("ghost")).unwrap().is_none());
            assert!(store
                .remove_connection(&ConnectionId::from("ghost"))
                .unwrap()
                .is_none());
            assert!(seen.lock().unwrap().is_empty());
        }
    }

    mod notification_tests {
        use super::*;

        #[test]
        fn test_failing_listener_does_not_block_others() {
            let mut store = ready_store();
            store.subscribe(&[EventKind::DeviceAdded], |_: &StoreEvent| -> anyhow::Result<()> {
                anyhow::bail!("listener exploded")
            });
            store.subscribe(&[EventKind::DeviceAdded], |_: &StoreEvent| -> anyhow::Result<()> {
                panic!("listener panicked")
            });
            let seen = recorder(&mut store, &[EventKind::DeviceAdded]);
            add(&mut store, 0.0, "A", DeviceType::Switch);
            assert_eq!(seen.lock().unwrap().len(), 1);
            assert_eq!(store.devices().len(), 1);
        }

        #[test]
        fn test_delivery_in_subscription_order() {
            let mut store = ready_store();
            let order = Arc::new(Mutex::new(Vec::new()));
            for n in 0..3 {
                let order = Arc::clone(&order);
                store.subscribe(&[EventKind::DeviceAdded], move |_: &StoreEvent| -> anyhow::Result<()> {
                    order.lock().unwrap().push(n);
                    Ok(())
                });
            }
            add(&mut store, 0.0, "A", DeviceType::Switch);
            assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        }

        #[test]
        fn test_unsubscribe_stops_delivery() {
            let mut store = ready_store();
            let seen = Arc::new(Mutex::new(0));
            let counter = Arc::clone(&seen);
            let id = store.subscribe(&[EventKind::DeviceAdded], move |_: &StoreEvent| -> anyhow::Result<()> {
                *counter.lock().unwrap() += 1;
                Ok(())
            });
            add(&mut store, 0.0, "A", DeviceType::Switch);
            assert!(store.unsubscribe(id));
            add(&mut store, 200.0, "B", DeviceType::Switch);
            assert_eq!(*seen.lock().unwrap(), 1);
        }

        #[test]
        fn test_each_mutation_emits_exactly_one_event() {
            let mut store = ready_store();
            let seen = recorder(
                &mut store,
                &[
                    EventKind::DeviceAdded,
                    EventKind::DeviceUpdated,
                    EventKind::DeviceSelected,
                    EventKind::DragChanged,
                ],
            );
            let a = add(&mut store, 0.0, "A", DeviceType::Server);
            store.move_device(&a, Point::new(10.0, 10.0)).unwrap();
            store
                .update_device_metrics(&a, &MetricsUpdate { cpu: Some(12), ..Default::default() })
                .unwrap();
            store.set_selected_device(Some(a.clone())).unwrap();
            store
                .set_drag_state(Some(DragState { device: a.clone(), offset: Point::new(1.0, 1.0) }))
                .unwrap();
            assert_eq!(seen.lock().unwrap().len(), 5);
            assert_eq!(store.selected_device().unwrap().metrics.cpu, 12);
        }
    }

    #[test]
    fn test_update_unknown_device_is_not_found() {
        let mut store = ready_store();
        let err = store
            .update_device(&DeviceId::from("ghost"), &DeviceConfigUpdate::default())
            .unwrap_err();
        assert!(matches!(err, TopologyError::NotFound { .. }));
    }

    #[test]
    fn test_late_device_timer_is_noop() {
        let mut store = ready_store();
        let a = add(&mut store, 0.0, "A", DeviceType::Server);
        store.remove_device(&a).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        assert!(store.refresh_device_metrics(&a, &mut rng).unwrap().is_none());
        assert!(store.devices().is_empty());
    }

    #[test]
    fn test_refresh_metrics_covers_live_devices_only() {
        let mut store = ready_store();
        let a = add(&mut store, 0.0, "A", DeviceType::Server);
        let b = add(&mut store, 200.0, "B", DeviceType::Router);
        store.remove_device(&a).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let snapshot = store.refresh_metrics(&mut rng).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, b);
    }
}
