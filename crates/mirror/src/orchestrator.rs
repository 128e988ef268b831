//! Cross-Surface Operation Orchestrator
//!
//! Runs an operation once against every registered controller, regardless of
//! mirroring state. Synchronous commands go out over the bus; operations with
//! a round trip (capture, storage clearing, CSS reload) are awaited per
//! controller and report one outcome per device. Individual failures never
//! stop the others.

use futures_util::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use crate::bus::{EventBus, SubscriptionId};
use crate::controller::{now_millis, DeviceController, Screenshot, SharedAddress};
use crate::device::DeviceId;
use crate::error::{BusHandlerError, MirrorError, Result};
use crate::events::{BusEvent, Channel, Command};
use crate::notify::{Notifier, SessionEvent};
use crate::picking;

/// One result per device, in registration order
pub type Outcomes<T> = Vec<(DeviceId, Result<T>)>;

#[derive(Debug)]
pub struct CaptureReport {
    pub timestamp: i64,
    pub results: Outcomes<Screenshot>,
}

impl CaptureReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

pub struct Orchestrator {
    bus: Arc<EventBus>,
    notifier: Notifier,
    address: SharedAddress,
    controllers: RwLock<Vec<Arc<DeviceController>>>,
    /// Capture sweeps currently running
    capturing: AtomicUsize,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl Orchestrator {
    pub fn new(bus: Arc<EventBus>, notifier: Notifier, address: SharedAddress) -> Arc<Self> {
        Arc::new(Self {
            bus,
            notifier,
            address,
            controllers: RwLock::new(Vec::new()),
            capturing: AtomicUsize::new(0),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Listen for bus-originated capture, CSS reload and storage commands
    pub fn attach(self: &Arc<Self>) {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !subscriptions.is_empty() {
            return;
        }
        for channel in [Channel::CaptureScreenshot, Channel::ReloadCss, Channel::DeleteStorage] {
            let weak = Arc::downgrade(self);
            subscriptions.push(
                self.bus
                    .subscribe(channel, move |event| Self::on_bus_event(&weak, event)),
            );
        }
    }

    pub fn detach(&self) {
        let subscriptions = std::mem::take(
            &mut *self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for id in subscriptions {
            self.bus.unsubscribe(id);
        }
    }

    fn on_bus_event(weak: &Weak<Self>, event: &BusEvent) -> std::result::Result<(), BusHandlerError> {
        let Some(orchestrator) = weak.upgrade() else {
            return Ok(());
        };
        let BusEvent::Command(command) = event else {
            return Ok(());
        };
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| BusHandlerError::new(format!("no async runtime to run {}", event.channel())))?;

        match command.clone() {
            Command::CaptureScreenshot { timestamp } => {
                runtime.spawn(async move {
                    let report = orchestrator.capture_all(timestamp).await;
                    tracing::info!(
                        "[Orchestrator] Capture {} finished: {} ok, {} failed",
                        report.timestamp,
                        report.succeeded(),
                        report.failed()
                    );
                });
            }
            Command::ReloadCss => {
                runtime.spawn(async move {
                    orchestrator.reload_css().await;
                });
            }
            Command::DeleteStorage { storages } => {
                runtime.spawn(async move {
                    orchestrator.clear_storage(&storages).await;
                });
            }
            _ => {}
        }
        Ok(())
    }

    // ---- registry ------------------------------------------------------

    pub fn register(&self, controller: Arc<DeviceController>) {
        let mut controllers = self.controllers.write().unwrap_or_else(PoisonError::into_inner);
        if controllers.iter().any(|c| c.id() == controller.id()) {
            tracing::warn!("[Orchestrator] Device {} already registered", controller.id());
            return;
        }
        controllers.push(controller);
    }

    pub fn unregister(&self, id: &DeviceId) -> Option<Arc<DeviceController>> {
        let mut controllers = self.controllers.write().unwrap_or_else(PoisonError::into_inner);
        let pos = controllers.iter().position(|c| c.id() == id)?;
        Some(controllers.remove(pos))
    }

    /// Registered controllers, in registration order
    pub fn controllers(&self) -> Vec<Arc<DeviceController>> {
        self.controllers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn controller(&self, id: &DeviceId) -> Result<Arc<DeviceController>> {
        self.controllers()
            .into_iter()
            .find(|c| c.id() == id)
            .ok_or_else(|| MirrorError::UnknownDevice(id.clone()))
    }

    /// Number of controllers currently mid-pick. Never more than one.
    pub fn picking_count(&self) -> usize {
        self.controllers()
            .iter()
            .filter(|c| c.is_picking_active())
            .count()
    }

    // ---- awaited fan-out -----------------------------------------------

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst) > 0
    }

    /// Capture every surface. Devices already capturing report `CaptureBusy`.
    pub async fn capture_all(&self, timestamp: Option<i64>) -> CaptureReport {
        let timestamp = timestamp.unwrap_or_else(now_millis);
        let _sweep = CaptureSweep::begin(self);

        let controllers = self.controllers();
        tracing::info!(
            "[Orchestrator] Capturing {} devices at {}",
            controllers.len(),
            timestamp
        );
        let results = join_all(controllers.iter().map(|controller| async move {
            (
                controller.id().clone(),
                controller.capture_screenshot(timestamp).await,
            )
        }))
        .await;

        for (device, result) in &results {
            if let Err(e) = result {
                tracing::warn!(device = %device, "[Orchestrator] Capture failed: {}", e);
            }
        }
        CaptureReport { timestamp, results }
    }

    pub async fn clear_storage(&self, storages: &[String]) -> Outcomes<()> {
        let controllers = self.controllers();
        let results = join_all(controllers.iter().map(|controller| async move {
            (controller.id().clone(), controller.clear_storage(storages).await)
        }))
        .await;
        log_failures("clear storage", &results);
        results
    }

    pub async fn reload_css(&self) -> Outcomes<()> {
        let controllers = self.controllers();
        let results = join_all(controllers.iter().map(|controller| async move {
            (controller.id().clone(), controller.reload_css().await)
        }))
        .await;
        log_failures("reload CSS", &results);
        results
    }

    // ---- broadcast commands --------------------------------------------

    fn broadcast(&self, command: Command) -> usize {
        self.bus.publish(&BusEvent::Command(command))
    }

    pub fn navigate_back(&self) -> usize {
        self.broadcast(Command::NavigateBack)
    }

    pub fn navigate_forward(&self) -> usize {
        self.broadcast(Command::NavigateForward)
    }

    pub fn reload(&self, ignore_cache: bool) -> usize {
        self.broadcast(Command::NavigateReload { ignore_cache })
    }

    pub fn flip_orientation(&self) -> usize {
        self.broadcast(Command::FlipOrientation)
    }

    pub fn scroll_to_top(&self) -> usize {
        self.broadcast(Command::ScrollToTop)
    }

    pub fn scroll_to_bottom(&self) -> usize {
        self.broadcast(Command::ScrollToBottom)
    }

    pub fn enable_picking(&self) -> usize {
        picking::arm(&self.bus)
    }

    /// Cancel picking mode everywhere without a pick
    pub fn disable_picking(&self) -> usize {
        picking::disarm(&self.bus, None)
    }

    // ---- address -------------------------------------------------------

    pub fn address(&self) -> String {
        self.address.get()
    }

    /// Point every surface at `url`
    pub fn open(&self, url: &str) -> Outcomes<()> {
        self.address.set(url);
        self.controllers()
            .iter()
            .map(|controller| (controller.id().clone(), controller.navigate(url)))
            .collect()
    }

    /// Follow a navigation that happened inside one surface. Returns how many
    /// other surfaces were sent to the new address.
    pub fn follow(&self, source: &DeviceId, url: &str) -> usize {
        if self.address.get() == url {
            return 0;
        }
        self.address.set(url);
        let mut navigated = 0;
        for controller in self.controllers() {
            if controller.id() == source {
                continue;
            }
            match controller.navigate(url) {
                Ok(()) => navigated += 1,
                Err(e) => tracing::warn!(
                    device = %controller.id(),
                    "[Orchestrator] Failed to follow {}: {}",
                    url,
                    e
                ),
            }
        }
        navigated
    }

    pub fn set_zoom(&self, zoom: f64) {
        for controller in self.controllers() {
            controller.set_zoom(zoom);
        }
    }
}

fn log_failures(operation: &str, results: &Outcomes<()>) {
    for (device, result) in results {
        if let Err(e) = result {
            tracing::warn!(device = %device, "[Orchestrator] Failed to {}: {}", operation, e);
        }
    }
}

/// Keeps the session-wide "capture in progress" flag raised while alive
struct CaptureSweep<'a> {
    orchestrator: &'a Orchestrator,
}

impl<'a> CaptureSweep<'a> {
    fn begin(orchestrator: &'a Orchestrator) -> Self {
        if orchestrator.capturing.fetch_add(1, Ordering::SeqCst) == 0 {
            orchestrator
                .notifier
                .notify(SessionEvent::CaptureProgress { in_progress: true });
        }
        Self { orchestrator }
    }
}

impl Drop for CaptureSweep<'_> {
    fn drop(&mut self) {
        if self.orchestrator.capturing.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.orchestrator
                .notifier
                .notify(SessionEvent::CaptureProgress { in_progress: false });
        }
    }
}
