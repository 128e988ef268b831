//! Device Surface Controller
//!
//! One controller per visible device. It owns the surface, translates
//! in-surface gestures into bus events, applies inbound bus events through
//! `MirrorPolicy`, and keeps the per-surface state flags.
//!
//! Bus handlers run synchronously on the publisher's stack, so state lives
//! behind a std mutex that is never held across a surface call, a publish or
//! an await.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use crate::bus::EventBus;
use crate::device::{Device, DeviceId, Dimensions};
use crate::error::{BusHandlerError, MirrorError, Result};
use crate::events::{BusEvent, Channel, Command, Gesture, MirrorEnvelope, PickingSignal};
use crate::instrumentation::{self, RELOAD_CSS_SCRIPT};
use crate::mirroring::{MirrorPolicy, Routing};
use crate::notify::{Notifier, SessionEvent};
use crate::picking::{self, PickingLock, PickingState};
use crate::surface::{
    channels, LifecycleEvent, LoadFailure, NavigationId, Point, Surface, SurfaceEvent,
    SurfaceMessage,
};

/// Channels every controller subscribes to. Storage clearing, CSS reload and
/// capture are fanned out by the orchestrator instead.
const SUBSCRIBED: [Channel; 10] = [
    Channel::Scroll,
    Channel::Click,
    Channel::ScrollToTop,
    Channel::ScrollToBottom,
    Channel::NavigateBack,
    Channel::NavigateForward,
    Channel::NavigateReload,
    Channel::FlipOrientation,
    Channel::EnablePicking,
    Channel::DisablePicking,
];

/// Address the whole session is showing
#[derive(Clone, Debug, Default)]
pub struct SharedAddress(Arc<RwLock<String>>);

impl SharedAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(address.into())))
    }

    pub fn get(&self) -> String {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, address: impl Into<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = address.into();
    }
}

/// Session-wide collaborators handed to each controller
#[derive(Clone)]
pub struct ControllerContext {
    pub bus: Arc<EventBus>,
    pub picking: Arc<PickingLock>,
    pub notifier: Notifier,
    pub address: SharedAddress,
    pub screenshot_dir: Option<PathBuf>,
    pub zoom: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceStatus {
    Loading,
    Ready,
    Error,
}

#[derive(Debug, Clone)]
pub struct Screenshot {
    pub device: DeviceId,
    pub timestamp: i64,
    pub png: Vec<u8>,
    pub path: Option<PathBuf>,
}

/// Point-in-time copy of a controller's state
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSnapshot {
    pub device: DeviceId,
    pub status: SurfaceStatus,
    pub dimensions: Dimensions,
    pub viewport: Dimensions,
    pub orientation_flipped: bool,
    pub mirroring_enabled: bool,
    pub loading: bool,
    pub load_error: Option<LoadFailure>,
    pub screenshot_in_flight: bool,
    pub picking: PickingState,
    pub url: Option<String>,
    pub zoom: f64,
}

struct ControllerState {
    dimensions: Dimensions,
    orientation_flipped: bool,
    mirroring_enabled: bool,
    loading: bool,
    ready: bool,
    load_error: Option<LoadFailure>,
    screenshot_in_flight: bool,
    picking: PickingState,
    navigation: NavigationId,
    url: Option<String>,
    zoom: f64,
    mounted: bool,
}

impl ControllerState {
    fn viewport(&self, mobile: bool) -> Dimensions {
        if mobile && self.orientation_flipped {
            self.dimensions.rotated()
        } else {
            self.dimensions
        }
    }

    fn status(&self) -> SurfaceStatus {
        if self.load_error.is_some() {
            SurfaceStatus::Error
        } else if self.ready {
            SurfaceStatus::Ready
        } else {
            SurfaceStatus::Loading
        }
    }
}

pub struct DeviceController {
    device: Device,
    surface: Arc<dyn Surface>,
    ctx: ControllerContext,
    transmit_navigator_status: bool,
    state: Mutex<ControllerState>,
}

impl DeviceController {
    pub fn new(device: Device, surface: Arc<dyn Surface>, ctx: ControllerContext) -> Arc<Self> {
        Self::build(device, surface, ctx, false)
    }

    /// Like `new`, but this controller reports back/forward availability
    pub fn with_navigator_status(
        device: Device,
        surface: Arc<dyn Surface>,
        ctx: ControllerContext,
    ) -> Arc<Self> {
        Self::build(device, surface, ctx, true)
    }

    fn build(
        device: Device,
        surface: Arc<dyn Surface>,
        ctx: ControllerContext,
        transmit_navigator_status: bool,
    ) -> Arc<Self> {
        let state = ControllerState {
            dimensions: device.dimensions(),
            orientation_flipped: false,
            mirroring_enabled: true,
            loading: true,
            ready: false,
            load_error: None,
            screenshot_in_flight: false,
            picking: PickingState::Idle,
            navigation: 0,
            url: None,
            zoom: ctx.zoom,
            mounted: false,
        };
        Arc::new(Self {
            device,
            surface,
            ctx,
            transmit_navigator_status,
            state: Mutex::new(state),
        })
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &DeviceId {
        &self.device.id
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn surface(&self) -> &Arc<dyn Surface> {
        &self.surface
    }

    /// Subscribe to the bus and push the initial viewport into the surface
    pub fn mount(self: &Arc<Self>) {
        {
            let mut state = self.state();
            if state.mounted {
                return;
            }
            state.mounted = true;
        }

        for channel in SUBSCRIBED {
            let weak = Arc::downgrade(self);
            self.ctx
                .bus
                .subscribe_owned(channel, self.device.id.clone(), move |event| {
                    match weak.upgrade() {
                        Some(controller) => controller.on_bus_event(event),
                        None => Ok(()),
                    }
                });
        }

        self.push_viewport();
        tracing::info!(device = %self.device.id, "[DeviceController] Mounted");
    }

    /// Drop every bus subscription. The surface receives nothing afterwards.
    pub fn unmount(&self) {
        let removed = self.ctx.bus.unsubscribe_owner(&self.device.id);
        self.state().mounted = false;
        tracing::info!(
            device = %self.device.id,
            "[DeviceController] Unmounted ({} subscriptions removed)",
            removed
        );
    }

    pub fn is_mounted(&self) -> bool {
        self.state().mounted
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let state = self.state();
        ControllerSnapshot {
            device: self.device.id.clone(),
            status: state.status(),
            dimensions: state.dimensions,
            viewport: state.viewport(self.device.is_mobile()),
            orientation_flipped: state.orientation_flipped,
            mirroring_enabled: state.mirroring_enabled,
            loading: state.loading,
            load_error: state.load_error.clone(),
            screenshot_in_flight: state.screenshot_in_flight,
            picking: state.picking,
            url: state.url.clone(),
            zoom: state.zoom,
        }
    }

    pub fn status(&self) -> SurfaceStatus {
        self.state().status()
    }

    pub fn load_error(&self) -> Option<LoadFailure> {
        self.state().load_error.clone()
    }

    pub fn is_mirroring_enabled(&self) -> bool {
        self.state().mirroring_enabled
    }

    pub fn is_capturing(&self) -> bool {
        self.state().screenshot_in_flight
    }

    pub fn picking_state(&self) -> PickingState {
        self.state().picking
    }

    /// True only while this controller is handling a pick
    pub fn is_picking_active(&self) -> bool {
        self.state().picking == PickingState::Picking
    }

    pub fn viewport(&self) -> Dimensions {
        self.state().viewport(self.device.is_mobile())
    }

    // ---- bus side ------------------------------------------------------

    fn on_bus_event(&self, event: &BusEvent) -> std::result::Result<(), BusHandlerError> {
        let mirroring_enabled = self.is_mirroring_enabled();
        if let Routing::Ignore(reason) =
            MirrorPolicy::inbound(event, &self.device.id, mirroring_enabled)
        {
            tracing::debug!(
                device = %self.device.id,
                "[DeviceController] Ignoring {} ({:?})",
                event.channel(),
                reason
            );
            return Ok(());
        }

        match event {
            BusEvent::Mirror(envelope) => self.replay(envelope)?,
            BusEvent::Command(command) => self.apply_command(command)?,
            BusEvent::Picking(PickingSignal::Enable { .. }) => self.arm_picking()?,
            BusEvent::Picking(PickingSignal::Disable { .. }) => self.exit_picking()?,
        }
        Ok(())
    }

    fn replay(&self, envelope: &MirrorEnvelope) -> std::result::Result<(), BusHandlerError> {
        match &envelope.gesture {
            Gesture::Scroll { position } => self.surface.send(
                channels::SCROLL,
                json!({ "x": position.x, "y": position.y }),
            )?,
            Gesture::Click { css_path } => self.surface.send(
                channels::CLICK,
                json!({ "sourceDeviceId": envelope.source_device_id, "cssPath": css_path }),
            )?,
        }
        Ok(())
    }

    fn apply_command(&self, command: &Command) -> std::result::Result<(), BusHandlerError> {
        match command {
            Command::ScrollToTop => self.surface.send(channels::SCROLL_TO_TOP, Value::Null)?,
            Command::ScrollToBottom => self.surface.send(channels::SCROLL_TO_BOTTOM, Value::Null)?,
            Command::NavigateBack => self.go_back()?,
            Command::NavigateForward => self.go_forward()?,
            Command::NavigateReload { ignore_cache } => self.reload(*ignore_cache)?,
            Command::FlipOrientation => {
                self.flip_orientation();
            }
            Command::ReloadCss | Command::DeleteStorage { .. } | Command::CaptureScreenshot { .. } => {
                tracing::debug!(
                    device = %self.device.id,
                    "[DeviceController] {:?} is fanned out by the orchestrator",
                    command
                );
            }
        }
        Ok(())
    }

    fn arm_picking(&self) -> std::result::Result<(), BusHandlerError> {
        {
            let mut state = self.state();
            if state.picking == PickingState::Idle {
                state.picking = PickingState::Armed;
            }
        }
        self.surface.send(channels::ENABLE_INSPECTOR, Value::Null)?;
        self.ctx.notifier.notify(SessionEvent::PickingChanged {
            device: self.device.id.clone(),
            armed: true,
        });
        Ok(())
    }

    fn exit_picking(&self) -> std::result::Result<(), BusHandlerError> {
        {
            let mut state = self.state();
            if state.picking == PickingState::Armed {
                state.picking = PickingState::Idle;
            }
        }
        self.surface.send(channels::DISABLE_INSPECTOR, Value::Null)?;
        self.ctx.notifier.notify(SessionEvent::PickingChanged {
            device: self.device.id.clone(),
            armed: false,
        });
        Ok(())
    }

    /// Publish a gesture captured in this surface
    fn emit(&self, gesture: Gesture) {
        if !MirrorPolicy::outbound(self.is_mirroring_enabled()) {
            tracing::debug!(
                device = %self.device.id,
                "[DeviceController] Unplugged, not mirroring {:?}",
                gesture
            );
            return;
        }
        self.ctx.bus.publish(&BusEvent::Mirror(MirrorEnvelope {
            source_device_id: self.device.id.clone(),
            gesture,
        }));
    }

    // ---- surface side --------------------------------------------------

    /// Pump surface events until the surface's stream closes
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<SurfaceEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_surface_event(event).await;
        }
        tracing::info!(device = %self.device.id, "[DeviceController] Surface event stream closed");
    }

    pub async fn handle_surface_event(self: &Arc<Self>, event: SurfaceEvent) {
        match event {
            SurfaceEvent::Lifecycle(event) => self.on_lifecycle(event).await,
            SurfaceEvent::Message(message) => self.handle_message(message),
        }
    }

    async fn on_lifecycle(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::LoadingStarted { navigation } => {
                {
                    let mut state = self.state();
                    if navigation < state.navigation {
                        tracing::debug!(
                            device = %self.device.id,
                            "[DeviceController] Stale load start {} < {}",
                            navigation,
                            state.navigation
                        );
                        return;
                    }
                    state.navigation = navigation;
                    state.load_error = None;
                    state.loading = true;
                    state.ready = false;
                }
                self.notify_loading(true);
            }

            LifecycleEvent::LoadingStopped { navigation } => {
                {
                    let mut state = self.state();
                    if navigation < state.navigation {
                        return;
                    }
                    state.loading = false;
                }
                self.notify_loading(false);
            }

            LifecycleEvent::LoadFailed {
                navigation,
                failure,
            } => {
                if failure.is_aborted() {
                    tracing::debug!(device = %self.device.id, "[DeviceController] Load aborted");
                    return;
                }
                {
                    let mut state = self.state();
                    if navigation < state.navigation {
                        tracing::debug!(
                            device = %self.device.id,
                            "[DeviceController] Dropping failure of superseded navigation {}",
                            navigation
                        );
                        return;
                    }
                    state.load_error = Some(failure.clone());
                }
                tracing::warn!(
                    device = %self.device.id,
                    "[DeviceController] Load failed: {} {}",
                    failure.code,
                    failure.description
                );
                self.ctx.notifier.notify(SessionEvent::LoadFailed {
                    device: self.device.id.clone(),
                    failure,
                });
            }

            LifecycleEvent::Navigated { url } => {
                self.state().url = Some(url.clone());
                self.report_address(&url);
                if self.transmit_navigator_status {
                    self.ctx.notifier.notify(SessionEvent::NavigatorStatus {
                        back_enabled: self.surface.can_go_back(),
                        forward_enabled: self.surface.can_go_forward(),
                    });
                }
            }

            LifecycleEvent::NavigatedInPage { url } => {
                self.state().url = Some(url.clone());
                self.report_address(&url);
            }

            LifecycleEvent::Ready => {
                self.state().ready = true;
                let script = instrumentation::bootstrap_script(&self.device.id);
                if let Err(e) = self.surface.execute_script(&script).await {
                    tracing::warn!(
                        device = %self.device.id,
                        "[DeviceController] Failed to inject instrumentation: {}",
                        e
                    );
                    return;
                }
                let (mirroring_enabled, armed) = {
                    let state = self.state();
                    (state.mirroring_enabled, state.picking == PickingState::Armed)
                };
                if let Err(e) = self
                    .surface
                    .send(channels::MIRRORING_STATE, Value::Bool(mirroring_enabled))
                {
                    tracing::warn!(device = %self.device.id, "[DeviceController] {}", e);
                }
                if armed {
                    if let Err(e) = self.surface.send(channels::ENABLE_INSPECTOR, Value::Null) {
                        tracing::warn!(device = %self.device.id, "[DeviceController] {}", e);
                    }
                }
            }
        }
    }

    pub fn handle_message(self: &Arc<Self>, message: SurfaceMessage) {
        match message {
            SurfaceMessage::Scroll { position } => self.emit(Gesture::Scroll { position }),
            SurfaceMessage::Click { css_path } => self.emit(Gesture::Click { css_path }),
            SurfaceMessage::OpenInspectorAt { x, y } => {
                self.pick(Point::new(x, y));
            }
            SurfaceMessage::OpenConsole => {
                if let Err(e) = self.surface.toggle_dev_tools() {
                    tracing::warn!(device = %self.device.id, "[DeviceController] {}", e);
                }
            }
            SurfaceMessage::TiltDevice => {
                self.flip_orientation();
            }
            SurfaceMessage::TakeScreenshot => {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    tracing::warn!(
                        device = %self.device.id,
                        "[DeviceController] No runtime to capture on"
                    );
                    return;
                };
                let controller = Arc::clone(self);
                runtime.spawn(async move {
                    if let Err(e) = controller.capture_screenshot(now_millis()).await {
                        tracing::warn!(
                            device = %controller.device.id,
                            "[DeviceController] Screenshot failed: {}",
                            e
                        );
                    }
                });
            }
            SurfaceMessage::ToggleMirroring => {
                self.toggle_mirroring();
            }
        }
    }

    fn notify_loading(&self, loading: bool) {
        self.ctx.notifier.notify(SessionEvent::LoadingChanged {
            device: self.device.id.clone(),
            loading,
        });
    }

    fn report_address(&self, url: &str) {
        if self.ctx.address.get() == url {
            return;
        }
        self.ctx.notifier.notify(SessionEvent::AddressChanged {
            device: self.device.id.clone(),
            url: url.to_string(),
        });
    }

    // ---- operations ----------------------------------------------------

    /// Handle a pick made in this surface. Returns false if it was refused.
    pub fn pick(&self, local: Point) -> bool {
        if self.picking_state() != PickingState::Armed {
            tracing::warn!(
                device = %self.device.id,
                "[DeviceController] Pick received while picking is not armed"
            );
            return false;
        }
        let Some(guard) = self.ctx.picking.try_begin(&self.device.id) else {
            tracing::warn!(
                device = %self.device.id,
                "[DeviceController] Another device is mid-pick, ignoring"
            );
            return false;
        };

        let zoom = {
            let mut state = self.state();
            state.picking = PickingState::Picking;
            state.zoom
        };
        let (x, y) = picking::translate_to_host(local, self.surface.screen_offset(), zoom);
        tracing::info!(
            device = %self.device.id,
            "[DeviceController] Opening inspector at ({}, {})",
            x,
            y
        );
        if let Err(e) = self.surface.inspect_element(x, y) {
            tracing::warn!(device = %self.device.id, "[DeviceController] Inspector failed: {}", e);
        }

        self.state().picking = PickingState::Idle;
        drop(guard);
        self.ctx.notifier.notify(SessionEvent::PickingChanged {
            device: self.device.id.clone(),
            armed: false,
        });
        picking::disarm(&self.ctx.bus, Some(self.device.id.clone()));
        true
    }

    pub fn set_mirroring(&self, enabled: bool) {
        {
            let mut state = self.state();
            if state.mirroring_enabled == enabled {
                return;
            }
            state.mirroring_enabled = enabled;
        }
        if let Err(e) = self
            .surface
            .send(channels::MIRRORING_STATE, Value::Bool(enabled))
        {
            tracing::warn!(device = %self.device.id, "[DeviceController] {}", e);
        }
        self.ctx.notifier.notify(SessionEvent::MirroringChanged {
            device: self.device.id.clone(),
            enabled,
        });
    }

    /// Unplug or re-plug this surface. Returns the new mirroring state.
    pub fn toggle_mirroring(&self) -> bool {
        let enabled = !self.is_mirroring_enabled();
        self.set_mirroring(enabled);
        enabled
    }

    /// Swap the viewport axes. No-op on non-mobile devices.
    pub fn flip_orientation(&self) -> bool {
        if !self.device.is_mobile() {
            return false;
        }
        let (flipped, viewport) = {
            let mut state = self.state();
            state.orientation_flipped = !state.orientation_flipped;
            (state.orientation_flipped, state.viewport(true))
        };
        self.push_viewport();
        self.ctx.notifier.notify(SessionEvent::OrientationChanged {
            device: self.device.id.clone(),
            flipped,
            viewport,
        });
        true
    }

    pub fn resize(&self, dimensions: Dimensions) -> Result<Dimensions> {
        if !self.device.is_resizable() {
            return Err(MirrorError::NotResizable(self.device.id.clone()));
        }
        self.state().dimensions = dimensions;
        self.push_viewport();
        Ok(self.viewport())
    }

    pub fn set_zoom(&self, zoom: f64) {
        self.state().zoom = zoom;
    }

    fn push_viewport(&self) {
        let viewport = self.viewport();
        if let Err(e) = self.surface.set_viewport(viewport) {
            tracing::warn!(device = %self.device.id, "[DeviceController] {}", e);
        }
    }

    pub fn navigate(&self, url: &str) -> Result<()> {
        self.surface.navigate(url)?;
        Ok(())
    }

    pub fn go_back(&self) -> Result<()> {
        self.surface.go_back()?;
        Ok(())
    }

    pub fn go_forward(&self) -> Result<()> {
        self.surface.go_forward()?;
        Ok(())
    }

    pub fn reload(&self, ignore_cache: bool) -> Result<()> {
        self.surface.reload(ignore_cache)?;
        Ok(())
    }

    pub async fn reload_css(&self) -> Result<()> {
        self.surface.execute_script(RELOAD_CSS_SCRIPT).await?;
        Ok(())
    }

    pub async fn clear_storage(&self, storages: &[String]) -> Result<()> {
        self.surface.clear_storage(storages).await?;
        Ok(())
    }

    /// Full-page capture of this surface.
    ///
    /// Fails with `CaptureBusy` while a previous capture of the same device is
    /// still running.
    pub async fn capture_screenshot(&self, timestamp: i64) -> Result<Screenshot> {
        let _in_flight = self.begin_capture()?;

        let png = self.surface.capture_full_page().await?;
        let path = match &self.ctx.screenshot_dir {
            Some(dir) => Some(persist(dir, timestamp, &self.device.id, &png).await?),
            None => None,
        };

        tracing::info!(
            device = %self.device.id,
            "[DeviceController] Captured {} bytes",
            png.len()
        );
        self.ctx.notifier.notify(SessionEvent::ScreenshotCaptured {
            device: self.device.id.clone(),
            timestamp,
            path: path.clone(),
        });

        Ok(Screenshot {
            device: self.device.id.clone(),
            timestamp,
            png,
            path,
        })
    }

    fn begin_capture(&self) -> Result<CaptureGuard<'_>> {
        let mut state = self.state();
        if state.screenshot_in_flight {
            return Err(MirrorError::CaptureBusy {
                device: self.device.id.clone(),
            });
        }
        state.screenshot_in_flight = true;
        Ok(CaptureGuard { controller: self })
    }
}

/// Clears `screenshot_in_flight` however the capture ends
struct CaptureGuard<'a> {
    controller: &'a DeviceController,
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        self.controller.state().screenshot_in_flight = false;
    }
}

async fn persist(dir: &Path, timestamp: i64, device: &DeviceId, png: &[u8]) -> Result<PathBuf> {
    let folder = dir.join(timestamp.to_string());
    tokio::fs::create_dir_all(&folder).await?;
    let name: String = device
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let path = folder.join(format!("{}.png", name));
    tokio::fs::write(&path, png).await?;
    Ok(path)
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Capability;
    use crate::events::ScrollPosition;
    use crate::surface::mock::SurfaceCall;
    use crate::testing::Rig;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_scroll_reaches_others_but_not_origin() {
        let rig = Rig::new(&["a", "b", "c"]);

        rig.message("a", SurfaceMessage::Scroll {
            position: ScrollPosition::new(0.0, 120.0),
        });

        assert!(rig.surface("a").sent(channels::SCROLL).is_empty());
        assert_eq!(rig.surface("b").sent(channels::SCROLL), vec![json!({ "x": 0.0, "y": 120.0 })]);
        assert_eq!(rig.surface("c").sent(channels::SCROLL), vec![json!({ "x": 0.0, "y": 120.0 })]);
    }

    #[test]
    fn test_click_carries_source_and_path() {
        let rig = Rig::new(&["a", "b"]);

        rig.message("b", SurfaceMessage::Click {
            css_path: "body > button".to_string(),
        });

        assert_eq!(
            rig.surface("a").sent(channels::CLICK),
            vec![json!({ "sourceDeviceId": "b", "cssPath": "body > button" })]
        );
        assert!(rig.surface("b").sent(channels::CLICK).is_empty());
    }

    #[test]
    fn test_unplugged_surface_neither_sends_nor_receives() {
        let rig = Rig::new(&["a", "b"]);
        rig.controller("b").set_mirroring(false);

        rig.message("a", SurfaceMessage::Scroll {
            position: ScrollPosition::new(0.0, 50.0),
        });
        rig.message("b", SurfaceMessage::Click {
            css_path: "a".to_string(),
        });
        rig.bus.publish(&BusEvent::from(Command::ScrollToTop));

        assert!(rig.surface("b").sent(channels::SCROLL).is_empty());
        assert!(rig.surface("b").sent(channels::SCROLL_TO_TOP).is_empty());
        assert!(rig.surface("a").sent(channels::CLICK).is_empty());
        assert_eq!(rig.surface("a").sent(channels::SCROLL_TO_TOP).len(), 1);
    }

    #[test]
    fn test_unplugged_surface_still_obeys_navigation() {
        let rig = Rig::new(&["a", "b"]);
        rig.controller("b").set_mirroring(false);

        rig.bus.publish(&BusEvent::from(Command::NavigateBack));
        rig.bus.publish(&BusEvent::from(Command::NavigateReload { ignore_cache: true }));

        for id in ["a", "b"] {
            assert_eq!(rig.surface(id).count(&SurfaceCall::GoBack), 1);
            assert_eq!(
                rig.surface(id).count(&SurfaceCall::Reload { ignore_cache: true }),
                1
            );
        }
    }

    #[test]
    fn test_toggle_mirroring_notifies_own_surface_only() {
        let rig = Rig::new(&["a", "b"]);
        let mut events = rig.notifier.subscribe();

        rig.message("a", SurfaceMessage::ToggleMirroring);

        assert!(!rig.controller("a").is_mirroring_enabled());
        assert_eq!(rig.surface("a").sent(channels::MIRRORING_STATE), vec![json!(false)]);
        assert!(rig.surface("b").sent(channels::MIRRORING_STATE).is_empty());
        assert!(rig.controller("b").is_mirroring_enabled());
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::MirroringChanged {
                device: DeviceId::from("a"),
                enabled: false
            }
        );

        assert!(rig.controller("a").toggle_mirroring());
        assert_eq!(
            rig.surface("a").sent(channels::MIRRORING_STATE),
            vec![json!(false), json!(true)]
        );
    }

    #[tokio::test]
    async fn test_load_failure_lifecycle() {
        let rig = Rig::new(&["a"]);
        let a = rig.controller("a");

        a.handle_surface_event(LifecycleEvent::LoadingStarted { navigation: 1 }.into())
            .await;
        assert_eq!(a.status(), SurfaceStatus::Loading);

        a.handle_surface_event(
            LifecycleEvent::LoadFailed {
                navigation: 1,
                failure: LoadFailure::new(LoadFailure::ABORTED, "ERR_ABORTED"),
            }
            .into(),
        )
        .await;
        assert_eq!(a.load_error(), None);

        a.handle_surface_event(
            LifecycleEvent::LoadFailed {
                navigation: 1,
                failure: LoadFailure::new(-105, "ERR_NAME_NOT_RESOLVED"),
            }
            .into(),
        )
        .await;
        assert_eq!(a.status(), SurfaceStatus::Error);
        assert_eq!(a.load_error().unwrap().code, -105);
        assert!(a.is_mounted());

        a.handle_surface_event(LifecycleEvent::LoadingStarted { navigation: 2 }.into())
            .await;
        assert_eq!(a.load_error(), None);
        assert_eq!(a.status(), SurfaceStatus::Loading);

        a.handle_surface_event(LifecycleEvent::Ready.into()).await;
        assert_eq!(a.status(), SurfaceStatus::Ready);
    }

    #[tokio::test]
    async fn test_superseded_navigation_failure_is_dropped() {
        let rig = Rig::new(&["a"]);
        let a = rig.controller("a");

        a.handle_surface_event(LifecycleEvent::LoadingStarted { navigation: 1 }.into())
            .await;
        a.handle_surface_event(LifecycleEvent::LoadingStarted { navigation: 2 }.into())
            .await;
        a.handle_surface_event(LifecycleEvent::LoadingStopped { navigation: 2 }.into())
            .await;
        a.handle_surface_event(
            LifecycleEvent::LoadFailed {
                navigation: 1,
                failure: LoadFailure::new(-118, "ERR_CONNECTION_TIMED_OUT"),
            }
            .into(),
        )
        .await;

        let snapshot = a.snapshot();
        assert_eq!(snapshot.load_error, None);
        assert!(!snapshot.loading);
    }

    #[tokio::test]
    async fn test_ready_injects_instrumentation() {
        let rig = Rig::new(&["a"]);
        let a = rig.controller("a");

        a.handle_surface_event(LifecycleEvent::Ready.into()).await;

        let calls = rig.surface("a").calls();
        assert!(calls.iter().any(|call| matches!(
            call,
            SurfaceCall::Script(src) if src.contains("deviceId: \"a\"")
        )));
        assert_eq!(rig.surface("a").sent(channels::MIRRORING_STATE), vec![json!(true)]);
    }

    #[tokio::test]
    async fn test_navigation_notifications() {
        let rig = Rig::with_address(&["a", "b"], "https://example.com/");
        let mut events = rig.notifier.subscribe();

        rig.controller("a")
            .handle_surface_event(
                LifecycleEvent::Navigated {
                    url: "https://example.com/".to_string(),
                }
                .into(),
            )
            .await;
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::NavigatorStatus {
                back_enabled: true,
                forward_enabled: false
            }
        );

        rig.controller("b")
            .handle_surface_event(
                LifecycleEvent::NavigatedInPage {
                    url: "https://example.com/#pricing".to_string(),
                }
                .into(),
            )
            .await;
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::AddressChanged {
                device: DeviceId::from("b"),
                url: "https://example.com/#pricing".to_string()
            }
        );

        rig.controller("b")
            .handle_surface_event(
                LifecycleEvent::Navigated {
                    url: "https://example.com/".to_string(),
                }
                .into(),
            )
            .await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_capture_on_same_device_is_busy() {
        let rig = Rig::new(&["a"]);
        let a = rig.controller("a");
        rig.surface("a").hold_captures();

        let mut first = task::spawn(a.capture_screenshot(1));
        assert_pending!(first.poll());
        assert!(a.is_capturing());

        let second = a.capture_screenshot(2).await;
        assert!(matches!(second, Err(MirrorError::CaptureBusy { .. })));

        rig.surface("a").release_capture();
        let shot = assert_ready!(first.poll()).unwrap();
        assert_eq!(shot.timestamp, 1);
        assert!(!a.is_capturing());

        rig.surface("a").release_capture();
        assert!(a.capture_screenshot(3).await.is_ok());
    }

    #[tokio::test]
    async fn test_capture_writes_file_when_configured() {
        let dir = std::env::temp_dir().join(format!("mirror-shots-{}", now_millis()));
        let rig = Rig::with_screenshot_dir(&["phone/1"], dir.clone());

        let shot = rig
            .controller("phone/1")
            .capture_screenshot(42)
            .await
            .unwrap();

        let path = shot.path.unwrap();
        assert_eq!(path, dir.join("42").join("phone-1.png"));
        assert_eq!(std::fs::read(&path).unwrap(), shot.png);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_unmount_stops_delivery() {
        let rig = Rig::new(&["a", "b"]);
        rig.controller("b").unmount();

        rig.message("a", SurfaceMessage::Scroll {
            position: ScrollPosition::new(0.0, 10.0),
        });
        rig.bus.publish(&BusEvent::from(Command::NavigateForward));

        assert!(rig.surface("b").calls().iter().all(|call| matches!(call, SurfaceCall::Viewport(_))));
        assert_eq!(rig.bus.subscriber_count(Channel::Scroll), 1);
    }

    #[test]
    fn test_flip_orientation() {
        let rig = Rig::from_devices(vec![
            Device::new("phone", 375, 812).with_capability(Capability::Mobile),
            Device::new("desktop", 1280, 800),
        ]);

        rig.bus.publish(&BusEvent::from(Command::FlipOrientation));

        let phone = rig.controller("phone").snapshot();
        assert!(phone.orientation_flipped);
        assert_eq!(phone.viewport, Dimensions::new(812, 375));
        assert_eq!(
            rig.surface("phone").calls().last(),
            Some(&SurfaceCall::Viewport(Dimensions::new(812, 375)))
        );

        let desktop = rig.controller("desktop").snapshot();
        assert!(!desktop.orientation_flipped);
        assert_eq!(desktop.viewport, Dimensions::new(1280, 800));
    }

    #[test]
    fn test_resize_requires_capability() {
        let rig = Rig::from_devices(vec![
            Device::new("fluid", 800, 600).with_capability(Capability::ResponsiveResize),
            Device::new("fixed", 800, 600),
        ]);

        assert_eq!(
            rig.controller("fluid").resize(Dimensions::new(640, 480)).unwrap(),
            Dimensions::new(640, 480)
        );
        assert!(matches!(
            rig.controller("fixed").resize(Dimensions::new(640, 480)),
            Err(MirrorError::NotResizable(_))
        ));
    }

    #[test]
    fn test_pick_without_arming_is_refused() {
        let rig = Rig::new(&["a", "b"]);

        assert!(!rig.controller("a").pick(Point::new(1.0, 1.0)));
        assert!(rig
            .surface("a")
            .calls()
            .iter()
            .all(|call| !matches!(call, SurfaceCall::Inspect { .. })));
    }
}
