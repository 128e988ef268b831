//! Mirror Session
//!
//! The top-level handle: owns the bus, the orchestrator and one controller per
//! open device, and optionally a browser connection that surfaces are opened
//! in.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::cdp::{CDPClient, CDPSession, CdpSurface};
use crate::config::MirrorConfig;
use crate::controller::{ControllerContext, DeviceController, SharedAddress};
use crate::device::{Device, DeviceId};
use crate::error::{MirrorError, Result};
use crate::notify::{Notifier, SessionEvent};
use crate::orchestrator::Orchestrator;
use crate::picking::PickingLock;
use crate::surface::{Surface, SurfaceEvent};

pub struct MirrorSession {
    pub config: MirrorConfig,
    bus: Arc<EventBus>,
    notifier: Notifier,
    picking: Arc<PickingLock>,
    address: SharedAddress,
    orchestrator: Arc<Orchestrator>,

    cdp_client: Arc<RwLock<Option<Arc<CDPClient>>>>,

    /// Surface event pumps, one per device
    pumps: Mutex<HashMap<DeviceId, JoinHandle<()>>>,
    follower: Mutex<Option<JoinHandle<()>>>,
}

impl MirrorSession {
    pub fn new(config: MirrorConfig) -> Result<Self> {
        config.validate()?;

        let bus = Arc::new(EventBus::new());
        let notifier = Notifier::new(config.notify_capacity);
        let address = SharedAddress::new(config.address.clone());
        let orchestrator = Orchestrator::new(bus.clone(), notifier.clone(), address.clone());
        orchestrator.attach();

        Ok(Self {
            config,
            bus,
            notifier,
            picking: Arc::new(PickingLock::new()),
            address,
            orchestrator,
            cdp_client: Arc::new(RwLock::new(None)),
            pumps: Mutex::new(HashMap::new()),
            follower: Mutex::new(None),
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.notifier.subscribe()
    }

    pub fn address(&self) -> String {
        self.address.get()
    }

    fn context(&self) -> ControllerContext {
        ControllerContext {
            bus: self.bus.clone(),
            picking: self.picking.clone(),
            notifier: self.notifier.clone(),
            address: self.address.clone(),
            screenshot_dir: self.config.screenshot_dir.clone(),
            zoom: self.config.zoom_level,
        }
    }

    /// Connect to the browser at `config.cdp_url`
    pub async fn connect(&self) -> Result<()> {
        let client =
            CDPClient::connect_with_timeout(&self.config.cdp_url, self.config.request_timeout())
                .await?;
        *self.cdp_client.write().await = Some(client);
        tracing::info!("[MirrorSession] {} connected", self.config.id);
        Ok(())
    }

    /// Open a new browser page emulating `device`
    pub async fn open_device(&self, device: Device) -> Result<Arc<DeviceController>> {
        let client = self
            .cdp_client
            .read()
            .await
            .as_ref()
            .ok_or(MirrorError::NotConnected)?
            .clone();

        if self.orchestrator.controller(&device.id).is_ok() {
            return Err(MirrorError::DeviceExists(device.id));
        }
        let page = CDPSession::open(client, "about:blank").await?;
        let (surface, events) = CdpSurface::attach(page, device.clone()).await?;
        self.add_device(device, surface, events).await
    }

    /// Put a device on the session over an existing surface. The surface is
    /// sent to the session address.
    pub async fn add_device(
        &self,
        device: Device,
        surface: Arc<dyn Surface>,
        events: mpsc::UnboundedReceiver<SurfaceEvent>,
    ) -> Result<Arc<DeviceController>> {
        if self.orchestrator.controller(&device.id).is_ok() {
            return Err(MirrorError::DeviceExists(device.id));
        }

        // The first device reports back/forward availability for the toolbar
        let controller = if self.orchestrator.controllers().is_empty() {
            DeviceController::with_navigator_status(device, surface, self.context())
        } else {
            DeviceController::new(device, surface, self.context())
        };
        controller.mount();
        self.orchestrator.register(controller.clone());

        let pump = tokio::spawn(controller.clone().run(events));
        self.pumps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(controller.id().clone(), pump);
        self.ensure_follower();

        controller.navigate(&self.address.get())?;
        tracing::info!(device = %controller.id(), "[MirrorSession] Device added");
        Ok(controller)
    }

    pub async fn remove_device(&self, id: &DeviceId) -> Result<()> {
        let controller = self
            .orchestrator
            .unregister(id)
            .ok_or_else(|| MirrorError::UnknownDevice(id.clone()))?;
        controller.unmount();
        if let Some(pump) = self
            .pumps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
        {
            pump.abort();
        }
        tracing::info!(device = %id, "[MirrorSession] Device removed");
        Ok(())
    }

    /// Point every device at `url`
    pub fn open(&self, url: &str) -> Result<()> {
        for (device, result) in self.orchestrator.open(url) {
            if let Err(e) = result {
                tracing::warn!(device = %device, "[MirrorSession] Failed to open {}: {}", url, e);
            }
        }
        Ok(())
    }

    /// Navigate everyone else when one surface navigates on its own
    fn ensure_follower(&self) {
        if !self.config.follow_address_changes {
            return;
        }
        let mut follower = self.follower.lock().unwrap_or_else(PoisonError::into_inner);
        if follower.is_some() {
            return;
        }

        let mut events = self.notifier.subscribe();
        let orchestrator = self.orchestrator.clone();
        *follower = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::AddressChanged { device, url }) => {
                        let navigated = orchestrator.follow(&device, &url);
                        tracing::debug!(
                            "[MirrorSession] {} navigated to {}, {} devices followed",
                            device,
                            url,
                            navigated
                        );
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("[MirrorSession] Address follower missed {} events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Tear down every device and the browser connection
    pub async fn stop(&self) -> Result<()> {
        if let Some(follower) = self
            .follower
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            follower.abort();
        }

        for controller in self.orchestrator.controllers() {
            self.remove_device(controller.id()).await?;
        }
        self.orchestrator.detach();

        if let Some(client) = self.cdp_client.write().await.take() {
            client.close().await?;
        }
        tracing::info!("[MirrorSession] {} stopped", self.config.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ScrollPosition;
    use crate::surface::mock::{RecordingSurface, SurfaceCall};
    use crate::surface::{channels, LifecycleEvent, SurfaceMessage};

    struct Attached {
        surface: Arc<RecordingSurface>,
        events: mpsc::UnboundedSender<SurfaceEvent>,
    }

    async fn attach(session: &MirrorSession, id: &str) -> Attached {
        let surface = Arc::new(RecordingSurface::new());
        let (events, rx) = mpsc::unbounded_channel();
        session
            .add_device(Device::new(id, 400, 800), surface.clone(), rx)
            .await
            .unwrap();
        Attached { surface, events }
    }

    async fn settle<F: FnMut() -> bool>(mut done: F) {
        for _ in 0..50 {
            if done() {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    fn session() -> MirrorSession {
        MirrorSession::new(MirrorConfig {
            address: "https://example.com/".to_string(),
            ..MirrorConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_added_device_opens_session_address() {
        let session = session();
        let a = attach(&session, "a").await;

        assert_eq!(
            a.surface
                .count(&SurfaceCall::Navigate("https://example.com/".to_string())),
            1
        );
        assert_eq!(session.orchestrator().controllers().len(), 1);

        let duplicate = session
            .add_device(
                Device::new("a", 1, 1),
                Arc::new(RecordingSurface::new()),
                mpsc::unbounded_channel().1,
            )
            .await;
        assert!(matches!(duplicate, Err(MirrorError::DeviceExists(_))));
    }

    #[tokio::test]
    async fn test_surface_events_are_pumped() {
        let session = session();
        let a = attach(&session, "a").await;
        let b = attach(&session, "b").await;

        a.events
            .send(
                SurfaceMessage::Scroll {
                    position: ScrollPosition::new(0.0, 30.0),
                }
                .into(),
            )
            .unwrap();

        settle(|| !b.surface.sent(channels::SCROLL).is_empty()).await;
        assert_eq!(b.surface.sent(channels::SCROLL).len(), 1);
    }

    #[tokio::test]
    async fn test_in_page_navigation_is_followed() {
        let session = session();
        let a = attach(&session, "a").await;
        let b = attach(&session, "b").await;
        let c = attach(&session, "c").await;
        let next = SurfaceCall::Navigate("https://example.com/pricing".to_string());

        b.events
            .send(
                LifecycleEvent::NavigatedInPage {
                    url: "https://example.com/pricing".to_string(),
                }
                .into(),
            )
            .unwrap();

        settle(|| a.surface.count(&next) == 1 && c.surface.count(&next) == 1).await;
        assert_eq!(a.surface.count(&next), 1);
        assert_eq!(c.surface.count(&next), 1);
        assert_eq!(b.surface.count(&next), 0);
        assert_eq!(session.address(), "https://example.com/pricing");
    }

    #[tokio::test]
    async fn test_follow_can_be_disabled() {
        let session = MirrorSession::new(MirrorConfig {
            follow_address_changes: false,
            ..MirrorConfig::default()
        })
        .unwrap();
        let a = attach(&session, "a").await;
        let b = attach(&session, "b").await;
        let mut events = session.subscribe();

        b.events
            .send(
                LifecycleEvent::Navigated {
                    url: "https://elsewhere.test/".to_string(),
                }
                .into(),
            )
            .unwrap();
        settle(|| events.try_recv().is_ok()).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            a.surface
                .count(&SurfaceCall::Navigate("https://elsewhere.test/".to_string())),
            0
        );
        assert_eq!(session.address(), "about:blank");
    }

    #[tokio::test]
    async fn test_remove_device_stops_mirroring_to_it() {
        let session = session();
        let a = attach(&session, "a").await;
        let b = attach(&session, "b").await;

        session.remove_device(&DeviceId::from("b")).await.unwrap();
        session.orchestrator().scroll_to_top();

        assert_eq!(a.surface.sent(channels::SCROLL_TO_TOP).len(), 1);
        assert!(b.surface.sent(channels::SCROLL_TO_TOP).is_empty());
        assert!(matches!(
            session.remove_device(&DeviceId::from("b")).await,
            Err(MirrorError::UnknownDevice(_))
        ));
    }

    #[tokio::test]
    async fn test_open_device_needs_connection() {
        let session = session();
        let result = session.open_device(Device::new("a", 400, 800)).await;
        assert!(matches!(result, Err(MirrorError::NotConnected)));
    }

    #[tokio::test]
    async fn test_stop_clears_devices() {
        let session = session();
        attach(&session, "a").await;
        attach(&session, "b").await;

        session.stop().await.unwrap();
        assert!(session.orchestrator().controllers().is_empty());
        assert_eq!(session.bus().subscriber_count(crate::events::Channel::Scroll), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = MirrorSession::new(MirrorConfig {
            zoom_level: 0.0,
            ..MirrorConfig::default()
        });
        assert!(matches!(result, Err(MirrorError::Config(_))));
    }

    #[tokio::test]
    #[ignore] // Needs running Chrome
    async fn test_live_session() {
        let session = MirrorSession::new(MirrorConfig {
            cdp_url: "ws://localhost:9222/devtools/browser".to_string(),
            address: "https://example.com".to_string(),
            ..MirrorConfig::default()
        })
        .unwrap();
        session.connect().await.unwrap();

        session
            .open_device(Device::new("iphone", 375, 812))
            .await
            .unwrap();
        session
            .open_device(Device::new("desktop", 1280, 800))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        let report = session.orchestrator().capture_all(None).await;
        assert_eq!(report.failed(), 0);

        session.stop().await.unwrap();
    }
}
