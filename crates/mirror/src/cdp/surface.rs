//! Surface backed by a Chrome page target
//!
//! Fire-and-forget surface commands are spawned onto the runtime that attached
//! the surface and log their failures. Page events for this target are turned
//! into `SurfaceEvent`s and streamed to the controller.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use url::Url;

use super::client::{CDPError, EventCallback, EventSubscription};
use super::protocol::{CDPEvent, NavigationHistory};
use super::session::CDPSession;
use crate::device::{Device, Dimensions};
use crate::error::SurfaceError;
use crate::instrumentation::{self, HOST_BINDING};
use crate::surface::{
    LifecycleEvent, LoadFailure, NavigationId, Point, Surface, SurfaceEvent, SurfaceMessage,
    SurfaceResult,
};

/// Page events a surface listens to
const PAGE_EVENTS: [&str; 7] = [
    "Page.frameStartedLoading",
    "Page.frameStoppedLoading",
    "Page.frameNavigated",
    "Page.navigatedWithinDocument",
    "Page.domContentEventFired",
    "Network.loadingFailed",
    "Runtime.bindingCalled",
];

/// Map a Chromium `net::ERR_*` string to its numeric code
pub fn net_error_code(error_text: &str) -> i32 {
    match error_text.trim_start_matches("net::") {
        "ERR_ABORTED" => LoadFailure::ABORTED,
        "ERR_CONNECTION_REFUSED" => -102,
        "ERR_NAME_NOT_RESOLVED" => -105,
        "ERR_INTERNET_DISCONNECTED" => -106,
        "ERR_CONNECTION_TIMED_OUT" => -118,
        "ERR_CERT_AUTHORITY_INVALID" => -202,
        _ => -2,
    }
}

/// Storage names as the host UI spells them, mapped to CDP storage types
pub fn storage_type(name: &str) -> Option<&'static str> {
    Some(match name.to_ascii_lowercase().as_str() {
        "appcache" => "appcache",
        "cookies" => "cookies",
        "filesystem" => "file_systems",
        "indexdb" | "indexeddb" => "indexeddb",
        "localstorage" => "local_storage",
        "shadercache" => "shader_cache",
        "websql" => "websql",
        "serviceworkers" => "service_workers",
        "cachestorage" => "cache_storage",
        _ => return None,
    })
}

fn storage_types(storages: &[String]) -> String {
    if storages.is_empty() {
        return "all".to_string();
    }
    let mut types: Vec<&str> = Vec::new();
    for name in storages {
        match storage_type(name) {
            Some(kind) if !types.contains(&kind) => types.push(kind),
            Some(_) => {}
            None => tracing::warn!("[CdpSurface] Unknown storage type {}", name),
        }
    }
    types.join(",")
}

/// Serialized origin of a page URL, if it has a tuple origin
fn origin_of(url: &str) -> Option<String> {
    let origin = Url::parse(url).ok()?.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Tracks the main frame of one target and translates its events
#[derive(Debug)]
struct PageTracker {
    main_frame: String,
    navigation: NavigationId,
    url: String,
    can_go_back: bool,
    can_go_forward: bool,
}

impl PageTracker {
    fn new(main_frame: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            main_frame: main_frame.into(),
            navigation: 0,
            url: url.into(),
            can_go_back: false,
            can_go_forward: false,
        }
    }

    fn is_main_frame(&self, frame_id: Option<&str>) -> bool {
        frame_id == Some(self.main_frame.as_str())
    }

    fn on_event(&mut self, event: &CDPEvent) -> Option<SurfaceEvent> {
        let params = event.params.as_ref();
        let lifecycle = match event.method.as_str() {
            "Page.frameStartedLoading" => {
                if !self.is_main_frame(event.param_str("frameId")) {
                    return None;
                }
                self.navigation += 1;
                LifecycleEvent::LoadingStarted {
                    navigation: self.navigation,
                }
            }
            "Page.frameStoppedLoading" => {
                if !self.is_main_frame(event.param_str("frameId")) {
                    return None;
                }
                LifecycleEvent::LoadingStopped {
                    navigation: self.navigation,
                }
            }
            "Page.frameNavigated" => {
                let frame = params?.get("frame")?;
                if frame.get("parentId").is_some()
                    || !self.is_main_frame(frame.get("id").and_then(Value::as_str))
                {
                    return None;
                }
                let url = frame.get("url")?.as_str()?.to_string();
                self.url = url.clone();
                LifecycleEvent::Navigated { url }
            }
            "Page.navigatedWithinDocument" => {
                if !self.is_main_frame(event.param_str("frameId")) {
                    return None;
                }
                let url = event.param_str("url")?.to_string();
                self.url = url.clone();
                LifecycleEvent::NavigatedInPage { url }
            }
            "Page.domContentEventFired" => LifecycleEvent::Ready,
            "Network.loadingFailed" => {
                if event.param_str("type") != Some("Document") {
                    return None;
                }
                let canceled = params
                    .and_then(|p| p.get("canceled"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let text = event.param_str("errorText").unwrap_or("net::ERR_FAILED");
                let code = if canceled {
                    LoadFailure::ABORTED
                } else {
                    net_error_code(text)
                };
                LifecycleEvent::LoadFailed {
                    navigation: self.navigation,
                    failure: LoadFailure::new(code, text),
                }
            }
            "Runtime.bindingCalled" => {
                if event.param_str("name") != Some(HOST_BINDING) {
                    return None;
                }
                let raw = event.param_str("payload")?;
                return match SurfaceMessage::parse(raw) {
                    Ok(message) => Some(SurfaceEvent::Message(message)),
                    Err(e) => {
                        tracing::warn!("[CdpSurface] Unreadable instrumentation message: {}", e);
                        None
                    }
                };
            }
            _ => return None,
        };
        Some(SurfaceEvent::Lifecycle(lifecycle))
    }

    fn apply_history(&mut self, history: &NavigationHistory) {
        self.can_go_back = history.can_go_back();
        self.can_go_forward = history.can_go_forward();
    }
}

pub struct CdpSurface {
    session: CDPSession,
    runtime: Handle,
    device: Device,
    tracker: Arc<Mutex<PageTracker>>,
    offset: Mutex<Point>,
    subscriptions: Vec<EventSubscription>,
}

impl CdpSurface {
    /// Instrument an attached page for `device` and start streaming its events
    pub async fn attach(
        session: CDPSession,
        device: Device,
    ) -> crate::error::Result<(Arc<Self>, mpsc::UnboundedReceiver<SurfaceEvent>)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let tracker = Arc::new(Mutex::new(PageTracker::new(
            session.target_id.clone(),
            session.url.clone(),
        )));
        let runtime = Handle::current();

        let mut subscriptions = Vec::with_capacity(PAGE_EVENTS.len());
        for method in PAGE_EVENTS {
            let callback = Self::event_callback(
                session.clone(),
                runtime.clone(),
                tracker.clone(),
                events_tx.clone(),
            );
            subscriptions.push(session.client().subscribe(method, callback));
        }

        session
            .send("Runtime.addBinding", Some(json!({ "name": HOST_BINDING })))
            .await?;
        session
            .send(
                "Page.addScriptToEvaluateOnNewDocument",
                Some(json!({ "source": instrumentation::bootstrap_script(&device.id) })),
            )
            .await?;
        if let Some(user_agent) = &device.user_agent {
            session
                .send(
                    "Emulation.setUserAgentOverride",
                    Some(json!({ "userAgent": user_agent })),
                )
                .await?;
        }
        if device.is_mobile() {
            session
                .send(
                    "Emulation.setTouchEmulationEnabled",
                    Some(json!({ "enabled": true, "maxTouchPoints": 5 })),
                )
                .await?;
        }

        tracing::info!(
            device = %device.id,
            "[CdpSurface] Attached to target {}",
            session.target_id
        );
        let surface = Arc::new(Self {
            session,
            runtime,
            device,
            tracker,
            offset: Mutex::new(Point::default()),
            subscriptions,
        });
        Ok((surface, events_rx))
    }

    fn event_callback(
        session: CDPSession,
        runtime: Handle,
        tracker: Arc<Mutex<PageTracker>>,
        events: mpsc::UnboundedSender<SurfaceEvent>,
    ) -> EventCallback {
        Arc::new(move |event: &CDPEvent| {
            if event.session_id.as_deref() != Some(session.session_id.as_str()) {
                return;
            }
            let Some(translated) = tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_event(event)
            else {
                return;
            };

            if matches!(translated, SurfaceEvent::Lifecycle(LifecycleEvent::Navigated { .. })) {
                // Refresh back/forward availability before reporting the navigation
                let session = session.clone();
                let tracker = tracker.clone();
                let events = events.clone();
                runtime.spawn(async move {
                    match history(&session).await {
                        Ok(history) => tracker
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .apply_history(&history),
                        Err(e) => tracing::warn!("[CdpSurface] History refresh failed: {}", e),
                    }
                    let _ = events.send(translated);
                });
                return;
            }
            let _ = events.send(translated);
        })
    }

    pub fn session(&self) -> &CDPSession {
        &self.session
    }

    /// Place the surface in host-window coordinates
    pub fn set_offset(&self, offset: Point) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) = offset;
    }

    fn tracker(&self) -> MutexGuard<'_, PageTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a command in the background, logging a failure
    fn fire(&self, method: &'static str, params: Value) {
        let session = self.session.clone();
        let device = self.device.id.clone();
        self.runtime.spawn(async move {
            if let Err(e) = session.send(method, Some(params)).await {
                tracing::warn!(device = %device, "[CdpSurface] {} failed: {}", method, e);
            }
        });
    }

    fn step_history(&self, delta: isize) {
        let session = self.session.clone();
        let device = self.device.id.clone();
        self.runtime.spawn(async move {
            let result = async {
                let history = history(&session).await?;
                let Some(entry) = history.offset(delta) else {
                    return Ok::<_, CDPError>(());
                };
                session
                    .send(
                        "Page.navigateToHistoryEntry",
                        Some(json!({ "entryId": entry.id })),
                    )
                    .await?;
                Ok(())
            }
            .await;
            if let Err(e) = result {
                tracing::warn!(device = %device, "[CdpSurface] History step failed: {}", e);
            }
        });
    }
}

async fn history(session: &CDPSession) -> Result<NavigationHistory, CDPError> {
    let raw = session.send("Page.getNavigationHistory", None).await?;
    Ok(serde_json::from_value(raw)?)
}

fn script_error(err: CDPError) -> SurfaceError {
    match err {
        CDPError::Protocol { message, .. } => SurfaceError::Script(message),
        other => SurfaceError::Cdp(other),
    }
}

impl Drop for CdpSurface {
    fn drop(&mut self) {
        for token in &self.subscriptions {
            self.session.client().unsubscribe(*token);
        }
    }
}

#[async_trait]
impl Surface for CdpSurface {
    fn navigate(&self, url: &str) -> SurfaceResult<()> {
        self.fire("Page.navigate", json!({ "url": url }));
        Ok(())
    }

    fn reload(&self, ignore_cache: bool) -> SurfaceResult<()> {
        self.fire("Page.reload", json!({ "ignoreCache": ignore_cache }));
        Ok(())
    }

    fn go_back(&self) -> SurfaceResult<()> {
        self.step_history(-1);
        Ok(())
    }

    fn go_forward(&self) -> SurfaceResult<()> {
        self.step_history(1);
        Ok(())
    }

    fn can_go_back(&self) -> bool {
        self.tracker().can_go_back
    }

    fn can_go_forward(&self) -> bool {
        self.tracker().can_go_forward
    }

    fn send(&self, channel: &str, payload: Value) -> SurfaceResult<()> {
        self.fire(
            "Runtime.evaluate",
            json!({ "expression": instrumentation::dispatch_script(channel, &payload) }),
        );
        Ok(())
    }

    async fn execute_script(&self, source: &str) -> SurfaceResult<Value> {
        self.session.evaluate(source).await.map_err(script_error)
    }

    async fn clear_storage(&self, storages: &[String]) -> SurfaceResult<()> {
        let url = self.tracker().url.clone();
        let origin = origin_of(&url).ok_or(SurfaceError::Unsupported(
            "clearing storage of a page without an origin",
        ))?;
        let storage_types = storage_types(storages);
        if storage_types.is_empty() {
            return Ok(());
        }
        self.session
            .send(
                "Storage.clearDataForOrigin",
                Some(json!({ "origin": origin, "storageTypes": storage_types })),
            )
            .await?;
        Ok(())
    }

    async fn capture_full_page(&self) -> SurfaceResult<Vec<u8>> {
        let result = self
            .session
            .send(
                "Page.captureScreenshot",
                Some(json!({ "format": "png", "captureBeyondViewport": true })),
            )
            .await?;
        let data = result["data"]
            .as_str()
            .ok_or_else(|| SurfaceError::Decode("screenshot response has no data".to_string()))?;
        STANDARD
            .decode(data)
            .map_err(|e| SurfaceError::Decode(e.to_string()))
    }

    fn inspect_element(&self, x: i32, y: i32) -> SurfaceResult<()> {
        let offset = self.screen_offset();
        let page_x = x - offset.x.round() as i32;
        let page_y = y - offset.y.round() as i32;
        let session = self.session.clone();
        let device = self.device.id.clone();
        self.runtime.spawn(async move {
            let result = async {
                let node = session
                    .send(
                        "DOM.getNodeForLocation",
                        Some(json!({ "x": page_x, "y": page_y, "includeUserAgentShadowDOM": false })),
                    )
                    .await?;
                session
                    .send(
                        "Overlay.highlightNode",
                        Some(json!({
                            "backendNodeId": node["backendNodeId"],
                            "highlightConfig": {
                                "showInfo": true,
                                "contentColor": { "r": 111, "g": 168, "b": 220, "a": 0.66 },
                            },
                        })),
                    )
                    .await?;
                Ok::<_, CDPError>(())
            }
            .await;
            if let Err(e) = result {
                tracing::warn!(device = %device, "[CdpSurface] Inspect failed: {}", e);
            }
        });
        Ok(())
    }

    fn screen_offset(&self) -> Point {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_viewport(&self, viewport: Dimensions) -> SurfaceResult<()> {
        self.fire(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": viewport.width,
                "height": viewport.height,
                "deviceScaleFactor": self.device.device_scale_factor,
                "mobile": self.device.is_mobile(),
            }),
        );
        Ok(())
    }
}
