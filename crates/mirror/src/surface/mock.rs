//! Recording surface used by unit tests

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Semaphore;

use super::{Point, Surface, SurfaceResult};
use crate::device::Dimensions;
use crate::error::SurfaceError;

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    Navigate(String),
    Reload { ignore_cache: bool },
    GoBack,
    GoForward,
    Send { channel: String, payload: Value },
    Script(String),
    ClearStorage(Vec<String>),
    Capture,
    Inspect { x: i32, y: i32 },
    Viewport(Dimensions),
    DevTools,
}

pub struct RecordingSurface {
    calls: Mutex<Vec<SurfaceCall>>,
    offset: Point,
    gate_captures: AtomicBool,
    capture_permits: Semaphore,
    fail_storage: AtomicBool,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::with_offset(Point::default())
    }

    pub fn with_offset(offset: Point) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            offset,
            gate_captures: AtomicBool::new(false),
            capture_permits: Semaphore::new(0),
            fail_storage: AtomicBool::new(false),
        }
    }

    /// Captures block until `release_capture` is called
    pub fn hold_captures(&self) {
        self.gate_captures.store(true, Ordering::SeqCst);
    }

    pub fn release_capture(&self) {
        self.capture_permits.add_permits(1);
    }

    pub fn fail_storage(&self) {
        self.fail_storage.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: SurfaceCall) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Payloads sent on one host-to-surface channel
    pub fn sent(&self, channel: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::Send {
                    channel: c,
                    payload,
                } if c == channel => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &SurfaceCall) -> usize {
        self.calls().iter().filter(|call| *call == wanted).count()
    }
}

#[async_trait]
impl Surface for RecordingSurface {
    fn navigate(&self, url: &str) -> SurfaceResult<()> {
        self.record(SurfaceCall::Navigate(url.to_string()));
        Ok(())
    }

    fn reload(&self, ignore_cache: bool) -> SurfaceResult<()> {
        self.record(SurfaceCall::Reload { ignore_cache });
        Ok(())
    }

    fn go_back(&self) -> SurfaceResult<()> {
        self.record(SurfaceCall::GoBack);
        Ok(())
    }

    fn go_forward(&self) -> SurfaceResult<()> {
        self.record(SurfaceCall::GoForward);
        Ok(())
    }

    fn can_go_back(&self) -> bool {
        true
    }

    fn can_go_forward(&self) -> bool {
        false
    }

    fn send(&self, channel: &str, payload: Value) -> SurfaceResult<()> {
        self.record(SurfaceCall::Send {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    async fn execute_script(&self, source: &str) -> SurfaceResult<Value> {
        self.record(SurfaceCall::Script(source.to_string()));
        Ok(Value::Null)
    }

    async fn clear_storage(&self, storages: &[String]) -> SurfaceResult<()> {
        self.record(SurfaceCall::ClearStorage(storages.to_vec()));
        if self.fail_storage.load(Ordering::SeqCst) {
            return Err(SurfaceError::Script("storage backend unavailable".to_string()));
        }
        Ok(())
    }

    async fn capture_full_page(&self) -> SurfaceResult<Vec<u8>> {
        self.record(SurfaceCall::Capture);
        if self.gate_captures.load(Ordering::SeqCst) {
            let permit = self
                .capture_permits
                .acquire()
                .await
                .map_err(|_| SurfaceError::Closed)?;
            permit.forget();
        }
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    fn inspect_element(&self, x: i32, y: i32) -> SurfaceResult<()> {
        self.record(SurfaceCall::Inspect { x, y });
        Ok(())
    }

    fn screen_offset(&self) -> Point {
        self.offset
    }

    fn set_viewport(&self, viewport: Dimensions) -> SurfaceResult<()> {
        self.record(SurfaceCall::Viewport(viewport));
        Ok(())
    }

    fn toggle_dev_tools(&self) -> SurfaceResult<()> {
        self.record(SurfaceCall::DevTools);
        Ok(())
    }
}
