//! Test fixture: a bus with a few mounted controllers over recording surfaces

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::bus::EventBus;
use crate::controller::{ControllerContext, DeviceController, SharedAddress};
use crate::device::{Device, DeviceId};
use crate::notify::Notifier;
use crate::picking::PickingLock;
use crate::surface::mock::RecordingSurface;
use crate::surface::{Point, SurfaceMessage};

pub struct Rig {
    pub bus: Arc<EventBus>,
    pub notifier: Notifier,
    pub picking: Arc<PickingLock>,
    pub address: SharedAddress,
    controllers: Vec<Arc<DeviceController>>,
    surfaces: HashMap<DeviceId, Arc<RecordingSurface>>,
}

impl Rig {
    pub fn new(ids: &[&str]) -> Self {
        Self::build(Self::devices(ids), "about:blank", None)
    }

    pub fn with_address(ids: &[&str], address: &str) -> Self {
        Self::build(Self::devices(ids), address, None)
    }

    pub fn with_screenshot_dir(ids: &[&str], dir: PathBuf) -> Self {
        Self::build(Self::devices(ids), "about:blank", Some(dir))
    }

    pub fn from_devices(devices: Vec<Device>) -> Self {
        Self::build(devices, "about:blank", None)
    }

    fn devices(ids: &[&str]) -> Vec<Device> {
        ids.iter().map(|id| Device::new(*id, 400, 800)).collect()
    }

    fn build(devices: Vec<Device>, address: &str, screenshot_dir: Option<PathBuf>) -> Self {
        let bus = Arc::new(EventBus::new());
        let notifier = Notifier::new(64);
        let picking = Arc::new(PickingLock::new());
        let address = SharedAddress::new(address);
        let ctx = ControllerContext {
            bus: bus.clone(),
            picking: picking.clone(),
            notifier: notifier.clone(),
            address: address.clone(),
            screenshot_dir,
            zoom: 1.0,
        };

        let mut controllers = Vec::new();
        let mut surfaces = HashMap::new();
        for (i, device) in devices.into_iter().enumerate() {
            let surface = Arc::new(RecordingSurface::with_offset(Point::new(
                i as f64 * 500.0,
                40.0,
            )));
            surfaces.insert(device.id.clone(), surface.clone());
            let controller = if i == 0 {
                DeviceController::with_navigator_status(device, surface, ctx.clone())
            } else {
                DeviceController::new(device, surface, ctx.clone())
            };
            controller.mount();
            controllers.push(controller);
        }

        Self {
            bus,
            notifier,
            picking,
            address,
            controllers,
            surfaces,
        }
    }

    pub fn controller(&self, id: &str) -> Arc<DeviceController> {
        self.controllers
            .iter()
            .find(|c| c.id().as_str() == id)
            .cloned()
            .unwrap_or_else(|| panic!("no controller {}", id))
    }

    pub fn controllers(&self) -> Vec<Arc<DeviceController>> {
        self.controllers.clone()
    }

    pub fn surface(&self, id: &str) -> Arc<RecordingSurface> {
        self.surfaces
            .get(&DeviceId::from(id))
            .cloned()
            .unwrap_or_else(|| panic!("no surface {}", id))
    }

    pub fn message(&self, id: &str, message: SurfaceMessage) {
        self.controller(id).handle_message(message);
    }
}
