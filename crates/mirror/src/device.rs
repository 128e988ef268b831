//! Device descriptions
//!
//! A `Device` is read-only input to a controller. Whoever manages the device
//! list creates and destroys them; the mirroring core never mutates one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Stable unique identifier of a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Capability tags a device can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Touch device; orientation flips are meaningful
    Mobile,
    /// Viewport can be resized freely
    ResponsiveResize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Swap width and height
    pub fn rotated(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    #[serde(default)]
    pub name: String,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_scale_factor")]
    pub device_scale_factor: f64,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
}

fn default_scale_factor() -> f64 {
    1.0
}

impl Device {
    pub fn new(id: impl Into<DeviceId>, width: u32, height: u32) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            width,
            height,
            device_scale_factor: 1.0,
            user_agent: None,
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_scale_factor(mut self, device_scale_factor: f64) -> Self {
        self.device_scale_factor = device_scale_factor;
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn is_mobile(&self) -> bool {
        self.has(Capability::Mobile)
    }

    pub fn is_resizable(&self) -> bool {
        self.has(Capability::ResponsiveResize)
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_from_json() {
        let device: Device = serde_json::from_str(
            r#"{
                "id": "iphone-x",
                "name": "iPhone X",
                "width": 375,
                "height": 812,
                "deviceScaleFactor": 3,
                "capabilities": ["mobile"]
            }"#,
        )
        .unwrap();

        assert_eq!(device.id, DeviceId::from("iphone-x"));
        assert!(device.is_mobile());
        assert!(!device.is_resizable());
        assert_eq!(device.device_scale_factor, 3.0);
        assert_eq!(device.dimensions().rotated(), Dimensions::new(812, 375));
    }
}
