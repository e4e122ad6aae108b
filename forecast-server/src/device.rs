//! Compute device parsing, availability probing and resolution.
//!
//! Availability is captured once into a [`DeviceInventory`] at startup and
//! never re-probed, so resolving the same string always gives the same
//! device for the lifetime of the process.

use std::fmt;

use crate::config::DeviceConfig;
use crate::error::{Error, Result};

/// Device class requested by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Auto,
    Cpu,
    /// CUDA-class accelerator with index.
    Accelerator(u32),
    /// Secondary accelerator class (Apple MPS) with index.
    Other(u32),
}

/// A parsed device request. `raw` keeps the caller's original string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub kind: DeviceKind,
    pub raw: String,
}

impl DeviceSpec {
    /// Parse a device string.
    ///
    /// Syntax (case-insensitive):
    /// - `auto` or empty
    /// - `cpu`
    /// - `cuda`, `gpu`, `accel`, optionally with `:N`
    /// - `mps`, optionally with `:N`
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_lowercase();
        let (class, index) = match normalized.split_once(':') {
            Some((class, index)) => {
                let index = index
                    .parse::<u32>()
                    .map_err(|_| Error::InvalidDeviceSpec(raw.to_string()))?;
                (class, Some(index))
            }
            None => (normalized.as_str(), None),
        };

        let kind = match (class, index) {
            ("" | "auto", None) => DeviceKind::Auto,
            ("cpu", None) => DeviceKind::Cpu,
            ("cuda" | "gpu" | "accel", index) => DeviceKind::Accelerator(index.unwrap_or(0)),
            ("mps", index) => DeviceKind::Other(index.unwrap_or(0)),
            _ => return Err(Error::InvalidDeviceSpec(raw.to_string())),
        };

        Ok(Self {
            kind,
            raw: raw.to_string(),
        })
    }
}

/// A concrete device a model can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Accelerator(u32),
    Other(u32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator(index) => write!(f, "cuda:{}", index),
            Device::Other(index) => write!(f, "mps:{}", index),
        }
    }
}

/// Result of resolving a [`DeviceSpec`] against the inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDevice {
    pub spec: DeviceSpec,
    pub device: Device,
    /// Set when the request could not be honored and CPU was used instead.
    pub warning: Option<String>,
}

/// Snapshot of the accelerators visible to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceInventory {
    pub accelerators: u32,
    pub other: u32,
}

impl DeviceInventory {
    pub fn cpu_only() -> Self {
        Self::default()
    }

    /// Probe the host, then apply any counts pinned in configuration.
    pub fn from_config(config: &DeviceConfig) -> Self {
        let probed = Self::probe();
        Self {
            accelerators: config.accelerators.unwrap_or(probed.accelerators),
            other: config.other.unwrap_or(probed.other),
        }
    }

    /// Detect devices from the host.
    ///
    /// CUDA devices are counted from `/dev/nvidiaN` nodes and narrowed by
    /// `CUDA_VISIBLE_DEVICES`. MPS is assumed present on Apple silicon.
    pub fn probe() -> Self {
        let mut accelerators = count_nvidia_nodes();
        if let Ok(visible) = std::env::var("CUDA_VISIBLE_DEVICES") {
            let visible = visible.trim();
            let visible_count = if visible.is_empty() || visible == "-1" {
                0
            } else {
                visible.split(',').filter(|s| !s.trim().is_empty()).count() as u32
            };
            accelerators = accelerators.min(visible_count);
        }

        let other = if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
            1
        } else {
            0
        };

        Self {
            accelerators,
            other,
        }
    }
}

fn count_nvidia_nodes() -> u32 {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("nvidia"))
                .is_some_and(|suffix| {
                    !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit())
                })
        })
        .count() as u32
}

/// Turns device strings into concrete devices.
#[derive(Debug, Clone)]
pub struct DeviceResolver {
    inventory: DeviceInventory,
}

impl DeviceResolver {
    pub fn new(inventory: DeviceInventory) -> Self {
        Self { inventory }
    }

    pub fn inventory(&self) -> DeviceInventory {
        self.inventory
    }

    /// Resolve a device string.
    ///
    /// Only a malformed string is an error. A well-formed request for a
    /// device that is missing degrades to CPU with a warning.
    pub fn resolve(&self, requested: &str) -> Result<ResolvedDevice> {
        let spec = DeviceSpec::parse(requested)?;

        let (device, warning) = match spec.kind {
            DeviceKind::Auto => (self.best_available(), None),
            DeviceKind::Cpu => (Device::Cpu, None),
            DeviceKind::Accelerator(index) => {
                self.check_index(
                    requested,
                    "CUDA",
                    self.inventory.accelerators,
                    index,
                    Device::Accelerator,
                )
            }
            DeviceKind::Other(index) => {
                self.check_index(requested, "MPS", self.inventory.other, index, Device::Other)
            }
        };

        Ok(ResolvedDevice {
            spec,
            device,
            warning,
        })
    }

    fn best_available(&self) -> Device {
        if self.inventory.accelerators > 0 {
            Device::Accelerator(0)
        } else if self.inventory.other > 0 {
            Device::Other(0)
        } else {
            Device::Cpu
        }
    }

    fn check_index(
        &self,
        requested: &str,
        class: &str,
        available: u32,
        index: u32,
        make: fn(u32) -> Device,
    ) -> (Device, Option<String>) {
        if available == 0 {
            return (
                Device::Cpu,
                Some(format!(
                    "Requested device '{}' but no {} device is available; falling back to CPU",
                    requested, class
                )),
            );
        }
        if index >= available {
            return (
                Device::Cpu,
                Some(format!(
                    "Requested device '{}' but only {} {} device(s) are available; falling back to CPU",
                    requested, available, class
                )),
            );
        }
        (make(index), None)
    }
}
