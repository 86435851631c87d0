//! Plain data types exchanged between a host and execution provider plugins.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EpError;

/// Node identifier, unique within one graph.
pub type NodeId = usize;

/// String key/value options attached to devices, allocators and streams.
pub type KeyValuePairs = HashMap<String, String>;

/// Kind of a hardware device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// General purpose processor.
    Cpu,
    /// Graphics processor.
    Gpu,
    /// Neural processing unit.
    Npu,
    /// Anything else.
    Other,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cpu => "CPU",
            Self::Gpu => "GPU",
            Self::Npu => "NPU",
            Self::Other => "Other",
        };
        f.write_str(name)
    }
}

impl FromStr for DeviceType {
    type Err = EpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CPU" => Ok(Self::Cpu),
            "GPU" => Ok(Self::Gpu),
            "NPU" => Ok(Self::Npu),
            "OTHER" => Ok(Self::Other),
            _ => Err(EpError::InvalidArgument(format!("unknown device type '{s}'"))),
        }
    }
}

/// Host description of one piece of hardware. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareDevice {
    /// Device kind.
    pub device_type: DeviceType,
    /// PCI-style vendor id.
    pub vendor_id: u32,
    /// Vendor specific device id.
    pub device_id: u32,
    /// Vendor display name.
    pub vendor: String,
    /// Additional host-discovered properties.
    pub metadata: KeyValuePairs,
}

impl HardwareDevice {
    /// Create a device descriptor with empty metadata.
    pub fn new(
        device_type: DeviceType,
        vendor_id: u32,
        device_id: u32,
        vendor: impl Into<String>,
    ) -> Self {
        Self {
            device_type,
            vendor_id,
            device_id,
            vendor: vendor.into(),
            metadata: KeyValuePairs::new(),
        }
    }
}

/// Host-assigned handle of an [`EpDevice`] registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EpDeviceId(pub u64);

impl fmt::Display for EpDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep-device-{}", self.0)
    }
}

/// A hardware device claimed by an execution provider factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpDevice {
    /// Host handle.
    pub id: EpDeviceId,
    /// Name of the claiming execution provider.
    pub ep_name: String,
    /// Vendor of the claiming execution provider.
    pub ep_vendor: String,
    /// The claimed hardware.
    pub device: HardwareDevice,
    /// Provider metadata for this device, if any.
    pub ep_metadata: Option<KeyValuePairs>,
    /// Provider options for this device, if any.
    pub ep_options: Option<KeyValuePairs>,
}

/// Tensor element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 8-bit unsigned integer.
    U8,
    /// Boolean.
    Bool,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            Self::F32 | Self::I32 => 4,
            Self::F64 | Self::I64 => 8,
            Self::U8 | Self::Bool => 1,
        }
    }
}

/// Tensor layout a provider prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataLayout {
    /// Channels before spatial dimensions.
    #[default]
    Nchw,
    /// Channels last.
    Nhwc,
}

impl FromStr for DataLayout {
    type Err = EpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NCHW" => Ok(Self::Nchw),
            "NHWC" => Ok(Self::Nhwc),
            _ => Err(EpError::InvalidArgument(format!("unknown data layout '{s}'"))),
        }
    }
}

/// A provider's opinion on converting one operator to a target layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutConversion {
    /// Convert the operator.
    Convert,
    /// Leave the operator in its current layout.
    Keep,
    /// No opinion; the host decides.
    Defer,
}

/// Result of validating a previously compiled model against a set of devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompiledModelCompatibility {
    /// The provider does not produce compiled artifacts.
    NotApplicable,
    /// Artifact is usable and optimal.
    SupportedOptimal,
    /// Artifact is usable but recompiling would be better.
    SupportedPreferRecompilation,
    /// Artifact cannot be used.
    Unsupported,
}

/// Kind of memory a [`MemoryInfo`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryType {
    /// Memory owned by the device.
    Device,
    /// Host memory accessible by the device.
    HostAccessible,
}

/// Description of a memory region an allocator serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Allocator name.
    pub name: String,
    /// Device the memory lives on.
    pub device_type: DeviceType,
    /// Memory kind.
    pub memory_type: MemoryType,
}

/// Device-level memory identity used when creating synchronization streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryDevice {
    /// Device kind.
    pub device_type: DeviceType,
    /// Memory kind.
    pub memory_type: MemoryType,
    /// Vendor id of the device.
    pub vendor_id: u32,
    /// Device index.
    pub device_id: u32,
}

/// Session-level options handed to providers at creation.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Raw configuration entries.
    pub entries: HashMap<String, String>,
}

impl SessionConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry.
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Entries whose key starts with `prefix`, with the prefix stripped.
    pub fn entries_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.entries.iter().filter_map(move |(key, value)| {
            key.strip_prefix(prefix)
                .map(|stripped| (stripped, value.as_str()))
        })
    }
}

/// Options for a single inference run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Tag used in logs.
    pub run_tag: String,
    /// Raw configuration entries.
    pub entries: HashMap<String, String>,
}
