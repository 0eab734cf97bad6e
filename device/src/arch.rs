use std::str::FromStr;

use crate::error::{Error, InvalidDeviceSnafu};

/// Device a kernel is compiled for, or an array lives on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DeviceSpec {
    #[default]
    Cpu,
    Cuda {
        device_id: usize,
    },
    Metal {
        device_id: usize,
    },
    Vulkan,
}

impl DeviceSpec {
    /// Host memory is directly addressable by the CPU backend.
    pub const fn is_host(&self) -> bool {
        matches!(self, Self::Cpu)
    }

    /// Whether memory on `self` can be handed to a kernel compiled for `arch` without staging.
    pub fn is_reachable_from(&self, arch: &DeviceSpec) -> bool {
        match (self, arch) {
            (Self::Cpu, _) => true,
            (Self::Cuda { device_id: a }, Self::Cuda { device_id: b }) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => f.write_str("CPU"),
            Self::Cuda { device_id } => write!(f, "CUDA:{device_id}"),
            Self::Metal { device_id } => write!(f, "METAL:{device_id}"),
            Self::Vulkan => f.write_str("VULKAN"),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = Error;

    /// Parse a device string.
    ///
    /// Examples:
    /// - "CPU" -> DeviceSpec::Cpu
    /// - "CUDA:1" -> DeviceSpec::Cuda { device_id: 1 }
    /// - "cuda" -> DeviceSpec::Cuda { device_id: 0 }
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        let (kind, ordinal) = match upper.split_once(':') {
            Some((kind, ordinal)) => (kind, Some(ordinal)),
            None => (upper.as_str(), None),
        };

        let device_id = match ordinal {
            Some(ordinal) => match ordinal.parse() {
                Ok(id) => id,
                Err(_) => return InvalidDeviceSnafu { device: s }.fail(),
            },
            None => 0,
        };

        match kind {
            "CPU" | "X64" | "ARM64" => Ok(Self::Cpu),
            "CUDA" | "GPU" => Ok(Self::Cuda { device_id }),
            "METAL" => Ok(Self::Metal { device_id }),
            "VULKAN" => Ok(Self::Vulkan),
            _ => InvalidDeviceSnafu { device: s }.fail(),
        }
    }
}
