use std::fmt;
use uuid::Uuid;

use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Connected => "Connected",
        };

        write!(f, "{}", result)
    }
}

/// The face of the dice that points up. `Vertical` means the dice is standing on its edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Orientation {
    #[default]
    Vertical = 0,
    Face1,
    Face2,
    Face3,
    Face4,
    Face5,
    Face6,
    Face7,
    Face8,
}

impl Orientation {
    pub const ALL: [Orientation; 9] = [
        Orientation::Vertical,
        Orientation::Face1,
        Orientation::Face2,
        Orientation::Face3,
        Orientation::Face4,
        Orientation::Face5,
        Orientation::Face6,
        Orientation::Face7,
        Orientation::Face8,
    ];

    /// Codes above 8 are not faces, the dice is treated as vertical.
    pub fn from_code(code: u8) -> Orientation {
        Orientation::ALL
            .get(usize::from(code))
            .copied()
            .unwrap_or(Orientation::Vertical)
    }

    /// Decodes an orientation notification, only the first byte carries information.
    pub fn from_payload(payload: &[u8]) -> Result<Orientation, DeviceError> {
        match payload.first() {
            Some(code) => Ok(Orientation::from_code(*code)),
            None => Err(DeviceError::InvalidPayload),
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Vertical => write!(f, "Vertical"),
            face => write!(f, "Face {}", face.code()),
        }
    }
}

/// Observable output of the device manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    StatusChanged(ConnectionStatus),
    OrientationChanged(Orientation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    LowEnergy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Random,
}

/// A peripheral reported by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Backend specific handle, used to find the peripheral again when connecting.
    pub id: String,
    pub address: String,
    pub name: Option<String>,
    pub low_energy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    DiscoveringDetails,
    Discovered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorInfo {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub service: Uuid,
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

impl CharacteristicInfo {
    pub fn descriptor(&self, uuid: Uuid) -> Option<DescriptorInfo> {
        self.descriptors.iter().find(|d| **d == uuid).map(|d| DescriptorInfo {
            service: self.service,
            characteristic: self.uuid,
            uuid: *d,
        })
    }
}

/// Steps of a connection attempt that are bounded by a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    ServiceDiscovery,
    DetailDiscovery,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            Phase::Connect => "Connecting to the dice",
            Phase::ServiceDiscovery => "Discovering services",
            Phase::DetailDiscovery => "Discovering the orientation service",
        };

        write!(f, "{}", result)
    }
}
