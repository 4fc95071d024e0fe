//! Seams between the device manager and the platform Bluetooth stack.
//!
//! Every method returns immediately. Outcomes are delivered later as
//! [`Event`](crate::device::manager::Event)s. Dropping a [`Connection`] or [`Service`]
//! releases it.

use std::time::Duration;
use uuid::Uuid;

use crate::device::types::{AddressType, CharacteristicInfo, DescriptorInfo, DeviceInfo, ScanMode};

pub trait Scanner {
    type Connection: Connection;

    /// Emits `DeviceDiscovered` zero or more times, then `ScanFinished` exactly once.
    fn scan(&mut self, mode: ScanMode, timeout: Duration);

    /// Creates a central role connection bound to `device`. Does not connect yet.
    fn create_central(&mut self, device: &DeviceInfo, address_type: AddressType) -> Self::Connection;
}

pub trait Connection {
    type Service: Service;

    /// Emits `Connected`, or `Error` when the attempt fails.
    fn connect_to_device(&mut self);

    /// Emits `Disconnected` once the link is down.
    fn disconnect_from_device(&mut self);

    /// Emits `ServiceDiscovered` per service, then `ServiceScanDone`.
    fn discover_services(&mut self);

    fn create_service_object(&mut self, uuid: Uuid) -> Option<Self::Service>;
}

pub trait Service {
    /// Emits `ServiceStateChanged`, ending with `ServiceState::Discovered`.
    fn discover_details(&mut self);

    fn characteristic(&self, uuid: Uuid) -> Option<CharacteristicInfo>;

    fn descriptor(&self, characteristic: Uuid, uuid: Uuid) -> Option<DescriptorInfo> {
        self.characteristic(characteristic).and_then(|c| c.descriptor(uuid))
    }

    /// Emits `DescriptorWritten` once the peripheral confirmed the write.
    fn write_descriptor(&mut self, descriptor: &DescriptorInfo, value: &[u8]);
}
