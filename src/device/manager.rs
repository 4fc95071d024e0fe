use std::time::Duration;
use log::{debug, info, trace, warn};
use tokio::time::Instant;
use uuid::Uuid;

use crate::device::ble::{Connection, Scanner, Service};
use crate::device::constants::{
    CLIENT_CHARACTERISTIC_CONFIGURATION, CONNECT_TIMEOUT, DEVICE_NAME, DISABLE_NOTIFICATIONS, DISCOVERY_TIMEOUT,
    ENABLE_NOTIFICATIONS, ORIENTATION_CHARACTERISTIC, ORIENTATION_SERVICE, SCAN_TIMEOUT,
};
use crate::device::types::{
    AddressType, ConnectionStatus, DescriptorInfo, DeviceEvent, DeviceInfo, Orientation, Phase, ScanMode, ServiceState,
};
use crate::error::ErrorCode;

type ServiceOf<S> = <<S as Scanner>::Connection as Connection>::Service;

/// Everything that can happen to the device manager: requests from the caller and
/// callbacks from the BLE subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StartDiscovery,
    StopRequested,
    ScanFinished,
    DeviceDiscovered(DeviceInfo),
    Connected,
    Disconnected,
    Error(ErrorCode),
    ServiceDiscovered(Uuid),
    ServiceScanDone,
    ServiceStateChanged(ServiceState),
    CharacteristicChanged { uuid: Uuid, value: Vec<u8> },
    DescriptorWritten { descriptor: DescriptorInfo, value: Vec<u8> },
    PhaseTimedOut(Phase),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub scan: Duration,
    pub connect: Duration,
    pub discovery: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            scan: Duration::from_millis(SCAN_TIMEOUT),
            connect: Duration::from_millis(CONNECT_TIMEOUT),
            discovery: Duration::from_millis(DISCOVERY_TIMEOUT),
        }
    }
}

/// Connection lifecycle of a single ZEI dice.
///
/// All state is mutated by [`DeviceManager::dispatch`], which returns the observable events
/// caused by the transition. Events must be delivered one at a time, in the order the BLE
/// subsystem produced them.
pub struct DeviceManager<S: Scanner> {
    scanner: S,
    timeouts: Timeouts,
    status: ConnectionStatus,
    orientation: Orientation,
    // set when the orientation service shows up during service discovery
    service_found: bool,
    connection: Option<S::Connection>,
    service: Option<ServiceOf<S>>,
    notification_descriptor: Option<DescriptorInfo>,
    deadline: Option<(Phase, Instant)>,
    // set while the notifications are being disabled on the way out
    stopping: bool,
    emitted: Vec<DeviceEvent>,
}

impl<S: Scanner> DeviceManager<S> {
    pub fn new(scanner: S, timeouts: Timeouts) -> Self {
        DeviceManager {
            scanner,
            timeouts,
            status: ConnectionStatus::Disconnected,
            orientation: Orientation::Vertical,
            service_found: false,
            connection: None,
            service: None,
            notification_descriptor: None,
            deadline: None,
            stopping: false,
            emitted: Vec::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    pub fn has_service(&self) -> bool {
        self.service.is_some()
    }

    /// The phase of the current connection attempt that is waiting on the BLE subsystem,
    /// and when it should be abandoned.
    pub fn phase_deadline(&self) -> Option<(Phase, Instant)> {
        self.deadline
    }

    pub fn start_discovery(&mut self) -> Vec<DeviceEvent> {
        self.dispatch(Event::StartDiscovery)
    }

    pub fn stop(&mut self) -> Vec<DeviceEvent> {
        self.dispatch(Event::StopRequested)
    }

    pub fn dispatch(&mut self, event: Event) -> Vec<DeviceEvent> {
        match event {
            Event::StartDiscovery => self.on_start_discovery(),
            Event::StopRequested => self.on_stop_requested(),
            Event::ScanFinished => self.on_scan_finished(),
            Event::DeviceDiscovered(device) => self.on_device_discovered(&device),
            Event::Connected => self.on_connected(),
            Event::Disconnected => self.on_disconnected(),
            Event::Error(code) => self.on_error(&code),
            Event::ServiceDiscovered(uuid) => self.on_service_discovered(uuid),
            Event::ServiceScanDone => self.on_service_scan_done(),
            Event::ServiceStateChanged(state) => self.on_service_state_changed(state),
            Event::CharacteristicChanged { uuid, value } => self.on_characteristic_changed(uuid, &value),
            Event::DescriptorWritten { descriptor, value } => self.on_descriptor_written(&descriptor, &value),
            Event::PhaseTimedOut(phase) => self.on_phase_timed_out(phase),
        }

        std::mem::take(&mut self.emitted)
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if status != self.status {
            info!("Status {} -> {}", self.status, status);
            self.status = status;
            self.emitted.push(DeviceEvent::StatusChanged(status));
        }
    }

    fn arm(&mut self, phase: Phase) {
        let timeout = match phase {
            Phase::Connect => self.timeouts.connect,
            Phase::ServiceDiscovery | Phase::DetailDiscovery => self.timeouts.discovery,
        };
        self.deadline = Some((phase, Instant::now() + timeout));
    }

    fn release_session(&mut self) {
        self.service = None;
        self.notification_descriptor = None;
        self.connection = None;
        self.service_found = false;
        self.deadline = None;
        self.stopping = false;
    }

    // The session can not be used any more: drop the link and start over from Disconnected
    fn fail_session(&mut self) {
        if let Some(connection) = self.connection.as_mut() {
            connection.disconnect_from_device();
        }
        self.release_session();
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn scan(&mut self) {
        self.scanner.scan(ScanMode::LowEnergy, self.timeouts.scan);
    }

    fn on_start_discovery(&mut self) {
        if self.status != ConnectionStatus::Disconnected {
            debug!("Ignoring discovery request while {}", self.status);
            return;
        }

        info!("Starting discovery");
        self.release_session();
        self.set_status(ConnectionStatus::Connecting);
        self.scan();
    }

    fn on_stop_requested(&mut self) {
        let connected = self.status == ConnectionStatus::Connected;

        match (connected && !self.stopping, self.service.as_mut(), self.notification_descriptor.as_ref()) {
            (true, Some(service), Some(descriptor)) => {
                // the confirmed write is treated as the intent to disconnect
                info!("Disabling notifications");
                service.write_descriptor(descriptor, &DISABLE_NOTIFICATIONS);
                self.stopping = true;
            },
            _ => {
                info!("Stopping");
                self.fail_session();
            },
        }
    }

    fn on_error(&mut self, code: &ErrorCode) {
        warn!("Error: {}", code);

        // the notifications could not be disabled, the link is dropped without them
        if self.stopping {
            self.fail_session();
        }
    }

    fn on_scan_finished(&mut self) {
        if self.connection.is_some() || self.service.is_some() {
            return;
        }

        if self.status == ConnectionStatus::Connecting {
            debug!("Dice not found, scanning again");
            self.scan();
        }
    }

    fn on_device_discovered(&mut self, device: &DeviceInfo) {
        if self.status != ConnectionStatus::Connecting {
            return;
        }

        if !device.low_energy {
            trace!("Ignoring classic device {}", device.address);
            return;
        }

        if device.name.as_deref() != Some(DEVICE_NAME) {
            trace!("Ignoring device {} {:?}", device.address, device.name);
            return;
        }

        if self.connection.is_some() {
            debug!("Already connecting to {}", device.address);
            return;
        }

        info!("Connecting to device {}", device.address);
        let mut connection = self.scanner.create_central(device, AddressType::Random);
        connection.connect_to_device();
        self.connection = Some(connection);
        self.arm(Phase::Connect);
    }

    fn on_connected(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            warn!("Connected event without a connection");
            return;
        };

        info!("Connected; Discovering services...");
        self.service_found = false;
        connection.discover_services();
        self.arm(Phase::ServiceDiscovery);
    }

    fn on_disconnected(&mut self) {
        info!("Device disconnected");
        self.release_session();
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn on_service_discovered(&mut self, uuid: Uuid) {
        debug!("Service discovered {}", uuid);
        if uuid == ORIENTATION_SERVICE {
            self.service_found = true;
        }
    }

    fn on_service_scan_done(&mut self) {
        self.service = None;
        self.notification_descriptor = None;

        let service = match (self.service_found, self.connection.as_mut()) {
            (true, Some(connection)) => connection.create_service_object(ORIENTATION_SERVICE),
            _ => None,
        };

        let Some(mut service) = service else {
            warn!("Orientation service not found");
            self.fail_session();
            return;
        };

        service.discover_details();
        self.service = Some(service);
        self.arm(Phase::DetailDiscovery);
    }

    fn on_service_state_changed(&mut self, state: ServiceState) {
        if state != ServiceState::Discovered {
            return;
        }

        let Some(service) = self.service.as_ref() else {
            return;
        };

        if service.characteristic(ORIENTATION_CHARACTERISTIC).is_none() {
            warn!("Orientation characteristic not found");
            self.fail_session();
            return;
        }

        let Some(descriptor) = service.descriptor(ORIENTATION_CHARACTERISTIC, CLIENT_CHARACTERISTIC_CONFIGURATION) else {
            warn!("Orientation characteristic can not notify");
            self.fail_session();
            return;
        };

        info!("Device connected");
        self.deadline = None;
        self.set_status(ConnectionStatus::Connected);

        if let Some(service) = self.service.as_mut() {
            service.write_descriptor(&descriptor, &ENABLE_NOTIFICATIONS);
        }
        self.notification_descriptor = Some(descriptor);
    }

    fn on_characteristic_changed(&mut self, uuid: Uuid, value: &[u8]) {
        if uuid != ORIENTATION_CHARACTERISTIC {
            return;
        }

        if self.service.is_none() {
            trace!("Ignoring notification of a released service");
            return;
        }

        let orientation = match Orientation::from_payload(value) {
            Ok(orientation) => orientation,
            Err(err) => {
                warn!("{}", err);
                return;
            },
        };

        debug!("Orientation {}", orientation);
        if orientation != self.orientation {
            self.orientation = orientation;
            self.emitted.push(DeviceEvent::OrientationChanged(orientation));
        }
    }

    fn on_descriptor_written(&mut self, descriptor: &DescriptorInfo, value: &[u8]) {
        if self.notification_descriptor.as_ref() != Some(descriptor) || value != DISABLE_NOTIFICATIONS {
            return;
        }

        info!("Notifications disabled, disconnecting");
        if let Some(connection) = self.connection.as_mut() {
            connection.disconnect_from_device();
        }
        self.service = None;
        self.notification_descriptor = None;
    }

    fn on_phase_timed_out(&mut self, phase: Phase) {
        match self.deadline {
            Some((armed, _)) if armed == phase => {
                warn!("{} took too long", phase);
                self.fail_session();
            },
            _ => trace!("Ignoring stale timeout of {:?}", phase),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use super::*;
    use crate::device::types::CharacteristicInfo;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Scan,
        CreateCentral(String),
        Connect,
        Disconnect,
        DiscoverServices,
        CreateServiceObject(Uuid),
        DiscoverDetails,
        WriteDescriptor(Vec<u8>),
        DropConnection,
        DropService,
    }

    type Log = Rc<RefCell<Vec<Call>>>;

    struct MockScanner {
        log: Log,
        descriptors: Option<Vec<Uuid>>,
    }

    struct MockConnection {
        log: Log,
        descriptors: Option<Vec<Uuid>>,
    }

    struct MockService {
        log: Log,
        descriptors: Option<Vec<Uuid>>,
    }

    impl Scanner for MockScanner {
        type Connection = MockConnection;

        fn scan(&mut self, _mode: ScanMode, _timeout: Duration) {
            self.log.borrow_mut().push(Call::Scan);
        }

        fn create_central(&mut self, device: &DeviceInfo, _address_type: AddressType) -> MockConnection {
            self.log.borrow_mut().push(Call::CreateCentral(device.address.clone()));
            MockConnection { log: self.log.clone(), descriptors: self.descriptors.clone() }
        }
    }

    impl Connection for MockConnection {
        type Service = MockService;

        fn connect_to_device(&mut self) {
            self.log.borrow_mut().push(Call::Connect);
        }

        fn disconnect_from_device(&mut self) {
            self.log.borrow_mut().push(Call::Disconnect);
        }

        fn discover_services(&mut self) {
            self.log.borrow_mut().push(Call::DiscoverServices);
        }

        fn create_service_object(&mut self, uuid: Uuid) -> Option<MockService> {
            self.log.borrow_mut().push(Call::CreateServiceObject(uuid));
            Some(MockService { log: self.log.clone(), descriptors: self.descriptors.clone() })
        }
    }

    impl Drop for MockConnection {
        fn drop(&mut self) {
            self.log.borrow_mut().push(Call::DropConnection);
        }
    }

    impl Service for MockService {
        fn discover_details(&mut self) {
            self.log.borrow_mut().push(Call::DiscoverDetails);
        }

        fn characteristic(&self, uuid: Uuid) -> Option<CharacteristicInfo> {
            let descriptors = self.descriptors.clone()?;
            (uuid == ORIENTATION_CHARACTERISTIC).then(|| CharacteristicInfo {
                service: ORIENTATION_SERVICE,
                uuid,
                descriptors,
            })
        }

        fn write_descriptor(&mut self, _descriptor: &DescriptorInfo, value: &[u8]) {
            self.log.borrow_mut().push(Call::WriteDescriptor(value.to_vec()));
        }
    }

    impl Drop for MockService {
        fn drop(&mut self) {
            self.log.borrow_mut().push(Call::DropService);
        }
    }

    fn manager_with(descriptors: Option<Vec<Uuid>>) -> (DeviceManager<MockScanner>, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let scanner = MockScanner { log: log.clone(), descriptors };
        (DeviceManager::new(scanner, Timeouts::default()), log)
    }

    fn manager() -> (DeviceManager<MockScanner>, Log) {
        manager_with(Some(vec![CLIENT_CHARACTERISTIC_CONFIGURATION]))
    }

    fn dice() -> DeviceInfo {
        DeviceInfo {
            id: "dice".to_string(),
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            name: Some(DEVICE_NAME.to_string()),
            low_energy: true,
        }
    }

    fn notification_descriptor() -> DescriptorInfo {
        DescriptorInfo {
            service: ORIENTATION_SERVICE,
            characteristic: ORIENTATION_CHARACTERISTIC,
            uuid: CLIENT_CHARACTERISTIC_CONFIGURATION,
        }
    }

    fn connect(manager: &mut DeviceManager<MockScanner>) -> Vec<DeviceEvent> {
        let mut events = manager.start_discovery();
        events.extend(manager.dispatch(Event::DeviceDiscovered(dice())));
        events.extend(manager.dispatch(Event::Connected));
        events.extend(manager.dispatch(Event::ServiceDiscovered(ORIENTATION_SERVICE)));
        events.extend(manager.dispatch(Event::ServiceScanDone));
        events.extend(manager.dispatch(Event::ServiceStateChanged(ServiceState::DiscoveringDetails)));
        events.extend(manager.dispatch(Event::ServiceStateChanged(ServiceState::Discovered)));
        events
    }

    fn orientation_event(code: u8) -> Event {
        Event::CharacteristicChanged { uuid: ORIENTATION_CHARACTERISTIC, value: vec![code] }
    }

    #[test]
    fn happy_path() {
        let (mut manager, log) = manager();

        let events = connect(&mut manager);

        assert_eq!(events, vec![
            DeviceEvent::StatusChanged(ConnectionStatus::Connecting),
            DeviceEvent::StatusChanged(ConnectionStatus::Connected),
        ]);
        assert_eq!(*log.borrow(), vec![
            Call::Scan,
            Call::CreateCentral("AA:BB:CC:DD:EE:FF".to_string()),
            Call::Connect,
            Call::DiscoverServices,
            Call::CreateServiceObject(ORIENTATION_SERVICE),
            Call::DiscoverDetails,
            Call::WriteDescriptor(ENABLE_NOTIFICATIONS.to_vec()),
        ]);
        assert!(manager.phase_deadline().is_none());
    }

    #[test]
    fn start_discovery_is_ignored_unless_disconnected() {
        let (mut manager, log) = manager();

        manager.start_discovery();
        assert!(manager.start_discovery().is_empty());
        assert_eq!(*log.borrow(), vec![Call::Scan]);

        connect(&mut manager);
        let calls = log.borrow().len();
        assert!(manager.start_discovery().is_empty());
        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert_eq!(log.borrow().len(), calls);
    }

    #[test]
    fn discoveries_are_ignored_unless_connecting() {
        let (mut manager, log) = manager();

        manager.dispatch(Event::DeviceDiscovered(dice()));

        assert!(log.borrow().is_empty());
        assert!(!manager.has_connection());
    }

    #[test]
    fn repeated_discovery_creates_one_connection() {
        let (mut manager, log) = manager();
        manager.start_discovery();

        manager.dispatch(Event::DeviceDiscovered(dice()));
        manager.dispatch(Event::DeviceDiscovered(dice()));

        let created = log.borrow().iter().filter(|c| matches!(c, Call::CreateCentral(_))).count();
        assert_eq!(created, 1);
    }

    #[test]
    fn non_le_devices_are_ignored() {
        let (mut manager, _) = manager();
        manager.start_discovery();

        manager.dispatch(Event::DeviceDiscovered(DeviceInfo { low_energy: false, ..dice() }));

        assert!(!manager.has_connection());
    }

    #[test]
    fn scan_restarts_until_a_device_is_found() {
        let (mut manager, log) = manager();
        manager.start_discovery();

        manager.dispatch(Event::ScanFinished);
        assert_eq!(*log.borrow(), vec![Call::Scan, Call::Scan]);

        manager.dispatch(Event::DeviceDiscovered(dice()));
        manager.dispatch(Event::ScanFinished);
        assert_eq!(log.borrow().iter().filter(|c| **c == Call::Scan).count(), 2);
    }

    #[test]
    fn scan_is_not_restarted_after_stop() {
        let (mut manager, log) = manager();
        manager.start_discovery();
        manager.stop();

        manager.dispatch(Event::ScanFinished);

        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(*log.borrow(), vec![Call::Scan]);
    }

    #[test]
    fn missing_service_disconnects() {
        let (mut manager, log) = manager();
        manager.start_discovery();
        manager.dispatch(Event::DeviceDiscovered(dice()));
        manager.dispatch(Event::Connected);
        manager.dispatch(Event::ServiceDiscovered(Uuid::from_u128(0x1800)));

        let events = manager.dispatch(Event::ServiceScanDone);

        assert_eq!(events, vec![DeviceEvent::StatusChanged(ConnectionStatus::Disconnected)]);
        assert!(!log.borrow().iter().any(|c| matches!(c, Call::CreateServiceObject(_))));
        assert!(!manager.has_service());
        assert!(!manager.has_connection());
    }

    #[test]
    fn missing_characteristic_disconnects() {
        let (mut manager, log) = manager_with(None);

        let events = connect(&mut manager);

        assert_eq!(events.last(), Some(&DeviceEvent::StatusChanged(ConnectionStatus::Disconnected)));
        assert!(!events.contains(&DeviceEvent::StatusChanged(ConnectionStatus::Connected)));
        assert!(log.borrow().contains(&Call::Disconnect));
    }

    #[test]
    fn missing_descriptor_disconnects() {
        let (mut manager, _) = manager_with(Some(vec![]));

        connect(&mut manager);

        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(!manager.has_service());
    }

    #[test]
    fn orientation_changes_are_deduplicated() {
        let (mut manager, _) = manager();
        connect(&mut manager);

        assert_eq!(manager.dispatch(orientation_event(3)), vec![DeviceEvent::OrientationChanged(Orientation::Face3)]);
        assert!(manager.dispatch(orientation_event(3)).is_empty());
        assert_eq!(manager.dispatch(orientation_event(200)), vec![DeviceEvent::OrientationChanged(Orientation::Vertical)]);
        assert!(manager.dispatch(orientation_event(0)).is_empty());
    }

    #[test]
    fn empty_and_foreign_notifications_are_ignored() {
        let (mut manager, _) = manager();
        connect(&mut manager);

        assert!(manager.dispatch(Event::CharacteristicChanged { uuid: ORIENTATION_CHARACTERISTIC, value: vec![] }).is_empty());
        assert!(manager.dispatch(Event::CharacteristicChanged { uuid: ORIENTATION_SERVICE, value: vec![5] }).is_empty());
        assert_eq!(manager.orientation(), Orientation::Vertical);
    }

    #[test]
    fn disabling_notifications_disconnects() {
        let (mut manager, log) = manager();
        connect(&mut manager);

        let events = manager.dispatch(Event::DescriptorWritten {
            descriptor: notification_descriptor(),
            value: DISABLE_NOTIFICATIONS.to_vec(),
        });

        assert!(events.is_empty());
        assert!(!manager.has_service());
        assert!(log.borrow().ends_with(&[Call::Disconnect, Call::DropService]));

        manager.dispatch(Event::Disconnected);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(!manager.has_connection());
    }

    #[test]
    fn enabling_notifications_keeps_the_session() {
        let (mut manager, _) = manager();
        connect(&mut manager);

        manager.dispatch(Event::DescriptorWritten {
            descriptor: notification_descriptor(),
            value: ENABLE_NOTIFICATIONS.to_vec(),
        });

        assert!(manager.has_service());
        assert_eq!(manager.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn disconnect_releases_everything() {
        let (mut manager, log) = manager();
        connect(&mut manager);

        let events = manager.dispatch(Event::Disconnected);

        assert_eq!(events, vec![DeviceEvent::StatusChanged(ConnectionStatus::Disconnected)]);
        assert!(!manager.has_service());
        assert!(!manager.has_connection());
        assert!(log.borrow().contains(&Call::DropService));
        assert!(log.borrow().contains(&Call::DropConnection));
    }

    #[test]
    fn errors_do_not_change_status() {
        let (mut manager, _) = manager();
        manager.start_discovery();

        let events = manager.dispatch(Event::Error(ErrorCode::RemoteHostClosed));

        assert!(events.is_empty());
        assert_eq!(manager.status(), ConnectionStatus::Connecting);
    }

    #[test]
    fn phases_arm_deadlines() {
        let (mut manager, _) = manager();
        manager.start_discovery();
        assert!(manager.phase_deadline().is_none());

        manager.dispatch(Event::DeviceDiscovered(dice()));
        assert_eq!(manager.phase_deadline().map(|(phase, _)| phase), Some(Phase::Connect));

        manager.dispatch(Event::Connected);
        assert_eq!(manager.phase_deadline().map(|(phase, _)| phase), Some(Phase::ServiceDiscovery));

        manager.dispatch(Event::ServiceDiscovered(ORIENTATION_SERVICE));
        manager.dispatch(Event::ServiceScanDone);
        assert_eq!(manager.phase_deadline().map(|(phase, _)| phase), Some(Phase::DetailDiscovery));
    }

    #[test]
    fn phase_timeout_abandons_the_attempt() {
        let (mut manager, log) = manager();
        manager.start_discovery();
        manager.dispatch(Event::DeviceDiscovered(dice()));

        assert!(manager.dispatch(Event::PhaseTimedOut(Phase::ServiceDiscovery)).is_empty());
        assert_eq!(manager.status(), ConnectionStatus::Connecting);

        let events = manager.dispatch(Event::PhaseTimedOut(Phase::Connect));
        assert_eq!(events, vec![DeviceEvent::StatusChanged(ConnectionStatus::Disconnected)]);
        assert!(log.borrow().contains(&Call::Disconnect));
        assert!(manager.phase_deadline().is_none());
    }

    #[test]
    fn stop_while_connected_disables_notifications() {
        let (mut manager, log) = manager();
        connect(&mut manager);

        assert!(manager.stop().is_empty());
        assert_eq!(log.borrow().last(), Some(&Call::WriteDescriptor(DISABLE_NOTIFICATIONS.to_vec())));
    }

    #[test]
    fn failed_disable_drops_the_link() {
        let (mut manager, log) = manager();
        connect(&mut manager);
        manager.stop();

        let events = manager.dispatch(Event::Error(ErrorCode::Unknown("unsubscribe failed".to_string())));

        assert_eq!(events, vec![DeviceEvent::StatusChanged(ConnectionStatus::Disconnected)]);
        assert!(log.borrow().contains(&Call::Disconnect));
        assert!(!manager.has_connection());
    }

    #[test]
    fn second_stop_drops_the_link() {
        let (mut manager, log) = manager();
        connect(&mut manager);
        manager.stop();
        assert!(!log.borrow().contains(&Call::Disconnect));

        let events = manager.stop();

        assert_eq!(events, vec![DeviceEvent::StatusChanged(ConnectionStatus::Disconnected)]);
        assert!(log.borrow().contains(&Call::Disconnect));
        let disables = log.borrow().iter().filter(|c| **c == Call::WriteDescriptor(DISABLE_NOTIFICATIONS.to_vec())).count();
        assert_eq!(disables, 1);
    }

    #[test]
    fn stop_while_connecting_disconnects() {
        let (mut manager, log) = manager();
        manager.start_discovery();
        manager.dispatch(Event::DeviceDiscovered(dice()));

        let events = manager.stop();

        assert_eq!(events, vec![DeviceEvent::StatusChanged(ConnectionStatus::Disconnected)]);
        assert!(log.borrow().contains(&Call::Disconnect));
        assert!(!manager.has_connection());
    }
}
