use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use btleplug::api::{Central, CentralEvent, CharPropFlags, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::channel::mpsc::{unbounded, Sender, UnboundedSender};
use futures::future::join_all;
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::types::Config;
use crate::device::ble::{Connection, Scanner, Service};
use crate::device::constants::{CLIENT_CHARACTERISTIC_CONFIGURATION, DISABLE_NOTIFICATIONS, ENABLE_NOTIFICATIONS, SHUTDOWN_DEADLINE};
use crate::device::driver::drive;
use crate::device::manager::{DeviceManager, Event};
use crate::device::types::{
    AddressType, CharacteristicInfo, DescriptorInfo, DeviceEvent, DeviceInfo, ScanMode, ServiceState,
};
use crate::error::{DeviceError, ErrorCode};

#[derive(Default)]
struct Shared {
    // peripherals seen during the current scan, keyed by DeviceInfo::id
    peripherals: HashMap<String, Peripheral>,
    // the peripheral we are connecting or connected to
    active: Option<PeripheralId>,
    // disconnect requests that may still be in flight
    disconnects: Vec<JoinHandle<()>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn send(events: &UnboundedSender<Event>, event: Event) {
    if let Err(err) = events.unbounded_send(event) {
        debug!("Dropping BLE event, the device loop has stopped: {}", err);
    }
}

fn send_error(events: &UnboundedSender<Event>, err: &btleplug::Error) {
    send(events, Event::Error(ErrorCode::from(err)));
}

async fn describe_peripheral(peripheral: Peripheral, shared: &Mutex<Shared>) -> Option<DeviceInfo> {
    let properties = match peripheral.properties().await {
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            return None;
        },
        Ok(None) => {
            debug!("Peripheral has no properties");
            return None;
        },
        Ok(Some(properties)) => properties,
    };

    let id = format!("{:?}", peripheral.id());
    let device = DeviceInfo {
        id: id.clone(),
        address: properties.address.to_string(),
        name: properties.local_name,
        // btleplug only reports low energy peripherals
        low_energy: true,
    };

    lock(shared).peripherals.insert(id, peripheral);
    Some(device)
}

async fn pump_central_events<S>(
    adapter: Adapter,
    mut central_events: S,
    events: UnboundedSender<Event>,
    shared: Arc<Mutex<Shared>>,
    scanning: Arc<AtomicBool>,
    cancel: CancellationToken,
) where
    S: Stream<Item = CentralEvent> + Unpin,
{
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            central_event = central_events.next() => match central_event {
                None => {
                    warn!("Adapter stopped reporting events");
                    break 'mainloop;
                },
                Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) if scanning.load(Ordering::SeqCst) => {
                    match adapter.peripheral(&id).await {
                        Ok(peripheral) => {
                            if let Some(device) = describe_peripheral(peripheral, &shared).await {
                                send(&events, Event::DeviceDiscovered(device));
                            }
                        },
                        Err(err) => warn!("Failed to query BLE adapter for peripheral {:?}: {}", id, err),
                    }
                },
                Some(CentralEvent::DeviceDisconnected(id)) => {
                    let was_active = {
                        let mut shared = lock(&shared);
                        let was_active = shared.active.as_ref() == Some(&id);
                        if was_active {
                            shared.active = None;
                        }
                        was_active
                    };

                    if was_active {
                        send(&events, Event::Disconnected);
                    }
                },
                Some(_) => {},
            },
        }
    }
}

pub struct BtleScanner {
    adapter: Adapter,
    events: UnboundedSender<Event>,
    shared: Arc<Mutex<Shared>>,
    scanning: Arc<AtomicBool>,
    cancel: CancellationToken,
    scan_cycles: ScanCycles,
}

// Only the most recent scan cycle may stop the adapter scan and report `ScanFinished`
struct ScanCycles {
    backend: CancellationToken,
    current: CancellationToken,
}

impl ScanCycles {
    fn new(backend: CancellationToken) -> Self {
        let current = backend.child_token();
        ScanCycles { backend, current }
    }

    /// Supersedes the running cycle and returns the token of the new one.
    fn restart(&mut self) -> CancellationToken {
        self.current.cancel();
        self.current = self.backend.child_token();
        self.current.clone()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ScanWindow {
    Elapsed,
    // a newer cycle took over the adapter
    Superseded,
    Stopped,
}

async fn wait_scan_window(cycle: &CancellationToken, backend: &CancellationToken, timeout: Duration) -> ScanWindow {
    tokio::select! {
        _ = cycle.cancelled() => {
            if backend.is_cancelled() {
                ScanWindow::Stopped
            } else {
                ScanWindow::Superseded
            }
        },
        _ = sleep(timeout) => ScanWindow::Elapsed,
    }
}

impl BtleScanner {
    /// Starts listening to `adapter`. Everything the adapter reports is sent to `events`
    /// until `cancel` is cancelled.
    pub async fn new(adapter: Adapter, events: UnboundedSender<Event>, cancel: CancellationToken) -> Result<Self, DeviceError> {
        let central_events = adapter.events().await?;
        let shared = Arc::new(Mutex::new(Shared::default()));
        let scanning = Arc::new(AtomicBool::new(false));

        spawn(pump_central_events(
            adapter.clone(),
            central_events,
            events.clone(),
            shared.clone(),
            scanning.clone(),
            cancel.clone(),
        ));

        let scan_cycles = ScanCycles::new(cancel.clone());
        Ok(BtleScanner { adapter, events, shared, scanning, cancel, scan_cycles })
    }
}

impl Scanner for BtleScanner {
    type Connection = BtleConnection;

    fn scan(&mut self, _mode: ScanMode, timeout: Duration) {
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let shared = self.shared.clone();
        let scanning = self.scanning.clone();
        let backend = self.cancel.clone();

        let cycle = self.scan_cycles.restart();

        lock(&shared).peripherals.clear();

        spawn(async move {
            match adapter.start_scan(ScanFilter::default()).await {
                Ok(()) => {
                    info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
                    scanning.store(true, Ordering::SeqCst);

                    // peripherals the adapter already knows about might not be reported again
                    match adapter.peripherals().await {
                        Ok(peripherals) => {
                            for peripheral in peripherals {
                                if let Some(device) = describe_peripheral(peripheral, &shared).await {
                                    send(&events, Event::DeviceDiscovered(device));
                                }
                            }
                        },
                        Err(err) => warn!("Failed to query BLE adapter for peripherals: {}", err),
                    }
                },
                Err(err) => {
                    warn!("Scanning failed {:?}", err);
                    send_error(&events, &err);
                },
            }

            let window = wait_scan_window(&cycle, &backend, timeout).await;
            if window == ScanWindow::Superseded {
                debug!("Scan cycle superseded by a newer one");
                return;
            }

            if scanning.swap(false, Ordering::SeqCst) {
                if let Err(err) = adapter.stop_scan().await {
                    warn!("Failed to stop scanning: {:?}", err);
                }
            }

            if window == ScanWindow::Elapsed && !cycle.is_cancelled() {
                send(&events, Event::ScanFinished);
            }
        });
    }

    fn create_central(&mut self, device: &DeviceInfo, address_type: AddressType) -> BtleConnection {
        // btleplug resolves the address type itself
        debug!("Creating central for {} ({:?} address)", device.address, address_type);
        let peripheral = lock(&self.shared).peripherals.get(&device.id).cloned();

        BtleConnection {
            peripheral,
            events: self.events.clone(),
            shared: self.shared.clone(),
            cancel: self.cancel.child_token(),
        }
    }
}

pub struct BtleConnection {
    peripheral: Option<Peripheral>,
    events: UnboundedSender<Event>,
    shared: Arc<Mutex<Shared>>,
    // cancelled once this connection is released
    cancel: CancellationToken,
}

impl Connection for BtleConnection {
    type Service = BtleService;

    fn connect_to_device(&mut self) {
        let Some(peripheral) = self.peripheral.clone() else {
            send(&self.events, Event::Error(ErrorCode::UnknownRemoteDevice));
            return;
        };
        let events = self.events.clone();
        let cancel = self.cancel.clone();

        lock(&self.shared).active = Some(peripheral.id());

        spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {},
                result = peripheral.connect() => match result {
                    Ok(()) => send(&events, Event::Connected),
                    Err(err) => {
                        warn!("Connecting to peripheral failed: {:?}", err);
                        send_error(&events, &err);
                    },
                },
            }
        });
    }

    fn disconnect_from_device(&mut self) {
        let Some(peripheral) = self.peripheral.clone() else {
            return;
        };
        let events = self.events.clone();
        let shared = self.shared.clone();
        let cancel = self.cancel.clone();

        let task = spawn(async move {
            if let Err(err) = peripheral.disconnect().await {
                warn!("Disconnecting from peripheral failed: {:?}", err);
            }

            if cancel.is_cancelled() {
                return;
            }

            // the adapter might have reported the disconnect already
            let id = peripheral.id();
            let was_active = {
                let mut shared = lock(&shared);
                let was_active = shared.active.as_ref() == Some(&id);
                if was_active {
                    shared.active = None;
                }
                was_active
            };

            if was_active {
                send(&events, Event::Disconnected);
            }
        });

        let mut shared = lock(&self.shared);
        shared.disconnects.retain(|task| !task.is_finished());
        shared.disconnects.push(task);
    }

    fn discover_services(&mut self) {
        let Some(peripheral) = self.peripheral.clone() else {
            return;
        };
        let events = self.events.clone();
        let cancel = self.cancel.clone();

        spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {},
                result = peripheral.discover_services() => match result {
                    Ok(()) => {
                        for service in peripheral.services() {
                            send(&events, Event::ServiceDiscovered(service.uuid));
                        }
                        send(&events, Event::ServiceScanDone);
                    },
                    Err(err) => {
                        warn!("Discovering services failed: {:?}", err);
                        send_error(&events, &err);
                    },
                },
            }
        });
    }

    fn create_service_object(&mut self, uuid: Uuid) -> Option<BtleService> {
        let peripheral = self.peripheral.as_ref()?;
        let service = peripheral.services().into_iter().find(|service| service.uuid == uuid)?;

        Some(BtleService {
            peripheral: peripheral.clone(),
            service,
            events: self.events.clone(),
            cancel: self.cancel.child_token(),
        })
    }
}

impl Drop for BtleConnection {
    fn drop(&mut self) {
        self.cancel.cancel();

        if let Some(peripheral) = &self.peripheral {
            let mut shared = lock(&self.shared);
            if shared.active.as_ref() == Some(&peripheral.id()) {
                shared.active = None;
            }
        }
    }
}

pub struct BtleService {
    peripheral: Peripheral,
    service: btleplug::api::Service,
    events: UnboundedSender<Event>,
    cancel: CancellationToken,
}

impl Service for BtleService {
    fn discover_details(&mut self) {
        // btleplug discovered the characteristics together with the services, so all that is
        // left is to start listening for notifications
        send(&self.events, Event::ServiceStateChanged(ServiceState::DiscoveringDetails));

        let peripheral = self.peripheral.clone();
        let events = self.events.clone();
        let cancel = self.cancel.clone();

        spawn(async move {
            let mut notification_stream = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!("Failed to listen for notifications: {:?}", err);
                    send_error(&events, &err);
                    return;
                },
            };

            send(&events, Event::ServiceStateChanged(ServiceState::Discovered));

            'mainloop: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    notification = notification_stream.next() => match notification {
                        Some(data) => send(&events, Event::CharacteristicChanged { uuid: data.uuid, value: data.value }),
                        None => break 'mainloop,
                    },
                }
            }
        });
    }

    fn characteristic(&self, uuid: Uuid) -> Option<CharacteristicInfo> {
        let characteristic = self.service.characteristics.iter().find(|c| c.uuid == uuid)?;
        let mut descriptors: Vec<Uuid> = characteristic.descriptors.iter().map(|d| d.uuid).collect();

        // not every platform lists the configuration descriptor, btleplug writes it on subscribe
        let notifies = characteristic.properties.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE);
        if notifies && !descriptors.contains(&CLIENT_CHARACTERISTIC_CONFIGURATION) {
            descriptors.push(CLIENT_CHARACTERISTIC_CONFIGURATION);
        }

        Some(CharacteristicInfo {
            service: self.service.uuid,
            uuid: characteristic.uuid,
            descriptors,
        })
    }

    fn write_descriptor(&mut self, descriptor: &DescriptorInfo, value: &[u8]) {
        let Some(characteristic) = self.service.characteristics
            .iter()
            .find(|c| c.uuid == descriptor.characteristic)
            .cloned()
        else {
            warn!("Can not write descriptor of unknown characteristic {}", descriptor.characteristic);
            return;
        };

        let peripheral = self.peripheral.clone();
        let events = self.events.clone();
        let descriptor = descriptor.clone();
        let value = value.to_vec();

        spawn(async move {
            let result = if descriptor.uuid == CLIENT_CHARACTERISTIC_CONFIGURATION {
                if value == ENABLE_NOTIFICATIONS {
                    info!("Subscribing to characteristic {:?}", characteristic.uuid);
                    peripheral.subscribe(&characteristic).await
                } else if value == DISABLE_NOTIFICATIONS {
                    info!("Unsubscribing from characteristic {:?}", characteristic.uuid);
                    peripheral.unsubscribe(&characteristic).await
                } else {
                    Err(btleplug::Error::NotSupported(format!("configuration value {:02x?}", value)))
                }
            } else {
                match characteristic.descriptors.iter().find(|d| d.uuid == descriptor.uuid) {
                    Some(target) => peripheral.write_descriptor(target, &value).await,
                    None => Err(btleplug::Error::NoSuchCharacteristic),
                }
            };

            match result {
                Ok(()) => send(&events, Event::DescriptorWritten { descriptor, value }),
                Err(err) => {
                    warn!("Failed to write descriptor {}: {:?}", descriptor.uuid, err);
                    send_error(&events, &err);
                },
            }
        });
    }
}

impl Drop for BtleService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn select_adapter(manager: &Manager, wanted: Option<&str>) -> Result<Adapter, DeviceError> {
    for adapter in manager.adapters().await? {
        let info = adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string());

        match wanted {
            Some(wanted) if !info.contains(wanted) => debug!("Skipping adapter {}", info),
            _ => {
                info!("Using adapter {}", info);
                return Ok(adapter);
            },
        }
    }

    Err(DeviceError::NoAdapter)
}

/// Finds the dice and streams its events to `senders` until `cancel` is cancelled.
pub async fn run_device(config: &Config, cancel: CancellationToken, senders: Vec<Sender<DeviceEvent>>) -> Result<(), DeviceError> {
    let manager = Manager::new().await?;
    let adapter = select_adapter(&manager, config.adapter.as_deref()).await?;
    let (event_sender, event_receiver) = unbounded::<Event>();

    // not a child of `cancel`: the backend must outlive the graceful disconnect
    let backend_cancel = CancellationToken::new();
    let scanner = BtleScanner::new(adapter, event_sender, backend_cancel.clone()).await?;
    let shared = scanner.shared.clone();

    drive(DeviceManager::new(scanner, config.timeouts()), event_receiver, config, cancel, senders).await;

    // the runtime is dropped after this returns, which would abort a disconnect in flight
    let disconnects = std::mem::take(&mut lock(&shared).disconnects);
    if timeout(Duration::from_millis(SHUTDOWN_DEADLINE), join_all(disconnects)).await.is_err() {
        warn!("Disconnecting from peripheral did not finish in time");
    }

    backend_cancel.cancel();
    Ok(())
}
