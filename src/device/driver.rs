use std::future::pending;
use std::time::Duration;
use futures::channel::mpsc::{Sender, UnboundedReceiver};
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::types::Config;
use crate::device::ble::Scanner;
use crate::device::constants::SHUTDOWN_DEADLINE;
use crate::device::manager::{DeviceManager, Event};
use crate::device::types::{ConnectionStatus, DeviceEvent, Phase};

async fn publish(events: Vec<DeviceEvent>, senders: &mut [Sender<DeviceEvent>]) {
    for event in events {
        for sender in senders.iter_mut() {
            if let Err(err) = sender.send(event.clone()).await {
                warn!("Failed to send DeviceEvent: {}", err);
            }
        }
    }
}

async fn wait_for_phase(deadline: Option<(Phase, Instant)>) -> Phase {
    match deadline {
        Some((phase, at)) => {
            sleep_until(at).await;
            phase
        },
        None => pending().await,
    }
}

async fn wait_until(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

/// Runs `device` until `cancel` is cancelled, or until the dice disconnects and
/// `config.reconnect` is off. Then the dice is disconnected, waiting at most
/// `SHUTDOWN_DEADLINE` ms for it to confirm.
///
/// `events` must carry every callback of the scanner that `device` was built with. They are
/// handled here, one at a time.
pub async fn drive<S: Scanner>(
    mut device: DeviceManager<S>,
    mut events: UnboundedReceiver<Event>,
    config: &Config,
    cancel: CancellationToken,
    mut senders: Vec<Sender<DeviceEvent>>,
) {
    let mut reconnect_at: Option<Instant> = None;

    publish(device.start_discovery(), &mut senders).await;

    'mainloop: loop {
        let emitted = tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            event = events.next() => match event {
                Some(event) => device.dispatch(event),
                None => break 'mainloop,
            },
            phase = wait_for_phase(device.phase_deadline()) => device.dispatch(Event::PhaseTimedOut(phase)),
            _ = wait_until(reconnect_at) => {
                reconnect_at = None;
                device.start_discovery()
            },
        };

        let disconnected = emitted.contains(&DeviceEvent::StatusChanged(ConnectionStatus::Disconnected));
        publish(emitted, &mut senders).await;

        if disconnected {
            if !config.reconnect {
                info!("Dice disconnected and reconnecting is disabled");
                break 'mainloop;
            }
            reconnect_at = Some(Instant::now() + config.reconnect_delay());
        }
    }

    info!("Disconnecting from dice");
    publish(device.stop(), &mut senders).await;

    let shutdown = sleep(Duration::from_millis(SHUTDOWN_DEADLINE));
    tokio::pin!(shutdown);

    'shutdown: while device.status() != ConnectionStatus::Disconnected || device.has_connection() {
        tokio::select! {
            _ = &mut shutdown => {
                warn!("Dice did not disconnect in time, dropping the link");
                publish(device.stop(), &mut senders).await;
                break 'shutdown;
            },
            event = events.next() => match event {
                Some(event) => publish(device.dispatch(event), &mut senders).await,
                None => break 'shutdown,
            },
        }
    }
}
