use std::io::Write;
use futures::channel::mpsc::{channel, Sender};
use futures::StreamExt;
use log::warn;
use tokio::spawn;
use tokio::task::JoinHandle;

use crate::device::types::DeviceEvent;

pub fn format_event(event: &DeviceEvent) -> String {
    match event {
        DeviceEvent::StatusChanged(status) => format!("status: {}", status),
        DeviceEvent::OrientationChanged(orientation) => format!("orientation: {}", orientation),
    }
}

/// Prints every event on its own line to stdout, until all senders are dropped.
pub fn print_events_task() -> (Sender<DeviceEvent>, JoinHandle<()>) {
    let (tx, mut rx) = channel::<DeviceEvent>(128);

    let handle = spawn(async move {
        while let Some(event) = rx.next().await {
            let mut stdout = std::io::stdout().lock();
            if let Err(err) = writeln!(stdout, "{}", format_event(&event)).and_then(|_| stdout.flush()) {
                warn!("Failed to print {:?}: {}", event, err);
            }
        }
    });

    (tx, handle)
}
