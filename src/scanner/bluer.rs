//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running. Scanning is
//! passive: an advertisement monitor matching OMRON manufacturer data is
//! registered, and every device it finds is watched for property changes.

use super::{
    AdapterState, Advertisement, Central, CentralFuture, Connection, ManufacturerData,
    SCAN_EVENT_CHANNEL_BUFFER_SIZE, ScanError, ScanEvent,
};
use crate::filter::OMRON_COMPANY_ID;
use crate::mac_address::MacAddress;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, AdapterEvent, AdapterProperty, Address, DeviceEvent, DeviceProperty, Session};
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
const MANUFACTURER_DATA_TYPE: u8 = 0xff;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

fn power_state(powered: bool) -> AdapterState {
    if powered {
        AdapterState::PoweredOn
    } else {
        AdapterState::PoweredOff
    }
}

/// Open the default adapter and start reporting its power state.
pub async fn open() -> Result<Connection, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    let powered = adapter.is_powered().await?;
    let mut adapter_events = Box::pin(adapter.events().await?);

    let (tx, rx) = mpsc::channel(SCAN_EVENT_CHANNEL_BUFFER_SIZE);
    let _ = tx.send(ScanEvent::StateChanged(power_state(powered))).await;

    let state_tx = tx.clone();
    let state_task = tokio::spawn(async move {
        while let Some(event) = adapter_events.next().await {
            if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event
                && state_tx
                    .send(ScanEvent::StateChanged(power_state(powered)))
                    .await
                    .is_err()
            {
                break;
            }
        }
    });

    Ok(Connection {
        central: Box::new(BluerCentral {
            session: Some(session),
            adapter,
            tx,
            state_task,
            scan_task: None,
        }),
        events: rx,
    })
}

struct BluerCentral {
    session: Option<Session>,
    adapter: Adapter,
    tx: mpsc::Sender<ScanEvent>,
    state_task: JoinHandle<()>,
    scan_task: Option<JoinHandle<()>>,
}

impl BluerCentral {
    async fn start_monitor(&mut self, allow_duplicates: bool) -> Result<(), ScanError> {
        if self.scan_task.is_some() {
            return Ok(());
        }

        // Match manufacturer data starting with the OMRON company id
        let pattern = Pattern {
            data_type: MANUFACTURER_DATA_TYPE,
            start_position: 0,
            content: OMRON_COMPANY_ID.to_le_bytes().to_vec(),
        };

        let monitor_manager = self.adapter.monitor().await?;
        let mut monitor_handle = monitor_manager
            .register(Monitor {
                patterns: Some(vec![pattern]),
                ..Default::default()
            })
            .await?;

        let adapter = self.adapter.clone();
        let tx = self.tx.clone();
        self.scan_task = Some(tokio::spawn(async move {
            let _monitor_manager = monitor_manager;
            // Dropping the set aborts all device watchers
            let mut watchers = JoinSet::new();
            let mut watched: HashMap<Address, AbortHandle> = HashMap::new();

            while let Some(event) = monitor_handle.next().await {
                match event {
                    MonitorEvent::DeviceFound(id) => {
                        if watched.contains_key(&id.device) {
                            continue;
                        }
                        let handle = watchers.spawn(watch_device(
                            adapter.clone(),
                            id.device,
                            tx.clone(),
                            allow_duplicates,
                        ));
                        watched.insert(id.device, handle);
                    }
                    MonitorEvent::DeviceLost(id) => {
                        if let Some(handle) = watched.remove(&id.device) {
                            handle.abort();
                        }
                    }
                    _ => {}
                }
            }
        }));

        tracing::info!(allow_duplicates, "bluer advertisement monitor registered");
        Ok(())
    }

    fn stop_monitor(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
            tracing::info!("bluer advertisement monitor removed");
        }
    }
}

impl Central for BluerCentral {
    fn scan(&mut self, allow_duplicates: bool) -> CentralFuture<'_> {
        Box::pin(self.start_monitor(allow_duplicates))
    }

    fn stop_scanning(&mut self) -> CentralFuture<'_> {
        self.stop_monitor();
        Box::pin(async { Ok(()) })
    }

    fn stop(&mut self) -> CentralFuture<'_> {
        self.stop_monitor();
        self.state_task.abort();
        let result = match self.session.take() {
            Some(_session) => Ok(()),
            None => Err(ScanError::NotInitialized),
        };
        Box::pin(async move { result })
    }
}

/// Report a device now and again whenever its advertisement changes.
///
/// BlueZ updates the RSSI property for every advertisement it receives, so
/// with `allow_duplicates` an unchanged payload is re-reported each time.
async fn watch_device(
    adapter: Adapter,
    address: Address,
    tx: mpsc::Sender<ScanEvent>,
    allow_duplicates: bool,
) {
    let device = match adapter.device(address) {
        Ok(device) => device,
        Err(error) => {
            tracing::debug!(%address, %error, "cannot access device");
            return;
        }
    };

    if let Err(error) = report_device(&device, &tx).await {
        tracing::debug!(%address, %error, "cannot read device properties");
    }

    let mut events = match device.events().await {
        Ok(events) => Box::pin(events),
        Err(error) => {
            tracing::debug!(%address, %error, "cannot watch device");
            return;
        }
    };

    while let Some(event) = events.next().await {
        let changed = match event {
            DeviceEvent::PropertyChanged(DeviceProperty::ManufacturerData(_)) => true,
            DeviceEvent::PropertyChanged(DeviceProperty::Rssi(_)) => allow_duplicates,
            _ => false,
        };
        if changed && let Err(error) = report_device(&device, &tx).await {
            tracing::debug!(%address, %error, "cannot read device properties");
        }
        if tx.is_closed() {
            break;
        }
    }
}

/// Send one discovery event per manufacturer data entry of `device`.
async fn report_device(
    device: &bluer::Device,
    tx: &mpsc::Sender<ScanEvent>,
) -> Result<(), ScanError> {
    let Some(manufacturer_data) = device.manufacturer_data().await? else {
        return Ok(());
    };
    let name = device.name().await?.unwrap_or_default();
    let rssi = device.rssi().await?.unwrap_or_default();
    let address: MacAddress = device.address().into();

    for (company_id, rest) in manufacturer_data {
        let advertisement = Advertisement {
            address,
            name: name.clone(),
            // BlueZ strips the company id; put it back so offsets match the air format
            manufacturer_data: Some(ManufacturerData::from_parts(company_id, &rest)),
            rssi,
        };
        let _ = tx.send(ScanEvent::Discovered(advertisement)).await;
    }

    Ok(())
}
