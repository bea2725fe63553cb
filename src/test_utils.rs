use crate::mac_address::MacAddress;
use crate::reading::{Common, EpReading, ImReading};
use crate::scanner::{
    Advertisement, Backend, Central, CentralFuture, Connection, ManufacturerData, OpenFuture,
    ScanError, ScanEvent, Scanner,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// A second, unrelated device.
pub const OTHER_MAC: MacAddress = MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

fn common(sequence: u8) -> Common {
    Common {
        rssi: -60,
        device_id: TEST_MAC,
        sequence,
        temperature: 23.45,
        relative_humidity: 50.0,
        ambient_light: 100,
        uv_index: 0.05,
        pressure: 1013.2,
        sound_noise: 35.5,
        battery_voltage: 2.9,
    }
}

pub fn im_reading(sequence: u8) -> ImReading {
    ImReading {
        common: common(sequence),
        acceleration_x: 1,
        acceleration_y: 2,
        acceleration_z: 980,
    }
}

pub fn ep_reading(sequence: u8) -> EpReading {
    EpReading {
        common: common(sequence),
        discomfort_index: 70.12,
        heat_stroke: 19.5,
    }
}

/// A 22-byte manufacturer data buffer matching [`im_reading`] / [`ep_reading`].
///
/// Bytes 15..=20 hold accelerations 1, 2, 980 which, read as an EP
/// payload, are a discomfort index of 0.01 and heat stroke of 0.02.
pub fn payload(sequence: u8) -> Vec<u8> {
    vec![
        0xD5, 0x02, // company id 0x02D5
        sequence, // sequence
        0x29, 0x09, // temperature 2345 -> 23.45
        0x88, 0x13, // humidity 5000 -> 50.00
        0x64, 0x00, // ambient light 100
        0x05, 0x00, // uv index 5 -> 0.05
        0x94, 0x27, // pressure 10132 -> 1013.2
        0xDE, 0x0D, // sound noise 3550 -> 35.50
        0x01, 0x00, // accel x / discomfort index
        0x02, 0x00, // accel y / heat stroke
        0xD4, 0x03, // accel z 980
        0xBE, // battery 190 -> -66 -> 0.34 V
    ]
}

/// An OMRON advertisement from [`TEST_MAC`].
pub fn advertisement(name: &str, data: Vec<u8>) -> Advertisement {
    Advertisement {
        address: TEST_MAC,
        name: name.to_string(),
        manufacturer_data: Some(ManufacturerData {
            company_id: crate::filter::OMRON_COMPANY_ID,
            data,
        }),
        rssi: -60,
    }
}

/// Calls made on a [`FakeCentral`], in order.
pub type Calls = Arc<Mutex<Vec<String>>>;

/// Records scan control calls; `scan` fails when `fail_scan` is set.
pub struct FakeCentral {
    calls: Calls,
    fail_scan: bool,
}

impl FakeCentral {
    fn record(&self, call: String, result: Result<(), ScanError>) -> CentralFuture<'_> {
        self.calls.lock().unwrap().push(call);
        Box::pin(async move { result })
    }
}

impl Central for FakeCentral {
    fn scan(&mut self, allow_duplicates: bool) -> CentralFuture<'_> {
        let result = if self.fail_scan {
            Err(ScanError::Bluetooth("Failed to send HCI command: Network is down".into()))
        } else {
            Ok(())
        };
        self.record(format!("scan({allow_duplicates})"), result)
    }

    fn stop_scanning(&mut self) -> CentralFuture<'_> {
        self.record("stop_scanning".into(), Ok(()))
    }

    fn stop(&mut self) -> CentralFuture<'_> {
        self.record("stop".into(), Ok(()))
    }
}

/// Replays `events` on open and then closes the stream, unless held open.
pub struct FakeScanner {
    events: Vec<ScanEvent>,
    hold_open: bool,
    fail_scan: bool,
    calls: Calls,
    senders: Mutex<Vec<mpsc::Sender<ScanEvent>>>,
}

impl FakeScanner {
    pub fn new(events: Vec<ScanEvent>) -> Self {
        Self {
            events,
            hold_open: false,
            fail_scan: false,
            calls: Calls::default(),
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Keep the event stream open after replaying, so only `stop` ends a run.
    pub fn held_open(events: Vec<ScanEvent>) -> Self {
        Self {
            hold_open: true,
            ..Self::new(events)
        }
    }

    /// An adapter that reports power but cannot start scanning.
    pub fn failing_scan(events: Vec<ScanEvent>) -> Self {
        Self {
            fail_scan: true,
            ..Self::new(events)
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Scanner for FakeScanner {
    fn open(&self, _backend: Backend) -> OpenFuture<'_> {
        let (tx, rx) = mpsc::channel(self.events.len().max(1));
        for event in &self.events {
            tx.try_send(event.clone()).unwrap();
        }
        if self.hold_open {
            self.senders.lock().unwrap().push(tx);
        }
        let central = FakeCentral {
            calls: Arc::clone(&self.calls),
            fail_scan: self.fail_scan,
        };
        Box::pin(async move {
            Ok(Connection {
                central: Box::new(central),
                events: rx,
            })
        })
    }
}

/// A scanner whose adapter cannot be opened.
pub struct FailingScanner;

impl Scanner for FailingScanner {
    fn open(&self, _backend: Backend) -> OpenFuture<'_> {
        Box::pin(async { Err(ScanError::Bluetooth("no adapter".into())) })
    }
}
