//! Raw HCI socket backend.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.

use super::{
    AdapterState, Advertisement, Central, CentralFuture, Connection, ManufacturerData,
    SCAN_EVENT_CHANNEL_BUFFER_SIZE, ScanError, ScanEvent,
};
use crate::mac_address::MacAddress;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;
const SOL_HCI: c_int = 0;
const HCI_CHANNEL_RAW: u16 = 0;

/// `_IOR('H', 211, int)`
const HCIGETDEVINFO: libc::c_ulong = 0x8004_48D3;
/// Bit of `hci_dev_info.flags` set while the controller is up
const HCI_UP: u32 = 0;

/// Controller index the backend binds to (`hci0`).
const HCI_DEV_ID: u16 = 0;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// LE Set Scan Parameters values
const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;
/// 10ms in 0.625ms units
const SCAN_INTERVAL: u16 = 0x0010;
const SCAN_WINDOW: u16 = 0x0010;

// AD types
const AD_TYPE_SHORT_LOCAL_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// Max HCI event size
const HCI_MAX_EVENT_SIZE: usize = 260;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// `struct hci_dev_info` from the kernel's HCI socket interface
#[repr(C)]
#[derive(Default)]
struct HciDevInfo {
    dev_id: u16,
    name: [u8; 8],
    bdaddr: [u8; 6],
    flags: u32,
    dev_type: u8,
    features: [u8; 8],
    pkt_type: u32,
    link_policy: u32,
    link_mode: u32,
    acl_mtu: u16,
    acl_pkts: u16,
    sco_mtu: u16,
    sco_pkts: u16,
    stat: [u32; 10],
}

/// HCI filter structure for raw sockets
#[repr(C)]
#[derive(Default)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << u32::from(ptype);
    }

    fn set_event(&mut self, event: u8) {
        let bit = usize::from(event);
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Parameters of LE Set Scan Parameters for a passive scan.
fn scan_parameters() -> [u8; 7] {
    let [interval_lo, interval_hi] = SCAN_INTERVAL.to_le_bytes();
    let [window_lo, window_hi] = SCAN_WINDOW.to_le_bytes();
    [
        LE_SCAN_PASSIVE,
        interval_lo,
        interval_hi,
        window_lo,
        window_hi,
        LE_PUBLIC_ADDRESS,
        FILTER_POLICY_ACCEPT_ALL,
    ]
}

/// Parameters of LE Set Scan Enable.
fn scan_enable(enable: bool, allow_duplicates: bool) -> [u8; 2] {
    [u8::from(enable), u8::from(!allow_duplicates)]
}

fn os_error(context: &str) -> ScanError {
    ScanError::Bluetooth(format!("{context}: {}", io::Error::last_os_error()))
}

/// Open a raw HCI socket bound to `dev_id`
fn open_hci_socket(dev_id: u16) -> Result<OwnedFd, ScanError> {
    // SOCK_NONBLOCK is required for AsyncFd
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };
    if fd < 0 {
        return Err(os_error("Failed to create HCI socket"));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: HCI_CHANNEL_RAW,
    };
    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to bind HCI socket"));
    }

    Ok(fd)
}

/// Only let LE meta events through
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::default();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to set HCI filter"));
    }

    Ok(())
}

/// Power state implied by the controller's device flags.
fn state_from_flags(flags: u32) -> AdapterState {
    if flags & (1 << HCI_UP) != 0 {
        AdapterState::PoweredOn
    } else {
        AdapterState::PoweredOff
    }
}

fn adapter_state(fd: &OwnedFd, dev_id: u16) -> Result<AdapterState, ScanError> {
    let mut info = HciDevInfo {
        dev_id,
        ..HciDevInfo::default()
    };
    let ret = unsafe {
        libc::ioctl(
            fd.as_raw_fd(),
            HCIGETDEVINFO as _,
            &mut info as *mut HciDevInfo as *mut c_void,
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to read HCI device info"));
    }

    Ok(state_from_flags(info.flags))
}

fn send_hci_command(fd: &OwnedFd, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
    let packet = hci_command_packet(OGF_LE_CTL, ocf, params);
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to send HCI command"));
    }

    Ok(())
}

/// Walk the AD structures of one report, collecting name and manufacturer data.
fn parse_ad_structures(ad_data: &[u8]) -> (String, Option<ManufacturerData>) {
    let mut name = String::new();
    let mut manufacturer_data = None;

    let mut offset = 0;
    while offset + 2 <= ad_data.len() {
        let len = usize::from(ad_data[offset]);
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }
        let ad_type = ad_data[offset + 1];
        let value = &ad_data[offset + 2..offset + 1 + len];

        match ad_type {
            AD_TYPE_COMPLETE_LOCAL_NAME => name = String::from_utf8_lossy(value).into_owned(),
            AD_TYPE_SHORT_LOCAL_NAME if name.is_empty() => {
                name = String::from_utf8_lossy(value).into_owned()
            }
            AD_TYPE_MANUFACTURER_DATA if value.len() >= 2 => {
                manufacturer_data = Some(ManufacturerData {
                    company_id: u16::from_le_bytes([value[0], value[1]]),
                    data: value.to_vec(),
                });
            }
            _ => {}
        }

        offset += 1 + len;
    }

    (name, manufacturer_data)
}

/// Parse an LE advertising report event (starting at the packet type byte).
///
/// Controllers deliver one report per event in practice; only the first is read.
fn parse_advertising_report(packet: &[u8]) -> Option<Advertisement> {
    // packet type, event code, parameter length, subevent
    if packet.len() < 4
        || packet[0] != HCI_EVENT_PKT
        || packet[1] != EVT_LE_META_EVENT
        || packet[3] != EVT_LE_ADVERTISING_REPORT
    {
        return None;
    }
    let report = &packet[4..];

    // num_reports(1) event_type(1) addr_type(1) addr(6) data_len(1)
    if report.len() < 10 || report[0] == 0 {
        return None;
    }
    let mut addr = [0u8; 6];
    addr.copy_from_slice(&report[3..9]);
    let data_len = usize::from(report[9]);

    // AD data followed by a signed RSSI byte
    let ad_data = report.get(10..10 + data_len)?;
    let rssi = *report.get(10 + data_len)? as i8;

    let (name, manufacturer_data) = parse_ad_structures(ad_data);

    Some(Advertisement {
        address: MacAddress::from_le_bytes(addr),
        name,
        manufacturer_data,
        rssi: i16::from(rssi),
    })
}

/// Open `hci0`, configure a passive LE scan and start forwarding advertising reports.
///
/// Fails if the controller is down or rejects the scan parameters. Scanning
/// is only enabled once the gate calls [`Central::scan`].
pub async fn open() -> Result<Connection, ScanError> {
    let event_fd = open_hci_socket(HCI_DEV_ID)?;
    set_hci_filter(&event_fd)?;
    let cmd_fd = open_hci_socket(HCI_DEV_ID)?;

    if adapter_state(&cmd_fd, HCI_DEV_ID)? != AdapterState::PoweredOn {
        return Err(ScanError::Bluetooth(format!("hci{HCI_DEV_ID} is down")));
    }
    send_hci_command(&cmd_fd, OCF_LE_SET_SCAN_PARAMETERS, &scan_parameters())?;

    let async_fd = AsyncFd::new(event_fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {e}")))?;

    let (tx, rx) = mpsc::channel(SCAN_EVENT_CHANNEL_BUFFER_SIZE);
    let _ = tx.send(ScanEvent::StateChanged(AdapterState::PoweredOn)).await;

    let reader = tokio::spawn(read_reports(async_fd, tx));

    Ok(Connection {
        central: Box::new(HciCentral {
            cmd_fd: Some(cmd_fd),
            reader,
        }),
        events: rx,
    })
}

async fn read_reports(async_fd: AsyncFd<OwnedFd>, tx: mpsc::Sender<ScanEvent>) {
    let mut buf = [0u8; HCI_MAX_EVENT_SIZE];

    loop {
        let mut guard = match async_fd.readable().await {
            Ok(guard) => guard,
            Err(error) => {
                tracing::warn!(%error, "HCI socket failed");
                break;
            }
        };

        // Drain all available packets before waiting again
        loop {
            let read = guard.try_io(|inner| {
                let ret = unsafe {
                    libc::read(
                        inner.as_raw_fd(),
                        buf.as_mut_ptr() as *mut c_void,
                        buf.len(),
                    )
                };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            });

            let n = match read {
                Ok(Ok(n)) if n > 0 => n,
                Ok(Ok(_)) => break,
                Ok(Err(error)) => {
                    tracing::warn!(%error, "HCI read failed");
                    let _ = tx.send(ScanEvent::StateChanged(AdapterState::Unknown)).await;
                    return;
                }
                Err(_would_block) => break,
            };

            if let Some(advertisement) = parse_advertising_report(&buf[..n])
                && tx.send(ScanEvent::Discovered(advertisement)).await.is_err()
            {
                return;
            }
        }
    }

    let _ = tx.send(ScanEvent::StateChanged(AdapterState::Unknown)).await;
}

struct HciCentral {
    cmd_fd: Option<OwnedFd>,
    reader: JoinHandle<()>,
}

impl HciCentral {
    fn cmd_fd(&self) -> Result<&OwnedFd, ScanError> {
        self.cmd_fd.as_ref().ok_or(ScanError::NotInitialized)
    }

    fn set_scan(&self, enable: bool, allow_duplicates: bool) -> Result<(), ScanError> {
        let fd = self.cmd_fd()?;
        if enable {
            send_hci_command(fd, OCF_LE_SET_SCAN_PARAMETERS, &scan_parameters())?;
        }
        send_hci_command(
            fd,
            OCF_LE_SET_SCAN_ENABLE,
            &scan_enable(enable, allow_duplicates),
        )?;
        tracing::info!(enable, allow_duplicates, "HCI LE scan updated");
        Ok(())
    }
}

impl Central for HciCentral {
    fn scan(&mut self, allow_duplicates: bool) -> CentralFuture<'_> {
        let result = self.set_scan(true, allow_duplicates);
        Box::pin(async move { result })
    }

    fn stop_scanning(&mut self) -> CentralFuture<'_> {
        let result = self.set_scan(false, false);
        Box::pin(async move { result })
    }

    fn stop(&mut self) -> CentralFuture<'_> {
        let result = self.set_scan(false, false);
        self.reader.abort();
        self.cmd_fd = None;
        Box::pin(async move { result })
    }
}
