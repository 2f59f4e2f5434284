// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end GATT client tests against a scripted in-memory peripheral.
//!
//! The fake peripheral serves a small attribute table:
//!
//! | handle | attribute |
//! |--------|-----------|
//! | 0x0001..0x0007 | Generic Access service (0x1800) |
//! | 0x0002/0x0003  | Device Name (0x2A00), read/write |
//! | 0x0004/0x0005  | Appearance (0x2A01), read |
//! | 0x0008..0xFFFF | Heart Rate service (0x180D) |
//! | 0x0009/0x000A  | Measurement (0x2A37), write-without-response + notify |
//! | 0x000B         | its CCCD (0x2902) |

use direct_bt::core::{Uuid, Uuid16};
use direct_bt::gatt::client::GattClient;
use direct_bt::gatt::{CharacteristicListener, CharacteristicProperty, GattCharacteristic};
use direct_bt::l2cap::ByteChannel;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

const DEVICE_NAME: &[u8] = b"Test-Peripheral";
const APPEARANCE: [u8; 2] = [0x41, 0x03];

struct Pipe {
    queue: Mutex<VecDeque<Vec<u8>>>,
    readable: Condvar,
    closed: AtomicBool,
}

impl Pipe {
    fn new() -> Arc<Pipe> {
        Arc::new(Pipe {
            queue: Mutex::new(VecDeque::new()),
            readable: Condvar::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn push(&self, datagram: Vec<u8>) {
        self.queue.lock().unwrap().push_back(datagram);
        self.readable.notify_all();
    }

    fn pop(&self) -> Option<Vec<u8>> {
        let mut queue = self.queue.lock().unwrap();
        loop {
            if let Some(datagram) = queue.pop_front() {
                return Some(datagram);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            queue = self.readable.wait(queue).unwrap();
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.readable.notify_all();
    }
}

/// One direction-pair endpoint of an in-memory datagram link.
struct PipeEnd {
    inbox: Arc<Pipe>,
    outbox: Arc<Pipe>,
}

impl PipeEnd {
    fn pair() -> (Arc<PipeEnd>, Arc<PipeEnd>) {
        let a_to_b = Pipe::new();
        let b_to_a = Pipe::new();
        (
            Arc::new(PipeEnd {
                inbox: Arc::clone(&b_to_a),
                outbox: Arc::clone(&a_to_b),
            }),
            Arc::new(PipeEnd {
                inbox: a_to_b,
                outbox: b_to_a,
            }),
        )
    }
}

impl ByteChannel for PipeEnd {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inbox.pop() {
            Some(datagram) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok(len)
            }
            None => Ok(0),
        }
    }

    fn send(&self, buf: &[u8]) -> io::Result<()> {
        if self.outbox.closed.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.outbox.push(buf.to_vec());
        Ok(())
    }

    fn shutdown(&self) {
        self.inbox.close();
        self.outbox.close();
    }

    fn is_open(&self) -> bool {
        !self.inbox.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct PeripheralLog {
    group_type_requests: AtomicUsize,
    write_requests: Mutex<Vec<(u16, Vec<u8>)>>,
    write_commands: Mutex<Vec<(u16, Vec<u8>)>>,
    cccd: Mutex<Vec<u8>>,
    confirmations: AtomicUsize,
}

fn le16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn error_rsp(req: u8, handle: u16, code: u8) -> Vec<u8> {
    let mut pdu = vec![0x01, req];
    pdu.extend_from_slice(&handle.to_le_bytes());
    pdu.push(code);
    pdu
}

/// Serves the attribute table on `end` until the link closes.
fn run_peripheral(end: Arc<PipeEnd>, log: Arc<PeripheralLog>) {
    let mut buf = [0_u8; 512];
    loop {
        let len = match end.recv(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(len) => len,
        };
        let pdu = &buf[..len];
        match pdu[0] {
            0x02 => {
                // Exchange MTU: offer 256.
                end.send(&[0x03, 0x00, 0x01]).unwrap();
            }
            0x10 => {
                log.group_type_requests.fetch_add(1, Ordering::SeqCst);
                let start = le16(&pdu[1..]);
                if start <= 0x0001 {
                    end.send(&[
                        0x11, 0x06, // entry length 6
                        0x01, 0x00, 0x07, 0x00, 0x00, 0x18, // GAP 0x0001..0x0007
                        0x08, 0x00, 0xFF, 0xFF, 0x0D, 0x18, // HR 0x0008..0xFFFF
                    ])
                    .unwrap();
                } else {
                    end.send(&error_rsp(0x10, start, 0x0A)).unwrap();
                }
            }
            0x08 => {
                // Read By Type (characteristic declarations).
                let start = le16(&pdu[1..]);
                let range_end = le16(&pdu[3..]);
                if start <= 0x0002 && range_end >= 0x0004 {
                    end.send(&[
                        0x09, 0x07, // entry length 7
                        0x02, 0x00, 0x0A, 0x03, 0x00, 0x00, 0x2A, // Device Name
                        0x04, 0x00, 0x02, 0x05, 0x00, 0x01, 0x2A, // Appearance
                    ])
                    .unwrap();
                } else if start <= 0x0009 && range_end >= 0x000A {
                    end.send(&[
                        0x09, 0x07, // entry length 7
                        0x09, 0x00, 0x14, 0x0A, 0x00, 0x37, 0x2A, // Measurement
                    ])
                    .unwrap();
                } else {
                    end.send(&error_rsp(0x08, start, 0x0A)).unwrap();
                }
            }
            0x04 => {
                // Find Information (descriptors).
                let start = le16(&pdu[1..]);
                if start == 0x000B {
                    end.send(&[0x05, 0x01, 0x0B, 0x00, 0x02, 0x29]).unwrap();
                } else {
                    end.send(&error_rsp(0x04, start, 0x0A)).unwrap();
                }
            }
            0x0A => {
                let handle = le16(&pdu[1..]);
                match handle {
                    0x0003 => {
                        let mut rsp = vec![0x0B];
                        rsp.extend_from_slice(DEVICE_NAME);
                        end.send(&rsp).unwrap();
                    }
                    0x0005 => {
                        let mut rsp = vec![0x0B];
                        rsp.extend_from_slice(&APPEARANCE);
                        end.send(&rsp).unwrap();
                    }
                    _ => end.send(&error_rsp(0x0A, handle, 0x02)).unwrap(),
                }
            }
            0x12 => {
                let handle = le16(&pdu[1..]);
                log.write_requests
                    .lock()
                    .unwrap()
                    .push((handle, pdu[3..].to_vec()));
                if handle == 0x000B {
                    *log.cccd.lock().unwrap() = pdu[3..].to_vec();
                    end.send(&[0x13]).unwrap();
                    // Notifications enabled: push two in-order values and one
                    // indication.
                    if pdu[3] & 0x01 != 0 {
                        end.send(&[0x1B, 0x0A, 0x00, 0x01]).unwrap();
                        end.send(&[0x1B, 0x0A, 0x00, 0x02]).unwrap();
                        end.send(&[0x1D, 0x0A, 0x00, 0x03]).unwrap();
                    }
                } else {
                    end.send(&error_rsp(0x12, handle, 0x03)).unwrap();
                }
            }
            0x52 => {
                let handle = le16(&pdu[1..]);
                log.write_commands
                    .lock()
                    .unwrap()
                    .push((handle, pdu[3..].to_vec()));
            }
            0x1E => {
                log.confirmations.fetch_add(1, Ordering::SeqCst);
            }
            other => {
                end.send(&error_rsp(other, 0x0000, 0x06)).unwrap();
            }
        }
    }
}

#[derive(Default)]
struct RecordingListener {
    notifications: Mutex<Vec<(u16, Vec<u8>)>>,
    indications: Mutex<Vec<(u16, Vec<u8>)>>,
}

impl CharacteristicListener for RecordingListener {
    fn notification_received(
        &self,
        characteristic: &Arc<GattCharacteristic>,
        value: &[u8],
        _timestamp_ms: u64,
    ) {
        self.notifications
            .lock()
            .unwrap()
            .push((characteristic.value_handle, value.to_vec()));
    }

    fn indication_received(
        &self,
        characteristic: &Arc<GattCharacteristic>,
        value: &[u8],
        _timestamp_ms: u64,
        _confirmation_sent: bool,
    ) {
        self.indications
            .lock()
            .unwrap()
            .push((characteristic.value_handle, value.to_vec()));
    }
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

struct Harness {
    client: Arc<GattClient>,
    log: Arc<PeripheralLog>,
    server: std::thread::JoinHandle<()>,
}

fn start_harness() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let (client_end, server_end) = PipeEnd::pair();
    let log = Arc::new(PeripheralLog::default());
    let server_log = Arc::clone(&log);
    let server = std::thread::spawn(move || run_peripheral(server_end, server_log));
    let client = GattClient::connect(client_end).expect("MTU exchange against fake peripheral");
    Harness { client, log, server }
}

#[test]
fn mtu_exchange_adopts_minimum() {
    let harness = start_harness();
    assert_eq!(256, harness.client.mtu());
    harness.client.disconnect();
    harness.server.join().unwrap();
}

#[test]
fn discovery_builds_the_attribute_hierarchy() {
    let harness = start_harness();
    let services = harness
        .client
        .discover_complete_primary_services()
        .expect("discovery");

    // A group reaching 0xFFFF ends discovery; no second request goes out.
    assert_eq!(1, harness.log.group_type_requests.load(Ordering::SeqCst));

    assert_eq!(2, services.len());
    assert_eq!(Uuid::from(Uuid16::from(0x1800_u16)), services[0].uuid);
    assert_eq!(Uuid::from(Uuid16::from(0x180D_u16)), services[1].uuid);

    // Handle ranges are sorted and pairwise disjoint.
    assert!(services[0].end_handle < services[1].start_handle);

    // Every characteristic sits inside its service range.
    for service in &services {
        for characteristic in &service.characteristics {
            assert!(service.start_handle <= characteristic.decl_handle);
            assert!(characteristic.decl_handle < characteristic.value_handle);
            assert!(characteristic.value_handle <= characteristic.end_handle);
            assert!(characteristic.end_handle <= service.end_handle);
        }
    }

    let gap = &services[0];
    assert_eq!(2, gap.characteristics.len());
    assert_eq!(0x0003, gap.characteristics[0].value_handle);
    assert_eq!(0x0005, gap.characteristics[1].value_handle);

    let measurement = &services[1].characteristics[0];
    assert_eq!(0x000A, measurement.value_handle);
    assert_eq!(0x000B, measurement.cccd().expect("CCCD discovered").handle);

    harness.client.disconnect();
    harness.server.join().unwrap();
}

#[test]
fn generic_access_read() {
    let harness = start_harness();
    let services = harness.client.discover_complete_primary_services().unwrap();
    let access = harness
        .client
        .read_generic_access(&services)
        .expect("GAP present");
    assert_eq!("Test-Peripheral", access.device_name);
    assert_eq!(0x0341, access.appearance);
    harness.client.disconnect();
    harness.server.join().unwrap();
}

#[test]
fn write_downgrades_to_command_without_write_property() {
    let harness = start_harness();
    let services = harness.client.discover_complete_primary_services().unwrap();
    let measurement = &services[1].characteristics[0];
    assert!(measurement
        .properties
        .has_property(CharacteristicProperty::WriteWithoutResponse));
    assert!(!measurement
        .properties
        .has_property(CharacteristicProperty::Write));

    harness
        .client
        .write_characteristic(measurement, b"hi")
        .expect("write command returns without a reply");

    let log = Arc::clone(&harness.log);
    assert!(wait_until(Duration::from_secs(2), || {
        !log.write_commands.lock().unwrap().is_empty()
    }));
    assert_eq!(
        vec![(0x000A_u16, b"hi".to_vec())],
        log.write_commands.lock().unwrap().clone()
    );
    // The downgrade never produced a Write Request for the value handle.
    assert!(!log
        .write_requests
        .lock()
        .unwrap()
        .iter()
        .any(|(handle, _)| *handle == 0x000A));

    harness.client.disconnect();
    harness.server.join().unwrap();
}

#[test]
fn notification_flow_preserves_order_and_confirms_indications() {
    let harness = start_harness();
    let services = harness.client.discover_complete_primary_services().unwrap();
    let measurement = Arc::clone(&services[1].characteristics[0]);

    let listener = Arc::new(RecordingListener::default());
    harness.client.add_listener(listener.clone());

    // Only notify can take effect: the characteristic lacks Indicate.
    let (notify, indicate) = harness
        .client
        .config_notification_indication(&measurement, true, true)
        .expect("CCCD write");
    assert!(notify);
    assert!(!indicate);
    assert_eq!(vec![0x01, 0x00], harness.log.cccd.lock().unwrap().clone());

    let recorded = Arc::clone(&listener);
    assert!(wait_until(Duration::from_secs(2), || {
        recorded.notifications.lock().unwrap().len() == 2
            && recorded.indications.lock().unwrap().len() == 1
    }));
    assert_eq!(
        vec![
            (0x000A_u16, vec![0x01_u8]),
            (0x000A_u16, vec![0x02_u8])
        ],
        listener.notifications.lock().unwrap().clone()
    );
    assert_eq!(
        vec![(0x000A_u16, vec![0x03_u8])],
        listener.indications.lock().unwrap().clone()
    );

    let log = Arc::clone(&harness.log);
    assert!(wait_until(Duration::from_secs(2), || {
        log.confirmations.load(Ordering::SeqCst) == 1
    }));

    harness.client.disconnect();
    harness.server.join().unwrap();
}

#[test]
fn channel_close_unblocks_and_closes_engine() {
    let harness = start_harness();
    assert!(harness.client.is_open());
    harness.client.disconnect();
    assert!(!harness.client.is_open());
    // Idempotent.
    harness.client.disconnect();
    harness.server.join().unwrap();
}
