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

//! Raw `AF_BLUETOOTH` socket plumbing.
//!
//! The only place in the crate that talks to the kernel directly. Everything
//! above sees a [BtSocket]: a full-duplex byte stream with a poll-bounded
//! read and an out-of-band shutdown that unblocks a reader on another thread.

#![allow(unsafe_code)]

use crate::address::{Address, AddressType};
use std::os::raw::{c_int, c_void};
use std::sync::atomic::{AtomicI32, Ordering};
use std::{io, mem};

/// L2CAP fixed channel id carrying the Attribute Protocol.
pub const L2CAP_CID_ATT: u16 = 0x0004;

mod ffi {
    use std::os::raw::c_int;

    pub const BTPROTO_L2CAP: c_int = 0;
    pub const BTPROTO_HCI: c_int = 1;

    pub const SOL_HCI: c_int = 0;
    pub const HCI_FILTER: c_int = 2;

    pub const HCI_CHANNEL_RAW: u16 = 0;
    pub const HCI_CHANNEL_CONTROL: u16 = 3;
    pub const HCI_DEV_NONE: u16 = 0xffff;

    #[repr(C)]
    pub struct sockaddr_hci {
        pub hci_family: libc::sa_family_t,
        pub hci_dev: u16,
        pub hci_channel: u16,
    }

    #[repr(C)]
    pub struct bdaddr_t {
        pub b: [u8; 6],
    }

    #[repr(C)]
    pub struct sockaddr_l2 {
        pub l2_family: libc::sa_family_t,
        pub l2_psm: u16,
        pub l2_bdaddr: bdaddr_t,
        pub l2_cid: u16,
        pub l2_bdaddr_type: u8,
    }

    /// `struct hci_filter` from the kernel's HCI socket interface.
    #[repr(C)]
    pub struct hci_filter {
        pub type_mask: u32,
        pub event_mask: [u32; 2],
        pub opcode: u16,
    }
}

/// A connected or bound Bluetooth kernel socket.
///
/// Reads, writes and shutdown all take `&self`: the descriptor is shared
/// between one reader thread and any number of writers.
pub struct BtSocket {
    // -1 once shut down, so a late double-close cannot hit a reused fd.
    fd: AtomicI32,
}

impl BtSocket {
    fn from_fd(fd: c_int) -> BtSocket {
        BtSocket { fd: AtomicI32::new(fd) }
    }

    fn fd(&self) -> c_int {
        self.fd.load(Ordering::SeqCst)
    }

    /// Opens the process-global management control channel.
    pub fn open_mgmt() -> io::Result<BtSocket> {
        let socket = Self::open_hci_channel(ffi::HCI_DEV_NONE, ffi::HCI_CHANNEL_CONTROL)?;
        Ok(socket)
    }

    /// Opens a raw HCI channel bound to one adapter, with an event filter
    /// admitting exactly `events`.
    pub fn open_hci(dev_id: u16, events: &[u8]) -> io::Result<BtSocket> {
        let socket = Self::open_hci_channel(dev_id, ffi::HCI_CHANNEL_RAW)?;
        socket.set_hci_event_filter(events)?;
        Ok(socket)
    }

    fn open_hci_channel(dev_id: u16, channel: u16) -> io::Result<BtSocket> {
        unsafe {
            let fd = libc::socket(
                libc::AF_BLUETOOTH,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                ffi::BTPROTO_HCI,
            );
            if fd == -1 {
                return Err(io::Error::last_os_error());
            }

            let params = ffi::sockaddr_hci {
                hci_family: libc::AF_BLUETOOTH as libc::sa_family_t,
                hci_dev: dev_id,
                hci_channel: channel,
            };
            let status = libc::bind(
                fd,
                &params as *const ffi::sockaddr_hci as *const _,
                mem::size_of_val(&params) as u32,
            );
            if status == -1 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }

            Ok(BtSocket::from_fd(fd))
        }
    }

    /// Installs an HCI socket filter passing event packets with the given
    /// event codes. Without a filter the kernel delivers nothing on a raw
    /// channel.
    fn set_hci_event_filter(&self, events: &[u8]) -> io::Result<()> {
        const HCI_EVENT_PKT: u32 = 0x04;
        let mut filter = ffi::hci_filter {
            type_mask: 1 << HCI_EVENT_PKT,
            event_mask: [0, 0],
            opcode: 0,
        };
        for &evt in events {
            filter.event_mask[(evt >> 5) as usize & 1] |= 1 << (evt & 0x1f);
        }
        unsafe {
            let status = libc::setsockopt(
                self.fd(),
                ffi::SOL_HCI,
                ffi::HCI_FILTER,
                &filter as *const ffi::hci_filter as *const c_void,
                mem::size_of_val(&filter) as libc::socklen_t,
            );
            if status == -1 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Opens an L2CAP stream on the ATT fixed channel to `peer`.
    ///
    /// Binds the local adapter address first so the kernel routes through the
    /// intended controller.
    pub fn open_l2cap_att(
        local: Address,
        local_type: AddressType,
        peer: Address,
        peer_type: AddressType,
    ) -> io::Result<BtSocket> {
        unsafe {
            let fd = libc::socket(
                libc::AF_BLUETOOTH,
                libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC,
                ffi::BTPROTO_L2CAP,
            );
            if fd == -1 {
                return Err(io::Error::last_os_error());
            }
            let socket = BtSocket::from_fd(fd);

            let local_params = ffi::sockaddr_l2 {
                l2_family: libc::AF_BLUETOOTH as libc::sa_family_t,
                l2_psm: 0,
                l2_bdaddr: ffi::bdaddr_t { b: local.to_le_bytes() },
                l2_cid: L2CAP_CID_ATT.to_le(),
                l2_bdaddr_type: local_type.code(),
            };
            let status = libc::bind(
                fd,
                &local_params as *const ffi::sockaddr_l2 as *const _,
                mem::size_of_val(&local_params) as u32,
            );
            if status == -1 {
                return Err(io::Error::last_os_error());
            }

            let peer_params = ffi::sockaddr_l2 {
                l2_family: libc::AF_BLUETOOTH as libc::sa_family_t,
                l2_psm: 0,
                l2_bdaddr: ffi::bdaddr_t { b: peer.to_le_bytes() },
                l2_cid: L2CAP_CID_ATT.to_le(),
                l2_bdaddr_type: peer_type.code(),
            };
            let status = libc::connect(
                fd,
                &peer_params as *const ffi::sockaddr_l2 as *const _,
                mem::size_of_val(&peer_params) as u32,
            );
            if status == -1 {
                return Err(io::Error::last_os_error());
            }

            Ok(socket)
        }
    }

    /// Blocking read, bounded by `timeout_ms`.
    ///
    /// Returns `ErrorKind::TimedOut` when nothing arrived in time and
    /// `ErrorKind::UnexpectedEof` when the socket was shut down or closed by
    /// the peer.
    pub fn read_timeout(&self, buf: &mut [u8], timeout_ms: u32) -> io::Result<usize> {
        let fd = self.fd();
        if fd < 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        unsafe {
            let mut pollfd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };
            let ready = libc::poll(&mut pollfd, 1, timeout_ms as c_int);
            if ready == -1 {
                return Err(io::Error::last_os_error());
            }
            if ready == 0 {
                return Err(io::ErrorKind::TimedOut.into());
            }
        }
        self.read(buf)
    }

    /// Blocking read without a timeout bound.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = self.fd();
        if fd < 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        unsafe {
            let ret = libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len());
            if ret == -1 {
                return Err(io::Error::last_os_error());
            }
            if ret == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            Ok(ret as usize)
        }
    }

    /// Writes the whole buffer.
    pub fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let fd = self.fd();
        if fd < 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let mut written = 0;
        while written < buf.len() {
            unsafe {
                let ret = libc::write(
                    fd,
                    buf[written..].as_ptr() as *const c_void,
                    buf.len() - written,
                );
                if ret == -1 {
                    return Err(io::Error::last_os_error());
                }
                written += ret as usize;
            }
        }
        Ok(())
    }

    /// Out-of-band shutdown: a reader blocked in [BtSocket::read] or
    /// [BtSocket::read_timeout] on another thread returns immediately.
    pub fn shutdown(&self) {
        let fd = self.fd();
        if fd >= 0 {
            unsafe {
                libc::shutdown(fd, libc::SHUT_RDWR);
            }
        }
    }

    /// True while the descriptor has not been closed.
    pub fn is_open(&self) -> bool {
        self.fd() >= 0
    }
}

impl Drop for BtSocket {
    fn drop(&mut self) {
        let fd = self.fd.swap(-1, Ordering::SeqCst);
        if fd >= 0 {
            unsafe {
                libc::close(fd);
            }
        }
    }
}

/// Raw identity of an OS thread, for signal-based interruption.
pub type RawThread = libc::pthread_t;

extern "C" fn noop_sigalrm(_sig: c_int) {}

/// Installs a no-op `SIGALRM` handler so a directed signal interrupts a
/// blocked read instead of killing the process.
pub fn install_noop_sigalrm_handler() -> io::Result<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    let action = SigAction::new(
        SigHandler::Handler(noop_sigalrm),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGALRM, &action) }
        .map(|_| ())
        .map_err(io::Error::from)
}

/// Restores the default `SIGALRM` disposition.
pub fn restore_default_sigalrm_handler() {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    if let Err(e) = unsafe { sigaction(Signal::SIGALRM, &action) } {
        log::error!("restoring SIGALRM disposition failed: {e}");
    }
}

/// Sends `SIGALRM` to one thread, breaking it out of a blocked read.
pub fn interrupt_thread(thread: RawThread) {
    use nix::sys::signal::Signal;
    if let Err(e) = nix::sys::pthread::pthread_kill(thread, Signal::SIGALRM) {
        log::error!("interrupting reader thread failed: {e}");
    }
}
