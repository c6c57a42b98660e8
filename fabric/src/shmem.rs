// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! POSIX shared-memory windows and the double-buffered shmem port.
//!
//! Each region holds one link-latency window of big tokens plus a single
//! trailing sentinel byte: the producer fills the payload and sets the
//! sentinel to 1, the consumer spins on the sentinel, copies the payload
//! out, and resets it to 0 once the window has been switched. Exactly one
//! producer and one consumer ever touch a given sentinel.

use crate::error::Error;
use crate::ports::PortState;
use std::ffi::CString;
use std::time::Duration;

const SHMEM_EXTRA_BYTES: usize = 1;

/// Format a region name: `/port_<direction><basename>_<j>`, falling back
/// to the slot id when no basename was configured.
pub fn region_name(direction: &str, basename: Option<&str>, port_no: usize, j: usize) -> String {
    match basename {
        Some(base) => format!("/port_{}{}_{}", direction, base, j),
        None => format!("/port_{}{}_{}", direction, port_no, j),
    }
}

/// One mapped shared region: a token-window payload plus the ready
/// sentinel byte just past it.
pub struct ShmemRegion {
    ptr: *mut u8,
    payload_len: usize,
    name: String,
}

// The raw pointer is an exclusively-owned mapping; cross-process access is
// mediated by the sentinel protocol.
unsafe impl Send for ShmemRegion {}

impl ShmemRegion {
    /// Create (or truncate) and map a region. Used by the side that owns
    /// the region's lifetime.
    pub fn create(name: &str, payload_len: usize) -> Result<Self, Error> {
        let region = Self::open_flags(
            name,
            payload_len,
            libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC,
            true,
        )?;
        Ok(region)
    }

    /// Open a region created by a peer, without truncating it. Used by the
    /// NIC endpoint, where either side may arrive first.
    pub fn open_or_create(name: &str, payload_len: usize) -> Result<Self, Error> {
        Self::open_flags(name, payload_len, libc::O_RDWR | libc::O_CREAT, true)
    }

    /// Open a region a peer is responsible for creating, retrying until it
    /// appears. The lockstep protocol has no timeouts; a missing peer
    /// stalls the universe, which is correct.
    pub fn open_peer(name: &str, payload_len: usize) -> Result<Self, Error> {
        loop {
            match Self::open_flags(name, payload_len, libc::O_RDWR, false) {
                Ok(region) => return Ok(region),
                Err(err) => {
                    log::warn!("{}; retrying in 1s...", err);
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
        }
    }

    fn open_flags(
        name: &str,
        payload_len: usize,
        flags: libc::c_int,
        truncate: bool,
    ) -> Result<Self, Error> {
        let total_len = payload_len + SHMEM_EXTRA_BYTES;
        let cname = CString::new(name).expect("shmem region names contain no NUL");
        let os_error = || Error::Transport {
            name: name.to_string(),
            errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(-1),
        };

        log::info!("opening/creating shmem region {}", name);
        // SAFETY: plain POSIX shm_open/ftruncate/mmap on a name we own; the
        // mapping is checked against MAP_FAILED before use.
        unsafe {
            let fd = libc::shm_open(cname.as_ptr(), flags, libc::S_IRWXU as libc::mode_t);
            if fd == -1 {
                return Err(os_error());
            }
            if truncate && libc::ftruncate(fd, total_len as libc::off_t) == -1 {
                let err = os_error();
                libc::close(fd);
                return Err(err);
            }
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                total_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            libc::close(fd);
            if ptr == libc::MAP_FAILED {
                return Err(os_error());
            }
            Ok(ShmemRegion {
                ptr: ptr as *mut u8,
                payload_len,
                name: name.to_string(),
            })
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &[u8] {
        // SAFETY: the mapping is payload_len + 1 bytes and lives until drop.
        unsafe { std::slice::from_raw_parts(self.ptr, self.payload_len) }
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; &mut self guarantees exclusivity on this side.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.payload_len) }
    }

    pub fn sentinel(&self) -> u8 {
        // SAFETY: single-byte volatile read of the flag the peer publishes.
        unsafe { std::ptr::read_volatile(self.ptr.add(self.payload_len)) }
    }

    pub fn set_sentinel(&mut self, value: u8) {
        // SAFETY: single-byte volatile write; only one side ever writes it.
        unsafe { std::ptr::write_volatile(self.ptr.add(self.payload_len), value) }
    }

    /// Spin until the peer publishes the window. Lockstep simulation
    /// correctness forbids sleeping here.
    pub fn wait_ready(&self) {
        while self.sentinel() == 0 {
            std::hint::spin_loop();
        }
    }

    pub fn zero(&mut self) {
        self.payload_mut().fill(0);
        self.set_sentinel(0);
    }
}

impl Drop for ShmemRegion {
    fn drop(&mut self) {
        // Unlinking is the outer driver's responsibility; we only unmap.
        // SAFETY: ptr/len are the exact values the mapping was created with.
        unsafe {
            libc::munmap(
                self.ptr as *mut libc::c_void,
                self.payload_len + SHMEM_EXTRA_BYTES,
            );
        }
    }
}

/// A switch port backed by two double-buffered pairs of shared regions,
/// peered with either a NIC endpoint or another switch.
pub struct ShmemTransport {
    recv_bufs: [ShmemRegion; 2],
    send_bufs: [ShmemRegion; 2],
    round: usize,
}

impl ShmemTransport {
    /// A downlink port: the switch owns the regions and a NIC endpoint
    /// attaches to them. Reads node-to-switch, writes switch-to-node.
    pub fn downlink(
        port_no: usize,
        basename: Option<&str>,
        window_bytes: usize,
    ) -> Result<Self, Error> {
        log::info!("[SHMEM_PORT {}]: Creating Downlink Port", port_no);
        Self::open(port_no, basename, window_bytes, "nts", "stn", true)
    }

    /// An uplink port: the region pair belongs to the switch above us, so
    /// wait for it rather than creating. Directions are mirrored.
    pub fn uplink(
        port_no: usize,
        basename: Option<&str>,
        window_bytes: usize,
    ) -> Result<Self, Error> {
        log::info!("[SHMEM_PORT {}]: Creating Uplink Port", port_no);
        Self::open(port_no, basename, window_bytes, "stn", "nts", false)
    }

    fn open(
        port_no: usize,
        basename: Option<&str>,
        window_bytes: usize,
        recv_direction: &str,
        send_direction: &str,
        create: bool,
    ) -> Result<Self, Error> {
        let open_pair = |direction: &str| -> Result<[ShmemRegion; 2], Error> {
            let mut regions = Vec::with_capacity(2);
            for j in 0..2 {
                let name = region_name(direction, basename, port_no, j);
                let mut region = if create {
                    ShmemRegion::create(&name, window_bytes)?
                } else {
                    ShmemRegion::open_peer(&name, window_bytes)?
                };
                if create {
                    region.zero();
                }
                regions.push(region);
            }
            Ok(regions.try_into().ok().unwrap())
        };
        let recv_bufs = open_pair(recv_direction)?;
        let send_bufs = open_pair(send_direction)?;
        log::info!("[SHMEM_PORT {}]: Done creating port", port_no);
        Ok(ShmemTransport {
            recv_bufs,
            send_bufs,
            round: 0,
        })
    }

    /// Publish the assembled output window to the peer.
    pub fn send(&mut self, state: &mut PortState) -> Result<(), Error> {
        let out = &mut self.send_bufs[self.round];
        out.payload_mut().copy_from_slice(&state.output_window);
        // This port type does not compress empty windows; clear the flag so
        // the peer does not misread it as payload.
        bigtoken::clear_empty_mark(out.payload_mut());
        out.set_sentinel(1);
        Ok(())
    }

    /// Spin for the peer's window, then bring it into the port state.
    pub fn recv(&mut self, state: &mut PortState) -> Result<(), Error> {
        let inbound = &self.recv_bufs[self.round];
        inbound.wait_ready();
        state.input_window.copy_from_slice(inbound.payload());
        Ok(())
    }

    pub fn tick_pre(&mut self, _state: &mut PortState) {}

    /// Release the consumed inbound window back to the peer and flip the
    /// double buffer.
    pub fn tick(&mut self, _state: &mut PortState) {
        self.recv_bufs[self.round].set_sentinel(0);
        self.round = (self.round + 1) % 2;
    }
}
