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

use crate::config::SwitchConfig;
use crate::error::Error;
use crate::shmem::ShmemTransport;
use crate::tap::TapTransport;
use crate::Cycle;
use bigtoken::{TokenWindow, FLIT_SIZE_BYTES, PACKET_MAX_FLITS};
use std::collections::VecDeque;

/// Output buffer bound in flits, modeling a real switch's egress memory.
#[cfg(feature = "limited-bufsize")]
pub const OUTPUT_BUF_SIZE: i64 = 131072;

/// A packet under reassembly or in flight inside the switch.
///
/// Owned by exactly one queue at a time; moved between queues, and cloned
/// only for broadcast replication.
#[derive(Clone, Debug)]
pub struct SwitchPacket {
    /// Simulated cycle at which the packet becomes eligible for egress.
    pub timestamp: Cycle,
    /// Ingress port.
    pub sender: usize,
    dat: Vec<u8>,
    amtwritten: usize,
    amtread: usize,
}

impl SwitchPacket {
    pub fn new(timestamp: Cycle, sender: usize) -> Self {
        SwitchPacket {
            timestamp,
            sender,
            dat: vec![0u8; FLIT_SIZE_BYTES * PACKET_MAX_FLITS],
            amtwritten: 0,
            amtread: 0,
        }
    }

    /// Append one flit. The buffer is sized for a max Ethernet frame plus
    /// slack; overrunning it means the ingress stream is corrupt, which the
    /// lossless fabric cannot tolerate.
    pub fn push_flit(&mut self, flit: &[u8]) {
        assert!(
            self.amtwritten < PACKET_MAX_FLITS,
            "packet from port {} overran {} flits",
            self.sender,
            PACKET_MAX_FLITS
        );
        let start = self.amtwritten * FLIT_SIZE_BYTES;
        self.dat[start..start + FLIT_SIZE_BYTES].copy_from_slice(flit);
        self.amtwritten += 1;
    }

    pub fn flit(&self, index: usize) -> &[u8] {
        let start = index * FLIT_SIZE_BYTES;
        &self.dat[start..start + FLIT_SIZE_BYTES]
    }

    pub fn first_flit(&self) -> &[u8] {
        self.flit(0)
    }

    /// Flits accumulated during reassembly.
    pub fn flits_written(&self) -> usize {
        self.amtwritten
    }

    /// Flits already emitted on egress.
    pub fn flits_read(&self) -> usize {
        self.amtread
    }
}

/// Per-port switching state: the current input/output windows and the
/// packet queues on either side of the crossbar.
///
/// The reassembly and emit phases touch only this state, so they run with
/// no synchronization, one port per thread.
#[derive(Clone, Debug)]
pub struct PortState {
    pub port_no: usize,
    /// Downlinks are bandwidth-throttled on egress; uplinks are not.
    pub throttle: bool,
    pub input_window: TokenWindow,
    pub output_window: TokenWindow,
    pub input_in_progress: Option<SwitchPacket>,
    pub inputqueue: VecDeque<SwitchPacket>,
    pub outputqueue: VecDeque<SwitchPacket>,
}

impl PortState {
    pub fn new(port_no: usize, num_bigtokens: usize, throttle: bool) -> Self {
        PortState {
            port_no,
            throttle,
            input_window: TokenWindow::new(num_bigtokens),
            output_window: TokenWindow::new(num_bigtokens),
            input_in_progress: None,
            inputqueue: VecDeque::new(),
            outputqueue: VecDeque::new(),
        }
    }

    /// Zero the outbound window's meta words so an untouched slot reads as
    /// "no valid flit this cycle".
    pub fn setup_send_buf(&mut self) {
        bigtoken::clear_meta(&mut self.output_window);
    }

    /// Walk the inbound window and fold its valid flits into packets,
    /// pushing each completed packet onto `inputqueue`.
    pub fn reassemble_inbound(&mut self, cfg: &SwitchConfig, cycles_start: Cycle) {
        for tokenno in 0..cfg.num_tokens() {
            if !bigtoken::is_valid_flit(&self.input_window, tokenno) {
                continue;
            }
            let packet = self.input_in_progress.get_or_insert_with(|| {
                // Switching latency injected here is the min port-to-port
                // latency.
                SwitchPacket::new(
                    cycles_start + tokenno as Cycle + cfg.switch_latency,
                    self.port_no,
                )
            });
            packet.push_flit(bigtoken::get_flit(&self.input_window, tokenno));
            if bigtoken::is_last_flit(&self.input_window, tokenno) {
                log::trace!("port {}: token {} ends packet", self.port_no, tokenno);
                self.inputqueue
                    .push_back(self.input_in_progress.take().unwrap());
            }
        }
    }

    /// Drain `outputqueue` into the outbound window.
    ///
    /// A packet's flits land no earlier than the token slot matching its
    /// timestamp, and a throttled port only uses `throttle_numer` of every
    /// `throttle_denom` slots. A packet that crosses the window boundary
    /// stays at the queue head with `amtread` marking the resume point.
    pub fn write_flits_to_output(&mut self, cfg: &SwitchConfig, cycles_start: Cycle) {
        let num_tokens = cfg.num_tokens() as u64;
        let basetime = cycles_start;
        let maxtime = cycles_start + num_tokens;
        let mut flitswritten: u64 = 0;
        let mut empty_buf = true;

        while let Some(packet) = self.outputqueue.front_mut() {
            let outputtimestamp = packet.timestamp;
            if outputtimestamp >= maxtime {
                // The queue is time-sorted; nothing further is eligible.
                break;
            }

            #[cfg(feature = "limited-bufsize")]
            {
                // Model bounded egress memory: a packet whose first flit
                // is too stale would have overflowed the buffer, so drop it.
                let diff = (basetime + flitswritten) as i64 - outputtimestamp as i64;
                if packet.amtread == 0 && diff > OUTPUT_BUF_SIZE {
                    log::warn!(
                        "port {}: overflow, drop pack: intended timestamp: {}, current timestamp: {}",
                        self.port_no,
                        outputtimestamp,
                        basetime + flitswritten
                    );
                    self.outputqueue.pop_front();
                    continue;
                }
            }

            // Advance to the packet's earliest eligible slot.
            let timestampdiff = outputtimestamp.saturating_sub(basetime);
            flitswritten = flitswritten.max(timestampdiff);

            let mut i = packet.amtread;
            while i < packet.amtwritten && flitswritten < num_tokens {
                let slot = flitswritten as usize;
                bigtoken::write_last_flit(
                    &mut self.output_window,
                    slot,
                    i == packet.amtwritten - 1,
                );
                bigtoken::write_valid_flit(&mut self.output_window, slot);
                let start = i * FLIT_SIZE_BYTES;
                bigtoken::write_flit(
                    &mut self.output_window,
                    slot,
                    &packet.dat[start..start + FLIT_SIZE_BYTES],
                );
                empty_buf = false;

                if !self.throttle {
                    flitswritten += 1;
                } else if (i as u64 + 1) % cfg.throttle_numer == 0 {
                    flitswritten += cfg.throttle_denom - cfg.throttle_numer + 1;
                } else {
                    flitswritten += 1;
                }
                i += 1;
            }

            if i == packet.amtwritten {
                self.outputqueue.pop_front();
            } else {
                packet.amtread = i;
                break;
            }
        }

        if empty_buf {
            bigtoken::mark_window_empty(&mut self.output_window);
        }
    }
}

/// The physical side of a port. The switch core never looks inside; it
/// drives the uniform send/recv/tick surface and the transport moves one
/// window per direction per iteration.
pub enum Transport {
    Shmem(ShmemTransport),
    Tap(TapTransport),
}

impl Transport {
    /// Publish the window assembled by the previous switching pass. May
    /// block on peer readiness.
    pub fn send(&mut self, state: &mut PortState) -> Result<(), Error> {
        match self {
            Transport::Shmem(t) => t.send(state),
            Transport::Tap(t) => t.send(state),
        }
    }

    /// Block until one full window of inbound big tokens is in
    /// `state.input_window`.
    pub fn recv(&mut self, state: &mut PortState) -> Result<(), Error> {
        match self {
            Transport::Shmem(t) => t.recv(state),
            Transport::Tap(t) => t.recv(state),
        }
    }

    /// Pre-switch accounting hook.
    pub fn tick_pre(&mut self, state: &mut PortState) {
        match self {
            Transport::Shmem(t) => t.tick_pre(state),
            Transport::Tap(t) => t.tick_pre(state),
        }
    }

    /// Post-switch bookkeeping, e.g. double-buffer flips.
    pub fn tick(&mut self, state: &mut PortState) {
        match self {
            Transport::Shmem(t) => t.tick(state),
            Transport::Tap(t) => t.tick(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SwitchConfig {
        SwitchConfig::new(14, 2, 200).unwrap()
    }

    fn flit_with_byte(b: u8) -> [u8; FLIT_SIZE_BYTES] {
        let mut flit = [0u8; FLIT_SIZE_BYTES];
        flit[0] = b;
        flit
    }

    #[test]
    fn test_reassembly_single_packet() {
        let cfg = test_config();
        let mut state = PortState::new(0, cfg.num_bigtokens(), true);
        for (slot, byte) in [(3usize, 0xa1u8), (4, 0xa2), (5, 0xa3)] {
            bigtoken::write_flit(&mut state.input_window, slot, &flit_with_byte(byte));
            bigtoken::write_valid_flit(&mut state.input_window, slot);
        }
        bigtoken::write_last_flit(&mut state.input_window, 5, true);

        state.reassemble_inbound(&cfg, 100);

        assert!(state.input_in_progress.is_none());
        assert_eq!(state.inputqueue.len(), 1);
        let packet = state.inputqueue.front().unwrap();
        // First flit at token 3, plus switching latency 2.
        assert_eq!(packet.timestamp, 105);
        assert_eq!(packet.sender, 0);
        assert_eq!(packet.flits_written(), 3);
        assert_eq!(packet.flit(0), &flit_with_byte(0xa1));
        assert_eq!(packet.flit(2), &flit_with_byte(0xa3));
    }

    #[test]
    fn test_reassembly_spans_windows() {
        let cfg = test_config();
        let mut state = PortState::new(1, cfg.num_bigtokens(), true);

        // Window N: two valid flits, no last bit.
        for slot in [12usize, 13] {
            bigtoken::write_flit(&mut state.input_window, slot, &flit_with_byte(slot as u8));
            bigtoken::write_valid_flit(&mut state.input_window, slot);
        }
        state.reassemble_inbound(&cfg, 0);
        assert!(state.input_in_progress.is_some());
        assert!(state.inputqueue.is_empty());

        // Window N+1: the closing flit.
        state.input_window = TokenWindow::new(cfg.num_bigtokens());
        bigtoken::write_flit(&mut state.input_window, 0, &flit_with_byte(0xee));
        bigtoken::write_valid_flit(&mut state.input_window, 0);
        bigtoken::write_last_flit(&mut state.input_window, 0, true);
        state.reassemble_inbound(&cfg, 14);

        assert!(state.input_in_progress.is_none());
        let packet = state.inputqueue.front().unwrap();
        assert_eq!(packet.flits_written(), 3);
        // Timestamp pinned by the first flit of the packet, not the last.
        assert_eq!(packet.timestamp, 12 + cfg.switch_latency);
    }

    #[test]
    fn test_emit_respects_timestamp() {
        let cfg = test_config();
        let mut state = PortState::new(0, cfg.num_bigtokens(), false);
        state.setup_send_buf();

        let mut packet = SwitchPacket::new(5, 1);
        packet.push_flit(&flit_with_byte(0x11));
        state.outputqueue.push_back(packet);

        state.write_flits_to_output(&cfg, 0);

        for slot in 0..5 {
            assert!(!bigtoken::is_valid_flit(&state.output_window, slot));
        }
        assert!(bigtoken::is_valid_flit(&state.output_window, 5));
        assert!(bigtoken::is_last_flit(&state.output_window, 5));
        assert_eq!(
            bigtoken::get_flit(&state.output_window, 5),
            &flit_with_byte(0x11)
        );
    }

    #[test]
    fn test_emit_future_packet_stays_queued() {
        let cfg = test_config();
        let mut state = PortState::new(0, cfg.num_bigtokens(), false);
        state.setup_send_buf();

        let mut packet = SwitchPacket::new(100, 1);
        packet.push_flit(&flit_with_byte(0x22));
        state.outputqueue.push_back(packet);

        state.write_flits_to_output(&cfg, 0);

        assert_eq!(state.outputqueue.len(), 1);
        assert!(bigtoken::is_window_marked_empty(&state.output_window));
    }

    #[test]
    fn test_emit_packet_resumes_across_windows() {
        let cfg = test_config();
        let mut state = PortState::new(0, cfg.num_bigtokens(), false);
        state.setup_send_buf();

        // 20 flits cannot fit in a 14-token window.
        let mut packet = SwitchPacket::new(0, 1);
        for i in 0..20u8 {
            packet.push_flit(&flit_with_byte(i));
        }
        state.outputqueue.push_back(packet);

        state.write_flits_to_output(&cfg, 0);
        assert_eq!(state.outputqueue.front().unwrap().flits_read(), 14);
        for slot in 0..cfg.num_tokens() {
            assert!(bigtoken::is_valid_flit(&state.output_window, slot));
            assert!(!bigtoken::is_last_flit(&state.output_window, slot));
        }

        // Next window: the remaining 6 flits drain and the packet is gone.
        state.setup_send_buf();
        state.write_flits_to_output(&cfg, 14);
        assert!(state.outputqueue.is_empty());
        for slot in 0..6 {
            assert!(bigtoken::is_valid_flit(&state.output_window, slot));
        }
        assert!(bigtoken::is_last_flit(&state.output_window, 5));
        assert_eq!(
            bigtoken::get_flit(&state.output_window, 5),
            &flit_with_byte(19)
        );
        assert!(!bigtoken::is_valid_flit(&state.output_window, 6));
    }

    #[test]
    fn test_emit_throttled_port_skips_slots() {
        // throttle 100/200 reduces to 1/2: every other slot usable.
        let cfg = SwitchConfig::new(14, 0, 100).unwrap();
        let mut state = PortState::new(0, cfg.num_bigtokens(), true);
        state.setup_send_buf();

        let mut packet = SwitchPacket::new(0, 1);
        for i in 0..4u8 {
            packet.push_flit(&flit_with_byte(i));
        }
        state.outputqueue.push_back(packet);

        state.write_flits_to_output(&cfg, 0);

        assert!(state.outputqueue.is_empty());
        let valid: Vec<usize> = (0..cfg.num_tokens())
            .filter(|slot| bigtoken::is_valid_flit(&state.output_window, *slot))
            .collect();
        assert_eq!(valid, vec![0, 2, 4, 6]);
    }
}
