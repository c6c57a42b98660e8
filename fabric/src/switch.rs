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

//! The crossbar core and the per-window iteration loop.
//!
//! Each link-latency window: every port publishes its previous output
//! window and blocks for its next input window; then the switching pass
//! reassembles packets, orders them globally by simulated timestamp,
//! resolves destinations, and lays eligible packets into output windows.
//! Reassembly and emit are data-parallel across ports; the global ordering
//! and routing step is the serialization point.

use crate::config::{RouteTarget, SwitchConfig, Topology};
use crate::error::Error;
use crate::ports::{PortState, SwitchPacket, Transport};
use crate::Cycle;
use bigtoken::EtherHeader;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Heap key for the global ordering pass. `seq` records insertion order so
/// that equal timestamps pop deterministically.
struct TimestampedPacket {
    timestamp: Cycle,
    seq: u64,
    packet: SwitchPacket,
}

impl PartialEq for TimestampedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.seq == other.seq
    }
}

impl Eq for TimestampedPacket {}

impl PartialOrd for TimestampedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimestampedPacket {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the smallest timestamp first.
        (other.timestamp, other.seq).cmp(&(self.timestamp, self.seq))
    }
}

/// Switch one link-latency window across all ports.
pub fn do_fast_switching<R: Rng>(
    cfg: &SwitchConfig,
    topology: &Topology,
    states: &mut [PortState],
    cycles_start: Cycle,
    rng: &mut R,
) -> Result<(), Error> {
    // Reassemble raw input windows into packets, one thread per port.
    states.par_iter_mut().for_each(|state| {
        state.setup_send_buf();
        state.reassemble_inbound(cfg, cycles_start);
    });

    // Collect every completed packet into one timestamp-ordered heap. The
    // switching itself is just shuffling owned packets, so it is fast, but
    // it has to be serial.
    let mut pqueue = BinaryHeap::new();
    let mut seq = 0u64;
    for state in states.iter_mut() {
        while let Some(packet) = state.inputqueue.pop_front() {
            pqueue.push(TimestampedPacket {
                timestamp: packet.timestamp,
                seq,
                packet,
            });
            seq += 1;
        }
    }

    // Route in global timestamp order.
    while let Some(TimestampedPacket { packet, .. }) = pqueue.pop() {
        log::debug!(
            "routing packet: timestamp({}) flits({}) sender({})",
            packet.timestamp,
            packet.flits_written(),
            packet.sender
        );
        let header = EtherHeader::from_first_flit(packet.first_flit());
        match topology.route(&header, rng)? {
            RouteTarget::Broadcast => {
                // Replicate to all downlinks plus at most the first uplink.
                // A broadcast arriving from an uplink therefore never goes
                // back up, which is what keeps broadcast storms impossible.
                let adduplink = usize::from(topology.num_uplinks() > 0);
                for i in 0..topology.num_downlinks() + adduplink {
                    if i != packet.sender {
                        states[i].outputqueue.push_back(packet.clone());
                    }
                }
            }
            RouteTarget::Port(dest) => states[dest].outputqueue.push_back(packet),
        }
    }

    // Flush whatever is egress-eligible, one thread per port again.
    states
        .par_iter_mut()
        .for_each(|state| state.write_flits_to_output(cfg, cycles_start));

    Ok(())
}

/// One switch process: configuration, static port map, per-port state and
/// transports, and the simulated clock. All loop-mutable state lives here.
pub struct Switch {
    cfg: SwitchConfig,
    topology: Topology,
    states: Vec<PortState>,
    transports: Vec<Transport>,
    this_iter_cycles_start: Cycle,
    rng: Xoshiro256StarStar,
}

impl Switch {
    /// Transports must line up with the topology: downlink transports on
    /// ports `[0, num_downlinks)`, uplinks after. Downlinks get the egress
    /// bandwidth throttle; uplinks run unthrottled.
    pub fn new(cfg: SwitchConfig, topology: Topology, transports: Vec<Transport>, seed: u64) -> Self {
        assert_eq!(transports.len(), topology.num_ports());
        let states = (0..transports.len())
            .map(|port_no| {
                PortState::new(
                    port_no,
                    cfg.num_bigtokens(),
                    port_no < topology.num_downlinks(),
                )
            })
            .collect();
        Switch {
            cfg,
            topology,
            states,
            transports,
            this_iter_cycles_start: 0,
            rng: Xoshiro256StarStar::seed_from_u64(seed),
        }
    }

    /// Drive one full iteration: send, recv, tick_pre, switch, tick.
    pub fn step(&mut self) -> Result<(), Error> {
        let states = &mut self.states;
        let transports = &mut self.transports;

        states
            .par_iter_mut()
            .zip(transports.par_iter_mut())
            .try_for_each(|(state, transport)| transport.send(state))?;

        // Receives block per port until the peer's window lands.
        states
            .par_iter_mut()
            .zip(transports.par_iter_mut())
            .try_for_each(|(state, transport)| transport.recv(state))?;

        states
            .par_iter_mut()
            .zip(transports.par_iter_mut())
            .for_each(|(state, transport)| transport.tick_pre(state));

        do_fast_switching(
            &self.cfg,
            &self.topology,
            states,
            self.this_iter_cycles_start,
            &mut self.rng,
        )?;

        self.this_iter_cycles_start += self.cfg.link_latency;

        states
            .par_iter_mut()
            .zip(transports.par_iter_mut())
            .for_each(|(state, transport)| transport.tick(state));

        Ok(())
    }

    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            self.step()?;
        }
    }
}
