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

use crate::error::Error;
use crate::Cycle;
use bigtoken::{EtherHeader, BIGTOKEN_SIZE_BYTES, TOKENS_PER_BIGTOKEN};
use rand::Rng;
use std::collections::HashMap;

/// Max egress bandwidth of a port in Gbps, for the 64-bit-flit build.
pub const MAX_BW: u32 = 200;

/// Reduce `n / d` by their GCD.
pub fn simplify_frac(n: u32, d: u32) -> (u32, u32) {
    let (mut a, mut b) = (n, d);
    while b > 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    (n / a, d / a)
}

/// Timing and throttle parameters of one switch process, fixed at startup
/// and threaded explicitly through the switching routine.
#[derive(Clone, Copy, Debug)]
pub struct SwitchConfig {
    /// Simulated wire delay in cycles; also the number of token slots in
    /// one window.
    pub link_latency: Cycle,
    /// Min port-to-port latency added to every packet's ingress cycle.
    pub switch_latency: Cycle,
    /// Usable fraction of egress token slots, reduced by GCD.
    pub throttle_numer: u64,
    pub throttle_denom: u64,
}

impl SwitchConfig {
    pub fn new(link_latency: Cycle, switch_latency: Cycle, bandwidth: u32) -> Result<Self, Error> {
        if link_latency == 0 || link_latency % TOKENS_PER_BIGTOKEN as u64 != 0 {
            return Err(Error::InvalidLinkLatency(link_latency));
        }
        if bandwidth > MAX_BW {
            return Err(Error::BandwidthTooHigh {
                requested: bandwidth,
                max: MAX_BW,
            });
        }
        let (numer, denom) = simplify_frac(bandwidth, MAX_BW);
        Ok(SwitchConfig {
            link_latency,
            switch_latency,
            throttle_numer: numer as u64,
            throttle_denom: denom as u64,
        })
    }

    /// Token slots per link-latency window.
    pub fn num_tokens(&self) -> usize {
        self.link_latency as usize
    }

    pub fn num_bigtokens(&self) -> usize {
        self.num_tokens() / TOKENS_PER_BIGTOKEN
    }

    pub fn window_bytes(&self) -> usize {
        self.num_bigtokens() * BIGTOKEN_SIZE_BYTES
    }
}

/// Where the switching phase sends one packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteTarget {
    /// All downlinks plus at most the first uplink, excluding the sender.
    Broadcast,
    Port(usize),
}

/// The static port map: how many ports exist, which are downlinks vs
/// uplinks, and which destination MAC lives behind which port.
///
/// Ports `[0, num_downlinks)` are downlinks, `[num_downlinks,
/// num_downlinks + num_uplinks)` are uplinks. A map entry equal to
/// `num_downlinks` is the "any uplink" sentinel, resolved to a uniformly
/// random uplink at egress time.
#[derive(Clone, Debug)]
pub struct Topology {
    num_downlinks: usize,
    num_uplinks: usize,
    mac2port: HashMap<u16, u16>,
}

impl Topology {
    pub fn new(num_downlinks: usize, num_uplinks: usize) -> Self {
        Topology {
            num_downlinks,
            num_uplinks,
            mac2port: HashMap::new(),
        }
    }

    pub fn map_mac(&mut self, mac_low: u16, port: u16) {
        self.mac2port.insert(mac_low, port);
    }

    pub fn num_downlinks(&self) -> usize {
        self.num_downlinks
    }

    pub fn num_uplinks(&self) -> usize {
        self.num_uplinks
    }

    pub fn num_ports(&self) -> usize {
        self.num_downlinks + self.num_uplinks
    }

    /// Resolve a packet's first-flit header to its egress target.
    ///
    /// MACs with no map entry route to an uplink when one exists (they
    /// belong to some other switch's subtree); on an uplink-less root
    /// switch they are a provisioning error.
    pub fn route<R: Rng>(&self, header: &EtherHeader, rng: &mut R) -> Result<RouteTarget, Error> {
        if header.is_multicast {
            return Ok(RouteTarget::Broadcast);
        }
        let any_uplink = |rng: &mut R| {
            let randval = rng.gen_range(0..self.num_uplinks);
            log::debug!("sending to random uplink {}", self.num_downlinks + randval);
            RouteTarget::Port(self.num_downlinks + randval)
        };
        match self.mac2port.get(&header.dst_mac_low).copied() {
            Some(port) if port as usize == self.num_downlinks && self.num_uplinks > 0 => {
                Ok(any_uplink(rng))
            }
            Some(port) if (port as usize) < self.num_ports() => Ok(RouteTarget::Port(port as usize)),
            None if self.num_uplinks > 0 => Ok(any_uplink(rng)),
            _ => Err(Error::UnknownDestination(header.dst_mac_low)),
        }
    }
}
