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

//! Host side of a cycle-accurate, clock-synchronized network simulation
//! harness for an FPGA-accelerated multi-node machine simulator.
//!
//! Two subsystems share the big-token wire format: the per-node NIC
//! endpoint, which shuttles token windows between the FPGA DMA and a shmem
//! peer in lockstep, and the software switch, which models an
//! Ethernet-style crossbar over those windows.

mod config;
mod error;
mod nic;
mod ports;
mod shmem;
mod switch;
mod tap;

// Public types
// type to use for simulated cycles
pub type Cycle = u64;

pub use crate::config::{simplify_frac, RouteTarget, SwitchConfig, Topology, MAX_BW};
pub use crate::error::Error;
pub use crate::nic::{Fpga, NicConfig, NicEndpoint, NicMmioAddrs, MAX_BANDWIDTH};
pub use crate::ports::{PortState, SwitchPacket, Transport};
pub use crate::shmem::{region_name, ShmemRegion, ShmemTransport};
pub use crate::switch::{do_fast_switching, Switch};
pub use crate::tap::TapTransport;
