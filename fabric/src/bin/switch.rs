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

use env_logger::Target;
use structopt::StructOpt;

use fabric::{ShmemTransport, Switch, SwitchConfig, Topology, Transport};

#[derive(StructOpt)]
#[structopt(
    name = "switch",
    about = "Cycle-accurate Ethernet crossbar model for a multi-node simulation"
)]
struct Arguments {
    /// Link latency in cycles; must be a multiple of 7
    linklatency: u64,
    /// Switching latency in cycles
    switchlatency: u64,
    /// Egress bandwidth in Gbps
    bandwidth: u32,
    /// Shmem basename of a downlink port; repeat once per downlink, in
    /// port order
    #[structopt(long = "downlink")]
    downlinks: Vec<String>,
    /// Shmem basename of an uplink port; repeat once per uplink, in port
    /// order
    #[structopt(long = "uplink")]
    uplinks: Vec<String>,
    /// Seed for the any-uplink egress choice
    #[structopt(long, default_value = "0")]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Arguments::from_args();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .target(Target::Stderr)
        .init();

    let cfg = SwitchConfig::new(args.linklatency, args.switchlatency, args.bandwidth)?;
    log::info!("Using link latency: {}", cfg.link_latency);
    log::info!("Using switching latency: {}", cfg.switch_latency);
    log::info!(
        "BW throttle set to {}/{}",
        cfg.throttle_numer,
        cfg.throttle_denom
    );

    let num_downlinks = args.downlinks.len();
    let mut topology = Topology::new(num_downlinks, args.uplinks.len());
    // Downlink i serves the node holding MAC low half i + 2; endpoint MACs
    // are handed out sequentially starting at 2.
    for i in 0..num_downlinks {
        topology.map_mac((i + 2) as u16, i as u16);
    }

    // We parallelize over ports, so max threads = # ports.
    rayon::ThreadPoolBuilder::new()
        .num_threads(topology.num_ports().max(1))
        .build_global()?;

    let mut transports = Vec::with_capacity(topology.num_ports());
    for (i, name) in args.downlinks.iter().enumerate() {
        transports.push(Transport::Shmem(ShmemTransport::downlink(
            i,
            Some(name),
            cfg.window_bytes(),
        )?));
    }
    for (i, name) in args.uplinks.iter().enumerate() {
        transports.push(Transport::Shmem(ShmemTransport::uplink(
            num_downlinks + i,
            Some(name),
            cfg.window_bytes(),
        )?));
    }

    let mut switch = Switch::new(cfg, topology, transports, args.seed);
    switch.run()?;
    Ok(())
}
