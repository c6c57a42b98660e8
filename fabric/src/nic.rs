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

//! The per-node NIC endpoint.
//!
//! Every link-latency window this bridge drains one window of outbound big
//! tokens from the FPGA DMA, publishes it to its shmem peer, waits for the
//! peer's inbound window, and pushes that back into the FPGA. A stuck peer
//! stalls the whole simulated universe, which is exactly what lockstep
//! requires.

use crate::config::simplify_frac;
use crate::error::Error;
use crate::shmem::{region_name, ShmemRegion};
use bigtoken::{BIGTOKEN_SIZE_BYTES, TOKENS_PER_BIGTOKEN};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// Max NIC bandwidth in Gbps: flit width times assumed clock, rounded to
/// the nearest 100.
pub const MAX_BANDWIDTH: u32 = 800;
/// Bits needed to hold a bandwidth value in the rlimit MMIO word.
pub const MAX_BANDWIDTH_BITS: u32 = 10;

/// MMIO register addresses of one NIC widget, owned exclusively by its
/// endpoint.
#[derive(Clone, Copy, Debug)]
pub struct NicMmioAddrs {
    pub macaddr_upper: u64,
    pub macaddr_lower: u64,
    pub rlimit_settings: u64,
    pub outgoing_count: u64,
    pub incoming_count: u64,
}

/// The host platform's view of the gateware: MMIO plus streaming DMA.
///
/// `push`/`pull` report the bytes actually moved; anything short of the
/// request is a protocol violation the endpoint treats as fatal.
pub trait Fpga {
    fn write(&mut self, addr: u64, value: u32);
    fn read(&mut self, addr: u64) -> u32;
    fn push(&mut self, addr: u64, src: &[u8]) -> usize;
    fn pull(&mut self, addr: u64, dst: &mut [u8]) -> usize;
}

/// Endpoint configuration, parsed from `+key<N>=value` plusargs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NicConfig {
    pub niclog: Option<PathBuf>,
    /// Input and output share a buffer: local echo, no peer process.
    pub loopback: bool,
    /// 48-bit MAC, stored little-endian.
    pub mac_lendian: u64,
    pub netbw: u32,
    pub netburst: u32,
    pub link_latency: u64,
    pub shmemportname: Option<String>,
}

fn parse_macaddr(macstring: &str) -> Result<u64, Error> {
    let octets: Vec<u64> = macstring
        .split(':')
        .map(|octet| u64::from_str_radix(octet, 16))
        .collect::<Result<_, _>>()
        .map_err(|_| Error::InvalidMacAddress(macstring.to_string()))?;
    if octets.len() != 6 || octets.iter().any(|octet| *octet > 0xff) {
        return Err(Error::InvalidMacAddress(macstring.to_string()));
    }
    Ok(octets
        .iter()
        .enumerate()
        .fold(0u64, |mac, (i, octet)| mac | (octet << (8 * i))))
}

impl NicConfig {
    /// Parse the endpoint's numbered plusargs out of the full argument
    /// list, then validate the combination.
    pub fn from_args(args: &[String], nicno: usize) -> Result<Self, Error> {
        let mut config = NicConfig {
            niclog: None,
            loopback: false,
            mac_lendian: 0,
            netbw: MAX_BANDWIDTH,
            netburst: 8,
            link_latency: 0,
            shmemportname: None,
        };

        let num_equals = format!("{}=", nicno);
        let niclog_arg = format!("+niclog{}", num_equals);
        let nicloopback_arg = format!("+nic-loopback{}", nicno);
        let macaddr_arg = format!("+macaddr{}", num_equals);
        let netbw_arg = format!("+netbw{}", num_equals);
        let netburst_arg = format!("+netburst{}", num_equals);
        let linklatency_arg = format!("+linklatency{}", num_equals);
        let shmemportname_arg = format!("+shmemportname{}", num_equals);

        let parse_int = |arg: &str, prefix: &str| -> Result<u64, Error> {
            arg[prefix.len()..]
                .parse::<u64>()
                .map_err(|_| Error::InvalidArgument(arg.to_string()))
        };

        for arg in args {
            if let Some(path) = arg.strip_prefix(niclog_arg.as_str()) {
                config.niclog = Some(PathBuf::from(path));
            }
            if arg == nicloopback_arg.as_str() {
                config.loopback = true;
            }
            if let Some(macstring) = arg.strip_prefix(macaddr_arg.as_str()) {
                config.mac_lendian = parse_macaddr(macstring)?;
            }
            if arg.starts_with(netbw_arg.as_str()) {
                config.netbw = parse_int(arg, &netbw_arg)? as u32;
            }
            if arg.starts_with(netburst_arg.as_str()) {
                config.netburst = parse_int(arg, &netburst_arg)? as u32;
            }
            if arg.starts_with(linklatency_arg.as_str()) {
                config.link_latency = parse_int(arg, &linklatency_arg)?;
            }
            if let Some(name) = arg.strip_prefix(shmemportname_arg.as_str()) {
                config.shmemportname = Some(name.to_string());
            }
        }

        if config.link_latency == 0
            || config.link_latency % TOKENS_PER_BIGTOKEN as u64 != 0
        {
            return Err(Error::InvalidLinkLatency(config.link_latency));
        }
        if config.netburst >= 256 {
            return Err(Error::BurstTooLarge(config.netburst));
        }
        if config.netbw > MAX_BANDWIDTH {
            return Err(Error::BandwidthTooHigh {
                requested: config.netbw,
                max: MAX_BANDWIDTH,
            });
        }
        if !config.loopback && config.shmemportname.is_none() {
            return Err(Error::MissingArgument("+shmemportname"));
        }
        Ok(config)
    }

    /// Big tokens per link-latency window.
    pub fn simlatency_bt(&self) -> usize {
        self.link_latency as usize / TOKENS_PER_BIGTOKEN
    }

    /// Bytes in one window of big tokens, excluding the sentinel.
    pub fn buf_bytes(&self) -> usize {
        self.simlatency_bt() * BIGTOKEN_SIZE_BYTES
    }

    /// The token-bucket configuration word: increment in the top field,
    /// period minus one in the middle, burst size in the bottom.
    pub fn rlimit_settings(&self) -> u32 {
        let (rlimit_inc, rlimit_period) = simplify_frac(self.netbw, MAX_BANDWIDTH);
        (rlimit_inc << (2 * MAX_BANDWIDTH_BITS))
            | ((rlimit_period - 1) << MAX_BANDWIDTH_BITS)
            | self.netburst
    }
}

/// The double-buffered window pair on the host side of the DMA.
///
/// `read` is the node-to-switch direction (filled by `pull`), `write` is
/// switch-to-node (drained by `push`). In loopback mode both directions
/// alias one local buffer per round, so pulled windows echo straight back.
enum NicBufs {
    Shmem {
        read_bufs: [ShmemRegion; 2],
        write_bufs: [ShmemRegion; 2],
    },
    Loopback([Vec<u8>; 2]),
}

impl NicBufs {
    fn read_payload_mut(&mut self, round: usize) -> &mut [u8] {
        match self {
            NicBufs::Shmem { read_bufs, .. } => read_bufs[round].payload_mut(),
            NicBufs::Loopback(bufs) => {
                let payload_len = bufs[round].len() - 1;
                &mut bufs[round][..payload_len]
            }
        }
    }

    fn write_payload(&self, round: usize) -> &[u8] {
        match self {
            NicBufs::Shmem { write_bufs, .. } => write_bufs[round].payload(),
            NicBufs::Loopback(bufs) => &bufs[round][..bufs[round].len() - 1],
        }
    }

    fn set_read_sentinel(&mut self, round: usize, value: u8) {
        match self {
            NicBufs::Shmem { read_bufs, .. } => read_bufs[round].set_sentinel(value),
            NicBufs::Loopback(bufs) => {
                let sentinel = bufs[round].len() - 1;
                bufs[round][sentinel] = value;
            }
        }
    }

    fn write_sentinel(&self, round: usize) -> u8 {
        match self {
            NicBufs::Shmem { write_bufs, .. } => write_bufs[round].sentinel(),
            NicBufs::Loopback(bufs) => bufs[round][bufs[round].len() - 1],
        }
    }

    fn set_write_sentinel(&mut self, round: usize, value: u8) {
        match self {
            NicBufs::Shmem { write_bufs, .. } => write_bufs[round].set_sentinel(value),
            NicBufs::Loopback(bufs) => {
                let sentinel = bufs[round].len() - 1;
                bufs[round][sentinel] = value;
            }
        }
    }
}

/// One simulated node's host bridge between the FPGA DMA and its peer.
pub struct NicEndpoint {
    config: NicConfig,
    mmio: NicMmioAddrs,
    dma_addr: u64,
    bufs: NicBufs,
    currentround: usize,
    niclog: Option<File>,
    iter: u64,
    #[cfg(feature = "token-verify")]
    next_token_from_fpga: u32,
    #[cfg(feature = "token-verify")]
    timeelapsed_cycles: u64,
}

impl NicEndpoint {
    pub fn new(config: NicConfig, mmio: NicMmioAddrs, dma_addr: u64) -> Result<Self, Error> {
        let (rlimit_inc, rlimit_period) = simplify_frac(config.netbw, MAX_BANDWIDTH);
        log::info!("using link latency: {} cycles", config.link_latency);
        log::info!("using netbw: {}", config.netbw);
        log::info!("using netburst: {}", config.netburst);
        log::info!("using SIMLATENCY_BT: {}", config.simlatency_bt());
        log::info!("using BUF_BYTES: {}", config.buf_bytes());
        log::info!(
            "using rlimit_inc: {} rlimit_period: {} MAX_BANDWIDTH: {}",
            rlimit_inc,
            rlimit_period,
            MAX_BANDWIDTH
        );

        let niclog = match &config.niclog {
            Some(path) => Some(File::create(path).map_err(|err| Error::Transport {
                name: path.display().to_string(),
                errno: err.raw_os_error().unwrap_or(-1),
            })?),
            None => None,
        };

        let buf_bytes = config.buf_bytes();
        let bufs = if config.loopback {
            NicBufs::Loopback([vec![0u8; buf_bytes + 1], vec![0u8; buf_bytes + 1]])
        } else {
            let basename = config
                .shmemportname
                .as_deref()
                .expect("validated: shmemportname present unless loopback");
            let open_pair = |direction: &str| -> Result<[ShmemRegion; 2], Error> {
                let mut regions = Vec::with_capacity(2);
                for j in 0..2 {
                    regions.push(ShmemRegion::open_or_create(
                        &region_name(direction, Some(basename), 0, j),
                        buf_bytes,
                    )?);
                }
                Ok(regions.try_into().ok().unwrap())
            };
            NicBufs::Shmem {
                read_bufs: open_pair("nts")?,
                write_bufs: open_pair("stn")?,
            }
        };

        Ok(NicEndpoint {
            config,
            mmio,
            dma_addr,
            bufs,
            currentround: 0,
            niclog,
            iter: 0,
            #[cfg(feature = "token-verify")]
            next_token_from_fpga: 0,
            #[cfg(feature = "token-verify")]
            timeelapsed_cycles: 0,
        })
    }

    fn niclog_line(&mut self, args: std::fmt::Arguments) {
        if let Some(file) = &mut self.niclog {
            let _ = writeln!(file, "{}", args);
            let _ = file.flush();
        }
    }

    /// Program the widget and verify the token queues are in their reset
    /// state, then prime the FPGA with one window of zero tokens.
    pub fn init(&mut self, fpga: &mut dyn Fpga) -> Result<(), Error> {
        fpga.write(
            self.mmio.macaddr_upper,
            ((self.config.mac_lendian >> 32) & 0xffff) as u32,
        );
        fpga.write(
            self.mmio.macaddr_lower,
            (self.config.mac_lendian & 0xffff_ffff) as u32,
        );
        fpga.write(self.mmio.rlimit_settings, self.config.rlimit_settings());

        let simlatency_bt = self.config.simlatency_bt() as u32;
        let output_tokens_available = fpga.read(self.mmio.outgoing_count);
        let input_token_capacity =
            simlatency_bt.wrapping_sub(fpga.read(self.mmio.incoming_count));

        // A K=1 build's startup token propagates through to outgoing_count
        // before the host attaches; any other nonzero state means a stale
        // or misbehaving widget.
        if input_token_capacity != simlatency_bt
            || output_tokens_available != (TOKENS_PER_BIGTOKEN == 1) as u32
        {
            return Err(Error::BootTokenMismatch {
                outgoing: output_tokens_available,
                capacity: input_token_capacity,
            });
        }
        log::info!(
            "On init, {} token slots available on input.",
            input_token_capacity
        );

        let wanted = BIGTOKEN_SIZE_BYTES * input_token_capacity as usize;
        let produced = fpga.push(self.dma_addr, &self.bufs.write_payload(1)[..wanted]);
        if produced != wanted {
            return Err(Error::DmaShortTransfer {
                wanted,
                transferred: produced,
            });
        }
        Ok(())
    }

    /// Drain as many complete windows as the FPGA has ready; return as
    /// soon as either direction lacks a full window.
    pub fn tick(&mut self, fpga: &mut dyn Fpga) -> Result<(), Error> {
        let simlatency_bt = self.config.simlatency_bt() as u32;
        loop {
            let output_tokens_available = fpga.read(self.mmio.outgoing_count);
            let input_token_capacity =
                simlatency_bt.wrapping_sub(fpga.read(self.mmio.incoming_count));
            let tokens_this_round = output_tokens_available.min(input_token_capacity);
            self.niclog_line(format_args!("tokens this round: {}", tokens_this_round));

            if tokens_this_round != simlatency_bt {
                self.niclog_line(format_args!(
                    "FAIL: output available {}, input capacity: {}",
                    output_tokens_available, input_token_capacity
                ));
                return Ok(());
            }

            self.iter += 1;
            let iter = self.iter;
            self.niclog_line(format_args!("read fpga iter {}", iter));

            let round = self.currentround;
            let wanted = BIGTOKEN_SIZE_BYTES * tokens_this_round as usize;
            let dma_addr = self.dma_addr;
            let obtained = fpga.pull(dma_addr, &mut self.bufs.read_payload_mut(round)[..wanted]);
            if obtained != wanted {
                return Err(Error::DmaShortTransfer {
                    wanted,
                    transferred: obtained,
                });
            }

            #[cfg(feature = "token-verify")]
            self.verify_outbound_tokens(tokens_this_round)?;

            self.niclog_line(format_args!("send iter {}", iter));
            self.bufs.set_read_sentinel(round, 1);

            if !self.config.loopback {
                // The sole suspension point: wait for the peer's window.
                while self.bufs.write_sentinel(round) == 0 {
                    std::hint::spin_loop();
                }
            }
            self.niclog_line(format_args!("done recv iter {}", iter));

            let sent = fpga.push(dma_addr, &self.bufs.write_payload(round)[..wanted]);
            self.bufs.set_write_sentinel(round, 0);
            if sent != wanted {
                return Err(Error::DmaShortTransfer {
                    wanted,
                    transferred: sent,
                });
            }

            self.currentround = (self.currentround + 1) % 2;
        }
    }

    /// The widget stamps a 32-bit sequence number into each outgoing big
    /// token; losing one across the DMA boundary invalidates the run.
    #[cfg(feature = "token-verify")]
    fn verify_outbound_tokens(&mut self, tokens_this_round: u32) -> Result<(), Error> {
        let round = self.currentround;
        let payload = self.bufs.read_payload_mut(round);
        for i in 0..tokens_this_round as usize {
            let start = i * BIGTOKEN_SIZE_BYTES;
            let observed =
                u32::from_le_bytes(payload[start..start + 4].try_into().unwrap());
            if observed != self.next_token_from_fpga {
                return Err(Error::TokenLost {
                    expected: self.next_token_from_fpga,
                    observed,
                });
            }
            self.next_token_from_fpga = self.next_token_from_fpga.wrapping_add(1);
        }
        self.timeelapsed_cycles += self.config.link_latency;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn loopback_args() -> Vec<String> {
        vec![
            "+nic-loopback0".to_string(),
            "+macaddr0=00:11:22:33:44:55".to_string(),
            "+netbw0=400".to_string(),
            "+netburst0=4".to_string(),
            "+linklatency0=14".to_string(),
        ]
    }

    /// A widget model whose token queues refill only when the test says so.
    struct StubFpga {
        mmio: NicMmioAddrs,
        regs: HashMap<u64, u32>,
        outgoing: u32,
        incoming: u32,
        pulls: Vec<usize>,
        pushes: Vec<usize>,
    }

    impl StubFpga {
        fn new(mmio: NicMmioAddrs) -> Self {
            StubFpga {
                mmio,
                regs: HashMap::new(),
                outgoing: 0,
                incoming: 0,
                pulls: vec![],
                pushes: vec![],
            }
        }
    }

    impl Fpga for StubFpga {
        fn write(&mut self, addr: u64, value: u32) {
            self.regs.insert(addr, value);
        }

        fn read(&mut self, addr: u64) -> u32 {
            if addr == self.mmio.outgoing_count {
                self.outgoing
            } else if addr == self.mmio.incoming_count {
                self.incoming
            } else {
                *self.regs.get(&addr).unwrap_or(&0)
            }
        }

        fn push(&mut self, _addr: u64, src: &[u8]) -> usize {
            self.pushes.push(src.len());
            src.len()
        }

        fn pull(&mut self, _addr: u64, dst: &mut [u8]) -> usize {
            dst.fill(0x5a);
            // One window drained; nothing further until the target advances.
            self.outgoing = 0;
            self.pulls.push(dst.len());
            dst.len()
        }
    }

    fn mmio() -> NicMmioAddrs {
        NicMmioAddrs {
            macaddr_upper: 0x00,
            macaddr_lower: 0x04,
            rlimit_settings: 0x08,
            outgoing_count: 0x0c,
            incoming_count: 0x10,
        }
    }

    #[test]
    fn test_parse_plusargs() {
        let args = vec![
            "+niclog0=/tmp/nic0.log".to_string(),
            "+macaddr0=00:12:6d:00:00:02".to_string(),
            "+netbw0=100".to_string(),
            "+netburst0=8".to_string(),
            "+linklatency0=6405".to_string(),
            "+shmemportname0=slot0".to_string(),
            // A second endpoint's args must not bleed into endpoint 0.
            "+linklatency1=7".to_string(),
            "+nic-loopback1".to_string(),
        ];
        let config = NicConfig::from_args(&args, 0).unwrap();
        assert_eq!(config.niclog, Some(PathBuf::from("/tmp/nic0.log")));
        assert!(!config.loopback);
        assert_eq!(config.mac_lendian, 0x0200_006d_1200);
        assert_eq!(config.netbw, 100);
        assert_eq!(config.netburst, 8);
        assert_eq!(config.link_latency, 6405);
        assert_eq!(config.shmemportname, Some("slot0".to_string()));
        assert_eq!(config.simlatency_bt(), 915);

        let loopback = NicConfig::from_args(&args, 1).unwrap();
        assert!(loopback.loopback);
        assert_eq!(loopback.link_latency, 7);
    }

    #[test]
    fn test_parse_rejects_bad_configs() {
        let mut args = loopback_args();
        args[4] = "+linklatency0=15".to_string();
        assert_eq!(
            NicConfig::from_args(&args, 0).err(),
            Some(Error::InvalidLinkLatency(15))
        );

        let mut args = loopback_args();
        args[1] = "+macaddr0=00:11:22:33:44".to_string();
        assert_eq!(
            NicConfig::from_args(&args, 0).err(),
            Some(Error::InvalidMacAddress("00:11:22:33:44".to_string()))
        );

        let mut args = loopback_args();
        args[3] = "+netburst0=256".to_string();
        assert_eq!(
            NicConfig::from_args(&args, 0).err(),
            Some(Error::BurstTooLarge(256))
        );

        let mut args = loopback_args();
        args[2] = "+netbw0=801".to_string();
        assert_eq!(
            NicConfig::from_args(&args, 0).err(),
            Some(Error::BandwidthTooHigh {
                requested: 801,
                max: MAX_BANDWIDTH
            })
        );

        // Without loopback, a shmem port name is mandatory.
        let args = vec![
            "+macaddr0=00:11:22:33:44:55".to_string(),
            "+linklatency0=14".to_string(),
        ];
        assert_eq!(
            NicConfig::from_args(&args, 0).err(),
            Some(Error::MissingArgument("+shmemportname"))
        );
    }

    #[test]
    fn test_rlimit_register_composition() {
        let config = NicConfig::from_args(&loopback_args(), 0).unwrap();
        // 400/800 reduces to inc 1, period 2; burst 4.
        assert_eq!(
            config.rlimit_settings(),
            (1 << 20) | (1 << 10) | 4
        );
    }

    #[test]
    fn test_init_programs_widget_and_primes() {
        let config = NicConfig::from_args(&loopback_args(), 0).unwrap();
        let buf_bytes = config.buf_bytes();
        let mut nic = NicEndpoint::new(config.clone(), mmio(), 0).unwrap();
        let mut fpga = StubFpga::new(mmio());

        nic.init(&mut fpga).unwrap();

        assert_eq!(fpga.regs[&mmio().macaddr_upper], 0x5544);
        assert_eq!(fpga.regs[&mmio().macaddr_lower], 0x3322_1100);
        assert_eq!(fpga.regs[&mmio().rlimit_settings], config.rlimit_settings());
        // The priming push covers exactly one window.
        assert_eq!(fpga.pushes, vec![buf_bytes]);
    }

    #[test]
    fn test_init_rejects_dirty_boot_state() {
        let config = NicConfig::from_args(&loopback_args(), 0).unwrap();
        let mut nic = NicEndpoint::new(config, mmio(), 0).unwrap();
        let mut fpga = StubFpga::new(mmio());
        fpga.incoming = 1;

        assert_eq!(
            nic.init(&mut fpga).err(),
            Some(Error::BootTokenMismatch {
                outgoing: 0,
                capacity: 1,
            })
        );
    }

    #[test]
    fn test_loopback_lockstep_handshake() {
        let _logger = env_logger::builder().is_test(true).try_init();

        let config = NicConfig::from_args(&loopback_args(), 0).unwrap();
        let buf_bytes = config.buf_bytes();
        let simlatency_bt = config.simlatency_bt() as u32;
        let mut nic = NicEndpoint::new(config, mmio(), 0).unwrap();
        let mut fpga = StubFpga::new(mmio());

        nic.init(&mut fpga).unwrap();
        assert_eq!(nic.currentround, 0);

        for round in 0..3 {
            // The target advanced one window; both directions are full.
            fpga.outgoing = simlatency_bt;
            nic.tick(&mut fpga).unwrap();

            // Exactly one pull and one push of a full window per iteration.
            assert_eq!(fpga.pulls.len(), round + 1);
            assert_eq!(fpga.pushes.len(), round + 2); // + the priming push
            assert_eq!(fpga.pulls[round], buf_bytes);
            assert_eq!(*fpga.pushes.last().unwrap(), buf_bytes);

            // Loopback: the pulled window echoed straight back, and the
            // sentinel was raised then cleared.
            assert_eq!(nic.bufs.write_sentinel(round % 2), 0);
            assert_eq!(nic.currentround, (round + 1) % 2);
        }
    }

    #[test]
    fn test_tick_returns_without_full_window() {
        let config = NicConfig::from_args(&loopback_args(), 0).unwrap();
        let mut nic = NicEndpoint::new(config, mmio(), 0).unwrap();
        let mut fpga = StubFpga::new(mmio());

        nic.init(&mut fpga).unwrap();
        fpga.outgoing = 1; // partial window: not an error, just not ready
        nic.tick(&mut fpga).unwrap();
        assert!(fpga.pulls.is_empty());
        assert_eq!(nic.currentround, 0);
    }

    #[test]
    fn test_short_dma_is_fatal() {
        struct ShortPullFpga(StubFpga);
        impl Fpga for ShortPullFpga {
            fn write(&mut self, addr: u64, value: u32) {
                self.0.write(addr, value)
            }
            fn read(&mut self, addr: u64) -> u32 {
                self.0.read(addr)
            }
            fn push(&mut self, addr: u64, src: &[u8]) -> usize {
                self.0.push(addr, src)
            }
            fn pull(&mut self, _addr: u64, dst: &mut [u8]) -> usize {
                dst.len() - 8
            }
        }

        let config = NicConfig::from_args(&loopback_args(), 0).unwrap();
        let buf_bytes = config.buf_bytes();
        let simlatency_bt = config.simlatency_bt() as u32;
        let mut nic = NicEndpoint::new(config, mmio(), 0).unwrap();
        let mut fpga = ShortPullFpga(StubFpga::new(mmio()));
        nic.init(&mut fpga).unwrap();

        fpga.0.outgoing = simlatency_bt;
        assert_eq!(
            nic.tick(&mut fpga).err(),
            Some(Error::DmaShortTransfer {
                wanted: buf_bytes,
                transferred: buf_bytes - 8,
            })
        );
    }
}
