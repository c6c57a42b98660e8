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

use std::fmt;

/// Everything that can go fatally wrong in the harness.
///
/// None of these are recovered from: the simulator is a correctness-testing
/// tool, and a hidden drop would invalidate every downstream measurement.
/// Callers surface the message once and terminate.
#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    /// A required CLI argument was never supplied.
    MissingArgument(&'static str),
    /// A CLI argument value did not parse.
    InvalidArgument(String),
    /// A MAC address string did not parse as aa:bb:cc:dd:ee:ff.
    InvalidMacAddress(String),
    /// Link latency must be positive and a whole number of big tokens.
    InvalidLinkLatency(u64),
    BandwidthTooHigh { requested: u32, max: u32 },
    BurstTooLarge(u32),
    /// No port is provisioned for this destination MAC.
    UnknownDestination(u16),
    /// The token queues were not in their reset state when the endpoint
    /// attached to the gateware.
    BootTokenMismatch { outgoing: u32, capacity: u32 },
    /// A DMA transfer moved fewer bytes than requested.
    DmaShortTransfer { wanted: usize, transferred: usize },
    /// A sequence number skipped across the DMA boundary.
    TokenLost { expected: u32, observed: u32 },
    /// shm_open/mmap or TAP device setup failed.
    Transport { name: String, errno: i32 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MissingArgument(arg) => write!(f, "ERROR: missing required argument {}", arg),
            Self::InvalidArgument(arg) => write!(f, "ERROR: malformed argument {}", arg),
            Self::InvalidMacAddress(mac) => {
                write!(f, "ERROR: invalid MAC address supplied: {}", mac)
            }
            Self::InvalidLinkLatency(cycles) => write!(
                f,
                "ERROR: invalid link latency {}. Must be positive and a multiple of {} cycles.",
                cycles,
                bigtoken::TOKENS_PER_BIGTOKEN
            ),
            Self::BandwidthTooHigh { requested, max } => {
                write!(f, "ERROR: bandwidth {} Gbps exceeds max {}", requested, max)
            }
            Self::BurstTooLarge(burst) => {
                write!(f, "ERROR: burst size {} must be less than 256", burst)
            }
            Self::UnknownDestination(mac) => {
                write!(f, "ERROR: no port mapped for destination MAC {:#06x}", mac)
            }
            Self::BootTokenMismatch { outgoing, capacity } => write!(
                f,
                "FAIL. INCORRECT TOKENS ON BOOT. produced tokens available {}, input slots available {}",
                outgoing, capacity
            ),
            Self::DmaShortTransfer {
                wanted,
                transferred,
            } => write!(
                f,
                "ERR MISMATCH! transferred {} bytes, wanted {} bytes",
                transferred, wanted
            ),
            Self::TokenLost { expected, observed } => write!(
                f,
                "FAIL! Token lost on FPGA interface. expected seq {}, observed {}",
                expected, observed
            ),
            Self::Transport { name, errno } => {
                write!(f, "ERROR: transport setup failed for {}: errno {}", name, errno)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
