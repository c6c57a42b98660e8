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

//! The host-TAP port variant.
//!
//! Only the shmem transport carries simulation traffic in this harness.
//! The physical transports behind switch ports belong to the outer
//! deployment; this variant keeps the port surface interface-compatible
//! with a switch that bridges one port to a host network device. It hands
//! the switch empty inbound windows and discards outbound windows.

use crate::error::Error;
use crate::ports::PortState;

pub struct TapTransport {
    devname: String,
}

impl TapTransport {
    pub fn new(devname: &str) -> Self {
        log::info!("TAP port {}: no host datapath attached", devname);
        TapTransport {
            devname: devname.to_string(),
        }
    }

    pub fn devname(&self) -> &str {
        &self.devname
    }

    /// Accept and discard the switched output window.
    pub fn send(&mut self, state: &mut PortState) -> Result<(), Error> {
        bigtoken::clear_empty_mark(&mut state.output_window);
        state.output_window.fill(0);
        Ok(())
    }

    /// Hand the switch an empty window: no host traffic this cycle.
    pub fn recv(&mut self, state: &mut PortState) -> Result<(), Error> {
        state.input_window.fill(0);
        Ok(())
    }

    pub fn tick_pre(&mut self, _state: &mut PortState) {}

    pub fn tick(&mut self, _state: &mut PortState) {}
}
