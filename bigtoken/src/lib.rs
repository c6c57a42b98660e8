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

//! The packed big-token wire format.
//!
//! A big token is a fixed-size DMA word carrying `TOKENS_PER_BIGTOKEN`
//! flits. The low word of the big token holds one `{valid, last, reserved}`
//! bit triple per flit; the flits follow, laid end to end. The layout is
//! bit-exact with the gateware on the other side of the DMA boundary, so
//! every flit and meta-bit access in the host goes through this module.

/// Width of a single flit.
pub const FLIT_SIZE_BITS: usize = 64;
pub const FLIT_SIZE_BYTES: usize = FLIT_SIZE_BITS / 8;

/// Width of the packed container, sized to a DMA word.
pub const BIGTOKEN_SIZE_BITS: usize = 512;
pub const BIGTOKEN_SIZE_BYTES: usize = BIGTOKEN_SIZE_BITS / 8;

/// Flits per big token: each flit costs its payload width plus a
/// 3-bit meta triple.
pub const TOKENS_PER_BIGTOKEN: usize = BIGTOKEN_SIZE_BITS / (FLIT_SIZE_BITS + 3);

/// Port lookup result standing in for "replicate to everyone".
pub const BROADCAST_ADJUSTED: u16 = 0xffff;

/// Maximum Ethernet frame, in bytes and in whole flits.
pub const ETH_MAX_BYTES: usize = 1518;
pub const ETH_MAX_WORDS: usize = (ETH_MAX_BYTES + FLIT_SIZE_BYTES - 1) / FLIT_SIZE_BYTES;
pub const ETH_EXTRA_FLITS: usize = 10;

/// Upper bound on flits per packet held inside the switch.
pub const PACKET_MAX_FLITS: usize = ETH_MAX_WORDS + ETH_EXTRA_FLITS;

/// Magic stamped into the first word of an output window that carries no
/// valid flits. Transports that batch over a stream use it to compress
/// empty windows; transports that do not must clear it before sending.
pub const EMPTY_WINDOW_MAGIC: u64 = 0xdead_beef_dead_beef;

#[inline]
fn token_base(tokenid: usize) -> (usize, usize) {
    (
        tokenid / TOKENS_PER_BIGTOKEN,
        tokenid % TOKENS_PER_BIGTOKEN,
    )
}

#[inline]
fn meta_bit_offset(offset: usize) -> usize {
    // The K meta triples sit at the top of the big token's first flit-wide
    // word; valid is bit 0 of the triple, last is bit 2.
    (FLIT_SIZE_BITS - TOKENS_PER_BIGTOKEN * 3) + offset * 3
}

/// Borrow flit `tokenid` out of a token window.
pub fn get_flit(buf: &[u8], tokenid: usize) -> &[u8] {
    let (base, offset) = token_base(tokenid);
    let start = base * BIGTOKEN_SIZE_BYTES + FLIT_SIZE_BYTES * (offset + 1);
    &buf[start..start + FLIT_SIZE_BYTES]
}

/// Copy `FLIT_SIZE_BYTES` of payload into flit slot `tokenid`. Leaves the
/// valid/last bits untouched.
pub fn write_flit(buf: &mut [u8], tokenid: usize, flit: &[u8]) {
    let (base, offset) = token_base(tokenid);
    let start = base * BIGTOKEN_SIZE_BYTES + FLIT_SIZE_BYTES * (offset + 1);
    buf[start..start + FLIT_SIZE_BYTES].copy_from_slice(&flit[..FLIT_SIZE_BYTES]);
}

/// Set the valid bit for flit `tokenid`. OR-wise: the window must have been
/// zeroed (see `clear_meta`) before the first write of a round.
pub fn write_valid_flit(buf: &mut [u8], tokenid: usize) {
    let (base, offset) = token_base(tokenid);
    let bitoffset = meta_bit_offset(offset);
    buf[base * BIGTOKEN_SIZE_BYTES + bitoffset / 8] |= 1 << (bitoffset % 8);
}

/// Set the last bit for flit `tokenid` when `is_last` holds. OR-wise, like
/// `write_valid_flit`.
pub fn write_last_flit(buf: &mut [u8], tokenid: usize, is_last: bool) {
    let (base, offset) = token_base(tokenid);
    let bitoffset = meta_bit_offset(offset) + 2;
    buf[base * BIGTOKEN_SIZE_BYTES + bitoffset / 8] |= (is_last as u8) << (bitoffset % 8);
}

/// Whether flit `tokenid` carries payload this cycle.
pub fn is_valid_flit(buf: &[u8], tokenid: usize) -> bool {
    let (base, offset) = token_base(tokenid);
    let bitoffset = meta_bit_offset(offset);
    (buf[base * BIGTOKEN_SIZE_BYTES + bitoffset / 8] >> (bitoffset % 8)) & 1 == 1
}

/// Whether flit `tokenid` ends its packet. Meaningful only when the flit is
/// valid.
pub fn is_last_flit(buf: &[u8], tokenid: usize) -> bool {
    let (base, offset) = token_base(tokenid);
    let bitoffset = meta_bit_offset(offset) + 2;
    (buf[base * BIGTOKEN_SIZE_BYTES + bitoffset / 8] >> (bitoffset % 8)) & 1 == 1
}

/// Zero the meta word of every big token in the window, marking all flit
/// slots invalid while leaving stale payload bytes in place.
pub fn clear_meta(buf: &mut [u8]) {
    for bigtoken in buf.chunks_exact_mut(BIGTOKEN_SIZE_BYTES) {
        bigtoken[..FLIT_SIZE_BYTES].fill(0);
    }
}

/// Stamp the empty-window magic over the first meta word.
pub fn mark_window_empty(buf: &mut [u8]) {
    buf[..8].copy_from_slice(&EMPTY_WINDOW_MAGIC.to_le_bytes());
}

pub fn is_window_marked_empty(buf: &[u8]) -> bool {
    u64::from_le_bytes(buf[..8].try_into().unwrap()) == EMPTY_WINDOW_MAGIC
}

/// Clear the empty-window magic, restoring an all-invalid meta word.
pub fn clear_empty_mark(buf: &mut [u8]) {
    if is_window_marked_empty(buf) {
        buf[..8].fill(0);
    }
}

/// The routing-relevant slice of an Ethernet header, pulled from the first
/// flit of a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EtherHeader {
    pub is_multicast: bool,
    /// Low 16 bits of the destination MAC, byte-swapped into lookup order.
    pub dst_mac_low: u16,
}

impl EtherHeader {
    /// Decode from the first flit of a packet.
    pub fn from_first_flit(flit: &[u8]) -> Self {
        let word = u64::from_le_bytes(flit[..FLIT_SIZE_BYTES].try_into().unwrap());
        let header = EtherHeader {
            is_multicast: (word >> 16) & 1 == 1,
            dst_mac_low: (((word >> 48) & 0xffff) as u16).swap_bytes(),
        };
        log::trace!("ether header {:?} from flit word {:#018x}", header, word);
        header
    }
}

/// An owned link-latency window of big tokens.
///
/// All flit and meta-bit addressing into the window goes through the
/// slice-level operations above; this type only owns the storage and knows
/// its own geometry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenWindow {
    bytes: Vec<u8>,
}

impl TokenWindow {
    pub fn new(num_bigtokens: usize) -> Self {
        TokenWindow {
            bytes: vec![0u8; num_bigtokens * BIGTOKEN_SIZE_BYTES],
        }
    }

    pub fn num_tokens(&self) -> usize {
        (self.bytes.len() / BIGTOKEN_SIZE_BYTES) * TOKENS_PER_BIGTOKEN
    }

    pub fn len_bytes(&self) -> usize {
        self.bytes.len()
    }
}

impl std::ops::Deref for TokenWindow {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::ops::DerefMut for TokenWindow {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry() {
        assert_eq!(TOKENS_PER_BIGTOKEN, 7);
        assert_eq!(ETH_MAX_WORDS, 190);
        assert_eq!(PACKET_MAX_FLITS, 200);
        // The seven meta triples fit above bit 43 of the first word.
        assert_eq!(meta_bit_offset(0), 43);
        assert_eq!(meta_bit_offset(6) + 2, 63);
    }

    #[test]
    fn test_flit_round_trip() {
        let mut window = TokenWindow::new(4);
        let payload = [0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0];

        write_flit(&mut window, 10, &payload);
        write_valid_flit(&mut window, 10);
        write_last_flit(&mut window, 10, true);

        assert!(is_valid_flit(&window, 10));
        assert!(is_last_flit(&window, 10));
        assert_eq!(get_flit(&window, 10), &payload);

        // No other slot picked up a meta bit.
        for tokenid in 0..window.num_tokens() {
            if tokenid != 10 {
                assert!(!is_valid_flit(&window, tokenid), "slot {}", tokenid);
                assert!(!is_last_flit(&window, tokenid), "slot {}", tokenid);
            }
        }
    }

    #[test]
    fn test_write_flit_preserves_meta() {
        let mut window = TokenWindow::new(1);
        write_valid_flit(&mut window, 3);
        write_last_flit(&mut window, 3, true);
        write_flit(&mut window, 3, &[0xff; FLIT_SIZE_BYTES]);
        assert!(is_valid_flit(&window, 3));
        assert!(is_last_flit(&window, 3));
    }

    #[test]
    fn test_last_false_is_noop() {
        let mut window = TokenWindow::new(1);
        write_last_flit(&mut window, 2, false);
        assert!(!is_last_flit(&window, 2));
    }

    #[test]
    fn test_clear_meta_keeps_payload() {
        let mut window = TokenWindow::new(2);
        write_flit(&mut window, 8, &[0x55; FLIT_SIZE_BYTES]);
        write_valid_flit(&mut window, 8);
        clear_meta(&mut window);
        assert!(!is_valid_flit(&window, 8));
        assert_eq!(get_flit(&window, 8), &[0x55; FLIT_SIZE_BYTES]);
    }

    #[test]
    fn test_empty_window_mark() {
        let mut window = TokenWindow::new(1);
        mark_window_empty(&mut window);
        assert!(is_window_marked_empty(&window));
        clear_empty_mark(&mut window);
        assert!(!is_window_marked_empty(&window));
        assert!(window.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_ether_header_unicast() {
        // Destination MAC low half 0x01 0x02 on the wire lands in bytes 6..8
        // of the first flit and byte-swaps to lookup value 0x0201.
        let mut flit = [0u8; FLIT_SIZE_BYTES];
        flit[6] = 0x02;
        flit[7] = 0x01;
        let header = EtherHeader::from_first_flit(&flit);
        assert!(!header.is_multicast);
        assert_eq!(header.dst_mac_low, 0x0201);
    }

    #[test]
    fn test_ether_header_multicast() {
        let mut flit = [0u8; FLIT_SIZE_BYTES];
        flit[2] = 0x01;
        let header = EtherHeader::from_first_flit(&flit);
        assert!(header.is_multicast);
    }
}
