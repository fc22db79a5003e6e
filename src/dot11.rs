use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Serialize, Serializer};

pub const SUBTYPE_DISASSOCIATION: u8 = 10;
pub const SUBTYPE_DEAUTHENTICATION: u8 = 12;

/// LLC/SNAP header announcing an 802.1X (EAPOL) payload.
const EAPOL_SNAP: [u8; 8] = [0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00, 0x88, 0x8e];

const MGMT_HEADER_LEN: usize = 24;

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    fn from_slice(bytes: &[u8]) -> Option<Self> {
        let octets: [u8; 6] = bytes.get(..6)?.try_into().ok()?;
        Some(MacAddress(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    Management,
    Control,
    Data,
    Extension,
}

impl FrameType {
    fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0 => FrameType::Management,
            1 => FrameType::Control,
            2 => FrameType::Data,
            _ => FrameType::Extension,
        }
    }
}

/// The parts of an 802.11 MAC header the detector cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dot11Header {
    pub frame_type: FrameType,
    pub subtype: u8,
    pub to_ds: bool,
    pub from_ds: bool,
    pub protected: bool,
    pub order: bool,
    /// Receiver address.
    pub addr1: Option<MacAddress>,
    /// Transmitter address. Absent on ACK/CTS and truncated frames.
    pub addr2: Option<MacAddress>,
}

impl Dot11Header {
    pub fn is_management(&self, subtype: u8) -> bool {
        self.frame_type == FrameType::Management && self.subtype == subtype
    }
}

/// Decode the frame control field and the first two addresses.
///
/// Returns `None` when there is no frame control or the protocol version is
/// not zero, which is what garbage behind a bad link-layer header looks like.
pub fn parse_header(frame: &[u8]) -> Option<Dot11Header> {
    if frame.len() < 2 {
        return None;
    }
    let fc = LittleEndian::read_u16(&frame[..2]);
    if fc & 0b11 != 0 {
        return None;
    }
    let flags = fc >> 8;

    Some(Dot11Header {
        frame_type: FrameType::from_bits(fc >> 2),
        subtype: ((fc >> 4) & 0x0f) as u8,
        to_ds: flags & 0x01 != 0,
        from_ds: flags & 0x02 != 0,
        protected: flags & 0x40 != 0,
        order: flags & 0x80 != 0,
        addr1: frame.get(4..10).and_then(MacAddress::from_slice),
        addr2: frame.get(10..16).and_then(MacAddress::from_slice),
    })
}

/// True when `frame` is an unprotected data frame whose body opens with the
/// EAPOL LLC/SNAP header.
pub fn carries_eapol(frame: &[u8], header: &Dot11Header) -> bool {
    if header.frame_type != FrameType::Data || header.protected {
        return false;
    }
    // Null-function subtypes have no body.
    if header.subtype & 0x04 != 0 {
        return false;
    }

    let mut offset = MGMT_HEADER_LEN;
    if header.to_ds && header.from_ds {
        offset += 6;
    }
    if header.subtype & 0x08 != 0 {
        offset += 2;
        if header.order {
            offset += 4;
        }
    }

    frame.get(offset..offset + EAPOL_SNAP.len()) == Some(&EAPOL_SNAP[..])
}
