use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use macaddr::MacAddr6;
use serde::Deserialize;
use serde::Serialize;
use std::io::Cursor;
use std::io::Read;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;
use tracing::warn;

use crate::Result;
use crate::error::PktDumpError;

/// Link-layer payload type codes, from
/// https://www.iana.org/assignments/ieee-802-numbers/ieee-802-numbers.xhtml
///
/// `Detect` is not a real wire value: it asks the dumper to infer the type
/// from the first nibble of the payload.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, Serialize, Deserialize)]
pub enum EtherType {
    Bump = 0x0101,
    Ipv4 = 0x0800,
    Arp = 0x0806,
    Ipv6 = 0x86DD,
    Detect = 0xFFFF,
}

impl EtherType {
    pub fn to_u16(self) -> u16 {
        self as u16
    }
    pub fn from_u16(value: u16) -> Option<Self> {
        EtherType::iter().find(|&e| e.to_u16() == value)
    }
}

/// dest (6) + src (6) + ether type (2)
pub const ETHERNET_HEADER_LENGTH: usize = 14;

pub const IP4_VERSION: u8 = 4;
pub const IP6_VERSION: u8 = 6;

/// Fixed addresses written into synthetic headers. The values carry no
/// meaning, they only make raw IP dumps importable by Wireshark.
pub const DUMMY_MAC_DESTINATION: MacAddr6 = MacAddr6::new(0x14, 0xc0, 0x3e, 0x55, 0x0b, 0x35);
pub const DUMMY_MAC_SOURCE: MacAddr6 = MacAddr6::new(0x74, 0xd0, 0x2b, 0x29, 0xa5, 0x18);

/// Bare minimal Ethernet frame header.
///
/// Mostly used to prepend a dummy header to packet dumps so that Wireshark
/// recognizes the traffic immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub destination: MacAddr6,
    pub source: MacAddr6,
    pub ether_type: EtherType,
}

impl EthernetHeader {
    pub fn new(destination: MacAddr6, source: MacAddr6, ether_type: EtherType) -> Self {
        Self {
            destination,
            source,
            ether_type,
        }
    }

    /// A header with the fixed dummy addresses and the given type.
    pub fn dummy(ether_type: EtherType) -> Self {
        Self::new(DUMMY_MAC_DESTINATION, DUMMY_MAC_SOURCE, ether_type)
    }

    pub fn size(&self) -> usize {
        ETHERNET_HEADER_LENGTH
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut ret = Vec::with_capacity(ETHERNET_HEADER_LENGTH);
        ret.extend_from_slice(self.destination.as_bytes());
        ret.extend_from_slice(self.source.as_bytes());
        ret.extend_from_slice(&self.ether_type.to_u16().to_be_bytes());
        ret
    }

    /// Reads a header from the front of `buf`, returning it together with the
    /// number of bytes consumed (always 14 on success).
    pub fn from_slice(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < ETHERNET_HEADER_LENGTH {
            return Err(PktDumpError::ShortBuffer {
                needed: ETHERNET_HEADER_LENGTH,
                available: buf.len(),
            });
        }
        let mut cursor = Cursor::new(buf);
        let mut destination = [0u8; 6];
        cursor.read_exact(&mut destination)?;
        let mut source = [0u8; 6];
        cursor.read_exact(&mut source)?;
        let value = cursor.read_u16::<BigEndian>()?;
        let ether_type = match EtherType::from_u16(value) {
            Some(e) => e,
            None => return Err(PktDumpError::UnknownEtherType { ethertype: value }),
        };
        let header = Self::new(MacAddr6::from(destination), MacAddr6::from(source), ether_type);
        Ok((header, ETHERNET_HEADER_LENGTH))
    }

    /// Maps an IP version nibble to the ether type carrying it. Unknown
    /// versions fall back to `Detect`, which Wireshark maps to reserved.
    pub fn ether_type_from_version_nibble(version: u8) -> EtherType {
        match version {
            IP4_VERSION => EtherType::Ipv4,
            IP6_VERSION => EtherType::Ipv6,
            _ => {
                warn!("couldn't detect the ether type, got ip version {version}");
                EtherType::Detect
            }
        }
    }

    /// Returns a new buffer of `length + 14` bytes: a synthetic header with
    /// the dummy addresses, followed by a copy of
    /// `buffer[offset..offset + length]`.
    ///
    /// With `EtherType::Detect` the real type is taken from the high nibble
    /// of the byte at `offset`. If `length` runs past the end of the buffer
    /// the copy is clamped to what is available.
    pub fn prepend_dummy_header(
        buffer: &[u8],
        offset: usize,
        length: usize,
        ether_type: EtherType,
    ) -> Vec<u8> {
        let start = offset.min(buffer.len());
        let total_length = length.min(buffer.len() - start);
        if total_length < length {
            warn!("trying to dump more bytes than are in the buffer, dumping up to the end");
        }
        let detected = if ether_type == EtherType::Detect && total_length > 0 {
            Self::ether_type_from_version_nibble(buffer[start] >> 4)
        } else {
            ether_type
        };
        let mut ret = Vec::with_capacity(ETHERNET_HEADER_LENGTH + total_length);
        ret.extend_from_slice(&Self::dummy(detected).to_vec());
        ret.extend_from_slice(&buffer[start..start + total_length]);
        ret
    }
}

/// The bytes a dump call captures: the requested region clamped to the end
/// of the buffer, optionally behind a synthetic Ethernet header.
pub(crate) fn capture_region(
    buffer: &[u8],
    offset: usize,
    length: usize,
    ether_type: Option<EtherType>,
) -> Vec<u8> {
    match ether_type {
        Some(ether_type) => EthernetHeader::prepend_dummy_header(buffer, offset, length, ether_type),
        None => {
            let start = offset.min(buffer.len());
            let total_length = length.min(buffer.len() - start);
            if total_length < length {
                warn!("trying to dump more bytes than are in the buffer, dumping up to the end");
            }
            buffer[start..start + total_length].to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization() {
        let header = EthernetHeader::dummy(EtherType::Ipv4);
        let bytes = header.to_vec();
        assert_eq!(bytes.len(), ETHERNET_HEADER_LENGTH);
        let (parsed, consumed) = EthernetHeader::from_slice(&bytes).unwrap();
        assert_eq!(consumed, ETHERNET_HEADER_LENGTH);
        assert_eq!(header, parsed);
    }

    #[test]
    fn wire_layout() {
        let bytes = EthernetHeader::dummy(EtherType::Ipv4).to_vec();
        let expected = [
            0x14, 0xc0, 0x3e, 0x55, 0x0b, 0x35, // destination
            0x74, 0xd0, 0x2b, 0x29, 0xa5, 0x18, // source
            0x08, 0x00, // ipv4, big endian
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn from_slice_too_short() {
        let bytes = EthernetHeader::dummy(EtherType::Ipv6).to_vec();
        let err = EthernetHeader::from_slice(&bytes[..13]).unwrap_err();
        assert!(err.is_need_more_data());
    }

    #[test]
    fn ether_type_detection() {
        assert_eq!(
            EthernetHeader::ether_type_from_version_nibble(IP4_VERSION),
            EtherType::Ipv4
        );
        assert_eq!(
            EthernetHeader::ether_type_from_version_nibble(IP6_VERSION),
            EtherType::Ipv6
        );
        assert_eq!(
            EthernetHeader::ether_type_from_version_nibble(0),
            EtherType::Detect
        );
    }

    #[test]
    fn prepend_dummy_header() {
        let buffer = [0x01u8, 0x02, 0x03, 0x04];
        let prepended =
            EthernetHeader::prepend_dummy_header(&buffer, 0, buffer.len(), EtherType::Ipv4);
        assert_eq!(prepended.len(), buffer.len() + ETHERNET_HEADER_LENGTH);
        assert_eq!(&prepended[ETHERNET_HEADER_LENGTH..], &buffer);

        let (header, _) = EthernetHeader::from_slice(&prepended).unwrap();
        assert_eq!(header.destination, DUMMY_MAC_DESTINATION);
        assert_eq!(header.source, DUMMY_MAC_SOURCE);
        assert_eq!(header.ether_type, EtherType::Ipv4);
    }

    #[test]
    fn prepend_detects_ip_version() {
        let ipv4_packet = [0x45u8, 0x00, 0x00, 0x14];
        let prepended =
            EthernetHeader::prepend_dummy_header(&ipv4_packet, 0, ipv4_packet.len(), EtherType::Detect);
        let (header, _) = EthernetHeader::from_slice(&prepended).unwrap();
        assert_eq!(header.ether_type, EtherType::Ipv4);

        let ipv6_packet = [0x60u8, 0x00, 0x00, 0x00];
        let prepended =
            EthernetHeader::prepend_dummy_header(&ipv6_packet, 0, ipv6_packet.len(), EtherType::Detect);
        let (header, _) = EthernetHeader::from_slice(&prepended).unwrap();
        assert_eq!(header.ether_type, EtherType::Ipv6);

        let junk = [0x00u8, 0x01];
        let prepended = EthernetHeader::prepend_dummy_header(&junk, 0, junk.len(), EtherType::Detect);
        let (header, _) = EthernetHeader::from_slice(&prepended).unwrap();
        assert_eq!(header.ether_type, EtherType::Detect);
    }

    #[test]
    fn prepend_clamps_to_buffer() {
        let buffer = [0x45u8, 0x01, 0x02, 0x03];
        let prepended = EthernetHeader::prepend_dummy_header(&buffer, 2, 10, EtherType::Ipv4);
        assert_eq!(prepended.len(), ETHERNET_HEADER_LENGTH + 2);
        assert_eq!(&prepended[ETHERNET_HEADER_LENGTH..], &buffer[2..]);
    }

    #[test]
    fn mac_address_parsing() {
        let mac: MacAddr6 = "14:c0:3e:55:0b:35".parse().unwrap();
        assert_eq!(mac, DUMMY_MAC_DESTINATION);
        assert!("not-a-mac".parse::<MacAddr6>().is_err());
        assert!("14:c0:3e:55:0b".parse::<MacAddr6>().is_err());
    }
}
