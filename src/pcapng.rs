// General Block Structure:
// from https://www.ietf.org/archive/id/draft-tuexen-opsawg-pcapng-03.html
//                        1                   2                   3
//    0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 0 |                          Block Type                           |
//   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 4 |                      Block Total Length                       |
//   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// 8 /                          Block Body                           /
//   /              variable length, padded to 32 bits               /
//   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//   |                      Block Total Length                       |
//   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
// The Block Total Length is duplicated at the end of every block to permit
// backward stream navigation. All fields are little-endian.

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use serde::Deserialize;
use serde::Serialize;
use std::io::Cursor;
use std::io::Read;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

use crate::Result;
use crate::error::PktDumpError;

// https://www.ietf.org/staging/draft-tuexen-opsawg-pcapng-02.html#name-block-types
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, Serialize, Deserialize)]
pub enum BlockType {
    InterfaceDescription = 0x01,
    SimplePacket = 0x03,
    NameResolution = 0x04,
    InterfaceStatistics = 0x05,
    EnhancedPacket = 0x06,
    SectionHeader = 0x0A0D0D0A,
}

impl BlockType {
    pub fn to_u32(self) -> u32 {
        self as u32
    }
    pub fn from_u32(value: u32) -> Option<Self> {
        BlockType::iter().find(|&b| b.to_u32() == value)
    }
}

// https://www.tcpdump.org/linktypes.html
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, Serialize, Deserialize)]
pub enum LinkType {
    Null = 0,
    Ethernet = 1,
    Ax25 = 3,
    Ieee8025 = 6,
    ArcnetBsd = 7,
    Slip = 8,
    Ppp = 9,
    Fddi = 10,
    PppHdlc = 50,
    PppEther = 51,
    AtmRfc1483 = 100,
    Raw = 101,
    CHdlc = 104,
    Ieee80211 = 105,
    Frelay = 107,
    Loop = 108,
    LinuxSll = 113,
    Ltalk = 114,
    Pflog = 117,
    Ieee80211Prism = 119,
    IpOverFc = 122,
    Sunatm = 123,
    Ieee80211Radiotap = 127,
    ArcnetLinux = 129,
    AppleIpOverIeee1394 = 138,
    Mtp2WithPhdr = 139,
    Mtp2 = 140,
    Mtp3 = 141,
    Sccp = 142,
    Docsis = 143,
    LinuxIrda = 144,
}

impl LinkType {
    pub fn to_u16(self) -> u16 {
        self as u16
    }
    pub fn from_u16(value: u16) -> Option<Self> {
        LinkType::iter().find(|&l| l.to_u16() == value)
    }
}

/// Any pcapng block: knows its total encoded size and its exact wire bytes.
pub trait PcapNgBlock {
    /// Total size of the block in octets, always a multiple of 4.
    fn size(&self) -> u32;
    /// The wire representation of the block.
    fn to_vec(&self) -> Vec<u8>;
}

/// Length of `len` bytes of block body data once zero-padded to a 32-bit
/// boundary.
pub(crate) fn padded_to_32(len: usize) -> usize {
    len.div_ceil(4) * 4
}

/// Microseconds since the Unix epoch, the resolution analyzers assume when
/// the interface description block carries no if_tsresol option. A clock
/// before the epoch yields 0.
pub fn timestamp_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

// Section Header Block, fixed layout for a live capture:
// [block type = 0x0A0D0D0A][block len = 28][byte-order magic = 0x1A2B3C4D]
// [major = 1][minor = 0][section length = -1][block len = 28]
//
// The section length is unknown while capturing live, so it is always
// written as -1 and the capture can only be navigated by walking blocks.

const ENDIAN_MAGIC: u32 = 0x1A2B3C4D;
const MAJOR_VERSION: u16 = 1;
const MINOR_VERSION: u16 = 0;
const SECTION_LENGTH_UNKNOWN: i64 = -1;

// block type (4) + 2x block len (4) + magic (4) + major (2) + minor (2) + section len (8)
const SECTION_HEADER_BLOCK_LENGTH: u32 = 28;

/// Section header for a live capture. Stateless, every field is a constant,
/// so the value is constructed wherever it is needed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionHeaderBlockLive;

impl PcapNgBlock for SectionHeaderBlockLive {
    fn size(&self) -> u32 {
        SECTION_HEADER_BLOCK_LENGTH
    }

    fn to_vec(&self) -> Vec<u8> {
        let mut ret = Vec::with_capacity(SECTION_HEADER_BLOCK_LENGTH as usize);
        ret.extend_from_slice(&BlockType::SectionHeader.to_u32().to_le_bytes());
        ret.extend_from_slice(&SECTION_HEADER_BLOCK_LENGTH.to_le_bytes());
        ret.extend_from_slice(&ENDIAN_MAGIC.to_le_bytes());
        ret.extend_from_slice(&MAJOR_VERSION.to_le_bytes());
        ret.extend_from_slice(&MINOR_VERSION.to_le_bytes());
        ret.extend_from_slice(&SECTION_LENGTH_UNKNOWN.to_le_bytes());
        ret.extend_from_slice(&SECTION_HEADER_BLOCK_LENGTH.to_le_bytes());
        ret
    }
}

impl SectionHeaderBlockLive {
    /// Reads a live-capture section header from the front of `buf`,
    /// validating every fixed field against its expected constant.
    pub fn from_slice(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < SECTION_HEADER_BLOCK_LENGTH as usize {
            return Err(PktDumpError::ShortBuffer {
                needed: SECTION_HEADER_BLOCK_LENGTH as usize,
                available: buf.len(),
            });
        }
        let mut cursor = Cursor::new(buf);
        let block_type = cursor.read_u32::<LittleEndian>()?;
        if block_type != BlockType::SectionHeader.to_u32() {
            return Err(PktDumpError::BlockTypeMismatch {
                expected: BlockType::SectionHeader.to_u32(),
                actual: block_type,
            });
        }
        let block_length = cursor.read_u32::<LittleEndian>()?;
        if block_length != SECTION_HEADER_BLOCK_LENGTH {
            return Err(PktDumpError::UnexpectedFieldValue {
                field: "block total length",
                expected: SECTION_HEADER_BLOCK_LENGTH as i64,
                actual: block_length as i64,
            });
        }
        let endian_magic = cursor.read_u32::<LittleEndian>()?;
        if endian_magic != ENDIAN_MAGIC {
            return Err(PktDumpError::UnexpectedFieldValue {
                field: "byte order magic",
                expected: ENDIAN_MAGIC as i64,
                actual: endian_magic as i64,
            });
        }
        let major_version = cursor.read_u16::<LittleEndian>()?;
        if major_version != MAJOR_VERSION {
            return Err(PktDumpError::UnexpectedFieldValue {
                field: "major version",
                expected: MAJOR_VERSION as i64,
                actual: major_version as i64,
            });
        }
        let minor_version = cursor.read_u16::<LittleEndian>()?;
        if minor_version != MINOR_VERSION {
            return Err(PktDumpError::UnexpectedFieldValue {
                field: "minor version",
                expected: MINOR_VERSION as i64,
                actual: minor_version as i64,
            });
        }
        let section_length = cursor.read_i64::<LittleEndian>()?;
        if section_length != SECTION_LENGTH_UNKNOWN {
            return Err(PktDumpError::UnexpectedFieldValue {
                field: "section length",
                expected: SECTION_LENGTH_UNKNOWN,
                actual: section_length,
            });
        }
        let trailer = cursor.read_u32::<LittleEndian>()?;
        if trailer != block_length {
            return Err(PktDumpError::TrailerMismatch {
                header: block_length,
                trailer,
            });
        }
        Ok((SectionHeaderBlockLive, SECTION_HEADER_BLOCK_LENGTH as usize))
    }
}

// Interface Description Block, fixed layout without options:
// [block type = 1][block len = 20][link type u16][reserved u16 = 0]
// [snap len u32 = 0][block len = 20]
//
// A snap length of zero means packets are not truncated.

// block type (4) + 2x block len (4) + link type (2) + reserved (2) + snap len (4)
const INTERFACE_DESCRIPTION_BLOCK_LENGTH: u32 = 20;

/// https://www.ietf.org/archive/id/draft-tuexen-opsawg-pcapng-03.html#name-interface-description-block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptionBlock {
    pub link_type: LinkType,
}

impl Default for InterfaceDescriptionBlock {
    fn default() -> Self {
        Self {
            link_type: LinkType::Ethernet,
        }
    }
}

impl PcapNgBlock for InterfaceDescriptionBlock {
    fn size(&self) -> u32 {
        INTERFACE_DESCRIPTION_BLOCK_LENGTH
    }

    fn to_vec(&self) -> Vec<u8> {
        let mut ret = Vec::with_capacity(INTERFACE_DESCRIPTION_BLOCK_LENGTH as usize);
        ret.extend_from_slice(&BlockType::InterfaceDescription.to_u32().to_le_bytes());
        ret.extend_from_slice(&INTERFACE_DESCRIPTION_BLOCK_LENGTH.to_le_bytes());
        ret.extend_from_slice(&self.link_type.to_u16().to_le_bytes());
        ret.extend_from_slice(&0u16.to_le_bytes()); // reserved
        ret.extend_from_slice(&0u32.to_le_bytes()); // snap length
        ret.extend_from_slice(&INTERFACE_DESCRIPTION_BLOCK_LENGTH.to_le_bytes());
        ret
    }
}

impl InterfaceDescriptionBlock {
    pub fn new(link_type: LinkType) -> Self {
        Self { link_type }
    }

    pub fn from_slice(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < INTERFACE_DESCRIPTION_BLOCK_LENGTH as usize {
            return Err(PktDumpError::ShortBuffer {
                needed: INTERFACE_DESCRIPTION_BLOCK_LENGTH as usize,
                available: buf.len(),
            });
        }
        let mut cursor = Cursor::new(buf);
        let block_type = cursor.read_u32::<LittleEndian>()?;
        if block_type != BlockType::InterfaceDescription.to_u32() {
            return Err(PktDumpError::BlockTypeMismatch {
                expected: BlockType::InterfaceDescription.to_u32(),
                actual: block_type,
            });
        }
        let block_length = cursor.read_u32::<LittleEndian>()?;
        if block_length != INTERFACE_DESCRIPTION_BLOCK_LENGTH {
            return Err(PktDumpError::UnexpectedFieldValue {
                field: "block total length",
                expected: INTERFACE_DESCRIPTION_BLOCK_LENGTH as i64,
                actual: block_length as i64,
            });
        }
        let value = cursor.read_u16::<LittleEndian>()?;
        let link_type = match LinkType::from_u16(value) {
            Some(l) => l,
            None => return Err(PktDumpError::UnknownLinkType { linktype: value }),
        };
        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let snap_length = cursor.read_u32::<LittleEndian>()?;
        if snap_length != 0 {
            return Err(PktDumpError::UnexpectedFieldValue {
                field: "snap length",
                expected: 0,
                actual: snap_length as i64,
            });
        }
        let trailer = cursor.read_u32::<LittleEndian>()?;
        if trailer != block_length {
            return Err(PktDumpError::TrailerMismatch {
                header: block_length,
                trailer,
            });
        }
        Ok((
            InterfaceDescriptionBlock { link_type },
            INTERFACE_DESCRIPTION_BLOCK_LENGTH as usize,
        ))
    }
}

// Simple Packet Block:
// [block type = 3][block len][original length u32][packet data...]
// [zero pad to 32 bits][block len]
//
// This codec never truncates packets (snap length 0), so the original
// length doubles as the captured length.

// block type (4) + 2x block len (4) + original length (4)
const SIMPLE_PACKET_BLOCK_FIX_LENGTH: u32 = 16;

/// https://www.ietf.org/archive/id/draft-tuexen-opsawg-pcapng-03.html#name-simple-packet-block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimplePacketBlock {
    pub packet_data: Vec<u8>,
}

impl PcapNgBlock for SimplePacketBlock {
    fn size(&self) -> u32 {
        SIMPLE_PACKET_BLOCK_FIX_LENGTH + padded_to_32(self.packet_data.len()) as u32
    }

    fn to_vec(&self) -> Vec<u8> {
        let size = self.size();
        let mut ret = Vec::with_capacity(size as usize);
        ret.extend_from_slice(&BlockType::SimplePacket.to_u32().to_le_bytes());
        ret.extend_from_slice(&size.to_le_bytes());
        ret.extend_from_slice(&(self.packet_data.len() as u32).to_le_bytes());
        ret.extend_from_slice(&self.packet_data);
        ret.resize(ret.len() + self.zero_pad_size(), 0);
        ret.extend_from_slice(&size.to_le_bytes());
        ret
    }
}

impl SimplePacketBlock {
    pub fn new(packet_data: &[u8]) -> Self {
        Self {
            packet_data: packet_data.to_vec(),
        }
    }

    fn zero_pad_size(&self) -> usize {
        padded_to_32(self.packet_data.len()) - self.packet_data.len()
    }

    /// Reads a simple packet block from the front of `buf`. The whole block
    /// must be present; a buffer that ends mid-block is a short-buffer
    /// error, not a format error.
    pub fn from_slice(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 8 {
            return Err(PktDumpError::ShortBuffer {
                needed: 8,
                available: buf.len(),
            });
        }
        let mut cursor = Cursor::new(buf);
        let block_type = cursor.read_u32::<LittleEndian>()?;
        if block_type != BlockType::SimplePacket.to_u32() {
            return Err(PktDumpError::BlockTypeMismatch {
                expected: BlockType::SimplePacket.to_u32(),
                actual: block_type,
            });
        }
        let block_length = cursor.read_u32::<LittleEndian>()?;
        if block_length < SIMPLE_PACKET_BLOCK_FIX_LENGTH || block_length % 4 != 0 {
            return Err(PktDumpError::BadBlockLength {
                length: block_length,
            });
        }
        if buf.len() < block_length as usize {
            return Err(PktDumpError::ShortBuffer {
                needed: block_length as usize,
                available: buf.len(),
            });
        }
        let packet_length = cursor.read_u32::<LittleEndian>()?;
        if packet_length > block_length - SIMPLE_PACKET_BLOCK_FIX_LENGTH {
            return Err(PktDumpError::CapturedLengthOverflow {
                captured: packet_length,
                block: block_length,
            });
        }
        let mut packet_data = vec![0u8; packet_length as usize];
        cursor.read_exact(&mut packet_data)?;
        let zero_pad = block_length - SIMPLE_PACKET_BLOCK_FIX_LENGTH - packet_length;
        cursor.set_position(cursor.position() + zero_pad as u64);
        let trailer = cursor.read_u32::<LittleEndian>()?;
        if trailer != block_length {
            return Err(PktDumpError::TrailerMismatch {
                header: block_length,
                trailer,
            });
        }
        Ok((SimplePacketBlock { packet_data }, block_length as usize))
    }
}

// Enhanced Packet Block:
// [block type = 6][block len][interface id u32][timestamp high u32]
// [timestamp low u32][captured length u32][original length u32]
// [packet data...][zero pad to 32 bits][block len]

// block type (4) + 2x block len (4) + interface id (4) + timestamp high (4)
// + timestamp low (4) + captured length (4) + original length (4)
const ENHANCED_PACKET_BLOCK_FIX_LENGTH: u32 = 32;

/// https://www.ietf.org/archive/id/draft-tuexen-opsawg-pcapng-03.html#name-enhanced-packet-block
///
/// The 64-bit timestamp is split into two 32-bit halves on the wire. Its
/// unit is whatever the interface description block declares; since this
/// codec never writes an if_tsresol option, that is microseconds since the
/// epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhancedPacketBlock {
    pub interface_id: u32,
    pub timestamp: u64,
    pub original_packet_length: u32,
    pub packet_data: Vec<u8>,
}

impl PcapNgBlock for EnhancedPacketBlock {
    fn size(&self) -> u32 {
        ENHANCED_PACKET_BLOCK_FIX_LENGTH + padded_to_32(self.packet_data.len()) as u32
    }

    fn to_vec(&self) -> Vec<u8> {
        let size = self.size();
        let mut ret = Vec::with_capacity(size as usize);
        ret.extend_from_slice(&BlockType::EnhancedPacket.to_u32().to_le_bytes());
        ret.extend_from_slice(&size.to_le_bytes());
        ret.extend_from_slice(&self.interface_id.to_le_bytes());
        ret.extend_from_slice(&((self.timestamp >> 32) as u32).to_le_bytes());
        ret.extend_from_slice(&(self.timestamp as u32).to_le_bytes());
        ret.extend_from_slice(&(self.packet_data.len() as u32).to_le_bytes());
        ret.extend_from_slice(&self.original_packet_length.to_le_bytes());
        ret.extend_from_slice(&self.packet_data);
        ret.resize(ret.len() + self.zero_pad_size(), 0);
        ret.extend_from_slice(&size.to_le_bytes());
        ret
    }
}

impl EnhancedPacketBlock {
    /// A block for a packet captured in full on interface 0.
    pub fn new(packet_data: &[u8], timestamp: u64) -> Self {
        Self {
            interface_id: 0,
            timestamp,
            original_packet_length: packet_data.len() as u32,
            packet_data: packet_data.to_vec(),
        }
    }

    fn zero_pad_size(&self) -> usize {
        padded_to_32(self.packet_data.len()) - self.packet_data.len()
    }

    pub fn from_slice(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 8 {
            return Err(PktDumpError::ShortBuffer {
                needed: 8,
                available: buf.len(),
            });
        }
        let mut cursor = Cursor::new(buf);
        let block_type = cursor.read_u32::<LittleEndian>()?;
        if block_type != BlockType::EnhancedPacket.to_u32() {
            return Err(PktDumpError::BlockTypeMismatch {
                expected: BlockType::EnhancedPacket.to_u32(),
                actual: block_type,
            });
        }
        let block_length = cursor.read_u32::<LittleEndian>()?;
        if block_length < ENHANCED_PACKET_BLOCK_FIX_LENGTH || block_length % 4 != 0 {
            return Err(PktDumpError::BadBlockLength {
                length: block_length,
            });
        }
        if buf.len() < block_length as usize {
            return Err(PktDumpError::ShortBuffer {
                needed: block_length as usize,
                available: buf.len(),
            });
        }
        let interface_id = cursor.read_u32::<LittleEndian>()?;
        let ts_high = cursor.read_u32::<LittleEndian>()?;
        let ts_low = cursor.read_u32::<LittleEndian>()?;
        let captured_length = cursor.read_u32::<LittleEndian>()?;
        let original_length = cursor.read_u32::<LittleEndian>()?;
        if captured_length > block_length - ENHANCED_PACKET_BLOCK_FIX_LENGTH {
            return Err(PktDumpError::CapturedLengthOverflow {
                captured: captured_length,
                block: block_length,
            });
        }
        let mut packet_data = vec![0u8; captured_length as usize];
        cursor.read_exact(&mut packet_data)?;
        let zero_pad = block_length - ENHANCED_PACKET_BLOCK_FIX_LENGTH - captured_length;
        cursor.set_position(cursor.position() + zero_pad as u64);
        let trailer = cursor.read_u32::<LittleEndian>()?;
        if trailer != block_length {
            return Err(PktDumpError::TrailerMismatch {
                header: block_length,
                trailer,
            });
        }
        let timestamp = ((ts_high as u64) << 32) | ts_low as u64;
        Ok((
            EnhancedPacketBlock {
                interface_id,
                timestamp,
                original_packet_length: original_length,
                packet_data,
            },
            block_length as usize,
        ))
    }
}

/// Union of the blocks this codec understands, for dispatch while walking a
/// stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneralBlock {
    SectionHeader(SectionHeaderBlockLive),
    InterfaceDescription(InterfaceDescriptionBlock),
    SimplePacket(SimplePacketBlock),
    EnhancedPacket(EnhancedPacketBlock),
}

impl PcapNgBlock for GeneralBlock {
    fn size(&self) -> u32 {
        match self {
            Self::SectionHeader(b) => b.size(),
            Self::InterfaceDescription(b) => b.size(),
            Self::SimplePacket(b) => b.size(),
            Self::EnhancedPacket(b) => b.size(),
        }
    }

    fn to_vec(&self) -> Vec<u8> {
        match self {
            Self::SectionHeader(b) => b.to_vec(),
            Self::InterfaceDescription(b) => b.to_vec(),
            Self::SimplePacket(b) => b.to_vec(),
            Self::EnhancedPacket(b) => b.to_vec(),
        }
    }
}

impl GeneralBlock {
    /// Peeks the block type at the front of `buf` and dispatches to the
    /// matching block parser. Name resolution and interface statistics
    /// blocks are recognized but their bodies are not decoded.
    pub fn from_slice(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 4 {
            return Err(PktDumpError::ShortBuffer {
                needed: 4,
                available: buf.len(),
            });
        }
        let mut cursor = Cursor::new(buf);
        let value = cursor.read_u32::<LittleEndian>()?;
        match BlockType::from_u32(value) {
            Some(BlockType::SectionHeader) => {
                let (shb, consumed) = SectionHeaderBlockLive::from_slice(buf)?;
                Ok((Self::SectionHeader(shb), consumed))
            }
            Some(BlockType::InterfaceDescription) => {
                let (idb, consumed) = InterfaceDescriptionBlock::from_slice(buf)?;
                Ok((Self::InterfaceDescription(idb), consumed))
            }
            Some(BlockType::SimplePacket) => {
                let (spb, consumed) = SimplePacketBlock::from_slice(buf)?;
                Ok((Self::SimplePacket(spb), consumed))
            }
            Some(BlockType::EnhancedPacket) => {
                let (epb, consumed) = EnhancedPacketBlock::from_slice(buf)?;
                Ok((Self::EnhancedPacket(epb), consumed))
            }
            Some(BlockType::NameResolution) => Err(PktDumpError::UnsupportedBlockType {
                blockname: String::from("name resolution block"),
            }),
            Some(BlockType::InterfaceStatistics) => Err(PktDumpError::UnsupportedBlockType {
                blockname: String::from("interface statistics block"),
            }),
            None => Err(PktDumpError::UnknownBlockType { blocktype: value }),
        }
    }
}
