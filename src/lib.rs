//! Dump network traffic as pcapng streams that Wireshark understands.
//!
//! The crate takes raw packet bytes from whatever capture source feeds it
//! (a VPN tunnel reader, a socket, a test fixture) and moves them through a
//! small pipeline: the bytes are optionally wrapped with a synthetic
//! Ethernet header, encoded into a pcapng block, and written to one or more
//! sinks. Sinks implement the [`PacketDumper`] capability; a file sink, a
//! live TCP server sink, a hex-dump string sink and a production no-op sink
//! are provided.
//!
//! Writing a capture file:
//!
//! ```no_run
//! use pktdump::DumpMode;
//! use pktdump::PacketDumper;
//! use pktdump::ethernet::EtherType;
//! use pktdump::filedumper::PcapNgFileDumper;
//!
//! fn main() -> pktdump::Result<()> {
//!     let mut dumper = PcapNgFileDumper::new("/tmp", "capture", DumpMode::Simple);
//!     dumper.open()?;
//!     let packet = [0x45u8, 0x00, 0x00, 0x14];
//!     dumper.dump_buffer(&packet, 0, packet.len(), false, Some(EtherType::Detect));
//!     dumper.close();
//!     Ok(())
//! }
//! ```
//!
//! Streaming live to Wireshark (`wireshark -k -i TCP@127.0.0.1:19000`):
//!
//! ```no_run
//! use pktdump::DumpMode;
//! use pktdump::PacketDumper;
//! use pktdump::serverdumper::DEFAULT_PORT;
//! use pktdump::serverdumper::PcapNgTcpServerDumper;
//!
//! fn main() -> pktdump::Result<()> {
//!     let mut dumper = PcapNgTcpServerDumper::new(DEFAULT_PORT, DumpMode::Enhanced, None);
//!     dumper.start()?;
//!     let packet = [0x45u8, 0x00, 0x00, 0x14];
//!     dumper.dump_buffer(&packet, 0, packet.len(), false, None);
//!     dumper.stop();
//!     Ok(())
//! }
//! ```

use std::result;

pub mod error;
pub mod ethernet;
pub mod filedumper;
pub mod pcapng;
pub mod serverdumper;
pub mod stream;
pub mod stringdumper;

use ethernet::EtherType;

pub type Result<T, E = error::PktDumpError> = result::Result<T, E>;

/// Which pcapng packet block flavor a sink emits. Fixed at sink
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpMode {
    /// Simple packet blocks: raw bytes only.
    #[default]
    Simple,
    /// Enhanced packet blocks: bytes plus timestamp and interface id.
    Enhanced,
}

/// The sink capability: anything that accepts a region of raw packet bytes
/// and persists or transmits it in capture form.
pub trait PacketDumper {
    /// Dumps `length` bytes of `buffer` starting at `offset`. If the region
    /// runs past the end of the buffer it is clamped to what is available.
    ///
    /// `addresses` asks text renderings to prefix each line with its byte
    /// offset; binary sinks ignore it. With an `ether_type` the region is
    /// first wrapped with a dummy Ethernet header, which lets Wireshark
    /// recognize raw IP traffic immediately; `EtherType::Detect` picks
    /// IPv4 or IPv6 from the payload itself.
    ///
    /// The buffer is borrowed immutably; dumping never changes caller
    /// state.
    fn dump_buffer(
        &mut self,
        buffer: &[u8],
        offset: usize,
        length: usize,
        addresses: bool,
        ether_type: Option<EtherType>,
    );
}

/// A packet dumper that does nothing. Lets debug builds wire up a real
/// dumper and production builds swap in this one without changing call
/// sites.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDumper;

impl PacketDumper for NullDumper {
    fn dump_buffer(
        &mut self,
        _buffer: &[u8],
        _offset: usize,
        _length: usize,
        _addresses: bool,
        _ether_type: Option<EtherType>,
    ) {
    }
}
