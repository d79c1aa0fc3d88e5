use chrono::Local;
use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use tracing::debug;
use tracing::error;

use crate::DumpMode;
use crate::PacketDumper;
use crate::Result;
use crate::ethernet::EtherType;
use crate::ethernet::capture_region;
use crate::pcapng::EnhancedPacketBlock;
use crate::pcapng::InterfaceDescriptionBlock;
use crate::pcapng::PcapNgBlock;
use crate::pcapng::SectionHeaderBlockLive;
use crate::pcapng::SimplePacketBlock;
use crate::pcapng::timestamp_micros;
use crate::stringdumper::StringDumper;

fn timestamped_filename(path: &str, name: &str, extension: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%dT%H-%M-%S%.3f");
    format!("{path}/{name}_{timestamp}.{extension}")
}

/// Dumps packets to a file in the pcapng format.
///
/// Every `open()` creates a fresh timestamped file and writes the section
/// header and interface description blocks; every dump appends one packet
/// block and flushes, favoring durability over batching throughput.
pub struct PcapNgFileDumper {
    path: String,
    name: String,
    mode: DumpMode,
    filename: Option<String>,
    writer: Option<BufWriter<File>>,
    logged_error: bool,
}

impl PcapNgFileDumper {
    pub fn new(path: &str, name: &str, mode: DumpMode) -> Self {
        Self {
            path: path.to_string(),
            name: name.to_string(),
            mode,
            filename: None,
            writer: None,
            logged_error: false,
        }
    }

    /// The file created by the most recent `open()`, if any.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Creates the output file and writes the two header blocks. Opening an
    /// already open dumper is a logged no-op.
    pub fn open(&mut self) -> Result<()> {
        if self.writer.is_some() {
            error!("trying to open a file that is already open");
            return Ok(());
        }
        let filename = timestamped_filename(&self.path, &self.name, "pcapng");
        let file = File::create(&filename)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&SectionHeaderBlockLive.to_vec())?;
        writer.flush()?;
        writer.write_all(&InterfaceDescriptionBlock::default().to_vec())?;
        writer.flush()?;
        debug!("opened pcapng dump file {filename}");
        self.filename = Some(filename);
        self.writer = Some(writer);
        self.logged_error = false;
        Ok(())
    }

    /// Flushes and releases the file handle. Closing an already closed
    /// dumper is a logged no-op.
    pub fn close(&mut self) {
        let Some(mut writer) = self.writer.take() else {
            error!("trying to close a file that is already closed");
            return;
        };
        if let Err(e) = writer.flush() {
            error!("error flushing dump file: {e}");
        }
    }
}

impl PacketDumper for PcapNgFileDumper {
    /// Appends one packet block. The `addresses` flag only applies to text
    /// renderings and is ignored here.
    fn dump_buffer(
        &mut self,
        buffer: &[u8],
        offset: usize,
        length: usize,
        _addresses: bool,
        ether_type: Option<EtherType>,
    ) {
        let Some(writer) = self.writer.as_mut() else {
            if !self.logged_error {
                error!("trying to dump to a file that is not open");
                self.logged_error = true;
            }
            return;
        };
        let data = capture_region(buffer, offset, length, ether_type);
        let bytes = match self.mode {
            DumpMode::Simple => SimplePacketBlock::new(&data).to_vec(),
            DumpMode::Enhanced => EnhancedPacketBlock::new(&data, timestamp_micros()).to_vec(),
        };
        if let Err(e) = writer.write_all(&bytes).and_then(|()| writer.flush()) {
            if !self.logged_error {
                error!("error writing to dump file: {e}");
                self.logged_error = true;
            }
        }
    }
}

/// Dumps packets into hexdump text files that Wireshark can import.
///
/// Each dump is one block of up to-16-byte lines; blocks are separated by a
/// blank line and offsets restart at zero with each packet.
pub struct TextFileDumper {
    path: String,
    name: String,
    string_dumper: StringDumper,
    filename: Option<String>,
    writer: Option<BufWriter<File>>,
    logged_error: bool,
}

impl TextFileDumper {
    pub fn new(path: &str, name: &str) -> Self {
        Self {
            path: path.to_string(),
            name: name.to_string(),
            string_dumper: StringDumper::new(),
            filename: None,
            writer: None,
            logged_error: false,
        }
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn open(&mut self) -> Result<()> {
        if self.writer.is_some() {
            error!("trying to open a file that is already open");
            return Ok(());
        }
        let filename = timestamped_filename(&self.path, &self.name, "txt");
        let file = File::create(&filename)?;
        debug!("opened text dump file {filename}");
        self.filename = Some(filename);
        self.writer = Some(BufWriter::new(file));
        self.logged_error = false;
        Ok(())
    }

    pub fn close(&mut self) {
        let Some(mut writer) = self.writer.take() else {
            error!("trying to close a file that is already closed");
            return;
        };
        if let Err(e) = writer.flush() {
            error!("error flushing dump file: {e}");
        }
    }
}

impl PacketDumper for TextFileDumper {
    fn dump_buffer(
        &mut self,
        buffer: &[u8],
        offset: usize,
        length: usize,
        addresses: bool,
        ether_type: Option<EtherType>,
    ) {
        let Some(writer) = self.writer.as_mut() else {
            if !self.logged_error {
                error!("trying to dump to a file that is not open");
                self.logged_error = true;
            }
            return;
        };
        let mut text =
            self.string_dumper
                .dump_buffer_to_string(buffer, offset, length, addresses, ether_type);
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text.push('\n'); // blank line between packets
        if let Err(e) = writer.write_all(text.as_bytes()).and_then(|()| writer.flush()) {
            if !self.logged_error {
                error!("error writing to dump file: {e}");
                self.logged_error = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethernet::ETHERNET_HEADER_LENGTH;
    use crate::pcapng::GeneralBlock;
    use crate::stream::BlockStream;
    use std::fs;

    fn temp_path() -> String {
        std::env::temp_dir().to_string_lossy().into_owned()
    }

    /// Parses the dumped file back into blocks and checks it leads with the
    /// two header blocks.
    fn read_blocks(filename: &str) -> Vec<GeneralBlock> {
        let bytes = fs::read(filename).unwrap();
        let mut stream = BlockStream::new();
        stream.push(&bytes);
        let mut blocks = Vec::new();
        while let Some(block) = stream.next_block() {
            blocks.push(block);
        }
        assert_eq!(stream.pending(), 0);
        assert!(matches!(blocks[0], GeneralBlock::SectionHeader(_)));
        assert!(matches!(blocks[1], GeneralBlock::InterfaceDescription(_)));
        blocks
    }

    fn cleanup(filename: Option<&str>) {
        if let Some(filename) = filename {
            let _ = fs::remove_file(filename);
        }
    }

    #[test]
    fn open_close() {
        let mut dumper = PcapNgFileDumper::new(&temp_path(), "pktdump_open_close", DumpMode::Simple);
        dumper.open().unwrap();
        let filename = dumper.filename().unwrap().to_string();
        dumper.close();
        let blocks = read_blocks(&filename);
        assert_eq!(blocks.len(), 2);
        cleanup(Some(&filename));
    }

    #[test]
    fn double_open_is_a_noop() {
        let mut dumper = PcapNgFileDumper::new(&temp_path(), "pktdump_double_open", DumpMode::Simple);
        dumper.open().unwrap();
        let filename = dumper.filename().unwrap().to_string();
        dumper.open().unwrap();
        assert_eq!(dumper.filename(), Some(filename.as_str()));
        dumper.close();
        dumper.close(); // second close logs, nothing else
        cleanup(Some(&filename));
    }

    #[test]
    fn dump_simple_packets() {
        let mut dumper = PcapNgFileDumper::new(&temp_path(), "pktdump_simple", DumpMode::Simple);
        dumper.open().unwrap();
        let first = [0x01u8, 0x02, 0x03, 0x04];
        let second = [0x05u8, 0x06, 0x07];
        dumper.dump_buffer(&first, 0, first.len(), false, None);
        dumper.dump_buffer(&second, 0, second.len(), false, None);
        dumper.close();

        let filename = dumper.filename().unwrap().to_string();
        let blocks = read_blocks(&filename);
        assert_eq!(blocks.len(), 4);
        match &blocks[2] {
            GeneralBlock::SimplePacket(spb) => assert_eq!(spb.packet_data, first),
            other => panic!("unexpected block: {other:?}"),
        }
        match &blocks[3] {
            GeneralBlock::SimplePacket(spb) => assert_eq!(spb.packet_data, second),
            other => panic!("unexpected block: {other:?}"),
        }
        cleanup(Some(&filename));
    }

    #[test]
    fn dump_enhanced_packet_with_dummy_ethernet() {
        let mut dumper = PcapNgFileDumper::new(&temp_path(), "pktdump_enhanced", DumpMode::Enhanced);
        dumper.open().unwrap();
        let packet = [0x45u8, 0x00, 0x00, 0x14, 0xAA];
        dumper.dump_buffer(&packet, 0, packet.len(), false, Some(EtherType::Detect));
        dumper.close();

        let filename = dumper.filename().unwrap().to_string();
        let blocks = read_blocks(&filename);
        assert_eq!(blocks.len(), 3);
        match &blocks[2] {
            GeneralBlock::EnhancedPacket(epb) => {
                assert_eq!(epb.packet_data.len(), packet.len() + ETHERNET_HEADER_LENGTH);
                assert_eq!(&epb.packet_data[ETHERNET_HEADER_LENGTH..], &packet);
                assert!(epb.timestamp > 0);
            }
            other => panic!("unexpected block: {other:?}"),
        }
        cleanup(Some(&filename));
    }

    #[test]
    fn dump_while_closed_is_a_noop() {
        let mut dumper = PcapNgFileDumper::new(&temp_path(), "pktdump_closed", DumpMode::Simple);
        let packet = [0x01u8, 0x02];
        dumper.dump_buffer(&packet, 0, packet.len(), false, None);
        assert!(dumper.filename().is_none());
    }

    /// Strips offsets and newlines from a hex dump and rejoins the hex
    /// pairs, the way an external import tool reads the format back.
    fn parse_hex_dump(text: &str, addresses: bool) -> Vec<u8> {
        let mut bytes = Vec::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let line = if addresses { &line[10..] } else { line };
            for pair in line.split_whitespace() {
                bytes.push(u8::from_str_radix(pair, 16).unwrap());
            }
        }
        bytes
    }

    #[test]
    fn text_file_round_trip() {
        let mut dumper = TextFileDumper::new(&temp_path(), "pktdump_text");
        dumper.open().unwrap();
        let packet: Vec<u8> = (0..17).collect();
        dumper.dump_buffer(&packet, 0, packet.len(), false, None);
        dumper.close();

        let filename = dumper.filename().unwrap().to_string();
        let text = fs::read_to_string(&filename).unwrap();
        assert_eq!(parse_hex_dump(&text, false), packet);
        cleanup(Some(&filename));
    }

    #[test]
    fn text_file_round_trip_with_addresses_and_ethernet() {
        let mut dumper = TextFileDumper::new(&temp_path(), "pktdump_text_eth");
        dumper.open().unwrap();
        let packet = [0x45u8, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        dumper.dump_buffer(&packet, 0, packet.len(), true, Some(EtherType::Ipv4));
        dumper.close();

        let filename = dumper.filename().unwrap().to_string();
        let text = fs::read_to_string(&filename).unwrap();
        let bytes = parse_hex_dump(&text, true);
        assert_eq!(&bytes[ETHERNET_HEADER_LENGTH..], &packet);
        cleanup(Some(&filename));
    }
}
