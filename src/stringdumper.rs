use tracing::info;

use crate::PacketDumper;
use crate::ethernet::EtherType;
use crate::ethernet::capture_region;

/// A packet dumper that renders buffers as hex-dump strings. Useful for
/// live debugging: `dump_buffer` sends each rendering to the log (or to
/// stdout when so configured), and `dump_buffer_to_string` can be called
/// directly to get the text.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringDumper {
    write_to_stdout: bool,
}

impl StringDumper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print renderings to stdout instead of the log.
    pub fn with_stdout() -> Self {
        Self {
            write_to_stdout: true,
        }
    }

    /// Renders `min(length, available)` bytes of `buffer` starting at
    /// `offset` as uppercase hex, one space between bytes, a newline after
    /// every 16 bytes and no trailing separator otherwise.
    ///
    /// With `addresses`, every line is prefixed with an 8-hex-digit byte
    /// offset (relative to the start of the dumped region) and two spaces,
    /// the layout Wireshark's hex-dump import understands. With an
    /// `ether_type`, the region is rendered behind a dummy Ethernet header.
    pub fn dump_buffer_to_string(
        &self,
        buffer: &[u8],
        offset: usize,
        length: usize,
        addresses: bool,
        ether_type: Option<EtherType>,
    ) -> String {
        let data = capture_region(buffer, offset, length, ether_type);
        let mut output = String::new();
        for (i, byte) in data.iter().enumerate() {
            if addresses && i % 16 == 0 {
                output.push_str(&format!("{i:08X}  "));
            }
            output.push_str(&format!("{byte:02X}"));
            if (i + 1) % 16 == 0 {
                output.push('\n');
            } else if i + 1 < data.len() {
                output.push(' ');
            }
        }
        output
    }
}

impl PacketDumper for StringDumper {
    fn dump_buffer(
        &mut self,
        buffer: &[u8],
        offset: usize,
        length: usize,
        addresses: bool,
        ether_type: Option<EtherType>,
    ) {
        let hex = self.dump_buffer_to_string(buffer, offset, length, addresses, ether_type);
        if self.write_to_stdout {
            println!("{hex}");
        } else {
            info!("{hex}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dumper() -> StringDumper {
        StringDumper::new()
    }

    fn counting(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[test]
    fn less_than_single_line() {
        let buffer = counting(5);
        let hex = dumper().dump_buffer_to_string(&buffer, 0, buffer.len(), false, None);
        assert_eq!(hex, "00 01 02 03 04");
    }

    #[test]
    fn one_full_line() {
        let buffer = counting(16);
        let hex = dumper().dump_buffer_to_string(&buffer, 0, buffer.len(), false, None);
        assert_eq!(hex, "00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F\n");
    }

    #[test]
    fn line_and_a_half() {
        let buffer = counting(21);
        let hex = dumper().dump_buffer_to_string(&buffer, 0, buffer.len(), false, None);
        assert_eq!(
            hex,
            "00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F\n10 11 12 13 14"
        );
    }

    #[test]
    fn multiple_full_lines() {
        let buffer = counting(32);
        let hex = dumper().dump_buffer_to_string(&buffer, 0, buffer.len(), false, None);
        assert_eq!(
            hex,
            "00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F\n\
             10 11 12 13 14 15 16 17 18 19 1A 1B 1C 1D 1E 1F\n"
        );
    }

    #[test]
    fn from_offset() {
        let buffer = counting(5);
        let hex = dumper().dump_buffer_to_string(&buffer, 1, buffer.len() - 1, false, None);
        assert_eq!(hex, "01 02 03 04");
    }

    #[test]
    fn less_than_single_line_with_address() {
        let buffer = counting(5);
        let hex = dumper().dump_buffer_to_string(&buffer, 0, buffer.len(), true, None);
        assert_eq!(hex, "00000000  00 01 02 03 04");
    }

    #[test]
    fn line_and_a_half_with_address() {
        let buffer = counting(21);
        let hex = dumper().dump_buffer_to_string(&buffer, 0, buffer.len(), true, None);
        assert_eq!(
            hex,
            "00000000  00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F\n\
             00000010  10 11 12 13 14"
        );
    }

    #[test]
    fn address_restarts_at_zero_for_offset_regions() {
        let buffer = counting(21);
        let hex = dumper().dump_buffer_to_string(&buffer, 1, buffer.len() - 1, true, None);
        assert_eq!(
            hex,
            "00000000  01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F 10\n\
             00000010  11 12 13 14"
        );
    }

    #[test]
    fn offset_past_end_of_buffer() {
        let buffer = counting(17);
        let hex = dumper().dump_buffer_to_string(&buffer, 17, buffer.len() - 1, true, None);
        assert_eq!(hex, "");
    }

    #[test]
    fn length_past_end_of_buffer() {
        let buffer = counting(17);
        let hex = dumper().dump_buffer_to_string(&buffer, 0, buffer.len() + 1, true, None);
        assert_eq!(
            hex,
            "00000000  00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F\n00000010  10"
        );
    }

    #[test]
    fn dummy_header() {
        let buffer = counting(5);
        let hex =
            dumper().dump_buffer_to_string(&buffer, 0, buffer.len(), false, Some(EtherType::Ipv4));
        assert_eq!(
            hex,
            "14 C0 3E 55 0B 35 74 D0 2B 29 A5 18 08 00 00 01\n02 03 04"
        );
    }

    #[test]
    fn dummy_header_with_address() {
        let buffer = counting(5);
        let hex =
            dumper().dump_buffer_to_string(&buffer, 0, buffer.len(), true, Some(EtherType::Ipv4));
        assert_eq!(
            hex,
            "00000000  14 C0 3E 55 0B 35 74 D0 2B 29 A5 18 08 00 00 01\n00000010  02 03 04"
        );
    }
}
