//! Incremental parsing over a growing byte stream.
//!
//! Consumers of a live capture stream see blocks arrive in arbitrary
//! fragments. The discipline is the same for every parser in this crate:
//! attempt a parse at the current cursor; if the buffer ends before the
//! value does, leave the cursor where it was and retry once more bytes have
//! arrived; if the bytes cannot be valid, skip a single byte and try again
//! so that a corrupt stream still makes forward progress.

use tracing::error;

use crate::Result;
use crate::error::PktDumpError;
use crate::pcapng::GeneralBlock;

/// The outcome of one attempt to parse a value out of a byte stream.
#[derive(Debug)]
pub enum ParseOutcome<T> {
    /// A complete value was parsed, consuming `consumed` bytes.
    Parsed { value: T, consumed: usize },
    /// The buffer ends before the value does; rewind and wait for more
    /// bytes. This is the steady-state condition on a live stream.
    NeedMoreData,
    /// The bytes at the cursor cannot be a valid value.
    Malformed(PktDumpError),
}

impl<T> ParseOutcome<T> {
    /// Classifies a parser result: short-buffer errors become
    /// `NeedMoreData`, everything else that failed is `Malformed`.
    pub fn from_result(result: Result<(T, usize)>) -> Self {
        match result {
            Ok((value, consumed)) => Self::Parsed { value, consumed },
            Err(e) if e.is_need_more_data() => Self::NeedMoreData,
            Err(e) => Self::Malformed(e),
        }
    }
}

/// Reads pcapng blocks out of a stream that grows as capture bytes arrive.
///
/// Bytes that have not been consumed by a successful parse are never
/// discarded; a block split across two `push` calls parses once its tail
/// arrives.
#[derive(Debug, Default)]
pub struct BlockStream {
    buffer: Vec<u8>,
    position: usize,
}

impl BlockStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly received bytes to the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.compact();
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes waiting to be consumed by a successful parse.
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.position
    }

    /// The next complete block, or `None` once the remaining bytes are too
    /// short to hold one. Malformed bytes are skipped one at a time, one
    /// logged error per skipped byte, so a corrupt packet is lost but the
    /// stream re-synchronizes on the next valid block.
    pub fn next_block(&mut self) -> Option<GeneralBlock> {
        loop {
            let remaining = &self.buffer[self.position..];
            if remaining.is_empty() {
                return None;
            }
            match ParseOutcome::from_result(GeneralBlock::from_slice(remaining)) {
                ParseOutcome::Parsed { value, consumed } => {
                    self.position += consumed;
                    return Some(value);
                }
                ParseOutcome::NeedMoreData => return None,
                ParseOutcome::Malformed(e) => {
                    error!("skipping one byte of a corrupt capture stream: {e}");
                    self.position += 1;
                }
            }
        }
    }

    // Drops the consumed prefix so the buffer does not grow without bound.
    fn compact(&mut self) {
        if self.position > 0 {
            self.buffer.drain(..self.position);
            self.position = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcapng::PcapNgBlock;
    use crate::pcapng::SimplePacketBlock;

    #[test]
    fn block_split_across_pushes() {
        let block = SimplePacketBlock::new(&[0x01, 0x02, 0x03, 0x04, 0x05]);
        let bytes = block.to_vec();

        let mut stream = BlockStream::new();
        stream.push(&bytes[..10]);
        assert!(stream.next_block().is_none());
        assert_eq!(stream.pending(), 10);

        stream.push(&bytes[10..]);
        match stream.next_block() {
            Some(GeneralBlock::SimplePacket(parsed)) => assert_eq!(parsed, block),
            other => panic!("unexpected block: {other:?}"),
        }
        assert_eq!(stream.pending(), 0);
    }

    #[test]
    fn resync_after_garbage_byte() {
        let first = SimplePacketBlock::new(&[0x01, 0x02, 0x03, 0x04]);
        let second = SimplePacketBlock::new(&[0x05, 0x06, 0x07, 0x08]);
        let mut bytes = first.to_vec();
        bytes.push(0xFF); // garbage between the two blocks
        bytes.extend_from_slice(&second.to_vec());

        let mut stream = BlockStream::new();
        stream.push(&bytes);

        match stream.next_block() {
            Some(GeneralBlock::SimplePacket(parsed)) => assert_eq!(parsed, first),
            other => panic!("unexpected block: {other:?}"),
        }
        match stream.next_block() {
            Some(GeneralBlock::SimplePacket(parsed)) => assert_eq!(parsed, second),
            other => panic!("unexpected block: {other:?}"),
        }
        assert!(stream.next_block().is_none());
        assert_eq!(stream.pending(), 0);
    }

    #[test]
    fn short_tail_is_kept() {
        let block = SimplePacketBlock::new(&[0x01]);
        let mut stream = BlockStream::new();
        let mut bytes = block.to_vec();
        bytes.extend_from_slice(&[0x03, 0x00]); // start of another block type
        stream.push(&bytes);

        assert!(stream.next_block().is_some());
        assert!(stream.next_block().is_none());
        assert_eq!(stream.pending(), 2);
    }
}
