use thiserror::Error;

#[derive(Error, Debug)]
pub enum PktDumpError {
    #[error("block type mismatch, expected {expected:#010x} got {actual:#010x}")]
    BlockTypeMismatch { expected: u32, actual: u32 },
    #[error("{field} is not the expected value, expected {expected} got {actual}")]
    UnexpectedFieldValue {
        field: &'static str,
        expected: i64,
        actual: i64,
    },
    #[error("block trailer length {trailer} does not repeat the header length {header}")]
    TrailerMismatch { header: u32, trailer: u32 },
    #[error("implausible block total length {length}")]
    BadBlockLength { length: u32 },
    #[error("captured length {captured} does not fit in a block of length {block}")]
    CapturedLengthOverflow { captured: u32, block: u32 },
    #[error("unknown block type: {blocktype:#010x}")]
    UnknownBlockType { blocktype: u32 },
    #[error("unsupported block type: {blockname}")]
    UnsupportedBlockType { blockname: String },
    #[error("unknown link type: {linktype}")]
    UnknownLinkType { linktype: u16 },
    #[error("unknown ether type: {ethertype:#06x}")]
    UnknownEtherType { ethertype: u16 },
    #[error("short buffer, need {needed} bytes but only {available} available")]
    ShortBuffer { needed: usize, available: usize },
    #[error("io error")]
    IoError(#[from] std::io::Error),
}

impl PktDumpError {
    /// True when the input simply ended before the value did. The caller
    /// should rewind to the pre-attempt position and retry once more bytes
    /// have arrived; every other variant is fatal to the parse attempt.
    pub fn is_need_more_data(&self) -> bool {
        matches!(self, PktDumpError::ShortBuffer { .. })
    }
}
