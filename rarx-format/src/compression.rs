use std::fmt;
use std::io::Result;

/// Size of the chunks packed data is fed to a decompressor in.
pub(crate) const DEFAULT_BLOCK_SIZE: usize = 0x10000;

pub mod constants {
    pub const METHOD_STORE: u8 = 0;
    pub const METHOD_FASTEST: u8 = 1;
    pub const METHOD_FAST: u8 = 2;
    pub const METHOD_NORMAL: u8 = 3;
    pub const METHOD_GOOD: u8 = 4;
    pub const METHOD_BEST: u8 = 5;
}

use self::constants::*;

/// How an entry's data was packed.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressionInfo {
    /// Packing method, normalized so that 0 is store and 5 is best for every generation.
    pub method: u8,
    /// Version of the algorithm needed to unpack (13, 15, 20, 29, 50, 70...).
    pub version: u8,
    pub dictionary_size: u64,
    /// Continues the compression stream of the previous entry.
    pub solid: bool,
}

impl CompressionInfo {
    #[inline]
    pub fn is_stored(&self) -> bool {
        self.method == METHOD_STORE
    }

    pub fn method_name(&self) -> &'static str {
        match self.method {
            METHOD_STORE => "store",
            METHOD_FASTEST => "fastest",
            METHOD_FAST => "fast",
            METHOD_NORMAL => "normal",
            METHOD_GOOD => "good",
            METHOD_BEST => "best",
            _ => "unknown",
        }
    }
}

impl fmt::Display for CompressionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.method_name(), self.version)
    }
}

impl fmt::Debug for CompressionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (v{}, dict {} KiB{})",
            self.method_name(),
            self.version,
            self.dictionary_size / 1024,
            if self.solid { ", solid" } else { "" }
        )
    }
}

/// A streaming decoder for one compression stream.
///
/// A decoder lives as long as its stream: for a solid run it is fed the
/// packed data of every entry in the run, in order, and keeps its window
/// between entries; for a file split over volumes it is fed every part.
pub trait Decompressor: Send {
    /// Feed packed bytes, appending whatever they decode to onto `output`.
    fn feed(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<()>;

    /// All packed data of the current entry has been fed.
    fn finish(&mut self, _output: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

/// Supplies decoders for the packing methods it knows.
pub trait DecompressorFactory: Send + Sync + fmt::Debug {
    /// A fresh decoder for `info`, or `None` if the method is not supported.
    fn create(&self, info: &CompressionInfo) -> Option<Box<dyn Decompressor>>;
}

/// The store method: packed bytes are the content.
#[derive(Debug, Default)]
pub struct Stored;

impl Decompressor for Stored {
    fn feed(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        output.extend_from_slice(input);
        Ok(())
    }
}

/// Decoders built into this crate. Only the store method is handled here;
/// the LZ and PPM codecs are supplied by a separate factory.
#[derive(Debug, Default)]
pub struct StandardDecoders;

impl DecompressorFactory for StandardDecoders {
    fn create(&self, info: &CompressionInfo) -> Option<Box<dyn Decompressor>> {
        if info.is_stored() {
            Some(Box::new(Stored))
        } else {
            None
        }
    }
}
