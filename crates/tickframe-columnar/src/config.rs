use crate::codec::EncodingVersion;
use crate::handlers::OutputFormat;

/// Options controlling how encoded segments are read into a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadOptions {
    pub output_format: OutputFormat,
    pub encoding_version: EncodingVersion,
    /// Decode columns on the crate's thread pool when the `parallel` feature is enabled.
    pub parallel: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::Native,
            encoding_version: EncodingVersion::V1,
            parallel: true,
        }
    }
}
