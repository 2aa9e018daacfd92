mod lz4_codec;
mod passthrough;
mod zstd_codec;

pub use lz4_codec::Lz4Codec;
pub use passthrough::PassThroughCodec;
pub use zstd_codec::ZstdCodec;

use std::sync::Arc;

use zframe_core::{Codec, Error, Result};

/// Names accepted by [`codec_by_name`], primary spelling first.
pub const CODEC_NAMES: &[&str] = &["zstd", "lz4", "passthrough"];

/// Resolve a codec from its name.
///
/// Frames carry no codec tag, so the CLI and callers pick the codec by name
/// on both the compress and the decompress side.
pub fn codec_by_name(name: &str) -> Result<Arc<dyn Codec>> {
    match name {
        "zstd" | "z" => Ok(Arc::new(ZstdCodec)),
        "lz4" | "l" => Ok(Arc::new(Lz4Codec)),
        "passthrough" | "pass" | "none" => Ok(Arc::new(PassThroughCodec)),
        other => Err(Error::UnknownCodec(other.to_string())),
    }
}
