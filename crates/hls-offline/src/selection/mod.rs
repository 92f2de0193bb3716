//! Rendition selection: which variant, audio and text streams to download.

mod codec;
mod options;
mod selector;

pub use codec::{Codec, CodecSupport};
pub use options::{HEVC_BITRATE_FACTOR, SelectionOptions};
pub use selector::{Selection, StreamSelector};
