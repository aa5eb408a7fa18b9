//! Block header type, consensus serialization, and hashing.

pub mod block;
pub mod encoding;
pub mod hash;
pub mod locator;

pub use block::{genesis_header, BlockHeader, MinerAddress};
pub use encoding::{DecodeError, Decoder, Encoder};
pub use hash::{sha256, sha256d};
pub use locator::BlockLocator;
