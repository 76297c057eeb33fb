//! Preprocessing module - image decoding and the decode worker pool

pub mod decoder;
pub mod pool;

pub use decoder::{decode, DecodeError, DecodedImage, EncodedImage, ImagePayload};
pub use pool::{PoolConfig, PoolStats, PoolTicket, PreprocessPool};
