//! MsgPack codec using `rmp-serde`.
//!
//! Always encodes with `to_vec_named`: structs become maps keyed by field
//! name, which is what non-Rust RSocket peers decode. `to_vec` would emit
//! positional arrays.
//!
//! # Example
//!
//! ```
//! use rsocket_core::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Quote {
//!     symbol: String,
//!     price: u64,
//! }
//!
//! let quote = Quote { symbol: "ABC".to_string(), price: 42 };
//! let encoded = MsgPackCodec::encode(&quote).unwrap();
//! let decoded: Quote = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, quote);
//! ```

use crate::error::Result;

/// MessagePack codec for structured payload data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
