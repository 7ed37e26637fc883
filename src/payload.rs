//! Application payload: data plus optional metadata.

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{JsonCodec, MsgPackCodec};
use crate::error::Result;

/// Unit of data carried by request frames and reactive pipelines.
///
/// Cloning is cheap; both parts are reference-counted [`Bytes`].
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Payload {
    data: Bytes,
    metadata: Option<Bytes>,
}

impl Payload {
    /// Create a payload from its parts.
    pub fn new(data: Bytes, metadata: Option<Bytes>) -> Self {
        Self { data, metadata }
    }

    /// Create a payload from anything convertible to [`Bytes`].
    pub fn from_parts(data: impl Into<Bytes>, metadata: Option<impl Into<Bytes>>) -> Self {
        Self {
            data: data.into(),
            metadata: metadata.map(Into::into),
        }
    }

    /// Data-only payload.
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata: None,
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: impl Into<Bytes>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Data bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Metadata bytes, if any.
    #[inline]
    pub fn metadata(&self) -> Option<&[u8]> {
        self.metadata.as_deref()
    }

    /// Check whether metadata is present.
    #[inline]
    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    /// Split into data and metadata.
    pub fn into_parts(self) -> (Bytes, Option<Bytes>) {
        (self.data, self.metadata)
    }

    /// Payload whose data is `value` encoded as MessagePack.
    pub fn from_msgpack<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::from_data(MsgPackCodec::encode(value)?))
    }

    /// Payload whose data is `value` encoded as JSON.
    pub fn from_json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::from_data(JsonCodec::encode(value)?))
    }

    /// Decode the data as MessagePack.
    pub fn decode_msgpack<T: DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::decode(&self.data)
    }

    /// Decode the data as JSON.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T> {
        JsonCodec::decode(&self.data)
    }
}

impl From<&'static str> for Payload {
    fn from(data: &'static str) -> Self {
        Self::from_data(Bytes::from_static(data.as_bytes()))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self::from_data(data)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Payload{{data={},metadata={}}}",
            String::from_utf8_lossy(&self.data),
            String::from_utf8_lossy(self.metadata().unwrap_or_default())
        )
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("data_len", &self.data.len())
            .field("metadata_len", &self.metadata.as_ref().map(Bytes::len))
            .finish()
    }
}
