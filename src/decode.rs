use bytes::Bytes;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::{DecodeError, ResponseMeta, SuccessDecider};

/// Converts buffered response bytes into a typed target.
pub trait ResponseDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], target: &mut dyn DecodeTarget) -> Result<(), DecodeError>;
}

/// A typed slot a [`ResponseDecoder`] can write into.
///
/// Built-in slots come from [`Target::typed`] and [`Target::message`];
/// decoders pick whichever entry point matches their format.
pub trait DecodeTarget {
    /// Name of the target type, for error messages.
    fn type_name(&self) -> &'static str;

    fn deserialize_json(&mut self, bytes: &[u8]) -> Result<(), DecodeError>;

    /// Assigns from an already-parsed document. Used by decoders that map
    /// other formats onto the target structurally.
    fn deserialize_value(&mut self, value: serde_json::Value) -> Result<(), DecodeError>;

    /// Message capability, when the target is a protocol buffer message.
    fn as_message(&mut self) -> Option<&mut dyn ProtoMessage> {
        None
    }
}

/// Protocol buffer message capability required by [`ProtoJsonDecoder`].
///
/// Implement it for generated message types with their protobuf-JSON parser.
pub trait ProtoMessage {
    /// Replaces the message with one parsed from protobuf-JSON.
    fn decode_json(&mut self, bytes: &[u8]) -> Result<(), DecodeError>;
}

/// Where a response body goes, chosen once at the call site.
#[derive(Default)]
pub enum Target<'a> {
    /// Leave the body alone.
    #[default]
    Discard,
    /// Copy the buffered bytes verbatim; no decoder is involved.
    Raw(&'a mut Bytes),
    /// Run the configured [`ResponseDecoder`].
    Typed(Box<dyn DecodeTarget + Send + 'a>),
}

impl<'a> Target<'a> {
    pub fn raw(buffer: &'a mut Bytes) -> Self {
        Self::Raw(buffer)
    }

    /// Decodes into any serde-deserializable value.
    pub fn typed<T: DeserializeOwned + Send>(value: &'a mut T) -> Self {
        Self::Typed(Box::new(SerdeSlot(value)))
    }

    /// Decodes into a protocol buffer message.
    ///
    /// Only [`ProtoMessage`] is required: JSON goes through
    /// [`ProtoMessage::decode_json`] and structural values are rejected.
    pub fn message<M: ProtoMessage + Send>(value: &'a mut M) -> Self {
        Self::Typed(Box::new(MessageSlot(value)))
    }
}

struct SerdeSlot<'a, T>(&'a mut T);

impl<T: DeserializeOwned> DecodeTarget for SerdeSlot<'_, T> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn deserialize_json(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        *self.0 = serde_json::from_slice(bytes)?;
        Ok(())
    }

    fn deserialize_value(&mut self, value: serde_json::Value) -> Result<(), DecodeError> {
        *self.0 = serde_json::from_value(value)?;
        Ok(())
    }
}

struct MessageSlot<'a, M>(&'a mut M);

impl<M: ProtoMessage> DecodeTarget for MessageSlot<'_, M> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<M>()
    }

    fn deserialize_json(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        self.0.decode_json(bytes)
    }

    fn deserialize_value(&mut self, _value: serde_json::Value) -> Result<(), DecodeError> {
        Err(DecodeError::NotStructural(self.type_name()))
    }

    fn as_message(&mut self) -> Option<&mut dyn ProtoMessage> {
        Some(&mut *self.0)
    }
}

/// Plain JSON decoding; the default for every [`Sling`](crate::Sling).
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonDecoder;

impl ResponseDecoder for JsonDecoder {
    fn decode(&self, bytes: &[u8], target: &mut dyn DecodeTarget) -> Result<(), DecodeError> {
        target.deserialize_json(bytes)
    }
}

/// Protobuf-JSON decoding. Targets must be built with [`Target::message`];
/// anything else is rejected with [`DecodeError::NotAMessage`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ProtoJsonDecoder;

impl ResponseDecoder for ProtoJsonDecoder {
    fn decode(&self, bytes: &[u8], target: &mut dyn DecodeTarget) -> Result<(), DecodeError> {
        let type_name = target.type_name();
        let message = target
            .as_message()
            .ok_or(DecodeError::NotAMessage(type_name))?;
        message.decode_json(bytes)
    }
}

/// Routes a buffered body to the success or failure target.
///
/// 204 responses and a declared `Content-Length: 0` skip both targets.
pub(crate) fn dispatch(
    meta: &ResponseMeta,
    body: &Bytes,
    success_decider: &dyn SuccessDecider,
    decoder: &dyn ResponseDecoder,
    success: Target<'_>,
    failure: Target<'_>,
) -> Result<(), DecodeError> {
    if meta.status == StatusCode::NO_CONTENT || meta.content_length == Some(0) {
        #[cfg(feature = "tracing")]
        tracing::debug!(status = meta.status.as_u16(), "response has no content; skipping decode");
        return Ok(());
    }

    let target = if success_decider.is_success(meta) {
        success
    } else {
        failure
    };

    match target {
        Target::Discard => Ok(()),
        Target::Raw(buffer) => {
            *buffer = body.clone();
            Ok(())
        }
        Target::Typed(mut slot) => decoder.decode(body, &mut *slot),
    }
}
