use bytes::Bytes;
use serde::Serialize;

use crate::BoxError;

pub(crate) const JSON_CONTENT_TYPE: &str = "application/json";
pub(crate) const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Supplies a request body together with its content type.
///
/// The provider is invoked once per materialized request, so encoding
/// failures surface from [`Sling::request`](crate::Sling::request).
pub trait BodyProvider: Send + Sync {
    /// Content type to send; `None` leaves the `Content-Type` header alone.
    fn content_type(&self) -> Option<&str>;

    fn body(&self) -> Result<Bytes, BoxError>;
}

/// Pre-encoded bytes with no content type of their own.
pub(crate) struct RawBody(pub(crate) Bytes);

impl BodyProvider for RawBody {
    fn content_type(&self) -> Option<&str> {
        None
    }

    fn body(&self) -> Result<Bytes, BoxError> {
        Ok(self.0.clone())
    }
}

/// JSON-encodes the wrapped value.
#[derive(Clone, Debug)]
pub struct JsonBody<T>(pub T);

impl<T> BodyProvider for JsonBody<T>
where
    T: Serialize + Send + Sync,
{
    fn content_type(&self) -> Option<&str> {
        Some(JSON_CONTENT_TYPE)
    }

    fn body(&self) -> Result<Bytes, BoxError> {
        Ok(serde_json::to_vec(&self.0)?.into())
    }
}

/// Url-encodes the wrapped value as a form.
#[derive(Clone, Debug)]
pub struct FormBody<T>(pub T);

impl<T> BodyProvider for FormBody<T>
where
    T: Serialize + Send + Sync,
{
    fn content_type(&self) -> Option<&str> {
        Some(FORM_CONTENT_TYPE)
    }

    fn body(&self) -> Result<Bytes, BoxError> {
        Ok(serde_urlencoded::to_string(&self.0)?.into())
    }
}
