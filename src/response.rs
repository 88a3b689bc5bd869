use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, CONTENT_LENGTH},
    StatusCode, Version,
};
use url::Url;

/// Transport metadata of a single response.
#[derive(Clone, Debug)]
pub struct ResponseMeta {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    /// Final URL after redirects.
    pub url: Url,
    /// Length declared by the `Content-Length` header, if any.
    pub content_length: Option<u64>,
}

impl ResponseMeta {
    pub fn new(status: StatusCode, url: Url) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            url,
            content_length: None,
        }
    }

    pub(crate) fn from_response(response: &reqwest::Response) -> Self {
        let headers = response.headers().clone();
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());

        Self {
            status: response.status(),
            version: response.version(),
            headers,
            url: response.url().clone(),
            content_length,
        }
    }
}

/// Response metadata bundled with the fully-buffered body.
///
/// Produced for every request that reached the sender, including transport
/// failures where the metadata may be missing.
#[derive(Clone, Debug)]
pub struct Response {
    meta: Option<ResponseMeta>,
    body: Bytes,
}

impl Response {
    pub(crate) fn new(meta: Option<ResponseMeta>, body: Bytes) -> Self {
        Self { meta, body }
    }

    pub fn meta(&self) -> Option<&ResponseMeta> {
        self.meta.as_ref()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.meta.as_ref().map(|meta| meta.status)
    }

    pub fn headers(&self) -> Option<&HeaderMap> {
        self.meta.as_ref().map(|meta| &meta.headers)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as text, replacing invalid UTF-8 sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn into_parts(self) -> (Option<ResponseMeta>, Bytes) {
        (self.meta, self.body)
    }
}

/// Decides whether a response is routed to the success or the failure target.
pub trait SuccessDecider: Send + Sync {
    fn is_success(&self, meta: &ResponseMeta) -> bool;
}

impl<F> SuccessDecider for F
where
    F: Fn(&ResponseMeta) -> bool + Send + Sync,
{
    fn is_success(&self, meta: &ResponseMeta) -> bool {
        self(meta)
    }
}

/// Default decider: any 2xx status is a success.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecodeOnSuccess;

impl SuccessDecider for DecodeOnSuccess {
    fn is_success(&self, meta: &ResponseMeta) -> bool {
        (200..=299).contains(&meta.status.as_u16())
    }
}
