use reqwest::{header::HeaderMap, Method};
use url::Url;

use crate::Context;

/// A materialized request ready for a [`Sender`](crate::Sender).
///
/// Requests built by [`Sling::request`](crate::Sling::request) always hold an
/// in-memory body, so they can be replayed by retrying senders.
#[derive(Debug)]
pub struct Request {
    inner: reqwest::Request,
    context: Context,
}

impl Request {
    pub fn new(inner: reqwest::Request) -> Self {
        Self {
            inner,
            context: Context::default(),
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn url(&self) -> &Url {
        self.inner.url()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Body bytes, or `None` for an empty or streaming body.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.inner.body().and_then(|body| body.as_bytes())
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Copies the request, or returns `None` when its body is a one-shot stream.
    pub fn try_clone(&self) -> Option<Self> {
        Some(Self {
            inner: self.inner.try_clone()?,
            context: self.context.clone(),
        })
    }

    pub(crate) fn try_clone_inner(&self) -> Option<reqwest::Request> {
        self.inner.try_clone()
    }

    pub fn into_inner(self) -> reqwest::Request {
        self.inner
    }
}

impl From<reqwest::Request> for Request {
    fn from(inner: reqwest::Request) -> Self {
        Self::new(inner)
    }
}
