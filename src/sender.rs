use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{redirect, StatusCode};

use crate::{CancelReason, Request, ResponseMeta, SenderOptions, SlingError, TransportErrorKind};

/// Executes one request attempt and returns the fully-buffered response.
///
/// Implementations wrap each other to form client-side middleware; see
/// [`RetrySender`](crate::RetrySender).
#[async_trait]
pub trait Sender: Send + Sync {
    async fn execute(&self, request: &Request) -> SendOutcome;
}

/// Result of one send: best-effort metadata, the drained body, and any error.
#[derive(Debug)]
pub struct SendOutcome {
    pub meta: Option<ResponseMeta>,
    pub body: Bytes,
    pub error: Option<SlingError>,
}

impl SendOutcome {
    pub fn response(meta: ResponseMeta, body: Bytes) -> Self {
        Self {
            meta: Some(meta),
            body,
            error: None,
        }
    }

    pub fn failed(error: SlingError) -> Self {
        Self {
            meta: None,
            body: Bytes::new(),
            error: Some(error),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.meta.as_ref().map(|meta| meta.status)
    }

    /// Replaces the error with a cancellation, keeping whatever was received.
    pub(crate) fn interrupted(self, reason: CancelReason) -> Self {
        Self {
            error: Some(SlingError::Cancelled(reason)),
            ..self
        }
    }
}

static DEFAULT_SENDER: OnceLock<Arc<HttpSender>> = OnceLock::new();

/// [`Sender`] backed by a `reqwest::Client`.
///
/// Performs exactly one physical attempt: no retries, no classification. The
/// body is read to completion before returning so the connection can be
/// reused and downstream stages can inspect the bytes freely.
#[derive(Clone, Debug, Default)]
pub struct HttpSender {
    client: reqwest::Client,
}

impl HttpSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Builds a sender with its own client configured from `options`.
    pub fn with_options(options: &SenderOptions) -> Result<Self, SlingError> {
        let redirect = if options.max_redirects > 0 {
            redirect::Policy::limited(options.max_redirects)
        } else {
            redirect::Policy::none()
        };
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(options.connect_timeout_ms))
            .redirect(redirect);
        if let Some(timeout_ms) = options.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(user_agent) = &options.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }
        let client = builder.build().map_err(SlingError::Client)?;
        Ok(Self::new(client))
    }

    /// The process-wide default sender, built on first use and shared by
    /// every [`Sling`](crate::Sling) that does not choose its own.
    pub fn shared() -> Arc<HttpSender> {
        DEFAULT_SENDER
            .get_or_init(|| Arc::new(HttpSender::from_default_options()))
            .clone()
    }

    /// Builds from [`SenderOptions::default`], falling back to a plain client
    /// if the TLS backend cannot be initialized.
    fn from_default_options() -> Self {
        match Self::with_options(&SenderOptions::default()) {
            Ok(sender) => sender,
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "default sender options rejected; using a plain client");
                #[cfg(not(feature = "tracing"))]
                let _ = err;
                Self::default()
            }
        }
    }

    async fn round_trip(&self, request: reqwest::Request) -> SendOutcome {
        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(err) => return SendOutcome::failed(SlingError::transport(err)),
        };

        let meta = ResponseMeta::from_response(&response);
        match response.bytes().await {
            Ok(body) => SendOutcome::response(meta, body),
            Err(err) => SendOutcome {
                meta: Some(meta),
                body: Bytes::new(),
                error: Some(SlingError::transport(err)),
            },
        }
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn execute(&self, request: &Request) -> SendOutcome {
        let context = request.context();
        if let Some(reason) = context.interrupted() {
            return SendOutcome::failed(SlingError::Cancelled(reason));
        }

        let scheme = request.url().scheme();
        if !matches!(scheme, "http" | "https") {
            return SendOutcome::failed(SlingError::unsupported_scheme(scheme));
        }

        let Some(inner) = request.try_clone_inner() else {
            return SendOutcome::failed(SlingError::Transport {
                kind: TransportErrorKind::Other,
                message: "request body is a stream and cannot be sent from a shared request"
                    .to_owned(),
                source: None,
            });
        };

        tokio::select! {
            biased;
            reason = context.done() => SendOutcome::failed(SlingError::Cancelled(reason)),
            outcome = self.round_trip(inner) => outcome,
        }
    }
}
