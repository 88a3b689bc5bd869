use std::fmt;

use crate::Response;

/// Boxed error used for pluggable body providers and decoders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum SlingError {
    /// The base URL or an extended path could not be parsed.
    #[error("invalid url '{url}': {source}")]
    UrlParse {
        /// URL text as accumulated by the builder.
        url: String,
        #[source]
        source: url::ParseError,
    },
    /// A header name or value was rejected when it was added.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    /// An attached query struct could not be url-encoded.
    #[error("query encode error: {0}")]
    QueryEncode(#[source] serde_urlencoded::ser::Error),
    /// The body provider failed to produce the request body.
    #[error("body encode error: {0}")]
    BodyEncode(#[source] BoxError),
    /// Network, TLS, or redirect failure while executing a request.
    #[error("transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },
    /// A success or failure body could not be decoded into its target.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    /// The request context was cancelled or its deadline passed.
    #[error("request cancelled: {0}")]
    Cancelled(CancelReason),
    /// The underlying HTTP client could not be built.
    #[error("http client error: {0}")]
    Client(#[source] reqwest::Error),
}

impl SlingError {
    pub(crate) fn transport(err: reqwest::Error) -> Self {
        Self::Transport {
            kind: TransportErrorKind::classify(&err),
            message: err.to_string(),
            source: Some(err),
        }
    }

    pub(crate) fn unsupported_scheme(scheme: &str) -> Self {
        Self::Transport {
            kind: TransportErrorKind::UnsupportedScheme,
            message: format!("unsupported protocol scheme '{scheme}'"),
            source: None,
        }
    }

    /// Returns the transport classification when this is a transport error.
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` for cancellation and deadline errors.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Coarse classification of a transport failure.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TransportErrorKind {
    /// The redirect policy gave up.
    TooManyRedirects,
    /// The URL scheme is not `http` or `https`.
    UnsupportedScheme,
    /// The peer certificate failed validation.
    Certificate,
    Timeout,
    Connect,
    /// The response body could not be read.
    Body,
    Other,
}

impl TransportErrorKind {
    /// Kinds that no amount of retrying will fix.
    pub fn is_permanent(self) -> bool {
        matches!(
            self,
            Self::TooManyRedirects | Self::UnsupportedScheme | Self::Certificate
        )
    }

    fn classify(err: &reqwest::Error) -> Self {
        if err.is_redirect() {
            return Self::TooManyRedirects;
        }
        // TLS failures surface as connect errors; the cause is only visible in the chain.
        if chain_mentions(err, "certificate") {
            return Self::Certificate;
        }
        if err.is_builder() && chain_mentions(err, "scheme") {
            return Self::UnsupportedScheme;
        }
        if err.is_timeout() {
            return Self::Timeout;
        }
        if err.is_connect() {
            return Self::Connect;
        }
        if err.is_body() || err.is_decode() {
            return Self::Body;
        }
        Self::Other
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TooManyRedirects => "too many redirects",
            Self::UnsupportedScheme => "unsupported scheme",
            Self::Certificate => "certificate",
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Body => "body",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

fn chain_mentions(err: &(dyn std::error::Error + 'static), needle: &str) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if err.to_string().to_ascii_lowercase().contains(needle) {
            return true;
        }
        current = err.source();
    }
    false
}

/// Why a request context stopped a request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CancelReason {
    /// The cancellation token was triggered.
    Cancelled,
    /// The context deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("context cancelled"),
            Self::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

/// Error produced by a [`ResponseDecoder`](crate::ResponseDecoder).
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    /// The protobuf-JSON decoder was handed a target that is not a message.
    #[error("decode target `{0}` is not a protocol buffer message")]
    NotAMessage(&'static str),
    /// The target cannot be assigned from an already-parsed document.
    #[error("decode target `{0}` does not accept structural values")]
    NotStructural(&'static str),
    /// Failure reported by a third-party decoder.
    #[error("{0}")]
    Custom(BoxError),
}

/// Failure of a send-and-decode call.
///
/// Carries the best-effort [`Response`] whenever the request reached the
/// sender, so callers can still inspect status, headers, and buffered bytes.
#[derive(Debug)]
pub struct ReceiveError {
    error: SlingError,
    response: Option<Response>,
}

impl ReceiveError {
    pub(crate) fn new(error: SlingError, response: Option<Response>) -> Self {
        Self { error, response }
    }

    pub fn error(&self) -> &SlingError {
        &self.error
    }

    /// Response envelope, absent when the request failed before sending.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn into_parts(self) -> (SlingError, Option<Response>) {
        (self.error, self.response)
    }
}

impl fmt::Display for ReceiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for ReceiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

impl From<SlingError> for ReceiveError {
    fn from(error: SlingError) -> Self {
        Self::new(error, None)
    }
}

impl From<ReceiveError> for SlingError {
    fn from(err: ReceiveError) -> Self {
        err.error
    }
}
