/// Configures the transport built by [`HttpSender::with_options`](crate::HttpSender::with_options).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SenderOptions {
    /// Client-wide request timeout in milliseconds. `None` leaves timing to
    /// the request [`Context`](crate::Context).
    pub timeout_ms: Option<u64>,
    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Redirects followed before failing; `0` disables following.
    pub max_redirects: usize,
    pub user_agent: Option<String>,
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            connect_timeout_ms: 10_000,
            max_redirects: 10,
            user_agent: Some(concat!("sling-http/", env!("CARGO_PKG_VERSION")).to_owned()),
        }
    }
}
