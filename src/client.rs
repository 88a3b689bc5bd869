use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, PROXY_AUTHORIZATION},
    Method,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    body::RawBody,
    decode::dispatch,
    query::{merge_query, QueryEncode, QueryStruct},
    BodyProvider, Context, DecodeOnSuccess, FormBody, HttpSender, JsonBody, JsonDecoder,
    ReceiveError, Request, Response, ResponseDecoder, Result, RetryOptions, RetrySender,
    SendOutcome, Sender, SlingError, SuccessDecider, Target,
};

/// HTTP request builder and sender.
///
/// Every configuration method consumes the builder and returns it, so calls
/// chain and never fail; problems such as an unparsable URL surface from
/// [`Sling::request`] or the `receive*` methods. Use [`Sling::branch`] to
/// derive independent builders from a shared parent:
///
/// ```no_run
/// use sling_http::Sling;
///
/// let api = Sling::new().base("https://api.example.com/v1/").bearer_auth("token");
/// let users = api.branch().get("users/");
/// let repos = api.branch().get("repos/");
/// ```
#[derive(Clone)]
pub struct Sling {
    sender: Arc<dyn Sender>,
    method: Method,
    raw_url: String,
    headers: HeaderMap,
    invalid_header: Option<String>,
    query_structs: Vec<Arc<dyn QueryEncode>>,
    query_params: BTreeMap<String, String>,
    body: Option<Arc<dyn BodyProvider>>,
    decoder: Arc<dyn ResponseDecoder>,
    success_decider: Arc<dyn SuccessDecider>,
    context: Context,
    timeout: Option<Duration>,
}

impl fmt::Debug for Sling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Credential headers are marked sensitive and print as `Sensitive`.
        f.debug_struct("Sling")
            .field("method", &self.method)
            .field("url", &self.raw_url)
            .field("headers", &self.headers)
            .field("query_structs", &self.query_structs.len())
            .field("query_params", &self.query_params)
            .field("has_body", &self.body.is_some())
            .field("context", &self.context)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for Sling {
    fn default() -> Self {
        Self::new()
    }
}

impl Sling {
    /// Creates a GET builder using the shared default [`HttpSender`].
    pub fn new() -> Self {
        Self::with_sender(HttpSender::shared())
    }

    /// Creates a GET builder that sends through `sender`.
    pub fn with_sender(sender: Arc<dyn Sender>) -> Self {
        Self {
            sender,
            method: Method::GET,
            raw_url: String::new(),
            headers: HeaderMap::new(),
            invalid_header: None,
            query_structs: Vec::new(),
            query_params: BTreeMap::new(),
            body: None,
            decoder: Arc::new(JsonDecoder),
            success_decider: Arc::new(DecodeOnSuccess),
            context: Context::default(),
            timeout: None,
        }
    }

    /// Returns an independent copy for building a related request.
    ///
    /// Headers, query params, and the list of query structs are copied, so
    /// changes to the branch never reach the parent or its other branches.
    /// The sender, decoder, success decider, and body provider are shared.
    /// The branch gets a child context: cancelling the parent cancels the
    /// branch, cancelling the branch leaves the parent alone.
    pub fn branch(&self) -> Self {
        let mut branch = self.clone();
        branch.context = self.context.child();
        branch
    }

    // Sender

    /// Replaces the sender.
    pub fn sender(mut self, sender: Arc<dyn Sender>) -> Self {
        self.sender = sender;
        self
    }

    /// Sends through a dedicated `reqwest::Client`.
    pub fn http_client(self, client: reqwest::Client) -> Self {
        self.sender(Arc::new(HttpSender::new(client)))
    }

    /// Wraps the current sender with retry.
    pub fn auto_retry(mut self, options: RetryOptions) -> Self {
        self.sender = Arc::new(RetrySender::new(self.sender, options));
        self
    }

    // Context

    /// Attaches `context` to every request built from here on.
    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Replaces the context with one driven by `token`.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.context = Context::with_token(token);
        self
    }

    /// Gives each request a deadline `timeout` after it is materialized.
    ///
    /// The clock starts in [`Sling::request`], so a long-lived builder keeps
    /// handing out fresh deadlines. A deadline already on the context still
    /// applies if it is earlier.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The context attached to requests, before any per-request timeout.
    pub fn request_context(&self) -> &Context {
        &self.context
    }

    // Method

    /// Sets the method without touching the URL.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets the method to `HEAD` and extends the URL with `path`.
    pub fn head(self, path: &str) -> Self {
        self.method(Method::HEAD).path(path)
    }

    /// Sets the method to `GET` and extends the URL with `path`.
    pub fn get(self, path: &str) -> Self {
        self.method(Method::GET).path(path)
    }

    /// Sets the method to `POST` and extends the URL with `path`.
    pub fn post(self, path: &str) -> Self {
        self.method(Method::POST).path(path)
    }

    /// Sets the method to `PUT` and extends the URL with `path`.
    pub fn put(self, path: &str) -> Self {
        self.method(Method::PUT).path(path)
    }

    /// Sets the method to `PATCH` and extends the URL with `path`.
    pub fn patch(self, path: &str) -> Self {
        self.method(Method::PATCH).path(path)
    }

    /// Sets the method to `DELETE` and extends the URL with `path`.
    pub fn delete(self, path: &str) -> Self {
        self.method(Method::DELETE).path(path)
    }

    /// Sets the method to `OPTIONS` and extends the URL with `path`.
    pub fn options(self, path: &str) -> Self {
        self.method(Method::OPTIONS).path(path)
    }

    /// Sets the method to `TRACE` and extends the URL with `path`.
    pub fn trace(self, path: &str) -> Self {
        self.method(Method::TRACE).path(path)
    }

    /// Sets the method to `CONNECT` and extends the URL with `path`.
    pub fn connect(self, path: &str) -> Self {
        self.method(Method::CONNECT).path(path)
    }

    // URL

    /// Sets the base URL. End it with `/` if paths will be appended.
    pub fn base(mut self, url: impl Into<String>) -> Self {
        self.raw_url = url.into();
        self
    }

    /// Resolves `path` against the current URL.
    ///
    /// A trailing slash on `path` is kept. If either side fails to parse the
    /// URL is left as is and the error shows up at materialization.
    pub fn path(mut self, path: &str) -> Self {
        if self.raw_url.is_empty() {
            self.raw_url = path.to_owned();
            return self;
        }
        if let Ok(resolved) = resolve_reference(&self.raw_url, path) {
            self.raw_url = resolved;
        }
        self
    }

    /// The URL as configured so far, unparsed.
    pub fn url(&self) -> &str {
        &self.raw_url
    }

    // Headers

    /// Appends a value under `key`, keeping existing values.
    pub fn add_header(mut self, key: &str, value: &str) -> Self {
        match parse_header(key, value) {
            Ok((name, value)) => {
                self.headers.append(name, value);
            }
            Err(message) => self.defer_header_error(message),
        }
        self
    }

    /// Replaces every value under `key`.
    pub fn set_header(mut self, key: &str, value: &str) -> Self {
        match parse_header(key, value) {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(message) => self.defer_header_error(message),
        }
        self
    }

    /// Replaces the whole header map.
    pub fn set_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        for name in [AUTHORIZATION, PROXY_AUTHORIZATION] {
            if let reqwest::header::Entry::Occupied(mut entry) = self.headers.entry(name) {
                for value in entry.iter_mut() {
                    value.set_sensitive(true);
                }
            }
        }
        self
    }

    /// Headers sent with every request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Sets `Authorization: Basic base64(username:password)`.
    pub fn basic_auth(self, username: &str, password: &str) -> Self {
        let credentials = STANDARD.encode(format!("{username}:{password}"));
        self.set_header(AUTHORIZATION.as_str(), &format!("Basic {credentials}"))
    }

    /// Sets `Authorization: Bearer <token>`.
    pub fn bearer_auth(self, token: &str) -> Self {
        self.set_header(AUTHORIZATION.as_str(), &format!("Bearer {token}"))
    }

    fn defer_header_error(&mut self, message: String) {
        self.invalid_header.get_or_insert(message);
    }

    // Query

    /// Attaches a struct encoded into query params at materialization.
    ///
    /// Structs are encoded in attachment order and merged with the URL's own
    /// query and the flat params; no source overrides another.
    pub fn query_struct<T>(mut self, value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.query_structs.push(Arc::new(QueryStruct(value)));
        self
    }

    /// Sets one flat query param, replacing an earlier value under `key`.
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    /// Replaces the flat query params.
    pub fn query_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query_params = params
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self
    }

    // Body

    /// Sends `body` as is, without touching `Content-Type`.
    pub fn body(self, body: impl Into<Bytes>) -> Self {
        self.body_provider(RawBody(body.into()))
    }

    /// Installs `provider` as the only body source and applies its content type.
    pub fn body_provider(mut self, provider: impl BodyProvider + 'static) -> Self {
        if let Some(content_type) = provider.content_type() {
            match HeaderValue::from_str(content_type) {
                Ok(value) => {
                    self.headers.insert(CONTENT_TYPE, value);
                }
                Err(err) => self.defer_header_error(format!("{CONTENT_TYPE}: {err}")),
            }
        }
        self.body = Some(Arc::new(provider));
        self
    }

    /// Sends `value` as JSON with `Content-Type: application/json`.
    pub fn body_json<T>(self, value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.body_provider(JsonBody(value))
    }

    /// Sends `value` url-encoded with `Content-Type: application/x-www-form-urlencoded`.
    pub fn body_form<T>(self, value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.body_provider(FormBody(value))
    }

    // Strategies

    /// Replaces the decoder used for typed targets.
    pub fn response_decoder(mut self, decoder: impl ResponseDecoder + 'static) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    /// Replaces the predicate that routes bodies to the success or failure target.
    pub fn success_decider(mut self, decider: impl SuccessDecider + 'static) -> Self {
        self.success_decider = Arc::new(decider);
        self
    }

    // Terminal operations

    /// Materializes the request: resolves the URL, merges the query, encodes
    /// the body, and attaches headers and context.
    pub fn request(&self) -> Result<Request> {
        if let Some(message) = &self.invalid_header {
            return Err(SlingError::InvalidHeader(message.clone()));
        }

        let mut url = Url::parse(&self.raw_url).map_err(|source| SlingError::UrlParse {
            url: self.raw_url.clone(),
            source,
        })?;
        merge_query(&mut url, &self.query_structs, &self.query_params)?;

        let body = self
            .body
            .as_ref()
            .map(|provider| provider.body())
            .transpose()
            .map_err(SlingError::BodyEncode)?;

        let mut request = reqwest::Request::new(self.method.clone(), url);
        *request.headers_mut() = self.headers.clone();
        if let Some(body) = body {
            *request.body_mut() = Some(body.into());
        }

        let context = match self.timeout {
            Some(timeout) => self.context.clone().with_timeout(timeout),
            None => self.context.clone(),
        };
        Ok(Request::new(request).with_context(context))
    }

    /// Sends the request and decodes a success body into `success`.
    pub async fn receive_success(
        &self,
        success: Target<'_>,
    ) -> std::result::Result<Response, ReceiveError> {
        self.receive(success, Target::Discard).await
    }

    /// Sends the request and decodes the body into `success` or `failure`,
    /// as classified by the success decider.
    ///
    /// 204 responses and a declared `Content-Length: 0` skip decoding.
    pub async fn receive(
        &self,
        success: Target<'_>,
        failure: Target<'_>,
    ) -> std::result::Result<Response, ReceiveError> {
        let request = self.request()?;
        self.send(&request, success, failure).await
    }

    /// Sends a caller-supplied request through this builder's sender and
    /// decodes it with this builder's decoder and success decider.
    pub async fn send(
        &self,
        request: &Request,
        success: Target<'_>,
        failure: Target<'_>,
    ) -> std::result::Result<Response, ReceiveError> {
        #[cfg(feature = "tracing")]
        tracing::debug!(method = %request.method(), url = %request.url(), "sending request");

        let SendOutcome { meta, body, error } = self.sender.execute(request).await;
        let response = Response::new(meta, body);
        if let Some(error) = error {
            return Err(ReceiveError::new(error, Some(response)));
        }

        let decoded = match response.meta() {
            Some(meta) => dispatch(
                meta,
                response.body(),
                self.success_decider.as_ref(),
                self.decoder.as_ref(),
                success,
                failure,
            ),
            None => Ok(()),
        };

        match decoded {
            Ok(()) => Ok(response),
            Err(err) => Err(ReceiveError::new(err.into(), Some(response))),
        }
    }
}

fn resolve_reference(base: &str, path: &str) -> std::result::Result<String, url::ParseError> {
    let base = Url::parse(base)?;
    let mut resolved = base.join(path)?;
    if path.ends_with('/') && !resolved.path().ends_with('/') {
        let extended = format!("{}/", resolved.path());
        resolved.set_path(&extended);
    }
    Ok(resolved.into())
}

fn parse_header(key: &str, value: &str) -> std::result::Result<(HeaderName, HeaderValue), String> {
    let name = HeaderName::from_bytes(key.as_bytes()).map_err(|err| format!("{key}: {err}"))?;
    let mut value = HeaderValue::from_str(value).map_err(|err| format!("{key}: {err}"))?;
    if name == AUTHORIZATION || name == PROXY_AUTHORIZATION {
        value.set_sensitive(true);
    }
    Ok((name, value))
}
