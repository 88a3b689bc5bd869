use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    body::Bytes as AxumBytes,
    extract::State,
    http::{header, HeaderMap, Method as AxumMethod, StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sling_http::{
    async_trait, Bytes, CancelReason, DecodeError, DecodeTarget, HttpSender, Request,
    ResponseDecoder, RetryOptions, SendOutcome, Sender, SenderOptions, Sling, SlingError, Target,
    TransportErrorKind,
};

#[derive(Clone)]
struct MockResponse {
    status: StatusCode,
    content_type: Option<&'static str>,
    body: Vec<u8>,
    delay: Duration,
}

impl MockResponse {
    fn json(status: StatusCode, body: JsonValue) -> Self {
        Self {
            status,
            content_type: Some("application/json"),
            body: body.to_string().into_bytes(),
            delay: Duration::from_millis(0),
        }
    }

    fn text(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            content_type: Some("text/plain"),
            body: body.as_bytes().to_vec(),
            delay: Duration::from_millis(0),
        }
    }

    fn empty(status: StatusCode) -> Self {
        Self {
            status,
            content_type: None,
            body: Vec::new(),
            delay: Duration::from_millis(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
struct RecordedRequest {
    method: AxumMethod,
    uri: String,
    content_type: Option<String>,
    user_agent: Option<String>,
    body: Vec<u8>,
}

#[derive(Clone)]
struct MockState {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    hits: Arc<AtomicUsize>,
}

async fn queue_handler(
    State(state): State<MockState>,
    method: AxumMethod,
    uri: Uri,
    headers: HeaderMap,
    body: AxumBytes,
) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state
        .requests
        .lock()
        .expect("request log mutex must not be poisoned")
        .push(RecordedRequest {
            method,
            uri: uri.to_string(),
            content_type: headers
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
            user_agent: headers
                .get(header::USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
            body: body.to_vec(),
        });

    let response = {
        let mut queue = state
            .responses
            .lock()
            .expect("response queue mutex must not be poisoned");
        queue.pop_front().unwrap_or_else(|| {
            MockResponse::json(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "no mock response available"}),
            )
        })
    };

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let mut headers = HeaderMap::new();
    if let Some(content_type) = response.content_type {
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static(content_type),
        );
    }
    (response.status, headers, response.body)
}

async fn redirect_loop_handler(State(state): State<MockState>) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::FOUND, [(header::LOCATION, "/loop")])
}

struct TestServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn url(&self) -> String {
        format!("{}/", self.base_url)
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .expect("request log mutex must not be poisoned")
            .clone()
    }
}

async fn spawn_server(responses: Vec<MockResponse>) -> TestServer {
    let state = MockState {
        responses: Arc::new(Mutex::new(responses.into())),
        requests: Arc::new(Mutex::new(Vec::new())),
        hits: Arc::new(AtomicUsize::new(0)),
    };

    let app = Router::new()
        .route("/loop", get(redirect_loop_handler))
        .fallback(queue_handler)
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        hits: state.hits,
        requests: state.requests,
        task,
    }
}

/// Counts calls before delegating to a real HTTP sender.
struct CountingSender {
    inner: HttpSender,
    calls: AtomicUsize,
}

impl CountingSender {
    fn new(inner: HttpSender) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sender for CountingSender {
    async fn execute(&self, request: &Request) -> SendOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(request).await
    }
}

fn fast_retry(max_retries: u32) -> RetryOptions {
    RetryOptions::default()
        .max_retries(max_retries)
        .min_wait(Duration::from_millis(1))
        .max_wait(Duration::from_millis(1))
}

#[derive(Serialize)]
struct Q {
    q: u32,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
struct Item {
    id: u64,
    name: String,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
struct Problem {
    detail: String,
}

#[tokio::test]
async fn path_and_query_arrive_at_server() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        json!({"id": 1, "name": "kit"}),
    )])
    .await;
    let mut item = Item::default();

    let response = Sling::new()
        .base(server.url())
        .path("a/b/")
        .query_struct(Q { q: 1 })
        .query_param("r", "x")
        .receive_success(Target::typed(&mut item))
        .await
        .expect("must succeed");

    assert_eq!(response.status(), Some(StatusCode::OK));
    assert_eq!(
        item,
        Item {
            id: 1,
            name: "kit".to_owned()
        }
    );
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, AxumMethod::GET);
    assert_eq!(requests[0].uri, "/a/b/?q=1&r=x");
}

#[tokio::test]
async fn json_body_arrives_with_content_type() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::CREATED,
        json!({"id": 2, "name": "new"}),
    )])
    .await;
    let mut item = Item::default();

    Sling::new()
        .base(server.url())
        .post("items")
        .body_json(json!({"x": 1}))
        .receive_success(Target::typed(&mut item))
        .await
        .expect("must succeed");

    assert_eq!(item.id, 2);
    let requests = server.requests();
    assert_eq!(requests[0].method, AxumMethod::POST);
    assert_eq!(requests[0].content_type.as_deref(), Some("application/json"));
    assert_eq!(requests[0].body, br#"{"x":1}"#);
}

#[tokio::test]
async fn form_body_arrives_with_content_type() {
    let server = spawn_server(vec![MockResponse::empty(StatusCode::NO_CONTENT)]).await;

    Sling::new()
        .base(server.url())
        .post("login")
        .body_form([("user", "kit"), ("pass", "a b")])
        .receive_success(Target::Discard)
        .await
        .expect("must succeed");

    let requests = server.requests();
    assert_eq!(
        requests[0].content_type.as_deref(),
        Some("application/x-www-form-urlencoded")
    );
    assert_eq!(requests[0].body, b"user=kit&pass=a+b");
}

#[tokio::test]
async fn retries_unavailable_then_decodes_final_failure() {
    let busy = || MockResponse::json(StatusCode::SERVICE_UNAVAILABLE, json!({"detail": "busy"}));
    let server = spawn_server(vec![busy(), busy(), busy()]).await;
    let mut item = Item::default();
    let mut problem = Problem::default();

    let response = Sling::new()
        .base(server.url())
        .get("items/1")
        .auto_retry(fast_retry(2))
        .receive(Target::typed(&mut item), Target::typed(&mut problem))
        .await
        .expect("exhausted retries return the last response");

    assert_eq!(server.hits(), 3);
    assert_eq!(response.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(problem.detail, "busy");
    assert_eq!(item, Item::default());
}

#[tokio::test]
async fn retry_recovers_and_resends_body() {
    let server = spawn_server(vec![
        MockResponse::json(StatusCode::TOO_MANY_REQUESTS, json!({"detail": "slow down"})),
        MockResponse::json(StatusCode::OK, json!({"id": 3, "name": "ok"})),
    ])
    .await;
    let mut item = Item::default();

    Sling::new()
        .base(server.url())
        .put("items/3")
        .body_json(json!({"name": "ok"}))
        .auto_retry(fast_retry(3))
        .receive_success(Target::typed(&mut item))
        .await
        .expect("must succeed");

    assert_eq!(item.id, 3);
    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body, requests[1].body);
    assert_eq!(requests[1].body, br#"{"name":"ok"}"#);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::NOT_FOUND,
        json!({"detail": "missing"}),
    )])
    .await;
    let mut problem = Problem::default();

    Sling::new()
        .base(server.url())
        .get("items/404")
        .auto_retry(fast_retry(3))
        .receive(Target::Discard, Target::typed(&mut problem))
        .await
        .expect("must succeed");

    assert_eq!(server.hits(), 1);
    assert_eq!(problem.detail, "missing");
}

#[tokio::test]
async fn no_content_leaves_targets_untouched() {
    let server = spawn_server(vec![MockResponse::empty(StatusCode::NO_CONTENT)]).await;
    let mut item = Item {
        id: 9,
        name: "before".to_owned(),
    };
    let mut raw = Bytes::from_static(b"before");

    let response = Sling::new()
        .base(server.url())
        .delete("items/9")
        .receive(Target::typed(&mut item), Target::raw(&mut raw))
        .await
        .expect("must succeed");

    assert_eq!(response.status(), Some(StatusCode::NO_CONTENT));
    assert_eq!(item.id, 9);
    assert_eq!(item.name, "before");
    assert_eq!(raw.as_ref(), b"before");
}

#[tokio::test]
async fn empty_ok_body_skips_decoding() {
    let server = spawn_server(vec![MockResponse::empty(StatusCode::OK)]).await;
    let mut item = Item::default();

    let response = Sling::new()
        .base(server.url())
        .get("items/empty")
        .receive_success(Target::typed(&mut item))
        .await
        .expect("empty bodies are not decoded");

    assert_eq!(response.meta().and_then(|meta| meta.content_length), Some(0));
    assert_eq!(item, Item::default());
}

#[tokio::test]
async fn raw_target_receives_body_verbatim() {
    let server = spawn_server(vec![MockResponse::text(StatusCode::OK, "hello")]).await;
    let mut raw = Bytes::new();

    let response = Sling::new()
        .base(server.url())
        .get("greeting")
        .receive_success(Target::raw(&mut raw))
        .await
        .expect("must succeed");

    assert_eq!(raw.as_ref(), b"hello");
    assert_eq!(response.text(), "hello");
}

#[tokio::test]
async fn decode_error_returns_response_envelope() {
    let server = spawn_server(vec![MockResponse::text(StatusCode::OK, "not json")]).await;
    let mut item = Item::default();

    let err = Sling::new()
        .base(server.url())
        .get("items/bad")
        .receive_success(Target::typed(&mut item))
        .await
        .expect_err("must fail to decode");

    assert!(matches!(err.error(), SlingError::Decode(DecodeError::Json(_))));
    let response = err.response().expect("envelope must be present");
    assert_eq!(response.status(), Some(StatusCode::OK));
    assert_eq!(response.body().as_ref(), b"not json");
}

#[tokio::test]
async fn deadline_cancels_slow_request() {
    let server = spawn_server(vec![MockResponse::json(StatusCode::OK, json!({}))
        .with_delay(Duration::from_millis(500))])
    .await;

    let err = Sling::new()
        .base(server.url())
        .get("slow")
        .timeout(Duration::from_millis(50))
        .auto_retry(fast_retry(3))
        .receive_success(Target::Discard)
        .await
        .expect_err("must time out");

    assert!(matches!(
        err.error(),
        SlingError::Cancelled(CancelReason::DeadlineExceeded)
    ));
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn redirect_loop_is_terminal() {
    let server = spawn_server(Vec::new()).await;
    let options = SenderOptions {
        max_redirects: 2,
        ..SenderOptions::default()
    };
    let counting = CountingSender::new(
        HttpSender::with_options(&options).expect("client must build"),
    );

    let err = Sling::with_sender(counting.clone())
        .base(server.url())
        .get("loop")
        .auto_retry(fast_retry(3))
        .receive_success(Target::Discard)
        .await
        .expect_err("must stop redirecting");

    assert_eq!(
        err.error().transport_kind(),
        Some(TransportErrorKind::TooManyRedirects)
    );
    assert_eq!(counting.calls(), 1);
    assert!(server.hits() <= 3);
}

#[tokio::test]
async fn unsupported_scheme_is_terminal() {
    let counting = CountingSender::new(HttpSender::default());

    let err = Sling::with_sender(counting.clone())
        .get("ftp://127.0.0.1/file")
        .auto_retry(fast_retry(3))
        .receive_success(Target::Discard)
        .await
        .expect_err("must reject scheme");

    assert_eq!(
        err.error().transport_kind(),
        Some(TransportErrorKind::UnsupportedScheme)
    );
    assert_eq!(counting.calls(), 1);
}

#[tokio::test]
async fn connection_refused_is_retried() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("must bind");
    let address = listener.local_addr().expect("must have local addr");
    drop(listener);
    let counting = CountingSender::new(HttpSender::default());

    let err = Sling::with_sender(counting.clone())
        .get(&format!("http://{address}/"))
        .auto_retry(fast_retry(2))
        .receive_success(Target::Discard)
        .await
        .expect_err("nothing is listening");

    assert!(err.error().transport_kind().is_some());
    assert_eq!(counting.calls(), 3);
}

/// Parses `key=value` lines into a document and assigns it structurally.
struct KeyValueDecoder;

impl ResponseDecoder for KeyValueDecoder {
    fn decode(&self, bytes: &[u8], target: &mut dyn DecodeTarget) -> Result<(), DecodeError> {
        let text = std::str::from_utf8(bytes).map_err(|err| DecodeError::Custom(err.into()))?;
        let mut document = serde_json::Map::new();
        for line in text.lines().filter(|line| !line.is_empty()) {
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| DecodeError::Custom(format!("malformed line: {line}").into()))?;
            let value = value
                .parse::<u64>()
                .map(JsonValue::from)
                .unwrap_or_else(|_| JsonValue::from(value));
            document.insert(key.to_owned(), value);
        }
        target.deserialize_value(JsonValue::Object(document))?;
        Ok(())
    }
}

#[tokio::test]
async fn custom_decoder_maps_other_formats() {
    let server = spawn_server(vec![MockResponse::text(
        StatusCode::OK,
        "id=42\nname=answer\n",
    )])
    .await;
    let mut item = Item::default();

    Sling::new()
        .base(server.url())
        .get("items/42")
        .response_decoder(KeyValueDecoder)
        .receive_success(Target::typed(&mut item))
        .await
        .expect("must succeed");

    assert_eq!(
        item,
        Item {
            id: 42,
            name: "answer".to_owned()
        }
    );
}

#[tokio::test]
async fn branches_send_independent_requests() {
    let server = spawn_server(vec![
        MockResponse::empty(StatusCode::NO_CONTENT),
        MockResponse::empty(StatusCode::NO_CONTENT),
    ])
    .await;
    let api = Sling::new()
        .base(server.url())
        .path("v1/")
        .add_header("X-Client", "tests");

    api.branch()
        .get("users")
        .query_param("page", "2")
        .receive_success(Target::Discard)
        .await
        .expect("must succeed");
    api.branch()
        .post("repos")
        .body("payload")
        .receive_success(Target::Discard)
        .await
        .expect("must succeed");

    let requests = server.requests();
    assert_eq!(requests[0].uri, "/v1/users?page=2");
    assert_eq!(requests[1].method, AxumMethod::POST);
    assert_eq!(requests[1].uri, "/v1/repos");
    assert_eq!(requests[1].body, b"payload");
    assert_eq!(requests[1].content_type, None);
}

#[tokio::test]
async fn default_sender_uses_default_options() {
    let server = spawn_server(vec![MockResponse::empty(StatusCode::NO_CONTENT)]).await;

    Sling::new()
        .base(server.url())
        .get("whoami")
        .receive_success(Target::Discard)
        .await
        .expect("must succeed");

    let expected = SenderOptions::default().user_agent;
    assert!(expected.is_some());
    assert_eq!(server.requests()[0].user_agent, expected);
}

#[tokio::test]
async fn cancelled_branch_does_not_stop_the_parent() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        json!({"id": 5, "name": "still here"}),
    )])
    .await;
    let api = Sling::new().base(server.url());

    let cancelled = api.branch().get("x");
    cancelled.request_context().cancel();
    let err = cancelled
        .receive_success(Target::Discard)
        .await
        .expect_err("cancelled branch must not send");
    assert!(err.error().is_cancelled());

    let mut item = Item::default();
    api.branch()
        .get("y")
        .receive_success(Target::typed(&mut item))
        .await
        .expect("parent must still send");
    assert_eq!(item.id, 5);
    assert_eq!(server.hits(), 1);
    assert_eq!(server.requests()[0].uri, "/y");
}

#[tokio::test]
async fn long_lived_builder_timeout_applies_per_request() {
    let server = spawn_server(vec![
        MockResponse::empty(StatusCode::NO_CONTENT),
        MockResponse::empty(StatusCode::NO_CONTENT),
    ])
    .await;
    let api = Sling::new()
        .base(server.url())
        .timeout(Duration::from_millis(150));

    for path in ["first", "second"] {
        api.branch()
            .get(path)
            .receive_success(Target::Discard)
            .await
            .expect("each request gets a fresh deadline");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(server.hits(), 2);
}
