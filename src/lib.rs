//! `sling-http` is a composable HTTP request builder on top of `reqwest`.
//!
//! A [`Sling`] accumulates method, URL, headers, query, and body through
//! chained calls, then sends and decodes in one step:
//! - [`Sling::request`] materializes a [`Request`]
//! - [`Sling::receive`] sends and decodes into success or failure targets
//! - [`Sling::send`] sends a caller-built request
//!
//! Sending goes through a [`Sender`]; wrap one with [`RetrySender`] (or call
//! [`Sling::auto_retry`]) for backoff-driven retries.

mod body;
mod client;
mod context;
mod decode;
mod error;
mod options;
mod query;
mod request;
mod response;
mod retry;
mod sender;

pub use body::{BodyProvider, FormBody, JsonBody};
pub use client::Sling;
pub use context::Context;
pub use decode::{
    DecodeTarget, JsonDecoder, ProtoJsonDecoder, ProtoMessage, ResponseDecoder, Target,
};
pub use error::{
    BoxError, CancelReason, DecodeError, ReceiveError, SlingError, TransportErrorKind,
};
pub use options::SenderOptions;
pub use request::Request;
pub use response::{DecodeOnSuccess, Response, ResponseMeta, SuccessDecider};
pub use retry::{
    Backoff, DefaultRetryPolicy, ExponentialBackoff, JitteredBackoff, RetryDecision,
    RetryOptions, RetryPolicy, RetrySender,
};
pub use sender::{HttpSender, SendOutcome, Sender};

pub use async_trait::async_trait;
pub use bytes::Bytes;
pub use reqwest::{header, Method, StatusCode};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, SlingError>;
