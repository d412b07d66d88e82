//! Setu: an isomorphic HTTP client engine.
//!
//! One request contract over two transports. The fetch-style adapter rides
//! on `reqwest`; the socket adapter speaks HTTP/1.1 directly over TCP or TLS.
//! Both share the same request building, redirect handling, deadlines,
//! cancellation, retries, progress reporting and error normalization.
//!
//! ```no_run
//! # async fn run() -> setu::Result<()> {
//! use serde_json::json;
//! use setu::RequestConfig;
//!
//! let created = setu::post(
//!     "https://api.example.com/users",
//!     RequestConfig::new()
//!         .json(json!({ "name": "ada" }))
//!         .retries(2)
//!         .retry_delay_ms(100)
//!         .timeout_ms(5_000),
//! )
//! .await?;
//! assert_eq!(created.status(), 201);
//! # Ok(())
//! # }
//! ```
//!
//! Retries cover network failures and timeouts only. A response rejected by
//! `validate_status` is returned as an error carrying the response and is
//! never retried.

mod adapter;
mod body;
mod cancel;
mod client;
mod config;
mod error;
mod progress;
mod request;
mod response;
mod retry;
mod timeout;

pub use adapter::Environment;
pub use body::{Body, BodyStream, Multipart, OneShotStream, Part};
pub use cancel::{AbortReason, CancellationToken};
pub use client::{delete, get, global, head, options, patch, post, put, Setu};
pub use config::{default_validate_status, RequestConfig, ResponseType, ValidateStatus};
pub use error::{BoxError, Error, ErrorKind, ErrorResponse, RequestInfo, Result};
pub use progress::{ProgressCallback, ProgressSnapshot};
pub use request::{build, headers, NormalizedRequest, DEFAULT_MAX_REDIRECTS};
pub use response::{content_disposition_filename, Blob, ByteStream, Response, ResponseData};
pub use retry::{RetryCounting, RetryPolicy};

pub use reqwest::header::HeaderMap;
pub use reqwest::Method;
pub use setu_config::SetuSettings;
