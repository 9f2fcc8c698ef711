//! Request engine for S3-compatible object storage
//!
//! `s3rq` turns a structured request description — bucket, key, verb,
//! properties, credentials, streaming hooks — into a fully signed HTTP
//! request, executes it over a pooled keep-alive connection, and reports
//! a typed status.
//!
//! # Features
//!
//! - **Two signature schemes**: AWS Signature Version 2 and Version 4,
//!   with byte-exact canonical string construction
//! - **Streaming transfer**: payload bytes move through caller-supplied
//!   [`UploadSource`]/[`DownloadSink`] hooks, never buffered whole
//! - **Connection reuse**: a bounded LIFO pool of request handles keeps
//!   HTTP keep-alive connections warm across requests
//! - **Custom TLS peer verification**: SAN/CN hostname matching for
//!   deployments that force the `Host` header
//! - **One status taxonomy**: preparation, transport, HTTP and server
//!   error-document failures all land in [`Status`]
//!
//! # Example
//!
//! ```rust,no_run
//! use s3rq::{BucketContext, Engine, HttpRequestType, RequestParams, VecSink};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = Engine::builder();
//! builder.set_user_agent_info("myapp");
//! builder.set_signature_version(s3rq::SignatureVersion::V4);
//! let engine = builder.build()?;
//!
//! let mut params = RequestParams::new(
//!     HttpRequestType::Get,
//!     BucketContext::new("my-bucket", "ACCESS_KEY", "SECRET_KEY"),
//! );
//! params.key = Some("path/to/object".to_owned());
//! params.download_sink = Some(Box::new(VecSink::new()));
//!
//! let completion = engine.perform(params).await;
//! assert!(completion.is_ok());
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`dto`]: request description types and streaming traits
//! - [`engine`]: the engine, its builder, and the batch context
//! - [`limits`]: buffer bounds enforced during request composition
//! - [`validation`]: bucket name validation
//!
//! # Concurrency
//!
//! [`Engine`] is shareable across tasks and threads; each perform runs a
//! single request end to end. [`RequestContext`] drives many requests
//! cooperatively on one task. The engine must run inside a tokio
//! runtime.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::bool_assert_comparison,
    clippy::multiple_crate_versions,
    clippy::module_name_repetitions,
    clippy::single_match_else,
    clippy::wildcard_imports
)]

mod buf;
mod canonical;
mod crypto;
mod headers;
mod pool;
mod sign;
mod time;
mod tls;
mod transport;
mod uri;

pub mod dto;
pub mod engine;
pub mod error_xml;
pub mod limits;
pub mod response;
pub mod status;
pub mod validation;

pub use self::dto::{
    Aborted, BucketContext, BytesSource, CannedAcl, Completion, DownloadSink, GetConditions, HttpRequestType, NameValue,
    PropertiesHandler, Protocol, PutProperties, RequestParams, SignatureVersion, UploadSource, UriStyle, VecSink,
};
pub use self::engine::{Engine, EngineBuilder, RequestContext};
pub use self::error_xml::ErrorDetails;
pub use self::response::ResponseProperties;
pub use self::status::Status;
