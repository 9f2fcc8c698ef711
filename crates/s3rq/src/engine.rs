//! The request engine
//!
//! [`Engine`] holds what used to be process-wide state in older S3 client
//! libraries — default host, region, signature version, trust roots, the
//! handle pool — as one explicitly constructed object. Every operation
//! borrows it; dropping it tears the pool down.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio_rustls::rustls::RootCertStore;
use tracing::debug;

use crate::canonical::{canonicalize_amz_headers, canonicalize_resource};
use crate::dto::{BucketContext, Completion, DownloadSink, HttpRequestType, PropertiesHandler, RequestParams, SignatureVersion};
use crate::headers::{ComputedValues, compose_amz_headers, compose_standard_headers};
use crate::limits;
use crate::pool::HandlePool;
use crate::sign;
use crate::status::Status;
use crate::transport::{self, ConnectTo, RequestPlan, SharedSource};
use crate::uri::{compose_uri, compose_uri_bounded, encode_key, uri_encode};
use crate::validation::validate_bucket_name;

/// Configures and builds an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineBuilder {
    user_agent_info: String,
    default_host_name: String,
    region_name: String,
    signature_version: SignatureVersion,
    verify_peer: bool,
    ca_info: Option<PathBuf>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            user_agent_info: String::new(),
            default_host_name: "s3.amazonaws.com".to_owned(),
            region_name: "us-east-1".to_owned(),
            signature_version: SignatureVersion::V2,
            verify_peer: true,
            ca_info: None,
        }
    }
}

impl EngineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Application identifier embedded in the user-agent string.
    pub fn set_user_agent_info(&mut self, info: &str) {
        self.user_agent_info = info.to_owned();
    }

    /// Host used when a request's bucket context names none.
    ///
    /// # Errors
    /// `UriTooLong` for an overlong host name.
    pub fn set_default_host_name(&mut self, host: &str) -> Result<(), Status> {
        if host.len() > limits::MAX_HOSTNAME_SIZE {
            return Err(Status::UriTooLong);
        }
        self.default_host_name = host.to_owned();
        Ok(())
    }

    /// Region of the target endpoint, part of every V4 signing scope.
    ///
    /// # Errors
    /// `UriTooLong` for an overlong region name.
    pub fn set_region_name(&mut self, region: &str) -> Result<(), Status> {
        if region.len() > limits::MAX_HOSTNAME_SIZE {
            return Err(Status::UriTooLong);
        }
        self.region_name = region.to_owned();
        Ok(())
    }

    pub fn set_signature_version(&mut self, version: SignatureVersion) {
        self.signature_version = version;
    }

    /// Whether to verify the server certificate. On by default.
    pub fn set_verify_peer(&mut self, verify: bool) {
        self.verify_peer = verify;
    }

    /// CA bundle replacing the built-in trust roots.
    ///
    /// # Errors
    /// `UriTooLong` for an overlong path.
    pub fn set_ca_info(&mut self, path: &Path) -> Result<(), Status> {
        if path.as_os_str().len() > limits::MAX_HOSTNAME_SIZE {
            return Err(Status::UriTooLong);
        }
        self.ca_info = Some(path.to_owned());
        Ok(())
    }

    /// Builds the engine, loading the trust roots.
    ///
    /// # Errors
    /// `FailedToInitializeRequest` when the CA bundle cannot be read.
    pub fn build(self) -> Result<Engine, Status> {
        let app = if self.user_agent_info.is_empty() { "Unknown" } else { self.user_agent_info.as_str() };
        let user_agent = format!(
            "Mozilla/4.0 (Compatible; {app}; s3rq {}.{}; {} {})",
            env!("CARGO_PKG_VERSION_MAJOR"),
            env!("CARGO_PKG_VERSION_MINOR"),
            std::env::consts::OS,
            std::env::consts::ARCH,
        );

        let mut roots = RootCertStore::empty();
        match &self.ca_info {
            Some(path) => {
                let data = std::fs::read(path).map_err(|_| Status::FailedToInitializeRequest)?;
                let mut reader = data.as_slice();
                for cert in rustls_pemfile::certs(&mut reader) {
                    let cert = cert.map_err(|_| Status::FailedToInitializeRequest)?;
                    roots.add(cert).map_err(|_| Status::FailedToInitializeRequest)?;
                }
            }
            None => {
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }
        }

        Ok(Engine {
            user_agent,
            default_host_name: self.default_host_name,
            region_name: self.region_name,
            signature_version: self.signature_version,
            verify_peer: self.verify_peer,
            roots: Arc::new(roots),
            pool: HandlePool::new(),
        })
    }
}

/// The request engine. Cheap to share behind an [`Arc`]; all methods
/// take `&self`.
#[derive(Debug)]
pub struct Engine {
    user_agent: String,
    default_host_name: String,
    region_name: String,
    signature_version: SignatureVersion,
    verify_peer: bool,
    roots: Arc<RootCertStore>,
    pool: HandlePool,
}

impl Engine {
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    #[must_use]
    pub fn region_name(&self) -> &str {
        &self.region_name
    }

    #[must_use]
    pub fn signature_version(&self) -> SignatureVersion {
        self.signature_version
    }

    /// Performs one request to completion: validates and signs it,
    /// acquires a pooled handle, drives the transfer through the
    /// caller's streaming hooks, classifies the outcome and returns the
    /// handle to the pool.
    ///
    /// Preparation failures complete synchronously without touching the
    /// network.
    #[tracing::instrument(
        skip_all,
        fields(method = ?params.request_type, bucket = ?params.bucket_context.bucket_name, key = ?params.key)
    )]
    pub async fn perform(&self, params: RequestParams) -> Completion {
        self.perform_with(params, None).await
    }

    async fn perform_with(&self, params: RequestParams, verify_peer_override: Option<bool>) -> Completion {
        let (plan, upload, sink, on_properties) = match self.prepare(params, verify_peer_override) {
            Ok(prepared) => prepared,
            Err(status) => {
                debug!(?status, "request preparation failed");
                return Completion::failed(status);
            }
        };

        let mut handle = self.pool.acquire();
        let completion = transport::execute(&mut handle, &self.roots, plan, upload, sink, on_properties).await;
        self.pool.release(handle);
        completion
    }

    #[allow(clippy::type_complexity)]
    fn prepare(
        &self,
        mut params: RequestParams,
        verify_peer_override: Option<bool>,
    ) -> Result<(RequestPlan, Option<SharedSource>, Option<Box<dyn DownloadSink>>, Option<PropertiesHandler>), Status> {
        let upload_source = params.upload_source.take();
        let download_sink = params.download_sink.take();
        let on_properties = params.on_properties.take();
        let params = params;

        if let Some(bucket) = params.bucket_context.bucket_name.as_deref()
            && !bucket.is_empty()
        {
            validate_bucket_name(bucket, params.bucket_context.uri_style)?;
        }

        let mut values = ComputedValues::default();
        compose_amz_headers(&params, &mut values, self.signature_version, OffsetDateTime::now_utc())?;
        compose_standard_headers(&params, &mut values, self.signature_version, &self.default_host_name)?;
        values.url_encoded_key = encode_key(params.key.as_deref())?;

        if self.signature_version == SignatureVersion::V2 {
            canonicalize_amz_headers(&mut values);
            values.canonicalized_resource = canonicalize_resource(
                params.bucket_context.bucket_name.as_deref(),
                params.sub_resource.as_deref(),
                &values.url_encoded_key,
            )?;
            sign::compose_v2_auth_header(
                &params.bucket_context.access_key_id,
                &params.bucket_context.secret_access_key,
                params.request_type.verb(),
                &mut values,
            )?;
        }

        let uri = compose_uri(
            &params.bucket_context,
            &self.default_host_name,
            &values.url_encoded_key,
            params.sub_resource.as_deref(),
            params.query_params.as_deref(),
        )?;

        // Outbound header list, in attach order. Body-length headers
        // first, then the standard headers, the `x-amz-*` block, and the
        // Authorization header (V4 last, once the full set is known).
        let mut headers: Vec<(String, String)> = Vec::new();
        let has_upload_body = params.request_type.has_upload_body();
        if has_upload_body {
            headers.push(("Content-Length".to_owned(), params.upload_total_size.to_string()));
        } else if params.request_type == HttpRequestType::Copy {
            headers.push(("Content-Length".to_owned(), "0".to_owned()));
        }
        {
            let mut push = |name: &str, value: &str| {
                if !value.is_empty() {
                    headers.push((name.to_owned(), value.to_owned()));
                }
            };
            push("Host", &values.host);
            push("Cache-Control", &values.cache_control);
            push("Content-Type", &values.content_type);
            push("Content-MD5", &values.md5);
            push("Content-Disposition", &values.content_disposition);
            push("Content-Encoding", &values.content_encoding);
            push("Expires", &values.expires);
            push("If-Modified-Since", &values.if_modified_since);
            push("If-Unmodified-Since", &values.if_unmodified_since);
            push("If-Match", &values.if_match);
            push("If-None-Match", &values.if_none_match);
            push("Range", &values.range);
            if self.signature_version == SignatureVersion::V2 {
                push("Authorization", &values.authorization);
            }
        }
        for line in &values.amz_headers {
            let (name, value) = match line.split_once(':') {
                Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };
            headers.push((name.to_owned(), value.to_owned()));
        }
        if self.signature_version == SignatureVersion::V4 {
            let payload = sign::payload_hash(params.put_properties.as_ref().and_then(|p| p.content_sha256.as_deref()));
            let authorization = sign::compose_v4_auth_header(
                &params.bucket_context.access_key_id,
                &params.bucket_context.secret_access_key,
                &self.region_name,
                params.request_type.verb(),
                &uri,
                &headers,
                payload,
                &mut values,
            )?;
            headers.push(("Authorization".to_owned(), authorization));
        }

        let connect_to = match params.bucket_context.connect_to.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(raw.parse::<ConnectTo>().map_err(|_| Status::FailedToInitializeRequest)?),
            None => None,
        };

        let verify_peer = verify_peer_override.unwrap_or(self.verify_peer);
        let pinned_host = if verify_peer {
            params.bucket_context.host_header_value.clone().filter(|v| !v.is_empty())
        } else {
            None
        };

        let plan = RequestPlan {
            method: params.request_type.method(),
            uri,
            headers,
            has_upload_body,
            upload_total_size: params.upload_total_size,
            verify_peer,
            tls12_only: !params.bucket_context.unbound_tls_version,
            pinned_host,
            connect_to,
            user_agent: self.user_agent.clone(),
        };

        Ok((plan, upload_source.map(SharedSource::new), download_sink, on_properties))
    }

    /// Builds a presigned GET URL (V2 query-string authentication).
    ///
    /// `expires` is epoch seconds, clamped to `[0, 2^31 - 1]`; negative
    /// means "as far out as allowed".
    ///
    /// # Errors
    /// Propagates key-encoding and URI-size failures.
    pub fn generate_authenticated_query_string(
        &self,
        bucket_context: &BucketContext,
        key: Option<&str>,
        expires: i64,
        sub_resource: Option<&str>,
    ) -> Result<String, Status> {
        const MAX_EXPIRES: i64 = (1 << 31) - 1;
        let expires = if !(0..=MAX_EXPIRES).contains(&expires) { MAX_EXPIRES } else { expires };

        let encoded_key = encode_key(key)?;
        let resource = canonicalize_resource(bucket_context.bucket_name.as_deref(), sub_resource, &encoded_key)?;

        let string_to_sign = sign::v2_presign_string_to_sign(expires, &resource);
        let signature = uri_encode(&sign::v2_signature(&bucket_context.secret_access_key, &string_to_sign), true);

        let query_params = format!(
            "AWSAccessKeyId={}&Expires={expires}&Signature={signature}",
            bucket_context.access_key_id
        );
        compose_uri_bounded(
            limits::MAX_AUTHENTICATED_QUERY_STRING_SIZE,
            bucket_context,
            &self.default_host_name,
            &encoded_key,
            sub_resource,
            Some(&query_params),
        )
    }
}

/// A batch of requests sharing one cooperative event loop, the analogue
/// of a multi-handle context: register any number of requests, then
/// drive them all on the current task with [`RequestContext::run`].
#[derive(Default)]
pub struct RequestContext {
    verify_peer: Option<bool>,
    pending: Vec<Pin<Box<dyn Future<Output = Completion> + Send>>>,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the engine's verify-peer setting for requests in this
    /// context.
    pub fn set_verify_peer(&mut self, verify: bool) {
        self.verify_peer = Some(verify);
    }

    /// Registers a request; it starts running when [`run`](Self::run) is
    /// awaited.
    pub fn add(&mut self, engine: &Arc<Engine>, params: RequestParams) {
        let engine = Arc::clone(engine);
        let verify_peer = self.verify_peer;
        self.pending.push(Box::pin(async move { engine.perform_with(params, verify_peer).await }));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drives every registered request to completion concurrently on the
    /// current task. Completions are returned in registration order.
    pub async fn run(&mut self) -> Vec<Completion> {
        futures::future::join_all(std::mem::take(&mut self.pending)).await
    }
}
