//! Request dispatch
//!
//! Owns the wire side of a perform: connection establishment (DNS, TCP
//! with `TCP_NODELAY`, TLS 1.2+, HTTP/1.1 handshake), keep-alive reuse
//! through the pooled handle, the streaming upload body, redirect
//! following, the low-speed watchdog, response pumping into the caller's
//! sink or the error parser, and the final status classification.

use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http_body::{Frame, SizeHint};
use http_body_util::BodyExt;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;
use tokio_rustls::rustls::RootCertStore;
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::{debug, error};

use crate::dto::{Aborted, Completion, DownloadSink, PropertiesHandler, UploadSource};
use crate::error_xml::ErrorParser;
use crate::pool::Handle;
use crate::response::ResponseHeadersHandler;
use crate::status::Status;
use crate::tls;

/// Transfers slower than this, sustained over [`LOW_SPEED_TIME`], abort.
const LOW_SPEED_LIMIT: u64 = 1024;
const LOW_SPEED_TIME: Duration = Duration::from_secs(15);

const MAX_REDIRECTS: u32 = 10;

const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

/// Per-request connection override, `host:port:realhost:realport`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConnectTo {
    pub host: String,
    pub port: u16,
    pub real_host: String,
    pub real_port: u16,
}

#[derive(Debug, thiserror::Error)]
#[error("connect-to override must be `host:port:realhost:realport`")]
pub(crate) struct ParseConnectToError;

impl FromStr for ConnectTo {
    type Err = ParseConnectToError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [host, port, real_host, real_port] = parts.as_slice() else {
            return Err(ParseConnectToError);
        };
        if host.is_empty() || real_host.is_empty() {
            return Err(ParseConnectToError);
        }
        Ok(Self {
            host: (*host).to_owned(),
            port: port.parse().map_err(|_| ParseConnectToError)?,
            real_host: (*real_host).to_owned(),
            real_port: real_port.parse().map_err(|_| ParseConnectToError)?,
        })
    }
}

/// A live HTTP/1.1 connection cached on a pooled handle.
#[derive(Debug)]
pub(crate) struct CachedConn {
    /// `scheme|authority` the connection was dialed for.
    key: String,
    sender: http1::SendRequest<UploadBody>,
}

impl CachedConn {
    pub(crate) fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Upload source shared between the engine (for redirect replay) and the
/// in-flight request body.
#[derive(Clone)]
pub(crate) struct SharedSource {
    inner: Arc<Mutex<Box<dyn UploadSource>>>,
}

impl SharedSource {
    pub fn new(source: Box<dyn UploadSource>) -> Self {
        Self { inner: Arc::new(Mutex::new(source)) }
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Aborted> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).read(buf)
    }

    fn rewind(&self) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).rewind()
    }
}

#[derive(Debug, thiserror::Error)]
enum BodyError {
    #[error("transfer aborted by callback")]
    Aborted,
}

/// Outbound request body. Pulls bytes from the caller's source, capped
/// at the declared total size, counting progress for the watchdog.
enum UploadBody {
    Empty,
    Streaming {
        source: SharedSource,
        remaining: u64,
        progress: Arc<Progress>,
    },
}

impl std::fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("UploadBody::Empty"),
            Self::Streaming { remaining, .. } => f.debug_struct("UploadBody::Streaming").field("remaining", remaining).finish(),
        }
    }
}

impl http_body::Body for UploadBody {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            Self::Empty => Poll::Ready(None),
            Self::Streaming { source, remaining, progress } => {
                if *remaining == 0 {
                    return Poll::Ready(None);
                }
                let max = UPLOAD_CHUNK_SIZE.min(usize::try_from(*remaining).unwrap_or(UPLOAD_CHUNK_SIZE));
                let mut buf = vec![0u8; max];
                match source.read(&mut buf) {
                    Err(Aborted) => Poll::Ready(Some(Err(BodyError::Aborted))),
                    Ok(0) => {
                        *remaining = 0;
                        Poll::Ready(None)
                    }
                    Ok(n) => {
                        // A source claiming more than it was asked for is
                        // clamped to the transfer bounds.
                        let n = n.min(max);
                        *remaining -= n as u64;
                        progress.note(n);
                        buf.truncate(n);
                        Poll::Ready(Some(Ok(Frame::data(Bytes::from(buf)))))
                    }
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Streaming { remaining, .. } => *remaining == 0,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            Self::Empty => SizeHint::with_exact(0),
            Self::Streaming { remaining, .. } => SizeHint::with_exact(*remaining),
        }
    }
}

/// Byte counter for the low-speed watchdog.
struct Progress {
    window: Mutex<ProgressWindow>,
}

struct ProgressWindow {
    start: tokio::time::Instant,
    bytes: u64,
}

impl Progress {
    fn new() -> Self {
        Self {
            window: Mutex::new(ProgressWindow {
                start: tokio::time::Instant::now(),
                bytes: 0,
            }),
        }
    }

    fn note(&self, n: usize) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.bytes += n as u64;
    }

    /// True once a full window has elapsed with under-limit throughput.
    /// Rolls the window over otherwise.
    fn is_stalled(&self) -> bool {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        if window.start.elapsed() < LOW_SPEED_TIME {
            return false;
        }
        let stalled = window.bytes < LOW_SPEED_LIMIT * LOW_SPEED_TIME.as_secs();
        window.start = tokio::time::Instant::now();
        window.bytes = 0;
        stalled
    }
}

async fn stall_watch(progress: Arc<Progress>) {
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if progress.is_stalled() {
            return;
        }
    }
}

/// Fully prepared wire-level description of one request.
pub(crate) struct RequestPlan {
    pub method: http::Method,
    /// Absolute request URI.
    pub uri: String,
    /// Outbound headers in attach order; values may be opaque bytes.
    pub headers: Vec<(String, String)>,
    pub has_upload_body: bool,
    pub upload_total_size: u64,
    pub verify_peer: bool,
    pub tls12_only: bool,
    /// Forced `Host` value driving the custom TLS hostname check.
    pub pinned_host: Option<String>,
    pub connect_to: Option<ConnectTo>,
    pub user_agent: String,
}

enum Exchange {
    Done(Completion),
    /// Follow to the absolute URI; `to_get` converts the method (303).
    Redirect { next: String, to_get: bool },
}

/// Runs one request to completion, following redirects. The handle's
/// cached connection is reused when it matches the target and is
/// returned to the handle afterwards when still alive.
pub(crate) async fn execute(
    handle: &mut Handle,
    roots: &Arc<RootCertStore>,
    plan: RequestPlan,
    upload: Option<SharedSource>,
    mut sink: Option<Box<dyn DownloadSink>>,
    mut on_properties: Option<PropertiesHandler>,
) -> Completion {
    let mut uri = plan.uri.clone();
    let mut method = plan.method.clone();
    let mut has_body = plan.has_upload_body;
    let mut redirects = 0u32;

    loop {
        let exchange = execute_once(
            handle,
            roots,
            &plan,
            &uri,
            &method,
            has_body,
            redirects,
            upload.as_ref(),
            sink.as_mut(),
            on_properties.as_mut(),
        )
        .await;
        match exchange {
            Exchange::Done(completion) => return completion,
            Exchange::Redirect { next, to_get } => {
                debug!(location = %next, "following redirect");
                redirects += 1;
                uri = next;
                if to_get {
                    method = http::Method::GET;
                    has_body = false;
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
async fn execute_once(
    handle: &mut Handle,
    roots: &Arc<RootCertStore>,
    plan: &RequestPlan,
    uri: &str,
    method: &http::Method,
    has_body: bool,
    redirects: u32,
    upload: Option<&SharedSource>,
    sink: Option<&mut Box<dyn DownloadSink>>,
    on_properties: Option<&mut PropertiesHandler>,
) -> Exchange {
    let done = |status: Status| Exchange::Done(Completion::failed(status));

    let Ok(parsed) = uri.parse::<http::Uri>() else {
        return done(Status::InvalidUri);
    };
    let https = parsed.scheme_str() != Some("http");
    let Some(host) = parsed.host().map(str::to_owned) else {
        return done(Status::InvalidUri);
    };
    let port = parsed.port_u16().unwrap_or(if https { 443 } else { 80 });
    let authority = parsed.authority().map(|a| a.as_str().to_owned()).unwrap_or_else(|| host.clone());
    let path_and_query = parsed.path_and_query().map_or("/", |pq| pq.as_str()).to_owned();
    let conn_key = format!("{}|{authority}", if https { "https" } else { "http" });

    let mut conn = match take_reusable(handle, &conn_key) {
        Some(conn) => conn,
        None => match dial(roots, plan, &host, port, https, &conn_key).await {
            Ok(conn) => conn,
            Err(status) => return done(status),
        },
    };
    if conn.sender.ready().await.is_err() {
        conn = match dial(roots, plan, &host, port, https, &conn_key).await {
            Ok(conn) => conn,
            Err(status) => return done(status),
        };
    }

    let progress = Arc::new(Progress::new());
    let body = match (has_body, upload) {
        (true, Some(source)) => UploadBody::Streaming {
            source: source.clone(),
            remaining: plan.upload_total_size,
            progress: Arc::clone(&progress),
        },
        _ => UploadBody::Empty,
    };

    let mut builder = http::Request::builder().method(method.clone()).uri(path_and_query.as_str());
    let mut has_host = false;
    for (name, value) in &plan.headers {
        if name.eq_ignore_ascii_case("host") {
            has_host = true;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }
    if !has_host {
        builder = builder.header(http::header::HOST, authority.as_str());
    }
    builder = builder.header(http::header::USER_AGENT, plan.user_agent.as_str());

    let request = match builder.body(body) {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "failed to build request");
            return done(Status::FailedToInitializeRequest);
        }
    };

    let response = tokio::select! {
        response = conn.sender.send_request(request) => response,
        () = stall_watch(Arc::clone(&progress)) => {
            debug!("transfer stalled below the low-speed limit");
            return done(Status::ConnectionFailed);
        }
    };
    let response = match response {
        Ok(response) => response,
        Err(e) => return done(status_from_hyper(&e)),
    };

    let code = response.status().as_u16();

    // Redirect following. Upload bodies are only replayed when the
    // source can rewind; 303 switches to a bodyless GET.
    if matches!(code, 301 | 302 | 303 | 307 | 308) && redirects < MAX_REDIRECTS {
        let location = response
            .headers()
            .get(http::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_owned());
        if let Some(location) = location {
            let to_get = code == 303 && *method != http::Method::GET && *method != http::Method::HEAD;
            let replayable = to_get || !has_body || upload.is_some_and(SharedSource::rewind);
            if replayable && let Some(next) = resolve_location(&parsed, &location) {
                // The undrained redirect body poisons the connection for
                // keep-alive, so it is not returned to the handle.
                return Exchange::Redirect { next, to_get };
            }
        }
    }

    let mut response_handler = ResponseHeadersHandler::new();
    for (name, value) in response.headers() {
        response_handler.add(name.as_str(), value.as_bytes());
    }
    response_handler.done();

    let ok_2xx = (200..=299).contains(&code);
    let mut status = Status::Ok;

    if ok_2xx && let Some(on_properties) = on_properties {
        if on_properties(&response_handler.properties).is_err() {
            status = Status::AbortedByCallback;
        }
    }

    let mut error_parser = ErrorParser::new();
    let mut body_drained = false;
    if status == Status::Ok {
        status = pump_response_body(response.into_body(), ok_2xx, sink, &mut error_parser).await;
        body_drained = status == Status::Ok;
    }

    let mut error_details = None;
    if status == Status::Ok {
        if let Some(details) = error_parser.finish() {
            if let Some(parsed_status) = ErrorParser::status(&details) {
                status = parsed_status;
            }
            error_details = Some(details);
        }
        if status == Status::Ok
            && let Some(mapped) = Status::from_http_code(code)
        {
            status = mapped;
        }
    }

    // Only a fully drained response leaves the connection clean enough
    // for keep-alive reuse.
    if body_drained && !conn.is_closed() {
        handle.conn = Some(conn);
    }

    Exchange::Done(Completion {
        status,
        http_status: code,
        error_details,
    })
}

/// Streams the response body to its consumer under the low-speed
/// watchdog: 2xx bytes to the caller's sink, anything else to the error
/// parser.
async fn pump_response_body(
    mut body: hyper::body::Incoming,
    ok_2xx: bool,
    mut sink: Option<&mut Box<dyn DownloadSink>>,
    error_parser: &mut ErrorParser,
) -> Status {
    let mut window_start = tokio::time::Instant::now();
    let mut window_bytes: u64 = 0;

    loop {
        let frame = match tokio::time::timeout(LOW_SPEED_TIME, body.frame()).await {
            Err(_) => return Status::ConnectionFailed,
            Ok(None) => return Status::Ok,
            Ok(Some(Err(e))) => return status_from_hyper(&e),
            Ok(Some(Ok(frame))) => frame,
        };
        let Some(data) = frame.data_ref() else { continue };

        window_bytes += data.len() as u64;
        if window_start.elapsed() >= LOW_SPEED_TIME {
            if window_bytes < LOW_SPEED_LIMIT * LOW_SPEED_TIME.as_secs() {
                return Status::ConnectionFailed;
            }
            window_start = tokio::time::Instant::now();
            window_bytes = 0;
        }

        if !ok_2xx {
            error_parser.add(data);
        } else if let Some(sink) = sink.as_mut() {
            if sink.write(data).is_err() {
                return Status::AbortedByCallback;
            }
        } else if !data.is_empty() {
            // The server sent payload nobody asked for.
            return Status::InternalError;
        }
    }
}

fn take_reusable(handle: &mut Handle, key: &str) -> Option<CachedConn> {
    match handle.conn.take() {
        Some(conn) if conn.key == key && !conn.is_closed() => Some(conn),
        _ => None,
    }
}

async fn dial(
    roots: &Arc<RootCertStore>,
    plan: &RequestPlan,
    host: &str,
    port: u16,
    https: bool,
    key: &str,
) -> Result<CachedConn, Status> {
    let (connect_host, connect_port) = match &plan.connect_to {
        Some(ct) if ct.host == host && ct.port == port => (ct.real_host.clone(), ct.real_port),
        _ => (host.to_owned(), port),
    };

    let mut addrs = tokio::net::lookup_host((connect_host.as_str(), connect_port))
        .await
        .map_err(|_| Status::NameLookupError)?;
    let addr = addrs.next().ok_or(Status::NameLookupError)?;

    let tcp = TcpStream::connect(addr).await.map_err(|_| Status::FailedToConnect)?;
    tcp.set_nodelay(true).map_err(|_| Status::FailedToConnect)?;

    if https {
        let sni_host = plan.pinned_host.as_deref().unwrap_or(host);
        let config = tls::client_config(roots, plan.verify_peer, plan.pinned_host.as_deref(), plan.tls12_only)?;
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(sni_host.to_owned()).map_err(|_| Status::FailedToConnect)?;
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| tls_error_status(&e))?;
        handshake_io(TokioIo::new(stream), key).await
    } else {
        handshake_io(TokioIo::new(tcp), key).await
    }
}

async fn handshake_io<T>(io: T, key: &str) -> Result<CachedConn, Status>
where
    T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (sender, connection) = http1::handshake::<T, UploadBody>(io)
        .await
        .map_err(|_| Status::ConnectionFailed)?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "connection task finished with error");
        }
    });
    Ok(CachedConn { key: key.to_owned(), sender })
}

fn tls_error_status(e: &std::io::Error) -> Status {
    let cert_failure = e
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|tls| matches!(tls, rustls::Error::InvalidCertificate(_)));
    if cert_failure {
        Status::ServerFailedVerification
    } else {
        Status::ConnectionFailed
    }
}

/// Transport-error classification, mirroring the usual HTTP client
/// taxonomy: an aborted body is the callback's doing, a truncated
/// response is left for the error parser to refine, timeouts are
/// connection failures, anything else is internal.
fn status_from_hyper(e: &hyper::Error) -> Status {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(e);
    while let Some(current) = source {
        if let Some(body_error) = current.downcast_ref::<BodyError>() {
            match body_error {
                BodyError::Aborted => return Status::AbortedByCallback,
            }
        }
        source = current.source();
    }
    if e.is_incomplete_message() {
        return Status::Ok;
    }
    if e.is_timeout() {
        return Status::ConnectionFailed;
    }
    Status::InternalError
}

fn resolve_location(current: &http::Uri, location: &str) -> Option<String> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return Some(location.to_owned());
    }
    let scheme = current.scheme_str().unwrap_or("https");
    let authority = current.authority()?.as_str();
    if location.starts_with('/') {
        Some(format!("{scheme}://{authority}{location}"))
    } else {
        Some(format!("{scheme}://{authority}/{location}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body::Body;

    #[test]
    fn connect_to_parsing() {
        let ct: ConnectTo = "s3.example.com:443:10.0.0.5:8443".parse().unwrap();
        assert_eq!(
            ct,
            ConnectTo {
                host: "s3.example.com".to_owned(),
                port: 443,
                real_host: "10.0.0.5".to_owned(),
                real_port: 8443,
            }
        );
        assert!("missing:parts".parse::<ConnectTo>().is_err());
        assert!("h:notaport:r:80".parse::<ConnectTo>().is_err());
        assert!(":443:r:80".parse::<ConnectTo>().is_err());
    }

    #[test]
    fn location_resolution() {
        let uri: http::Uri = "https://b.example.com/k?x=1".parse().unwrap();
        assert_eq!(
            resolve_location(&uri, "https://other.example.com/k2").as_deref(),
            Some("https://other.example.com/k2")
        );
        assert_eq!(
            resolve_location(&uri, "/moved/k").as_deref(),
            Some("https://b.example.com/moved/k")
        );
        assert_eq!(
            resolve_location(&uri, "moved/k").as_deref(),
            Some("https://b.example.com/moved/k")
        );
    }

    #[tokio::test]
    async fn upload_body_respects_total_size_and_abort() {
        struct Chatty;
        impl UploadSource for Chatty {
            fn read(&mut self, buf: &mut [u8]) -> Result<usize, Aborted> {
                // Claim the whole buffer every time.
                Ok(buf.len())
            }
        }

        let source = SharedSource::new(Box::new(Chatty));
        let mut body = UploadBody::Streaming {
            source,
            remaining: UPLOAD_CHUNK_SIZE as u64 + 10,
            progress: Arc::new(Progress::new()),
        };

        let mut total = 0u64;
        while let Some(frame) = body.frame().await {
            let frame = frame.unwrap();
            if let Some(data) = frame.data_ref() {
                total += data.len() as u64;
            }
        }
        assert_eq!(total, UPLOAD_CHUNK_SIZE as u64 + 10);

        struct Aborting;
        impl UploadSource for Aborting {
            fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Aborted> {
                Err(Aborted)
            }
        }
        let mut body = UploadBody::Streaming {
            source: SharedSource::new(Box::new(Aborting)),
            remaining: 100,
            progress: Arc::new(Progress::new()),
        };
        let frame = body.frame().await.unwrap();
        assert!(frame.is_err());
    }

    #[tokio::test]
    async fn empty_body_ends_immediately() {
        let mut body = UploadBody::Empty;
        assert!(body.is_end_stream());
        assert!(body.frame().await.is_none());
        assert_eq!(body.size_hint().exact(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_window_detects_stall() {
        let progress = Progress::new();
        assert!(!progress.is_stalled());
        tokio::time::advance(LOW_SPEED_TIME + Duration::from_secs(1)).await;
        // No bytes recorded over a full window.
        assert!(progress.is_stalled());

        // A fast window passes and rolls over.
        let progress = Progress::new();
        progress.note(usize::try_from(LOW_SPEED_LIMIT * LOW_SPEED_TIME.as_secs()).unwrap());
        tokio::time::advance(LOW_SPEED_TIME + Duration::from_secs(1)).await;
        assert!(!progress.is_stalled());
    }
}
