//! End-to-end tests against a local HTTP server.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use s3rq::{
    Aborted, BucketContext, DownloadSink, Engine, HttpRequestType, Protocol, RequestParams, ResponseProperties,
    SignatureVersion, Status, UriStyle,
};

type HandlerResponse = Pin<Box<dyn Future<Output = http::Response<Full<Bytes>>> + Send>>;
type Handler = Arc<dyn Fn(http::Request<Incoming>) -> HandlerResponse + Send + Sync>;

struct TestServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

async fn serve(handler: Handler) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let connection_counter = Arc::clone(&connections);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            connection_counter.fetch_add(1, Ordering::SeqCst);
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let handler = Arc::clone(&handler);
                    async move { Ok::<_, std::convert::Infallible>(handler(req).await) }
                });
                let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
            });
        }
    });

    TestServer { addr, connections }
}

fn engine(version: SignatureVersion) -> Arc<Engine> {
    let mut builder = Engine::builder();
    builder.set_user_agent_info("s3rq-tests");
    builder.set_signature_version(version);
    Arc::new(builder.build().unwrap())
}

fn bucket_context(addr: SocketAddr) -> BucketContext {
    let mut ctx = BucketContext::new("bucket", "AKID", "secret");
    ctx.protocol = Protocol::Http;
    ctx.uri_style = UriStyle::Path;
    ctx.host_name = Some(format!("127.0.0.1:{}", addr.port()));
    ctx
}

struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl DownloadSink for SharedSink {
    fn write(&mut self, data: &[u8]) -> Result<(), Aborted> {
        self.0.lock().unwrap().extend_from_slice(data);
        Ok(())
    }
}

struct AbortingSink;

impl DownloadSink for AbortingSink {
    fn write(&mut self, _data: &[u8]) -> Result<(), Aborted> {
        Err(Aborted)
    }
}

fn response(code: u16, body: &'static str) -> http::Response<Full<Bytes>> {
    http::Response::builder()
        .status(code)
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap()
}

#[tokio::test]
async fn v4_get_round_trip() {
    let server = serve(Arc::new(|req: http::Request<Incoming>| {
        Box::pin(async move {
            assert_eq!(req.method(), http::Method::GET);
            assert_eq!(req.uri().path(), "/bucket/some/key");

            let headers = req.headers();
            let auth = headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or("");
            assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKID/"), "bad authorization: {auth}");
            assert!(auth.contains("SignedHeaders="));
            assert!(headers.contains_key("x-amz-date"));
            assert_eq!(
                headers.get("x-amz-content-sha256").and_then(|v| v.to_str().ok()),
                Some("UNSIGNED-PAYLOAD")
            );

            http::Response::builder()
                .status(200)
                .header("etag", "\"abc\"")
                .header("x-amz-request-id", "REQ1")
                .body(Full::new(Bytes::from_static(b"hello world")))
                .unwrap()
        }) as HandlerResponse
    }))
    .await;

    let engine = engine(SignatureVersion::V4);
    let body = Arc::new(Mutex::new(Vec::new()));
    let seen_properties: Arc<Mutex<Vec<ResponseProperties>>> = Arc::new(Mutex::new(Vec::new()));

    let mut params = RequestParams::new(HttpRequestType::Get, bucket_context(server.addr));
    params.key = Some("some/key".to_owned());
    params.download_sink = Some(Box::new(SharedSink(Arc::clone(&body))));
    let props_log = Arc::clone(&seen_properties);
    params.on_properties = Some(Box::new(move |props: &ResponseProperties| {
        props_log.lock().unwrap().push(props.clone());
        Ok(())
    }));

    let completion = engine.perform(params).await;
    assert_eq!(completion.status, Status::Ok);
    assert_eq!(completion.http_status, 200);
    assert_eq!(body.lock().unwrap().as_slice(), b"hello world");

    let seen = seen_properties.lock().unwrap();
    assert_eq!(seen.len(), 1, "properties hook must run exactly once");
    assert_eq!(seen[0].etag.as_deref(), Some("\"abc\""));
    assert_eq!(seen[0].request_id.as_deref(), Some("REQ1"));
}

#[tokio::test]
async fn v2_put_streams_the_payload() {
    let server = serve(Arc::new(|req: http::Request<Incoming>| {
        Box::pin(async move {
            assert_eq!(req.method(), http::Method::PUT);
            let auth = req.headers().get("authorization").and_then(|v| v.to_str().ok()).unwrap_or("");
            assert!(auth.starts_with("AWS AKID:"), "bad authorization: {auth}");
            assert_eq!(
                req.headers().get("content-length").and_then(|v| v.to_str().ok()),
                Some("7")
            );
            let body = req.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&body[..], b"payload");
            response(200, "")
        }) as HandlerResponse
    }))
    .await;

    let engine = engine(SignatureVersion::V2);
    let mut params = RequestParams::new(HttpRequestType::Put, bucket_context(server.addr));
    params.key = Some("k".to_owned());
    params.upload_source = Some(Box::new(s3rq::BytesSource::new(&b"payload"[..])));
    params.upload_total_size = 7;

    let completion = engine.perform(params).await;
    assert_eq!(completion.status, Status::Ok);
    assert_eq!(completion.http_status, 200);
}

#[tokio::test]
async fn http_412_maps_to_precondition_failed() {
    let server = serve(Arc::new(|_req| Box::pin(async move { response(412, "") }) as HandlerResponse)).await;

    let engine = engine(SignatureVersion::V4);
    let params = RequestParams::new(HttpRequestType::Head, bucket_context(server.addr));
    let completion = engine.perform(params).await;
    assert_eq!(completion.status, Status::PreconditionFailed);
    assert_eq!(completion.http_status, 412);
    assert!(completion.error_details.is_none());
}

#[tokio::test]
async fn error_document_refines_the_status() {
    const ERROR_XML: &str = "<?xml version=\"1.0\"?><Error><Code>NoSuchKey</Code>\
        <Message>The specified key does not exist.</Message></Error>";
    let server = serve(Arc::new(|_req| Box::pin(async move { response(404, ERROR_XML) }) as HandlerResponse)).await;

    let engine = engine(SignatureVersion::V4);
    let properties_called = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&properties_called);

    let mut params = RequestParams::new(HttpRequestType::Get, bucket_context(server.addr));
    params.key = Some("missing".to_owned());
    params.download_sink = Some(Box::new(SharedSink(Arc::new(Mutex::new(Vec::new())))));
    params.on_properties = Some(Box::new(move |_props: &ResponseProperties| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    let completion = engine.perform(params).await;
    assert_eq!(completion.status, Status::NoSuchKey);
    assert_eq!(completion.http_status, 404);
    let details = completion.error_details.unwrap();
    assert_eq!(details.code.as_deref(), Some("NoSuchKey"));
    assert_eq!(details.message.as_deref(), Some("The specified key does not exist."));
    assert_eq!(properties_called.load(Ordering::SeqCst), 0, "no properties hook on errors");
}

#[tokio::test]
async fn sink_abort_turns_into_aborted_by_callback() {
    let server = serve(Arc::new(|_req| Box::pin(async move { response(200, "data the sink refuses") }) as HandlerResponse)).await;

    let engine = engine(SignatureVersion::V4);
    let mut params = RequestParams::new(HttpRequestType::Get, bucket_context(server.addr));
    params.key = Some("k".to_owned());
    params.download_sink = Some(Box::new(AbortingSink));

    let completion = engine.perform(params).await;
    assert_eq!(completion.status, Status::AbortedByCallback);
}

#[tokio::test]
async fn unexpected_payload_is_an_internal_error() {
    let server = serve(Arc::new(|_req| Box::pin(async move { response(200, "nobody asked for this") }) as HandlerResponse)).await;

    let engine = engine(SignatureVersion::V4);
    let mut params = RequestParams::new(HttpRequestType::Get, bucket_context(server.addr));
    params.key = Some("k".to_owned());

    let completion = engine.perform(params).await;
    assert_eq!(completion.status, Status::InternalError);
}

#[tokio::test]
async fn serial_requests_reuse_the_connection() {
    let server = serve(Arc::new(|_req| Box::pin(async move { response(200, "") }) as HandlerResponse)).await;

    let engine = engine(SignatureVersion::V4);
    for _ in 0..33 {
        let params = RequestParams::new(HttpRequestType::Head, bucket_context(server.addr));
        let completion = engine.perform(params).await;
        assert_eq!(completion.status, Status::Ok);
    }
    assert_eq!(
        server.connections.load(Ordering::SeqCst),
        1,
        "serial requests must ride one keep-alive connection"
    );
}

#[tokio::test]
async fn redirects_are_followed() {
    let server = serve(Arc::new(|req: http::Request<Incoming>| {
        Box::pin(async move {
            if req.uri().path() == "/bucket/old" {
                http::Response::builder()
                    .status(301)
                    .header("location", "/bucket/new")
                    .body(Full::new(Bytes::new()))
                    .unwrap()
            } else {
                assert_eq!(req.uri().path(), "/bucket/new");
                response(200, "moved content")
            }
        }) as HandlerResponse
    }))
    .await;

    let engine = engine(SignatureVersion::V4);
    let body = Arc::new(Mutex::new(Vec::new()));
    let mut params = RequestParams::new(HttpRequestType::Get, bucket_context(server.addr));
    params.key = Some("old".to_owned());
    params.download_sink = Some(Box::new(SharedSink(Arc::clone(&body))));

    let completion = engine.perform(params).await;
    assert_eq!(completion.status, Status::Ok);
    assert_eq!(completion.http_status, 200);
    assert_eq!(body.lock().unwrap().as_slice(), b"moved content");
}

#[tokio::test]
async fn request_context_runs_a_batch() {
    let server = serve(Arc::new(|req: http::Request<Incoming>| {
        Box::pin(async move {
            match req.uri().path() {
                "/bucket/a" => response(200, ""),
                "/bucket/b" => response(404, ""),
                other => panic!("unexpected path {other}"),
            }
        }) as HandlerResponse
    }))
    .await;

    let engine = engine(SignatureVersion::V4);
    let mut context = s3rq::RequestContext::new();

    let mut params = RequestParams::new(HttpRequestType::Head, bucket_context(server.addr));
    params.key = Some("a".to_owned());
    context.add(&engine, params);

    let mut params = RequestParams::new(HttpRequestType::Head, bucket_context(server.addr));
    params.key = Some("b".to_owned());
    context.add(&engine, params);

    assert_eq!(context.len(), 2);
    let completions = context.run().await;
    assert!(context.is_empty());
    assert_eq!(completions.len(), 2);
    assert_eq!(completions[0].status, Status::Ok);
    assert_eq!(completions[1].status, Status::NotFound);
    assert_eq!(completions[1].http_status, 404);
}

#[tokio::test]
async fn zero_length_put_sends_content_length_zero() {
    let server = serve(Arc::new(|req: http::Request<Incoming>| {
        Box::pin(async move {
            assert_eq!(
                req.headers().get("content-length").and_then(|v| v.to_str().ok()),
                Some("0")
            );
            let body = req.into_body().collect().await.unwrap().to_bytes();
            assert!(body.is_empty());
            response(200, "")
        }) as HandlerResponse
    }))
    .await;

    let engine = engine(SignatureVersion::V2);
    let mut params = RequestParams::new(HttpRequestType::Put, bucket_context(server.addr));
    params.key = Some("empty".to_owned());
    params.upload_source = Some(Box::new(s3rq::BytesSource::new(Vec::new())));
    params.upload_total_size = 0;

    let completion = engine.perform(params).await;
    assert_eq!(completion.status, Status::Ok);
}
