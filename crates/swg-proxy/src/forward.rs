//! Forwarding engine for allowed requests.
//!
//! Reissues the request to its real destination with the same method,
//! headers and body, then relays the upstream status, headers and body
//! unchanged. Bodies are streamed in both directions; nothing is buffered
//! whole. Redirects are never followed.

use std::time::Duration;

use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Body, Bytes, Frame};
use hyper::{Request, Response, Uri};

use crate::error::{ForwardError, ProxyError};

/// Default per-request forward timeout.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Boxed error type carried by response bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Response body type produced by the proxy.
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

/// Helper to convert bytes to a body.
pub fn full(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// An empty body.
pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Builds the absolute upstream URL for a request.
///
/// The scheme comes from an absolute-form request URI when present and
/// otherwise defaults to `http`, the scheme of the inbound listener.
pub fn target_url(uri: &Uri, authority: &str) -> String {
    let scheme = uri.scheme_str().unwrap_or("http");
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|pq| !pq.is_empty())
        .unwrap_or("/");
    format!("{}://{}{}", scheme, authority, path)
}

/// Sends allowed requests upstream.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Forwarder {
    /// Creates a forwarder with the given per-request timeout.
    ///
    /// The timeout is one deadline for the whole exchange: connecting, the
    /// response head and the full response body. A body still streaming at
    /// the deadline is cut off with an error.
    pub fn new(timeout: Duration) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            .timeout(timeout)
            .no_proxy()
            .build()?;

        Ok(Self { client, timeout })
    }

    /// Returns the forward timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forwards `req` to `authority` and streams the upstream response back.
    ///
    /// Failures are reported, never retried.
    pub async fn forward<B>(
        &self,
        req: Request<B>,
        authority: &str,
    ) -> Result<Response<ProxyBody>, ForwardError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let url = target_url(req.uri(), authority);
        let (parts, body) = req.into_parts();

        tracing::trace!(method = %parts.method, url = %url, "Forwarding request");

        let mut outbound = self
            .client
            .request(parts.method, url.as_str())
            .headers(parts.headers);
        if !body.is_end_stream() {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = outbound.send().await.map_err(ForwardError::from_reqwest)?;

        let status = upstream.status();
        let headers = upstream.headers().clone();

        let stream = upstream
            .bytes_stream()
            .map_ok(Frame::data)
            .map_err(|e| Box::new(e) as BoxError);

        let mut response = Response::new(StreamBody::new(stream).boxed_unsync());
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        tracing::trace!(url = %url, status = %status, "Upstream responded");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::Router;

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn upstream() -> Router {
        Router::new()
            .route(
                "/hello",
                get(|| async {
                    (
                        StatusCode::CREATED,
                        [("x-upstream", "yes"), ("set-cookie", "a=1")],
                        "hello body",
                    )
                }),
            )
            .route(
                "/moved",
                get(|| async {
                    (StatusCode::FOUND, [(header::LOCATION, "/elsewhere")]).into_response()
                }),
            )
            .route("/echo", post(|body: String| async move { body }))
            .route(
                "/headers",
                get(|headers: axum::http::HeaderMap| async move {
                    headers
                        .get("x-client")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("missing")
                        .to_string()
                }),
            )
            .route(
                "/query",
                get(|uri: Uri| async move { uri.query().unwrap_or("").to_string() }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .route("/drip", get(|| async { axum::body::Body::from_stream(drip(10)) }))
    }

    /// One byte every 300ms.
    fn drip(
        count: usize,
    ) -> impl futures::Stream<Item = Result<Bytes, std::convert::Infallible>> + Send + 'static {
        futures::stream::unfold(0, move |sent| async move {
            if sent == count {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
            Some((Ok(Bytes::from_static(b"x")), sent + 1))
        })
    }

    fn request(uri: &str) -> Request<http_body_util::Empty<Bytes>> {
        Request::builder()
            .uri(uri)
            .body(http_body_util::Empty::new())
            .unwrap()
    }

    async fn body_string(response: Response<ProxyBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn target_url_from_origin_form() {
        let uri: Uri = "/path?q=1".parse().unwrap();
        assert_eq!(
            target_url(&uri, "example.com:8080"),
            "http://example.com:8080/path?q=1"
        );
    }

    #[test]
    fn target_url_from_absolute_form() {
        let uri: Uri = "http://example.com/a/b?c=d".parse().unwrap();
        assert_eq!(target_url(&uri, "example.com"), "http://example.com/a/b?c=d");
    }

    #[test]
    fn target_url_defaults_path() {
        let uri: Uri = "http://example.com".parse().unwrap();
        assert_eq!(target_url(&uri, "example.com"), "http://example.com/");
    }

    #[tokio::test]
    async fn relays_status_headers_and_body() {
        let addr = serve(upstream()).await;
        let forwarder = Forwarder::new(Duration::from_secs(5)).unwrap();

        let response =
            tokio_test::assert_ok!(forwarder.forward(request("/hello"), &addr.to_string()).await);

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("x-upstream").unwrap(), "yes");
        assert_eq!(response.headers().get("set-cookie").unwrap(), "a=1");
        assert_eq!(body_string(response).await, "hello body");
    }

    #[tokio::test]
    async fn does_not_follow_redirects() {
        let addr = serve(upstream()).await;
        let forwarder = Forwarder::new(Duration::from_secs(5)).unwrap();

        let response = forwarder
            .forward(request("/moved"), &addr.to_string())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/elsewhere");
    }

    #[tokio::test]
    async fn copies_request_headers_query_and_body() {
        let addr = serve(upstream()).await;
        let forwarder = Forwarder::new(Duration::from_secs(5)).unwrap();

        let req = Request::builder()
            .uri("/headers")
            .header("x-client", "proxy-test")
            .body(http_body_util::Empty::<Bytes>::new())
            .unwrap();
        let response = forwarder.forward(req, &addr.to_string()).await.unwrap();
        assert_eq!(body_string(response).await, "proxy-test");

        let response = forwarder
            .forward(request("/query?a=1&b=2"), &addr.to_string())
            .await
            .unwrap();
        assert_eq!(body_string(response).await, "a=1&b=2");

        let req = Request::builder()
            .method("POST")
            .uri("/echo")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Full::new(Bytes::from_static(b"payload")))
            .unwrap();
        let response = forwarder.forward(req, &addr.to_string()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "payload");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let forwarder = Forwarder::new(Duration::from_secs(5)).unwrap();

        let err = forwarder
            .forward(request("/"), &addr.to_string())
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let addr = serve(upstream()).await;
        let forwarder = Forwarder::new(Duration::from_millis(200)).unwrap();

        let started = std::time::Instant::now();
        let err =
            tokio_test::assert_err!(forwarder.forward(request("/slow"), &addr.to_string()).await);

        assert!(matches!(err, ForwardError::Timeout(_)));
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn slow_body_is_cut_off_at_deadline() {
        let addr = serve(upstream()).await;
        let forwarder = Forwarder::new(Duration::from_millis(500)).unwrap();

        let started = std::time::Instant::now();
        let response =
            tokio_test::assert_ok!(forwarder.forward(request("/drip"), &addr.to_string()).await);
        assert_eq!(response.status(), StatusCode::OK);

        let result = response.into_body().collect().await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
