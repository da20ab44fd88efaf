//! Local HTTP listener + credential-injecting request director (§4.3).

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{
    HeaderName,
    CONNECTION,
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
};
use http::{
    HeaderMap,
    HeaderValue,
    Request,
    Response,
    Uri,
};
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower::{
    Service,
    ServiceExt,
};
use url::Url;

use crate::error::Error;
use crate::transport::{
    BoxError,
    Upstream,
};

type RespBody = BoxBody<Bytes, BoxError>;

/// Handle to a running reverse-proxy server.
pub struct ProxyInstance {
    url: Url,
    shutdown_token: CancellationToken,
    done_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl ProxyInstance {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Initiates a graceful drain and waits for the server task to finish.
    /// Callers MUST drive this from a fresh, never-cancelled scope (§9): a
    /// context already cancelled would make the drain return instantly.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.shutdown_token.cancel();
        let done_rx = self.done_rx.lock().unwrap().take();
        if let Some(done_rx) = done_rx {
            done_rx
                .await
                .map_err(|_| Error::ProxyShutdown("server task was dropped before finishing".into()))?;
        }
        Ok(())
    }

    /// Builds a standalone instance whose "server" is a background task that
    /// resolves the returned receiver once `shutdown()` is called, without
    /// binding any socket. Used by fakes of [`ReverseProxy`] in supervisor
    /// tests.
    #[cfg(test)]
    pub(crate) fn for_test(url: Url) -> (Self, oneshot::Receiver<()>) {
        let shutdown_token = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();
        let (signal_tx, signal_rx) = oneshot::channel();
        let watched_token = shutdown_token.clone();
        tokio::spawn(async move {
            watched_token.cancelled().await;
            let _ = done_tx.send(());
            let _ = signal_tx.send(());
        });
        (Self { url, shutdown_token, done_rx: Mutex::new(Some(done_rx)) }, signal_rx)
    }
}

#[async_trait]
pub trait ReverseProxy: Send + Sync {
    async fn run(
        &self, transport: Upstream, bind_candidates: &[String], target_scheme: String,
        target_host: String, target_port: u16, ready: oneshot::Sender<ProxyInstance>,
    ) -> Result<(), Error>;
}

pub struct HttpReverseProxy;

#[async_trait]
impl ReverseProxy for HttpReverseProxy {
    async fn run(
        &self, transport: Upstream, bind_candidates: &[String], target_scheme: String,
        target_host: String, target_port: u16, ready: oneshot::Sender<ProxyInstance>,
    ) -> Result<(), Error> {
        let listener = bind_first_candidate(bind_candidates).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::ProxyBind(format!("could not read bound address: {e}")))?;
        let url = Url::parse(&format!("http://{local_addr}")).expect("valid bound address");

        let shutdown_token = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();

        tracing::info!(%url, "reverse proxy listening");
        ready
            .send(ProxyInstance {
                url,
                shutdown_token: shutdown_token.clone(),
                done_rx: Mutex::new(Some(done_rx)),
            })
            .map_err(|_| Error::ProxyBind("ready receiver dropped".into()))?;

        let director = Director { transport, target_scheme, target_host, target_port };

        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    tracing::debug!("reverse proxy draining");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, _addr)) => {
                            let director = director.clone();
                            tokio::spawn(async move {
                                let io = TokioIo::new(socket);
                                let service = service_fn(move |req| {
                                    let director = director.clone();
                                    async move { director.forward(req).await }
                                });
                                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                    tracing::debug!(error = %e, "connection error");
                                }
                            });
                        }
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    }
                }
            }
        }

        let _ = done_tx.send(());
        Ok(())
    }
}

async fn bind_first_candidate(candidates: &[String]) -> Result<TcpListener, Error> {
    let mut last_err = None;
    for candidate in candidates {
        match TcpListener::bind(candidate).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                tracing::debug!(candidate, error = %e, "bind candidate failed");
                last_err = Some(e);
            }
        }
    }
    Err(Error::ProxyBind(format!(
        "no bind candidate succeeded out of {candidates:?}: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

#[derive(Clone)]
struct Director {
    transport: Upstream,
    target_scheme: String,
    target_host: String,
    target_port: u16,
}

impl Director {
    async fn forward(&self, req: Request<Incoming>) -> Result<Response<RespBody>, hyper::Error> {
        let (mut parts, body) = req.into_parts();

        let path_and_query = parts.uri.path_and_query().cloned();
        let mut builder = Uri::builder()
            .scheme(self.target_scheme.as_str())
            .authority(format!("{}:{}", self.target_host, self.target_port));
        if let Some(pq) = path_and_query {
            builder = builder.path_and_query(pq);
        }
        parts.uri = match builder.build() {
            Ok(uri) => uri,
            Err(e) => {
                return Ok(error_response(&format!("could not rewrite request URI: {e}")));
            }
        };
        parts.headers.remove(http::header::HOST);
        strip_hop_by_hop(&mut parts.headers);

        let req = Request::from_parts(parts, body.map_err(BoxError::from).boxed());

        let mut transport = self.transport.clone();
        let result = match transport.ready().await {
            Ok(svc) => svc.call(req).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(mut res) => {
                strip_hop_by_hop(res.headers_mut());
                Ok(res)
            }
            Err(e) => Ok(error_response(&format!("upstream error: {e}"))),
        }
    }
}

fn error_response(message: &str) -> Response<RespBody> {
    tracing::warn!(message, "reverse proxy forward failed");
    Response::builder()
        .status(http::StatusCode::BAD_GATEWAY)
        .body(full_body(message.to_string()))
        .expect("valid response")
}

fn full_body(s: String) -> RespBody {
    http_body_util::Full::new(Bytes::from(s))
        .map_err(|never: std::convert::Infallible| match never {})
        .boxed()
}

/// Strips the headers that must not be forwarded between hops: the
/// statically hop-by-hop set, plus any header named by an incoming
/// `Connection` header's value.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v: &HeaderValue| v.to_str().ok())
        .flat_map(|v| v.split(',').map(str::trim).map(str::to_string).collect::<Vec<_>>())
        .filter_map(|name| HeaderName::try_from(name).ok())
        .collect();

    for name in [
        CONNECTION,
        PROXY_AUTHENTICATE,
        PROXY_AUTHORIZATION,
        TE,
        TRAILER,
        TRANSFER_ENCODING,
        UPGRADE,
    ] {
        headers.remove(name);
    }
    headers.remove(HeaderName::from_static("keep-alive"));
    for name in named {
        headers.remove(name);
    }
}
