//! Prometheus scrape endpoint.

use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::Encoder;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct MetricsServer {
    listener: TcpListener,
}

impl MetricsServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics server to {addr}"))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("metrics listener has no local address")
    }

    /// Serves `GET /metrics` from the default registry until `cancel_token` fires.
    pub async fn serve(self, cancel_token: CancellationToken) {
        if let Ok(addr) = self.local_addr() {
            info!("Prometheus metrics server listening on http://{}/metrics", addr);
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    info!("metrics server shutting down");
                    break;
                }
                accept_result = self.listener.accept() => {
                    let (stream, _) = match accept_result {
                        Ok(conn) => conn,
                        Err(err) => {
                            warn!(error = %err, "failed to accept metrics connection");
                            continue;
                        }
                    };

                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(|req: Request<hyper::body::Incoming>| async move {
                            Ok::<_, Infallible>(respond(req.uri().path()))
                        });

                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                            debug!(error = %err, "error serving metrics connection");
                        }
                    });
                }
            }
        }
    }
}

fn respond(path: &str) -> Response<Full<Bytes>> {
    if path != "/metrics" {
        let mut response = Response::new(Full::new(Bytes::from("Not Found")));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return response;
    }

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!(error = %err, "failed to encode metrics");
        let mut response = Response::new(Full::new(Bytes::from("metrics unavailable")));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return response;
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::LINES_RECEIVED_TOTAL;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn serves_registry_and_rejects_other_paths() {
        LINES_RECEIVED_TOTAL.inc();
        let server = MetricsServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(server.serve(cancel_token.clone()));

        let metrics = get(addr, "/metrics").await;
        assert!(metrics.starts_with("HTTP/1.1 200"));
        assert!(metrics.contains("logcat_lines_received_total"));

        let missing = get(addr, "/other").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        cancel_token.cancel();
        handle.await.unwrap();
    }
}
