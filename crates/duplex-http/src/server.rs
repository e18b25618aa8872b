//! Receiving side of the hyper transport.
//!
//! Each request becomes a [`ServerExchange`]: the request body is pumped
//! into a streaming channel, the handler runs on its own task, and the
//! response is returned as soon as the handler commits a head, with the
//! response channel streamed as the body.

use std::convert::Infallible;
use std::net::SocketAddr;

use anyhow::Context;
use duplex_core::{
    CancelSignal, DuplexError, Exchange, Handler, MAX_CHUNK_SIZE, ProtocolVersion, RequestHead,
    ServerExchange, channel,
};
use http::{HeaderValue, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::rt::{Read, Write};
use hyper::server::conn::{http1, http2};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::body::{self, ExchangeBody};
use crate::{ERROR_HEADER, FULL_DUPLEX_HEADER};

/// Serve exchanges on one connection until the peer closes it.
pub async fn serve_connection<I>(
    io: I,
    version: ProtocolVersion,
    handler: Handler,
) -> Result<(), hyper::Error>
where
    I: Read + Write + Unpin + Send + 'static,
{
    let svc = service_fn(move |req: Request<Incoming>| dispatch(req, handler.clone()));
    match version {
        ProtocolVersion::Http2 => {
            http2::Builder::new(TokioExecutor::new())
                .serve_connection(io, svc)
                .await
        }
        _ => http1::Builder::new().serve_connection(io, svc).await,
    }
}

async fn dispatch(
    req: Request<Incoming>,
    handler: Handler,
) -> Result<Response<ExchangeBody>, Infallible> {
    let version = body::from_http_version(req.version()).unwrap_or(ProtocolVersion::Http11);
    let capable = version.supports_independent_streams();
    let head = RequestHead {
        version,
        full_duplex: req.headers().contains_key(FULL_DUPLEX_HEADER),
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
    };
    debug!(%version, method = %head.method, path = %head.path, "request received");

    let (request_tx, request_rx) = channel::open(CancelSignal::never());
    let (response_tx, response_rx) = channel::open(CancelSignal::never());
    let (head_tx, head_rx) = oneshot::channel();
    tokio::spawn(body::pump(req.into_body(), request_tx));
    tokio::spawn(handler(ServerExchange::new(
        Exchange::new(version, capable),
        head,
        request_rx,
        response_tx,
        head_tx,
    )));

    let response = match head_rx.await {
        Ok(Ok(head)) => {
            let mut response = Response::new(body::from_receiver(response_rx, MAX_CHUNK_SIZE));
            *response.status_mut() =
                StatusCode::from_u16(head.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            response
        }
        Ok(Err(err)) => {
            warn!(%version, error = %err, "exchange rejected before response");
            rejection(&err)
        }
        Err(_) => rejection(&DuplexError::Transport(
            "handler dropped the exchange without a response".into(),
        )),
    };
    Ok(response)
}

fn rejection(err: &DuplexError) -> Response<ExchangeBody> {
    let mut response = Response::new(body::empty());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    if let Ok(value) = HeaderValue::from_str(&err.to_string()) {
        response.headers_mut().insert(ERROR_HEADER, value);
    }
    response
}

/// TCP server hosting a [`Handler`].
pub struct DuplexServer {
    listener: TcpListener,
    version: ProtocolVersion,
    handler: Handler,
}

impl DuplexServer {
    pub async fn bind(
        addr: SocketAddr,
        version: ProtocolVersion,
        handler: Handler,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind duplex server on {addr}"))?;
        Ok(Self {
            listener,
            version,
            handler,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the shutdown signal changes.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, version = %self.version, "duplex server listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = accepted.context("accept failed")?;
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer_addr, error = %e, "set_nodelay failed");
                    }
                    let handler = self.handler.clone();
                    let version = self.version;

                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(TokioIo::new(stream), version, handler).await {
                            error!(%peer_addr, error = %e, "connection error");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("duplex server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
