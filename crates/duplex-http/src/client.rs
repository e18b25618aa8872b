//! Initiating side of the hyper transport.

use std::fmt::Display;
use std::net::SocketAddr;

use duplex_core::{
    BodyReceiver, BoxFuture, CallResponse, CancelSignal, DuplexError, DuplexResult, Handler,
    MAX_CHUNK_SIZE, ProtocolVersion, RequestHead, Transport, channel,
};
use http::header::HOST;
use http::{HeaderValue, Request, Response};
use hyper::body::Incoming;
use hyper::client::conn::{http1, http2};
use hyper::rt::{Read, Write};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::body::{self, ExchangeBody};
use crate::server::serve_connection;
use crate::{ERROR_HEADER, FULL_DUPLEX_HEADER};

/// Buffer size of the in-memory pipe, per direction.
const PIPE_CAPACITY: usize = 64 * 1024;

enum Connector {
    /// Serve every call on a fresh in-memory pipe with this handler.
    InMemory(Handler),
    Tcp(SocketAddr),
}

/// A [`Transport`] speaking HTTP/1.1 or HTTP/2 through hyper, one
/// connection per exchange.
pub struct HyperTransport {
    connector: Connector,
}

/// The connection's request handle, kept alive while the response body is
/// still streaming.
type KeepAlive = Box<dyn Send>;

impl HyperTransport {
    pub fn in_memory(handler: Handler) -> Self {
        Self {
            connector: Connector::InMemory(handler),
        }
    }

    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            connector: Connector::Tcp(addr),
        }
    }

    fn authority(&self) -> String {
        match &self.connector {
            Connector::InMemory(_) => "localhost".to_string(),
            Connector::Tcp(addr) => addr.to_string(),
        }
    }

    async fn call(
        &self,
        head: RequestHead,
        body: BodyReceiver,
        cancel: CancelSignal,
    ) -> DuplexResult<CallResponse> {
        let version = head.version;
        if head.full_duplex && !self.supports_duplex(version) {
            return Err(DuplexError::Capability { version });
        }

        let request = self.request(&head, body)?;
        let sent = async {
            match &self.connector {
                Connector::InMemory(handler) => {
                    let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(TokioIo::new(server), version, handler).await
                        {
                            debug!(error = %e, "in-memory connection ended with error");
                        }
                    });
                    send(TokioIo::new(client), version, request).await
                }
                Connector::Tcp(addr) => {
                    let stream = TcpStream::connect(*addr).await.map_err(transport_error)?;
                    stream.set_nodelay(true).map_err(transport_error)?;
                    send(TokioIo::new(stream), version, request).await
                }
            }
        };

        let (response, keep_alive) = tokio::select! {
            sent = sent => sent?,
            _ = cancel.cancelled() => return Err(DuplexError::Cancelled),
        };

        let status = response.status().as_u16();
        if let Some(reason) = response.headers().get(ERROR_HEADER) {
            let reason = String::from_utf8_lossy(reason.as_bytes()).into_owned();
            return Err(DuplexError::Transport(format!("call rejected ({status}): {reason}")));
        }
        let version = body::from_http_version(response.version()).unwrap_or(version);
        info!(%version, status, "response head received");

        let (tx, rx) = channel::open(cancel);
        let incoming = response.into_body();
        tokio::spawn(async move {
            body::pump(incoming, tx).await;
            drop(keep_alive);
        });

        Ok(CallResponse {
            status,
            version,
            body: rx,
        })
    }

    fn request(&self, head: &RequestHead, body: BodyReceiver) -> DuplexResult<Request<ExchangeBody>> {
        let authority = self.authority();
        // HTTP/2 carries the authority in the URI, HTTP/1 in the Host header.
        let mut builder = match head.version {
            ProtocolVersion::Http2 => {
                Request::builder().uri(format!("http://{authority}{}", head.path))
            }
            _ => Request::builder()
                .uri(head.path.as_str())
                .header(HOST, HeaderValue::from_str(&authority).map_err(transport_error)?),
        };
        builder = builder
            .method(head.method.as_str())
            .version(body::to_http_version(head.version));
        if head.full_duplex {
            builder = builder.header(FULL_DUPLEX_HEADER, "1");
        }
        builder
            .body(body::from_receiver(body, MAX_CHUNK_SIZE))
            .map_err(transport_error)
    }
}

impl Transport for HyperTransport {
    fn supports_duplex(&self, version: ProtocolVersion) -> bool {
        version.supports_independent_streams()
    }

    fn issue<'a>(
        &'a self,
        head: RequestHead,
        body: BodyReceiver,
        cancel: CancelSignal,
    ) -> BoxFuture<'a, DuplexResult<CallResponse>> {
        Box::pin(self.call(head, body, cancel))
    }
}

async fn send<I>(
    io: I,
    version: ProtocolVersion,
    request: Request<ExchangeBody>,
) -> DuplexResult<(Response<Incoming>, KeepAlive)>
where
    I: Read + Write + Unpin + Send + 'static,
{
    match version {
        ProtocolVersion::Http2 => {
            let (mut sender, conn) = http2::handshake(TokioExecutor::new(), io)
                .await
                .map_err(transport_error)?;
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "http2 connection error");
                }
            });
            let response = sender.send_request(request).await.map_err(transport_error)?;
            let keep_alive: KeepAlive = Box::new(sender);
            Ok((response, keep_alive))
        }
        _ => {
            let (mut sender, conn) = http1::handshake(io).await.map_err(transport_error)?;
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "http1 connection error");
                }
            });
            let response = sender.send_request(request).await.map_err(transport_error)?;
            let keep_alive: KeepAlive = Box::new(sender);
            Ok((response, keep_alive))
        }
    }
}

fn transport_error(err: impl Display) -> DuplexError {
    DuplexError::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http1_requests_use_origin_form_and_host() {
        let transport = HyperTransport::tcp("127.0.0.1:8080".parse().unwrap());
        let (_tx, rx) = channel::open(CancelSignal::never());
        let head = RequestHead::post(ProtocolVersion::Http11, "/duplex").with_full_duplex(true);

        let request = transport.request(&head, rx).unwrap();
        assert_eq!(request.uri(), "/duplex");
        assert_eq!(request.headers()[HOST], "127.0.0.1:8080");
        assert_eq!(request.headers()[FULL_DUPLEX_HEADER], "1");
        assert_eq!(request.version(), http::Version::HTTP_11);
        assert_eq!(request.method(), http::Method::POST);
    }

    #[test]
    fn http2_requests_use_absolute_uri() {
        let transport = HyperTransport::in_memory(duplex_core::uppercase_handler());
        let (_tx, rx) = channel::open(CancelSignal::never());
        let head = RequestHead::post(ProtocolVersion::Http2, "/x");

        let request = transport.request(&head, rx).unwrap();
        assert_eq!(request.uri(), "http://localhost/x");
        assert!(request.headers().get(HOST).is_none());
        assert!(request.headers().get(FULL_DUPLEX_HEADER).is_none());
    }

    #[tokio::test]
    async fn incapable_version_fails_before_connecting() {
        // Nothing listens here; the capability check must short-circuit.
        let transport = HyperTransport::tcp("127.0.0.1:9".parse().unwrap());
        let (_tx, rx) = channel::open(CancelSignal::never());
        let head = RequestHead::post(ProtocolVersion::Http10, "/").with_full_duplex(true);

        let err = transport
            .issue(head, rx, CancelSignal::never())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DuplexError::Capability {
                version: ProtocolVersion::Http10
            }
        );
    }
}
