//! Bridges between streaming channels and hyper bodies.

use std::fmt::Display;

use bytes::Bytes;
use duplex_core::{BodyReceiver, BodySender, DuplexError, ProtocolVersion};
use futures_util::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::{Body, Frame};
use tracing::{debug, trace};

/// Body type used on both sides of an exchange.
pub type ExchangeBody = UnsyncBoxBody<Bytes, DuplexError>;

/// Stream a channel's consumer as a hyper body, `max_len` bytes per frame.
pub fn from_receiver(rx: BodyReceiver, max_len: usize) -> ExchangeBody {
    StreamBody::new(rx.into_stream(max_len).map_ok(Frame::data)).boxed_unsync()
}

pub fn empty() -> ExchangeBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Copy data frames of `body` into `tx` until the body ends.
///
/// A body error aborts the channel with [`DuplexError::Transport`]; a
/// failed write (consumer gone, cancelled) stops the copy. Trailers are
/// ignored.
pub async fn pump<B>(mut body: B, mut tx: BodySender)
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Display,
{
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                let Ok(data) = frame.into_data() else {
                    continue;
                };
                trace!(len = data.len(), "frame received");
                if let Err(err) = tx.write(data).await {
                    debug!(error = %err, "body consumer stopped");
                    return;
                }
            }
            Err(err) => {
                debug!(error = %err, "body failed");
                tx.abort(DuplexError::Transport(err.to_string()));
                return;
            }
        }
    }
    tx.close();
}

pub fn to_http_version(version: ProtocolVersion) -> http::Version {
    match version {
        ProtocolVersion::Http10 => http::Version::HTTP_10,
        ProtocolVersion::Http11 => http::Version::HTTP_11,
        ProtocolVersion::Http2 => http::Version::HTTP_2,
    }
}

pub fn from_http_version(version: http::Version) -> Option<ProtocolVersion> {
    match version {
        http::Version::HTTP_10 => Some(ProtocolVersion::Http10),
        http::Version::HTTP_11 => Some(ProtocolVersion::Http11),
        http::Version::HTTP_2 => Some(ProtocolVersion::Http2),
        _ => None,
    }
}
