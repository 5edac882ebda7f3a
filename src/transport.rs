//! Transport capability.
//!
//! The connection core speaks raw IRC lines; a [`Transport`] turns a server
//! endpoint into a pair of line channels. The default is a WebSocket with
//! the `irc` subprotocol; tests substitute an in-memory transport.

use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, warn};

use crate::error::Error;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A connected line-oriented duplex.
///
/// `incoming` yields data frames from the server; one frame may contain
/// several CRLF-separated IRC lines. Dropping `outgoing` closes the
/// connection; `incoming` ending means the peer closed.
pub struct Conn {
    pub outgoing: mpsc::Sender<String>,
    pub incoming: mpsc::Receiver<String>,
}

/// Produces connections for the core. Implementations must resolve only
/// once the transport is open and ready for the handshake.
pub trait Transport: Send + Sync {
    fn connect(&self, server: &str, port: u16, secure: bool)
        -> BoxFuture<'static, Result<Conn, Error>>;
}

/// WebSocket transport (`ws://` or `wss://`), subprotocol `irc`.
pub struct WsTransport;

impl Transport for WsTransport {
    fn connect(
        &self,
        server: &str,
        port: u16,
        secure: bool,
    ) -> BoxFuture<'static, Result<Conn, Error>> {
        let scheme = if secure { "wss" } else { "ws" };
        let url = format!("{scheme}://{server}:{port}/");
        Box::pin(async move {
            let mut request = url
                .clone()
                .into_client_request()
                .map_err(|_| Error::UnableToConnect)?;
            request.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                HeaderValue::from_static("irc"),
            );

            let (ws, _response) = connect_async(request).await.map_err(|e| {
                warn!(%url, error = %e, "websocket connect failed");
                Error::UnableToConnect
            })?;
            debug!(%url, "websocket open");
            let (mut sink, mut stream) = ws.split();

            let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
            let (in_tx, in_rx) = mpsc::channel::<String>(256);

            // Outgoing lines become text frames. Ends (and closes the
            // socket) when the core drops its sender.
            tokio::spawn(async move {
                while let Some(line) = out_rx.recv().await {
                    if sink.send(WsMessage::Text(format!("{line}\r\n"))).await.is_err() {
                        break;
                    }
                }
                let _ = sink.send(WsMessage::Close(None)).await;
            });

            // Incoming text frames become data chunks. Control frames are
            // handled by tungstenite itself.
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(WsMessage::Text(text)) => {
                            if in_tx.send(text).await.is_err() {
                                break;
                            }
                        }
                        Ok(WsMessage::Close(_)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            });

            Ok(Conn {
                outgoing: out_tx,
                incoming: in_rx,
            })
        })
    }
}
