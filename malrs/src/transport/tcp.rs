//! TCP transport with MALTCP framing.
//!
//! Task structure:
//! - one accept task on the configured listening port, spawning
//! - one inbound task per connection, which reads whole frames (fixed
//!   header, then the announced variable part), decodes them and pushes
//!   the messages onto the delivery channel, and
//! - one outbound writer task draining the transmit channel. The writer
//!   owns the connection cache keyed by `host:port`, dialling on first use
//!   and evicting on write failure so the next send redials.
//!
//! A read error terminates the inbound task and drops the connection; a
//! decode error drops only the offending frame. Transmitted messages that
//! cannot be routed or written are logged and dropped; the core never
//! replays them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use malrs_core::{Message, Uri};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use crate::wire::{
    self, FIXED_HEADER_LEN, HeaderDefaults, MAX_BODY_SIZE, PROTOCOL_VERSION, presence,
};

use super::{Transport, TransportError};

const SCHEME: &str = "maltcp";

/// Configuration for a [`TcpTransport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Host the listener binds to and the advertised URI names.
    pub host: String,
    /// Listening port; 0 picks an ephemeral port.
    pub port: u16,
    /// Protocol version stamped into every outgoing frame.
    pub version: u8,
    /// Presence flags for the optional header fields of outgoing frames.
    pub flags: u8,
    /// Defaults substituted for unset optional fields.
    pub defaults: HeaderDefaults,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            version: PROTOCOL_VERSION,
            flags: presence::ALL,
            defaults: HeaderDefaults::default(),
        }
    }
}

impl TcpConfig {
    /// Configuration listening on a fixed port of the default host.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }
}

/// TCP transport: frames messages with the fixed 23-octet header and
/// multiplexes connections per remote `host:port`.
pub struct TcpTransport {
    uri: Uri,
    outbound_tx: mpsc::UnboundedSender<Message>,
    delivery_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    shutdown: watch::Sender<bool>,
}

impl TcpTransport {
    /// Bind the listening socket and start the background tasks.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the listener cannot be bound.
    pub async fn bind(config: TcpConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let port = listener.local_addr()?.port();
        let uri = Uri::new(format!("{SCHEME}://{}:{port}", config.host));

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let config = Arc::new(config);
        tokio::spawn(accept_loop(
            listener,
            delivery_tx,
            Arc::clone(&config),
            shutdown_rx.clone(),
        ));
        tokio::spawn(outbound_loop(outbound_rx, config, shutdown_rx));

        tracing::info!(%uri, "transport listening");
        Ok(Self {
            uri,
            outbound_tx,
            delivery_rx: Mutex::new(Some(delivery_rx)),
            shutdown,
        })
    }
}

impl Transport for TcpTransport {
    fn local_uri(&self) -> Uri {
        self.uri.clone()
    }

    fn transmit(&self, msg: Message) -> Result<(), TransportError> {
        if *self.shutdown.borrow() {
            return Err(TransportError::Closed);
        }
        self.outbound_tx
            .send(msg)
            .map_err(|_| TransportError::Closed)
    }

    fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.delivery_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        // Background tasks also observe the sender being dropped, but an
        // explicit signal closes connections promptly.
        let _ = self.shutdown.send(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    delivery_tx: mpsc::UnboundedSender<Message>,
    config: Arc<TcpConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "accepted connection");
                    tokio::spawn(inbound_loop(
                        stream,
                        peer.to_string(),
                        delivery_tx.clone(),
                        Arc::clone(&config),
                        shutdown.clone(),
                    ));
                }
                Err(error) => {
                    tracing::warn!(%error, "accept failed");
                    break;
                }
            },
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("accept loop exited");
}

async fn inbound_loop(
    mut stream: TcpStream,
    peer: String,
    delivery_tx: mpsc::UnboundedSender<Message>,
    config: Arc<TcpConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut stream) => frame,
            _ = shutdown.changed() => break,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!(%peer, "connection closed by peer");
                break;
            }
            Err(error) => {
                // A failed read leaves the stream unframed; terminate the
                // task rather than resynchronise.
                tracing::warn!(%peer, %error, "read failed, dropping connection");
                break;
            }
        };

        match wire::decode_message(&frame, config.version, &config.defaults) {
            Ok(mut msg) => {
                if msg.uri_from.is_empty() {
                    msg.uri_from = Uri::new(format!("{SCHEME}://{peer}"));
                }
                tracing::debug!(%peer, uri_to = %msg.uri_to, tid = msg.transaction_id, "received message");
                if delivery_tx.send(msg).is_err() {
                    break;
                }
            }
            Err(error) => {
                tracing::warn!(%peer, %error, "dropping undecodable frame");
            }
        }
    }
    tracing::debug!(%peer, "inbound task exited");
}

/// Read one whole frame: the fixed header, then the announced variable part.
async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; FIXED_HEADER_LEN];
    stream.read_exact(&mut header).await?;

    let body_len = wire::body_length(&header);
    if body_len > MAX_BODY_SIZE {
        return Err(std::io::Error::other(format!(
            "announced frame body of {body_len} bytes exceeds limit"
        )));
    }

    let mut frame = vec![0u8; FIXED_HEADER_LEN + body_len];
    frame[..FIXED_HEADER_LEN].copy_from_slice(&header);
    stream.read_exact(&mut frame[FIXED_HEADER_LEN..]).await?;
    Ok(frame)
}

async fn outbound_loop(
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    config: Arc<TcpConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Connection cache keyed by remote host:port. Only this task touches
    // it, so no lock is needed.
    let mut conns: HashMap<String, TcpStream> = HashMap::new();

    loop {
        let msg = tokio::select! {
            msg = outbound_rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let target = match msg.uri_to.host_port() {
            Ok(target) => target.to_string(),
            Err(error) => {
                tracing::error!(uri_to = %msg.uri_to, %error, "cannot route message");
                continue;
            }
        };

        let mut frame = match wire::encode_message(&msg, config.version, config.flags, &config.defaults)
        {
            Ok(frame) => frame,
            Err(error) => {
                tracing::error!(uri_to = %msg.uri_to, %error, "cannot encode message");
                continue;
            }
        };
        wire::patch_body_length(&mut frame);

        if !conns.contains_key(&target) {
            match TcpStream::connect(&target).await {
                Ok(stream) => {
                    tracing::debug!(%target, "connected");
                    conns.insert(target.clone(), stream);
                }
                Err(error) => {
                    tracing::error!(%target, %error, "connect failed, dropping message");
                    continue;
                }
            }
        }

        if let Some(stream) = conns.get_mut(&target)
            && let Err(error) = stream.write_all(&frame).await
        {
            // Evict so the next send redials; this message is lost.
            tracing::warn!(%target, %error, "write failed, evicting connection");
            conns.remove(&target);
        }
    }
    // Dropping the cache closes every outbound connection.
    tracing::debug!("outbound task exited");
}
