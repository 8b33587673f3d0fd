// Copyright (c) 2023 Espresso Systems (espressosys.com)
// This file is part of the sequencer-example-l2 repository.

// You should have received a copy of the MIT License
// along with the sequencer-example-l2 repository. If not, see <https://mit-license.org/>.

//! WebSocket bridge towards the external sequencer process.
//!
//! The bridge does not interpret what it receives. Every text or binary message is logged and
//! answered with the same fixed acknowledgement.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use crate::cancel::CancelToken;
use crate::error::{BindSnafu, BridgeError, EncodeAckSnafu, LocalAddrSnafu, PortsExhaustedSnafu};
use async_std::{
    channel::{unbounded, Receiver, Sender},
    net::{TcpListener, TcpStream},
    task,
};
use async_tungstenite::{
    tungstenite::{self, Message},
    WebSocketStream,
};
use futures::{pin_mut, select, FutureExt, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use snafu::{IntoError, ResultExt};

/// Default port of the bridge.
pub const BRIDGE_PORT: u16 = 3002;

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// The reply sent for every inbound message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeAck {
    pub success: bool,
    pub message: String,
}

impl Default for BridgeAck {
    fn default() -> Self {
        Self {
            success: true,
            message: "Test response from WebSocket server".to_string(),
        }
    }
}

/// Connection lifecycle notifications, in the order they are logged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeEvent {
    Connected { port: u16, peer: SocketAddr },
    Received { port: u16, peer: SocketAddr, payload: String },
    Disconnected { port: u16, peer: SocketAddr },
}

#[derive(Debug)]
pub struct BridgeServer {
    listener: TcpListener,
    port: u16,
    subscribers: Vec<Sender<BridgeEvent>>,
}

impl BridgeServer {
    /// Binds the first free port at or above `port`.
    ///
    /// Only an address already in use moves on to the next port; any other failure is returned.
    pub async fn bind(host: &str, port: u16) -> Result<Self, BridgeError> {
        let mut candidate = port;
        let listener = loop {
            match TcpListener::bind((host, candidate)).await {
                Ok(listener) => break listener,
                Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
                    tracing::warn!(port = candidate, "bridge port in use, trying the next one");
                    candidate = candidate
                        .checked_add(1)
                        .ok_or_else(|| PortsExhaustedSnafu { start: port }.build())?;
                }
                Err(err) => {
                    return Err(BindSnafu {
                        host,
                        port: candidate,
                    }
                    .into_error(err))
                }
            }
        };
        let port = listener.local_addr().context(LocalAddrSnafu)?.port();
        tracing::info!(%host, port, "WebSocket bridge listening");
        Ok(Self {
            listener,
            port,
            subscribers: vec![],
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Registers an observer of connection events.
    pub fn subscribe(&mut self) -> Receiver<BridgeEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Accepts connections until `cancel` fires, handling each one on its own task.
    pub async fn serve(self, cancel: &CancelToken) -> Result<(), BridgeError> {
        let acceptor = Acceptor {
            port: self.port,
            ack: serde_json::to_string(&BridgeAck::default())
                .context(EncodeAckSnafu)?
                .into(),
            subscribers: Arc::new(self.subscribers),
        };
        acceptor.run(self.listener.incoming(), cancel).await;
        Ok(())
    }
}

/// Hands every accepted stream to its own connection task.
struct Acceptor {
    port: u16,
    ack: Arc<str>,
    subscribers: Arc<Vec<Sender<BridgeEvent>>>,
}

impl Acceptor {
    async fn run<I>(&self, incoming: I, cancel: &CancelToken)
    where
        I: Stream<Item = io::Result<TcpStream>>,
    {
        let incoming = incoming.fuse();
        let cancelled = cancel.cancelled().fuse();
        pin_mut!(incoming, cancelled);

        loop {
            let accepted = select! {
                accepted = incoming.next() => accepted,
                _ = cancelled => None,
            };
            let Some(accepted) = accepted else {
                tracing::info!(port = self.port, "bridge shutting down");
                return;
            };
            match accepted.and_then(|stream| Ok((stream.peer_addr()?, stream))) {
                Ok((peer, stream)) => {
                    let connection = Connection {
                        port: self.port,
                        peer,
                        ack: self.ack.clone(),
                        subscribers: self.subscribers.clone(),
                    };
                    task::spawn(connection.run(stream));
                }
                Err(err) => {
                    // Errors such as running out of file descriptors tend to persist.
                    tracing::warn!(port = self.port, "failed to accept connection: {err}");
                    if !cancel.sleep(ACCEPT_ERROR_PAUSE).await {
                        tracing::info!(port = self.port, "bridge shutting down");
                        return;
                    }
                }
            }
        }
    }
}

/// One accepted socket, from handshake to close.
struct Connection {
    port: u16,
    peer: SocketAddr,
    ack: Arc<str>,
    subscribers: Arc<Vec<Sender<BridgeEvent>>>,
}

impl Connection {
    async fn run(self, stream: TcpStream) {
        let port = self.port;
        let peer = self.peer;
        let ws = match async_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(err) => {
                tracing::warn!(port, %peer, "WebSocket handshake failed: {err}");
                return;
            }
        };
        tracing::info!(port, %peer, "client connected");
        self.notify(BridgeEvent::Connected { port, peer }).await;

        if let Err(err) = self.exchange(ws).await {
            tracing::debug!(port, %peer, "connection error: {err}");
        }

        tracing::info!(port, %peer, "client disconnected");
        self.notify(BridgeEvent::Disconnected { port, peer }).await;
    }

    async fn exchange(&self, mut ws: WebSocketStream<TcpStream>) -> Result<(), tungstenite::Error> {
        while let Some(msg) = ws.next().await {
            let payload = match msg? {
                Message::Text(text) => text,
                Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Message::Close(_) => break,
                // Ping and pong are answered by the WebSocket layer.
                _ => continue,
            };
            tracing::info!(port = self.port, peer = %self.peer, "received: {payload}");
            self.notify(BridgeEvent::Received {
                port: self.port,
                peer: self.peer,
                payload,
            })
            .await;
            ws.send(Message::Text(self.ack.to_string())).await?;
        }
        Ok(())
    }

    async fn notify(&self, event: BridgeEvent) {
        for subscriber in self.subscribers.iter() {
            // A dropped observer is not an error.
            let _ = subscriber.send(event.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::future::timeout;
    use async_tungstenite::async_std::connect_async;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    async fn start() -> (u16, Receiver<BridgeEvent>, CancelToken, task::JoinHandle<()>) {
        let port = portpicker::pick_unused_port().expect("No ports free");
        let mut server = BridgeServer::bind("127.0.0.1", port).await.unwrap();
        let events = server.subscribe();
        let cancel = CancelToken::new();
        let handle = {
            let cancel = cancel.clone();
            task::spawn(async move { server.serve(&cancel).await.unwrap() })
        };
        (port, events, cancel, handle)
    }

    fn expect_ack(reply: Option<Result<Message, tungstenite::Error>>) {
        let text = match reply {
            Some(Ok(Message::Text(text))) => text,
            other => panic!("expected a text reply, got {other:?}"),
        };
        let ack: BridgeAck = serde_json::from_str(&text).unwrap();
        assert_eq!(ack, BridgeAck::default());
    }

    #[test]
    fn ack_has_fixed_shape() {
        assert_eq!(
            serde_json::to_string(&BridgeAck::default()).unwrap(),
            r#"{"success":true,"message":"Test response from WebSocket server"}"#
        );
    }

    #[async_std::test]
    async fn acknowledges_every_message() {
        let (port, _events, cancel, handle) = start().await;
        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}")).await.unwrap();

        for text in ["hello", "", "{not json", r#"{"action":"get"}"#] {
            ws.send(Message::Text(text.to_string())).await.unwrap();
            expect_ack(timeout(WAIT, ws.next()).await.unwrap());
        }
        ws.send(Message::Binary(vec![0, 159, 146, 150])).await.unwrap();
        expect_ack(timeout(WAIT, ws.next()).await.unwrap());

        ws.close(None).await.unwrap();
        cancel.cancel();
        timeout(WAIT, handle).await.unwrap();
    }

    #[async_std::test]
    async fn events_follow_connection_lifecycle() {
        let (port, events, cancel, handle) = start().await;
        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}")).await.unwrap();
        ws.send(Message::Text("hello".into())).await.unwrap();
        expect_ack(timeout(WAIT, ws.next()).await.unwrap());
        ws.close(None).await.unwrap();

        let mut seen = vec![];
        for _ in 0..3 {
            seen.push(timeout(WAIT, events.recv()).await.unwrap().unwrap());
        }
        assert!(matches!(seen[0], BridgeEvent::Connected { port: p, .. } if p == port));
        assert!(
            matches!(&seen[1], BridgeEvent::Received { payload, .. } if payload == "hello")
        );
        assert!(matches!(seen[2], BridgeEvent::Disconnected { port: p, .. } if p == port));

        cancel.cancel();
        timeout(WAIT, handle).await.unwrap();
    }

    #[async_std::test]
    async fn connections_are_independent() {
        let (port, _events, cancel, handle) = start().await;
        let url = format!("ws://127.0.0.1:{port}");
        let (mut first, _) = connect_async(url.as_str()).await.unwrap();
        let (mut second, _) = connect_async(url.as_str()).await.unwrap();

        // A client that disconnects abruptly does not affect the other.
        drop(first.close(None).await);
        second.send(Message::Text("still here".into())).await.unwrap();
        expect_ack(timeout(WAIT, second.next()).await.unwrap());

        cancel.cancel();
        timeout(WAIT, handle).await.unwrap();
    }

    #[async_std::test]
    async fn occupied_port_moves_to_next() {
        let port = portpicker::pick_unused_port().expect("No ports free");
        let _first = std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
        let _second = std::net::TcpListener::bind(("127.0.0.1", port + 1)).unwrap();
        let server = BridgeServer::bind("127.0.0.1", port).await.unwrap();
        assert_eq!(server.port(), port + 2);
    }

    #[async_std::test]
    async fn plain_tcp_clients_are_not_reported() {
        let (port, events, cancel, handle) = start().await;

        // A health check that connects and hangs up without a WebSocket handshake.
        drop(TcpStream::connect(("127.0.0.1", port)).await.unwrap());

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}")).await.unwrap();
        let local = ws.get_ref().local_addr().unwrap();
        ws.send(Message::Text("hello".into())).await.unwrap();
        expect_ack(timeout(WAIT, ws.next()).await.unwrap());
        ws.close(None).await.unwrap();

        for _ in 0..3 {
            let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
            let peer = match event {
                BridgeEvent::Connected { peer, .. }
                | BridgeEvent::Received { peer, .. }
                | BridgeEvent::Disconnected { peer, .. } => peer,
            };
            assert_eq!(peer, local);
        }
        assert!(events.try_recv().is_err());

        cancel.cancel();
        timeout(WAIT, handle).await.unwrap();
    }

    #[async_std::test]
    async fn accept_errors_are_paced() {
        let accepts = Arc::new(AtomicUsize::new(0));
        let failing = {
            let accepts = accepts.clone();
            futures::stream::repeat_with(move || {
                accepts.fetch_add(1, Ordering::SeqCst);
                // EMFILE
                Err::<TcpStream, _>(io::Error::from_raw_os_error(24))
            })
        };
        let acceptor = Acceptor {
            port: BRIDGE_PORT,
            ack: "".into(),
            subscribers: Arc::new(vec![]),
        };
        let cancel = CancelToken::new();
        let canceller = {
            let cancel = cancel.clone();
            task::spawn(async move {
                task::sleep(Duration::from_millis(250)).await;
                cancel.cancel();
            })
        };

        timeout(WAIT, acceptor.run(failing, &cancel)).await.unwrap();
        canceller.await;
        let accepts = accepts.load(Ordering::SeqCst);
        assert!((1..=4).contains(&accepts), "{accepts} accepts in 250ms");
    }

    #[async_std::test]
    async fn unresolvable_host_is_fatal() {
        let err = BridgeServer::bind("no-such-host.invalid", BRIDGE_PORT)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Bind { .. }));
    }
}
