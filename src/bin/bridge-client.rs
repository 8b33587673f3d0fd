// Copyright (c) 2023 Espresso Systems (espressosys.com)
// This file is part of the sequencer-example-l2 repository.

// You should have received a copy of the MIT License
// along with the sequencer-example-l2 repository. If not, see <https://mit-license.org/>.

//! Minimal sequencer-side client of the WebSocket bridge: sends a `set` and a `get` request and
//! logs the replies.

use async_compatibility_layer::logging::{setup_backtrace, setup_logging};
use async_std::task::sleep;
use async_tungstenite::{async_std::connect_async, tungstenite::Message};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use surf::Url;

#[derive(Parser, Clone, Debug)]
struct Options {
    /// URL of the harness's WebSocket bridge.
    #[clap(long, env = "BRIDGE_URL", default_value = "ws://localhost:3002")]
    url: Url,

    /// Value sent with the `set` request.
    #[clap(long, default_value = "214")]
    value: u64,

    /// Pause between the `set` and the `get` request, in milliseconds.
    #[clap(long, default_value = "1000")]
    delay_ms: u64,
}

#[async_std::main]
async fn main() {
    setup_logging();
    setup_backtrace();

    let opt = Options::parse();
    let (mut socket, _) = match connect_async(opt.url.as_str()).await {
        Ok(conn) => conn,
        Err(err) => {
            tracing::error!(url = %opt.url, "WebSocket connection failed: {err}");
            std::process::exit(1);
        }
    };
    tracing::info!(url = %opt.url, "connected to bridge");

    let requests = [
        json!({ "action": "set", "value": opt.value }),
        json!({ "action": "get" }),
    ];
    for (i, request) in requests.into_iter().enumerate() {
        if i > 0 {
            sleep(Duration::from_millis(opt.delay_ms)).await;
        }
        if let Err(err) = socket.send(Message::Text(request.to_string())).await {
            tracing::error!(%request, "failed to send request: {err}");
            std::process::exit(1);
        }
        tracing::info!(%request, "sent request");

        match socket.next().await {
            Some(Ok(Message::Text(response))) => tracing::info!(%response, "bridge replied"),
            Some(Ok(other)) => tracing::warn!(?other, "unexpected reply"),
            Some(Err(err)) => tracing::warn!("failed to read reply: {err}"),
            None => {
                tracing::warn!("bridge closed the connection");
                break;
            }
        }
    }

    if let Err(err) = socket.close(None).await {
        tracing::debug!("close failed: {err}");
    }
}
