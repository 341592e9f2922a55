//! Websocket driver feeding an [`Engine`] from a hawkeye server.

use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use hawkeye_proto::{Batch, Change, ChangeMessage};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::engine::{BatchReport, Engine};
use crate::error::ConnectError;

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub url: String,
    /// Ask the backend for the root domain as soon as the socket is up.
    pub bootstrap: bool,
    pub connect_timeout: Duration,
}

impl ConnectOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bootstrap: false,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// `add` request for the top-level domain, sent with an empty id.
pub fn bootstrap_message() -> ChangeMessage {
    ChangeMessage::new(Change::Add, "domain", "", "")
}

pub fn bootstrap_request() -> Batch {
    Batch::single(bootstrap_message())
}

/// Connects, then applies every inbound text frame until the server closes
/// the socket. Queued commands are written as soon as they arrive.
/// `on_batch` runs after each applied frame.
pub async fn run<F>(engine: &mut Engine, options: &ConnectOptions, mut on_batch: F) -> Result<()>
where
    F: FnMut(&Engine, &BatchReport),
{
    let (ws_stream, _) = match timeout(options.connect_timeout, connect_async(options.url.as_str())).await {
        Ok(Ok(result)) => result,
        Ok(Err(source)) => {
            error!(url = %options.url, error = %source, "failed to connect");
            return Err(ConnectError::Handshake {
                url: options.url.clone(),
                source,
            }
            .into());
        }
        Err(_) => {
            error!(url = %options.url, "failed to connect: timed out");
            return Err(ConnectError::Timeout {
                url: options.url.clone(),
                timeout_ms: options.connect_timeout.as_millis(),
            }
            .into());
        }
    };
    info!(url = %options.url, "connected");
    let (mut write, mut read) = ws_stream.split();

    if options.bootstrap {
        engine.outbox().request(bootstrap_message());
    }

    let outbox = engine.outbox().clone();
    loop {
        tokio::select! {
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(report) = engine.apply_frame(text.as_str()) {
                            debug!(?report, "batch applied");
                            on_batch(engine, &report);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "server closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "websocket error");
                        break;
                    }
                    None => break,
                }
            }
            command = outbox.recv() => {
                let Some(command) = command else { break };
                let text = command.to_json()?;
                write.send(Message::Text(text.into())).await?;
            }
        }
    }
    Ok(())
}
