//! WebSocket connector for the hosted live API

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::wire::{RealtimeInputMessage, SetupMessage, parse_server_message};
use super::{EventStream, LiveConfig, OutboundQueue, ServerEvent, SessionConnector};
use crate::config::Config;
use crate::{Error, Result};

/// Opens live sessions over a WebSocket
#[derive(Debug, Clone)]
pub struct LiveConnector {
    endpoint: String,
    api_key: Option<SecretString>,
}

impl LiveConnector {
    #[must_use]
    pub const fn new(endpoint: String, api_key: Option<SecretString>) -> Self {
        Self { endpoint, api_key }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.endpoint.clone(), config.api_key.clone())
    }

    fn url(&self) -> String {
        match &self.api_key {
            Some(key) => {
                let sep = if self.endpoint.contains('?') { '&' } else { '?' };
                format!("{}{sep}key={}", self.endpoint, key.expose_secret())
            }
            None => self.endpoint.clone(),
        }
    }
}

#[async_trait]
impl SessionConnector for LiveConnector {
    async fn open(&self, config: &LiveConfig, outbound: OutboundQueue) -> Result<EventStream> {
        if self.api_key.is_none() {
            return Err(Error::SessionOpen("no API key configured".to_string()));
        }

        tracing::info!(endpoint = %self.endpoint, model = %config.model, "connecting live session");

        let (ws_stream, _) = connect_async(self.url())
            .await
            .map_err(|e| Error::SessionOpen(e.to_string()))?;

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let setup = SetupMessage::from_config(config).to_json()?;
        ws_tx
            .send(Message::Text(setup.into()))
            .await
            .map_err(|e| Error::SessionOpen(format!("failed to send setup: {e}")))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (opened_tx, opened_rx) = oneshot::channel::<()>();

        let reader_tx = event_tx.clone();
        let reader = tokio::spawn(async move {
            let mut opened_tx = Some(opened_tx);

            while let Some(message) = ws_rx.next().await {
                let payload = match message {
                    Ok(Message::Text(text)) => text.as_str().to_owned(),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(error = %e, "ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        if let Some(frame) = frame {
                            tracing::info!(
                                code = %frame.code,
                                reason = %frame.reason.as_str(),
                                "live session closed by server"
                            );
                        } else {
                            tracing::info!("live session closed by server");
                        }
                        let _ = reader_tx.send(ServerEvent::Closed);
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let e = Error::from(e);
                        tracing::error!(error = %e, "live session transport error");
                        let _ = reader_tx.send(ServerEvent::Error(e.to_string()));
                        return;
                    }
                };

                let events = match parse_server_message(&payload) {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!(error = %e, "ignoring malformed server message");
                        continue;
                    }
                };

                for event in events {
                    if event == ServerEvent::Opened {
                        if let Some(tx) = opened_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                    if reader_tx.send(event).is_err() {
                        return;
                    }
                }
            }

            let _ = reader_tx.send(ServerEvent::Closed);
        });

        let writer = tokio::spawn(async move {
            let mut outbound = outbound;

            // Frames queued before setup is acknowledged wait here
            if opened_rx.await.is_err() {
                return;
            }
            tracing::debug!("live session open, streaming microphone audio");

            while let Some(blob) = outbound.recv().await {
                let text = match RealtimeInputMessage::new(&blob).to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to serialize audio frame");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    let e = Error::from(e);
                    tracing::error!(error = %e, "failed to send audio frame");
                    let _ = event_tx.send(ServerEvent::Error(e.to_string()));
                    return;
                }
            }

            tracing::debug!("outbound audio ended, closing live session");
            let _ = ws_tx.send(Message::Close(None)).await;
        });

        Ok(EventStream::new(event_rx).with_task(reader).with_task(writer))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{WebSocketStream, accept_async};

    use super::*;
    use crate::session::outbound_channel;
    use crate::voice::EncodedBlob;

    fn blob(tag: &str) -> EncodedBlob {
        EncodedBlob {
            data: tag.to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        }
    }

    /// Local server and a connector pointed at it
    async fn local_server() -> (TcpListener, LiveConnector) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}/ws", listener.local_addr().unwrap());
        (listener, LiveConnector::new(endpoint, Some(SecretString::from("key"))))
    }

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (tcp, _) = listener.accept().await.unwrap();
        accept_async(tcp).await.unwrap()
    }

    async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
        let message = ws.next().await.unwrap().unwrap();
        serde_json::from_str(message.to_text().unwrap()).unwrap()
    }

    fn live_config() -> LiveConfig {
        LiveConfig {
            model: "test".to_string(),
            voice: "Kore".to_string(),
            system_instruction: String::new(),
            input_transcription: true,
            output_transcription: true,
        }
    }

    #[test]
    fn test_url_appends_key() {
        let connector = LiveConnector::new(
            "wss://example.test/ws".to_string(),
            Some(SecretString::from("k1")),
        );
        assert_eq!(connector.url(), "wss://example.test/ws?key=k1");

        let connector = LiveConnector::new(
            "wss://example.test/ws?alt=json".to_string(),
            Some(SecretString::from("k2")),
        );
        assert_eq!(connector.url(), "wss://example.test/ws?alt=json&key=k2");
    }

    #[tokio::test]
    async fn test_open_without_key_fails() {
        let connector = LiveConnector::new("wss://example.test/ws".to_string(), None);
        let (_sender, queue) = outbound_channel();

        let err = connector.open(&live_config(), queue).await.unwrap_err();
        assert!(matches!(err, Error::SessionOpen(_)));
    }

    #[tokio::test]
    async fn test_open_unreachable_endpoint_fails() {
        let connector = LiveConnector::new(
            "ws://127.0.0.1:9/unreachable".to_string(),
            Some(SecretString::from("key")),
        );
        let (_sender, queue) = outbound_channel();

        let err = connector.open(&live_config(), queue).await.unwrap_err();
        assert!(matches!(err, Error::SessionOpen(_)));
    }

    #[tokio::test]
    async fn test_audio_waits_for_setup_complete() {
        let (listener, connector) = local_server().await;

        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;

            let setup = next_json(&mut ws).await;
            assert_eq!(setup["setup"]["model"], "models/test");

            // Nothing may follow the setup until it is acknowledged
            let early = tokio::time::timeout(Duration::from_millis(100), ws.next()).await;
            assert!(early.is_err(), "audio sent before setupComplete");

            ws.send(Message::Text(r#"{"setupComplete":{}}"#.into()))
                .await
                .unwrap();

            let mut received = Vec::new();
            for _ in 0..2 {
                let frame = next_json(&mut ws).await;
                let data = &frame["realtimeInput"]["mediaChunks"][0]["data"];
                received.push(data.as_str().unwrap().to_string());
            }

            let last = ws.next().await.unwrap().unwrap();
            (received, last.is_close())
        });

        let (sender, queue) = outbound_channel();
        assert!(sender.send(blob("first")));
        let mut events = connector.open(&live_config(), queue).await.unwrap();
        assert!(sender.send(blob("second")));
        drop(sender);

        assert_eq!(events.recv().await, Some(ServerEvent::Opened));

        let (received, closed) = server.await.unwrap();
        assert_eq!(received, vec!["first".to_string(), "second".to_string()]);
        assert!(closed, "ending the outbound queue should close the socket");
    }

    #[tokio::test]
    async fn test_server_frames_map_to_events() {
        let (listener, connector) = local_server().await;

        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            next_json(&mut ws).await;

            ws.send(Message::Binary(br#"{"setupComplete":{}}"#.to_vec().into()))
                .await
                .unwrap();
            ws.send(Message::Text("not json".into())).await.unwrap();
            ws.send(Message::Text(
                r#"{"serverContent":{"outputTranscription":{"text":"hello"}}}"#.into(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();

            // Drain until the client answers the close
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (_sender, queue) = outbound_channel();
        let mut events = connector.open(&live_config(), queue).await.unwrap();

        assert_eq!(events.recv().await, Some(ServerEvent::Opened));
        assert_eq!(
            events.recv().await,
            Some(ServerEvent::OutputFragment("hello".to_string()))
        );
        assert_eq!(events.recv().await, Some(ServerEvent::Closed));

        events.close().await;
        server.await.unwrap();
    }
}
