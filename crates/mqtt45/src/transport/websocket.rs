use crate::error::{MqttError, Result};
use crate::transport::tcp::{TcpConfig, TcpTransport};
use crate::transport::tls::TlsOptions;
use crate::transport::Transport;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{
    client_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream,
};

/// MQTT over WebSocket negotiates the `mqtt` subprotocol.
const SUBPROTOCOL: &str = "mqtt";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub tcp: TcpConfig,
    pub path: String,
    /// Extra request headers sent with the upgrade.
    pub headers: Vec<(String, String)>,
    /// TLS options for `wss`; `None` keeps the connection in the clear.
    pub tls: Option<TlsOptions>,
}

impl WebSocketConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            tcp: TcpConfig::new(host, port),
            path: "/mqtt".to_string(),
            headers: Vec::new(),
            tls: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn url(&self) -> String {
        let scheme = if self.tls.is_some() { "wss" } else { "ws" };
        format!(
            "{scheme}://{}:{}{}",
            self.tcp.host, self.tcp.port, self.path
        )
    }
}

pub struct WebSocketTransport {
    config: WebSocketConfig,
    stream: Option<WsStream>,
    /// Spilled bytes from a frame larger than the caller's read buffer.
    read_spill: Vec<u8>,
}

impl WebSocketTransport {
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            stream: None,
            read_spill: Vec::new(),
        }
    }

    pub fn into_split(
        mut self,
    ) -> Result<(SplitSink<WsStream, Message>, SplitStream<WsStream>)> {
        let stream = self.stream.take().ok_or(MqttError::NotConnected)?;
        Ok(stream.split())
    }
}

impl Transport for WebSocketTransport {
    async fn connect(&mut self) -> Result<()> {
        let tcp = TcpTransport::connect_stream(&self.config.tcp).await?;

        let mut request = self
            .config
            .url()
            .into_client_request()
            .map_err(|e| MqttError::ConnectionError(format!("invalid websocket URL: {e}")))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(SUBPROTOCOL),
        );
        for (name, value) in &self.config.headers {
            let name: tokio_tungstenite::tungstenite::http::header::HeaderName = name
                .parse()
                .map_err(|_| MqttError::Configuration(format!("invalid header name: {name}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| MqttError::Configuration("invalid header value".to_string()))?;
            request.headers_mut().insert(name, value);
        }

        let connector = match &self.config.tls {
            Some(tls) => Some(Connector::Rustls(Arc::new(tls.build_client_config()?))),
            None => Some(Connector::Plain),
        };

        let (stream, response) = client_async_tls_with_config(request, tcp, None, connector)
            .await
            .map_err(|e| MqttError::ConnectionError(format!("websocket handshake failed: {e}")))?;

        tracing::debug!(
            url = %self.config.url(),
            status = %response.status(),
            "WebSocket connected"
        );
        self.stream = Some(stream);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.read_spill.is_empty() {
            let stream = self.stream.as_mut().ok_or(MqttError::NotConnected)?;
            loop {
                let message = stream
                    .next()
                    .await
                    .ok_or_else(|| {
                        MqttError::ConnectionError("websocket stream ended".to_string())
                    })?
                    .map_err(|e| MqttError::ConnectionError(format!("websocket error: {e}")))?;
                match message {
                    Message::Binary(data) => {
                        self.read_spill = data;
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(_) => {
                        return Err(MqttError::ConnectionError(
                            "websocket closed by peer".to_string(),
                        ))
                    }
                    _ => {
                        return Err(MqttError::UnexpectedTokens(
                            "non-binary websocket frame".to_string(),
                        ))
                    }
                }
            }
        }

        let count = self.read_spill.len().min(buf.len());
        buf[..count].copy_from_slice(&self.read_spill[..count]);
        self.read_spill.drain(..count);
        Ok(count)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(MqttError::NotConnected)?;
        stream
            .send(Message::Binary(buf.to_vec()))
            .await
            .map_err(|e| MqttError::ConnectionError(format!("websocket send failed: {e}")))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
