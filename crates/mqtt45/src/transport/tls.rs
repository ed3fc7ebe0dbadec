use crate::error::{MqttError, Result};
use crate::transport::tcp::{TcpConfig, TcpTransport};
use crate::transport::Transport;
use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig as RustlsClientConfig, DigitallySignedStruct, RootCertStore};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Server trust policy.
#[derive(Debug, Clone, Default)]
pub enum ServerTrust {
    /// Verify against the bundled webpki roots.
    #[default]
    SystemRoots,
    /// Verify against an explicit set of DER-encoded roots.
    Roots(Vec<CertificateDer<'static>>),
    /// Accept any server certificate. Test brokers only.
    TrustAll,
}

/// TLS knobs shared by the TLS, WSS and QUIC transports.
#[derive(Debug, Default)]
pub struct TlsOptions {
    pub trust: ServerTrust,
    /// DER certificate chain and key for mutual TLS.
    pub client_cert: Option<Vec<CertificateDer<'static>>>,
    pub client_key: Option<PrivateKeyDer<'static>>,
    /// SNI override; defaults to the endpoint host.
    pub server_name: Option<String>,
    /// Restrict to TLS 1.3 only; the default allows 1.2 and 1.3.
    pub require_tls13: bool,
    pub alpn_protocols: Vec<Vec<u8>>,
}

impl Clone for TlsOptions {
    fn clone(&self) -> Self {
        Self {
            trust: self.trust.clone(),
            client_cert: self.client_cert.clone(),
            client_key: self.client_key.as_ref().map(PrivateKeyDer::clone_key),
            server_name: self.server_name.clone(),
            require_tls13: self.require_tls13,
            alpn_protocols: self.alpn_protocols.clone(),
        }
    }
}

impl TlsOptions {
    /// Loads a client credential from DER bytes.
    ///
    /// # Errors
    /// Returns [`MqttError::InvalidCertData`] when the key is not parseable.
    pub fn with_client_cert_der(mut self, chain: Vec<Vec<u8>>, key: Vec<u8>) -> Result<Self> {
        let chain: Vec<CertificateDer<'static>> =
            chain.into_iter().map(CertificateDer::from).collect();
        if chain.is_empty() {
            return Err(MqttError::InvalidCertData(
                "empty certificate chain".to_string(),
            ));
        }
        let key = PrivateKeyDer::try_from(key)
            .map_err(|e| MqttError::InvalidCertData(format!("unparseable private key: {e}")))?;
        self.client_cert = Some(chain);
        self.client_key = Some(key);
        Ok(self)
    }

    /// Builds the rustls client configuration for this option set.
    pub fn build_client_config(&self) -> Result<RustlsClientConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let versions: &[&rustls::SupportedProtocolVersion] = if self.require_tls13 {
            &[&rustls::version::TLS13]
        } else {
            &[&rustls::version::TLS12, &rustls::version::TLS13]
        };

        let builder = RustlsClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(versions)
            .map_err(|e| {
                MqttError::ConnectionError(format!("failed to set TLS versions: {e}"))
            })?;

        let builder = match &self.trust {
            ServerTrust::SystemRoots => {
                let mut roots = RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                builder.with_root_certificates(roots)
            }
            ServerTrust::Roots(certs) => {
                let mut roots = RootCertStore::empty();
                for cert in certs {
                    roots.add(cert.clone()).map_err(|e| {
                        MqttError::InvalidCertData(format!("failed to add root cert: {e}"))
                    })?;
                }
                builder.with_root_certificates(roots)
            }
            ServerTrust::TrustAll => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider })),
        };

        let mut config = match (&self.client_cert, &self.client_key) {
            (Some(chain), Some(key)) => builder
                .with_client_auth_cert(chain.clone(), key.clone_key())
                .map_err(|e| {
                    MqttError::InvalidCertData(format!("failed to configure client cert: {e}"))
                })?,
            _ => builder.with_no_client_auth(),
        };

        config.alpn_protocols = self.alpn_protocols.clone();
        Ok(config)
    }
}

/// Certificate verifier for [`ServerTrust::TrustAll`].
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub tcp: TcpConfig,
    pub options: TlsOptions,
}

impl TlsConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            tcp: TcpConfig::new(host, port),
            options: TlsOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: TlsOptions) -> Self {
        self.options = options;
        self
    }
}

pub struct TlsTransport {
    config: TlsConfig,
    stream: Option<TlsStream<TcpStream>>,
}

impl TlsTransport {
    #[must_use]
    pub fn new(config: TlsConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    pub fn into_split(
        mut self,
    ) -> Result<(
        tokio::io::ReadHalf<TlsStream<TcpStream>>,
        tokio::io::WriteHalf<TlsStream<TcpStream>>,
    )> {
        let stream = self.stream.take().ok_or(MqttError::NotConnected)?;
        Ok(tokio::io::split(stream))
    }
}

impl Transport for TlsTransport {
    async fn connect(&mut self) -> Result<()> {
        let tcp = TcpTransport::connect_stream(&self.config.tcp).await?;

        let tls_config = self.config.options.build_client_config()?;
        let connector = TlsConnector::from(Arc::new(tls_config));

        let server_name = self
            .config
            .options
            .server_name
            .clone()
            .unwrap_or_else(|| self.config.tcp.host.clone());
        let server_name = ServerName::try_from(server_name)
            .map_err(|e| MqttError::ConnectionError(format!("invalid SNI name: {e}")))?;

        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| MqttError::ConnectionError(format!("TLS handshake failed: {e}")))?;

        tracing::debug!(
            host = %self.config.tcp.host,
            port = self.config.tcp.port,
            "TLS connected"
        );
        self.stream = Some(stream);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(MqttError::NotConnected)?;
        Ok(stream.read(buf).await?)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(MqttError::NotConnected)?;
        stream.write_all(buf).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
