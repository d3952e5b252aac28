//! Purpose: Provide a blocking HTTP client for the paramstash v0 store protocol.
//! Exports: `HttpStore`.
//! Role: `ParamStore` implementation that talks to a remote parameter service.
//! Invariants: Parameter names travel as query values, never as path segments.
//! Invariants: Every non-2xx response becomes `RemoteOperationFailed` with a code.
//! Invariants: Remote error text is kept as diagnostics for the error channel.
#![allow(clippy::result_large_err)]

use crate::core::error::{ApiResult, Error, ErrorKind};
use crate::core::store::{
    CODE_ACCESS_DENIED, CODE_INTERNAL, CODE_INVALID_REQUEST, CODE_NOT_FOUND, CODE_TOO_LARGE,
    DEFAULT_MAX_VALUE_BYTES, ParamStore,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use ureq::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use ureq::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use ureq::rustls::{DigitallySignedStruct, Error as TlsError, SignatureScheme};
use url::Url;

const CODE_TRANSPORT: &str = "Transport";

#[derive(Clone)]
pub struct HttpStore {
    inner: Arc<HttpStoreInner>,
}

#[derive(Clone)]
struct HttpStoreInner {
    base_url: Url,
    token: Option<String>,
    agent: ureq::Agent,
    max_value_bytes: usize,
}

#[derive(Debug)]
struct AcceptAllServerCertVerifier;

impl ServerCertVerifier for AcceptAllServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        ureq::rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[derive(Deserialize)]
struct ParamEnvelope {
    param: RemoteParam,
}

#[derive(Deserialize)]
struct RemoteParam {
    value: Option<String>,
}

#[derive(Deserialize)]
struct ExistsEnvelope {
    exists: bool,
}

#[derive(Deserialize)]
struct NamesEnvelope {
    names: Vec<String>,
}

#[derive(Deserialize)]
struct LimitsEnvelope {
    max_value_bytes: usize,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: RemoteError,
}

#[derive(Deserialize)]
struct RemoteError {
    code: String,
    message: Option<String>,
    hint: Option<String>,
    name: Option<String>,
}

#[derive(Serialize)]
struct PutRequest<'a> {
    name: &'a str,
    value: &'a str,
    key_id: &'a str,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let agent = ureq::AgentBuilder::new().build();
        Ok(Self {
            inner: Arc::new(HttpStoreInner {
                base_url,
                token: None,
                agent,
                max_value_bytes: DEFAULT_MAX_VALUE_BYTES,
            }),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.inner).token = Some(token.into());
        self
    }

    pub fn with_max_value_bytes(mut self, max_value_bytes: usize) -> Self {
        Arc::make_mut(&mut self.inner).max_value_bytes = max_value_bytes;
        self
    }

    pub fn with_tls_ca_file(self, path: impl AsRef<Path>) -> ApiResult<Self> {
        let path = path.as_ref();
        let cert_bytes = std::fs::read(path).map_err(|err| {
            Error::new(ErrorKind::FileUnreadable)
                .with_message(format!(
                    "failed to read TLS CA/certificate file {}",
                    path.display()
                ))
                .with_source(err)
        })?;
        let mut cert_reader = Cursor::new(cert_bytes);
        let certs = rustls_pemfile::certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                Error::new(ErrorKind::InvalidCall)
                    .with_message("failed to parse TLS CA/certificate file")
                    .with_source(err)
            })?;
        if certs.is_empty() {
            return Err(Error::new(ErrorKind::InvalidCall)
                .with_message("TLS CA/certificate file contains no certificates"));
        }

        let _ = ureq::rustls::crypto::aws_lc_rs::default_provider().install_default();
        let mut root_store = ureq::rustls::RootCertStore::empty();
        let (added, _) = root_store.add_parsable_certificates(certs);
        if added == 0 {
            return Err(Error::new(ErrorKind::InvalidCall)
                .with_message("TLS CA/certificate file contains no parsable certificates"));
        }

        let tls_config = ureq::rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let agent = ureq::builder().tls_config(Arc::new(tls_config)).build();
        Ok(self.with_agent(agent))
    }

    pub fn with_tls_skip_verify(self) -> Self {
        let _ = ureq::rustls::crypto::aws_lc_rs::default_provider().install_default();
        let tls_config = ureq::rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAllServerCertVerifier))
            .with_no_client_auth();
        let agent = ureq::builder().tls_config(Arc::new(tls_config)).build();
        self.with_agent(agent)
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Asks the server for its per-entry ceiling and adopts it.
    pub fn discover_limits(self) -> ApiResult<Self> {
        let url = build_url(&self.inner.base_url, &["v0", "limits"], &[])?;
        let envelope: LimitsEnvelope = self.request_json("GET", &url, None)?;
        Ok(self.with_max_value_bytes(envelope.max_value_bytes))
    }

    fn request_json<R>(&self, method: &str, url: &Url, body: Option<&PutRequest<'_>>) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        debug!(%method, url = %url, "remote request");
        let request = self.request(method, url).set("Accept", "application/json");
        let response = match body {
            None => request.call(),
            Some(body) => {
                let payload = serde_json::to_string(body).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode request json")
                        .with_source(err)
                })?;
                request
                    .set("Content-Type", "application/json")
                    .send_string(&payload)
            }
        };

        match response {
            Ok(resp) => read_json_response(resp),
            Err(ureq::Error::Status(code, resp)) => Err(parse_error_response(code, resp)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::RemoteOperationFailed)
                .with_code(CODE_TRANSPORT)
                .with_message("request failed")
                .with_diagnostics(err.to_string())
                .with_source(err)),
        }
    }

    fn request(&self, method: &str, url: &Url) -> ureq::Request {
        let mut request = self.inner.agent.request(method, url.as_str());
        if let Some(token) = &self.inner.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        request
    }

    fn with_agent(mut self, agent: ureq::Agent) -> Self {
        Arc::make_mut(&mut self.inner).agent = agent;
        self
    }

    fn value_url(&self, name: &str, extra: &[(&str, &str)]) -> ApiResult<Url> {
        let mut query = vec![("name", name)];
        query.extend_from_slice(extra);
        build_url(&self.inner.base_url, &["v0", "params", "value"], &query)
    }
}

impl ParamStore for HttpStore {
    fn get_value(&self, name: &str, decrypt: bool) -> ApiResult<String> {
        let decrypt = if decrypt { "true" } else { "false" };
        let url = self.value_url(name, &[("decrypt", decrypt)])?;
        let envelope: ParamEnvelope = self
            .request_json("GET", &url, None)
            .map_err(|err| with_default_name(err, name))?;
        envelope.param.value.ok_or_else(|| {
            Error::new(ErrorKind::Internal)
                .with_message("response is missing the parameter value")
                .with_name(name)
        })
    }

    fn put_value(&self, name: &str, value: &str, key_id: &str) -> ApiResult<()> {
        let url = build_url(&self.inner.base_url, &["v0", "params", "value"], &[])?;
        let payload = PutRequest {
            name,
            value,
            key_id,
        };
        let _envelope: ParamEnvelope = self
            .request_json("PUT", &url, Some(&payload))
            .map_err(|err| with_default_name(err, name))?;
        Ok(())
    }

    fn delete_value(&self, name: &str) -> ApiResult<()> {
        let url = self.value_url(name, &[])?;
        let _value: serde_json::Value = self
            .request_json("DELETE", &url, None)
            .map_err(|err| with_default_name(err, name))?;
        Ok(())
    }

    fn exists(&self, name: &str) -> ApiResult<bool> {
        let url = build_url(
            &self.inner.base_url,
            &["v0", "params", "exists"],
            &[("name", name)],
        )?;
        let envelope: ExistsEnvelope = self
            .request_json("GET", &url, None)
            .map_err(|err| with_default_name(err, name))?;
        Ok(envelope.exists)
    }

    fn list_names(&self) -> ApiResult<Vec<String>> {
        let url = build_url(&self.inner.base_url, &["v0", "params"], &[])?;
        let envelope: NamesEnvelope = self.request_json("GET", &url, None)?;
        Ok(envelope.names)
    }

    fn max_value_bytes(&self) -> usize {
        self.inner.max_value_bytes
    }
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::InvalidCall)
            .with_message("invalid remote endpoint url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::InvalidCall)
            .with_message("remote endpoint must use http or https scheme"));
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(Error::new(ErrorKind::InvalidCall)
            .with_message("remote endpoint must not include a path"));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str], query: &[(&str, &str)]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::InvalidCall).with_message("remote endpoint cannot be a base")
        })?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query {
            pairs.append_pair(key, value);
        }
    }
    Ok(url)
}

fn with_default_name(err: Error, name: &str) -> Error {
    if err.name().is_some() {
        return err;
    }
    err.with_name(name)
}

fn read_json_response<R>(response: ureq::Response) -> ApiResult<R>
where
    R: DeserializeOwned,
{
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("invalid response json")
            .with_source(err)
    })
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
        return error_from_remote(envelope.error);
    }
    let code = code_from_status(status);
    let mut err = Error::new(ErrorKind::RemoteOperationFailed)
        .with_code(code)
        .with_message(format!("remote error status {status}"));
    if !body.trim().is_empty() {
        err = err.with_diagnostics(body);
    }
    err
}

fn error_from_remote(remote: RemoteError) -> Error {
    let message = remote
        .message
        .unwrap_or_else(|| "remote operation failed".to_string());
    let mut diagnostics = format!("{}: {message}", remote.code);
    if let Some(hint) = &remote.hint {
        diagnostics.push('\n');
        diagnostics.push_str(hint);
    }
    let mut err = Error::new(ErrorKind::RemoteOperationFailed)
        .with_code(remote.code)
        .with_message(message)
        .with_diagnostics(diagnostics);
    if let Some(hint) = remote.hint {
        err = err.with_hint(hint);
    }
    if let Some(name) = remote.name {
        err = err.with_name(name);
    }
    err
}

fn code_from_status(status: u16) -> &'static str {
    match status {
        400 => CODE_INVALID_REQUEST,
        401 | 403 => CODE_ACCESS_DENIED,
        404 => CODE_NOT_FOUND,
        413 => CODE_TOO_LARGE,
        _ => CODE_INTERNAL,
    }
}
