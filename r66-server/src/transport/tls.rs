//! TLS for both directions
//!
//! Listeners use a certificate from the certificate directory, generating a
//! self-signed one on first start. Outbound connections accept any partner
//! certificate: partners are authenticated by their key in the Authent
//! exchange, not by the certificate.

use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use sha2::{Digest, Sha256};
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{
    ClientConfig, DigitallySignedStruct, Error as TlsError, ServerConfig, SignatureScheme,
};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::info;

use crate::constants::*;

/// Load the listener certificate, generating a self-signed one if missing
///
/// # Errors
///
/// Returns a message if the files cannot be read, written or parsed.
pub fn load_or_generate_tls_config(cert_dir: &Path) -> Result<TlsAcceptor, String> {
    let cert_path = cert_dir.join(CERT_FILENAME);
    let key_path = cert_dir.join(KEY_FILENAME);

    if !(cert_path.exists() && key_path.exists()) {
        info!("{}", MSG_GENERATING_CERT);
        generate_self_signed_cert(&cert_path, &key_path)?;
    }
    let acceptor = load_tls_config(&cert_path, &key_path)?;
    info!("{}{}", MSG_CERT_FINGERPRINT, certificate_fingerprint(&cert_path)?);
    Ok(acceptor)
}

/// Generate a self-signed certificate and private key
fn generate_self_signed_cert(cert_path: &Path, key_path: &Path) -> Result<(), String> {
    use rcgen::{CertificateParams, KeyPair};

    let key_pair = KeyPair::generate().map_err(|e| format!("{}{}", ERR_GENERATE_KEYPAIR, e))?;
    let mut params =
        CertificateParams::new(vec![]).map_err(|e| format!("{}{}", ERR_CREATE_CERT_PARAMS, e))?;
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, TLS_CERT_COMMON_NAME);
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| format!("{}{}", ERR_GENERATE_CERT, e))?;

    fs::write(cert_path, cert.pem()).map_err(|e| format!("{}{}", ERR_WRITE_CERT_FILE, e))?;
    #[cfg(unix)]
    set_secure_permissions(cert_path)?;

    fs::write(key_path, key_pair.serialize_pem())
        .map_err(|e| format!("{}{}", ERR_WRITE_KEY_FILE, e))?;
    #[cfg(unix)]
    set_secure_permissions(key_path)?;

    info!("{}{}", MSG_CERT_GENERATED, cert_path.display());
    info!("{}{}", MSG_KEY_GENERATED, key_path.display());
    Ok(())
}

/// Build a TLS acceptor from certificate and key files
fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, String> {
    let cert_file = fs::File::open(cert_path).map_err(|e| format!("{}{}", ERR_OPEN_CERT_FILE, e))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("{}{}", ERR_PARSE_CERT, e))?;
    if certs.is_empty() {
        return Err(ERR_NO_CERTS_FOUND.to_string());
    }

    let key_file = fs::File::open(key_path).map_err(|e| format!("{}{}", ERR_OPEN_KEY_FILE, e))?;
    let mut key_reader = BufReader::new(key_file);
    let private_key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| format!("{}{}", ERR_PARSE_KEY, e))?
        .ok_or(ERR_NO_KEY_FOUND)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, private_key)
        .map_err(|e| format!("{}{}", ERR_CREATE_TLS_CONFIG, e))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Set file permissions to 0o600
#[cfg(unix)]
pub fn set_secure_permissions(path: &Path) -> Result<(), String> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path).map_err(|e| format!("{}{}", ERR_READ_METADATA, e))?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(0o600);
    fs::set_permissions(path, permissions).map_err(|e| format!("{}{}", ERR_SET_PERMS, e))?;
    Ok(())
}

/// SHA-256 fingerprint of a PEM certificate, colon-separated uppercase hex
pub fn certificate_fingerprint(cert_path: &Path) -> Result<String, String> {
    let cert_pem =
        fs::read_to_string(cert_path).map_err(|e| format!("{}{}", ERR_OPEN_CERT_FILE, e))?;
    let cert_der = pem::parse(&cert_pem).map_err(|e| format!("{}{}", ERR_PARSE_CERT, e))?;

    let mut hasher = Sha256::new();
    hasher.update(cert_der.contents());
    let hex_str = hex::encode_upper(hasher.finalize());
    Ok(hex_str
        .as_bytes()
        .chunks(2)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(":"))
}

/// Connector used for outbound TLS sessions
pub static TLS_CONNECTOR: LazyLock<TlsConnector> = LazyLock::new(|| {
    let mut config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth();
    config.enable_sni = false;
    TlsConnector::from(Arc::new(config))
});

/// Server name passed to the connector (unused: SNI is off, nothing verified)
pub fn partner_server_name() -> ServerName<'static> {
    ServerName::IpAddress(std::net::Ipv4Addr::LOCALHOST.into())
}

/// Accepts any partner certificate
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
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
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
