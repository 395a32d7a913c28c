//! Digests and RSA signature checks over cadenas originales.
use base64ct::{Base64, Encoding};
use rsa::{pkcs8::DecodePublicKey, Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::debug;
use x509_cert::{
    der::{Decode, Encode},
    Certificate,
};

/// Accepted base64 lengths for a signature: RSA-2048 and RSA-1024.
pub const SIGNATURE_B64_LENGTHS: [usize; 2] = [344, 172];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("signature has invalid base64 length {0}")]
    SignatureLengthInvalid(usize),
    #[error("nothing to verify: cadena is empty")]
    MissingCadena,
    #[error("signature is not valid base64: {0}")]
    SignatureDecode(String),
    #[error("certificate could not be decoded: {0}")]
    CertificateMalformed(String),
    #[error("signature does not match")]
    SignatureVerificationFailed,
}

/// How certificate bytes handed to the verifier are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateEncoding {
    /// Base64 text of the DER certificate, as in `Comprobante/@Certificado`.
    Base64Der,
    /// DER bytes, as downloaded from the SAT repository.
    RawDer,
}

pub fn digest(text: &str) -> [u8; 32] {
    Sha256::digest(text.as_bytes()).into()
}

pub fn digest_hex(text: &str) -> String {
    hex::encode(digest(text))
}

/// Drop every whitespace character, including ones inside the text.
pub fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn decode_certificate(
    bytes: &[u8],
    encoding: CertificateEncoding,
) -> Result<Certificate, VerifyError> {
    let der = match encoding {
        CertificateEncoding::RawDer => bytes.to_vec(),
        CertificateEncoding::Base64Der => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| VerifyError::CertificateMalformed(format!("not UTF-8: {e}")))?;
            Base64::decode_vec(&strip_whitespace(text))
                .map_err(|e| VerifyError::CertificateMalformed(format!("base64: {e}")))?
        }
    };
    Certificate::from_der(&der).map_err(|e| VerifyError::CertificateMalformed(format!("{e}")))
}

/// DER-encoded SubjectPublicKeyInfo of the certificate.
pub fn extract_public_key(
    bytes: &[u8],
    encoding: CertificateEncoding,
) -> Result<Vec<u8>, VerifyError> {
    let cert = decode_certificate(bytes, encoding)?;
    cert.tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| VerifyError::CertificateMalformed(format!("public key: {e}")))
}

/// SAT serials are ASCII digits stored as bytes; the hex form interleaves a
/// `3` before every digit. Keep the characters at odd indexes.
pub fn clean_serial_number(raw: &str) -> String {
    raw.chars().skip(1).step_by(2).collect()
}

/// Cleaned serial number of a certificate, `None` when it cannot be decoded.
pub fn certificate_serial(bytes: &[u8], encoding: CertificateEncoding) -> Option<String> {
    let cert = decode_certificate(bytes, encoding).ok()?;
    let raw = hex::encode(cert.tbs_certificate.serial_number.as_bytes());
    Some(clean_serial_number(&raw))
}

/// Verifies a signature over an already computed SHA-256 digest.
pub trait SignatureBackend: Send + Sync {
    fn verify_prehashed(
        &self,
        spki_der: &[u8],
        digest: &[u8],
        signature: &[u8],
    ) -> Result<(), VerifyError>;
}

/// RSASSA-PKCS1-v1_5 with SHA-256.
#[derive(Debug, Default, Clone, Copy)]
pub struct RsaPkcs1v15Sha256;

impl SignatureBackend for RsaPkcs1v15Sha256 {
    fn verify_prehashed(
        &self,
        spki_der: &[u8],
        digest: &[u8],
        signature: &[u8],
    ) -> Result<(), VerifyError> {
        let key = RsaPublicKey::from_public_key_der(spki_der)
            .map_err(|e| VerifyError::CertificateMalformed(format!("RSA key: {e}")))?;
        key.verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature)
            .map_err(|_| VerifyError::SignatureVerificationFailed)
    }
}

#[derive(Clone)]
pub struct Verifier {
    backend: Arc<dyn SignatureBackend>,
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier").finish_non_exhaustive()
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(Arc::new(RsaPkcs1v15Sha256))
    }
}

impl Verifier {
    pub fn new(backend: Arc<dyn SignatureBackend>) -> Self {
        Self { backend }
    }

    /// Check `signature_b64` over `cadena` with the key of `certificate`.
    ///
    /// The signature length is checked before the certificate is touched.
    ///
    /// # Errors
    /// Returns the first [`VerifyError`] encountered.
    pub fn check(
        &self,
        cadena: &str,
        certificate: &[u8],
        encoding: CertificateEncoding,
        signature_b64: &str,
    ) -> Result<(), VerifyError> {
        let signature_b64 = strip_whitespace(signature_b64);
        if !SIGNATURE_B64_LENGTHS.contains(&signature_b64.len()) {
            return Err(VerifyError::SignatureLengthInvalid(signature_b64.len()));
        }
        if cadena.is_empty() {
            return Err(VerifyError::MissingCadena);
        }
        let signature = Base64::decode_vec(&signature_b64)
            .map_err(|e| VerifyError::SignatureDecode(format!("{e}")))?;
        let spki = extract_public_key(certificate, encoding)?;
        self.backend.verify_prehashed(&spki, &digest(cadena), &signature)
    }

    /// Same as [`Verifier::check`], collapsing every failure to `false`.
    pub fn verify(
        &self,
        cadena: &str,
        certificate: &[u8],
        encoding: CertificateEncoding,
        signature_b64: &str,
    ) -> bool {
        match self.check(cadena, certificate, encoding, signature_b64) {
            Ok(()) => true,
            Err(error) => {
                debug!(%error, "signature check failed");
                false
            }
        }
    }
}
