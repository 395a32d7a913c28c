//! Invoice validation pipeline.
//!
//! [`Validator::validate`] walks an invoice through the stages of [`Stage`],
//! stopping at the first failed guard. The returned [`ValidationResult`]
//! keeps every field computed up to that point.
use crate::{
    cadena::{
        CadenaTransformer, XsltprocTransformer, cadena_original_cc, cadena_original_cc_from_xml,
    },
    certificate::{CertificateResolver, FetchError},
    config::Config,
    invoice::{Comprobante, InvoiceDocument, TimbreFiscalDigital},
    verify::{CertificateEncoding, Verifier, certificate_serial, digest_hex, strip_whitespace},
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::{debug, warn};

/// Message set when the invoice lacks a signature or the issuer certificate.
/// Validation still runs both checks.
pub const MISSING_SIGNATURES_MESSAGE: &str = "Factura no contiene certificados correctos";

/// Pipeline progress, in order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    #[default]
    Start,
    Parsed,
    ComprobanteFound,
    StampFound,
    CadenasBuilt,
    Checked,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Comprobante,
    Timbre,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Comprobante => f.write_str("nodo Comprobante"),
            NodeKind::Timbre => f.write_str("Timbre Fiscal Digital"),
        }
    }
}

/// Guard failures. `Display` is the message reported in the result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Factura o certificado inexistente")]
    InputMissing,
    #[error("Factura no pudo ser leída")]
    DocumentUnreadable,
    #[error("Factura no contiene {0}")]
    SchemaNodeMissing(NodeKind),
    #[error("Certificado SAT no pudo ser obtenido: {0}")]
    CertificateUnavailable(String),
}

/// One canonical string with its digest and the certificate numbers around it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CadenaReport {
    cadena: String,
    sha: String,
    certificado_usado: String,
    certificado_reportado: String,
}

impl CadenaReport {
    pub fn cadena(&self) -> &str {
        &self.cadena
    }

    /// Lowercase hex SHA-256 of [`CadenaReport::cadena`].
    pub fn sha(&self) -> &str {
        &self.sha
    }

    pub fn certificado_usado(&self) -> &str {
        &self.certificado_usado
    }

    pub fn certificado_reportado(&self) -> &str {
        &self.certificado_reportado
    }
}

/// Outcome of a validation run. Every field is always present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    valid: bool,
    message: Option<String>,
    version: String,
    uuid: String,
    #[serde(rename = "selloCFD")]
    sello_cfd: String,
    #[serde(rename = "selloSAT")]
    sello_sat: String,
    #[serde(rename = "cadenaOriginal")]
    cadena_original: CadenaReport,
    #[serde(rename = "cadenaOriginalCC")]
    cadena_original_cc: CadenaReport,
    #[serde(rename = "validaSelloEmisorResult")]
    valida_sello_emisor_result: bool,
    #[serde(rename = "validaSelloSATResult")]
    valida_sello_sat_result: bool,
    #[serde(skip)]
    stage: Stage,
    #[serde(skip)]
    halted: bool,
}

impl ValidationResult {
    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// `Version` of the Comprobante.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Stamp UUID, upper-cased.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn sello_cfd(&self) -> &str {
        &self.sello_cfd
    }

    pub fn sello_sat(&self) -> &str {
        &self.sello_sat
    }

    pub fn cadena_original(&self) -> &CadenaReport {
        &self.cadena_original
    }

    pub fn cadena_original_cc(&self) -> &CadenaReport {
        &self.cadena_original_cc
    }

    pub fn valida_sello_emisor_result(&self) -> bool {
        self.valida_sello_emisor_result
    }

    pub fn valida_sello_sat_result(&self) -> bool {
        self.valida_sello_sat_result
    }

    /// Last stage reached. After a guard failure this is the stage the
    /// pipeline stopped at; pair it with [`ValidationResult::halted`].
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Whether a guard stopped the pipeline before the signature checks.
    /// A missing-signature soft fail still reaches [`Stage::Done`] and is not
    /// a halt.
    pub fn halted(&self) -> bool {
        self.halted
    }

    /// # Errors
    /// Returns the serializer error; not expected for this type.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn advance(&mut self, stage: Stage) {
        debug!(?stage, "validation stage reached");
        self.stage = stage;
    }

    fn fail(mut self, error: ValidationError) -> Self {
        debug!(stage = ?self.stage, %error, "validation failed");
        self.valid = false;
        self.halted = true;
        self.message = Some(error.to_string());
        self
    }
}

struct Composed {
    comprobante: Comprobante,
    timbre: TimbreFiscalDigital,
    sat_certificate: Vec<u8>,
}

/// Validates invoices against their issuer and SAT signatures.
#[derive(Clone)]
pub struct Validator {
    transformer: Arc<dyn CadenaTransformer>,
    resolver: CertificateResolver,
    verifier: Verifier,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("resolver", &self.resolver)
            .field("verifier", &self.verifier)
            .finish_non_exhaustive()
    }
}

impl Validator {
    pub fn new(
        transformer: Arc<dyn CadenaTransformer>,
        resolver: CertificateResolver,
        verifier: Verifier,
    ) -> Self {
        Self {
            transformer,
            resolver,
            verifier,
        }
    }

    /// `xsltproc` transforms, HTTP resolution with an in-memory cache and
    /// the RSA verifier.
    ///
    /// # Errors
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        Ok(Self::new(
            Arc::new(XsltprocTransformer::new(config)),
            CertificateResolver::with_defaults(config)?,
            Verifier::default(),
        ))
    }

    /// Run the whole pipeline. Never fails; problems are reported in the
    /// result's `message`.
    ///
    /// `sat_certificate` is the DER certificate that signed the stamp. When
    /// absent it is resolved from the stamp's `NoCertificadoSAT`.
    pub async fn validate(
        &self,
        invoice: &str,
        sat_certificate: Option<&[u8]>,
    ) -> ValidationResult {
        let mut result = ValidationResult::default();
        let composed = match self.compose(invoice, sat_certificate, &mut result).await {
            Ok(composed) => composed,
            Err(error) => return result.fail(error),
        };

        let emisor = self.verifier.verify(
            result.cadena_original.cadena(),
            strip_whitespace(composed.comprobante.certificado().unwrap_or_default()).as_bytes(),
            CertificateEncoding::Base64Der,
            composed.timbre.sello_cfd().unwrap_or_default(),
        );
        let sat = self.verifier.verify(
            result.cadena_original_cc.cadena(),
            &composed.sat_certificate,
            CertificateEncoding::RawDer,
            composed.timbre.sello_sat().unwrap_or_default(),
        );
        result.valida_sello_emisor_result = emisor;
        result.valida_sello_sat_result = sat;
        result.advance(Stage::Checked);

        result.valid = emisor && sat;
        result.advance(Stage::Done);
        result
    }

    /// Compose the result fields without checking signatures.
    pub async fn read(&self, invoice: &str, sat_certificate: Option<&[u8]>) -> ValidationResult {
        let mut result = ValidationResult::default();
        match self.compose(invoice, sat_certificate, &mut result).await {
            Ok(_) => result,
            Err(error) => result.fail(error),
        }
    }

    /// Check the issuer signature of `invoice` with a base64 certificate.
    pub fn valida_sello_emisor(&self, invoice: &str, certificado: &str, sello: &str) -> bool {
        if invoice.trim().is_empty() || certificado.trim().is_empty() || sello.trim().is_empty() {
            return false;
        }
        let schema = match InvoiceDocument::parse(invoice).and_then(|doc| doc.comprobante()) {
            Ok(Some(comprobante)) => comprobante.schema(),
            _ => return false,
        };
        let cadena = match self.transformer.transform(schema, invoice) {
            Ok(cadena) => cadena,
            Err(error) => {
                warn!(%error, "cadena original could not be generated");
                return false;
            }
        };
        self.verifier.verify(
            &cadena,
            strip_whitespace(certificado).as_bytes(),
            CertificateEncoding::Base64Der,
            sello,
        )
    }

    /// Check the SAT signature of `invoice` with a DER certificate.
    pub fn valida_sello_sat(&self, invoice: &str, certificado_sat: &[u8], sello: &str) -> bool {
        if certificado_sat.is_empty() || sello.trim().is_empty() {
            return false;
        }
        match cadena_original_cc_from_xml(invoice) {
            Some(cadena) => {
                self.verifier
                    .verify(&cadena, certificado_sat, CertificateEncoding::RawDer, sello)
            }
            None => false,
        }
    }

    async fn compose(
        &self,
        invoice: &str,
        sat_certificate: Option<&[u8]>,
        result: &mut ValidationResult,
    ) -> Result<Composed, ValidationError> {
        if invoice.trim().is_empty() {
            return Err(ValidationError::InputMissing);
        }
        let (comprobante, timbre) = read_nodes(invoice, result)?;

        let sat_certificate = match sat_certificate.filter(|bytes| !bytes.is_empty()) {
            Some(bytes) => bytes.to_vec(),
            None => {
                let id = timbre.no_certificado_sat().unwrap_or_default();
                self.resolver
                    .resolve(id)
                    .await
                    .map_err(|e| ValidationError::CertificateUnavailable(e.to_string()))?
            }
        };

        let cadena = match self.transformer.transform(comprobante.schema(), invoice) {
            Ok(cadena) => cadena,
            Err(error) => {
                warn!(
                    schema = %comprobante.schema(),
                    %error,
                    "cadena original could not be generated"
                );
                String::new()
            }
        };
        let issuer_serial = comprobante
            .certificado()
            .and_then(|cert| {
                let cert = strip_whitespace(cert);
                certificate_serial(cert.as_bytes(), CertificateEncoding::Base64Der)
            })
            .unwrap_or_default();
        result.cadena_original = CadenaReport {
            sha: digest_hex(&cadena),
            cadena,
            certificado_usado: comprobante.no_certificado().unwrap_or_default().to_string(),
            certificado_reportado: issuer_serial,
        };

        let cadena_cc = cadena_original_cc(Some(&timbre)).unwrap_or_default();
        result.cadena_original_cc = CadenaReport {
            sha: digest_hex(&cadena_cc),
            cadena: cadena_cc,
            certificado_usado: certificate_serial(&sat_certificate, CertificateEncoding::RawDer)
                .unwrap_or_default(),
            certificado_reportado: timbre.no_certificado_sat().unwrap_or_default().to_string(),
        };
        result.advance(Stage::CadenasBuilt);

        if comprobante.certificado().is_none()
            || timbre.sello_cfd().is_none()
            || timbre.sello_sat().is_none()
        {
            result.message = Some(MISSING_SIGNATURES_MESSAGE.to_string());
        }

        Ok(Composed {
            comprobante,
            timbre,
            sat_certificate,
        })
    }
}

/// Parse and extract the nodes; the libxml document is dropped on return.
fn read_nodes(
    invoice: &str,
    result: &mut ValidationResult,
) -> Result<(Comprobante, TimbreFiscalDigital), ValidationError> {
    let doc = InvoiceDocument::parse(invoice).map_err(|error| {
        debug!(%error, "invoice could not be parsed");
        ValidationError::DocumentUnreadable
    })?;
    result.advance(Stage::Parsed);

    let comprobante = doc
        .comprobante()
        .ok()
        .flatten()
        .ok_or(ValidationError::SchemaNodeMissing(NodeKind::Comprobante))?;
    result.version = comprobante.version().unwrap_or_default().to_string();
    result.advance(Stage::ComprobanteFound);

    let timbre = doc
        .timbre()
        .ok()
        .flatten()
        .ok_or(ValidationError::SchemaNodeMissing(NodeKind::Timbre))?;
    result.uuid = timbre.uuid().unwrap_or_default().to_uppercase();
    result.sello_cfd = timbre.sello_cfd().unwrap_or_default().to_string();
    result.sello_sat = timbre.sello_sat().unwrap_or_default().to_string();
    result.advance(Stage::StampFound);

    Ok((comprobante, timbre))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_messages() {
        assert_eq!(
            ValidationError::InputMissing.to_string(),
            "Factura o certificado inexistente"
        );
        assert_eq!(
            ValidationError::DocumentUnreadable.to_string(),
            "Factura no pudo ser leída"
        );
        assert_eq!(
            ValidationError::SchemaNodeMissing(NodeKind::Comprobante).to_string(),
            "Factura no contiene nodo Comprobante"
        );
        assert_eq!(
            ValidationError::SchemaNodeMissing(NodeKind::Timbre).to_string(),
            "Factura no contiene Timbre Fiscal Digital"
        );
        assert_eq!(
            ValidationError::CertificateUnavailable("timeout".into()).to_string(),
            "Certificado SAT no pudo ser obtenido: timeout"
        );
    }

    #[test]
    fn default_result_serializes_every_field() {
        let json = serde_json::to_value(ValidationResult::default()).expect("json");
        let object = json.as_object().expect("object");
        for key in [
            "valid",
            "message",
            "version",
            "uuid",
            "selloCFD",
            "selloSAT",
            "cadenaOriginal",
            "cadenaOriginalCC",
            "validaSelloEmisorResult",
            "validaSelloSATResult",
        ] {
            assert!(object.contains_key(key), "missing {key}");
        }
        assert!(!object.contains_key("stage"));
        assert!(!object.contains_key("halted"));
        assert!(json["message"].is_null());
        assert_eq!(json["cadenaOriginalCC"]["certificadoReportado"], "");
    }

    #[test]
    fn nodes_are_read_in_order() {
        let mut result = ValidationResult::default();
        let err = read_nodes(r#"<whatever doesntmatter="yes"></whatever>"#, &mut result)
            .expect_err("no comprobante");
        assert_eq!(err, ValidationError::SchemaNodeMissing(NodeKind::Comprobante));
        assert_eq!(result.stage(), Stage::Parsed);
    }
}
