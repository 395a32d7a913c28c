//! Read-only view over a parsed CFDI document.
//!
//! The XML tree stays inside [`InvoiceDocument`]; callers get owned
//! [`Comprobante`] and [`TimbreFiscalDigital`] values whose attributes are
//! `Option<&str>` accessors, so nothing tied to the libxml tree outlives the
//! parse.
pub(crate) mod constants;

use constants::{CFDI_33_NS, CFDI_40_NS, COMPROBANTE_XPATH, TFD_NS, TIMBRE_XPATH};
use libxml::{
    parser::Parser,
    tree::{Document, Node},
    xpath,
};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Errors emitted while reading invoice XML.
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(String),
    #[error("XPath error: {0}")]
    XPath(String),
}

/// CFDI schema versions, in the order they are tried when locating the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfdiVersion {
    V33,
    V40,
}

impl CfdiVersion {
    pub const ALL: [CfdiVersion; 2] = [CfdiVersion::V33, CfdiVersion::V40];

    pub fn as_str(&self) -> &'static str {
        match self {
            CfdiVersion::V33 => "3.3",
            CfdiVersion::V40 => "4.0",
        }
    }

    pub fn namespace(&self) -> &'static str {
        match self {
            CfdiVersion::V33 => CFDI_33_NS,
            CfdiVersion::V40 => CFDI_40_NS,
        }
    }

    /// File name of the SAT template producing the main cadena original.
    pub fn template_name(&self) -> &'static str {
        match self {
            CfdiVersion::V33 => "cadenaoriginal_3_3.xslt",
            CfdiVersion::V40 => "cadenaoriginal_4_0.xslt",
        }
    }
}

impl fmt::Display for CfdiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`CfdiVersion`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported CFDI version: {input}")]
pub struct UnsupportedVersion {
    pub input: String,
}

impl FromStr for CfdiVersion {
    type Err = UnsupportedVersion;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "3.3" => Ok(CfdiVersion::V33),
            "4.0" => Ok(CfdiVersion::V40),
            other => Err(UnsupportedVersion {
                input: other.to_string(),
            }),
        }
    }
}

/// Anything that can answer attribute lookups by name.
///
/// Empty attribute values are reported as `None`.
pub trait AttributeSource {
    fn attribute(&self, name: &str) -> Option<String>;
}

/// Element located in an [`InvoiceDocument`].
pub struct XmlNode {
    node: Node,
}

impl AttributeSource for XmlNode {
    fn attribute(&self, name: &str) -> Option<String> {
        self.node.get_attribute(name).filter(|value| !value.is_empty())
    }
}

/// Parsed invoice, alive for a single validation call.
pub struct InvoiceDocument {
    document: Document,
}

impl InvoiceDocument {
    /// Parse invoice text. A document without a root element is rejected.
    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        let document = Parser::default()
            .parse_string(xml)
            .map_err(|e| XmlError::Parse(format!("{e:?}")))?;
        if document.get_root_element().is_none() {
            return Err(XmlError::Parse("document has no root element".into()));
        }
        Ok(Self { document })
    }

    /// First node matching `path`, with the given `(prefix, href)` bindings.
    pub fn find(
        &self,
        path: &str,
        namespaces: &[(&str, &str)],
    ) -> Result<Option<XmlNode>, XmlError> {
        let ctx = xpath::Context::new(&self.document)
            .map_err(|e| XmlError::XPath(format!("context error: {e:?}")))?;
        for (prefix, href) in namespaces {
            ctx.register_namespace(prefix, href)
                .map_err(|e| XmlError::XPath(format!("namespace {prefix}: {e:?}")))?;
        }
        let nodes = ctx
            .evaluate(path)
            .map_err(|e| XmlError::XPath(format!("{path}: {e:?}")))?
            .get_nodes_as_vec();
        Ok(nodes.into_iter().next().map(|node| XmlNode { node }))
    }

    /// Locate the Comprobante root, trying 3.3 before 4.0.
    pub fn comprobante(&self) -> Result<Option<Comprobante>, XmlError> {
        for version in CfdiVersion::ALL {
            if let Some(node) = self.find(COMPROBANTE_XPATH, &[("cfdi", version.namespace())])? {
                return Ok(Some(Comprobante::from_attributes(version, &node)));
            }
        }
        Ok(None)
    }

    pub fn timbre(&self) -> Result<Option<TimbreFiscalDigital>, XmlError> {
        Ok(self
            .find(TIMBRE_XPATH, &[("tfd", TFD_NS)])?
            .map(|node| TimbreFiscalDigital::from_attributes(&node)))
    }
}

/// Invoice root attributes needed for verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comprobante {
    schema: CfdiVersion,
    version: Option<String>,
    certificado: Option<String>,
    no_certificado: Option<String>,
}

impl Comprobante {
    pub fn from_attributes(schema: CfdiVersion, source: &impl AttributeSource) -> Self {
        Self {
            schema,
            version: source.attribute("Version"),
            certificado: source.attribute("Certificado"),
            no_certificado: source.attribute("NoCertificado"),
        }
    }

    /// Schema whose namespace matched the root element.
    pub fn schema(&self) -> CfdiVersion {
        self.schema
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Issuer certificate, base64 DER as declared by the issuer.
    pub fn certificado(&self) -> Option<&str> {
        self.certificado.as_deref()
    }

    pub fn no_certificado(&self) -> Option<&str> {
        self.no_certificado.as_deref()
    }
}

/// Certification stamp added by the certifying provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimbreFiscalDigital {
    version: Option<String>,
    uuid: Option<String>,
    fecha_timbrado: Option<String>,
    rfc_prov_certif: Option<String>,
    leyenda: Option<String>,
    sello_cfd: Option<String>,
    no_certificado_sat: Option<String>,
    sello_sat: Option<String>,
}

impl TimbreFiscalDigital {
    pub fn from_attributes(source: &impl AttributeSource) -> Self {
        Self {
            version: source.attribute("Version"),
            uuid: source.attribute("UUID"),
            fecha_timbrado: source.attribute("FechaTimbrado"),
            rfc_prov_certif: source.attribute("RfcProvCertif"),
            leyenda: source.attribute("Leyenda"),
            sello_cfd: source.attribute("SelloCFD"),
            no_certificado_sat: source.attribute("NoCertificadoSAT"),
            sello_sat: source.attribute("SelloSAT"),
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    pub fn fecha_timbrado(&self) -> Option<&str> {
        self.fecha_timbrado.as_deref()
    }

    pub fn rfc_prov_certif(&self) -> Option<&str> {
        self.rfc_prov_certif.as_deref()
    }

    pub fn leyenda(&self) -> Option<&str> {
        self.leyenda.as_deref()
    }

    /// Issuer signature copied into the stamp.
    pub fn sello_cfd(&self) -> Option<&str> {
        self.sello_cfd.as_deref()
    }

    /// Number of the SAT certificate that signed the stamp.
    pub fn no_certificado_sat(&self) -> Option<&str> {
        self.no_certificado_sat.as_deref()
    }

    pub fn sello_sat(&self) -> Option<&str> {
        self.sello_sat.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CFDI_40: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<cfdi:Comprobante xmlns:cfdi="http://www.sat.gob.mx/cfd/4" Version="4.0" NoCertificado="30001000000400002434" Certificado="">
  <cfdi:Complemento>
    <tfd:TimbreFiscalDigital xmlns:tfd="http://www.sat.gob.mx/TimbreFiscalDigital" Version="1.1" UUID="5b1f4c9e-3d2a-4f8b-9c71-0e6a2d8f4b13" Leyenda="Leyenda de prueba"/>
  </cfdi:Complemento>
</cfdi:Comprobante>"#;

    #[test]
    fn comprobante_falls_back_to_cfdi_40_namespace() {
        let doc = InvoiceDocument::parse(CFDI_40).expect("parse");
        let comprobante = doc.comprobante().expect("xpath").expect("comprobante");
        assert_eq!(comprobante.schema(), CfdiVersion::V40);
        assert_eq!(comprobante.version(), Some("4.0"));
        assert_eq!(comprobante.no_certificado(), Some("30001000000400002434"));
        assert_eq!(comprobante.certificado(), None, "empty attribute reads as missing");
    }

    #[test]
    fn timbre_exposes_optional_attributes() {
        let doc = InvoiceDocument::parse(CFDI_40).expect("parse");
        let timbre = doc.timbre().expect("xpath").expect("timbre");
        assert_eq!(timbre.version(), Some("1.1"));
        assert_eq!(timbre.leyenda(), Some("Leyenda de prueba"));
        assert_eq!(timbre.sello_cfd(), None);
        assert_eq!(timbre.sello_sat(), None);
    }

    #[test]
    fn unrelated_root_has_no_comprobante() {
        let doc = InvoiceDocument::parse(r#"<whatever doesntmatter="yes"></whatever>"#)
            .expect("parse");
        assert!(doc.comprobante().expect("xpath").is_none());
        assert!(doc.timbre().expect("xpath").is_none());
    }

    #[test]
    fn plain_text_is_not_a_document() {
        assert!(InvoiceDocument::parse("something wrong").is_err());
    }

    #[test]
    fn version_parsing_round_trips_known_values() {
        assert_eq!("3.3".parse::<CfdiVersion>(), Ok(CfdiVersion::V33));
        assert_eq!(" 4.0 ".parse::<CfdiVersion>(), Ok(CfdiVersion::V40));
        assert!("3.2".parse::<CfdiVersion>().is_err());
        assert_eq!(CfdiVersion::V40.template_name(), "cadenaoriginal_4_0.xslt");
    }
}
