//! Canonical strings ("cadenas originales") signed by issuers and by SAT.
use crate::{
    config::Config,
    invoice::{CfdiVersion, InvoiceDocument, TimbreFiscalDigital},
};
use std::{
    io::Write,
    path::PathBuf,
    process::{Command, Stdio},
};
use thiserror::Error;

/// Collapse every whitespace run to a single space and trim the ends.
pub fn sanitize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build the stamp cadena `||Version|UUID|FechaTimbrado|RfcProvCertif|[Leyenda|]SelloCFD|NoCertificadoSAT||`.
///
/// Returns `None` when the stamp is absent or any mandatory field is empty
/// after sanitizing. `Leyenda` is optional: when absent, or made only of
/// whitespace, it is left out of the cadena. A blank `Leyenda` therefore
/// does not reject the stamp the way a blank mandatory field does.
pub fn cadena_original_cc(timbre: Option<&TimbreFiscalDigital>) -> Option<String> {
    let timbre = timbre?;
    let clean = |value: Option<&str>| value.map(sanitize).filter(|v| !v.is_empty());

    let mut fields = Vec::with_capacity(7);
    fields.push(clean(timbre.version())?);
    fields.push(clean(timbre.uuid())?);
    fields.push(clean(timbre.fecha_timbrado())?);
    fields.push(clean(timbre.rfc_prov_certif())?);
    if let Some(leyenda) = clean(timbre.leyenda()) {
        fields.push(leyenda);
    }
    fields.push(clean(timbre.sello_cfd())?);
    fields.push(clean(timbre.no_certificado_sat())?);

    Some(format!("||{}||", fields.join("|")))
}

/// Parse `xml`, locate its stamp and canonicalize it.
pub fn cadena_original_cc_from_xml(xml: &str) -> Option<String> {
    if xml.trim().is_empty() {
        return None;
    }
    let doc = InvoiceDocument::parse(xml).ok()?;
    let timbre = doc.timbre().ok()?;
    cadena_original_cc(timbre.as_ref())
}

/// Errors produced while rendering the main cadena original.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("template not found: {0}")]
    MissingTemplate(PathBuf),
    #[error("failed to run xsltproc: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("xsltproc failed: {0}")]
    Failed(String),
    #[error("transform output is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Renders the main cadena original of an invoice.
pub trait CadenaTransformer: Send + Sync {
    fn transform(&self, version: CfdiVersion, xml: &str) -> Result<String, TransformError>;
}

/// Runs the SAT templates through the `xsltproc` binary.
#[derive(Debug, Clone)]
pub struct XsltprocTransformer {
    template_dir: PathBuf,
    program: PathBuf,
}

impl XsltprocTransformer {
    pub fn new(config: &Config) -> Self {
        Self {
            template_dir: config.template_dir().to_path_buf(),
            program: PathBuf::from("xsltproc"),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn template_path(&self, version: CfdiVersion) -> PathBuf {
        self.template_dir.join(version.template_name())
    }
}

impl CadenaTransformer for XsltprocTransformer {
    fn transform(&self, version: CfdiVersion, xml: &str) -> Result<String, TransformError> {
        let template = self.template_path(version);
        if !template.is_file() {
            return Err(TransformError::MissingTemplate(template));
        }

        let mut child = Command::new(&self.program)
            .arg(&template)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(xml.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(TransformError::Failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8(output.stdout)?)
    }
}
