//! Verification of Mexican CFDI invoices (versions 3.3 and 4.0).
//!
//! Rebuilds the cadena original of the TimbreFiscalDigital, resolves the SAT
//! certificate that signed it and checks both the issuer and SAT signatures.
//!
//! # Examples
//! ```rust
//! use cfdi_core::cadena::cadena_original_cc_from_xml;
//!
//! assert_eq!(cadena_original_cc_from_xml("<root/>"), None);
//! ```
pub mod cadena;
pub mod certificate;
pub mod config;
pub mod invoice;
pub mod validation;
pub mod verify;

use thiserror::Error;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Xml(#[from] invoice::XmlError),
    #[error(transparent)]
    Version(#[from] invoice::UnsupportedVersion),
    #[error(transparent)]
    Transform(#[from] cadena::TransformError),
    #[error(transparent)]
    Fetch(#[from] certificate::FetchError),
    #[error(transparent)]
    Resolve(#[from] certificate::ResolveError),
    #[error(transparent)]
    Verify(#[from] verify::VerifyError),
    #[error(transparent)]
    Validation(#[from] validation::ValidationError),
}
