use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use cfdi_core::{
    cadena::{CadenaTransformer, TransformError, cadena_original_cc_from_xml},
    certificate::{CertificateFetcher, FetchError},
    invoice::CfdiVersion,
};
use rsa::{
    RsaPrivateKey,
    pkcs1v15::SigningKey,
    pkcs8::EncodePublicKey,
    signature::{SignatureEncoding, Signer},
};
use sha2::Sha256;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Mutex, OnceLock},
    time::Duration,
};
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    der::{Decode, Encode},
    name::Name,
    serial_number::SerialNumber,
    spki::SubjectPublicKeyInfoOwned,
    time::Validity,
};

#[allow(dead_code)]
pub const ISSUER_SERIAL: &str = "20001000000300022779";
#[allow(dead_code)]
pub const SAT_SERIAL: &str = "00001000000505142236";
#[allow(dead_code)]
pub const STAMP_UUID: &str = "ad662d33-6934-459c-a128-bdf0393e0f44";

#[allow(dead_code)]
pub fn fixture_path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(relative)
}

#[allow(dead_code)]
pub fn fixture(relative: &str) -> String {
    std::fs::read_to_string(fixture_path(relative)).expect("read fixture")
}

#[allow(dead_code)]
pub fn issuer_certificate_b64() -> String {
    fixture("certificates/issuer-20001000000300022779.b64")
}

#[allow(dead_code)]
pub fn sello_cfd() -> String {
    fixture("signatures/sello-cfd.b64")
}

#[allow(dead_code)]
pub fn sello_sat_fixture() -> String {
    fixture("signatures/sello-sat.b64")
}

#[allow(dead_code)]
pub fn main_cadena() -> String {
    fixture("cadenas/cfdi33-cadena-original.txt")
}

/// Stamped CFDI 3.3 invoice with `sello_sat` as its SelloSAT attribute.
#[allow(dead_code)]
pub fn stamped_invoice_xml(sello_sat: &str) -> String {
    fixture("invoices/cfdi33-timbrado.xml").replace("{{SELLO_SAT}}", sello_sat)
}

/// Invoice whose SelloSAT is signed by the [`TestAuthority`].
#[allow(dead_code)]
pub fn stamped_invoice_signed_by_authority() -> String {
    let unsigned = stamped_invoice_xml("");
    let cadena = cadena_original_cc_from_xml(&unsigned).expect("stamp cadena");
    stamped_invoice_xml(&authority().sign_b64(&cadena))
}

/// Stand-in SAT key pair with a certificate numbered [`SAT_SERIAL`].
#[allow(dead_code)]
pub struct TestAuthority {
    signing_key: SigningKey<Sha256>,
    certificate_der: Vec<u8>,
}

#[allow(dead_code)]
impl TestAuthority {
    fn generate() -> Self {
        let private_key =
            RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("generate rsa key");
        let public_der = private_key
            .to_public_key()
            .to_public_key_der()
            .expect("public key der");
        let spki = SubjectPublicKeyInfoOwned::from_der(public_der.as_bytes()).expect("spki");
        let signing_key = SigningKey::<Sha256>::new(private_key);

        let serial_number = SerialNumber::new(SAT_SERIAL.as_bytes()).expect("serial");
        let validity = Validity::from_now(Duration::from_secs(3600)).expect("validity");
        let subject =
            Name::from_str("CN=AC de pruebas,O=Servicio de Administracion Tributaria,C=MX")
                .expect("subject");
        let builder = CertificateBuilder::new(
            Profile::Root,
            serial_number,
            validity,
            subject,
            spki,
            &signing_key,
        )
        .expect("builder");
        let certificate = builder
            .build::<rsa::pkcs1v15::Signature>()
            .expect("certificate");
        let certificate_der = certificate.to_der().expect("certificate der");

        Self {
            signing_key,
            certificate_der,
        }
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    /// PKCS#1 v1.5 / SHA-256 signature over `text`, base64 (172 chars).
    pub fn sign_b64(&self, text: &str) -> String {
        let signature = self.signing_key.sign(text.as_bytes());
        Base64::encode_string(&signature.to_bytes())
    }
}

#[allow(dead_code)]
pub fn authority() -> &'static TestAuthority {
    static AUTHORITY: OnceLock<TestAuthority> = OnceLock::new();
    AUTHORITY.get_or_init(TestAuthority::generate)
}

/// Returns a fixed cadena regardless of the invoice.
#[allow(dead_code)]
pub struct StubTransformer(pub String);

impl CadenaTransformer for StubTransformer {
    fn transform(&self, _version: CfdiVersion, _xml: &str) -> Result<String, TransformError> {
        Ok(self.0.clone())
    }
}

#[allow(dead_code)]
pub struct FailingTransformer;

impl CadenaTransformer for FailingTransformer {
    fn transform(&self, version: CfdiVersion, _xml: &str) -> Result<String, TransformError> {
        Err(TransformError::Failed(format!("no template for {version}")))
    }
}

#[allow(dead_code)]
pub enum Scripted {
    Body(Vec<u8>),
    Status(u16),
    Network(&'static str),
    Hang,
}

/// Fetcher answering from a URL map; unknown URLs get a 404.
#[allow(dead_code)]
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: HashMap<String, Scripted>,
    calls: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, url: &str, response: Scripted) -> Self {
        self.responses.insert(url.to_string(), response);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl CertificateFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().expect("calls lock").push(url.to_string());
        match self.responses.get(url) {
            Some(Scripted::Body(bytes)) => Ok(bytes.clone()),
            Some(Scripted::Status(code)) => Err(FetchError::Status(*code)),
            Some(Scripted::Network(message)) => Err(FetchError::Network((*message).to_string())),
            Some(Scripted::Hang) => {
                std::future::pending::<()>().await;
                Err(FetchError::Network("unreachable".into()))
            }
            None => Err(FetchError::Status(404)),
        }
    }
}
