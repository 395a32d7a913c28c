use anyhow::{Context, Result, bail};
use cfdi_core::{
    cadena::cadena_original_cc_from_xml,
    certificate::CertificateResolver,
    config::Config,
    validation::Validator,
    verify::digest_hex,
};
use clap::{Parser, Subcommand};
use std::{fs, io::Write, path::PathBuf, process::ExitCode};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cfdi")]
#[command(about = "Verify SAT stamps and signatures of CFDI invoices")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate both signatures and print the result as JSON.
    Validate {
        #[arg(long)]
        invoice: PathBuf,
        /// DER certificate of the SAT; downloaded when omitted.
        #[arg(long)]
        sat_cert: Option<PathBuf>,
    },
    /// Print the cadena original of the TimbreFiscalDigital.
    CadenaCc {
        #[arg(long)]
        invoice: PathBuf,
    },
    /// Download a SAT certificate by its 20-digit number.
    FetchCert {
        #[arg(long)]
        id: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// SHA-256 of a string, hex encoded.
    Digest {
        #[arg(long)]
        text: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Validate { invoice, sat_cert } => {
            let xml = fs::read_to_string(&invoice)
                .with_context(|| format!("reading {}", invoice.display()))?;
            let sat_cert = sat_cert
                .map(|path| {
                    fs::read(&path).with_context(|| format!("reading {}", path.display()))
                })
                .transpose()?;

            let validator = Validator::from_config(&config)?;
            let result = validator.validate(&xml, sat_cert.as_deref()).await;
            println!("{}", result.to_json_pretty()?);
            if !result.valid() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::CadenaCc { invoice } => {
            let xml = fs::read_to_string(&invoice)
                .with_context(|| format!("reading {}", invoice.display()))?;
            let Some(cadena) = cadena_original_cc_from_xml(&xml) else {
                bail!("{} has no complete TimbreFiscalDigital", invoice.display());
            };
            println!("{cadena}");
        }
        Commands::FetchCert { id, out } => {
            let resolver = CertificateResolver::with_defaults(&config)?;
            let der = resolver.resolve(&id).await?;
            match out {
                Some(path) => {
                    fs::write(&path, &der)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("{} bytes written to {}", der.len(), path.display());
                }
                None => std::io::stdout().write_all(&der)?,
            }
        }
        Commands::Digest { text } => {
            println!("{}", digest_hex(&text));
        }
    }

    Ok(ExitCode::SUCCESS)
}
