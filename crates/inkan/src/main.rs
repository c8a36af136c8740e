//! inkan - private PKI manager.
//!
//! Provisions per-profile certificate authorities, issues leaf certificates
//! under them, and serves issuance over a mutually-authenticated gRPC + HTTP
//! endpoint.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use inkan_ca::{csr_for_key, setup_ca, Identity, SetupConfig, SigningRequest};
use inkan_pki::{DistinguishedName, KeyType, KeyUsages, SubjectAltName};
use inkan_server::{ServeConfig, Server};
use inkan_storage::{IssueDb, IssueState, ProfileStatus, Storage};
use rand::Rng;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "inkan")]
#[command(about = "Private PKI manager")]
#[command(version)]
struct Cli {
    /// Directory holding all profiles.
    #[arg(long, default_value = "/var/lib/inkan", global = true)]
    state_dir: PathBuf,

    /// Profile to operate on.
    #[arg(long, short = 'p', default_value = "default", global = true)]
    profile: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up a certificate authority for the profile
    Setup {
        /// Common name of the CA certificate
        #[arg(long)]
        cn: String,

        /// Organization of the CA certificate
        #[arg(long, default_value = "")]
        organization: String,

        /// Key type: ecdsa, ed25519, rsa or rsa-4096
        #[arg(long, default_value = "ecdsa")]
        key_type: String,

        /// CA validity in days
        #[arg(long, default_value_t = 3650)]
        days: i64,
    },

    /// Issue a certificate with a locally generated key
    Issue {
        /// Subject common name
        #[arg(long)]
        cn: String,

        /// DNS subject alternative names
        #[arg(long)]
        dns: Vec<String>,

        /// IP subject alternative names
        #[arg(long)]
        ip: Vec<std::net::IpAddr>,

        /// Email subject alternative names
        #[arg(long)]
        email: Vec<String>,

        /// Key usage preset: tlsServer, tlsClient, tlsClientServer or ca
        #[arg(long, conflicts_with_all = ["key_usage", "ext_key_usage"])]
        preset: Option<String>,

        /// Explicit base key usages
        #[arg(long)]
        key_usage: Vec<String>,

        /// Explicit extended key usages
        #[arg(long)]
        ext_key_usage: Vec<String>,

        /// Validity in days
        #[arg(long, default_value_t = 365)]
        days: i64,

        /// Key type: ecdsa, ed25519, rsa or rsa-4096
        #[arg(long, default_value = "ecdsa")]
        key_type: String,

        /// Where to write the issued certificate
        #[arg(long)]
        cert_out: PathBuf,

        /// Where to write the generated private key
        #[arg(long)]
        key_out: PathBuf,
    },

    /// List issued certificates, or profiles
    #[command(alias = "ls")]
    List {
        /// List profiles instead of certificates
        #[arg(long)]
        profiles: bool,
    },

    /// Serve issuance over TLS
    Serve {
        /// Listen address
        #[arg(long, default_value = "0.0.0.0:34680")]
        listen: SocketAddr,

        /// Enable bootstrap enrollment with a generated token
        #[arg(long)]
        bootstrap: bool,

        /// Bootstrap token; implies --bootstrap
        #[arg(long)]
        bootstrap_token: Option<String>,

        /// Shut the server down after this many seconds
        #[arg(long)]
        auto_shutdown_secs: Option<u64>,

        /// Permit this many issuances through POST /issue
        #[arg(long, default_value_t = 0)]
        issue_http: u32,

        /// Explicit SAN entries for the server certificate
        #[arg(long)]
        san: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let storage = Storage::open(&cli.state_dir);

    match cli.command {
        Commands::Setup {
            cn,
            organization,
            key_type,
            days,
        } => setup(&storage, &cli.profile, &cn, &organization, &key_type, days),

        Commands::Issue {
            cn,
            dns,
            ip,
            email,
            preset,
            key_usage,
            ext_key_usage,
            days,
            key_type,
            cert_out,
            key_out,
        } => issue(
            &storage,
            &cli.profile,
            IssueArgs {
                cn,
                dns,
                ip,
                email,
                preset,
                key_usage,
                ext_key_usage,
                days,
                key_type,
                cert_out,
                key_out,
            },
        ),

        Commands::List { profiles } => {
            if profiles {
                list_profiles(&storage)
            } else {
                list_certificates(&storage, &cli.profile)
            }
        }

        Commands::Serve {
            listen,
            bootstrap,
            bootstrap_token,
            auto_shutdown_secs,
            issue_http,
            san,
        } => {
            serve(
                storage,
                listen,
                bootstrap,
                bootstrap_token,
                auto_shutdown_secs,
                issue_http,
                san,
            )
            .await
        }
    }
}

fn setup(
    storage: &Storage,
    profile_name: &str,
    cn: &str,
    organization: &str,
    key_type: &str,
    days: i64,
) -> anyhow::Result<()> {
    let profile = storage.ensure_profile(profile_name)?;
    let cfg = SetupConfig {
        subject: DistinguishedName {
            common_name: cn.to_string(),
            organization: organization.to_string(),
            ..DistinguishedName::default()
        },
        key_type: key_type.parse::<KeyType>()?,
        validity_days: days,
    };
    setup_ca(&profile, &cfg, Utc::now())?;
    Ok(())
}

struct IssueArgs {
    cn: String,
    dns: Vec<String>,
    ip: Vec<std::net::IpAddr>,
    email: Vec<String>,
    preset: Option<String>,
    key_usage: Vec<String>,
    ext_key_usage: Vec<String>,
    days: i64,
    key_type: String,
    cert_out: PathBuf,
    key_out: PathBuf,
}

fn issue(storage: &Storage, profile_name: &str, args: IssueArgs) -> anyhow::Result<()> {
    let profile = storage
        .profile(profile_name)
        .with_context(|| format!("profile {profile_name:?}"))?;

    let mut names: Vec<SubjectAltName> =
        args.dns.into_iter().map(SubjectAltName::Dns).collect();
    names.extend(args.ip.into_iter().map(SubjectAltName::Ip));
    names.extend(args.email.into_iter().map(SubjectAltName::Email));

    let key_usages = if args.preset.is_none()
        && args.key_usage.is_empty()
        && args.ext_key_usage.is_empty()
    {
        KeyUsages::tls_client()
    } else {
        KeyUsages::from_spec(args.preset.as_deref(), &args.key_usage, &args.ext_key_usage)?
    };

    let key_pair = args.key_type.parse::<KeyType>()?.generate()?;
    let now = Utc::now();
    let request = SigningRequest {
        subject: DistinguishedName::with_common_name(&args.cn),
        names,
        key_usages,
        not_before: now,
        not_after: now + chrono::Duration::days(args.days),
        csr_pem: csr_for_key(&key_pair)?,
    };
    let identity = Identity::ClientCert {
        common_name: "local".to_string(),
    };
    let issued = inkan_ca::issue(&profile, &request, &identity, now)?;

    inkan_storage::write_file(&args.cert_out, &issued.certificate_pem)?;
    inkan_storage::write_key_file(&args.key_out, &key_pair.serialize_pem())?;
    info!(
        serial = issued.serial,
        cert = %args.cert_out.display(),
        key = %args.key_out.display(),
        "issued certificate"
    );
    Ok(())
}

fn list_profiles(storage: &Storage) -> anyhow::Result<()> {
    let now = Utc::now();
    for profile in storage.profiles()? {
        match profile.status(now) {
            Ok(status) => println!("{} {}", profile.name(), status),
            Err(e) => println!("{} error: {e}", profile.name()),
        }
    }
    Ok(())
}

fn list_certificates(storage: &Storage, profile_name: &str) -> anyhow::Result<()> {
    let profile = storage
        .profile(profile_name)
        .with_context(|| format!("profile {profile_name:?}"))?;

    let now = Utc::now();
    match profile.status(now)? {
        ProfileStatus::ValidCa => {}
        ProfileStatus::Expired { not_after } => {
            warn!(profile = %profile, not_after = %not_after, "CA certificate has expired");
        }
        ProfileStatus::NotCa => {
            info!(profile = %profile, "no valid CA profile found");
            return Ok(());
        }
    }

    let db = IssueDb::open(profile.issue_db_path());
    let entries = db.entries()?;

    println!("status   serial               notBefore  notAfter   subject");
    for entry in entries {
        match entry.state {
            IssueState::IssueInProgress => {
                println!("issueing {:>20}", entry.serial);
            }
            IssueState::ActiveCertificate => {
                let info = match entry.parse_certificate() {
                    Ok(cert) => format!(
                        "{} {} CN={}",
                        cert.not_before().format("%y/%m/%d"),
                        cert.not_after().format("%y/%m/%d"),
                        cert.subject()
                    ),
                    Err(e) => format!("error: failed to parse PEM: {e}"),
                };
                println!("active   {:>20} {info}", entry.serial);
            }
        }
    }
    Ok(())
}

async fn serve(
    storage: Storage,
    listen: SocketAddr,
    bootstrap: bool,
    bootstrap_token: Option<String>,
    auto_shutdown_secs: Option<u64>,
    issue_http: u32,
    san: Vec<String>,
) -> anyhow::Result<()> {
    let token = match bootstrap_token {
        Some(token) => Some(token),
        None if bootstrap => Some(generate_token()),
        None => None,
    };

    let names = san
        .iter()
        .map(|s| SubjectAltName::parse(s))
        .collect::<inkan_pki::Result<Vec<_>>>()?;

    let mut cfg = ServeConfig::new(listen)
        .with_issue_http(issue_http)
        .with_names(names);
    if let Some(token) = token {
        cfg = cfg.with_bootstrap_token(token);
    }
    if let Some(secs) = auto_shutdown_secs {
        cfg = cfg.with_auto_shutdown(Duration::from_secs(secs));
    }

    let server = Server::start(storage, cfg).await?;
    let closer = server.close_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            closer.close(None).await;
        }
    });
    server.wait().await?;
    Ok(())
}

/// 32 random bytes, hex-encoded.
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}
