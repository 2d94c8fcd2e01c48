//! zv: ZeroVault command-line client
//!
//! Commands:
//!   seal <file> [--password] [-o <out>]        - encrypt a file into an envelope
//!   link <id> <key> <filename> [--origin URL]  - build a capability fragment
//!   open <envelope> <fragment> [-o <path>]     - decrypt a downloaded envelope
//!
//! Envelopes never leave this machine unencrypted; the key part only ever
//! travels inside the link fragment.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use zv_crypto::{
    decrypt, decrypt_with_password, export_key, import_key, CapabilityLink, CryptoEnvelope,
    KdfParams, KeyPart, FALLBACK_FILENAME, PASSWORD_SENTINEL,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "zv",
    version,
    about = "ZeroVault client",
    long_about = "zv: seal files into encrypted envelopes and open them from capability links"
)]
struct Cli {
    /// PBKDF2 rounds for password mode (must match the sender; at least 100000)
    #[arg(long, env = "ZV_PBKDF2_ITERATIONS", global = true, hide = true)]
    pbkdf2_iterations: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file and print its key part and SHA-256
    Seal {
        /// File to encrypt
        file: PathBuf,
        /// Derive the key from a password instead of generating one
        #[arg(long)]
        password: bool,
        /// Envelope output path (default: <file>.zv)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Print the capability fragment for an uploaded envelope
    Link {
        /// File id returned by the upload
        id: String,
        /// Hex key printed by `seal`, or PASSWORD
        key: String,
        /// Name the recipient will save the file under
        filename: String,
        /// Print a full share URL for this origin instead of the bare fragment
        #[arg(long)]
        origin: Option<String>,
    },

    /// Decrypt a downloaded envelope using its capability link
    Open {
        /// Envelope file
        envelope: PathBuf,
        /// Fragment or full share URL
        fragment: String,
        /// Output path (default: the filename carried by the link)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Overwrite an existing output file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let params = match cli.pbkdf2_iterations {
        Some(n) => KdfParams::with_iterations(n)?,
        None => KdfParams::default(),
    };

    match cli.command {
        Commands::Seal {
            file,
            password,
            output,
        } => cmd_seal(&file, password, output.as_deref(), &params),
        Commands::Link {
            id,
            key,
            filename,
            origin,
        } => cmd_link(&id, &key, &filename, origin.as_deref()),
        Commands::Open {
            envelope,
            fragment,
            output,
            force,
        } => cmd_open(&envelope, &fragment, output.as_deref(), force, &params),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_env("ZV_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── seal ───────────────────────────────────────────────────────────────────────

struct Sealed {
    envelope: Vec<u8>,
    key: KeyPart,
    /// SHA-256 of the plaintext, for the upload's `hash` parameter
    digest: String,
}

fn seal(plaintext: &[u8], password: Option<&SecretString>, params: &KdfParams) -> Result<Sealed> {
    let env = CryptoEnvelope::new();
    let (envelope, key) = match password {
        Some(password) => (
            env.encrypt_with_password(plaintext, password, params)?,
            KeyPart::Password,
        ),
        None => {
            let key = env.generate_key();
            (
                env.encrypt(plaintext, &key, None)?,
                KeyPart::Key(export_key(&key)),
            )
        }
    };
    Ok(Sealed {
        envelope,
        key,
        digest: hex::encode(Sha256::digest(plaintext)),
    })
}

fn default_envelope_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".zv");
    PathBuf::from(name)
}

fn cmd_seal(
    file: &Path,
    password_mode: bool,
    output: Option<&Path>,
    params: &KdfParams,
) -> Result<()> {
    let plaintext =
        std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let password = if password_mode {
        Some(read_password(true)?)
    } else {
        None
    };

    let sealed = seal(&plaintext, password.as_ref(), params)?;
    let out = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_envelope_path(file));
    std::fs::write(&out, &sealed.envelope)
        .with_context(|| format!("writing {}", out.display()))?;
    tracing::debug!(bytes = sealed.envelope.len(), "envelope written");

    println!("envelope: {} ({} bytes)", out.display(), sealed.envelope.len());
    println!("key:      {}", sealed.key.as_str());
    println!("sha256:   {}", sealed.digest);
    Ok(())
}

// ── link ───────────────────────────────────────────────────────────────────────

fn parse_key_part(key: &str) -> Result<KeyPart> {
    if key == PASSWORD_SENTINEL {
        return Ok(KeyPart::Password);
    }
    import_key(key).context("key must be 64 hex characters or PASSWORD")?;
    Ok(KeyPart::Key(key.to_ascii_lowercase()))
}

fn link_fragment(id: &str, key: &str, filename: &str, origin: Option<&str>) -> Result<String> {
    let key = parse_key_part(key)?;
    let fragment = CapabilityLink::encode(id, &key, filename)?;
    match origin {
        Some(origin) => Ok(CapabilityLink::decode(&fragment)?.share_url(origin)?),
        None => Ok(fragment),
    }
}

fn cmd_link(id: &str, key: &str, filename: &str, origin: Option<&str>) -> Result<()> {
    println!("{}", link_fragment(id, key, filename, origin)?);
    Ok(())
}

// ── open ───────────────────────────────────────────────────────────────────────

fn open(
    envelope: &[u8],
    link: &CapabilityLink,
    params: &KdfParams,
    password: impl FnOnce() -> Result<SecretString>,
) -> Result<Vec<u8>> {
    let plaintext = match &link.key {
        KeyPart::Password => decrypt_with_password(envelope, &password()?, params)?,
        KeyPart::Key(hex) => decrypt(envelope, &import_key(hex)?, false)?,
    };
    Ok(plaintext)
}

/// Final path component of the decoded name; links cannot write outside
/// the working directory.
fn output_name(decoded: &str) -> &str {
    Path::new(decoded)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or(FALLBACK_FILENAME)
}

fn open_to_path(
    envelope_path: &Path,
    fragment: &str,
    output: Option<&Path>,
    force: bool,
    params: &KdfParams,
    password: impl FnOnce() -> Result<SecretString>,
) -> Result<PathBuf> {
    let link = CapabilityLink::decode(fragment)?;
    if link.filename_strategy.is_none() {
        tracing::warn!("link filename could not be decoded; using {FALLBACK_FILENAME}");
    }

    let out = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(output_name(&link.filename)));
    if out.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", out.display());
    }

    let envelope = std::fs::read(envelope_path)
        .with_context(|| format!("reading {}", envelope_path.display()))?;
    let plaintext = open(&envelope, &link, params, password)?;
    std::fs::write(&out, plaintext).with_context(|| format!("writing {}", out.display()))?;
    Ok(out)
}

fn cmd_open(
    envelope: &Path,
    fragment: &str,
    output: Option<&Path>,
    force: bool,
    params: &KdfParams,
) -> Result<()> {
    let out = open_to_path(envelope, fragment, output, force, params, || {
        read_password(false)
    })?;
    println!("wrote {}", out.display());
    Ok(())
}

// ── helpers ────────────────────────────────────────────────────────────────────

/// `ZV_PASSWORD` for scripted use, otherwise an interactive prompt.
fn read_password(confirm: bool) -> Result<SecretString> {
    let password = match std::env::var("ZV_PASSWORD") {
        Ok(p) => p,
        Err(_) => {
            let first = rpassword::prompt_password("Password: ").context("reading password")?;
            if confirm {
                let second = rpassword::prompt_password("Confirm password: ")
                    .context("reading password")?;
                if first != second {
                    bail!("passwords do not match");
                }
            }
            first
        }
    };
    if password.is_empty() {
        bail!("password must not be empty");
    }
    Ok(SecretString::from(password))
}
