//! atrest: at-rest file encryption CLI
//!
//! Commands:
//!   keygen --domain D --base-key-id B     - add a random base key to the key store
//!   encrypt <in> <out> --domain D         - write header(104) || ciphertext
//!   decrypt <in> <out> [--mode M]         - rebuild keys from the header and decrypt
//!   inspect <in> [--verify-header]        - print the encryption header as JSON
//!   config show                           - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use atrest_core::config::{expand_tilde, AtrestConfig};
use atrest_core::{AuthTokenMode, BaseKeyId, EncryptDomainId};
use atrest_crypto::{
    CipherKeyCache, Decryptor, EncryptionHeader, Encryptor, FileKeyStore, KeyResolver,
    ENCRYPT_HEADER_SIZE,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "atrest",
    version,
    about = "At-rest file encryption",
    long_about = "atrest: encrypt and decrypt files with keys derived from a local key store"
)]
struct Cli {
    /// Path to atrest.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "ATREST_CONFIG",
        default_value = "~/.config/atrest/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [logging] level
    #[arg(long, env = "ATREST_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides [logging] format
    #[arg(long, env = "ATREST_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Key store file (overrides [keystore] path)
    #[arg(long, env = "ATREST_KEYSTORE")]
    keystore: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a random 32-byte base key and append it to the key store
    Keygen {
        #[arg(long, allow_negative_numbers = true)]
        domain: EncryptDomainId,
        #[arg(long)]
        base_key_id: BaseKeyId,
    },

    /// Encrypt a file with the latest base key of a domain
    Encrypt {
        input: PathBuf,
        output: PathBuf,
        /// Domain of the payload key
        #[arg(long, allow_negative_numbers = true)]
        domain: EncryptDomainId,
        /// Domain of the header key (default: [cipher] header_domain_id, then --domain)
        #[arg(long, allow_negative_numbers = true)]
        header_domain: Option<EncryptDomainId>,
        /// Auth token mode (default: [cipher] auth_token_mode)
        #[arg(long)]
        mode: Option<AuthTokenMode>,
    },

    /// Decrypt a file produced by `atrest encrypt`
    Decrypt {
        input: PathBuf,
        output: PathBuf,
        /// Auth token mode the file must carry (default: [cipher] auth_token_mode)
        #[arg(long)]
        mode: Option<AuthTokenMode>,
    },

    /// Print the encryption header of a file
    Inspect {
        input: PathBuf,
        /// Also verify the header auth token (multi-token headers only)
        #[arg(long)]
        verify_header: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = AtrestConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = match &cli.log_format {
        Some(format) => format.clone(),
        None => LogFormat::from_str(&config.logging.format, true)
            .map_err(|e| anyhow::anyhow!("invalid [logging] format: {e}"))?,
    };
    init_logging(&level, &format);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "atrest starting"
    );

    let keystore_path = cli
        .keystore
        .clone()
        .unwrap_or_else(|| expand_tilde(&config.keystore.path));

    match cli.command {
        Commands::Keygen {
            domain,
            base_key_id,
        } => cmd_keygen(&keystore_path, domain, base_key_id),
        Commands::Encrypt {
            input,
            output,
            domain,
            header_domain,
            mode,
        } => cmd_encrypt(
            &config,
            &keystore_path,
            &input,
            &output,
            domain,
            header_domain,
            mode,
        ),
        Commands::Decrypt {
            input,
            output,
            mode,
        } => cmd_decrypt(&config, &keystore_path, &input, &output, mode),
        Commands::Inspect {
            input,
            verify_header,
        } => cmd_inspect(&keystore_path, &input, verify_header),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn open_resolver(keystore_path: &Path) -> Result<KeyResolver<FileKeyStore>> {
    let store = FileKeyStore::open(keystore_path)
        .with_context(|| format!("opening key store: {}", keystore_path.display()))?;
    if store.is_empty() {
        anyhow::bail!(
            "key store {} has no keys\n\
             Create one with: atrest keygen --domain <id> --base-key-id <id>",
            keystore_path.display()
        );
    }
    Ok(KeyResolver::new(Arc::new(CipherKeyCache::new()), store))
}

fn read_blob(path: &Path) -> Result<(EncryptionHeader, Vec<u8>)> {
    let mut blob =
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if blob.len() < ENCRYPT_HEADER_SIZE {
        anyhow::bail!(
            "{} is too short to hold an encryption header ({} bytes)",
            path.display(),
            blob.len()
        );
    }
    let ciphertext = blob.split_off(ENCRYPT_HEADER_SIZE);
    let header = EncryptionHeader::from_bytes(&blob)
        .with_context(|| format!("parsing encryption header of {}", path.display()))?;
    Ok((header, ciphertext))
}

// ── `atrest keygen` ───────────────────────────────────────────────────────────

fn cmd_keygen(keystore_path: &Path, domain: EncryptDomainId, base_key_id: BaseKeyId) -> Result<()> {
    atrest_crypto::generate_key(keystore_path, domain, base_key_id)
        .with_context(|| format!("generating key in {}", keystore_path.display()))?;
    println!(
        "added base key {base_key_id} for domain {domain} to {}",
        keystore_path.display()
    );
    Ok(())
}

// ── `atrest encrypt` ──────────────────────────────────────────────────────────

fn cmd_encrypt(
    config: &AtrestConfig,
    keystore_path: &Path,
    input: &Path,
    output: &Path,
    domain: EncryptDomainId,
    header_domain: Option<EncryptDomainId>,
    mode: Option<AuthTokenMode>,
) -> Result<()> {
    let resolver = open_resolver(keystore_path)?;
    let header_domain = header_domain
        .or(config.cipher.header_domain_id)
        .unwrap_or(domain);
    let mode = mode.unwrap_or(config.cipher.auth_token_mode);

    let text_key = resolver
        .latest_cipher_key(domain)
        .with_context(|| format!("resolving key for domain {domain}"))?;
    let header_key = resolver
        .latest_cipher_key(header_domain)
        .with_context(|| format!("resolving header key for domain {header_domain}"))?;

    let plaintext =
        std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let (ciphertext, header) = Encryptor::with_random_iv(text_key, header_key, mode)
        .encrypt(&plaintext)
        .context("encrypting")?;

    let mut blob = Vec::with_capacity(ENCRYPT_HEADER_SIZE + ciphertext.logical_size());
    blob.extend_from_slice(&header.to_bytes());
    blob.extend_from_slice(ciphertext.as_slice());
    std::fs::write(output, &blob).with_context(|| format!("writing {}", output.display()))?;

    resolver.cache().cleanup();
    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        bytes = plaintext.len(),
        domain,
        header_domain,
        %mode,
        "encrypted"
    );
    Ok(())
}

// ── `atrest decrypt` ──────────────────────────────────────────────────────────

fn cmd_decrypt(
    config: &AtrestConfig,
    keystore_path: &Path,
    input: &Path,
    output: &Path,
    mode: Option<AuthTokenMode>,
) -> Result<()> {
    let (header, ciphertext) = read_blob(input)?;
    let resolver = open_resolver(keystore_path)?;
    let (text_key, header_key) = resolver
        .cipher_keys_for_header(&header)
        .context("resolving keys named by the header")?;

    let mut decryptor = Decryptor::for_header(text_key, header_key, &header);
    if config.cipher.require_auth_token {
        decryptor =
            decryptor.require_auth_token_mode(mode.unwrap_or(config.cipher.auth_token_mode));
    }
    let plaintext = decryptor
        .decrypt(&ciphertext, &header)
        .with_context(|| format!("decrypting {}", input.display()))?;

    std::fs::write(output, plaintext.as_slice())
        .with_context(|| format!("writing {}", output.display()))?;

    resolver.cache().cleanup();
    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        bytes = plaintext.logical_size(),
        "decrypted"
    );
    Ok(())
}

// ── `atrest inspect` ──────────────────────────────────────────────────────────

fn cmd_inspect(keystore_path: &Path, input: &Path, verify_header: bool) -> Result<()> {
    let (header, _) = read_blob(input)?;
    let rendered = serde_json::to_string_pretty(&header.summary())
        .context("serializing header summary")?;
    println!("{rendered}");

    if !verify_header {
        return Ok(());
    }

    let resolver = open_resolver(keystore_path)?;
    let (text_key, header_key) = resolver
        .cipher_keys_for_header(&header)
        .context("resolving keys named by the header")?;
    let mut decryptor = Decryptor::for_header(text_key, header_key, &header);
    decryptor
        .verify_header_auth_token(&header)
        .context("verifying header")?;
    resolver.cache().cleanup();

    match header.auth_token_mode() {
        AuthTokenMode::Multi => println!("header auth token: ok"),
        mode => println!("header metadata: ok (auth token mode {mode} has no standalone header token)"),
    }
    Ok(())
}

// ── `atrest config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &AtrestConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
