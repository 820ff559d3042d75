//! `VeilDB` CLI tool for key generation and file encryption.

#![warn(clippy::pedantic, clippy::nursery)]

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use veildb::backend::Backend;
use veildb::error::KeyProviderError;
use veildb::file::EncryptedFile;
use veildb::key::SymmetricKey;
use veildb::key_provider::{KeyProvider, StringProvider};
use veildb::stream::DEFAULT_CHUNK_SIZE;
use veildb::vault::Vault;
use veildb_key_file::FileKeyProvider;

#[derive(Parser)]
#[command(name = "veildb")]
#[command(about = "VeilDB key generation and file encryption", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new master key
    Keygen {
        /// Write the key to this file (0600 on Unix) instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Encrypt a file
    Encrypt(FileArgs),
    /// Decrypt a file
    Decrypt(FileArgs),
    /// Report whether a file is encrypted under the selected backend
    Check {
        /// File to inspect
        input: PathBuf,
        #[arg(short, long, value_enum, default_value_t = BackendArg::Standard)]
        backend: BackendArg,
    },
}

#[derive(Args)]
struct FileArgs {
    /// Source file
    #[arg(short, long)]
    input: PathBuf,
    /// Destination file; may be the same as the source
    #[arg(short, long)]
    output: PathBuf,
    /// Cipher suite
    #[arg(short, long, value_enum, default_value_t = BackendArg::Standard)]
    backend: BackendArg,
    /// File holding the master key
    #[arg(long, conflicts_with_all = ["key", "password"])]
    key_file: Option<PathBuf>,
    /// Master key as hex or base64
    #[arg(long, env = "VEILDB_KEY", hide_env_values = true, conflicts_with = "password")]
    key: Option<String>,
    /// Derive the key from a password instead of a master key
    #[arg(long, env = "VEILDB_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Plaintext chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Standard,
    Fips,
    Boring,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Standard => Self::Standard,
            BackendArg::Fips => Self::Fips,
            BackendArg::Boring => Self::Boring,
        }
    }
}

/// Where the master key comes from.
enum CliProvider {
    File(FileKeyProvider),
    Inline(StringProvider),
    /// Password mode: the stream key is derived from the password.
    Unused,
}

impl KeyProvider for CliProvider {
    fn get_symmetric_key(&self) -> Result<SymmetricKey, KeyProviderError> {
        match self {
            Self::File(provider) => provider.get_symmetric_key(),
            Self::Inline(provider) => provider.get_symmetric_key(),
            Self::Unused => Err(KeyProviderError::KeyNotFound("no key configured".to_string())),
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen { output } => keygen(output),
        Commands::Encrypt(args) => process(args, Direction::Encrypt),
        Commands::Decrypt(args) => process(args, Direction::Decrypt),
        Commands::Check { input, backend } => {
            let files = EncryptedFile::new(Vault::new(CliProvider::Unused, backend.into()));
            let encrypted = files
                .is_file_encrypted(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            println!("{}", if encrypted { "encrypted" } else { "not encrypted" });
            Ok(())
        }
    }
}

fn keygen(output: Option<PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            FileKeyProvider::init(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Wrote new key to {}", path.display());
        }
        None => println!("{}", SymmetricKey::generate()?.to_hex().as_str()),
    }
    Ok(())
}

fn process(args: FileArgs, direction: Direction) -> Result<()> {
    if args.chunk_size == 0 {
        bail!("chunk size must be greater than zero");
    }
    let provider = match (&args.key_file, &args.key, &args.password) {
        (Some(path), _, _) => CliProvider::File(FileKeyProvider::new(path)),
        (None, Some(key), _) => {
            CliProvider::Inline(StringProvider::new(key).context("invalid --key")?)
        }
        (None, None, Some(_)) => CliProvider::Unused,
        (None, None, None) => bail!("one of --key-file, --key or --password is required"),
    };

    let files = EncryptedFile::new(Vault::new(provider, args.backend.into()))
        .with_chunk_size(args.chunk_size);
    let password = args.password.map(SecretString::new);
    let (input, output) = (&args.input, &args.output);

    let result = match (direction, &password) {
        (Direction::Encrypt, Some(pw)) => files.encrypt_file_with_password(input, output, pw),
        (Direction::Encrypt, None) => files.encrypt_file(input, output),
        (Direction::Decrypt, Some(pw)) => files.decrypt_file_with_password(input, output, pw),
        (Direction::Decrypt, None) => files.decrypt_file(input, output),
    };
    result.with_context(|| format!("failed to process {}", input.display()))?;

    tracing::info!(input = %input.display(), output = %output.display(), "done");
    Ok(())
}
