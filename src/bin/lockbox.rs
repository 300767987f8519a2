//! lockbox CLI - password-based file containers
//!
//! Command-line interface for turning files into encrypted containers
//! (PBKDF2-HMAC-SHA256 + AES-256-GCM) and back.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use lockbox::container;
use lockbox::error::{ErrorCategory, ErrorKind, LockboxError, Result};
use lockbox::file_ops::{self, EncryptOptions};
use lockbox::passphrase::{
    ConfirmingPassphraseReader, PassphraseReader, ReaderPassphraseReader, TerminalPassphraseReader,
};

/// Exit status for a wrong password or damaged container, so scripts can
/// tell it apart from other failures and ask again.
const EXIT_AUTHENTICATION: i32 = 2;

#[derive(Parser)]
#[command(name = "lockbox")]
#[command(version)]
#[command(about = "Password-based file encryption.", long_about = None)]
struct Cli {
    /// Read password from stdin instead of from terminal
    #[arg(long, global = true)]
    passphrase_stdin: bool,

    /// Increase log output (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a file into a container
    #[command(alias = "e")]
    Encrypt {
        /// Path to the file whose contents is to be encrypted
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to write the container to (default: <input>.enc)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Gzip the file before encrypting it
        #[arg(short, long)]
        compress: bool,

        /// Name the container secure_vault_data.enc instead of after the input
        #[arg(long)]
        hide_filename: bool,

        /// Media type to record (default: guessed from the extension)
        #[arg(long, value_name = "TYPE")]
        mime_type: Option<String>,
    },

    /// Decrypt a container, restoring the original file
    #[command(alias = "d")]
    Decrypt {
        /// Path to the container to decrypt
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// File or directory to restore into (default: next to the container)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Show the unencrypted header of a container
    Inspect {
        /// Path to the container
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Encrypt {
            input,
            output,
            compress,
            hide_filename,
            mime_type,
        } => {
            let mut reader = get_passphrase_reader(cli.passphrase_stdin, true);
            let options = EncryptOptions {
                compress,
                hide_filename,
                mime_type,
            };
            file_ops::encrypt_file(&input, output.as_deref(), &options, &mut *reader).map(|path| {
                println!("{}", path.display());
            })
        }
        Commands::Decrypt { input, output } => {
            let mut reader = get_passphrase_reader(cli.passphrase_stdin, false);
            file_ops::decrypt_file(&input, output.as_deref(), &mut *reader).map(|restored| {
                println!("{}", restored.path.display());
            })
        }
        Commands::Inspect { input } => inspect(&input),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", render(&e));
        let code = if e.kind == Some(ErrorKind::AuthenticationFailed) {
            EXIT_AUTHENTICATION
        } else {
            1
        };
        process::exit(code);
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    // Logging goes to stderr; stdout carries the path of the written file.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn get_passphrase_reader(use_stdin: bool, confirm: bool) -> Box<dyn PassphraseReader> {
    if use_stdin {
        Box::new(ReaderPassphraseReader::new(Box::new(std::io::stdin())))
    } else if confirm {
        Box::new(ConfirmingPassphraseReader::terminal())
    } else {
        Box::new(TerminalPassphraseReader::new())
    }
}

fn inspect(input: &std::path::Path) -> Result<()> {
    let bytes = fs::read(input).map_err(|e| {
        LockboxError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("failed to read from {}", input.display()),
            e,
        )
    })?;
    let (header, ciphertext) = container::read_header(&bytes)?;
    println!("size:        {} bytes", bytes.len());
    println!("salt:        {}", hex::encode(header.salt));
    println!("nonce:       {}", hex::encode(header.nonce));
    println!(
        "compression: {:?} (flag byte {})",
        header.compression(),
        header.flag_byte
    );
    println!("ciphertext:  {} bytes", ciphertext.len());
    Ok(())
}

/// The message chain, outermost first: "failed to decrypt: wrong password ...".
fn render(err: &LockboxError) -> String {
    let mut out = err.to_string();
    let mut source = err.source_error().map(|s| s as &(dyn std::error::Error + 'static));
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}
