//! Password acquisition

use crate::error::{ErrorCategory, ErrorKind, LockboxError, Result};
use std::io::{self, IsTerminal, Read, Write};
use zeroize::Zeroizing;

/// Trait for reading passwords from various sources
pub trait PassphraseReader {
    /// Read a password as arbitrary bytes (not necessarily UTF-8)
    ///
    /// Returns the password wrapped in `Zeroizing` to ensure it is securely
    /// wiped from memory when dropped.
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>>;
}

/// Returns a fixed password (for testing)
pub struct ConstantPassphraseReader {
    passphrase: Zeroizing<Vec<u8>>,
}

impl ConstantPassphraseReader {
    pub fn new(passphrase: Vec<u8>) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase),
        }
    }
}

impl PassphraseReader for ConstantPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new((*self.passphrase).clone()))
    }
}

/// Reads a password from any io::Read source, up to end of input
pub struct ReaderPassphraseReader {
    reader: Box<dyn Read>,
}

impl ReaderPassphraseReader {
    pub fn new(reader: Box<dyn Read>) -> Self {
        Self { reader }
    }
}

impl PassphraseReader for ReaderPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        let mut data = Zeroizing::new(Vec::new());
        self.reader.read_to_end(&mut data).map_err(|e| {
            LockboxError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("error reading password: {}", e),
                e,
            )
        })?;
        Ok(data)
    }
}

/// Reads a password from the terminal with no echo
pub struct TerminalPassphraseReader {
    prompt: &'static str,
}

impl TerminalPassphraseReader {
    pub fn new() -> Self {
        Self::with_prompt("Password (lockbox): ")
    }

    pub fn with_prompt(prompt: &'static str) -> Self {
        Self { prompt }
    }
}

impl Default for TerminalPassphraseReader {
    fn default() -> Self {
        Self::new()
    }
}

impl PassphraseReader for TerminalPassphraseReader {
    /// Read password from terminal.
    ///
    /// Note: Terminal input is limited to UTF-8 due to rpassword library constraints.
    /// For non-UTF-8 passwords, use --passphrase-stdin instead.
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        if !io::stdin().is_terminal() {
            return Err(LockboxError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "cannot read password from terminal - stdin is not a terminal",
            ));
        }

        let io_failure = |what: &str, e: io::Error| {
            LockboxError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("failed to {} prompt: {}", what, e),
                e,
            )
        };
        io::stderr()
            .write_all(self.prompt.as_bytes())
            .map_err(|e| io_failure("write", e))?;
        io::stderr().flush().map_err(|e| io_failure("flush", e))?;

        // rpassword returns String (UTF-8 only), not zeroized
        let passphrase = rpassword::read_password().map_err(|e| {
            LockboxError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                format!("failure reading password: {}", e),
                e,
            )
        })?;

        Ok(Zeroizing::new(passphrase.into_bytes()))
    }
}

/// Asks for the password twice and fails unless both entries agree
///
/// Used when encrypting interactively, where a typo would lock the user
/// out of their own file.
pub struct ConfirmingPassphraseReader {
    first: Box<dyn PassphraseReader>,
    second: Box<dyn PassphraseReader>,
}

impl ConfirmingPassphraseReader {
    pub fn new(first: Box<dyn PassphraseReader>, second: Box<dyn PassphraseReader>) -> Self {
        Self { first, second }
    }

    /// Prompts on the terminal, then prompts again to confirm.
    pub fn terminal() -> Self {
        Self::new(
            Box::new(TerminalPassphraseReader::new()),
            Box::new(TerminalPassphraseReader::with_prompt(
                "Repeat password (lockbox): ",
            )),
        )
    }
}

impl PassphraseReader for ConfirmingPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        let first = self.first.read_passphrase()?;
        let second = self.second.read_passphrase()?;
        if *first != *second {
            return Err(LockboxError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseMismatch,
                "passwords do not match",
            ));
        }
        Ok(first)
    }
}
