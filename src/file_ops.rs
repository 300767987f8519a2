//! File encryption/decryption operations
//!
//! Reads files from disk, runs them through the container codec, and
//! writes the result back with owner-only permissions.

use crate::container::{self, CONTAINER_EXTENSION, MetadataSource};
use crate::error::{ErrorCategory, ErrorKind, LockboxError, Result};
use crate::passphrase::PassphraseReader;
use crate::payload::DEFAULT_MIME_TYPE;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Container name used instead of `<name>.enc` when the file name should
/// not be visible from the outside.
pub const HIDDEN_CONTAINER_NAME: &str = "secure_vault_data.enc";

/// Knobs for [`encrypt_file`].
#[derive(Debug, Clone, Default)]
pub struct EncryptOptions {
    /// Gzip the payload before encrypting, if this build supports it.
    pub compress: bool,
    /// Name the container `secure_vault_data.enc` rather than after the
    /// input. The real name is still stored inside the encrypted payload.
    pub hide_filename: bool,
    /// Media type to record; guessed from the extension when absent.
    pub mime_type: Option<String>,
}

/// Whether an existing file at the target path may be replaced.
///
/// Only a path the caller named explicitly is replaced. A path the crate
/// made up (a default container name, a name recovered from a container)
/// never replaces an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Overwrite {
    Allow,
    Refuse,
}

/// What [`decrypt_file`] wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restored {
    pub path: PathBuf,
    pub mime_type: String,
    pub metadata_source: MetadataSource,
}

/// Encrypt a file with a password
///
/// Reads `input_path`, encrypts it with a password from `passphrase_reader`,
/// and writes the container to `output_path`, or next to the input when no
/// output is given. Returns the path written.
///
/// The input is never replaced by its own container, and a default output
/// path never replaces an existing file.
///
/// The output file is created with mode 0o600 (read/write for owner only) on Unix systems.
pub fn encrypt_file(
    input_path: &Path,
    output_path: Option<&Path>,
    options: &EncryptOptions,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<PathBuf> {
    let plaintext = fs::read(input_path).map_err(|e| read_error(input_path, e))?;
    let file_name = input_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            LockboxError::with_kind(
                ErrorCategory::User,
                ErrorKind::InvalidInput,
                format!("{} does not name a file", input_path.display()),
            )
        })?;
    let mime_type = options
        .mime_type
        .clone()
        .unwrap_or_else(|| guess_mime_type(input_path).to_owned());

    let (output_path, overwrite) = match output_path {
        Some(p) => (p.to_path_buf(), Overwrite::Allow),
        None => (
            default_container_path(input_path, options.hide_filename),
            Overwrite::Refuse,
        ),
    };
    refuse_same_file(input_path, &output_path)?;

    let passphrase = passphrase_reader.read_passphrase()?;
    let container = container::encode(
        &plaintext,
        &file_name,
        &mime_type,
        &passphrase,
        options.compress,
    )
    .map_err(|e| e.with_context("encryption failed"))?;

    write_file_atomic(&output_path, &container, overwrite)
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;

    tracing::info!(
        input = %input_path.display(),
        output = %output_path.display(),
        "encrypted file"
    );
    Ok(output_path)
}

/// Decrypt a container with a password
///
/// `output_path` may be a file path, an existing directory to restore the
/// original file name into, or `None` to restore next to the container.
/// A restored name never replaces an existing file, and the container is
/// never replaced by its own content.
///
/// The output file is created with mode 0o600 (read/write for owner only) on Unix systems.
pub fn decrypt_file(
    input_path: &Path,
    output_path: Option<&Path>,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<Restored> {
    let container_bytes = fs::read(input_path).map_err(|e| read_error(input_path, e))?;
    let container_name = input_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());

    let passphrase = passphrase_reader.read_passphrase()?;
    let decoded = container::decode_named(&container_bytes, &passphrase, container_name.as_deref())
        .map_err(|e| e.with_context("failed to decrypt"))?;

    let (target, overwrite) = match output_path {
        Some(p) if !p.is_dir() => (p.to_path_buf(), Overwrite::Allow),
        Some(dir) => (
            dir.join(safe_file_name(&decoded.file_name)),
            Overwrite::Refuse,
        ),
        None => (
            parent_dir(input_path).join(safe_file_name(&decoded.file_name)),
            Overwrite::Refuse,
        ),
    };
    refuse_same_file(input_path, &target)?;

    write_file_atomic(&target, &decoded.data, overwrite)
        .map_err(|e| e.with_context(format!("failed to write to {}", target.display())))?;

    tracing::info!(
        input = %input_path.display(),
        output = %target.display(),
        "decrypted file"
    );
    Ok(Restored {
        path: target,
        mime_type: decoded.mime_type,
        metadata_source: decoded.metadata_source,
    })
}

/// Where a container for `input_path` goes when no output is named.
pub fn default_container_path(input_path: &Path, hide_filename: bool) -> PathBuf {
    let name = if hide_filename {
        HIDDEN_CONTAINER_NAME.to_owned()
    } else {
        match input_path.file_name() {
            Some(n) => format!("{}{}", n.to_string_lossy(), CONTAINER_EXTENSION),
            None => format!("file{}", CONTAINER_EXTENSION),
        }
    };
    parent_dir(input_path).join(name)
}

/// Media type for a path, judged by its extension alone.
pub fn guess_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "htm" | "html" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => DEFAULT_MIME_TYPE,
    }
}

/// Reduce a name recovered from a container to a single plain path component.
///
/// The name comes from inside the container, so it must not be able to
/// point anywhere but the chosen output directory.
fn safe_file_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    match last {
        "" | "." | ".." => container::fallback_file_name(None),
        other => other.to_owned(),
    }
}

/// Fails if `output` is the file `input` names, through whatever path.
fn refuse_same_file(input: &Path, output: &Path) -> Result<()> {
    // A missing output cannot be the input, which was just read.
    let (Ok(input), Ok(output)) = (fs::canonicalize(input), fs::canonicalize(output)) else {
        return Ok(());
    };
    if input == output {
        return Err(LockboxError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidInput,
            format!("refusing to replace {} with its own output", input.display()),
        ));
    }
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Write `contents` to `path` atomically (tempfile + fsync + rename), so a
/// failed write never leaves a partial file behind.
///
/// With [`Overwrite::Refuse`] an existing file at `path` is left alone and
/// the write fails.
fn write_file_atomic(path: &Path, contents: &[u8], overwrite: Overwrite) -> Result<()> {
    let io_failure = |msg: &str, e: io::Error| {
        LockboxError::with_kind_and_source(ErrorCategory::Internal, ErrorKind::Io, msg, e)
    };

    let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir(path)).map_err(|e| {
        LockboxError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Io,
            "failed to create tempfile",
            e,
        )
    })?;

    temp_file
        .write_all(contents)
        .map_err(|e| io_failure("failed to write to tempfile", e))?;
    // Flush and fsync() such that the rename later, if it succeeds, will
    // always point to a valid file.
    temp_file
        .flush()
        .map_err(|e| io_failure("failed to flush tempfile", e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| io_failure("failed to sync file prior to rename", e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = temp_file
            .as_file()
            .metadata()
            .map_err(|e| io_failure("failed to get tempfile metadata", e))?
            .permissions();
        perms.set_mode(0o600);
        temp_file
            .as_file()
            .set_permissions(perms)
            .map_err(|e| io_failure("failed to set tempfile permissions", e))?;
    }

    let persisted = match overwrite {
        Overwrite::Allow => temp_file.persist(path),
        Overwrite::Refuse => temp_file.persist_noclobber(path),
    };
    persisted.map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            LockboxError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Io,
                format!("refusing to overwrite existing file {}", path.display()),
                e,
            )
        } else {
            LockboxError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("failed to rename to target file {}", path.display()),
                e,
            )
        }
    })?;
    Ok(())
}

fn read_error(path: &Path, err: io::Error) -> LockboxError {
    let category = if err.kind() == io::ErrorKind::NotFound {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    LockboxError::with_kind_and_source(
        category,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passphrase::ConstantPassphraseReader;
    use std::fs;
    use tempfile::TempDir;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    fn reader(pw: &[u8]) -> ConstantPassphraseReader {
        ConstantPassphraseReader::new(pw.to_vec())
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let out_dir = temp_dir.path().join("out");
        fs::create_dir(&out_dir).unwrap();

        let plaintext = b"Hello, lockbox!";
        fs::write(&plain_path, plaintext).unwrap();

        let crypt_path = encrypt_file(
            &plain_path,
            None,
            &EncryptOptions::default(),
            &mut reader(b"test password"),
        )
        .unwrap();
        assert_eq!(crypt_path, temp_dir.path().join("plain.txt.enc"));
        assert!(crypt_path.exists());

        let restored =
            decrypt_file(&crypt_path, Some(&out_dir), &mut reader(b"test password")).unwrap();
        assert_eq!(restored.path, out_dir.join("plain.txt"));
        assert_eq!(restored.mime_type, "text/plain");
        assert_eq!(restored.metadata_source, MetadataSource::Embedded);
        assert_eq!(fs::read(&restored.path).unwrap(), plaintext);
    }

    #[test]
    fn test_decrypt_to_explicit_file() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("data.bin");
        let crypt_path = temp_dir.path().join("data.bin.enc");
        let out_path = temp_dir.path().join("elsewhere.bin");

        fs::write(&plain_path, [0u8, 1, 2, 3]).unwrap();
        let options = EncryptOptions {
            compress: true,
            ..Default::default()
        };
        encrypt_file(&plain_path, Some(&crypt_path), &options, &mut reader(b"pw")).unwrap();

        let restored = decrypt_file(&crypt_path, Some(&out_path), &mut reader(b"pw")).unwrap();
        assert_eq!(restored.path, out_path);
        assert_eq!(restored.mime_type, DEFAULT_MIME_TYPE);
        assert_eq!(fs::read(&out_path).unwrap(), [0u8, 1, 2, 3]);
    }

    #[test]
    fn test_hidden_filename_still_restores_original_name() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("diary.md");
        fs::write(&plain_path, b"# secret").unwrap();

        let options = EncryptOptions {
            hide_filename: true,
            ..Default::default()
        };
        let crypt_path = encrypt_file(&plain_path, None, &options, &mut reader(b"pw")).unwrap();
        assert_eq!(crypt_path, temp_dir.path().join(HIDDEN_CONTAINER_NAME));

        fs::remove_file(&plain_path).unwrap();
        let restored = decrypt_file(&crypt_path, None, &mut reader(b"pw")).unwrap();
        assert_eq!(restored.path, temp_dir.path().join("diary.md"));
        assert_eq!(restored.mime_type, "text/markdown");
    }

    #[test]
    fn test_explicit_mime_type_wins() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("x.txt");
        let out_path = temp_dir.path().join("x.out");
        fs::write(&plain_path, b"{}").unwrap();

        let options = EncryptOptions {
            mime_type: Some("application/json".to_owned()),
            ..Default::default()
        };
        let crypt_path = encrypt_file(&plain_path, None, &options, &mut reader(b"pw")).unwrap();
        let restored = decrypt_file(&crypt_path, Some(&out_path), &mut reader(b"pw")).unwrap();
        assert_eq!(restored.mime_type, "application/json");
    }

    #[test]
    #[cfg(unix)]
    fn test_file_permissions() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        fs::write(&plain_path, b"test").unwrap();

        let crypt_path = encrypt_file(
            &plain_path,
            None,
            &EncryptOptions::default(),
            &mut reader(b"test"),
        )
        .unwrap();

        let metadata = fs::metadata(&crypt_path).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn test_decrypt_wrong_passphrase() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let out_path = temp_dir.path().join("decrypted.txt");
        fs::write(&plain_path, b"secret").unwrap();

        let crypt_path = encrypt_file(
            &plain_path,
            None,
            &EncryptOptions::default(),
            &mut reader(b"correct"),
        )
        .unwrap();

        let err = decrypt_file(&crypt_path, Some(&out_path), &mut reader(b"wrong")).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
        assert!(!out_path.exists());
    }

    #[test]
    fn test_missing_input_is_user_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.enc");
        let err = decrypt_file(&missing, None, &mut reader(b"pw")).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Io));
        assert_eq!(err.category, ErrorCategory::User);
    }

    #[test]
    fn test_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("empty.txt");
        let out_path = temp_dir.path().join("decrypted.txt");
        fs::write(&plain_path, b"").unwrap();

        let crypt_path = encrypt_file(
            &plain_path,
            None,
            &EncryptOptions::default(),
            &mut reader(b"test"),
        )
        .unwrap();
        decrypt_file(&crypt_path, Some(&out_path), &mut reader(b"test")).unwrap();

        assert_eq!(fs::read(&out_path).unwrap(), b"");
    }

    #[test]
    fn test_restored_name_never_replaces_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let source_dir = temp_dir.path().join("source");
        fs::create_dir(&source_dir).unwrap();
        let plain_path = source_dir.join("notes.txt");
        fs::write(&plain_path, b"other").unwrap();
        let crypt_path = encrypt_file(
            &plain_path,
            Some(&temp_dir.path().join("notes.txt.enc")),
            &EncryptOptions::default(),
            &mut reader(b"pw"),
        )
        .unwrap();

        let existing = temp_dir.path().join("notes.txt");
        fs::write(&existing, b"precious").unwrap();

        for output in [None, Some(temp_dir.path())] {
            let err = decrypt_file(&crypt_path, output, &mut reader(b"pw")).unwrap_err();
            assert_eq!(err.kind, Some(ErrorKind::Io));
            assert_eq!(err.category, ErrorCategory::User);
            assert_eq!(fs::read(&existing).unwrap(), b"precious");
        }

        // Naming the file explicitly still replaces it.
        decrypt_file(&crypt_path, Some(&existing), &mut reader(b"pw")).unwrap();
        assert_eq!(fs::read(&existing).unwrap(), b"other");
    }

    #[test]
    fn test_container_is_not_replaced_by_its_content() {
        let temp_dir = TempDir::new().unwrap();
        let inner_path = temp_dir.path().join("inner").join("box.enc");
        fs::create_dir(inner_path.parent().unwrap()).unwrap();
        fs::write(&inner_path, b"inner").unwrap();

        let crypt_path = temp_dir.path().join("box.enc");
        encrypt_file(
            &inner_path,
            Some(&crypt_path),
            &EncryptOptions::default(),
            &mut reader(b"pw"),
        )
        .unwrap();
        let container = fs::read(&crypt_path).unwrap();

        let err = decrypt_file(&crypt_path, None, &mut reader(b"pw")).unwrap_err();
        assert_eq!(err.category, ErrorCategory::User);
        let err = decrypt_file(&crypt_path, Some(&crypt_path), &mut reader(b"pw")).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::InvalidInput));
        assert_eq!(fs::read(&crypt_path).unwrap(), container);
    }

    #[test]
    fn test_encrypt_never_replaces_its_input() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join(HIDDEN_CONTAINER_NAME);
        fs::write(&plain_path, b"plaintext").unwrap();

        let options = EncryptOptions {
            hide_filename: true,
            ..Default::default()
        };
        let err = encrypt_file(&plain_path, None, &options, &mut reader(b"pw")).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::InvalidInput));

        let err = encrypt_file(
            &plain_path,
            Some(&plain_path),
            &EncryptOptions::default(),
            &mut reader(b"pw"),
        )
        .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::InvalidInput));
        assert_eq!(fs::read(&plain_path).unwrap(), b"plaintext");
    }

    #[test]
    fn test_default_container_path_never_replaces_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("a.txt");
        let crypt_path = temp_dir.path().join("a.txt.enc");
        fs::write(&plain_path, b"a").unwrap();
        fs::write(&crypt_path, b"older container").unwrap();

        let err = encrypt_file(
            &plain_path,
            None,
            &EncryptOptions::default(),
            &mut reader(b"pw"),
        )
        .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Io));
        assert_eq!(err.category, ErrorCategory::User);
        assert_eq!(fs::read(&crypt_path).unwrap(), b"older container");
    }

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("report.pdf"), "report.pdf");
        assert_eq!(safe_file_name("../../etc/passwd"), "passwd");
        assert_eq!(safe_file_name("C:\\Users\\x\\evil.exe"), "evil.exe");
        assert_eq!(safe_file_name(".."), "decrypted_file");
        assert_eq!(safe_file_name("dir/"), "decrypted_file");
    }

    #[test]
    fn test_default_container_path() {
        assert_eq!(
            default_container_path(Path::new("a/b/photo.png"), false),
            Path::new("a/b/photo.png.enc")
        );
        assert_eq!(
            default_container_path(Path::new("photo.png"), true),
            Path::new("./secure_vault_data.enc")
        );
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type(Path::new("a.TXT")), "text/plain");
        assert_eq!(guess_mime_type(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(guess_mime_type(Path::new("Makefile")), DEFAULT_MIME_TYPE);
    }
}
