//! Artifact signing.
//!
//! The engine only depends on the [`Signer`] trait; the production
//! implementation shells out to `gpg` and `rpmsign`. The passphrase is
//! handed over through a private file and loopback pinentry, never on
//! the command line.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use repoctl_common::error::{RepoctlError, Result};
use tracing::{debug, info};

pub trait Signer {
    /// Fingerprint of the configured key, or `None` when no key is
    /// configured.
    fn key_id(&self) -> Result<Option<String>>;

    /// Re-sign an rpm payload in place.
    fn sign_rpm(&self, path: &Path) -> Result<()>;

    /// Produce a detached `path.sig` signature next to `path`.
    fn sign_detached(&self, path: &Path) -> Result<()>;
}

/// `gpg`/`rpmsign` backed signer.
pub struct GpgSigner {
    key_path: PathBuf,
    passphrase: String,
    key_id: OnceLock<String>,
}

impl GpgSigner {
    pub fn new(key_path: &Path, passphrase: &str) -> Self {
        GpgSigner {
            key_path: key_path.to_path_buf(),
            passphrase: passphrase.to_string(),
            key_id: OnceLock::new(),
        }
    }

    /// Write the passphrase into a 0600 scratch file for
    /// `--passphrase-file`.
    fn passphrase_file(&self) -> Result<tempfile::NamedTempFile> {
        let mut file = tempfile::NamedTempFile::new()
            .map_err(|e| RepoctlError::SigningFailed(format!("passphrase file: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(file.path(), fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(self.passphrase.as_bytes())?;
        file.flush()?;
        Ok(file)
    }

    /// Import the key into the user keyring so gpg and rpmsign can use
    /// it. Importing an already-known key is a no-op.
    fn import_key(&self) -> Result<()> {
        let output = Command::new("gpg")
            .args(["--batch", "--quiet", "--import"])
            .arg(&self.key_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| RepoctlError::CommandExec(format!("gpg --import: {e}")))?;
        if !output.success() {
            return Err(RepoctlError::SigningFailed(format!(
                "unable to import signing key {}",
                self.key_path.display()
            )));
        }
        Ok(())
    }

    fn read_fingerprint(&self) -> Result<String> {
        let output = Command::new("gpg")
            .args(["--batch", "--with-colons", "--show-keys"])
            .arg(&self.key_path)
            .stderr(Stdio::null())
            .output()
            .map_err(|e| RepoctlError::CommandExec(format!("gpg --show-keys: {e}")))?;
        if !output.status.success() {
            return Err(RepoctlError::SigningFailed(format!(
                "unable to read signing key {}",
                self.key_path.display()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            if let Some(rest) = line.strip_prefix("fpr:") {
                let fingerprint = rest.split(':').find(|field| !field.is_empty());
                if let Some(fingerprint) = fingerprint {
                    return Ok(fingerprint.to_uppercase());
                }
            }
        }
        Err(RepoctlError::SigningFailed(format!(
            "no fingerprint found in {}",
            self.key_path.display()
        )))
    }
}

impl Signer for GpgSigner {
    fn key_id(&self) -> Result<Option<String>> {
        if self.key_path.as_os_str().is_empty() {
            return Ok(None);
        }
        if let Some(cached) = self.key_id.get() {
            return Ok(Some(cached.clone()));
        }
        let fingerprint = self.read_fingerprint()?;
        debug!("Signing key fingerprint: {fingerprint}");
        let _ = self.key_id.set(fingerprint.clone());
        Ok(Some(fingerprint))
    }

    fn sign_rpm(&self, path: &Path) -> Result<()> {
        info!("SIGNING: {}", path.display());
        self.import_key()?;
        let fingerprint = self
            .key_id()?
            .ok_or_else(|| RepoctlError::SigningFailed("no signing key configured".into()))?;

        // Strip any previous signature first: a leftover foreign
        // signature makes installers reject the re-signed package.
        let status = Command::new("rpm")
            .arg("--delsign")
            .arg(path)
            .stdout(Stdio::null())
            .status()
            .map_err(|e| RepoctlError::CommandExec(format!("rpm --delsign: {e}")))?;
        if !status.success() {
            return Err(RepoctlError::SigningFailed(format!(
                "rpm --delsign failed on {} with {status}",
                path.display()
            )));
        }

        let passfile = self.passphrase_file()?;
        let extra_args = format!(
            "--batch --pinentry-mode loopback --passphrase-file {}",
            passfile.path().display()
        );
        let status = Command::new("rpmsign")
            .arg("--resign")
            .args(["-D", "_signature gpg"])
            .args(["-D", &format!("_gpg_name {fingerprint}")])
            .args(["-D", &format!("__gpg_sign_cmd_extra_args {extra_args}")])
            .arg(path)
            .stdout(Stdio::null())
            .status()
            .map_err(|e| RepoctlError::CommandExec(format!("rpmsign: {e}")))?;
        if !status.success() {
            return Err(RepoctlError::SigningFailed(format!(
                "rpmsign failed on {} with {status}",
                path.display()
            )));
        }
        Ok(())
    }

    fn sign_detached(&self, path: &Path) -> Result<()> {
        debug!("Detached signing {}", path.display());
        self.import_key()?;
        let fingerprint = self
            .key_id()?
            .ok_or_else(|| RepoctlError::SigningFailed("no signing key configured".into()))?;
        let sig_path = format!("{}.sig", path.display());
        let passfile = self.passphrase_file()?;
        let status = Command::new("gpg")
            .args(["--batch", "--yes", "--pinentry-mode", "loopback"])
            .arg("--passphrase-file")
            .arg(passfile.path())
            .args(["--local-user", &fingerprint])
            .args(["--detach-sign", "--output"])
            .arg(&sig_path)
            .arg(path)
            .stdout(Stdio::null())
            .status()
            .map_err(|e| RepoctlError::CommandExec(format!("gpg --detach-sign: {e}")))?;
        if !status.success() {
            return Err(RepoctlError::SigningFailed(format!(
                "gpg --detach-sign failed on {} with {status}",
                path.display()
            )));
        }
        Ok(())
    }
}
