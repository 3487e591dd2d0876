//! `Submitter` (§4.6): uploads a packaged result tarball to the
//! coordinator, or stores it locally under a content-addressed name when
//! no HTTP credentials are configured.

use crate::error::SubmitError;
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::Read as _;
use std::path::{Path, PathBuf};

/// HTTP credentials for the multipart upload. Both fields must be
/// non-empty for credentials to be considered "present" (§4.6).
#[derive(Debug, Clone, Default)]
pub struct HttpCredentials {
    /// Basic-auth login.
    pub login: String,
    /// Basic-auth password.
    pub password: String,
}

impl HttpCredentials {
    /// `true` iff both login and password are non-empty.
    #[must_use]
    pub fn is_present(&self) -> bool {
        !self.login.is_empty() && !self.password.is_empty()
    }
}

/// Submits a packaged result tarball, either by HTTP upload or by local
/// content-addressed storage (§4.6).
#[derive(Debug)]
pub struct Submitter {
    url: String,
    credentials: HttpCredentials,
    working_dir: PathBuf,
}

impl Submitter {
    /// Construct a submitter posting to `url` using `credentials`. Locally
    /// kept tarballs (when credentials are absent) land in `working_dir`,
    /// the daemon's working directory holding `instance-0/`, `instance-1/`,
    /// … (§4.6, §6) — not under any one instance's `output/` tree.
    #[must_use]
    pub fn new(url: impl Into<String>, credentials: HttpCredentials, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            credentials,
            working_dir: working_dir.into(),
        }
    }

    /// Submit `tarball`, produced for worker instance `instance_id`.
    ///
    /// A failed HTTP upload is logged by the caller and never escalated
    /// into a loop-terminating error (§4.7: `send_results` never fails
    /// the loop); this returns an error purely so the caller can log it.
    ///
    /// # Errors
    ///
    /// Returns a [`SubmitError`] if the upload request fails, the
    /// coordinator rejects it, or (absent credentials) the local rename
    /// fails.
    pub fn submit(&self, tarball: &Path, instance_id: usize) -> Result<(), SubmitError> {
        if self.credentials.is_present() {
            self.upload(tarball)
        } else {
            self.store_locally(tarball, instance_id)
        }
    }

    fn upload(&self, tarball: &Path) -> Result<(), SubmitError> {
        let file_name = tarball
            .file_name()
            .map_or_else(|| "results.tar.bz2".to_string(), |n| n.to_string_lossy().into_owned());
        let bytes = std::fs::read(tarball).map_err(|e| SubmitError::Request(e.to_string()))?;
        let (content_type, body) = build_multipart_body(&file_name, &bytes);

        let response = ureq::post(&self.url)
            .header("Expect", "")
            .header("Content-Type", &content_type)
            .header(
                "Authorization",
                &basic_auth_header(&self.credentials.login, &self.credentials.password),
            )
            .send(&body[..])
            .map_err(|e| SubmitError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(SubmitError::Rejected(status))
        }
    }

    fn store_locally(&self, tarball: &Path, instance_id: usize) -> Result<(), SubmitError> {
        let digest = sha1_hex(tarball).map_err(|source| SubmitError::LocalStore {
            path: tarball.display().to_string(),
            source,
        })?;
        let dest = local_store_name(&self.working_dir, instance_id, &digest);
        std::fs::rename(tarball, &dest).map_err(|source| SubmitError::LocalStore {
            path: dest.display().to_string(),
            source,
        })
    }
}

/// `instance-<i>-<sha1>.tar.bz2`, rooted at `working_dir` (the daemon's
/// working directory shared by every instance, §6) — never under an
/// individual instance's `output/` tree, since the `instance-<i>-` prefix
/// exists precisely to disambiguate tarballs dropped into one shared
/// directory.
fn local_store_name(working_dir: &Path, instance_id: usize, digest_hex: &str) -> PathBuf {
    working_dir.join(format!("instance-{instance_id}-{digest_hex}.tar.bz2"))
}

fn sha1_hex(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = [0_u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(buf.get(..n).unwrap_or(&buf));
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Build a `multipart/form-data` body with the `uploadedfile` and
/// `uploadsubmit` fields (§4.6), returning `(content-type, body)`.
fn build_multipart_body(file_name: &str, file_bytes: &[u8]) -> (String, Vec<u8>) {
    const BOUNDARY: &str = "----autobuild-daemon-boundary-3f2a9c";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"uploadedfile\"; filename=\"{file_name}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/x-bzip2\r\n\r\n");
    body.extend_from_slice(file_bytes);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"uploadsubmit\"\r\n\r\n1\r\n");
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}

fn basic_auth_header(login: &str, password: &str) -> String {
    use base64::Engine as _;
    let raw = format!("{login}:{password}");
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(raw)
    )
}
