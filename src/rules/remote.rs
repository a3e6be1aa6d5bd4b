//! Remote rule sources.
//!
//! A remote source is an `https://` URL serving a TOML rule file. The body is
//! fetched under a bounded timeout and written to a local cache together with
//! its SHA-256 digest. When the fetch fails the cached copy is used, but only
//! if its digest still verifies.

use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::PatternLoadError;

/// Default fetch timeout.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(2);

/// Knobs for remote fetches.
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub timeout: Duration,
    /// Cache directory. `None` disables caching.
    pub cache_dir: Option<PathBuf>,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REMOTE_TIMEOUT,
            cache_dir: default_cache_dir(),
        }
    }
}

/// `$XDG_CACHE_HOME/shellguard/remote` (or the platform equivalent).
#[must_use]
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("shellguard").join("remote"))
}

/// Fetches remote rule files and maintains the verified cache.
#[derive(Debug, Clone)]
pub struct RemoteFetcher {
    options: RemoteOptions,
}

impl RemoteFetcher {
    #[must_use]
    pub const fn new(options: RemoteOptions) -> Self {
        Self { options }
    }

    /// Fetch `url`, falling back to the verified cache.
    ///
    /// # Errors
    ///
    /// [`PatternLoadError::RemoteUnavailable`] when neither the network nor a
    /// verified cached copy can supply the body.
    #[tracing::instrument(skip(self))]
    pub async fn fetch(&self, url: &str) -> Result<String, PatternLoadError> {
        let fresh = match tokio::time::timeout(self.options.timeout, self.fetch_fresh(url)).await {
            Ok(result) => result,
            Err(_) => Err(format!("timed out after {:?}", self.options.timeout)),
        };
        match fresh {
            Ok(body) => {
                if let Err(e) = self.store(url, &body) {
                    warn!(url, error = %e, "could not cache remote rules");
                }
                Ok(body)
            }
            Err(message) => {
                warn!(url, error = %message, "remote rules fetch failed; trying cache");
                self.cached(url).map_err(|cache| PatternLoadError::RemoteUnavailable {
                    url: url.to_string(),
                    message: format!("{message}; {cache}"),
                })
            }
        }
    }

    /// The cached body for `url`, if present and its digest verifies.
    ///
    /// # Errors
    ///
    /// Describes why no usable cached copy exists.
    pub fn cached(&self, url: &str) -> Result<String, String> {
        let Some((body_path, digest_path, lock_path)) = self.cache_paths(url) else {
            return Err("remote cache disabled".to_string());
        };
        let lock = open_lock(&lock_path).map_err(|e| format!("cache lock: {e}"))?;
        FileExt::lock_shared(&lock).map_err(|e| format!("cache lock: {e}"))?;

        let body = fs::read_to_string(&body_path).map_err(|e| format!("no cached copy: {e}"))?;
        let expected = fs::read_to_string(&digest_path).map_err(|e| format!("no cached digest: {e}"))?;
        let _ = FileExt::unlock(&lock);

        if expected.trim() != sha256_hex(body.as_bytes()) {
            return Err("cached copy failed digest verification".to_string());
        }
        debug!(url, path = %body_path.display(), "using cached remote rules");
        Ok(body)
    }

    async fn fetch_fresh(&self, url: &str) -> Result<String, String> {
        if !url.starts_with("https://") {
            return Err("only https:// rule sources are allowed".to_string());
        }
        let client = reqwest::Client::builder()
            .timeout(self.options.timeout)
            .build()
            .map_err(|e| e.to_string())?;
        let response = client.get(url).send().await.map_err(|e| e.to_string())?;
        let response = response.error_for_status().map_err(|e| e.to_string())?;
        response.text().await.map_err(|e| e.to_string())
    }

    fn store(&self, url: &str, body: &str) -> io::Result<()> {
        let Some((body_path, digest_path, lock_path)) = self.cache_paths(url) else {
            return Ok(());
        };
        let lock = open_lock(&lock_path)?;
        FileExt::lock_exclusive(&lock)?;
        fs::write(&body_path, body)?;
        fs::write(&digest_path, sha256_hex(body.as_bytes()))?;
        FileExt::unlock(&lock)
    }

    fn cache_paths(&self, url: &str) -> Option<(PathBuf, PathBuf, PathBuf)> {
        let dir = self.options.cache_dir.as_ref()?;
        let stem = sha256_hex(url.as_bytes());
        let stem = &stem[..16];
        Some((
            dir.join(format!("{stem}.toml")),
            dir.join(format!("{stem}.sha256")),
            dir.join(format!("{stem}.lock")),
        ))
    }
}

fn open_lock(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(dir: &Path) -> RemoteFetcher {
        RemoteFetcher::new(RemoteOptions {
            timeout: Duration::from_millis(200),
            cache_dir: Some(dir.to_path_buf()),
        })
    }

    #[test]
    fn digest_is_stable_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn cache_round_trip_and_tamper_detection() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(dir.path());
        let url = "https://rules.example/shellguard.toml";

        assert!(fetcher.cached(url).is_err());
        fetcher.store(url, "[[rule]]\n").unwrap();
        assert_eq!(fetcher.cached(url).unwrap(), "[[rule]]\n");

        let (body, _, _) = fetcher.cache_paths(url).unwrap();
        fs::write(body, "[[rule]]\nid = 'evil'\n").unwrap();
        let err = fetcher.cached(url).unwrap_err();
        assert!(err.contains("digest"), "{err}");
    }

    #[tokio::test]
    async fn plain_http_is_refused_and_falls_back_to_cache() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(dir.path());
        let url = "http://rules.example/shellguard.toml";

        let err = fetcher.fetch(url).await.unwrap_err();
        assert!(err.to_string().contains("https"), "{err}");

        fetcher.store(url, "# cached\n").unwrap();
        assert_eq!(fetcher.fetch(url).await.unwrap(), "# cached\n");
    }
}
