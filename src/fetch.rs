//! External inputs: contour documents, FITS cutouts, and bounded retries around them.

use anyhow::Result;
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::models::{Subject, Survey};
use crate::radio_image::{Beam, RadioImage};
use crate::utils::url_file_name;

/// Fixed-delay retry for transient collaborator failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails non-transiently, or attempts run out.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Result<T, FetchError>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        what, attempt, self.max_attempts, err
                    );
                    thread::sleep(self.delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Source of raw contour JSON for a subject.
pub trait ContourSource {
    fn fetch(&self, subject: &Subject) -> Result<Vec<u8>, FetchError>;
}

/// Contour files cached on disk, named after the last segment of the contour URL.
pub struct LocalContourDirectory {
    dir: PathBuf,
}

impl LocalContourDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, subject: &Subject) -> PathBuf {
        self.dir.join(url_file_name(&subject.location.contours))
    }
}

impl ContourSource for LocalContourDirectory {
    fn fetch(&self, subject: &Subject) -> Result<Vec<u8>, FetchError> {
        let path = self.path_for(subject);
        match std::fs::read(&path) {
            Ok(bytes) => decompress(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(path.display().to_string()))
            }
            Err(err) => Err(FetchError::Transient(format!("{}: {}", path.display(), err))),
        }
    }
}

/// Contours served over HTTP, optionally from a mirror prefix.
pub struct HttpContourSource {
    client: reqwest::blocking::Client,
    base_url: Option<String>,
}

impl HttpContourSource {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client, base_url })
    }

    fn url_for(&self, subject: &Subject) -> String {
        match &self.base_url {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url_file_name(&subject.location.contours)
            ),
            None => subject.location.contours.clone(),
        }
    }
}

impl ContourSource for HttpContourSource {
    fn fetch(&self, subject: &Subject) -> Result<Vec<u8>, FetchError> {
        let url = self.url_for(subject);
        debug!("Fetching contours from {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| FetchError::Transient(format!("{}: {}", url, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url));
        }
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::Transient(format!("{} returned {}", url, status)));
        }
        if !status.is_success() {
            return Err(FetchError::Permanent(format!("{} returned {}", url, status)));
        }

        let bytes = response
            .bytes()
            .map_err(|e| FetchError::Transient(format!("{}: {}", url, e)))?;
        decompress(bytes.to_vec())
    }
}

/// Local cache first, then the network.
pub struct LayeredContourSource {
    local: Option<LocalContourDirectory>,
    remote: Option<HttpContourSource>,
}

impl LayeredContourSource {
    pub fn new(local: Option<LocalContourDirectory>, remote: Option<HttpContourSource>) -> Self {
        Self { local, remote }
    }
}

impl ContourSource for LayeredContourSource {
    fn fetch(&self, subject: &Subject) -> Result<Vec<u8>, FetchError> {
        if let Some(local) = &self.local {
            match local.fetch(subject) {
                Err(FetchError::NotFound(path)) if self.remote.is_some() => {
                    debug!("{} not cached locally", path);
                }
                result => return result,
            }
        }
        match &self.remote {
            Some(remote) => remote.fetch(subject),
            None => Err(FetchError::NotFound(subject.location.contours.clone())),
        }
    }
}

/// Gunzip when the payload carries the gzip magic, pass through otherwise.
fn decompress(bytes: Vec<u8>) -> Result<Vec<u8>, FetchError> {
    if !bytes.starts_with(&[0x1f, 0x8b]) {
        return Ok(bytes);
    }
    let mut out = Vec::new();
    GzDecoder::new(bytes.as_slice())
        .read_to_end(&mut out)
        .map_err(|e| FetchError::Permanent(format!("corrupt gzip payload: {}", e)))?;
    Ok(out)
}

/// Source of radio cutouts by image id.
pub trait ImageSource {
    fn load(&self, survey: Survey, image_id: &str) -> Result<RadioImage>;
}

/// FITS cutouts in a flat directory.
pub struct FitsDirectory {
    dir: PathBuf,
    default_beam: Beam,
}

impl FitsDirectory {
    pub fn new(dir: impl Into<PathBuf>, default_beam: Beam) -> Self {
        Self {
            dir: dir.into(),
            default_beam,
        }
    }
}

impl ImageSource for FitsDirectory {
    fn load(&self, survey: Survey, image_id: &str) -> Result<RadioImage> {
        let path = self.dir.join(survey.image_file_name(image_id));
        RadioImage::from_file(&path, self.default_beam)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubjectLocation;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::cell::Cell;
    use std::io::Write;

    fn subject(url: &str) -> Subject {
        Subject {
            zooniverse_id: "ARG0003r15".to_string(),
            location: SubjectLocation {
                contours: url.to_string(),
            },
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rgz-fetch-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn instant() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_retry_recovers_from_transient_failures() {
        let calls = Cell::new(0);
        let result = instant().run("fetch", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(FetchError::Transient("timeout".to_string()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = instant().run("fetch", || {
            calls.set(calls.get() + 1);
            Err(FetchError::Transient("503".to_string()))
        });
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_not_found_is_never_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = instant().run("fetch", || {
            calls.set(calls.get() + 1);
            Err(FetchError::NotFound("gone".to_string()))
        });
        assert!(matches!(result, Err(FetchError::NotFound(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_local_directory_reads_plain_and_gzip() {
        let dir = scratch_dir("local");
        std::fs::write(dir.join("plain.json"), br#"{"contours":[]}"#).unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"contours":[[]]}"#).unwrap();
        std::fs::write(dir.join("zipped.json"), encoder.finish().unwrap()).unwrap();

        let source = LocalContourDirectory::new(&dir);
        let plain = source
            .fetch(&subject("http://radio.galaxyzoo.org/contours/plain.json"))
            .unwrap();
        assert_eq!(plain, br#"{"contours":[]}"#);
        let zipped = source.fetch(&subject("https://host/x/zipped.json")).unwrap();
        assert_eq!(zipped, br#"{"contours":[[]]}"#);

        let missing = source.fetch(&subject("https://host/x/absent.json"));
        assert!(matches!(missing, Err(FetchError::NotFound(_))));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_layered_source_without_remote_reports_not_found() {
        let dir = scratch_dir("layered");
        let source = LayeredContourSource::new(Some(LocalContourDirectory::new(&dir)), None);
        assert!(matches!(
            source.fetch(&subject("https://host/x/none.json")),
            Err(FetchError::NotFound(_))
        ));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_http_url_rewrite() {
        let source =
            HttpContourSource::new(Some("http://mirror/contours/".to_string()), Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            source.url_for(&subject("http://radio.galaxyzoo.org/subjects/contours/52af.json")),
            "http://mirror/contours/52af.json"
        );
    }
}
