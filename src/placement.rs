//! Final placement of fetched artifacts
//!
//! Finished transfers are moved from the temp directory into the download
//! directory under the file name taken from their source URL. When that name
//! is taken, `<stem>-<n>.<ext>` alternatives are tried a bounded number of
//! times.

use std::path::{Path, PathBuf};

use url::Url;

use crate::{Error, Result};

/// Extension of metalink descriptors that mirrors serve next to the real file
const META4_EXTENSION: &str = ".meta4";

/// Drop a trailing `.meta4` from the URL path so the file itself is fetched
///
/// ```
/// use archive_delivery::placement::strip_meta4;
/// use url::Url;
///
/// let url = Url::parse("https://mirror.example.org/wikipedia_en.zim.meta4").unwrap();
/// assert_eq!(strip_meta4(&url).as_str(), "https://mirror.example.org/wikipedia_en.zim");
/// ```
pub fn strip_meta4(url: &Url) -> Url {
    let mut stripped = url.clone();
    if let Some(path) = url.path().strip_suffix(META4_EXTENSION) {
        stripped.set_path(path);
    }
    stripped
}

/// File name for an artifact fetched from `url`
///
/// Uses the percent-decoded last path segment, falling back to `fallback`
/// when the URL has none.
pub fn file_name_for(url: &Url, fallback: &str) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .and_then(|segment| urlencoding::decode(segment).ok())
        .map(|name| name.replace(['/', '\\'], "_"))
        .filter(|name| name != "." && name != "..")
        .unwrap_or_else(|| fallback.to_string())
}

/// Candidate destination for the given attempt; attempt 0 is the plain name
pub fn candidate_path(dir: &Path, file_name: &str, attempt: u32) -> PathBuf {
    if attempt == 0 {
        return dir.join(file_name);
    }
    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    match name.extension().and_then(|e| e.to_str()) {
        Some(ext) => dir.join(format!("{}-{}.{}", stem, attempt, ext)),
        None => dir.join(format!("{}-{}", stem, attempt)),
    }
}

/// Move `temp_path` into `dir`, avoiding existing files
///
/// Tries the plain name and then up to `max_attempts` alternatives. Returns
/// the final path.
pub async fn place_artifact(
    temp_path: &Path,
    dir: &Path,
    file_name: &str,
    max_attempts: u32,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    for attempt in 0..=max_attempts {
        let destination = candidate_path(dir, file_name, attempt);
        if tokio::fs::try_exists(&destination).await? {
            tracing::debug!(destination = %destination.display(), "destination taken, trying next name");
            continue;
        }

        move_file(temp_path, &destination).await?;
        tracing::info!(
            source = %temp_path.display(),
            destination = %destination.display(),
            "placed fetched artifact"
        );
        return Ok(destination);
    }

    Err(Error::Io(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!(
            "no free name for {} in {} after {} attempts",
            file_name,
            dir.display(),
            max_attempts + 1
        ),
    )))
}

async fn move_file(from: &Path, to: &Path) -> Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) => {
            // rename fails across filesystems; fall back to copy + remove
            tracing::debug!(error = %e, "rename failed, copying instead");
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await?;
            Ok(())
        }
    }
}
