use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::constants::APP_DIR_NAME;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("model file not found: {0}")]
    NotFound(PathBuf),
    #[error("model {name} is not in {searched} and has no download source")]
    Unavailable { name: String, searched: String },
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Where a model may come from.
#[derive(Clone, Copy, Debug)]
pub struct ModelSource<'a> {
    pub name: &'a str,
    /// `None` for models that must already be on disk.
    pub url: Option<&'a str>,
}

/// Resolves a model file.
///
/// An explicit path wins and must exist. Otherwise the user cache
/// directory, then `bundled_dir`, and finally a download into the cache when
/// the source has a URL.
pub fn resolve(
    source: ModelSource<'_>,
    explicit: Option<&Path>,
    bundled_dir: Option<&Path>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(ModelResolveError::NotFound(path.to_path_buf()))
        };
    }
    resolve_in(&model_cache_dir()?, source, bundled_dir, progress)
}

fn resolve_in(
    cache_dir: &Path,
    source: ModelSource<'_>,
    bundled_dir: Option<&Path>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    let cached_path = cache_dir.join(source.name);
    if cached_path.is_file() {
        return Ok(cached_path);
    }

    if let Some(dir) = bundled_dir {
        let bundled_path = dir.join(source.name);
        if bundled_path.is_file() {
            return Ok(bundled_path);
        }
    }

    let Some(url) = source.url else {
        let mut searched = cache_dir.display().to_string();
        if let Some(dir) = bundled_dir {
            searched.push_str(&format!(" or {}", dir.display()));
        }
        return Err(ModelResolveError::Unavailable {
            name: source.name.to_string(),
            searched,
        });
    };

    fs::create_dir_all(cache_dir).map_err(ModelResolveError::CacheDir)?;
    log::info!("Downloading {} to {}", source.name, cache_dir.display());
    download(url, &cached_path, progress)?;
    Ok(cached_path)
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/FaceSwap Live/models/`
/// - Linux: `$XDG_CACHE_HOME/FaceSwap Live/models/` or `~/.cache/FaceSwap Live/models/`
/// - Windows: `%LOCALAPPDATA%/FaceSwap Live/models/`
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    let base = dirs::data_dir();
    #[cfg(not(target_os = "macos"))]
    let base = dirs::cache_dir();

    base.map(|d| d.join(APP_DIR_NAME).join("models"))
        .ok_or(ModelResolveError::NoCacheDir)
}

fn download(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let temp_path = dest.with_extension("part");
    let result = stream_to(url, dest, &temp_path, progress);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn stream_to(
    url: &str,
    dest: &Path,
    temp_path: &Path,
    progress: Option<ProgressFn>,
) -> Result<(), ModelResolveError> {
    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ModelResolveError::Download {
            url: url.to_string(),
            source: e,
        })?;

    let write_err = |e: std::io::Error| ModelResolveError::Write {
        path: temp_path.to_path_buf(),
        source: e,
    };

    let total = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;
    let mut file = fs::File::create(temp_path).map_err(write_err)?;
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = response.read(&mut buf).map_err(write_err)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_err)?;
        downloaded += n as u64;
        if let Some(ref cb) = progress {
            cb(downloaded, total);
        }
    }
    file.flush().map_err(write_err)?;
    drop(file);

    fs::rename(temp_path, dest).map_err(|e| ModelResolveError::Write {
        path: dest.to_path_buf(),
        source: e,
    })
}
