//! Resolves a dataset/cache reference (an object-storage URI or a local
//! filesystem path) to a concrete `object_store::ObjectStore` plus the
//! `Path` rooted inside it — the same `object_store::parse_url` idiom
//! `telemetry/src/blob_storage.rs`'s `BlobStorage::connect` uses, so the
//! rest of the crate never has to special-case "local disk" vs "S3".

use std::sync::Arc;

use object_store::path::Path as StorePath;
use object_store::ObjectStore;
use url::Url;

/// Parses an exact (non-glob) reference, such as a cache root, into a store
/// and the path within it.
pub fn parse(url_or_path: &str) -> anyhow::Result<(Arc<dyn ObjectStore>, StorePath)> {
    let url = to_url(url_or_path)?;
    let (store, path) = object_store::parse_url(&url)?;
    Ok((Arc::from(store), path))
}

/// Parses a dataset reference that may carry a trailing glob (`/**`, `/*`,
/// `/*.parquet`) and returns the store plus the listing prefix beneath which
/// matching parquet files live.
pub fn parse_glob_prefix(url_or_path: &str) -> anyhow::Result<(Arc<dyn ObjectStore>, StorePath)> {
    let trimmed = strip_glob_suffix(url_or_path);
    parse(&trimmed)
}

fn strip_glob_suffix(reference: &str) -> String {
    let mut s = reference.trim_end_matches('/');
    for suffix in ["/**", "/*.parquet", "/*", "**", "*"] {
        if let Some(stripped) = s.strip_suffix(suffix) {
            s = stripped.trim_end_matches('/');
            break;
        }
    }
    if s.is_empty() {
        reference.to_string()
    } else {
        s.to_string()
    }
}

fn to_url(url_or_path: &str) -> anyhow::Result<Url> {
    if url_or_path.contains("://") {
        return Ok(Url::parse(url_or_path)?);
    }
    let path = std::path::Path::new(url_or_path);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    std::fs::create_dir_all(&absolute).ok();
    Url::from_directory_path(&absolute)
        .map_err(|()| anyhow::anyhow!("not a valid local path: {url_or_path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_double_star_glob() {
        assert_eq!(strip_glob_suffix("s3://b/t/**"), "s3://b/t");
    }

    #[test]
    fn strips_single_star_glob() {
        assert_eq!(strip_glob_suffix("s3://b/t/*"), "s3://b/t");
    }

    #[test]
    fn strips_extension_glob() {
        assert_eq!(strip_glob_suffix("s3://b/t/*.parquet"), "s3://b/t");
    }

    #[test]
    fn leaves_plain_path_untouched() {
        assert_eq!(strip_glob_suffix("s3://b/t"), "s3://b/t");
    }
}
