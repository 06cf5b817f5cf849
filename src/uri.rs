//! Resolution of a dataset URI onto a storage backend.
//!
//! Accepted forms:
//! - a local path, absolute or relative (optionally `file://`-prefixed)
//! - `s3://bucket/prefix`, with the endpoint taken from the S3 settings
//! - `http://endpoint/bucket/prefix` or `https://endpoint/bucket/prefix`
use std::path::PathBuf;

use thiserror::Error;

use crate::chunk_key_encoding::KEY_SEP;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid URI `{uri}`: {reason}")]
pub struct InvalidUri {
    pub uri: String,
    pub reason: &'static str,
}

impl InvalidUri {
    fn new(uri: &str, reason: &'static str) -> Self {
        Self {
            uri: uri.to_owned(),
            reason,
        }
    }
}

/// Whether the URI addresses an object store rather than the local filesystem.
pub fn is_web_uri(uri: &str) -> bool {
    let lower = uri.trim_start().to_ascii_lowercase();
    lower.starts_with("s3://") || lower.starts_with("http://") || lower.starts_with("https://")
}

/// Split a URI on `/`, dropping empty segments.
///
/// The scheme (e.g. `http:`) is kept as the first segment of web URIs.
pub fn split_uri(uri: &str) -> Vec<String> {
    uri.split(KEY_SEP)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_owned())
        .collect()
}

/// Bucket name and key prefix of a web URI.
///
/// The prefix is empty if the URI names only the bucket.
pub fn parse_path_from_uri(uri: &str) -> Result<(String, String), InvalidUri> {
    let parts = split_uri(uri);
    let scheme = parts
        .first()
        .ok_or_else(|| InvalidUri::new(uri, "empty URI"))?
        .to_ascii_lowercase();
    // s3://bucket/... has no endpoint segment
    let bucket_idx = match scheme.as_str() {
        "s3:" => 1,
        "http:" | "https:" => 2,
        _ => return Err(InvalidUri::new(uri, "not a web URI")),
    };
    let bucket = parts
        .get(bucket_idx)
        .ok_or_else(|| InvalidUri::new(uri, "no bucket name"))?;
    let prefix = parts[bucket_idx + 1..].join(KEY_SEP);
    Ok((bucket.clone(), prefix))
}

/// A parsed dataset location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUri {
    Local(PathBuf),
    S3 {
        /// `None` for `s3://` URIs.
        endpoint: Option<String>,
        bucket: String,
        prefix: String,
    },
}

impl StoreUri {
    pub fn parse(uri: &str) -> Result<Self, InvalidUri> {
        let trimmed = uri.trim();
        if trimmed.is_empty() {
            return Err(InvalidUri::new(uri, "empty URI"));
        }
        if !is_web_uri(trimmed) {
            let path = trimmed.strip_prefix("file://").unwrap_or(trimmed);
            if path.is_empty() {
                return Err(InvalidUri::new(uri, "empty path"));
            }
            return Ok(Self::Local(PathBuf::from(path)));
        }

        let (bucket, prefix) = parse_path_from_uri(trimmed)?;
        let parts = split_uri(trimmed);
        let endpoint = if parts[0].eq_ignore_ascii_case("s3:") {
            None
        } else {
            Some(format!("{}//{}", parts[0].to_ascii_lowercase(), parts[1]))
        };
        Ok(Self::S3 {
            endpoint,
            bucket,
            prefix,
        })
    }

    /// The location of `path` beneath this one.
    pub fn join(&self, path: &str) -> Self {
        let path = path.trim_matches('/');
        match self {
            Self::Local(p) => {
                let mut out = p.clone();
                for part in path.split(KEY_SEP).filter(|s| !s.is_empty()) {
                    out.push(part);
                }
                Self::Local(out)
            }
            Self::S3 {
                endpoint,
                bucket,
                prefix,
            } => Self::S3 {
                endpoint: endpoint.clone(),
                bucket: bucket.clone(),
                prefix: join_key(prefix, path),
            },
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

/// Join two object key fragments with exactly one separator.
pub fn join_key(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    match (prefix.is_empty(), path.is_empty()) {
        (true, _) => path.to_owned(),
        (false, true) => prefix.to_owned(),
        (false, false) => format!("{prefix}{KEY_SEP}{path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_uris() {
        assert!(is_web_uri("s3://bucket/a"));
        assert!(is_web_uri("http://localhost:9000/bucket"));
        assert!(is_web_uri("HTTPS://example.com/bucket/a/b"));
        assert!(!is_web_uri("/tmp/data.zarr"));
        assert!(!is_web_uri("data.zarr"));
    }

    #[test]
    fn splitting_drops_empty() {
        assert_eq!(
            split_uri("http://localhost:9000//bucket/a/"),
            vec!["http:", "localhost:9000", "bucket", "a"]
        );
        assert!(split_uri("").is_empty());
    }

    #[test]
    fn bucket_and_prefix() {
        assert_eq!(
            parse_path_from_uri("http://localhost:9000/bucket/a/b.zarr").unwrap(),
            ("bucket".to_owned(), "a/b.zarr".to_owned())
        );
        assert_eq!(
            parse_path_from_uri("s3://bucket").unwrap(),
            ("bucket".to_owned(), String::new())
        );
        assert!(parse_path_from_uri("http://localhost:9000").is_err());
        assert!(parse_path_from_uri("/tmp/a").is_err());
    }

    #[test]
    fn parse_store_uris() {
        assert_eq!(
            StoreUri::parse("/tmp/out.zarr").unwrap(),
            StoreUri::Local(PathBuf::from("/tmp/out.zarr"))
        );
        assert_eq!(
            StoreUri::parse("file:///tmp/out.zarr").unwrap(),
            StoreUri::Local(PathBuf::from("/tmp/out.zarr"))
        );
        assert_eq!(
            StoreUri::parse("https://s3.example.com/bkt/pre/fix").unwrap(),
            StoreUri::S3 {
                endpoint: Some("https://s3.example.com".to_owned()),
                bucket: "bkt".to_owned(),
                prefix: "pre/fix".to_owned(),
            }
        );
        assert_eq!(
            StoreUri::parse("s3://bkt/x").unwrap(),
            StoreUri::S3 {
                endpoint: None,
                bucket: "bkt".to_owned(),
                prefix: "x".to_owned(),
            }
        );
        assert!(StoreUri::parse("  ").is_err());
        assert!(StoreUri::parse("s3://").is_err());
    }

    #[test]
    fn joining() {
        let s3 = StoreUri::parse("s3://bkt").unwrap();
        match s3.join("/0/c/1") {
            StoreUri::S3 { prefix, .. } => assert_eq!(prefix, "0/c/1"),
            _ => panic!("wrong variant"),
        }
        let local = StoreUri::parse("/tmp/a").unwrap();
        assert_eq!(
            local.join("0/1"),
            StoreUri::Local(PathBuf::from("/tmp/a/0/1"))
        );
        assert_eq!(join_key("a/", "/b"), "a/b");
        assert_eq!(join_key("", "b"), "b");
    }
}
