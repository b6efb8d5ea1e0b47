//! Route shape analysis: HTTP methods, major parameters and bucket-hash keys.
//!
//! The server groups routes into buckets it only reveals in responses. Before any response has
//! been seen, the client computes a *bucket-hash key* purely from the request shape; once a
//! response teaches the bucket hash for that shape, every later request with the same key can
//! reuse it, even for resource instances never contacted before.
//!
//! ```rust
//! use bucketry::route::{bucket_hash_key, Method};
//!
//! let a = bucket_hash_key(Method::Patch, "/channels/123").unwrap();
//! let b = bucket_hash_key(Method::Patch, "/channels/456").unwrap();
//! assert_eq!(a, b);
//! assert_eq!(a, "A:ch");
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::ApiError;

/// HTTP methods understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Upper-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Single-character prefix used in bucket-hash keys.
    fn key_char(&self) -> char {
        match self {
            Method::Get => 'G',
            Method::Post => 'P',
            Method::Put => 'U',
            Method::Patch => 'A',
            Method::Delete => 'D',
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(ApiError::InvalidRequest(format!("unsupported method `{other}`"))),
        }
    }
}

/// The resource type and instance that scope a bucket, plus the remaining path segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MajorParameters<'a> {
    /// First path segment, e.g. `channels`.
    pub top_level_resource: &'a str,
    /// Second path segment, e.g. the channel id. Empty when the path has one segment.
    pub top_level_id: &'a str,
    /// Everything after the major parameters.
    pub minor: Vec<&'a str>,
}

impl<'a> MajorParameters<'a> {
    /// Split a request path. Leading slashes and the query string are ignored.
    pub fn from_path(path: &'a str) -> Result<Self, ApiError> {
        let path = strip_query(path).trim_start_matches('/');
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let top_level_resource = segments
            .next()
            .ok_or_else(|| ApiError::InvalidRequest("request path is empty".to_string()))?;
        let top_level_id = segments.next().unwrap_or("");
        Ok(Self { top_level_resource, top_level_id, minor: segments.collect() })
    }
}

/// Compute the route-shape key for `method` + `path`.
///
/// Stable across calls and processes: it depends on nothing but the two inputs.
pub fn bucket_hash_key(method: Method, path: &str) -> Result<String, ApiError> {
    let params = MajorParameters::from_path(path)?;
    let mut key = String::with_capacity(16);
    key.push(method.key_char());
    key.push(':');
    key.push_str(abbreviate(params.top_level_resource));
    for segment in params.minor {
        key.push(':');
        key.push_str(abbreviate(segment));
    }
    Ok(key)
}

fn strip_query(path: &str) -> &str {
    path.split_once('?').map_or(path, |(p, _)| p)
}

fn abbreviate(segment: &str) -> &str {
    if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
        return "#";
    }
    match segment {
        "channels" => "ch",
        "guilds" => "gu",
        "webhooks" => "wh",
        "messages" => "msg",
        "reactions" => "rct",
        "members" => "mbr",
        "roles" => "rol",
        "bans" => "ban",
        "pins" => "pin",
        "invites" => "inv",
        "users" => "usr",
        "@me" => "me",
        "permissions" => "prm",
        "typing" => "typ",
        "bulk-delete" => "bd",
        "threads" => "thr",
        "emojis" => "emj",
        "interactions" => "int",
        "callback" => "cb",
        "applications" => "app",
        "commands" => "cmd",
        "gateway" => "gw",
        "bot" => "bot",
        other => other,
    }
}
