//! Logical resource addresses and cache identity.
//!
//! A [`ResourceKey`] is the normalized identity of a resource address:
//!
//! - the path split into non-empty segments (`/items/` and `items` are the
//!   same as `/items`),
//! - the query pairs that are not transient, percent-decoded and sorted by
//!   name then value.
//!
//! Addresses are parsed as URLs. Relative addresses resolve against a fixed
//! placeholder origin, and an address starting with `/` is always a path.
//! Scheme, host and fragment never participate. Transient parameters are
//! the configured cache-busting names (see
//! [`crate::config::DEFAULT_TRANSIENT_PARAMS`]); every other parameter,
//! including pagination, is part of the key.
//!
//! Subtree matching works on whole segments, so `/items` covers
//! `/items/1` and `/items?page=2` but not `/itemsets`.

use crate::error::{SyncError, SyncResult};
use crate::transport::WriteMethod;
use std::fmt;
use url::{form_urlencoded, ParseError, Url};

/// Origin that relative addresses are resolved against. Never contacted.
const RELATIVE_BASE: &str = "http://offsync.invalid/";

/// Normalized identity of a logical resource address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    segments: Vec<String>,
    query: Vec<(String, String)>,
}

impl ResourceKey {
    /// Parses an address, dropping the query parameters named in `transient`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTarget`] for empty or whitespace-bearing
    /// addresses and for URLs without a hierarchical path (`mailto:`).
    pub fn parse(address: &str, transient: &[String]) -> SyncResult<Self> {
        let invalid = || SyncError::InvalidTarget(address.to_string());

        let trimmed = address.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        let url = resolve(trimmed).ok_or_else(invalid)?;
        let segments = url
            .path_segments()
            .ok_or_else(invalid)?
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !transient.iter().any(|t| t == k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.sort();

        Ok(Self {
            segments,
            query: pairs,
        })
    }

    /// Builds a path-only key from segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
        }
    }

    /// Returns the path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the retained query pairs, sorted.
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Returns this key without its query.
    pub fn path_key(&self) -> Self {
        Self {
            segments: self.segments.clone(),
            query: Vec::new(),
        }
    }

    /// Returns the parent path, or the path itself when it has at most one
    /// segment.
    pub fn parent(&self) -> Self {
        let keep = self.segments.len().saturating_sub(1).max(1);
        Self {
            segments: self.segments.iter().take(keep).cloned().collect(),
            query: Vec::new(),
        }
    }

    /// Returns true if this key lies in the subtree rooted at `prefix`.
    ///
    /// Only the prefix path participates; its query is ignored.
    pub fn is_within(&self, prefix: &ResourceKey) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Returns the subtree invalidated by a successful write to this address.
    ///
    /// POST targets a collection and invalidates it; PUT, PATCH and DELETE
    /// target a member and invalidate the parent collection.
    pub fn invalidation_scope(&self, method: WriteMethod) -> Self {
        match method {
            WriteMethod::Post => self.path_key(),
            WriteMethod::Put | WriteMethod::Patch | WriteMethod::Delete => self.parent(),
        }
    }
}

fn resolve(address: &str) -> Option<Url> {
    let base = || Url::parse(RELATIVE_BASE).ok();
    if address.starts_with('/') {
        let path = format!("/{}", address.trim_start_matches('/'));
        return base()?.join(&path).ok();
    }
    match Url::parse(address) {
        Ok(url) => Some(url),
        Err(ParseError::RelativeUrlWithoutBase) => base()?.join(address).ok(),
        Err(_) => None,
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))?;
        for (i, (k, v)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            let name: String = form_urlencoded::byte_serialize(k.as_bytes()).collect();
            if v.is_empty() {
                write!(f, "{sep}{name}")?;
            } else {
                let value: String = form_urlencoded::byte_serialize(v.as_bytes()).collect();
                write!(f, "{sep}{name}={value}")?;
            }
        }
        Ok(())
    }
}
