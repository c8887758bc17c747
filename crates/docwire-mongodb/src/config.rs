//! Cursor and field-name policy configuration.
//!
//! # Example
//! ```rust,ignore
//! use docwire_mongodb::{CursorOptions, FieldNamePolicy};
//!
//! // From environment
//! let options = CursorOptions::from_env()?;
//! let policy = FieldNamePolicy::from_env()?;
//!
//! // Or explicit configuration
//! let options = CursorOptions::default().with_batch_size(100).with_limit(1_000);
//! let policy = FieldNamePolicy::new(DottedKeyPolicy::for_wire_version(max_wire_version));
//! ```

use docwire_common::{DocwireError, Result};
use std::time::Duration;

/// Upper bound for the best-effort kill issued on dispose
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(10);

/// First wire version whose servers accept dotted field names in stored documents
pub const DOTTED_FIELD_NAMES_WIRE_VERSION: i32 = 13;

const ENV_BATCH_SIZE: &str = "DOCWIRE_CURSOR_BATCH_SIZE";
const ENV_LIMIT: &str = "DOCWIRE_CURSOR_LIMIT";
const ENV_KILL_TIMEOUT_MS: &str = "DOCWIRE_KILL_CURSOR_TIMEOUT_MS";
const ENV_TOP_LEVEL_DOTTED_KEYS: &str = "DOCWIRE_TOP_LEVEL_DOTTED_KEYS";

/// Cursor configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorOptions {
    /// Documents requested per getMore (None: server default)
    pub batch_size: Option<u32>,
    /// Maximum number of documents the cursor will ever yield (None: unlimited)
    pub limit: Option<u32>,
    /// Bound on the kill issued when the cursor is disposed or dropped
    pub kill_timeout: Duration,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            batch_size: None,
            limit: None,
            kill_timeout: DEFAULT_KILL_TIMEOUT,
        }
    }
}

impl CursorOptions {
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_kill_timeout(mut self, timeout: Duration) -> Self {
        self.kill_timeout = timeout;
        self
    }

    /// Create cursor options from environment variables.
    ///
    /// - `DOCWIRE_CURSOR_BATCH_SIZE` -> `batch_size`
    /// - `DOCWIRE_CURSOR_LIMIT` -> `limit`
    /// - `DOCWIRE_KILL_CURSOR_TIMEOUT_MS` -> `kill_timeout`
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();
        if let Some(raw) = lookup(ENV_BATCH_SIZE) {
            options.batch_size = Some(parse_u32(ENV_BATCH_SIZE, &raw)?);
        }
        if let Some(raw) = lookup(ENV_LIMIT) {
            options.limit = Some(parse_u32(ENV_LIMIT, &raw)?);
        }
        if let Some(raw) = lookup(ENV_KILL_TIMEOUT_MS) {
            let millis = raw.trim().parse::<u64>().map_err(|e| {
                DocwireError::Configuration(format!(
                    "{} must be a number of milliseconds, got '{}': {}",
                    ENV_KILL_TIMEOUT_MS, raw, e
                ))
            })?;
            options.kill_timeout = Duration::from_millis(millis);
        }
        Ok(options)
    }

    /// Size to request on the next getMore, given how many documents were already received.
    ///
    /// A limit shrinks the request to what is still allowed; `None` lets the server pick.
    pub fn next_batch_size(&self, received: u64) -> Option<u32> {
        let batch_size = self.batch_size.filter(|n| *n > 0);
        match self.limit.filter(|n| *n > 0) {
            Some(limit) => {
                let remaining = u64::from(limit).saturating_sub(received);
                let remaining = u32::try_from(remaining).unwrap_or(u32::MAX);
                match batch_size {
                    Some(n) if n <= remaining => Some(n),
                    _ => Some(remaining),
                }
            }
            None => batch_size,
        }
    }
}

fn parse_u32(key: &str, raw: &str) -> Result<u32> {
    raw.trim().parse::<u32>().map_err(|e| {
        DocwireError::Configuration(format!(
            "{} must be a non-negative integer, got '{}': {}",
            key, raw, e
        ))
    })
}

/// Whether a replacement document may use dotted keys at its top level.
///
/// Servers negotiated at an older wire version reject them, newer ones store
/// them as-is. There is deliberately no default: callers pick one explicitly
/// or derive it from the negotiated wire version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DottedKeyPolicy {
    Allow,
    Reject,
}

impl DottedKeyPolicy {
    /// Derive the policy from the max wire version negotiated with the server
    pub fn for_wire_version(max_wire_version: i32) -> Self {
        if max_wire_version >= DOTTED_FIELD_NAMES_WIRE_VERSION {
            DottedKeyPolicy::Allow
        } else {
            DottedKeyPolicy::Reject
        }
    }

    pub fn allows_dots(self) -> bool {
        self == DottedKeyPolicy::Allow
    }
}

impl std::str::FromStr for DottedKeyPolicy {
    type Err = DocwireError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "allow" => Ok(DottedKeyPolicy::Allow),
            "reject" => Ok(DottedKeyPolicy::Reject),
            other => Err(DocwireError::Configuration(format!(
                "Unknown dotted key policy: '{}'. Expected 'allow' or 'reject'",
                other
            ))),
        }
    }
}

/// Field-name rules that depend on the server rather than on the write itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldNamePolicy {
    pub top_level_dotted_keys: DottedKeyPolicy,
}

impl FieldNamePolicy {
    pub fn new(top_level_dotted_keys: DottedKeyPolicy) -> Self {
        Self {
            top_level_dotted_keys,
        }
    }

    /// Create the policy from `DOCWIRE_TOP_LEVEL_DOTTED_KEYS` (`allow` or `reject`).
    ///
    /// The variable is required.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = lookup(ENV_TOP_LEVEL_DOTTED_KEYS).ok_or_else(|| {
            DocwireError::Configuration(format!("{} is not set", ENV_TOP_LEVEL_DOTTED_KEYS))
        })?;
        Ok(Self::new(raw.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_cursor_options() {
        let options = CursorOptions::default();
        assert_eq!(options.batch_size, None);
        assert_eq!(options.limit, None);
        assert_eq!(options.kill_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_cursor_options_builder() {
        let options = CursorOptions::default()
            .with_batch_size(50)
            .with_limit(120)
            .with_kill_timeout(Duration::from_millis(250));
        assert_eq!(options.batch_size, Some(50));
        assert_eq!(options.limit, Some(120));
        assert_eq!(options.kill_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_cursor_options_from_lookup() {
        let options = CursorOptions::from_lookup(lookup_from(&[
            ("DOCWIRE_CURSOR_BATCH_SIZE", "200"),
            ("DOCWIRE_CURSOR_LIMIT", " 1000 "),
            ("DOCWIRE_KILL_CURSOR_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();
        assert_eq!(options.batch_size, Some(200));
        assert_eq!(options.limit, Some(1000));
        assert_eq!(options.kill_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_cursor_options_from_empty_lookup_uses_defaults() {
        let options = CursorOptions::from_lookup(|_| None).unwrap();
        assert_eq!(options, CursorOptions::default());
    }

    #[test]
    fn test_cursor_options_rejects_garbage() {
        let err = CursorOptions::from_lookup(lookup_from(&[("DOCWIRE_CURSOR_BATCH_SIZE", "-3")]))
            .unwrap_err();
        assert!(matches!(err, DocwireError::Configuration(_)));
        assert!(err.to_string().contains("DOCWIRE_CURSOR_BATCH_SIZE"));

        let err =
            CursorOptions::from_lookup(lookup_from(&[("DOCWIRE_KILL_CURSOR_TIMEOUT_MS", "soon")]))
                .unwrap_err();
        assert!(err.to_string().contains("milliseconds"));
    }

    // =====================
    // getMore size Tests
    // =====================

    #[test]
    fn test_next_batch_size_without_limit() {
        assert_eq!(CursorOptions::default().next_batch_size(0), None);
        assert_eq!(
            CursorOptions::default().with_batch_size(25).next_batch_size(500),
            Some(25)
        );
    }

    #[test]
    fn test_next_batch_size_zero_batch_size_means_server_default() {
        assert_eq!(
            CursorOptions::default().with_batch_size(0).next_batch_size(0),
            None
        );
    }

    #[test]
    fn test_next_batch_size_shrinks_to_remaining_limit() {
        let options = CursorOptions::default().with_batch_size(10).with_limit(25);
        assert_eq!(options.next_batch_size(0), Some(10));
        assert_eq!(options.next_batch_size(20), Some(5));
    }

    #[test]
    fn test_next_batch_size_limit_only() {
        let options = CursorOptions::default().with_limit(7);
        assert_eq!(options.next_batch_size(3), Some(4));
    }

    // =====================
    // DottedKeyPolicy Tests
    // =====================

    #[test]
    fn test_dotted_key_policy_for_wire_version() {
        assert_eq!(DottedKeyPolicy::for_wire_version(8), DottedKeyPolicy::Reject);
        assert_eq!(DottedKeyPolicy::for_wire_version(12), DottedKeyPolicy::Reject);
        assert_eq!(DottedKeyPolicy::for_wire_version(13), DottedKeyPolicy::Allow);
        assert_eq!(DottedKeyPolicy::for_wire_version(21), DottedKeyPolicy::Allow);
    }

    #[test]
    fn test_dotted_key_policy_from_str() {
        assert_eq!("allow".parse::<DottedKeyPolicy>().unwrap(), DottedKeyPolicy::Allow);
        assert_eq!("REJECT".parse::<DottedKeyPolicy>().unwrap(), DottedKeyPolicy::Reject);
        assert!("maybe".parse::<DottedKeyPolicy>().is_err());
    }

    #[test]
    fn test_field_name_policy_requires_variable() {
        let err = FieldNamePolicy::from_lookup(|_| None).unwrap_err();
        assert!(err.to_string().contains("DOCWIRE_TOP_LEVEL_DOTTED_KEYS"));

        let policy =
            FieldNamePolicy::from_lookup(lookup_from(&[("DOCWIRE_TOP_LEVEL_DOTTED_KEYS", "allow")]))
                .unwrap();
        assert!(policy.top_level_dotted_keys.allows_dots());
    }
}
