//! Method key normalization.

use std::borrow::Borrow;
use std::fmt;

use crate::error::{MethodwireError, Result};

/// Suffix stripped from handler names when deriving their key.
const ASYNC_SUFFIX: &str = "async";

/// Normalized, case-insensitive method name.
///
/// The same normalization (trim + lower-case) is applied when a handler is
/// registered and when a caller's method name is looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey(String);

impl MethodKey {
    /// Normalize a caller-supplied method name for lookup.
    pub fn normalize(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }

    /// Derive the key a handler named `handler_name` is registered under.
    ///
    /// A trailing `Async` is stripped and, when the controller carries a
    /// version tag, `_v<version>` is appended:
    ///
    /// ```
    /// use methodwire::handler::MethodKey;
    ///
    /// let key = MethodKey::for_handler("GetStatusAsync", Some("2")).unwrap();
    /// assert_eq!(key.as_str(), "getstatus_v2");
    /// ```
    pub fn for_handler(handler_name: &str, version: Option<&str>) -> Result<Self> {
        let trimmed = handler_name.trim();
        let base = strip_async_suffix(trimmed);
        if base.is_empty() {
            return Err(MethodwireError::InvalidMethodName(handler_name.to_string()));
        }

        let name = match version.map(str::trim).filter(|v| !v.is_empty()) {
            Some(version) => format!("{}_v{}", base, version),
            None => base.to_string(),
        };
        Ok(Self::normalize(&name))
    }

    /// The normalized key string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn strip_async_suffix(name: &str) -> &str {
    let split = name.len().saturating_sub(ASYNC_SUFFIX.len());
    match name.get(split..) {
        Some(tail) if tail.eq_ignore_ascii_case(ASYNC_SUFFIX) => &name[..split],
        _ => name,
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for MethodKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for MethodKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
