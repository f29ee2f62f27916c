//! Key formatting and glob key patterns.
//!
//! Key formatting is the one string contract shared by every tier behind a
//! coordinator, so it must stay bit-exact:
//!
//! - a pattern containing `{}` has every placeholder replaced by the key
//!   (`"user:{}"` + `"123"` -> `"user:123"`)
//! - any other pattern is joined with a colon (`"user"` + `"123"` -> `"user:123"`)

use std::fmt::Display;

use regex::Regex;

use crate::error::{Error, Result};

/// Placeholder substituted by [`KeyFormat`]
pub const PLACEHOLDER: &str = "{}";

/// Key formatter bound to a single pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFormat {
    pattern: String,
    has_placeholder: bool,
}

impl KeyFormat {
    /// Create a formatter for `pattern`
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let has_placeholder = pattern.contains(PLACEHOLDER);
        Self {
            pattern,
            has_placeholder,
        }
    }

    /// The raw pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Format a single key
    pub fn format(&self, key: &str) -> String {
        if self.has_placeholder {
            self.pattern.replace(PLACEHOLDER, key)
        } else {
            format!("{}:{}", self.pattern, key)
        }
    }

    /// Fill successive placeholders with positional arguments.
    ///
    /// Surplus arguments are ignored and surplus placeholders are kept.
    pub fn render(&self, args: &[&dyn Display]) -> String {
        if args.is_empty() {
            return self.pattern.clone();
        }
        let mut result = String::with_capacity(self.pattern.len() + args.len() * 8);
        let mut rest = self.pattern.as_str();
        for arg in args {
            match rest.find(PLACEHOLDER) {
                Some(pos) => {
                    result.push_str(&rest[..pos]);
                    result.push_str(&arg.to_string());
                    rest = &rest[pos + PLACEHOLDER.len()..];
                }
                None => break,
            }
        }
        result.push_str(rest);
        result
    }
}

/// Compiled glob pattern over cache keys.
///
/// `*` matches any run of characters, `?` exactly one; everything else is
/// literal and the whole key must match.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    glob: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compile a glob
    pub fn new(glob: &str) -> Result<Self> {
        // Wildcards match any character, newline included
        let mut expr = String::with_capacity(glob.len() + 12);
        expr.push_str("(?s)^");
        let mut literal = [0u8; 4];
        for c in glob.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(other.encode_utf8(&mut literal))),
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| Error::InvalidPattern(format!("{}: {}", glob, e)))?;
        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    /// The source glob
    pub fn as_str(&self) -> &str {
        &self.glob
    }

    /// Check a key against the pattern
    #[inline]
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

// =============================================================================
// Tests
// =============================================================================
