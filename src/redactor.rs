//! Sensitive-data redaction
//!
//! The redactor takes any JSON value and returns a structurally identical
//! value with sensitive substrings masked. It operates on strings; for maps
//! it recurses into values (keys are left alone); for arrays it recurses
//! element-wise. Redaction is idempotent: masking an already-masked value is
//! a no-op, so records may safely pass through the redactor more than once.
//!
//! User-supplied patterns run before the built-ins. The redactor never
//! fails: an internal fault returns the input unchanged and logs at debug.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

struct Rule {
    regex: Regex,
    replacement: &'static str,
}

// Key/value secrets keep their key prefix; the value runs to whitespace,
// comma, or quote. The masks contain no digits and re-match to themselves,
// which is what makes redact(redact(x)) == redact(x) hold.
static BUILTIN_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule {
            regex: Regex::new(r#"(?i)\b(password\s*=\s*)[^\s,"']+"#).unwrap(),
            replacement: "${1}****",
        },
        Rule {
            regex: Regex::new(r#"(?i)\b(api[_-]?key\s*=\s*)[^\s,"']+"#).unwrap(),
            replacement: "${1}****",
        },
        Rule {
            regex: Regex::new(r#"(?i)\b(token\s*=\s*)[^\s,"']+"#).unwrap(),
            replacement: "${1}****",
        },
        Rule {
            regex: Regex::new(r#"(?i)\b(secret\s*=\s*)[^\s,"']+"#).unwrap(),
            replacement: "${1}****",
        },
        // 16-digit card numbers, with optional space/dash grouping.
        Rule {
            regex: Regex::new(r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{4}\b").unwrap(),
            replacement: "****-****-****-****",
        },
        // SSN-shaped NNN-NN-NNNN.
        Rule {
            regex: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(),
            replacement: "***-**-****",
        },
    ]
});

/// Pattern-based masker for arbitrary values.
#[derive(Default)]
pub struct Redactor {
    user_rules: Vec<(Regex, String)>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user pattern, applied before the built-ins. The
    /// replacement string may reference capture groups (`${1}`).
    pub fn add_pattern(&mut self, pattern: &str, replacement: &str) -> Result<(), regex::Error> {
        let regex = Regex::new(pattern)?;
        self.user_rules.push((regex, replacement.to_string()));
        Ok(())
    }

    /// Mask sensitive substrings in a string.
    pub fn redact_str(&self, input: &str) -> String {
        let mut out = input.to_string();
        for (regex, replacement) in &self.user_rules {
            out = regex.replace_all(&out, replacement.as_str()).into_owned();
        }
        for rule in BUILTIN_RULES.iter() {
            out = rule.regex.replace_all(&out, rule.replacement).into_owned();
        }
        out
    }

    /// Mask sensitive substrings anywhere inside a JSON value, preserving
    /// the value's shape. Never fails; an internal fault yields the input
    /// unchanged.
    pub fn redact_value(&self, value: &Value) -> Value {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.redact_value_inner(value)
        }));
        match result {
            Ok(redacted) => redacted,
            Err(_) => {
                debug!("redactor internal fault; returning value unredacted");
                value.clone()
            }
        }
    }

    fn redact_value_inner(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.redact_str(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.redact_value_inner(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.redact_value_inner(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}
