//! Environment variable interpolation for config files.
//!
//! Supports the following syntax:
//! - `$VAR` or `${VAR}` - substitute with env var value, error if missing
//! - `${VAR:-default}` - use default if VAR is unset OR empty
//! - `${VAR-default}` - use default only if VAR is unset (empty is OK)
//! - `$$` - escape sequence for literal `$`

use std::env;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                           # Escape sequence $$
        |
        \$\{                           # Opening ${
            ([A-Za-z_][A-Za-z0-9_]*)   # Variable name (group 1)
            (?:
                (:?-)                  # :- or - (group 2)
                ([^}]*)                # Default value (group 3)
            )?
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)     # Unbraced $VAR (group 4)
        ",
    )
    .expect("static interpolation pattern is valid")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Every problem found, so all missing variables are reported at once.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate process environment variables in `input`.
pub fn interpolate(input: &str) -> InterpolationResult {
    interpolate_with(input, |name| env::var(name).ok())
}

/// Interpolate variables in `input`, resolving names through `lookup`.
pub fn interpolate_with<F>(input: &str, lookup: F) -> InterpolationResult
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| {
            let whole = &caps[0];
            if whole == "$$" {
                return "$".to_string();
            }

            let name = caps
                .get(1)
                .or_else(|| caps.get(4))
                .map(|m| m.as_str())
                .unwrap_or_default();
            let default_syntax = caps.get(2).map(|m| m.as_str());
            let default_value = caps.get(3).map(|m| m.as_str());

            match lookup(name) {
                Some(value) if value.contains('\n') || value.contains('\r') => {
                    errors.push(format!(
                        "environment variable '{name}' contains newlines, which is not allowed"
                    ));
                    whole.to_string()
                }
                Some(value) if value.is_empty() && default_syntax == Some(":-") => {
                    default_value.unwrap_or_default().to_string()
                }
                Some(value) => value,
                None => match default_value {
                    Some(default) => default.to_string(),
                    None => {
                        errors.push(format!("environment variable '{name}' is not set"));
                        whole.to_string()
                    }
                },
            }
        })
        .into_owned();

    InterpolationResult { text, errors }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let owned: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| {
            owned
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        }
    }

    #[test]
    fn test_basic_substitution() {
        let result = interpolate_with("OUT_PATH: $ROOT/out", vars(&[("ROOT", "/mnt")]));
        assert!(result.is_ok());
        assert_eq!(result.text, "OUT_PATH: /mnt/out");
    }

    #[test]
    fn test_braced_substitution() {
        let result = interpolate_with("x: ${ROOT}data", vars(&[("ROOT", "/mnt/")]));
        assert_eq!(result.text, "x: /mnt/data");
    }

    #[test]
    fn test_missing_variable_error() {
        let result = interpolate_with("a: $NOPE and ${ALSO_NOPE}", vars(&[]));
        assert!(!result.is_ok());
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].contains("NOPE"));
        assert!(result.errors[1].contains("not set"));
    }

    #[test]
    fn test_default_when_unset() {
        let result = interpolate_with("level: ${LOG:-INFO}", vars(&[]));
        assert_eq!(result.text, "level: INFO");
    }

    #[test]
    fn test_colon_default_applies_to_empty() {
        let result = interpolate_with("level: ${LOG:-INFO}", vars(&[("LOG", "")]));
        assert_eq!(result.text, "level: INFO");
    }

    #[test]
    fn test_dash_default_keeps_empty() {
        let result = interpolate_with("level: [${LOG-INFO}]", vars(&[("LOG", "")]));
        assert_eq!(result.text, "level: []");
    }

    #[test]
    fn test_newline_rejected() {
        let result = interpolate_with("x: $BAD", vars(&[("BAD", "a\nb")]));
        assert!(!result.is_ok());
        assert!(result.errors[0].contains("newlines"));
    }

    #[test]
    fn test_escape_sequence() {
        let result = interpolate_with("price: $$100", vars(&[]));
        assert!(result.is_ok());
        assert_eq!(result.text, "price: $100");
    }
}
