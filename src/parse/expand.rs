//! `$VAR` / `${VAR}` interpolation

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))").unwrap()
});

/// Expands `$VAR` and `${VAR}` references using `lookup`.
///
/// Unknown variables expand to the empty string, as a POSIX shell would.
pub fn expand<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    VAR_PATTERN
        .replace_all(input, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            lookup(name).unwrap_or_default()
        })
        .into_owned()
}
