//! Field validators
//!
//! A validator inspects a value that has already been coerced to its native
//! type and either accepts it or returns a failure message. Fields run their
//! validators in declaration order and stop at the first failure.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::value::Native;

type CheckFn = dyn Fn(&Native) -> std::result::Result<(), String> + Send + Sync;

/// A named value check.
///
/// Built-in validators carry a description of their parameters, so two
/// definitions using `range(0..)` and `range(18..)` fingerprint differently.
/// Caller closures have none and are compared by identity.
#[derive(Clone)]
pub struct Validator {
    name: String,
    params: Option<String>,
    check: Arc<CheckFn>,
}

impl Validator {
    /// Wrap a check that returns its own failure message
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Native) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params: None,
            check: Arc::new(check),
        }
    }

    fn described<F>(name: &str, params: String, check: F) -> Self
    where
        F: Fn(&Native) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            params: Some(params),
            check: Arc::new(check),
        }
    }

    /// Wrap a boolean predicate
    pub fn predicate<F>(name: impl Into<String>, pred: F) -> Self
    where
        F: Fn(&Native) -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        let label = name.clone();
        Self::new(name, move |value| {
            if pred(value) {
                Ok(())
            } else {
                Err(format!("Validator {}({:?}) is not True", label, value))
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `name(params)` for built-in validators; `None` for caller closures
    pub fn description(&self) -> Option<String> {
        self.params
            .as_ref()
            .map(|params| format!("{}({})", self.name, params))
    }

    pub fn check(&self, value: &Native) -> std::result::Result<(), String> {
        (self.check)(value)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(desc) => write!(f, "Validator({})", desc),
            None => write!(f, "Validator({})", self.name),
        }
    }
}

/// Numeric bounds, inclusive on both ends
pub fn range(min: Option<f64>, max: Option<f64>) -> Validator {
    let params = format!("min={:?},max={:?}", min, max);
    Validator::described("range", params, move |value| {
        let n = value
            .as_f64()
            .ok_or_else(|| format!("Expected a number, got {}.", value.type_name()))?;
        match (min, max) {
            (Some(lo), Some(hi)) if n < lo || n > hi => {
                Err(format!("Must be between {} and {}.", lo, hi))
            }
            (Some(lo), None) if n < lo => Err(format!("Must be at least {}.", lo)),
            (None, Some(hi)) if n > hi => Err(format!("Must be at most {}.", hi)),
            _ => Ok(()),
        }
    })
}

/// Length bounds for strings, lists and maps
pub fn length(min: Option<usize>, max: Option<usize>) -> Validator {
    let params = format!("min={:?},max={:?}", min, max);
    Validator::described("length", params, move |value| {
        let len = value
            .len()
            .ok_or_else(|| format!("{} has no length.", value.type_name()))?;
        match (min, max) {
            (Some(lo), Some(hi)) if len < lo || len > hi => {
                Err(format!("Length must be between {} and {}.", lo, hi))
            }
            (Some(lo), None) if len < lo => Err(format!("Shorter than minimum length {}.", lo)),
            (None, Some(hi)) if len > hi => Err(format!("Longer than maximum length {}.", hi)),
            _ => Ok(()),
        }
    })
}

pub fn equal(expected: impl Into<Native>) -> Validator {
    let expected = expected.into();
    Validator::described("equal", format!("{:?}", expected), move |value| {
        if *value == expected {
            Ok(())
        } else {
            Err(format!("Must be equal to {:?}.", expected))
        }
    })
}

pub fn one_of<T: Into<Native>>(choices: impl IntoIterator<Item = T>) -> Validator {
    let choices: Vec<Native> = choices.into_iter().map(Into::into).collect();
    Validator::described("one_of", format!("{:?}", choices), move |value| {
        if choices.contains(value) {
            Ok(())
        } else {
            Err("Not a valid choice.".to_string())
        }
    })
}

pub fn none_of<T: Into<Native>>(forbidden: impl IntoIterator<Item = T>) -> Validator {
    let forbidden: Vec<Native> = forbidden.into_iter().map(Into::into).collect();
    Validator::described("none_of", format!("{:?}", forbidden), move |value| {
        if forbidden.contains(value) {
            Err("Invalid input.".to_string())
        } else {
            Ok(())
        }
    })
}

/// String must match `pattern` (anchored at the start only)
pub fn regexp(pattern: &str) -> Result<Validator> {
    let re = Regex::new(&format!("^(?:{})", pattern))?;
    let source = pattern.to_string();
    let params = format!("{:?}", pattern);
    Ok(Validator::described("regexp", params, move |value| {
        match value.as_str() {
            Some(s) if re.is_match(s) => Ok(()),
            Some(_) => Err(format!("String does not match expected pattern {}.", source)),
            None => Err(format!("Expected a string, got {}.", value.type_name())),
        }
    }))
}

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[a-z0-9.!#$%&'*+/=?^_`{|}~-]+@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}$")
        .expect("email pattern is valid")
});

static ABSOLUTE_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)^[a-z][a-z0-9.+-]*://",
        r"(?:[^:@/\s]+(?::[^@/\s]*)?@)?",
        r"(?:(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z0-9-]{2,}\.?|localhost|\d{1,3}(?:\.\d{1,3}){3}|\[[a-f0-9:]+\])",
        r"(?::\d+)?",
        r"(?:/?|[/?#]\S+)$",
    ))
    .expect("url pattern is valid")
});

static RELATIVE_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:/|\.{1,2}/|[^\s:/?#]+(?:/|$))\S*$").expect("relative url pattern is valid")
});

/// Check an email address, returning it unchanged on success
pub fn validate_email(input: &str) -> std::result::Result<String, String> {
    if EMAIL_RE.is_match(input) {
        Ok(input.to_string())
    } else {
        Err(format!("{:?} is not a valid email address.", input))
    }
}

/// Check a URL; `relative` additionally accepts scheme-less paths
pub fn validate_url(input: &str, relative: bool) -> std::result::Result<String, String> {
    if ABSOLUTE_URL_RE.is_match(input) || (relative && RELATIVE_URL_RE.is_match(input)) {
        Ok(input.to_string())
    } else {
        Err(format!("{:?} is not a valid URL.", input))
    }
}

pub fn email() -> Validator {
    Validator::described("email", String::new(), |value| match value.as_str() {
        Some(s) => validate_email(s).map(|_| ()),
        None => Err(format!("Expected a string, got {}.", value.type_name())),
    })
}

pub fn url(relative: bool) -> Validator {
    let params = format!("relative={}", relative);
    Validator::described("url", params, move |value| match value.as_str() {
        Some(s) => validate_url(s, relative).map(|_| ()),
        None => Err(format!("Expected a string, got {}.", value.type_name())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_messages() {
        let v = range(Some(18.0), Some(99.0));
        assert!(v.check(&Native::Int(30)).is_ok());
        assert_eq!(
            v.check(&Native::Int(12)).unwrap_err(),
            "Must be between 18 and 99."
        );
        assert!(range(Some(0.0), None).check(&Native::Float(-0.5)).is_err());
        assert!(v.check(&Native::from("thirty")).is_err());
    }

    #[test]
    fn test_length_counts_chars() {
        let v = length(Some(2), Some(3));
        assert!(v.check(&Native::from("été")).is_ok());
        assert_eq!(
            v.check(&Native::from("a")).unwrap_err(),
            "Length must be between 2 and 3."
        );
        assert!(length(None, Some(1))
            .check(&Native::from(vec![1, 2]))
            .is_err());
    }

    #[test]
    fn test_one_of_and_none_of() {
        assert!(one_of(["red", "blue"]).check(&Native::from("red")).is_ok());
        assert!(one_of(["red", "blue"]).check(&Native::from("green")).is_err());
        assert!(none_of([0]).check(&Native::Int(0)).is_err());
    }

    #[test]
    fn test_regexp_is_anchored_at_start() {
        let v = regexp(r"[a-z]+").unwrap();
        assert!(v.check(&Native::from("abc123")).is_ok());
        assert!(v.check(&Native::from("123abc")).is_err());
        assert!(regexp("(").is_err());
    }

    #[test]
    fn test_predicate_message() {
        let v = Validator::predicate("is_even", |n| n.as_i64().map_or(false, |n| n % 2 == 0));
        assert_eq!(
            v.check(&Native::Int(3)).unwrap_err(),
            "Validator is_even(Int(3)) is not True"
        );
    }

    #[test]
    fn test_descriptions_carry_parameters() {
        assert_eq!(
            range(Some(18.0), None).description().unwrap(),
            "range(min=Some(18.0),max=None)"
        );
        assert_ne!(
            range(Some(0.0), None).description(),
            range(Some(18.0), None).description()
        );
        assert_eq!(email().description().unwrap(), "email()");
        assert!(Validator::new("custom", |_| Ok(())).description().is_none());
    }

    #[test]
    fn test_email_and_url() {
        assert!(validate_email("joe@example.com").is_ok());
        assert!(validate_email("joe@").is_err());
        assert!(validate_url("https://example.com/path?q=1", false).is_ok());
        assert!(validate_url("http://localhost:8080", false).is_ok());
        assert!(validate_url("/relative/path", false).is_err());
        assert!(validate_url("/relative/path", true).is_ok());
        assert!(validate_url("not a url", true).is_err());
    }
}
