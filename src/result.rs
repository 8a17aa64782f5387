//! Dump and load results

use crate::tree::ErrorTree;
use crate::value::Native;

/// Produced data together with the errors met while producing it.
///
/// Non-strict calls always return an outcome; the error tree is empty when
/// every field converted cleanly.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    data: T,
    errors: ErrorTree,
}

/// Result of a dump: primitive data
pub type MarshalResult = Outcome<serde_json::Value>;

/// Result of a load: native data
pub type UnmarshalResult = Outcome<Native>;

impl<T> Outcome<T> {
    pub fn new(data: T, errors: ErrorTree) -> Self {
        Self { data, errors }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn errors(&self) -> &ErrorTree {
        &self.errors
    }

    /// True when no field failed
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_parts(self) -> (T, ErrorTree) {
        (self.data, self.errors)
    }

    pub fn into_data(self) -> T {
        self.data
    }

    /// `Ok(data)` when valid, otherwise the partial data with its errors
    pub fn into_result(self) -> Result<T, (T, ErrorTree)> {
        if self.errors.is_empty() {
            Ok(self.data)
        } else {
            Err((self.data, self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_result() {
        let ok = MarshalResult::new(json!({"a": 1}), ErrorTree::new());
        assert!(ok.is_valid());
        assert_eq!(ok.into_result().unwrap(), json!({"a": 1}));

        let mut errors = ErrorTree::new();
        errors.add_message("b", "Not a valid integer.");
        let bad = MarshalResult::new(json!({"a": 1}), errors);
        let (data, errors) = bad.into_result().unwrap_err();
        assert_eq!(data, json!({"a": 1}));
        assert_eq!(errors.messages("b").unwrap(), ["Not a valid integer."]);
    }
}
