//! JSON decode hardening for upstream API payloads.

use anyhow::{Result, anyhow};

/// Parse JSON and, on failure, report the serde path and location of the
/// mismatch instead of a bare error message.
pub fn parse_json_with_path<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let path = err.path().to_string();
        let inner = err.into_inner();
        let (line, column) = (inner.line(), inner.column());
        if path.is_empty() || path == "." {
            anyhow!("{inner} (line {line} col {column})")
        } else {
            anyhow!("at path '{path}': {inner} (line {line} col {column})")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Rates {
        #[allow(dead_code)]
        rates: std::collections::HashMap<String, f64>,
    }

    #[test]
    fn error_includes_path() {
        let body = r#"{"rates": {"USD": "not-a-number"}}"#;
        let err = parse_json_with_path::<Rates>(body).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("rates.USD"), "missing path in: {msg}");
    }

    #[test]
    fn valid_payload_parses() {
        let body = r#"{"rates": {"USD": 1.0, "AUD": 1.52}}"#;
        let rates: Rates = parse_json_with_path(body).unwrap();
        assert_eq!(rates.rates.len(), 2);
    }
}
