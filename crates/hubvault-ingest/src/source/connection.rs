//! Parsing of `Key=Value;...` hub connection strings.

use crate::error::{Error, Result};
use std::fmt;

/// A `Key=Value;Key=Value` connection string.
///
/// Keys are matched case-insensitively. If no `EntityPath` is present the
/// configured entity path is appended.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pairs: Vec<(String, String)>,
}

impl ConnectionString {
    /// Parse `raw`, appending `EntityPath=<entity_path>` if it is absent.
    pub fn parse(raw: &str, entity_path: &str) -> Result<Self> {
        let mut pairs = Vec::new();
        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                Error::Config(format!(
                    "connection string segment '{}' is not Key=Value",
                    part
                ))
            })?;
            pairs.push((key.trim().to_string(), value.trim().to_string()));
        }

        let mut conn = Self { pairs };
        if conn.get("EntityPath").is_none() && !entity_path.is_empty() {
            conn.pairs
                .push(("EntityPath".to_string(), entity_path.to_string()));
        }
        Ok(conn)
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.get("Endpoint")
    }

    pub fn entity_path(&self) -> Option<&str> {
        self.get("EntityPath")
    }

    pub fn key_name(&self) -> Option<&str> {
        self.get("SharedAccessKeyName")
    }

    pub fn key(&self) -> Option<&str> {
        self.get("SharedAccessKey")
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.pairs {
            if !first {
                f.write_str(";")?;
            }
            first = false;
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

// Keeps the shared key out of logs
impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint())
            .field("entity_path", &self.entity_path())
            .field("key_name", &self.key_name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_entity_path() {
        let conn = ConnectionString::parse(
            "Endpoint=tcp://127.0.0.1:9000/;SharedAccessKeyName=send;SharedAccessKey=abc=",
            "eh1",
        )
        .unwrap();

        assert_eq!(conn.endpoint(), Some("tcp://127.0.0.1:9000/"));
        assert_eq!(conn.entity_path(), Some("eh1"));
        assert_eq!(conn.key_name(), Some("send"));
        assert_eq!(conn.key(), Some("abc="));
        assert!(conn.to_string().ends_with(";EntityPath=eh1"));
    }

    #[test]
    fn test_keeps_existing_entity_path() {
        let conn = ConnectionString::parse("Endpoint=tcp://h:1;entitypath=orders;", "eh1").unwrap();
        assert_eq!(conn.entity_path(), Some("orders"));
        assert_eq!(conn.to_string(), "Endpoint=tcp://h:1;entitypath=orders");
    }

    #[test]
    fn test_rejects_malformed_segment() {
        let err = ConnectionString::parse("Endpoint=tcp://h:1;garbage", "eh1").unwrap_err();
        assert!(err.to_string().contains("'garbage'"));
    }

    #[test]
    fn test_debug_hides_key() {
        let conn = ConnectionString::parse("Endpoint=tcp://h:1;SharedAccessKey=secret", "e").unwrap();
        assert!(!format!("{:?}", conn).contains("secret"));
    }
}
