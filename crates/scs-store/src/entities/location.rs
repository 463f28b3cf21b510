use serde::Serialize;

use scs_core::error::{Result, ScsError};

use crate::record::Record;

/// A physical location, keyed by an exactly-3-character code.
#[derive(Debug, Clone, Serialize)]
pub struct Location {
    pub code: String,
    pub name: String,
    pub description: String,
}

impl Record for Location {
    const FILE: &'static str = "location";
    const KIND: &'static str = "location";
    const FIELD_COUNT: usize = 3;

    fn key(&self) -> String {
        self.code.clone()
    }

    fn parse(f: &[&str]) -> Result<Self> {
        Ok(Self {
            code: f[0].to_string(),
            name: f[1].to_string(),
            description: f[2].to_string(),
        })
    }

    fn fields(&self) -> Vec<String> {
        vec![self.code.clone(), self.name.clone(), self.description.clone()]
    }

    fn validate(&self) -> Result<()> {
        if self.code.len() != 3 {
            return Err(ScsError::validation(format!(
                "location code must be exactly 3 characters, got '{}'",
                self.code
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_length() {
        let mut loc = Location {
            code: "nyc".to_string(),
            name: "New York".to_string(),
            description: String::new(),
        };
        assert!(loc.validate().is_ok());
        loc.code = "ny".to_string();
        assert!(loc.validate().is_err());
        loc.code = "nyca".to_string();
        assert!(loc.validate().is_err());
    }
}
