use serde::Serialize;

use scs_core::error::Result;
use scs_core::fields;

use crate::record::Record;

/// A declared constant name. Values live in the scoped value files; this
/// registry only fixes the name (lower-cased) and its description.
#[derive(Debug, Clone, Serialize)]
pub struct Constant {
    pub name: String,
    pub description: String,
}

impl Constant {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            description: fields::clean_description(description),
        }
    }
}

impl Record for Constant {
    const FILE: &'static str = "constant";
    const KIND: &'static str = "constant";
    const FIELD_COUNT: usize = 2;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn parse(f: &[&str]) -> Result<Self> {
        Ok(Self {
            name: f[0].to_lowercase(),
            description: f[1].to_string(),
        })
    }

    fn fields(&self) -> Vec<String> {
        vec![self.name.clone(), self.description.clone()]
    }

    fn validate(&self) -> Result<()> {
        fields::validate_name("constant", &self.name)
    }
}
