use serde::Serialize;

use scs_core::error::{Result, ScsError};
use scs_core::{Config, fields};

use crate::record::{Record, Store};

/// A deployment environment (production, qa, ...) with a single-letter
/// upper-case alias.
#[derive(Debug, Clone, Serialize)]
pub struct Environment {
    pub name: String,
    pub alias: String,
    pub description: String,
}

impl Record for Environment {
    const FILE: &'static str = "environment";
    const KIND: &'static str = "environment";
    const FIELD_COUNT: usize = 3;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn parse(f: &[&str]) -> Result<Self> {
        Ok(Self {
            name: f[0].to_string(),
            alias: f[1].to_string(),
            description: f[2].to_string(),
        })
    }

    fn fields(&self) -> Vec<String> {
        vec![self.name.clone(), self.alias.clone(), self.description.clone()]
    }

    fn validate(&self) -> Result<()> {
        fields::validate_name("environment", &self.name)?;
        let ok = self.alias.len() == 1
            && self.alias.chars().all(|c| c.is_ascii_uppercase());
        if !ok {
            return Err(ScsError::validation(format!(
                "environment alias must be a single upper-case letter, got '{}'",
                self.alias
            )));
        }
        Ok(())
    }
}

/// Create an environment, enforcing alias uniqueness.
pub fn create(cfg: &Config, env: Environment) -> Result<()> {
    check_alias(cfg, &env, None)?;
    Store::<Environment>::new(cfg).create(env)
}

/// Update an environment in place, with the same alias check as [`create`].
pub fn update(cfg: &Config, key: &str, env: Environment) -> Result<()> {
    check_alias(cfg, &env, Some(key))?;
    Store::<Environment>::new(cfg).update(key, env)
}

fn check_alias(cfg: &Config, env: &Environment, skip_key: Option<&str>) -> Result<()> {
    let taken = Store::<Environment>::new(cfg)
        .list()?
        .iter()
        .any(|e| e.alias == env.alias && Some(e.name.as_str()) != skip_key);
    if taken {
        return Err(ScsError::conflict(format!(
            "environment alias '{}' is already in use",
            env.alias
        )));
    }
    Ok(())
}
