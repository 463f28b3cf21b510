//! Scoped constant value files and the location/environment application
//! bindings. Five value scopes exist; resolution priority across them is
//! the resolver's concern, this module only owns the files.

use std::path::PathBuf;

use scs_core::error::{Result, ScsError};
use scs_core::{Config, fields};

/// One of the five value scopes, ordered here from lowest file specificity
/// to highest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// `value/constant`
    Global,
    /// `value/by-app/<app>`
    Application(String),
    /// `env/<env>/constant`
    Environment(String),
    /// `env/<env>/by-loc/<loc>`
    EnvLocation(String, String),
    /// `env/<env>/by-app/<app>`
    EnvApplication(String, String),
}

impl Scope {
    pub fn path(&self, cfg: &Config) -> PathBuf {
        match self {
            Self::Global => cfg.repo_path("value/constant"),
            Self::Application(app) => cfg.repo_path(format!("value/by-app/{}", app)),
            Self::Environment(env) => cfg.repo_path(format!("env/{}/constant", env)),
            Self::EnvLocation(env, loc) => cfg.repo_path(format!("env/{}/by-loc/{}", env, loc)),
            Self::EnvApplication(env, app) => cfg.repo_path(format!("env/{}/by-app/{}", env, app)),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Application(app) => write!(f, "application {}", app),
            Self::Environment(env) => write!(f, "environment {}", env),
            Self::EnvLocation(env, loc) => write!(f, "environment {} at {}", env, loc),
            Self::EnvApplication(env, app) => write!(f, "application {} in {}", app, env),
        }
    }
}

/// All `(name, value)` pairs defined in a scope, in file order. A missing
/// file is an empty scope.
pub fn list(cfg: &Config, scope: &Scope) -> Result<Vec<(String, String)>> {
    let content = match std::fs::read_to_string(scope.path(cfg)) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut pairs = Vec::new();
    for line in content.lines().filter(|l| !l.is_empty()) {
        let (name, value) = line.split_once(',').ok_or_else(|| {
            ScsError::integrity(format!("malformed value record '{}' in {}", line, scope))
        })?;
        pairs.push((name.to_lowercase(), value.to_string()));
    }
    Ok(pairs)
}

/// Value of one constant in a scope.
pub fn get(cfg: &Config, scope: &Scope, name: &str) -> Result<Option<String>> {
    let name = name.to_lowercase();
    Ok(list(cfg, scope)?.into_iter().find(|(n, _)| *n == name).map(|(_, v)| v))
}

/// Define or redefine a constant's value in a scope.
pub fn set(cfg: &Config, scope: &Scope, name: &str, value: &str) -> Result<()> {
    fields::validate_field("value", value)?;
    let name = name.to_lowercase();
    let mut pairs = list(cfg, scope)?;
    pairs.retain(|(n, _)| *n != name);
    pairs.push((name, value.to_string()));
    save(cfg, scope, pairs)
}

/// Remove a constant's definition from a scope.
pub fn unset(cfg: &Config, scope: &Scope, name: &str) -> Result<()> {
    let name = name.to_lowercase();
    let mut pairs = list(cfg, scope)?;
    let before = pairs.len();
    pairs.retain(|(n, _)| *n != name);
    if pairs.len() == before {
        return Err(ScsError::missing(format!(
            "constant '{}' is not defined at scope {}",
            name, scope
        )));
    }
    save(cfg, scope, pairs)
}

/// Remove every definition file a deleted application owned.
pub fn purge_application(cfg: &Config, envs: &[String], app: &str) -> Result<()> {
    remove_if_present(&Scope::Application(app.to_string()).path(cfg))?;
    for env in envs {
        remove_if_present(&Scope::EnvApplication(env.clone(), app.to_string()).path(cfg))?;
    }
    Ok(())
}

fn remove_if_present(path: &PathBuf) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn save(cfg: &Config, scope: &Scope, mut pairs: Vec<(String, String)>) -> Result<()> {
    pairs.sort();
    let path = scope.path(cfg);
    let dir = path
        .parent()
        .ok_or_else(|| ScsError::validation(format!("bad value path {:?}", path)))?;
    std::fs::create_dir_all(dir)?;
    let body: String = pairs
        .iter()
        .map(|(n, v)| format!("{},{}\n", n, v))
        .collect();
    std::fs::write(path, body)?;
    Ok(())
}

/// Applications assigned to `environment` at `location`: the lines of the
/// `<location>/<environment>` binding file.
pub fn bound_applications(cfg: &Config, location: &str, environment: &str) -> Result<Vec<String>> {
    let path = cfg.repo_path(format!("{}/{}", location, environment));
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(content.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
}

/// Bind an application to an environment at a location.
pub fn bind_application(
    cfg: &Config,
    location: &str,
    environment: &str,
    application: &str,
) -> Result<()> {
    let mut apps = bound_applications(cfg, location, environment)?;
    if apps.iter().any(|a| a == application) {
        return Err(ScsError::conflict(format!(
            "application '{}' is already assigned to {}/{}",
            application, location, environment
        )));
    }
    apps.push(application.to_string());
    apps.sort();
    let path = cfg.repo_path(format!("{}/{}", location, environment));
    std::fs::create_dir_all(path.parent().unwrap_or(&cfg.repo))?;
    std::fs::write(path, apps.join("\n") + "\n")?;
    Ok(())
}

/// Remove an application's binding; missing bindings are tolerated.
pub fn unbind_application(
    cfg: &Config,
    location: &str,
    environment: &str,
    application: &str,
) -> Result<()> {
    let mut apps = bound_applications(cfg, location, environment)?;
    apps.retain(|a| a != application);
    let path = cfg.repo_path(format!("{}/{}", location, environment));
    if apps.is_empty() {
        remove_if_present(&path)?;
    } else {
        std::fs::write(path, apps.join("\n") + "\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let cfg = Config::for_repo(dir.path());
        (dir, cfg)
    }

    #[test]
    fn test_set_get_roundtrip() {
        let (_dir, cfg) = repo();
        let scope = Scope::Environment("production".to_string());
        set(&cfg, &scope, "LogLevel", "warn").unwrap();
        assert_eq!(get(&cfg, &scope, "loglevel").unwrap().as_deref(), Some("warn"));
        // case-insensitive lookup
        assert_eq!(get(&cfg, &scope, "LOGLEVEL").unwrap().as_deref(), Some("warn"));
    }

    #[test]
    fn test_set_replaces() {
        let (_dir, cfg) = repo();
        let scope = Scope::Global;
        set(&cfg, &scope, "x", "1").unwrap();
        set(&cfg, &scope, "x", "2").unwrap();
        assert_eq!(list(&cfg, &scope).unwrap().len(), 1);
        assert_eq!(get(&cfg, &scope, "x").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_unset_missing_is_error() {
        let (_dir, cfg) = repo();
        assert!(matches!(
            unset(&cfg, &Scope::Global, "ghost"),
            Err(ScsError::MissingReference(_))
        ));
    }

    #[test]
    fn test_comma_value_rejected() {
        let (_dir, cfg) = repo();
        assert!(set(&cfg, &Scope::Global, "x", "a,b").is_err());
    }

    #[test]
    fn test_scope_paths() {
        let cfg = Config::for_repo("/repo");
        assert_eq!(
            Scope::EnvApplication("prod".into(), "web".into()).path(&cfg),
            PathBuf::from("/repo/env/prod/by-app/web")
        );
        assert_eq!(
            Scope::EnvLocation("prod".into(), "nyc".into()).path(&cfg),
            PathBuf::from("/repo/env/prod/by-loc/nyc")
        );
    }

    #[test]
    fn test_bindings() {
        let (_dir, cfg) = repo();
        bind_application(&cfg, "nyc", "production", "web").unwrap();
        bind_application(&cfg, "nyc", "production", "api").unwrap();
        assert_eq!(
            bound_applications(&cfg, "nyc", "production").unwrap(),
            vec!["api", "web"]
        );
        assert!(matches!(
            bind_application(&cfg, "nyc", "production", "web"),
            Err(ScsError::Conflict(_))
        ));
        unbind_application(&cfg, "nyc", "production", "web").unwrap();
        assert_eq!(bound_applications(&cfg, "nyc", "production").unwrap(), vec!["api"]);
    }

    #[test]
    fn test_purge_application() {
        let (_dir, cfg) = repo();
        set(&cfg, &Scope::Application("web".into()), "x", "1").unwrap();
        set(&cfg, &Scope::EnvApplication("prod".into(), "web".into()), "y", "2").unwrap();
        purge_application(&cfg, &["prod".to_string()], "web").unwrap();
        assert!(list(&cfg, &Scope::Application("web".into())).unwrap().is_empty());
        assert!(
            list(&cfg, &Scope::EnvApplication("prod".into(), "web".into()))
                .unwrap()
                .is_empty()
        );
    }
}
