use serde::Serialize;

use scs_core::error::{Result, ScsError};
use scs_core::{Config, fields};

use crate::record::{Record, Store};

/// An application: a named deployable unit bound to a build.
#[derive(Debug, Clone, Serialize)]
pub struct Application {
    pub name: String,
    /// Short unique alias.
    pub alias: String,
    /// Referenced build, or empty when the application is not yet bound.
    pub build: String,
    /// Whether instances of this application cluster.
    pub cluster: bool,
}

impl Record for Application {
    const FILE: &'static str = "application";
    const KIND: &'static str = "application";
    const FIELD_COUNT: usize = 4;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn parse(f: &[&str]) -> Result<Self> {
        Ok(Self {
            name: f[0].to_string(),
            alias: f[1].to_string(),
            build: f[2].to_string(),
            cluster: fields::parse_yn("cluster", f[3])?,
        })
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.alias.clone(),
            self.build.clone(),
            fields::yn(self.cluster).to_string(),
        ]
    }

    fn validate(&self) -> Result<()> {
        fields::validate_name("application", &self.name)?;
        fields::validate_name("application alias", &self.alias)?;
        Ok(())
    }
}

/// Create an application, enforcing alias uniqueness and the build
/// reference.
pub fn create(cfg: &Config, app: Application) -> Result<()> {
    check_alias(cfg, &app, None)?;
    check_build(cfg, &app)?;
    Store::<Application>::new(cfg).create(app)
}

/// Update an application in place, with the same checks as [`create`].
pub fn update(cfg: &Config, key: &str, app: Application) -> Result<()> {
    check_alias(cfg, &app, Some(key))?;
    check_build(cfg, &app)?;
    Store::<Application>::new(cfg).update(key, app)
}

fn check_alias(cfg: &Config, app: &Application, skip_key: Option<&str>) -> Result<()> {
    let taken = Store::<Application>::new(cfg)
        .list()?
        .iter()
        .any(|a| a.alias == app.alias && Some(a.name.as_str()) != skip_key);
    if taken {
        return Err(ScsError::conflict(format!(
            "application alias '{}' is already in use",
            app.alias
        )));
    }
    Ok(())
}

fn check_build(cfg: &Config, app: &Application) -> Result<()> {
    if !app.build.is_empty() && !Store::<crate::entities::Build>::new(cfg).exists(&app.build)? {
        return Err(ScsError::missing(format!("build '{}' does not exist", app.build)));
    }
    Ok(())
}

/// Delete an application and everything it owns: file-map rows,
/// application-scoped constant values, and location/environment bindings.
pub fn delete(cfg: &Config, name: &str) -> Result<()> {
    let store = Store::<Application>::new(cfg);
    store.load(name)?;

    let maps = Store::<crate::entities::FileMap>::new(cfg);
    let remaining = maps.filter(|m| m.application != name)?;
    maps.save_all(remaining)?;

    let envs = Store::<crate::entities::Environment>::new(cfg).keys()?;
    crate::values::purge_application(cfg, &envs, name)?;
    for loc in Store::<crate::entities::Location>::new(cfg).keys()? {
        for env in &envs {
            crate::values::unbind_application(cfg, &loc, env, name)?;
        }
    }

    store.delete(name)
}

/// Applications bound to any build in the given lineage (root first).
pub fn for_builds(cfg: &Config, lineage: &[String]) -> Result<Vec<Application>> {
    let mut apps = Store::<Application>::new(cfg)
        .filter(|a| lineage.contains(&a.build))?;
    apps.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(apps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Build;
    use tempfile::TempDir;

    fn repo() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let cfg = Config::for_repo(dir.path());
        (dir, cfg)
    }

    fn seed_build(cfg: &Config, name: &str) {
        Store::<Build>::new(cfg)
            .create(Build {
                name: name.to_string(),
                role: "web".to_string(),
                description: String::new(),
                os: "el7".to_string(),
                arch: "x86_64".to_string(),
                disk_gb: Some(20),
                ram_mb: Some(2048),
                parent: None,
            })
            .unwrap();
    }

    fn app(name: &str, alias: &str, build: &str) -> Application {
        Application {
            name: name.to_string(),
            alias: alias.to_string(),
            build: build.to_string(),
            cluster: false,
        }
    }

    #[test]
    fn test_create_and_load() {
        let (_dir, cfg) = repo();
        seed_build(&cfg, "web-el7");
        create(&cfg, app("web", "w", "web-el7")).unwrap();
        let loaded = Store::<Application>::new(&cfg).load("web").unwrap();
        assert_eq!(loaded.alias, "w");
        assert_eq!(loaded.build, "web-el7");
    }

    #[test]
    fn test_alias_must_be_unique() {
        let (_dir, cfg) = repo();
        seed_build(&cfg, "web-el7");
        create(&cfg, app("web", "w", "web-el7")).unwrap();
        let err = create(&cfg, app("web2", "w", "web-el7")).unwrap_err();
        assert!(matches!(err, ScsError::Conflict(_)));
    }

    #[test]
    fn test_unknown_build_rejected() {
        let (_dir, cfg) = repo();
        let err = create(&cfg, app("web", "w", "nope")).unwrap_err();
        assert!(matches!(err, ScsError::MissingReference(_)));
    }

    #[test]
    fn test_empty_build_allowed() {
        let (_dir, cfg) = repo();
        create(&cfg, app("web", "w", "")).unwrap();
    }

    #[test]
    fn test_delete_cascades() {
        use crate::entities::{EnvFlags, Environment, FileMap, Location};
        use crate::values::{self, Scope};

        let (_dir, cfg) = repo();
        seed_build(&cfg, "web-el7");
        Store::<Environment>::new(&cfg)
            .create(Environment {
                name: "production".to_string(),
                alias: "P".to_string(),
                description: String::new(),
            })
            .unwrap();
        Store::<Location>::new(&cfg)
            .create(Location {
                code: "nyc".to_string(),
                name: "New York".to_string(),
                description: String::new(),
            })
            .unwrap();
        create(&cfg, app("web", "w", "web-el7")).unwrap();
        Store::<FileMap>::new(&cfg)
            .create(FileMap {
                file: "nginx.conf".to_string(),
                application: "web".to_string(),
                flags: EnvFlags::All,
            })
            .unwrap();
        values::set(&cfg, &Scope::Application("web".into()), "x", "1").unwrap();
        values::bind_application(&cfg, "nyc", "production", "web").unwrap();

        delete(&cfg, "web").unwrap();

        assert!(!Store::<Application>::new(&cfg).exists("web").unwrap());
        assert!(Store::<FileMap>::new(&cfg).list().unwrap().is_empty());
        assert!(values::list(&cfg, &Scope::Application("web".into())).unwrap().is_empty());
        assert!(values::bound_applications(&cfg, "nyc", "production").unwrap().is_empty());
    }

    #[test]
    fn test_for_builds_sorted() {
        let (_dir, cfg) = repo();
        seed_build(&cfg, "base");
        seed_build(&cfg, "web-el7");
        create(&cfg, app("zeta", "z", "web-el7")).unwrap();
        create(&cfg, app("alpha", "a", "base")).unwrap();
        create(&cfg, app("other", "o", "")).unwrap();

        let apps =
            for_builds(&cfg, &["base".to_string(), "web-el7".to_string()]).unwrap();
        let names: Vec<_> = apps.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
