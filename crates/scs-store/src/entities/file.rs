use serde::Serialize;

use scs_core::error::{Result, ScsError};
use scs_core::fields;

use crate::record::Record;

/// What a managed file entry is, and how the release compiler treats it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Templated file rendered from `template/<name>`.
    File,
    /// Directory created in the staging tree.
    Directory,
    /// Symlink to `target`; metadata is always 0777 root:root.
    Symlink,
    /// Opaque per-environment payload from `env/<env>/binary/<name>`.
    Binary,
    /// Verbatim copy of a local path (`target`).
    Copy,
    /// Removed on the target by the installer.
    Delete,
    /// Fetched by the installer from a URL (`target`); nothing staged.
    Download,
}

impl FileKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "file" => Ok(Self::File),
            "directory" => Ok(Self::Directory),
            "symlink" => Ok(Self::Symlink),
            "binary" => Ok(Self::Binary),
            "copy" => Ok(Self::Copy),
            "delete" => Ok(Self::Delete),
            "download" => Ok(Self::Download),
            _ => Err(ScsError::validation(format!("unknown file type '{}'", value))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
            Self::Binary => "binary",
            Self::Copy => "copy",
            Self::Delete => "delete",
            Self::Download => "download",
        }
    }

    /// Whether `target` is required for this kind.
    fn needs_target(&self) -> bool {
        matches!(self, Self::Symlink | Self::Copy | Self::Download)
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A managed file definition.
#[derive(Debug, Clone, Serialize)]
pub struct FileDef {
    pub name: String,
    /// Path on the target system, without the leading slash.
    pub path: String,
    pub kind: FileKind,
    pub owner: String,
    pub group: String,
    /// 3-4 octal digits.
    pub octal: String,
    /// Link target, local source path, or URL, depending on `kind`.
    pub target: String,
    pub description: String,
}

impl Record for FileDef {
    const FILE: &'static str = "file";
    const KIND: &'static str = "file";
    const FIELD_COUNT: usize = 8;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn parse(f: &[&str]) -> Result<Self> {
        Ok(Self {
            name: f[0].to_string(),
            path: f[1].to_string(),
            kind: FileKind::parse(f[2])?,
            owner: f[3].to_string(),
            group: f[4].to_string(),
            octal: f[5].to_string(),
            target: f[6].to_string(),
            description: f[7].to_string(),
        })
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.path.clone(),
            self.kind.as_str().to_string(),
            self.owner.clone(),
            self.group.clone(),
            self.octal.clone(),
            self.target.clone(),
            self.description.clone(),
        ]
    }

    fn validate(&self) -> Result<()> {
        fields::validate_name("file", &self.name)?;
        if self.path.is_empty() {
            return Err(ScsError::validation("file path must not be empty"));
        }
        if self.kind != FileKind::Symlink {
            // symlink metadata is fixed at 0777 root:root
            fields::validate_octal_mode(&self.octal)?;
        }
        if self.kind.needs_target() && self.target.is_empty() {
            return Err(ScsError::validation(format!(
                "file '{}' of type {} requires a target",
                self.name, self.kind
            )));
        }
        Ok(())
    }
}

/// Delete a file definition and everything it owns: the base template,
/// every per-environment patch and binary payload, and its file-map rows.
pub fn delete(cfg: &scs_core::Config, name: &str) -> Result<()> {
    use crate::record::Store;

    let store = Store::<FileDef>::new(cfg);
    store.load(name)?;

    remove_if_present(cfg.repo_path(format!("template/{}", name)))?;
    for env in Store::<crate::entities::Environment>::new(cfg).keys()? {
        remove_if_present(cfg.repo_path(format!("template/{}/{}", env, name)))?;
        remove_if_present(cfg.repo_path(format!("env/{}/binary/{}", env, name)))?;
    }

    let maps = Store::<FileMap>::new(cfg);
    let remaining = maps.filter(|m| m.file != name)?;
    maps.save_all(remaining)?;

    store.delete(name)
}

fn remove_if_present(path: std::path::PathBuf) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Per-environment inclusion filter on a file-map row.
///
/// `all` (or empty) includes the file everywhere; `none` nowhere;
/// `all-envA-envB` everywhere except the listed environments;
/// `none+envA+envB` only in the listed environments. Hyphens inside
/// environment names are normalized to underscores before matching, which
/// is what keeps `-` unambiguous as the exception separator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EnvFlags {
    All,
    None,
    AllExcept(Vec<String>),
    NoneExcept(Vec<String>),
}

impl EnvFlags {
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() || value == "all" {
            return Ok(Self::All);
        }
        if value == "none" {
            return Ok(Self::None);
        }
        if let Some(rest) = value.strip_prefix("all-") {
            if rest.contains('+') {
                return Err(ScsError::validation(format!(
                    "'+' is not valid in an all- exception list: '{}'",
                    value
                )));
            }
            return Ok(Self::AllExcept(split_envs(rest, '-')));
        }
        if let Some(rest) = value.strip_prefix("none+") {
            if rest.contains('-') {
                return Err(ScsError::validation(format!(
                    "'-' is not valid in a none+ inclusion list: '{}'",
                    value
                )));
            }
            return Ok(Self::NoneExcept(split_envs(rest, '+')));
        }
        Err(ScsError::validation(format!("unparseable env flags '{}'", value)))
    }

    pub fn as_str(&self) -> String {
        match self {
            Self::All => "all".to_string(),
            Self::None => "none".to_string(),
            Self::AllExcept(envs) => format!("all-{}", envs.join("-")),
            Self::NoneExcept(envs) => format!("none+{}", envs.join("+")),
        }
    }

    /// Whether a file with these flags applies in `env`.
    pub fn includes(&self, env: &str) -> bool {
        let env = normalize_env(env);
        match self {
            Self::All => true,
            Self::None => false,
            Self::AllExcept(excluded) => !excluded.contains(&env),
            Self::NoneExcept(included) => included.contains(&env),
        }
    }
}

fn normalize_env(env: &str) -> String {
    env.replace('-', "_")
}

fn split_envs(list: &str, sep: char) -> Vec<String> {
    list.split(sep)
        .filter(|s| !s.is_empty())
        .map(normalize_env)
        .collect()
}

/// The application ↔ file relation with its environment filter.
#[derive(Debug, Clone, Serialize)]
pub struct FileMap {
    pub file: String,
    pub application: String,
    pub flags: EnvFlags,
}

impl FileMap {
    pub fn composite_key(file: &str, application: &str) -> String {
        format!("{}:{}", file, application)
    }
}

impl Record for FileMap {
    const FILE: &'static str = "file-map";
    const KIND: &'static str = "file-map";
    const FIELD_COUNT: usize = 3;

    fn key(&self) -> String {
        Self::composite_key(&self.file, &self.application)
    }

    fn parse(f: &[&str]) -> Result<Self> {
        Ok(Self {
            file: f[0].to_string(),
            application: f[1].to_string(),
            flags: EnvFlags::parse(f[2])?,
        })
    }

    fn fields(&self) -> Vec<String> {
        vec![self.file.clone(), self.application.clone(), self.flags.as_str()]
    }
}
