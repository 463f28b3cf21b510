//! Release compilation: expand a system's file set into a staging tree,
//! emit the stat manifest plus audit and install scripts, and pack the
//! whole thing into a self-extracting shell archive with a gzipped
//! cpio-newc payload.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use scs_core::error::{Result, ScsError};
use scs_core::{Config, time};
use scs_store::entities::{FileDef, FileKind, FileMap, System};
use scs_store::record::Store;
use scs_store::Record;
use tracing::{debug, info};

use crate::cpio::CpioWriter;
use crate::resolver::{self, VarMap};
use crate::template::{self, MissingPolicy};

/// One path the release manages on the target.
#[derive(Debug, Clone)]
pub struct ManagedPath {
    /// Target path without the leading slash.
    pub rel: String,
    pub kind: FileKind,
    pub owner: String,
    pub group: String,
    pub octal: String,
    /// Symlink target or download URL, empty otherwise.
    pub target: String,
}

impl ManagedPath {
    fn from_def(def: &FileDef) -> Self {
        let (owner, group, octal) = if def.kind == FileKind::Symlink {
            ("root".to_string(), "root".to_string(), "777".to_string())
        } else {
            (def.owner.clone(), def.group.clone(), def.octal.clone())
        };
        Self {
            rel: def.path.trim_start_matches('/').to_string(),
            kind: def.kind,
            owner,
            group,
            octal,
            target: def.target.clone(),
        }
    }

    /// Mode digits without leading zeros, as `stat -c%a` prints them.
    pub fn mode_digits(&self) -> String {
        u32::from_str_radix(&self.octal, 8)
            .map(|m| format!("{:o}", m))
            .unwrap_or_else(|_| self.octal.clone())
    }

    fn mode_bits(&self) -> u32 {
        u32::from_str_radix(&self.octal, 8).unwrap_or(0o644)
    }

    /// Line in the `scs-stat` manifest, or None for kinds that stage no
    /// metadata (delete, download).
    fn stat_line(&self) -> Option<String> {
        match self.kind {
            FileKind::Symlink => Some(format!(
                "/{} -> {} root root 777 symlink",
                self.rel, self.target
            )),
            FileKind::Directory => Some(format!(
                "/{} {} {} {} directory",
                self.rel, self.owner, self.group, self.mode_digits()
            )),
            FileKind::File | FileKind::Binary | FileKind::Copy => Some(format!(
                "/{} {} {} {} file",
                self.rel, self.owner, self.group, self.mode_digits()
            )),
            FileKind::Delete | FileKind::Download => None,
        }
    }
}

/// A compiled release: the staging tree plus everything needed to archive
/// or audit it. Dropping it removes the staging tree.
pub struct CompiledRelease {
    pub system: System,
    pub entries: Vec<ManagedPath>,
    pub vars: VarMap,
    /// Compile timestamp; only the wrapper embeds it.
    pub timestamp: String,
    staging: tempfile::TempDir,
}

impl CompiledRelease {
    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    pub fn staged_path(&self, rel: &str) -> PathBuf {
        self.staging.path().join(rel)
    }

    /// The stat manifest text.
    pub fn stat_manifest(&self) -> String {
        self.entries
            .iter()
            .filter_map(ManagedPath::stat_line)
            .map(|l| l + "\n")
            .collect()
    }

    /// Assemble the self-extracting archive and write it under the release
    /// directory. Returns the archive path.
    pub fn write_archive(&self, cfg: &Config) -> Result<PathBuf> {
        std::fs::create_dir_all(&cfg.releases)?;
        let out = cfg
            .releases
            .join(format!("{}-{}.sh", self.system.name, self.timestamp));
        let payload = self.payload()?;

        let mut f = std::fs::File::create(&out)?;
        f.write_all(wrapper_script(&self.system.name, &self.timestamp).as_bytes())?;
        f.write_all(&payload)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out, std::fs::Permissions::from_mode(0o755))?;
        }
        info!(system = %self.system.name, archive = %out.display(), "release written");
        Ok(out)
    }

    /// The gzipped cpio payload of the staging tree. Deterministic for
    /// identical staged content.
    pub fn payload(&self) -> Result<Vec<u8>> {
        let mut modes: BTreeMap<String, u32> = BTreeMap::new();
        for entry in &self.entries {
            modes.insert(entry.rel.clone(), entry.mode_bits());
        }
        modes.insert("scs-stat".to_string(), 0o644);
        modes.insert("scs-audit.sh".to_string(), 0o755);
        modes.insert("scs-install.sh".to_string(), 0o755);

        let gz = GzEncoder::new(Vec::new(), Compression::default());
        let mut cpio = CpioWriter::new(gz);
        let mut paths = Vec::new();
        walk(self.staging.path(), self.staging.path(), &mut paths)?;
        paths.sort();

        for rel in &paths {
            let abs = self.staging.path().join(rel);
            let meta = std::fs::symlink_metadata(&abs)?;
            let mode = modes.get(rel.as_str()).copied();
            if meta.file_type().is_symlink() {
                let target = std::fs::read_link(&abs)?;
                cpio.append_symlink(rel, &target.to_string_lossy())?;
            } else if meta.is_dir() {
                cpio.append_dir(rel, mode.unwrap_or(0o755))?;
            } else {
                cpio.append_file(rel, mode.unwrap_or(0o644), &std::fs::read(&abs)?)?;
            }
        }
        let gz = cpio.finish()?;
        gz.finish().map_err(ScsError::Io)
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| ScsError::validation("staging walk escaped root"))?
            .to_string_lossy()
            .to_string();
        let ft = entry.file_type()?;
        out.push(rel);
        if ft.is_dir() {
            walk(root, &entry.path(), out)?;
        }
    }
    Ok(())
}

/// Compile a release for a system. Template expansion is strict: any
/// missing variable fails the compile with no partial output.
pub fn compile(cfg: &Config, system_name: &str) -> Result<CompiledRelease> {
    let system = Store::<System>::new(cfg).load(system_name)?;
    let vars = resolver::resolve(cfg, &system)?;
    let defs = file_set(cfg, &system)?;

    std::fs::create_dir_all(&cfg.temp)?;
    let staging = tempfile::Builder::new()
        .prefix("scs-release-")
        .tempdir_in(&cfg.temp)?;

    let mut entries = Vec::new();
    for def in &defs {
        let entry = ManagedPath::from_def(def);
        debug!(file = %def.name, kind = %def.kind, "staging");
        stage(cfg, &system, def, &entry, staging.path(), &vars)?;
        entries.push(entry);
    }

    if let Some(routes) = static_routes(cfg, &system)? {
        let rel = "etc/sysconfig/static-routes".to_string();
        write_staged(staging.path(), &rel, &routes)?;
        entries.push(ManagedPath {
            rel,
            kind: FileKind::File,
            owner: "root".to_string(),
            group: "root".to_string(),
            octal: "644".to_string(),
            target: String::new(),
        });
    }

    let release = CompiledRelease {
        system,
        entries,
        vars,
        timestamp: time::stamp_now(),
        staging,
    };

    std::fs::write(release.staged_path("scs-stat"), release.stat_manifest())?;
    std::fs::write(release.staged_path("scs-audit.sh"), audit_script(&release.entries))?;
    std::fs::write(
        release.staged_path("scs-install.sh"),
        install_script(&release.entries, cfg.remote_backups),
    )?;
    Ok(release)
}

/// Render a single managed file for a system through its environment
/// patch and the template engine, without compiling a full release.
/// Returns the rendered text and any missing variables (per `policy`).
pub fn render_file(
    cfg: &Config,
    file_name: &str,
    system_name: &str,
    policy: MissingPolicy,
) -> Result<(String, Vec<String>)> {
    let system = Store::<System>::new(cfg).load(system_name)?;
    let def = Store::<FileDef>::new(cfg).load(file_name)?;
    if def.kind != FileKind::File {
        return Err(ScsError::validation(format!(
            "file '{}' is type {}, only templated files render",
            file_name, def.kind
        )));
    }
    let base_path = cfg.repo_path(format!("template/{}", def.name));
    let base = std::fs::read_to_string(&base_path).map_err(|_| {
        ScsError::missing(format!("file '{}' has no template", def.name))
    })?;
    let patch_path = cfg.repo_path(format!("template/{}/{}", system.environment, def.name));
    let text = if patch_path.exists() {
        crate::patch::apply(&base, &std::fs::read_to_string(&patch_path)?)?
    } else {
        base
    };
    let vars = resolver::resolve(cfg, &system)?;
    template::render(&text, &vars, policy)
}

/// The deterministic file set for a system: every file mapped to one of
/// its applications whose flags include the system's environment, sorted
/// by file name.
fn file_set(cfg: &Config, system: &System) -> Result<Vec<FileDef>> {
    let apps = resolver::application_set(cfg, system)?;
    let maps = Store::<FileMap>::new(cfg).list()?;
    let files = Store::<FileDef>::new(cfg);

    let mut names = std::collections::BTreeSet::new();
    for app in &apps {
        for m in maps
            .iter()
            .filter(|m| m.application == app.name && m.flags.includes(&system.environment))
        {
            names.insert(m.file.clone());
        }
    }

    names.into_iter().map(|name| files.load(&name)).collect()
}

fn stage(
    cfg: &Config,
    system: &System,
    def: &FileDef,
    entry: &ManagedPath,
    staging: &Path,
    vars: &VarMap,
) -> Result<()> {
    match def.kind {
        FileKind::File => {
            let base_path = cfg.repo_path(format!("template/{}", def.name));
            let base = std::fs::read_to_string(&base_path).map_err(|_| {
                ScsError::missing(format!(
                    "file '{}' has no template at {}",
                    def.name,
                    base_path.display()
                ))
            })?;
            let patch_path =
                cfg.repo_path(format!("template/{}/{}", system.environment, def.name));
            let text = if patch_path.exists() {
                let patch = std::fs::read_to_string(&patch_path)?;
                crate::patch::apply(&base, &patch).map_err(|e| {
                    ScsError::template(format!(
                        "environment patch for '{}' failed: {}",
                        def.name, e
                    ))
                })?
            } else {
                base
            };
            let (rendered, _) = template::render(&text, vars, MissingPolicy::Strict)?;
            write_staged(staging, &entry.rel, rendered.as_bytes())
        }
        FileKind::Directory => {
            std::fs::create_dir_all(staging.join(&entry.rel))?;
            Ok(())
        }
        FileKind::Symlink => {
            let abs = staging.join(&entry.rel);
            if let Some(parent) = abs.parent() {
                std::fs::create_dir_all(parent)?;
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(&def.target, &abs)?;
            Ok(())
        }
        FileKind::Binary => {
            let src = cfg.repo_path(format!("env/{}/binary/{}", system.environment, def.name));
            let data = std::fs::read(&src).map_err(|_| {
                ScsError::missing(format!(
                    "binary payload for '{}' missing at {}",
                    def.name,
                    src.display()
                ))
            })?;
            write_staged(staging, &entry.rel, &data)
        }
        FileKind::Copy => {
            let data = std::fs::read(&def.target).map_err(|_| {
                ScsError::missing(format!(
                    "copy source '{}' for file '{}' missing",
                    def.target, def.name
                ))
            })?;
            write_staged(staging, &entry.rel, &data)
        }
        // handled entirely by the generated scripts
        FileKind::Delete | FileKind::Download => Ok(()),
    }
}

fn write_staged(staging: &Path, rel: &str, data: &[u8]) -> Result<()> {
    let abs = staging.join(rel);
    if let Some(parent) = abs.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(abs, data)?;
    Ok(())
}

/// Routes file content for the system's network, when that network
/// distributes static routes.
fn static_routes(cfg: &Config, system: &System) -> Result<Option<Vec<u8>>> {
    let Some(ip) = system.ipv4() else {
        return Ok(None);
    };
    for net in scs_store::entities::network::containing(cfg, ip)? {
        if net.static_routes {
            let path = scs_ipam::index::routes_path(cfg, &net)?;
            let data = std::fs::read(&path).map_err(|_| {
                ScsError::missing(format!(
                    "network '{}' declares static routes but {} is missing",
                    net.key(),
                    path.display()
                ))
            })?;
            return Ok(Some(data));
        }
    }
    Ok(None)
}

fn audit_script(entries: &[ManagedPath]) -> String {
    let mut s = String::from(
        "#!/bin/bash\n\
         #\n\
         # scs audit script: verify managed paths against the compiled manifest.\n\
         #\n\
         FAIL=0\n\
         check_meta() {\n\
         \tif [ ! -e \"$1\" ] && [ ! -L \"$1\" ]; then\n\
         \t\techo \"MISSING $1\"; FAIL=1; return\n\
         \tfi\n\
         \tACTUAL=$(stat -c'%a %U:%G' \"$1\")\n\
         \tif [ \"$ACTUAL\" != \"$2\" ]; then\n\
         \t\techo \"METADATA $1 expected [$2] actual [$ACTUAL]\"; FAIL=1\n\
         \tfi\n\
         }\n\n",
    );
    for e in entries {
        match e.kind {
            FileKind::File | FileKind::Binary | FileKind::Copy | FileKind::Directory => {
                s.push_str(&format!(
                    "check_meta \"/{}\" \"{} {}:{}\"\n",
                    e.rel,
                    e.mode_digits(),
                    e.owner,
                    e.group
                ));
            }
            FileKind::Symlink => {
                s.push_str(&format!(
                    "if [ \"$(readlink \"/{rel}\")\" != \"{target}\" ]; then\n\
                     \techo \"SYMLINK /{rel}\"; FAIL=1\n\
                     fi\n",
                    rel = e.rel,
                    target = e.target
                ));
            }
            FileKind::Delete => {
                s.push_str(&format!(
                    "if [ -e \"/{rel}\" ]; then\n\
                     \techo \"PRESENT /{rel}\"; FAIL=1\n\
                     fi\n",
                    rel = e.rel
                ));
            }
            FileKind::Download => {}
        }
    }
    s.push_str("\nexit $FAIL\n");
    s
}

fn install_script(entries: &[ManagedPath], remote_backups: u32) -> String {
    let mut backup_paths = Vec::new();
    for e in entries {
        match e.kind {
            FileKind::Download => {}
            _ => backup_paths.push(format!("/{}", e.rel)),
        }
    }

    let mut post = String::new();
    for e in entries {
        match e.kind {
            FileKind::Download => {
                post.push_str(&format!(
                    "curl -fsS -o \"/{rel}\" \"{url}\" && chown {owner}:{group} \"/{rel}\" && chmod {mode} \"/{rel}\"\n",
                    rel = e.rel,
                    url = e.target,
                    owner = e.owner,
                    group = e.group,
                    mode = e.mode_digits()
                ));
            }
            FileKind::Delete => {
                post.push_str(&format!("rm -rf \"/{}\"\n", e.rel));
            }
            _ => {}
        }
    }

    // 0 means keep every backup
    let prune = if remote_backups > 0 {
        format!(
            "ls -1t \"$BACKUP\"/scs-backup-*.tar 2>/dev/null | tail -n +{} | xargs -r rm -f\n",
            remote_backups + 1
        )
    } else {
        String::new()
    };

    format!(
        "#!/bin/bash\n\
         #\n\
         # scs install script: back up, sync the staged tree to /, apply\n\
         # ownership and modes from the manifest, run post commands.\n\
         #\n\
         set -u\n\
         HERE=\"$(cd \"$(dirname \"$0\")\" && pwd)\"\n\
         LOG=/var/log/scs-install.log\n\
         echo \"$(date '+%F %T') scs install start ($HERE)\" >> \"$LOG\"\n\
         BACKUP=/var/backups\n\
         mkdir -p \"$BACKUP\"\n\
         TAR=\"$BACKUP/scs-backup-$(date +%Y%m%d%H%M%S).tar\"\n\
         tar -cf \"$TAR\" --ignore-failed-read {backup_list} 2>/dev/null || true\n\
         {prune}\
         rsync -crlK --exclude=scs-stat --exclude=scs-audit.sh --exclude=scs-install.sh \"$HERE\"/ /\n\
         while read -r P OWNER GROUP MODE KIND; do\n\
         \tcase \"$KIND\" in\n\
         \tfile|directory)\n\
         \t\tchown \"$OWNER:$GROUP\" \"$P\"\n\
         \t\tchmod \"$MODE\" \"$P\"\n\
         \t\t;;\n\
         \tesac\n\
         done < <(grep -v ' -> ' \"$HERE/scs-stat\")\n\
         {post}\
         echo \"$(date '+%F %T') scs install done\" >> \"$LOG\"\n\
         rm -f \"$HERE/scs-install.sh\"\n",
        backup_list = backup_paths.join(" "),
        prune = prune,
        post = post
    )
}

fn wrapper_script(name: &str, ts: &str) -> String {
    format!(
        "#!/bin/bash\n\
         #\n\
         # scs self-extracting release for {name} ({ts})\n\
         # usage: bash $0 [--audit|--install|--extract <dir>]\n\
         #\n\
         set -u\n\
         ACTION=\"${{1:---extract}}\"\n\
         TARGET=\"${{2:-/root/scs-release-{ts}}}\"\n\
         SELF=\"$(cd \"$(dirname \"$0\")\" && pwd)/$(basename \"$0\")\"\n\
         LINE=$(awk '/^__PAYLOAD__$/ {{ print NR + 1; exit 0 }}' \"$SELF\")\n\
         mkdir -p \"$TARGET\"\n\
         tail -n +\"$LINE\" \"$SELF\" | gzip -dc | (cd \"$TARGET\" && cpio -idmu --quiet)\n\
         case \"$ACTION\" in\n\
         --audit)\n\
         \t/bin/bash \"$TARGET/scs-audit.sh\"\n\
         \texit $?\n\
         \t;;\n\
         --install)\n\
         \t/bin/bash \"$TARGET/scs-install.sh\"\n\
         \texit $?\n\
         \t;;\n\
         --extract)\n\
         \techo \"extracted to $TARGET\"\n\
         \t;;\n\
         *)\n\
         \techo \"usage: $0 [--audit|--install|--extract <dir>]\" >&2\n\
         \texit 2\n\
         \t;;\n\
         esac\n\
         exit 0\n\
         __PAYLOAD__\n"
    )
}
