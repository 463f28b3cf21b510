//! Kickstart rendering and delivery. The template catalog lives under
//! `kickstart/<os>.tpl` in the repository; rendered files are pushed to the
//! build network's repo host and served back to the installer over HTTP.

use scs_core::error::{Result, ScsError};
use scs_core::Config;
use scs_release::resolver::VarMap;
use scs_release::template::{self, MissingPolicy};
use scs_remote::host::{Connector, RemoteHost};
use scs_store::entities::{Build, Network, System};
use scs_store::Record;
use tracing::info;

/// The minimal variable set a kickstart template may reference.
pub fn kickstart_vars(system: &System, build: &Build, net: &Network, ip: &str, full: &VarMap) -> VarMap {
    let mut vars = VarMap::new();
    vars.define("system.name", &system.name);
    vars.define("system.ip", ip);
    vars.define("system.netmask", &net.mask);
    vars.define("system.gateway", &net.gateway);
    vars.define("system.dns", &net.dns);
    vars.define("system.arch", &build.arch);
    if let Some(sm_web) = full.get("resource.sm-web") {
        vars.define("resource.sm-web", sm_web);
    }
    vars
}

/// Render the kickstart for a build's OS.
pub fn render(cfg: &Config, os: &str, vars: &VarMap) -> Result<String> {
    let path = cfg.repo_path(format!("kickstart/{}.tpl", os));
    let tpl = std::fs::read_to_string(&path).map_err(|_| {
        ScsError::missing(format!("no kickstart template for os '{}' at {}", os, path.display()))
    })?;
    let (rendered, _) = template::render(&tpl, vars, MissingPolicy::Strict)?;
    Ok(rendered)
}

/// Upload a rendered kickstart to the repo host and return the URL the
/// installer will fetch it from.
pub fn publish(
    cfg: &Config,
    connector: &dyn Connector,
    net: &Network,
    system_name: &str,
    content: &str,
) -> Result<String> {
    if net.repo_addr.is_empty() || net.repo_fs_path.is_empty() || net.repo_url.is_empty() {
        return Err(ScsError::validation(format!(
            "network '{}' is missing repo_addr/repo_fs_path/repo_url",
            net.key()
        )));
    }
    let remote = connector.connect(&net.repo_addr)?;
    std::fs::create_dir_all(&cfg.temp)?;
    let mut tmp = tempfile::Builder::new()
        .prefix("scs-ks-")
        .tempfile_in(&cfg.temp)
        .map_err(ScsError::Io)?;
    std::io::Write::write_all(&mut tmp, content.as_bytes())?;
    let dest = format!("{}/{}.cfg", net.repo_fs_path.trim_end_matches('/'), system_name);
    remote.copy_to(tmp.path(), &dest)?;

    let url = format!(
        "http://{}/{}/{}.cfg",
        net.repo_addr,
        net.repo_url.trim_matches('/'),
        system_name
    );
    info!(system = system_name, url, "kickstart published");
    Ok(url)
}

/// Remove a published kickstart after the install completes.
pub fn retract(connector: &dyn Connector, net: &Network, system_name: &str) -> Result<()> {
    let remote = connector.connect(&net.repo_addr)?;
    let dest = format!("{}/{}.cfg", net.repo_fs_path.trim_end_matches('/'), system_name);
    remote.exec_ok(&format!("rm -f {}", dest))?;
    Ok(())
}
