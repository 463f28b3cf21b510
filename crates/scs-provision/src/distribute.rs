//! Backing-image distribution: copy every `<name>*.img` under
//! `backing_images/` from the hypervisor that built it to every other
//! eligible hypervisor. Hypervisor-to-hypervisor scp is preferred; a
//! staged copy through the controller is the fallback when the hosts have
//! no mutual trust.

use regex::Regex;
use scs_core::error::{Result, ScsError};
use scs_core::Config;
use scs_remote::host::{Connector, RemoteHost};
use scs_store::entities::{HvEnvironment, HvNetwork, HvSystem, Hypervisor, System};
use scs_store::record::Store;
use scs_store::Record;
use tracing::{info, instrument, warn};

use crate::phase1;

fn image_re(name: &str) -> Regex {
    Regex::new(&format!(r"^{}(\..+)?\.img$", regex::escape(name))).unwrap()
}

fn backing_dir(hv: &Hypervisor) -> String {
    format!("{}/backing_images", hv.vm_path)
}

/// The backing image files for a system on its source hypervisor.
pub fn image_files(remote: &dyn RemoteHost, hv: &Hypervisor, name: &str) -> Result<Vec<String>> {
    let out = remote.exec_ok(&format!("ls {} 2>/dev/null; true", backing_dir(hv)))?;
    let re = image_re(name);
    Ok(out
        .lines()
        .map(str::trim)
        .filter(|l| re.is_match(l))
        .map(str::to_string)
        .collect())
}

/// Push a backing system's images to every eligible destination.
#[instrument(skip_all, fields(system = system_name))]
pub fn distribute(cfg: &Config, connector: &dyn Connector, system_name: &str) -> Result<()> {
    let sys = Store::<System>::new(cfg).load(system_name)?;
    if !sys.backing_image {
        return Err(ScsError::validation(format!(
            "system '{}' is not a backing image",
            system_name
        )));
    }

    let source_link = Store::<HvSystem>::new(cfg)
        .filter(|l| l.system == system_name)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            ScsError::missing(format!("no hypervisor recorded for '{}'", system_name))
        })?;
    let hvs = Store::<Hypervisor>::new(cfg);
    let source = hvs.load(&source_link.hypervisor)?;
    let src_remote = connector.connect(&source.mgmt_ip)?;

    let files = image_files(src_remote.as_ref(), &source, system_name)?;
    if files.is_empty() {
        return Err(ScsError::missing(format!(
            "no backing images for '{}' under {}",
            system_name,
            backing_dir(&source)
        )));
    }

    let (build_net, final_net) = phase1::resolve_networks(cfg, &sys)?;
    let env_links = Store::<HvEnvironment>::new(cfg).list()?;
    let net_links = Store::<HvNetwork>::new(cfg).list()?;

    for dest in hvs.list()? {
        if !dest.enabled || dest.name == source.name || dest.location != sys.location {
            continue;
        }
        if !env_links
            .iter()
            .any(|l| l.hypervisor == dest.name && l.environment == sys.environment)
        {
            continue;
        }
        let linked = |net: &str| {
            net_links
                .iter()
                .any(|l| l.hypervisor == dest.name && l.network == net)
        };
        if !linked(&build_net.key()) || !linked(&final_net.key()) {
            continue;
        }

        copy_to_destination(
            cfg,
            connector,
            src_remote.as_ref(),
            &source,
            &dest,
            system_name,
            &files,
        )?;

        let links = Store::<HvSystem>::new(cfg);
        let link = HvSystem {
            system: system_name.to_string(),
            hypervisor: dest.name.clone(),
            preferred: false,
        };
        if !links.exists(&link.key())? {
            links.create(link)?;
        }
        info!(dest = %dest.name, files = files.len(), "backing image distributed");
    }
    Ok(())
}

fn copy_to_destination(
    cfg: &Config,
    connector: &dyn Connector,
    src_remote: &dyn RemoteHost,
    source: &Hypervisor,
    dest: &Hypervisor,
    name: &str,
    files: &[String],
) -> Result<()> {
    let dest_remote = connector.connect(&dest.mgmt_ip)?;
    dest_remote.exec_ok(&format!("mkdir -p {}", backing_dir(dest)))?;

    for file in files {
        let src_path = format!("{}/{}", backing_dir(source), file);
        let dest_path = format!("{}/{}", backing_dir(dest), file);

        // direct hypervisor-to-hypervisor copy needs remote ssh trust
        let direct = src_remote.exec(&format!(
            "scp -o BatchMode=yes {} root@{}:{}",
            src_path, dest.mgmt_ip, dest_path
        ))?;
        if !direct.success() {
            warn!(file = %file, dest = %dest.name, "direct copy failed; staging through controller");
            std::fs::create_dir_all(&cfg.temp_large)?;
            let staged = cfg.temp_large.join(format!("scs-dist-{}-{}", name, file));
            src_remote.copy_from(&src_path, &staged)?;
            let result = dest_remote.copy_to(&staged, &dest_path);
            let _ = std::fs::remove_file(&staged);
            result?;
        }
        dest_remote.exec_ok(&format!("chattr +i {}", dest_path))?;
    }
    Ok(())
}
