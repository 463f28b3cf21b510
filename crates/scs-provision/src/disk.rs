//! Secondary disks: create a sparse qcow2 next to the VM's primary image
//! and attach it persistently. The device id continues the highest
//! `<target dev='…'/>` already defined; an id ending in `z` is refused
//! rather than guessed past.

use std::sync::OnceLock;

use regex::Regex;
use scs_core::error::{Result, ScsError};
use scs_core::Config;
use scs_remote::host::{Connector, RemoteHost};
use scs_store::entities::{HvSystem, Hypervisor};
use scs_store::record::Store;
use tracing::{info, instrument};

/// Size or backing source for the new disk.
#[derive(Debug, Clone)]
pub enum DiskSource {
    /// Sparse image of this many GB.
    SizeGb(u32),
    /// qcow2 overlay on an existing image path.
    Backing(String),
}

fn target_dev_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<target dev='([a-z]+)'").unwrap())
}

/// Next device id after the highest one in the domain XML.
pub fn next_device(xml: &str) -> Result<String> {
    let mut devices: Vec<&str> = target_dev_re()
        .captures_iter(xml)
        .map(|c| c.get(1).unwrap().as_str())
        .collect();
    if devices.is_empty() {
        return Err(ScsError::validation("domain defines no disk targets"));
    }
    devices.sort();
    let highest = devices.last().unwrap();
    let Some(last) = highest.chars().last() else {
        return Err(ScsError::validation("empty device id"));
    };
    if last == 'z' {
        return Err(ScsError::validation(format!(
            "highest device id '{}' already ends in z; refusing to derive the next id",
            highest
        )));
    }
    let mut next = highest.to_string();
    next.pop();
    next.push((last as u8 + 1) as char);
    Ok(next)
}

/// Create and persistently attach a secondary disk.
#[instrument(skip_all, fields(system = system_name, alias))]
pub fn add_disk(
    cfg: &Config,
    connector: &dyn Connector,
    system_name: &str,
    alias: &str,
    source: &DiskSource,
    bus: &str,
) -> Result<()> {
    let holders = Store::<HvSystem>::new(cfg).filter(|l| l.system == system_name)?;
    let link = holders
        .iter()
        .find(|l| l.preferred)
        .or_else(|| holders.first())
        .cloned()
        .ok_or_else(|| {
            ScsError::missing(format!("no hypervisor recorded for '{}'", system_name))
        })?;
    let hv = Store::<Hypervisor>::new(cfg).load(&link.hypervisor)?;
    let remote = connector.connect(&hv.mgmt_ip)?;

    let xml = remote.exec_ok(&format!("virsh dumpxml {}", system_name))?;
    let dev = next_device(&xml)?;
    let image = format!("{}/{}.{}.img", hv.vm_path, system_name, alias);

    let create_cmd = match source {
        DiskSource::SizeGb(gb) => {
            format!("qemu-img create -f qcow2 {} {}G", image, gb)
        }
        DiskSource::Backing(base) => {
            format!("qemu-img create -f qcow2 -F qcow2 -b {} {}", base, image)
        }
    };
    remote.exec_ok(&create_cmd)?;

    let fragment = format!(
        "<disk type='file' device='disk'>\n\
         \x20 <driver name='qemu' type='qcow2'/>\n\
         \x20 <source file='{image}'/>\n\
         \x20 <target dev='{dev}' bus='{bus}'/>\n\
         </disk>",
        image = image,
        dev = dev,
        bus = bus
    );
    remote.exec_ok(&format!(
        "cat > /tmp/{name}.{alias}.xml << 'SCSEOF'\n{fragment}\nSCSEOF\n\
         virsh attach-device {name} /tmp/{name}.{alias}.xml --persistent",
        name = system_name,
        alias = alias,
        fragment = fragment
    ))?;
    info!(device = %dev, image = %image, "secondary disk attached");
    Ok(())
}
