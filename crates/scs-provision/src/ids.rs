//! Domain identity allocation. UUIDs and MACs must be unique across the
//! whole fleet, so candidates are checked against every domain defined on
//! every known hypervisor and regenerated on collision.

use std::collections::HashSet;
use std::sync::OnceLock;

use rand::Rng;
use regex::Regex;
use scs_core::error::Result;
use scs_core::Config;
use scs_remote::host::{Connector, RemoteHost};
use scs_store::entities::Hypervisor;
use scs_store::record::Store;
use tracing::debug;
use uuid::Uuid;

/// Locally-administered prefix used for all scs-created VMs.
pub const MAC_PREFIX: &str = "54:52:00";

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<uuid>([0-9a-fA-F-]{36})</uuid>").unwrap())
}

fn mac_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<mac address='([0-9a-fA-F:]{17})'").unwrap())
}

/// Every (uuid, mac) pair currently defined across the fleet.
pub fn known_ids(cfg: &Config, connector: &dyn Connector) -> Result<(HashSet<String>, HashSet<String>)> {
    let mut uuids = HashSet::new();
    let mut macs = HashSet::new();
    for hv in Store::<Hypervisor>::new(cfg).filter(|h| h.enabled)? {
        let Ok(remote) = connector.connect(&hv.mgmt_ip) else {
            continue;
        };
        let names = remote.exec_ok("virsh list --all --name")?;
        for vm in names.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let xml = remote.exec(&format!("virsh dumpxml {}", vm))?;
            if !xml.success() {
                continue;
            }
            for cap in uuid_re().captures_iter(&xml.stdout) {
                uuids.insert(cap[1].to_lowercase());
            }
            for cap in mac_re().captures_iter(&xml.stdout) {
                macs.insert(cap[1].to_lowercase());
            }
        }
    }
    debug!(uuids = uuids.len(), macs = macs.len(), "collected fleet identities");
    Ok((uuids, macs))
}

fn random_mac() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{}:{:02x}:{:02x}:{:02x}",
        MAC_PREFIX,
        rng.r#gen::<u8>(),
        rng.r#gen::<u8>(),
        rng.r#gen::<u8>()
    )
}

/// Allocate a fleet-unique (uuid, mac) pair.
pub fn allocate(cfg: &Config, connector: &dyn Connector) -> Result<(String, String)> {
    let (uuids, macs) = known_ids(cfg, connector)?;
    loop {
        let uuid = Uuid::new_v4().to_string();
        let mac = random_mac();
        if !uuids.contains(&uuid) && !macs.contains(&mac) {
            return Ok((uuid, mac));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scs_remote::host::ExecResult;
    use scs_remote::mock::{MockConnector, MockRemote};
    use tempfile::TempDir;

    #[test]
    fn test_random_mac_shape() {
        let mac = random_mac();
        assert!(mac.starts_with("54:52:00:"));
        assert_eq!(mac.len(), 17);
    }

    #[test]
    fn test_known_ids_scrapes_dumpxml() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::for_repo(dir.path());
        Store::<Hypervisor>::new(&cfg)
            .create(Hypervisor {
                name: "kvm01".to_string(),
                mgmt_ip: "10.1.0.10".to_string(),
                location: "nyc".to_string(),
                vm_path: "/vm".to_string(),
                min_free_disk_mb: 0,
                min_free_mem_mb: 0,
                enabled: true,
            })
            .unwrap();

        let xml = "<domain><uuid>6a3f2c44-0000-4111-8222-aaaaaaaaaaaa</uuid>\n\
                   <interface type='bridge'><mac address='54:52:00:AA:BB:CC'/></interface></domain>";
        let host = MockRemote::new("10.1.0.10")
            .on("virsh list --all --name", ExecResult::ok("web01\n"))
            .on("virsh dumpxml web01", ExecResult::ok(xml));
        let connector = MockConnector::new();
        connector.add(host);

        let (uuids, macs) = known_ids(&cfg, &connector).unwrap();
        assert!(uuids.contains("6a3f2c44-0000-4111-8222-aaaaaaaaaaaa"));
        assert!(macs.contains("54:52:00:aa:bb:cc"));

        let (uuid, mac) = allocate(&cfg, &connector).unwrap();
        assert_ne!(uuid, "6a3f2c44-0000-4111-8222-aaaaaaaaaaaa");
        assert!(mac.starts_with("54:52:00:"));
    }
}
