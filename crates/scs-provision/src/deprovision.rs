//! Tear a virtual system down everywhere it exists: destroy and undefine
//! the domain, delete every associated image (immutable bits cleared
//! first), drop the HV-System rows, and free the address.

use scs_core::error::{Result, ScsError};
use scs_core::Config;
use scs_remote::host::{Connector, RemoteHost};
use scs_store::entities::{HvSystem, Hypervisor, System};
use scs_store::record::Store;
use scs_store::Record;
use tracing::{info, instrument};

/// Remove a system's VMs and images from the fleet. Confirmation is the
/// caller's job; this function assumes it already happened.
#[instrument(skip_all, fields(system = system_name))]
pub fn deprovision(cfg: &Config, connector: &dyn Connector, system_name: &str) -> Result<()> {
    let systems = Store::<System>::new(cfg);
    let sys = systems.load(system_name)?;
    if !sys.virtual_machine {
        return Err(ScsError::validation(format!(
            "system '{}' is physical; nothing to deprovision",
            system_name
        )));
    }

    let links = Store::<HvSystem>::new(cfg);
    let holders = links.filter(|l| l.system == system_name)?;
    let hvs = Store::<Hypervisor>::new(cfg);

    for link in &holders {
        let hv = hvs.load(&link.hypervisor)?;
        let Ok(remote) = connector.connect(&hv.mgmt_ip) else {
            info!(hv = %hv.name, "unreachable during deprovision; skipping");
            continue;
        };
        remote.exec(&format!("virsh destroy {} 2>/dev/null; true", system_name))?;
        remote.exec(&format!("virsh undefine {} 2>/dev/null; true", system_name))?;
        remote.exec(&format!("rm -f /etc/libvirt/qemu/{}.xml", system_name))?;

        if sys.backing_image {
            let pattern = format!("{}/backing_images/{}*.img", hv.vm_path, system_name);
            remote.exec_ok(&format!(
                "for img in {p}; do [ -e \"$img\" ] || continue; chattr -i \"$img\"; rm -f \"$img\"; done",
                p = pattern
            ))?;
        } else {
            remote.exec_ok(&format!(
                "for img in {path}/{name}.img {path}/{name}.*.img; do \
                 [ -e \"$img\" ] || continue; chattr -i \"$img\" 2>/dev/null; rm -f \"$img\"; done",
                path = hv.vm_path,
                name = system_name
            ))?;
        }
        info!(hv = %hv.name, "domain and images removed");
    }

    for link in holders {
        links.delete(&link.key())?;
    }

    if let Some(ip) = sys.ipv4()
        && scs_ipam::index::find(cfg, ip)?.is_some()
    {
        scs_ipam::index::unassign(cfg, ip)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scs_ipam::index;
    use scs_remote::mock::{MockConnector, MockRemote};
    use scs_store::entities::{Build, Environment, Location, Network, network, system};
    use tempfile::TempDir;

    fn repo() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let cfg = Config::for_repo(dir.path());
        (dir, cfg)
    }

    fn seed(cfg: &Config, ip: &str, backing: bool) {
        Store::<Build>::new(cfg)
            .create(Build {
                name: "web-el7".to_string(),
                role: "web".to_string(),
                description: String::new(),
                os: "el7".to_string(),
                arch: "x86_64".to_string(),
                disk_gb: Some(20),
                ram_mb: Some(2048),
                parent: None,
            })
            .unwrap();
        Store::<Location>::new(cfg)
            .create(Location {
                code: "nyc".to_string(),
                name: "New York".to_string(),
                description: String::new(),
            })
            .unwrap();
        Store::<Environment>::new(cfg)
            .create(Environment {
                name: "prod".to_string(),
                alias: "P".to_string(),
                description: String::new(),
            })
            .unwrap();
        system::create(
            cfg,
            System {
                name: "web01".to_string(),
                build: "web-el7".to_string(),
                ip: ip.to_string(),
                location: "nyc".to_string(),
                environment: "prod".to_string(),
                virtual_machine: true,
                backing_image: backing,
                overlay: None,
                locked: false,
                build_date: 0,
            },
        )
        .unwrap();
        Store::<Hypervisor>::new(cfg)
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
        Store::<HvSystem>::new(cfg)
            .create(HvSystem {
                system: "web01".to_string(),
                hypervisor: "kvm01".to_string(),
                preferred: true,
            })
            .unwrap();
    }

    #[test]
    fn test_deprovision_single() {
        let (_dir, cfg) = repo();
        seed(&cfg, "10.10.0.9", false);
        network::create(
            &cfg,
            Network {
                location: "nyc".to_string(),
                zone: "internal".to_string(),
                alias: "servers".to_string(),
                network: "10.10.0.0".to_string(),
                mask: "255.255.255.0".to_string(),
                cidr: 24,
                gateway: "10.10.0.1".to_string(),
                static_routes: false,
                dns: String::new(),
                vlan: String::new(),
                description: String::new(),
                repo_addr: String::new(),
                repo_fs_path: String::new(),
                repo_url: String::new(),
                build_net: false,
                default_build: false,
                ntp: String::new(),
                dhcp: String::new(),
            },
        )
        .unwrap();
        let net = Store::<Network>::new(&cfg).load("nyc-internal-servers").unwrap();
        index::add_range(&cfg, &net, "10.10.0.1".parse().unwrap(), "10.10.0.20".parse().unwrap())
            .unwrap();
        let probe = scs_ipam::probe::FixedProbe(Vec::new());
        index::assign(&cfg, &probe, "10.10.0.9".parse().unwrap(), "web01", false, None).unwrap();

        let host = MockRemote::new("10.1.0.10");
        let connector = MockConnector::new();
        connector.add(host.clone());

        deprovision(&cfg, &connector, "web01").unwrap();

        assert!(host.saw("virsh destroy web01"));
        assert!(host.saw("virsh undefine web01"));
        assert!(host.saw("rm -f /etc/libvirt/qemu/web01.xml"));
        assert!(host.saw("/vm/web01.img"));
        assert!(Store::<HvSystem>::new(&cfg).list().unwrap().is_empty());
        let row = index::find(&cfg, "10.10.0.9".parse().unwrap()).unwrap().unwrap();
        assert!(row.hostname.is_empty());
    }

    #[test]
    fn test_deprovision_backing_clears_image_directory() {
        let (_dir, cfg) = repo();
        seed(&cfg, "dhcp", true);
        let host = MockRemote::new("10.1.0.10");
        let connector = MockConnector::new();
        connector.add(host.clone());

        deprovision(&cfg, &connector, "web01").unwrap();
        assert!(host.saw("/vm/backing_images/web01*.img"));
        assert!(host.saw("chattr -i"));
    }

    #[test]
    fn test_deprovision_physical_rejected() {
        let (_dir, cfg) = repo();
        seed(&cfg, "dhcp", false);
        let mut sys = Store::<System>::new(&cfg).load("web01").unwrap();
        sys.virtual_machine = false;
        sys.backing_image = false;
        system::update(&cfg, "web01", sys).unwrap();
        let connector = MockConnector::new();
        assert!(matches!(
            deprovision(&cfg, &connector, "web01"),
            Err(ScsError::Validation(_))
        ));
    }
}
