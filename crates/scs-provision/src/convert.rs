//! Image conversions between the VM kinds. Overlay conversions are not
//! supported: merging an overlay into a standalone image safely would need
//! a block-commit pass nobody has needed yet.

use scs_core::error::{Result, ScsError};
use scs_core::Config;
use scs_remote::host::{Connector, RemoteHost};
use scs_store::entities::{HvSystem, Hypervisor, System, VmKind, system};
use scs_store::record::Store;
use tracing::{info, instrument};

use crate::{distribute, hypervisor, ids};

/// Convert a provisioned single system into a backing image: stop it
/// everywhere, move the disk under `backing_images/`, set the immutable
/// bit, and undefine the domain.
#[instrument(skip_all, fields(system = system_name))]
pub fn to_backing(
    cfg: &Config,
    connector: &dyn Connector,
    system_name: &str,
    push_everywhere: bool,
) -> Result<()> {
    let systems = Store::<System>::new(cfg);
    let mut sys = systems.load(system_name)?;
    if sys.vm_kind() == Some(VmKind::Overlay) {
        return Err(ScsError::validation(format!(
            "system '{}' is an overlay; overlay to backing conversion is unsupported",
            system_name
        )));
    }

    let holders = hypervisor::locate(cfg, connector, system_name)?;
    if holders.is_empty() {
        return Err(ScsError::missing(format!(
            "system '{}' is not defined on any hypervisor",
            system_name
        )));
    }

    let hvs = Store::<Hypervisor>::new(cfg);
    for (hv_name, state) in &holders {
        let hv = hvs.load(hv_name)?;
        let remote = connector.connect(&hv.mgmt_ip)?;
        if state == "running" {
            remote.exec_ok(&format!("virsh destroy {}", system_name))?;
        }
        remote.exec_ok(&format!("mkdir -p {}/backing_images", hv.vm_path))?;
        remote.exec_ok(&format!(
            "mv {path}/{name}.img {path}/backing_images/{name}.img",
            path = hv.vm_path,
            name = system_name
        ))?;
        remote.exec_ok(&format!(
            "chattr +i {}/backing_images/{}.img",
            hv.vm_path, system_name
        ))?;
        remote.exec_ok(&format!("virsh undefine {}", system_name))?;
        info!(hv = %hv.name, "converted to backing image");
    }

    sys.backing_image = true;
    sys.overlay = None;
    system::update(cfg, system_name, sys)?;

    if push_everywhere {
        distribute::distribute(cfg, connector, system_name)?;
    }
    Ok(())
}

/// Convert a backing image back into a runnable system. Refused while any
/// other disk overlays the image.
#[instrument(skip_all, fields(system = system_name))]
pub fn from_backing(cfg: &Config, connector: &dyn Connector, system_name: &str) -> Result<()> {
    let systems = Store::<System>::new(cfg);
    let mut sys = systems.load(system_name)?;
    if sys.vm_kind() != Some(VmKind::Backing) {
        return Err(ScsError::validation(format!(
            "system '{}' is not a backing image",
            system_name
        )));
    }

    let link = Store::<HvSystem>::new(cfg)
        .filter(|l| l.system == system_name)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            ScsError::missing(format!("no hypervisor recorded for '{}'", system_name))
        })?;
    let hv = Store::<Hypervisor>::new(cfg).load(&link.hypervisor)?;
    let remote = connector.connect(&hv.mgmt_ip)?;

    check_no_overlays(remote.as_ref(), &hv, system_name)?;

    remote.exec_ok(&format!(
        "chattr -i {}/backing_images/{}.img",
        hv.vm_path, system_name
    ))?;
    remote.exec_ok(&format!(
        "mv {path}/backing_images/{name}.img {path}/{name}.img",
        path = hv.vm_path,
        name = system_name
    ))?;

    // fresh identity for the resurrected domain
    let (uuid, mac) = ids::allocate(cfg, connector)?;
    let extra = secondary_images(remote.as_ref(), &hv, system_name)?;
    let ram_mb = scs_store::entities::build::effective_ram_mb(cfg, &sys.build)?.unwrap_or(1024);
    let xml = domain_xml(system_name, &uuid, &mac, &hv.vm_path, ram_mb, &extra);
    remote.exec_ok(&format!(
        "cat > /tmp/{name}.xml << 'SCSEOF'\n{xml}\nSCSEOF\nvirsh define /tmp/{name}.xml",
        name = system_name,
        xml = xml
    ))?;

    sys.backing_image = false;
    system::update(cfg, system_name, sys)?;
    info!(hv = %hv.name, "backing image restored to a runnable domain");
    Ok(())
}

/// Error out when any disk on the hypervisor overlays this image.
fn check_no_overlays(remote: &dyn RemoteHost, hv: &Hypervisor, name: &str) -> Result<()> {
    let cmd = format!(
        "for img in {path}/*.img; do qemu-img info \"$img\" 2>/dev/null \
         | grep -q 'backing file:.*backing_images/{name}.img' && echo \"$img\"; done; true",
        path = hv.vm_path,
        name = name
    );
    let dependents = remote.exec_ok(&cmd)?;
    if !dependents.trim().is_empty() {
        return Err(ScsError::conflict(format!(
            "backing image '{}' is still referenced by: {}",
            name,
            dependents.trim().replace('\n', ", ")
        )));
    }
    Ok(())
}

/// Secondary disk images named `<name>.<alias>.img` next to the primary.
fn secondary_images(remote: &dyn RemoteHost, hv: &Hypervisor, name: &str) -> Result<Vec<String>> {
    let out = remote.exec(&format!("ls {}/{}.*.img 2>/dev/null; true", hv.vm_path, name))?;
    Ok(out
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn domain_xml(
    name: &str,
    uuid: &str,
    mac: &str,
    vm_path: &str,
    ram_mb: u32,
    extra_disks: &[String],
) -> String {
    let mut disks = format!(
        "    <disk type='file' device='disk'>\n\
         \x20     <driver name='qemu' type='qcow2'/>\n\
         \x20     <source file='{}/{}.img'/>\n\
         \x20     <target dev='vda' bus='virtio'/>\n\
         \x20   </disk>\n",
        vm_path, name
    );
    for (i, path) in extra_disks.iter().enumerate() {
        let dev = format!("vd{}", (b'b' + i as u8) as char);
        disks.push_str(&format!(
            "    <disk type='file' device='disk'>\n\
             \x20     <driver name='qemu' type='qcow2'/>\n\
             \x20     <source file='{}'/>\n\
             \x20     <target dev='{}' bus='virtio'/>\n\
             \x20   </disk>\n",
            path, dev
        ));
    }
    format!(
        "<domain type='kvm'>\n\
         \x20 <name>{name}</name>\n\
         \x20 <uuid>{uuid}</uuid>\n\
         \x20 <memory unit='MiB'>{ram}</memory>\n\
         \x20 <vcpu>1</vcpu>\n\
         \x20 <os><type arch='x86_64'>hvm</type></os>\n\
         \x20 <devices>\n\
         {disks}\
         \x20   <interface type='bridge'>\n\
         \x20     <mac address='{mac}'/>\n\
         \x20   </interface>\n\
         \x20 </devices>\n\
         </domain>",
        name = name,
        uuid = uuid,
        ram = ram_mb,
        disks = disks,
        mac = mac
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use scs_remote::host::ExecResult;
    use scs_remote::mock::{MockConnector, MockRemote};
    use scs_store::entities::{Build, Environment, Location};
    use tempfile::TempDir;

    fn repo() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let cfg = Config::for_repo(dir.path());
        (dir, cfg)
    }

    fn seed(cfg: &Config, backing: bool) {
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
                name: "base1".to_string(),
                build: "web-el7".to_string(),
                ip: "dhcp".to_string(),
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
                system: "base1".to_string(),
                hypervisor: "kvm01".to_string(),
                preferred: true,
            })
            .unwrap();
    }

    #[test]
    fn test_to_backing_moves_and_locks_disk() {
        let (_dir, cfg) = repo();
        seed(&cfg, false);
        let host = MockRemote::new("10.1.0.10")
            .on("virsh domstate base1", ExecResult::ok("running\n"));
        let connector = MockConnector::new();
        connector.add(host.clone());

        to_backing(&cfg, &connector, "base1", false).unwrap();

        assert!(host.saw("virsh destroy base1"));
        assert!(host.saw("mv /vm/base1.img /vm/backing_images/base1.img"));
        assert!(host.saw("chattr +i /vm/backing_images/base1.img"));
        assert!(host.saw("virsh undefine base1"));

        let sys = Store::<System>::new(&cfg).load("base1").unwrap();
        assert!(sys.backing_image);
        // the hv-system row still resolves to the same host
        assert!(
            Store::<HvSystem>::new(&cfg)
                .exists("base1:kvm01")
                .unwrap()
        );
    }

    #[test]
    fn test_to_backing_requires_a_domain_somewhere() {
        let (_dir, cfg) = repo();
        seed(&cfg, false);
        let host = MockRemote::new("10.1.0.10")
            .on("virsh domstate base1", ExecResult::failed(1, "no such domain"));
        let connector = MockConnector::new();
        connector.add(host);
        assert!(matches!(
            to_backing(&cfg, &connector, "base1", false),
            Err(ScsError::MissingReference(_))
        ));
    }

    #[test]
    fn test_from_backing_refuses_while_referenced() {
        let (_dir, cfg) = repo();
        seed(&cfg, true);
        let host = MockRemote::new("10.1.0.10")
            .on("qemu-img info", ExecResult::ok("/vm/app1.img\n"));
        let connector = MockConnector::new();
        connector.add(host);
        let err = from_backing(&cfg, &connector, "base1").unwrap_err();
        assert!(matches!(err, ScsError::Conflict(_)));
        assert!(err.to_string().contains("/vm/app1.img"));
    }

    #[test]
    fn test_from_backing_redefines_domain() {
        let (_dir, cfg) = repo();
        seed(&cfg, true);
        let host = MockRemote::new("10.1.0.10")
            .on("virsh list --all --name", ExecResult::ok(""))
            .on("ls /vm/base1.*.img", ExecResult::ok("/vm/base1.data.img\n"));
        let connector = MockConnector::new();
        connector.add(host.clone());

        from_backing(&cfg, &connector, "base1").unwrap();

        assert!(host.saw("chattr -i /vm/backing_images/base1.img"));
        assert!(host.saw("mv /vm/backing_images/base1.img /vm/base1.img"));
        assert!(host.saw("virsh define /tmp/base1.xml"));
        // secondary image attached as an additional disk
        assert!(host.saw("/vm/base1.data.img"));
        assert!(!Store::<System>::new(&cfg).load("base1").unwrap().backing_image);
    }

    #[test]
    fn test_domain_xml_disks() {
        let xml = domain_xml(
            "base1",
            "u-u-i-d",
            "54:52:00:aa:bb:cc",
            "/vm",
            2048,
            &["/vm/base1.data.img".to_string()],
        );
        assert!(xml.contains("<source file='/vm/base1.img'/>"));
        assert!(xml.contains("<source file='/vm/base1.data.img'/>"));
        assert!(xml.contains("<target dev='vda' bus='virtio'/>"));
        assert!(xml.contains("<target dev='vdb' bus='virtio'/>"));
        assert!(xml.contains("<mac address='54:52:00:aa:bb:cc'/>"));
    }
}
