//! End-to-end provisioning against mock hypervisors: the backing-image
//! lifecycle and overlay auto-selection, driven through both phases with
//! zero-length polling.

use std::time::Duration;

use scs_core::Config;
use scs_ipam::index;
use scs_provision::{Phase2Opts, ProvisionOpts, phase1, run_phase2};
use scs_remote::host::ExecResult;
use scs_remote::mock::{MockConnector, MockRemote};
use scs_store::entities::{
    Build, Environment, HvEnvironment, HvNetwork, HvSystem, Hypervisor, Location, Network, System,
    network, system,
};
use scs_store::record::Store;
use tempfile::TempDir;

fn test_config() -> (TempDir, Config) {
    let dir = TempDir::new().unwrap();
    let mut cfg = Config::for_repo(dir.path().join("repo"));
    cfg.temp = dir.path().join("tmp");
    cfg.temp_large = dir.path().join("tmp");
    cfg.releases = dir.path().join("releases");
    std::fs::create_dir_all(&cfg.repo).unwrap();
    (dir, cfg)
}

fn fast() -> Phase2Opts {
    Phase2Opts {
        poll: Duration::ZERO,
        max_polls: 100,
    }
}

/// Location, environment, build, build network with a populated range,
/// one hypervisor fully linked, kickstart template, and build scripts.
fn seed_fleet(cfg: &Config) {
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
    network::create(
        cfg,
        Network {
            location: "nyc".to_string(),
            zone: "internal".to_string(),
            alias: "build".to_string(),
            network: "10.10.0.0".to_string(),
            mask: "255.255.255.0".to_string(),
            cidr: 24,
            gateway: "10.10.0.1".to_string(),
            static_routes: false,
            dns: "10.0.0.53".to_string(),
            vlan: String::new(),
            description: String::new(),
            repo_addr: "10.0.0.5".to_string(),
            repo_fs_path: "/srv/www/ks".to_string(),
            repo_url: "ks".to_string(),
            build_net: true,
            default_build: true,
            ntp: String::new(),
            dhcp: String::new(),
        },
    )
    .unwrap();
    let net = Store::<Network>::new(cfg).load("nyc-internal-build").unwrap();
    index::add_range(cfg, &net, "10.10.0.2".parse().unwrap(), "10.10.0.50".parse().unwrap())
        .unwrap();

    Store::<Hypervisor>::new(cfg)
        .create(Hypervisor {
            name: "kvm01".to_string(),
            mgmt_ip: "10.1.0.10".to_string(),
            location: "nyc".to_string(),
            vm_path: "/vm".to_string(),
            min_free_disk_mb: 1024,
            min_free_mem_mb: 512,
            enabled: true,
        })
        .unwrap();
    Store::<HvEnvironment>::new(cfg)
        .create(HvEnvironment {
            environment: "prod".to_string(),
            hypervisor: "kvm01".to_string(),
        })
        .unwrap();
    Store::<HvNetwork>::new(cfg)
        .create(HvNetwork {
            network: "nyc-internal-build".to_string(),
            hypervisor: "kvm01".to_string(),
            interface: "br0".to_string(),
        })
        .unwrap();

    std::fs::create_dir_all(cfg.repo_path("kickstart")).unwrap();
    std::fs::write(
        cfg.repo_path("kickstart/el7.tpl"),
        "network --ip {% system.ip %} --gateway {% system.gateway %} --hostname {% system.name %}\n",
    )
    .unwrap();
    std::fs::create_dir_all(cfg.repo_path("system-builds")).unwrap();
    std::fs::write(cfg.repo_path("system-builds/role.sh"), "#!/bin/sh\nexit 0\n").unwrap();
}

fn hypervisor_mock(vm: &str) -> std::sync::Arc<MockRemote> {
    MockRemote::new("10.1.0.10")
        // phase 1 sees no domain; every later poll sees the installed VM
        // powered down
        .on_seq(
            &format!("virsh domstate {}", vm),
            vec![ExecResult::failed(1, "no domain"), ExecResult::ok("shut off\n")],
        )
        .on("free -m", ExecResult::ok("4096\n"))
        .on("df -Pm", ExecResult::ok("50000\n"))
        .on("virsh list --all --name", ExecResult::ok(""))
        .on("virsh list --name", ExecResult::ok(""))
}

#[test]
fn test_backing_lifecycle_end_to_end() {
    let (_dir, cfg) = test_config();
    seed_fleet(&cfg);
    system::create(
        &cfg,
        System {
            name: "base1".to_string(),
            build: "web-el7".to_string(),
            ip: "dhcp".to_string(),
            location: "nyc".to_string(),
            environment: "prod".to_string(),
            virtual_machine: true,
            backing_image: true,
            overlay: None,
            locked: false,
            build_date: 0,
        },
    )
    .unwrap();

    let hv = hypervisor_mock("base1");
    let repo_host = MockRemote::new("10.0.0.5");
    let target = MockRemote::new("10.10.0.2");
    let connector = MockConnector::new();
    connector.add(hv.clone());
    connector.add(repo_host.clone());
    connector.add(target.clone());

    let probe = scs_ipam::probe::FixedProbe(Vec::new());
    let opts = ProvisionOpts {
        foreground: true,
        ..Default::default()
    };
    let plan = phase1::provision(&cfg, &connector, &probe, "base1", &opts).unwrap();

    // the kickstart went to the repo host and the creator got a full
    // install
    assert!(repo_host.read_file("/srv/www/ks/base1.cfg").is_some());
    assert!(hv.saw("--ks http://10.0.0.5/ks/base1.cfg"));
    assert_eq!(plan.build_ip, "10.10.0.2");
    assert!(plan.backing_image);

    // build address reserved for the system
    let row = index::find(&cfg, "10.10.0.2".parse().unwrap()).unwrap().unwrap();
    assert_eq!(row.hostname, "base1");

    run_phase2(&cfg, &connector, &plan, &fast()).unwrap();

    // role build ran and the kickstart was retracted
    assert!(target.saw("ESG/system-builds/role.sh scs-build --name base1 --shutdown web"));
    assert!(repo_host.read_file("/srv/www/ks/base1.cfg").is_none());

    // converted in place: disk moved under backing_images and locked
    assert!(hv.saw("mv /vm/base1.img /vm/backing_images/base1.img"));
    assert!(hv.saw("chattr +i /vm/backing_images/base1.img"));
    assert!(hv.saw("virsh undefine base1"));

    let sys = Store::<System>::new(&cfg).load("base1").unwrap();
    assert!(sys.backing_image);
    assert!(sys.build_date > 0);
    // hv-system still resolves the image to the same host
    assert!(Store::<HvSystem>::new(&cfg).exists("base1:kvm01").unwrap());
}

#[test]
fn test_overlay_auto_selects_existing_backing() {
    let (_dir, cfg) = test_config();
    seed_fleet(&cfg);
    // a backing image that already lives on kvm01
    system::create(
        &cfg,
        System {
            name: "base1".to_string(),
            build: "web-el7".to_string(),
            ip: "dhcp".to_string(),
            location: "nyc".to_string(),
            environment: "prod".to_string(),
            virtual_machine: true,
            backing_image: true,
            overlay: None,
            locked: false,
            build_date: 1700000000,
        },
    )
    .unwrap();
    Store::<HvSystem>::new(&cfg)
        .create(HvSystem {
            system: "base1".to_string(),
            hypervisor: "kvm01".to_string(),
            preferred: true,
        })
        .unwrap();
    system::create(
        &cfg,
        System {
            name: "app1".to_string(),
            build: "web-el7".to_string(),
            ip: "10.10.0.30".to_string(),
            location: "nyc".to_string(),
            environment: "prod".to_string(),
            virtual_machine: true,
            backing_image: false,
            overlay: Some("auto".to_string()),
            locked: false,
            build_date: 0,
        },
    )
    .unwrap();

    let hv = hypervisor_mock("app1")
        .on("test -f /vm/backing_images/base1.img", ExecResult::ok(""));
    let target = MockRemote::new("10.10.0.30");
    let connector = MockConnector::new();
    connector.add(hv.clone());
    connector.add(target.clone());

    let probe = scs_ipam::probe::FixedProbe(Vec::new());
    let opts = ProvisionOpts {
        foreground: true,
        ..Default::default()
    };
    let plan = phase1::provision(&cfg, &connector, &probe, "app1", &opts).unwrap();

    // overlay resolved to the existing backing image and the creator ran
    // without a kickstart
    assert_eq!(plan.backing.as_deref(), Some("base1"));
    assert!(plan.kickstart_url.is_none());
    assert!(hv.saw("--no-install --base base1.img"));
    let sys = Store::<System>::new(&cfg).load("app1").unwrap();
    assert_eq!(sys.overlay.as_deref(), Some("base1"));

    run_phase2(&cfg, &connector, &plan, &fast()).unwrap();

    // recorded on a hypervisor that carries the backing image, preferred
    let link = Store::<HvSystem>::new(&cfg).load("app1:kvm01").unwrap();
    assert!(link.preferred);
    assert!(hv.saw("test -f /vm/backing_images/base1.img"));
}

#[test]
fn test_provision_refuses_locked_and_existing_systems() {
    let (_dir, cfg) = test_config();
    seed_fleet(&cfg);
    system::create(
        &cfg,
        System {
            name: "web01".to_string(),
            build: "web-el7".to_string(),
            ip: "dhcp".to_string(),
            location: "nyc".to_string(),
            environment: "prod".to_string(),
            virtual_machine: true,
            backing_image: false,
            overlay: None,
            locked: true,
            build_date: 0,
        },
    )
    .unwrap();

    let connector = MockConnector::new();
    connector.add(MockRemote::new("10.1.0.10"));
    let probe = scs_ipam::probe::FixedProbe(Vec::new());
    let opts = ProvisionOpts::default();

    let err = phase1::provision(&cfg, &connector, &probe, "web01", &opts).unwrap_err();
    assert!(err.to_string().contains("locked"));

    // unlock, but the domain already exists somewhere
    let mut sys = Store::<System>::new(&cfg).load("web01").unwrap();
    sys.locked = false;
    system::update(&cfg, "web01", sys).unwrap();
    let connector = MockConnector::new();
    connector.add(
        MockRemote::new("10.1.0.10").on("virsh domstate web01", ExecResult::ok("running\n")),
    );
    let err = phase1::provision(&cfg, &connector, &probe, "web01", &opts).unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

#[test]
fn test_phase2_aborts_at_polling_boundary() {
    let (_dir, cfg) = test_config();
    seed_fleet(&cfg);
    system::create(
        &cfg,
        System {
            name: "web01".to_string(),
            build: "web-el7".to_string(),
            ip: "dhcp".to_string(),
            location: "nyc".to_string(),
            environment: "prod".to_string(),
            virtual_machine: true,
            backing_image: false,
            overlay: None,
            locked: false,
            build_date: 0,
        },
    )
    .unwrap();

    let hv = hypervisor_mock("web01");
    let repo_host = MockRemote::new("10.0.0.5");
    let target = MockRemote::new("10.10.0.2");
    let connector = MockConnector::new();
    connector.add(hv);
    connector.add(repo_host);
    connector.add(target);

    let probe = scs_ipam::probe::FixedProbe(Vec::new());
    let opts = ProvisionOpts {
        foreground: true,
        ..Default::default()
    };
    let plan = phase1::provision(&cfg, &connector, &probe, "web01", &opts).unwrap();

    scs_provision::abort::enable(&cfg).unwrap();
    let err = run_phase2(&cfg, &connector, &plan, &fast()).unwrap_err();
    assert!(matches!(err, scs_core::ScsError::Aborted(_)));
}
