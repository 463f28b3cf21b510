//! Auto-overlay resolution: find an existing backing image for a system,
//! or synthesize (and synchronously provision) a fresh one.

use scs_core::error::Result;
use scs_core::{Config, time};
use scs_ipam::probe::Liveness;
use scs_remote::host::Connector;
use scs_store::entities::{Build, System, system};
use scs_store::record::Store;
use tracing::{info, instrument};

use crate::phase1::{self, ProvisionOpts};
use crate::phase2::{self, Phase2Opts};

/// Resolve the backing system an `overlay=auto` system should sit on.
///
/// Candidates share the build, location, and environment, are backing
/// images, and are not overlay descendants of the system being resolved;
/// the most recently built wins. With no candidate, a new backing system is
/// created for the build's parent and provisioned synchronously.
#[instrument(skip_all, fields(system = %sys.name))]
pub fn resolve_auto(
    cfg: &Config,
    connector: &dyn Connector,
    probe: &dyn Liveness,
    sys: &System,
) -> Result<String> {
    let systems = Store::<System>::new(cfg);
    let mut candidates = systems.filter(|s| {
        s.backing_image
            && s.build == sys.build
            && s.location == sys.location
            && s.environment == sys.environment
            && s.name != sys.name
    })?;
    candidates.retain(|c| !chain_contains(&systems, c, &sys.name).unwrap_or(true));
    candidates.sort_by_key(|c| std::cmp::Reverse(c.build_date));

    if let Some(found) = candidates.first() {
        return Ok(found.name.clone());
    }

    synthesize_backing(cfg, connector, probe, sys)
}

/// Whether `name` appears in the overlay ancestry of `sys`.
fn chain_contains(systems: &Store<System>, sys: &System, name: &str) -> Result<bool> {
    let mut cursor = sys.overlay.clone();
    let mut hops = 0;
    while let Some(parent) = cursor {
        if parent == name {
            return Ok(true);
        }
        if parent == "auto" || hops > 32 {
            return Ok(false);
        }
        hops += 1;
        cursor = match systems.load(&parent) {
            Ok(p) => p.overlay,
            Err(_) => return Ok(false),
        };
    }
    Ok(false)
}

/// Create `<parent_build>_<unix_ts>` as a backing system and provision it
/// in the foreground on the same build network.
fn synthesize_backing(
    cfg: &Config,
    connector: &dyn Connector,
    probe: &dyn Liveness,
    sys: &System,
) -> Result<String> {
    let build = Store::<Build>::new(cfg).load(&sys.build)?;
    let base_build = build.parent.clone().unwrap_or_else(|| build.name.clone());
    let base_rec = Store::<Build>::new(cfg).load(&base_build)?;
    let name = format!("{}_{}", base_build, time::unix_now());
    info!(backing = %name, build = %base_build, "synthesizing backing system");

    let backing = System {
        name: name.clone(),
        build: base_build,
        ip: "dhcp".to_string(),
        location: sys.location.clone(),
        environment: sys.environment.clone(),
        virtual_machine: true,
        backing_image: true,
        // a parent with its own parent chains through another overlay
        overlay: base_rec.parent.as_ref().map(|_| "auto".to_string()),
        locked: false,
        build_date: 0,
    };
    system::create(cfg, backing)?;

    let opts = ProvisionOpts {
        foreground: true,
        ..Default::default()
    };
    let plan = phase1::provision(cfg, connector, probe, &name, &opts)?;
    phase2::run_phase2(cfg, connector, &plan, &Phase2Opts::default())?;
    Ok(name)
}
