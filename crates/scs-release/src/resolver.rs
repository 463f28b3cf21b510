//! The layered constant resolver. Five scopes contribute values; the
//! highest-priority definition of a name wins and later occurrences are
//! dropped. On top of constants the resolver emits the system's own
//! variables and any resources assigned to it.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use scs_core::error::Result;
use scs_core::Config;
use scs_store::entities::{
    Application, Network, Resource, ResourceAssign, System, application, build, network, resource,
};
use scs_store::record::Store;
use scs_store::values::{self, Scope};

/// An ordered variable map with first-definition-wins semantics. Names are
/// compared case-insensitively and held lower-cased.
#[derive(Debug, Default, Clone)]
pub struct VarMap {
    pairs: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl VarMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the name is already defined.
    pub fn define(&mut self, name: &str, value: &str) {
        let name = name.to_lowercase();
        if self.index.contains_key(&name) {
            return;
        }
        self.index.insert(name.clone(), self.pairs.len());
        self.pairs.push((name, value.to_string()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.index
            .get(&name.to_lowercase())
            .map(|&i| self.pairs[i].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// `name value` pairs, one per line, in definition order.
    pub fn to_lines(&self) -> String {
        self.pairs
            .iter()
            .map(|(n, v)| format!("{} {}\n", n, v))
            .collect()
    }
}

/// The application set a system serves: every application bound to any
/// build in the system's build lineage, sorted by name.
pub fn application_set(cfg: &Config, system: &System) -> Result<Vec<Application>> {
    let lineage = build::lineage_names(cfg, &system.build)?;
    application::for_builds(cfg, &lineage)
}

/// Build the effective variable map for a system.
pub fn resolve(cfg: &Config, system: &System) -> Result<VarMap> {
    let apps = application_set(cfg, system)?;
    let mut map = VarMap::new();

    // constant scopes, highest priority first
    let mut scopes = Vec::new();
    for app in &apps {
        scopes.push(Scope::EnvApplication(system.environment.clone(), app.name.clone()));
    }
    scopes.push(Scope::EnvLocation(system.environment.clone(), system.location.clone()));
    scopes.push(Scope::Environment(system.environment.clone()));
    for app in &apps {
        scopes.push(Scope::Application(app.name.clone()));
    }
    scopes.push(Scope::Global);

    for scope in &scopes {
        for (name, value) in values::list(cfg, scope)? {
            map.define(&format!("constant.{}", name), &value);
        }
    }

    define_system_vars(cfg, system, &mut map)?;
    define_resources(cfg, system, &apps, &mut map)?;
    Ok(map)
}

fn define_system_vars(cfg: &Config, system: &System, map: &mut VarMap) -> Result<()> {
    map.define("system.name", &system.name);
    map.define("system.ip", &system.ip);
    map.define("system.location", &system.location);
    map.define("system.environment", &system.environment);
    map.define("system.build", &system.build);

    let Some(ip) = system.ipv4() else {
        return Ok(());
    };
    let Some(net) = network::containing(cfg, ip)?.into_iter().next() else {
        return Ok(());
    };
    map.define("system.zone", &net.zone);
    map.define("system.network", &net.network);
    map.define("system.netmask", &net.mask);
    map.define("system.gateway", &net.gateway);
    map.define("system.broadcast", &broadcast(&net));
    if !net.dns.is_empty() {
        map.define("system.dns", &net.dns);
    }
    if !net.ntp.is_empty() {
        map.define("system.ntp", &net.ntp);
    }
    if !net.vlan.is_empty() {
        map.define("system.vlan", &net.vlan);
    }
    Ok(())
}

fn broadcast(net: &Network) -> String {
    let Ok(base) = net.network.parse::<Ipv4Addr>() else {
        return String::new();
    };
    let mask = u32::MAX.checked_shl(32 - net.cidr as u32).unwrap_or(0);
    Ipv4Addr::from(u32::from(base) | !mask).to_string()
}

fn define_resources(
    cfg: &Config,
    system: &System,
    apps: &[Application],
    map: &mut VarMap,
) -> Result<()> {
    for res in Store::<Resource>::new(cfg).list()? {
        let ours = match &res.assign {
            ResourceAssign::Host(host) => host == &system.name,
            ResourceAssign::Application { location, environment, application } => {
                location == &system.location
                    && environment == &system.environment
                    && apps.iter().any(|a| &a.name == application)
            }
            ResourceAssign::Unassigned => false,
        };
        if ours {
            map.define(&resource::variable_name(&res), &res.value);
        }
    }
    Ok(())
}
