use serde::Serialize;

use scs_core::error::{Result, ScsError};
use scs_core::{Config, fields};

use crate::record::{Record, Store};

/// An IP network at a location, keyed by `(location, zone, alias)`.
#[derive(Debug, Clone, Serialize)]
pub struct Network {
    pub location: String,
    pub zone: String,
    pub alias: String,
    /// Network address, dotted quad.
    pub network: String,
    /// Dotted-quad netmask.
    pub mask: String,
    pub cidr: u8,
    pub gateway: String,
    /// Whether a static-routes file is distributed to members.
    pub static_routes: bool,
    pub dns: String,
    pub vlan: String,
    pub description: String,
    /// Install repo host address, e.g. the kickstart web server.
    pub repo_addr: String,
    /// Filesystem path on the repo host where kickstarts are written.
    pub repo_fs_path: String,
    /// URL path under which kickstarts are served.
    pub repo_url: String,
    /// Whether systems can be built while attached to this network.
    pub build_net: bool,
    /// Whether this is the location's default build network.
    pub default_build: bool,
    pub ntp: String,
    pub dhcp: String,
}

impl Network {
    /// The `loc-zone-alias` form used as a foreign key elsewhere.
    pub fn loc_zone_alias(&self) -> String {
        format!("{}-{}-{}", self.location, self.zone, self.alias)
    }
}

impl Record for Network {
    const FILE: &'static str = "network";
    const KIND: &'static str = "network";
    const FIELD_COUNT: usize = 18;

    fn key(&self) -> String {
        self.loc_zone_alias()
    }

    fn parse(f: &[&str]) -> Result<Self> {
        Ok(Self {
            location: f[0].to_string(),
            zone: f[1].to_string(),
            alias: f[2].to_string(),
            network: f[3].to_string(),
            mask: f[4].to_string(),
            cidr: f[5]
                .parse()
                .map_err(|_| ScsError::validation(format!("bad cidr '{}'", f[5])))?,
            gateway: f[6].to_string(),
            static_routes: fields::parse_yn("static_routes", f[7])?,
            dns: f[8].to_string(),
            vlan: f[9].to_string(),
            description: f[10].to_string(),
            repo_addr: f[11].to_string(),
            repo_fs_path: f[12].to_string(),
            repo_url: f[13].to_string(),
            build_net: fields::parse_yn("build_net", f[14])?,
            default_build: fields::parse_yn("default_build", f[15])?,
            ntp: f[16].to_string(),
            dhcp: f[17].to_string(),
        })
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.location.clone(),
            self.zone.clone(),
            self.alias.clone(),
            self.network.clone(),
            self.mask.clone(),
            self.cidr.to_string(),
            self.gateway.clone(),
            fields::yn(self.static_routes).to_string(),
            self.dns.clone(),
            self.vlan.clone(),
            self.description.clone(),
            self.repo_addr.clone(),
            self.repo_fs_path.clone(),
            self.repo_url.clone(),
            fields::yn(self.build_net).to_string(),
            fields::yn(self.default_build).to_string(),
            self.ntp.clone(),
            self.dhcp.clone(),
        ]
    }

    fn validate(&self) -> Result<()> {
        fields::validate_name("network location", &self.location)?;
        fields::validate_name("network zone", &self.zone)?;
        fields::validate_name("network alias", &self.alias)?;
        fields::parse_ipv4(&self.network)?;
        fields::parse_ipv4(&self.mask)?;
        if self.cidr > 32 {
            return Err(ScsError::validation(format!("cidr /{} out of range", self.cidr)));
        }
        if !self.gateway.is_empty() {
            fields::parse_ipv4(&self.gateway)?;
        }
        Ok(())
    }
}

/// Create a network, enforcing at most one default-build network per
/// location (invariant I5).
pub fn create(cfg: &Config, net: Network) -> Result<()> {
    check_default_build(cfg, &net, None)?;
    Store::<Network>::new(cfg).create(net)
}

pub fn update(cfg: &Config, key: &str, net: Network) -> Result<()> {
    check_default_build(cfg, &net, Some(key))?;
    Store::<Network>::new(cfg).update(key, net)
}

fn check_default_build(cfg: &Config, net: &Network, skip_key: Option<&str>) -> Result<()> {
    if !net.default_build {
        return Ok(());
    }
    let other = Store::<Network>::new(cfg).list()?.into_iter().find(|n| {
        n.location == net.location && n.default_build && Some(n.key().as_str()) != skip_key
    });
    if let Some(other) = other {
        return Err(ScsError::conflict(format!(
            "location '{}' already has default-build network '{}'",
            net.location,
            other.key()
        )));
    }
    Ok(())
}

/// The default build network for a location, if one is registered.
pub fn default_build_network(cfg: &Config, location: &str) -> Result<Option<Network>> {
    Ok(Store::<Network>::new(cfg)
        .list()?
        .into_iter()
        .find(|n| n.location == location && n.default_build))
}

/// Every configured network that contains `ip`.
pub fn containing(cfg: &Config, ip: std::net::Ipv4Addr) -> Result<Vec<Network>> {
    Ok(Store::<Network>::new(cfg)
        .list()?
        .into_iter()
        .filter(|n| contains(n, ip))
        .collect())
}

/// Whether `net` contains `ip`.
pub fn contains(net: &Network, ip: std::net::Ipv4Addr) -> bool {
    let Ok(base) = net.network.parse::<std::net::Ipv4Addr>() else {
        return false;
    };
    let mask = u32::MAX.checked_shl(32 - net.cidr as u32).unwrap_or(0);
    (u32::from(base) & mask) == (u32::from(ip) & mask)
}
