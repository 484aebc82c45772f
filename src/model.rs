// In-memory configuration graph: gateways, hosts and host groups.
//
// Every table keeps creation order and a name index. Entities are addressed
// by small copyable ids so hosts can point at gateways and groups at hosts
// without shared ownership.

use crate::delay;
use crate::error::Error;
use crate::mac::MacAddr;
use crate::secret::Secret;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

pub const DEFAULT_GATEWAY: &str = "default";
pub const ALL_GROUP: &str = "all";
pub const DEFAULT_ADDRESS: &str = "255.255.255.255";
pub const DEFAULT_PORT: &str = "7";

// Group membership storage grows by this many slots at a time.
const GROUP_CAPACITY_STEP: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GatewayId(usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostId(usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupId(usize);

/// One resolved endpoint of a gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    addr: SocketAddr,
}

impl Target {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Maps a port or one of the few service names WoL is sent to.
pub fn parse_port(port: &str) -> Option<u16> {
    match port {
        "echo" => Some(7),
        "discard" => Some(9),
        _ => port.parse().ok(),
    }
}

#[derive(Clone, Debug)]
pub struct Gateway {
    name: Option<String>,
    pub address: String,
    pub port: String,
    targets: Vec<Target>,
    pub copies: Option<u32>,
    pub delay: Option<Duration>,
    pub secret: Option<Secret>,
}

impl Gateway {
    /// A gateway that never appears in printed configuration, used for
    /// command line destinations and the daemon's listen profile.
    pub fn anonymous(address: &str, port: &str) -> Self {
        Self {
            name: None,
            address: address.to_string(),
            port: port.to_string(),
            targets: vec![],
            copies: None,
            delay: None,
            secret: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn set_targets(&mut self, targets: Vec<Target>) {
        self.targets = targets;
    }

    pub fn resolve_targets(&mut self) -> io::Result<()> {
        let port = parse_port(&self.port).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "unknown port or service")
        })?;
        self.targets = (self.address.as_str(), port)
            .to_socket_addrs()?
            .map(Target::new)
            .collect();
        Ok(())
    }

    fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{} port {}", self.address, self.port),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Host {
    name: String,
    pub mac: MacAddr,
    pub via: Option<GatewayId>,
    pub copies: Option<u32>,
    pub delay: Option<Duration>,
    pub secret: Option<Secret>,
}

impl Host {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone, Debug)]
pub struct HostGroup {
    name: String,
    hosts: Vec<HostId>,
    pub delay: Option<Duration>,
}

impl HostGroup {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            hosts: Vec::with_capacity(GROUP_CAPACITY_STEP),
            delay: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hosts(&self) -> &[HostId] {
        &self.hosts
    }

    // Returns the member count after insertion; members are never repeated.
    fn add(&mut self, host: HostId) -> usize {
        if self.hosts.contains(&host) {
            return self.hosts.len();
        }
        if self.hosts.len() == self.hosts.capacity() {
            self.hosts.reserve_exact(GROUP_CAPACITY_STEP);
        }
        self.hosts.push(host);
        self.hosts.len()
    }
}

#[derive(Debug)]
pub struct Registry {
    gateways: Vec<Gateway>,
    gateway_index: HashMap<String, GatewayId>,
    hosts: Vec<Host>,
    host_index: HashMap<String, HostId>,
    groups: Vec<HostGroup>,
    group_index: HashMap<String, GroupId>,
    default_gateway: GatewayId,
    all_group: Option<GroupId>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates a registry holding only the "default" gateway and the "all"
    /// group.
    pub fn new() -> Self {
        let mut registry = Registry {
            gateways: vec![],
            gateway_index: HashMap::new(),
            hosts: vec![],
            host_index: HashMap::new(),
            groups: vec![],
            group_index: HashMap::new(),
            default_gateway: GatewayId(0),
            all_group: None,
        };
        let mut default = Gateway::anonymous(DEFAULT_ADDRESS, DEFAULT_PORT);
        default.name = Some(DEFAULT_GATEWAY.to_string());
        registry.default_gateway = registry.push_gateway(default);
        registry.all_group = Some(registry.create_group(ALL_GROUP));
        registry
    }

    fn push_gateway(&mut self, gateway: Gateway) -> GatewayId {
        let id = GatewayId(self.gateways.len());
        if let Some(name) = &gateway.name {
            self.gateway_index.insert(name.clone(), id);
        }
        self.gateways.push(gateway);
        id
    }

    pub fn default_gateway(&self) -> GatewayId {
        self.default_gateway
    }

    pub fn gateway(&self, id: GatewayId) -> &Gateway {
        &self.gateways[id.0]
    }

    pub fn gateway_mut(&mut self, id: GatewayId) -> &mut Gateway {
        &mut self.gateways[id.0]
    }

    pub fn lookup_gateway(&self, name: &str) -> Option<GatewayId> {
        self.gateway_index.get(name).copied()
    }

    /// Returns the gateway called `name`, creating it if needed. A new
    /// gateway starts from the default gateway's settings and uses its own
    /// name as address.
    pub fn create_gateway(&mut self, name: &str) -> GatewayId {
        if let Some(id) = self.lookup_gateway(name) {
            return id;
        }
        let mut gateway = self.gateway(self.default_gateway).clone();
        gateway.name = Some(name.to_string());
        gateway.address = name.to_string();
        gateway.targets.clear();
        self.push_gateway(gateway)
    }

    pub fn add_anonymous_gateway(&mut self, mut gateway: Gateway) -> GatewayId {
        gateway.name = None;
        self.push_gateway(gateway)
    }

    pub fn gateways(&self) -> impl Iterator<Item = (GatewayId, &Gateway)> {
        self.gateways
            .iter()
            .enumerate()
            .map(|(i, g)| (GatewayId(i), g))
    }

    pub fn host(&self, id: HostId) -> &Host {
        &self.hosts[id.0]
    }

    pub fn host_mut(&mut self, id: HostId) -> &mut Host {
        &mut self.hosts[id.0]
    }

    pub fn lookup_host(&self, name: &str) -> Option<HostId> {
        self.host_index.get(name).copied()
    }

    /// Returns the host called `name`, creating it with an unset MAC if
    /// needed. New hosts join the "all" group.
    pub fn create_host(&mut self, name: &str, via: Option<GatewayId>) -> HostId {
        if let Some(id) = self.lookup_host(name) {
            return id;
        }
        let id = HostId(self.hosts.len());
        self.hosts.push(Host {
            name: name.to_string(),
            mac: MacAddr::ZERO,
            via,
            copies: None,
            delay: None,
            secret: None,
        });
        self.host_index.insert(name.to_string(), id);
        if let Some(all) = self.all_group {
            self.add_to_group(all, id);
        }
        id
    }

    pub fn hosts(&self) -> impl Iterator<Item = (HostId, &Host)> {
        self.hosts.iter().enumerate().map(|(i, h)| (HostId(i), h))
    }

    /// First host, in creation order, carrying `mac`. Nothing stops two
    /// hosts from sharing an address; later ones are unreachable here.
    pub fn find_host_by_mac(&self, mac: &MacAddr) -> Option<HostId> {
        self.hosts().find(|(_, h)| h.mac == *mac).map(|(id, _)| id)
    }

    pub fn group(&self, id: GroupId) -> &HostGroup {
        &self.groups[id.0]
    }

    pub fn group_mut(&mut self, id: GroupId) -> &mut HostGroup {
        &mut self.groups[id.0]
    }

    pub fn lookup_group(&self, name: &str) -> Option<GroupId> {
        self.group_index.get(name).copied()
    }

    pub fn create_group(&mut self, name: &str) -> GroupId {
        if let Some(id) = self.lookup_group(name) {
            return id;
        }
        let id = GroupId(self.groups.len());
        self.groups.push(HostGroup::new(name));
        self.group_index.insert(name.to_string(), id);
        id
    }

    pub fn add_to_group(&mut self, group: GroupId, host: HostId) -> usize {
        self.groups[group.0].add(host)
    }

    pub fn all_group(&self) -> Option<GroupId> {
        self.all_group
    }

    pub fn groups(&self) -> impl Iterator<Item = (GroupId, &HostGroup)> {
        self.groups.iter().enumerate().map(|(i, g)| (GroupId(i), g))
    }

    /// Turns every gateway's address and port into targets.
    pub fn resolve_targets(&mut self) -> Result<(), Error> {
        for gateway in self.gateways.iter_mut() {
            gateway.resolve_targets().map_err(|err| {
                Error::ConfigResolution(format!("{}: Invalid target: {}", gateway.label(), err))
            })?;
        }
        Ok(())
    }
}

fn write_overrides(
    f: &mut fmt::Formatter,
    copies: Option<u32>,
    delay: Option<Duration>,
    secret: &Option<Secret>,
) -> fmt::Result {
    if let Some(copies) = copies {
        writeln!(f, "  {:<10}  {}", "Copies", copies)?;
    }
    if let Some(delay) = delay.filter(|d| !d.is_zero()) {
        writeln!(f, "  {:<10}  {} ms", "Delay", delay::as_millis_f64(delay))?;
    }
    if let Some(secret) = secret.as_ref().filter(|s| !s.is_empty()) {
        writeln!(f, "  {:<10}  {}", "Secret", secret)?;
    }
    Ok(())
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for gateway in &self.gateways {
            let Some(name) = &gateway.name else {
                continue;
            };
            writeln!(f, "Gateway {}:", name)?;
            writeln!(f, "  Targets:")?;
            for (i, target) in gateway.targets.iter().enumerate() {
                writeln!(f, "    {:<2}        {}", i + 1, target)?;
            }
            write_overrides(f, gateway.copies, gateway.delay, &gateway.secret)?;
        }
        for host in &self.hosts {
            writeln!(f, "Host {}:", host.name)?;
            writeln!(f, "  {:<10}  {}", "MAC", host.mac)?;
            if let Some(name) = host.via.and_then(|id| self.gateway(id).name()) {
                writeln!(f, "  {:<10}  {}", "Gateway", name)?;
            }
            write_overrides(f, host.copies, host.delay, &host.secret)?;
        }
        for group in &self.groups {
            writeln!(f, "Hostgroup {}:", group.name)?;
            for (i, host) in group.hosts.iter().enumerate() {
                writeln!(f, "  {:2}\t{}", i + 1, self.host(*host).name)?;
            }
        }
        Ok(())
    }
}
