use ipnet::Ipv4Net;
use log::debug;
use pnet::datalink;
use pnet::ipnetwork::IpNetwork;

/// Looks up the first IPv4 address (with its prefix) assigned to the
/// interface called `name`.
pub fn lookup_ipv4(name: &str) -> Option<Ipv4Net> {
    let iface = datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)?;

    iface.ips.iter().find_map(|ip| match ip {
        IpNetwork::V4(v4) => {
            let net = Ipv4Net::new(v4.ip(), v4.prefix()).ok()?;
            debug!("Found address {} on interface {}", net, name);
            Some(net)
        }
        IpNetwork::V6(_) => None,
    })
}

/// Names of the interfaces that are up, not loopback and carry IPv4.
pub fn ipv4_interfaces() -> Vec<String> {
    datalink::interfaces()
        .into_iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback())
        .filter(|iface| iface.ips.iter().any(IpNetwork::is_ipv4))
        .map(|iface| iface.name)
        .collect()
}
