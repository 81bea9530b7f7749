//! The 13 root nameservers, the starting point of every iterative walk.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootServer {
    pub name: &'static str,
    pub ipv4: Ipv4Addr,
    pub ipv6: Ipv6Addr,
}

pub const ROOT_SERVERS: [RootServer; 13] = [
    RootServer {
        name: "a.root-servers.net",
        ipv4: Ipv4Addr::new(198, 41, 0, 4),
        ipv6: Ipv6Addr::new(0x2001, 0x0503, 0xba3e, 0, 0, 0, 0x0002, 0x0030),
    },
    RootServer {
        name: "b.root-servers.net",
        ipv4: Ipv4Addr::new(170, 247, 170, 2),
        ipv6: Ipv6Addr::new(0x2801, 0x01b8, 0x0010, 0, 0, 0, 0, 0x000b),
    },
    RootServer {
        name: "c.root-servers.net",
        ipv4: Ipv4Addr::new(192, 33, 4, 12),
        ipv6: Ipv6Addr::new(0x2001, 0x0500, 0x0002, 0, 0, 0, 0, 0x000c),
    },
    RootServer {
        name: "d.root-servers.net",
        ipv4: Ipv4Addr::new(199, 7, 91, 13),
        ipv6: Ipv6Addr::new(0x2001, 0x0500, 0x002d, 0, 0, 0, 0, 0x000d),
    },
    RootServer {
        name: "e.root-servers.net",
        ipv4: Ipv4Addr::new(192, 203, 230, 10),
        ipv6: Ipv6Addr::new(0x2001, 0x0500, 0x00a8, 0, 0, 0, 0, 0x000e),
    },
    RootServer {
        name: "f.root-servers.net",
        ipv4: Ipv4Addr::new(192, 5, 5, 241),
        ipv6: Ipv6Addr::new(0x2001, 0x0500, 0x002f, 0, 0, 0, 0, 0x000f),
    },
    RootServer {
        name: "g.root-servers.net",
        ipv4: Ipv4Addr::new(192, 112, 36, 4),
        ipv6: Ipv6Addr::new(0x2001, 0x0500, 0x0012, 0, 0, 0, 0, 0x0d0d),
    },
    RootServer {
        name: "h.root-servers.net",
        ipv4: Ipv4Addr::new(198, 97, 190, 53),
        ipv6: Ipv6Addr::new(0x2001, 0x0500, 0x0001, 0, 0, 0, 0, 0x0053),
    },
    RootServer {
        name: "i.root-servers.net",
        ipv4: Ipv4Addr::new(192, 36, 148, 17),
        ipv6: Ipv6Addr::new(0x2001, 0x07fe, 0, 0, 0, 0, 0, 0x0053),
    },
    RootServer {
        name: "j.root-servers.net",
        ipv4: Ipv4Addr::new(192, 58, 128, 30),
        ipv6: Ipv6Addr::new(0x2001, 0x0503, 0x0c27, 0, 0, 0, 0x0002, 0x0030),
    },
    RootServer {
        name: "k.root-servers.net",
        ipv4: Ipv4Addr::new(193, 0, 14, 129),
        ipv6: Ipv6Addr::new(0x2001, 0x07fd, 0, 0, 0, 0, 0, 0x0001),
    },
    RootServer {
        name: "l.root-servers.net",
        ipv4: Ipv4Addr::new(199, 7, 83, 42),
        ipv6: Ipv6Addr::new(0x2001, 0x0500, 0x009f, 0, 0, 0, 0, 0x0042),
    },
    RootServer {
        name: "m.root-servers.net",
        ipv4: Ipv4Addr::new(202, 12, 27, 33),
        ipv6: Ipv6Addr::new(0x2001, 0x0dc3, 0, 0, 0, 0, 0, 0x0035),
    },
];

/// IPv4 addresses of all roots, in catalogue order.
pub fn all_ipv4() -> Vec<Ipv4Addr> {
    ROOT_SERVERS.iter().map(|s| s.ipv4).collect()
}

pub fn lookup_by_name(name: &str) -> Option<&'static RootServer> {
    ROOT_SERVERS
        .iter()
        .find(|s| s.name.eq_ignore_ascii_case(name.trim_end_matches('.')))
}

pub fn lookup_by_ip(ip: IpAddr) -> Option<&'static RootServer> {
    ROOT_SERVERS
        .iter()
        .find(|s| IpAddr::V4(s.ipv4) == ip || IpAddr::V6(s.ipv6) == ip)
}

pub fn first() -> &'static RootServer {
    &ROOT_SERVERS[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thirteen_roots() {
        assert_eq!(ROOT_SERVERS.len(), 13);
        assert_eq!(first().name, "a.root-servers.net");
        assert_eq!(all_ipv4().len(), 13);
    }

    #[test]
    fn test_lookup_by_name() {
        let root = lookup_by_name("M.Root-Servers.NET").unwrap();
        assert_eq!(root.ipv4, Ipv4Addr::new(202, 12, 27, 33));
        assert!(lookup_by_name("not-a-root.example.com").is_none());
    }

    #[test]
    fn test_lookup_by_ip() {
        let root = lookup_by_ip(IpAddr::V4(Ipv4Addr::new(193, 0, 14, 129))).unwrap();
        assert_eq!(root.name, "k.root-servers.net");
        let root = lookup_by_ip("2001:7fd::1".parse().unwrap()).unwrap();
        assert_eq!(root.name, "k.root-servers.net");
        assert!(lookup_by_ip(IpAddr::V4(Ipv4Addr::LOCALHOST)).is_none());
    }
}
