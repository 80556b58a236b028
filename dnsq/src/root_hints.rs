//! The standard IANA root server hints: NS records for the root zone
//! plus A/AAAA glue for each nameserver, used to seed a recursive
//! `Resolver`'s cache so it has somewhere to start walking the
//! hierarchy from.

use std::net::{Ipv4Addr, Ipv6Addr};

use dns_types::protocol::types::{DomainName, RecordClass, RecordTypeWithData, ResourceRecord};

const ROOT_SERVERS: &[(&str, Ipv4Addr, Ipv6Addr)] = &[
    ("a.root-servers.net.", Ipv4Addr::new(198, 41, 0, 4), Ipv6Addr::new(0x2001, 0x503, 0xba3e, 0, 0, 0, 0x2, 0x30)),
    ("b.root-servers.net.", Ipv4Addr::new(170, 247, 170, 2), Ipv6Addr::new(0x2801, 0x1b8, 0x10, 0, 0, 0, 0, 0xb)),
    ("c.root-servers.net.", Ipv4Addr::new(192, 33, 4, 12), Ipv6Addr::new(0x2001, 0x500, 0x2, 0, 0, 0, 0, 0xc)),
    ("d.root-servers.net.", Ipv4Addr::new(199, 7, 91, 13), Ipv6Addr::new(0x2001, 0x500, 0x2d, 0, 0, 0, 0, 0xd)),
    ("e.root-servers.net.", Ipv4Addr::new(192, 203, 230, 10), Ipv6Addr::new(0x2001, 0x500, 0xa8, 0, 0, 0, 0, 0xe)),
    ("f.root-servers.net.", Ipv4Addr::new(192, 5, 5, 241), Ipv6Addr::new(0x2001, 0x500, 0x2f, 0, 0, 0, 0, 0xf)),
    ("g.root-servers.net.", Ipv4Addr::new(192, 112, 36, 4), Ipv6Addr::new(0x2001, 0x500, 0x12, 0, 0, 0, 0, 0xd0d)),
    ("h.root-servers.net.", Ipv4Addr::new(198, 97, 190, 53), Ipv6Addr::new(0x2001, 0x500, 0x1, 0, 0, 0, 0, 0x53)),
    ("i.root-servers.net.", Ipv4Addr::new(192, 36, 148, 17), Ipv6Addr::new(0x2001, 0x7fe, 0, 0, 0, 0, 0, 0x53)),
    ("j.root-servers.net.", Ipv4Addr::new(192, 58, 128, 30), Ipv6Addr::new(0x2001, 0x503, 0xc27, 0, 0, 0, 0x2, 0x30)),
    ("k.root-servers.net.", Ipv4Addr::new(193, 0, 14, 129), Ipv6Addr::new(0x2001, 0x7fd, 0, 0, 0, 0, 0, 0x1)),
    ("l.root-servers.net.", Ipv4Addr::new(199, 7, 83, 42), Ipv6Addr::new(0x2001, 0x500, 0x9f, 0, 0, 0, 0, 0x42)),
    ("m.root-servers.net.", Ipv4Addr::new(202, 12, 27, 33), Ipv6Addr::new(0x2001, 0xdc3, 0, 0, 0, 0, 0, 0x35)),
];

/// Build the NS + glue records for the root zone.
pub fn root_hints() -> Vec<ResourceRecord> {
    let root = DomainName::root_domain();
    let mut rrs = Vec::with_capacity(ROOT_SERVERS.len() * 3);

    for (host, v4, v6) in ROOT_SERVERS {
        let nsdname = DomainName::from_dotted_string(host).expect("root hint hostname is valid");

        rrs.push(ResourceRecord {
            name: root.clone(),
            rtype_with_data: RecordTypeWithData::NS {
                nsdname: nsdname.clone(),
            },
            rclass: RecordClass::IN,
            ttl: u32::MAX,
        });
        rrs.push(ResourceRecord {
            name: nsdname.clone(),
            rtype_with_data: RecordTypeWithData::A { address: *v4 },
            rclass: RecordClass::IN,
            ttl: u32::MAX,
        });
        rrs.push(ResourceRecord {
            name: nsdname,
            rtype_with_data: RecordTypeWithData::AAAA { address: *v6 },
            rclass: RecordClass::IN,
            ttl: u32::MAX,
        });
    }

    rrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_hints_has_thirteen_servers() {
        let rrs = root_hints();
        let ns_count = rrs
            .iter()
            .filter(|rr| matches!(rr.rtype_with_data, RecordTypeWithData::NS { .. }))
            .count();
        assert_eq!(ns_count, 13);
    }
}
