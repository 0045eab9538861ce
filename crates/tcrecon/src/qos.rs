//! QoS templates: pure functions from `(ifindex, interface_speed, internet_speed)`
//! to a concrete qdisc/class/filter tree. Policy is fixed; only the two input
//! speeds are customizable (see the controller's documented non-goals).

use crate::attribute::{AttributePayload, FqCodelOpts, FwOpts, HfscClassOpts, HfscQdiscOpts, MarkMatch, ServiceCurve, U32Opts, U32Sel};
use crate::handle;
use crate::node::{Node, NodeType};
use crate::object::TcObject;

fn qdisc(ifindex: i32, name: &str, h: u32, parent: u32, payload: AttributePayload) -> Node {
    Node::new(name, NodeType::Qdisc, TcObject::new(ifindex, h, parent, payload))
}

fn class(ifindex: i32, name: &str, h: u32, parent: u32, payload: AttributePayload) -> Node {
    Node::new(name, NodeType::Class, TcObject::new(ifindex, h, parent, payload))
}

fn filter_mark(ifindex: i32, name: &str, h: u32, parent: u32, classid: u32, mark: u32) -> Node {
    let payload = AttributePayload::U32(U32Opts {
        classid: Some(classid),
        sel: Some(U32Sel),
        mark: Some(MarkMatch { value: mark, mask: 0xf }),
        police: None,
        actions: None,
    });
    Node::new(name, NodeType::Filter, TcObject::new(ifindex, h, parent, payload))
}

fn fq_codel_leaf(ifindex: i32, name: &str, h: u32) -> Node {
    qdisc(ifindex, name, h, handle::ROOT, AttributePayload::FqCodel(FqCodelOpts::default()))
}

fn sc(rate_bps: f64) -> ServiceCurve {
    ServiceCurve { m1: rate_bps as u32, d: 0, m2: rate_bps as u32 }
}

fn sc_with_delay(rate_bps: f64, delay_us: u32) -> ServiceCurve {
    ServiceCurve { m1: rate_bps as u32, d: delay_us, m2: rate_bps as u32 }
}

/// Root qdisc `1:0`, `interface`/`internet` throughput classes, three
/// priority bands, and firewall-mark filters routing marked traffic into them.
pub fn simple(ifindex: i32, interface_speed_bps: f64, internet_speed_bps: f64) -> (Node, Vec<Node>) {
    let mut root = qdisc(ifindex, "root", 0x0001_0000, handle::ROOT, AttributePayload::HfscQdisc(HfscQdiscOpts { defcls: 2 }));

    let mut iface_class = class(
        ifindex,
        "interface",
        0x0001_0001,
        0x0001_0000,
        AttributePayload::HfscClass(HfscClassOpts { fsc: Some(sc(interface_speed_bps)), ..Default::default() }),
    );

    let mut internet_class = class(
        ifindex,
        "internet",
        0x0001_0002,
        0x0001_0001,
        AttributePayload::HfscClass(HfscClassOpts { fsc: Some(sc(internet_speed_bps)), ..Default::default() }),
    );

    let budget = internet_speed_bps * 0.95;
    let mut prio = class(
        ifindex,
        "prio",
        0x0001_0021,
        0x0001_0002,
        AttributePayload::HfscClass(HfscClassOpts { rsc: Some(sc(budget * 0.4)), fsc: Some(sc(budget * 0.4)), ..Default::default() }),
    );
    let mut normal = class(
        ifindex,
        "normal",
        0x0001_0022,
        0x0001_0002,
        AttributePayload::HfscClass(HfscClassOpts {
            rsc: Some(sc_with_delay(budget * 0.4, 60_000)),
            fsc: Some(sc_with_delay(budget * 0.4, 60_000)),
            ..Default::default()
        }),
    );
    let mut low = class(
        ifindex,
        "low",
        0x0001_0023,
        0x0001_0002,
        AttributePayload::HfscClass(HfscClassOpts {
            rsc: Some(sc_with_delay(budget * 0.2, 120_000)),
            fsc: Some(sc_with_delay(budget * 0.2, 120_000)),
            ..Default::default()
        }),
    );

    prio.add_child(fq_codel_leaf(ifindex, "prio-leaf", 0x0021_0000));
    normal.add_child(fq_codel_leaf(ifindex, "normal-leaf", 0x0022_0000));
    low.add_child(fq_codel_leaf(ifindex, "low-leaf", 0x0023_0000));

    internet_class.add_child(prio);
    internet_class.add_child(normal);
    internet_class.add_child(low);
    iface_class.add_child(internet_class);
    root.add_child(iface_class);

    let filters = vec![
        filter_mark(ifindex, "mark-prio", 0, 0x0001_0000, 0x0001_0021, 1),
        filter_mark(ifindex, "mark-normal", 0, 0x0001_0000, 0x0001_0022, 2),
        filter_mark(ifindex, "mark-low", 0, 0x0001_0000, 0x0001_0023, 3),
    ];

    (root, filters)
}

/// `simple`'s shape extended with two priority bands, a further-split
/// `other` branch (`http` → browse/download, plus `crew` and `thrash`), and
/// a `reserved` branch identified by `InDev` rather than a firewall mark.
pub fn lan_party(ifindex: i32, interface: &str, interface_speed_bps: f64, internet_speed_bps: f64) -> (Node, Vec<Node>) {
    let mut root = qdisc(ifindex, "root", 0x0001_0000, handle::ROOT, AttributePayload::HfscQdisc(HfscQdiscOpts { defcls: 2 }));

    let mut iface_class = class(
        ifindex,
        "interface",
        0x0001_0001,
        0x0001_0000,
        AttributePayload::HfscClass(HfscClassOpts { fsc: Some(sc(interface_speed_bps)), ..Default::default() }),
    );

    let mut internet_class = class(
        ifindex,
        "internet",
        0x0001_0002,
        0x0001_0001,
        AttributePayload::HfscClass(HfscClassOpts { fsc: Some(sc(internet_speed_bps)), ..Default::default() }),
    );

    let budget = internet_speed_bps * 0.95;

    let mut prio1 = class(
        ifindex,
        "prio1",
        0x0001_0021,
        0x0001_0002,
        AttributePayload::HfscClass(HfscClassOpts { rsc: Some(sc(budget * 0.4)), fsc: Some(sc(budget * 0.4)), ..Default::default() }),
    );
    let mut prio2 = class(
        ifindex,
        "prio2",
        0x0001_0022,
        0x0001_0002,
        AttributePayload::HfscClass(HfscClassOpts { rsc: Some(sc(budget * 0.4)), fsc: Some(sc(budget * 0.4)), ..Default::default() }),
    );
    let mut other = class(
        ifindex,
        "other",
        0x0001_0023,
        0x0001_0002,
        AttributePayload::HfscClass(HfscClassOpts { rsc: Some(sc(budget * 0.2)), fsc: Some(sc(budget * 0.2)), ..Default::default() }),
    );

    let other_budget = budget * 0.2;
    let mut http = class(
        ifindex,
        "http",
        0x0001_0031,
        0x0001_0023,
        AttributePayload::HfscClass(HfscClassOpts { fsc: Some(sc(other_budget * 0.7)), ..Default::default() }),
    );
    let thrash = class(
        ifindex,
        "thrash",
        0x0001_0032,
        0x0001_0023,
        AttributePayload::HfscClass(HfscClassOpts { fsc: Some(sc(other_budget * 0.1)), ..Default::default() }),
    );
    let crew = class(
        ifindex,
        "crew",
        0x0001_0033,
        0x0001_0023,
        AttributePayload::HfscClass(HfscClassOpts { fsc: Some(sc(other_budget * 0.2)), ..Default::default() }),
    );

    let browse = class(
        ifindex,
        "browse",
        0x0001_0041,
        0x0001_0031,
        AttributePayload::HfscClass(HfscClassOpts { fsc: Some(sc(other_budget * 0.7 * 0.7)), ..Default::default() }),
    );
    let download = class(
        ifindex,
        "download",
        0x0001_0042,
        0x0001_0031,
        AttributePayload::HfscClass(HfscClassOpts { fsc: Some(sc(other_budget * 0.7 * 0.3)), ..Default::default() }),
    );
    http.add_child(browse);
    http.add_child(download);

    other.add_child(http);
    other.add_child(thrash);
    other.add_child(crew);

    prio1.add_child(fq_codel_leaf(ifindex, "prio1-leaf", 0x0021_0000));
    prio2.add_child(fq_codel_leaf(ifindex, "prio2-leaf", 0x0022_0000));

    internet_class.add_child(prio1);
    internet_class.add_child(prio2);
    internet_class.add_child(other);
    iface_class.add_child(internet_class);

    let reserved = class(
        ifindex,
        "reserved",
        0x0001_0003,
        0x0001_0001,
        AttributePayload::HfscClass(HfscClassOpts { fsc: Some(sc(interface_speed_bps * 0.2)), ..Default::default() }),
    );
    iface_class.add_child(reserved);

    root.add_child(iface_class);

    let filters = vec![
        filter_mark(ifindex, "mark-prio1", 0, 0x0001_0000, 0x0001_0021, 1),
        filter_mark(ifindex, "mark-prio2", 0, 0x0001_0000, 0x0001_0022, 2),
        Node::new(
            "reserved-indev",
            NodeType::Filter,
            TcObject::new(
                ifindex,
                0,
                0x0001_0000,
                AttributePayload::Fw(FwOpts {
                    classid: Some(0x0001_0003),
                    mask: None,
                    indev: Some(interface.to_string()),
                    police: None,
                }),
            ),
        ),
    ];

    (root, filters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_builds_single_rooted_tree_with_three_filters() {
        let (tree, filters) = simple(1, 1_000_000_000.0, 100_000_000.0);
        assert_eq!(tree.object.handle, 0x0001_0000);
        assert_eq!(filters.len(), 3);
        let mut out = Vec::new();
        tree.walk_pre_order(&mut out);
        assert_eq!(out.len(), 1 + 1 + 1 + 3 + 3); // root, interface, internet, 3 prio classes, 3 leaf qdiscs
    }

    #[test]
    fn lan_party_reserved_branch_is_sibling_of_internet() {
        let (tree, filters) = lan_party(2, "eth0", 1_000_000_000.0, 200_000_000.0);
        let iface = &tree.children[0];
        assert_eq!(iface.name, "interface");
        let sibling_names: Vec<_> = iface.children.iter().map(|c| c.name.as_str()).collect();
        assert!(sibling_names.contains(&"internet"));
        assert!(sibling_names.contains(&"reserved"));
        assert!(filters.iter().any(|f| f.name == "reserved-indev"));
    }
}
