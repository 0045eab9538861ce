//! End-to-end scenarios over the tree/reconcile/attribute-builder pipeline,
//! built entirely against in-memory `Node`/`TcObject` values. The rtnetlink
//! client is a recording fake; no real socket or network namespace involved.

use std::sync::Mutex;

use tcrecon::attribute::{AttributePayload, FqCodelOpts, HfscClassOpts, HfscQdiscOpts, MarkMatch, ServiceCurve, U32Opts};
use tcrecon::handle;
use tcrecon::http::TcObjectJson;
use tcrecon::node::{Node, NodeType, compose};
use tcrecon::object::TcObject;
use tcrecon::reconcile::{ReconcileClient, reconcile_filters, reconcile_tree};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Replace(NodeType, u32),
    Delete(NodeType, u32),
}

#[derive(Default)]
struct RecordingClient {
    calls: Mutex<Vec<Call>>,
}

impl ReconcileClient for RecordingClient {
    async fn replace(&self, node_type: NodeType, object: &TcObject) -> tcrecon::netlink::error::Result<()> {
        self.calls.lock().unwrap().push(Call::Replace(node_type, object.handle));
        Ok(())
    }

    async fn delete(&self, node_type: NodeType, object: &TcObject) -> tcrecon::netlink::error::Result<()> {
        self.calls.lock().unwrap().push(Call::Delete(node_type, object.handle));
        Ok(())
    }
}

fn hfsc_qdisc(name: &str, h: u32, parent: u32) -> Node {
    Node::new(name, NodeType::Qdisc, TcObject::new(1, h, parent, AttributePayload::HfscQdisc(HfscQdiscOpts { defcls: 2 })))
}

fn hfsc_class(name: &str, h: u32, parent: u32, rsc: Option<ServiceCurve>, fsc: Option<ServiceCurve>) -> Node {
    Node::new(
        name,
        NodeType::Class,
        TcObject::new(1, h, parent, AttributePayload::HfscClass(HfscClassOpts { rsc, fsc, ..Default::default() })),
    )
}

fn fq_codel(name: &str, h: u32, parent: u32) -> Node {
    Node::new(name, NodeType::Qdisc, TcObject::new(1, h, parent, AttributePayload::FqCodel(FqCodelOpts::default())))
}

/// Builds the tree used by scenarios 3, 4, and 6: root hfsc qdisc `1:0`,
/// class `1:1` sc=(1e9,0,1e9) under it, class `1:2` ls=(m1, 60_000us, 0)
/// under `1:1`, and a leaf fq_codel qdisc `22:0` under `1:2`.
fn scenario_tree(class_1_2_m1: u32) -> Node {
    let mut root = hfsc_qdisc("root", 0x0001_0000, handle::ROOT);
    let mut class_1_1 = hfsc_class(
        "class-1-1",
        0x0001_0001,
        0x0001_0000,
        None,
        Some(ServiceCurve { m1: 1_000_000_000, d: 0, m2: 1_000_000_000 }),
    );
    let mut class_1_2 = hfsc_class(
        "class-1-2",
        0x0001_0002,
        0x0001_0001,
        Some(ServiceCurve { m1: class_1_2_m1, d: 60_000, m2: 0 }),
        None,
    );
    class_1_2.add_child(fq_codel("leaf", 0x0022_0000, 0x0001_0002));
    class_1_1.add_child(class_1_2);
    root.add_child(class_1_1);
    root
}

#[test]
fn scenario_1_handle_codec() {
    let inputs = ["root", "1:0", "1:1", "ffff:0", "0:ffff"];
    let expected = [handle::ROOT, 0x0001_0000, 0x0001_0001, 0xFFFF_0000, 0x0000_FFFF];
    for (s, want) in inputs.iter().zip(expected.iter()) {
        assert_eq!(handle::parse(s).unwrap(), *want, "parsing {s}");
    }
}

#[tokio::test]
async fn scenario_2_single_qdisc_apply_to_empty_kernel() {
    let desired = hfsc_qdisc("root", 0x0001_0000, handle::ROOT);
    let client = RecordingClient::default();

    let report = reconcile_tree(&desired, None, &client).await.unwrap();
    assert_eq!(report.ops.len(), 1);

    let calls = client.calls.lock().unwrap();
    assert_eq!(*calls, vec![Call::Replace(NodeType::Qdisc, 0x0001_0000)]);
}

#[tokio::test]
async fn scenario_3_class_hierarchy_apply_then_idempotent_second_pass() {
    let desired = scenario_tree(400_000_000);
    let client = RecordingClient::default();

    let report = reconcile_tree(&desired, None, &client).await.unwrap();
    assert_eq!(report.ops.len(), 4);
    {
        let calls = client.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                Call::Replace(NodeType::Qdisc, 0x0001_0000),
                Call::Replace(NodeType::Class, 0x0001_0001),
                Call::Replace(NodeType::Class, 0x0001_0002),
                Call::Replace(NodeType::Qdisc, 0x0022_0000),
            ]
        );
    }

    // Second pass against the now-identical live tree emits nothing.
    client.calls.lock().unwrap().clear();
    let second = reconcile_tree(&desired, Some(&desired), &client).await.unwrap();
    assert!(second.ops.is_empty());
    assert!(client.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn scenario_4_tree_divergence_resets_and_reapplies() {
    let desired = scenario_tree(400_000_000);
    let live = scenario_tree(300_000_000);
    let client = RecordingClient::default();

    let report = reconcile_tree(&desired, Some(&live), &client).await.unwrap();
    assert_eq!(report.ops.len(), 8); // 4 deletes + 4 replaces

    let calls = client.calls.lock().unwrap();
    assert_eq!(
        *calls,
        vec![
            Call::Delete(NodeType::Qdisc, 0x0022_0000),
            Call::Delete(NodeType::Class, 0x0001_0002),
            Call::Delete(NodeType::Class, 0x0001_0001),
            Call::Delete(NodeType::Qdisc, 0x0001_0000),
            Call::Replace(NodeType::Qdisc, 0x0001_0000),
            Call::Replace(NodeType::Class, 0x0001_0001),
            Call::Replace(NodeType::Class, 0x0001_0002),
            Call::Replace(NodeType::Qdisc, 0x0022_0000),
        ]
    );
}

#[tokio::test]
async fn scenario_5_filter_apply() {
    let filter = Node::new(
        "mark-filter",
        NodeType::Filter,
        TcObject::new(
            1,
            0,
            0x0001_0000,
            AttributePayload::U32(U32Opts {
                classid: Some(0x0001_0001),
                mark: Some(MarkMatch { value: 0x2, mask: 0xf }),
                ..Default::default()
            }),
        ),
    );
    let client = RecordingClient::default();

    let report = reconcile_filters(std::slice::from_ref(&filter), &client).await.unwrap();
    assert_eq!(report.ops.len(), 1);
    assert!(!report.has_failures());

    let calls = client.calls.lock().unwrap();
    assert_eq!(*calls, vec![Call::Replace(NodeType::Filter, 0)]);
}

#[test]
fn scenario_6_http_list_shape_matches_the_applied_tree() {
    let tree = scenario_tree(400_000_000);
    let mut flat = Vec::new();
    tree.walk_pre_order(&mut flat);

    // Confirm composing the flat dump back into a tree recovers the original
    // shape before translating to the wire representation the HTTP surface
    // would serve for `GET /api/v1/tc/eth0`.
    let nodes: Vec<Node> = flat
        .iter()
        .map(|n| Node::new(n.name.clone(), n.node_type, n.object.clone()))
        .collect();
    let (composed, leftovers) = compose(nodes).unwrap();
    assert!(leftovers.is_empty());

    let mut recomposed = Vec::new();
    composed.walk_pre_order(&mut recomposed);

    let json: Vec<TcObjectJson> = recomposed
        .iter()
        .map(|n| serde_json::from_value(serde_json::json!({
            "type": match n.node_type {
                NodeType::Qdisc => "qdisc",
                NodeType::Class => "class",
                NodeType::Filter => "filter",
            },
            "interface": "eth0",
            "handle": handle::format(n.object.handle),
            "attr": serde_json::to_value(&n.object.payload).unwrap(),
        }))
        .unwrap())
        .collect();

    let handles: Vec<String> = json.iter().map(|j| handle::format(j.handle)).collect();
    assert_eq!(handles.len(), 4);
    for want in ["1:0", "1:1", "1:2", "22:0"] {
        assert!(handles.contains(&want.to_string()), "missing handle {want} in {handles:?}");
    }
}
