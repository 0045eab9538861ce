//! Reconciliation engine: diffs a desired tree against the kernel's live
//! tree and drives the kernel into conformance via the minimal sequence of
//! replace/delete operations.

use crate::attribute::{AttributePayload, FqCodelOpts};
use crate::netlink::error::{Error, Result};
use crate::node::{Node, NodeType, compare_tree};
use crate::object::TcObject;

/// What the reconcile engine needs from the rtnetlink layer. Kept as a trait
/// so the engine's ordering and retry logic can be exercised against an
/// in-memory recording fake instead of a real netlink socket.
pub trait ReconcileClient {
    async fn replace(&self, node_type: NodeType, object: &TcObject) -> Result<()>;
    async fn delete(&self, node_type: NodeType, object: &TcObject) -> Result<()>;
}

/// One operation the engine performed or attempted, kept for observability
/// and for tests asserting on the exact call sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOp {
    Replaced { node_type: NodeType, handle: u32 },
    Deleted { node_type: NodeType, handle: u32 },
    DeletedAfterQdiscClean { node_type: NodeType, handle: u32 },
    Failed { node_type: NodeType, handle: u32, error: String },
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub ops: Vec<ReconcileOp>,
}

impl ReconcileReport {
    pub fn has_failures(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, ReconcileOp::Failed { .. }))
    }
}

/// Reconcile the qdisc/class tree. `live` is `None` when the kernel has
/// nothing under the interface's root yet.
pub async fn reconcile_tree(desired: &Node, live: Option<&Node>, client: &impl ReconcileClient) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    match live {
        None => {
            replace_pre_order(desired, client, &mut report).await?;
        }
        Some(live) if compare_tree(desired, live) => {
            // Already converged; nothing to do.
        }
        Some(live) => {
            delete_post_order(live, client, &mut report).await?;
            replace_pre_order(desired, client, &mut report).await?;
        }
    }

    Ok(report)
}

/// Reconcile the flat filter list: every desired filter is unconditionally
/// replaced (netlink `Replace` upserts, so this also covers the "changed
/// attributes" case without a separate diff).
pub async fn reconcile_filters(desired: &[Node], client: &impl ReconcileClient) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    for filter in desired {
        match client.replace(NodeType::Filter, &filter.object).await {
            Ok(()) => report.ops.push(ReconcileOp::Replaced {
                node_type: NodeType::Filter,
                handle: filter.object.handle,
            }),
            Err(e) => report.ops.push(ReconcileOp::Failed {
                node_type: NodeType::Filter,
                handle: filter.object.handle,
                error: e.to_string(),
            }),
        }
    }
    Ok(report)
}

async fn replace_pre_order(node: &Node, client: &impl ReconcileClient, report: &mut ReconcileReport) -> Result<()> {
    client
        .replace(node.node_type, &node.object)
        .await
        .map_err(|e| e.with_context(format!("replace {} {}", node.node_type_str(), node.name)))?;
    report.ops.push(ReconcileOp::Replaced {
        node_type: node.node_type,
        handle: node.object.handle,
    });
    for child in &node.children {
        Box::pin(replace_pre_order(child, client, report)).await?;
    }
    Ok(())
}

async fn delete_post_order(node: &Node, client: &impl ReconcileClient, report: &mut ReconcileReport) -> Result<()> {
    for child in &node.children {
        Box::pin(delete_post_order(child, client, report)).await?;
    }

    match client.delete(node.node_type, &node.object).await {
        Ok(()) => {
            report.ops.push(ReconcileOp::Deleted {
                node_type: node.node_type,
                handle: node.object.handle,
            });
            Ok(())
        }
        Err(e) if node.node_type == NodeType::Class && e.is_busy() => {
            // A class delete can fail with EBUSY when the kernel auto-created
            // a default qdisc under it. Speculatively delete that qdisc
            // (identified only by its parent handle; the kernel resolves it
            // regardless of the qdisc's own handle) and retry once.
            let synthetic_qdisc = TcObject::new(
                node.object.ifindex,
                0,
                node.object.handle,
                AttributePayload::FqCodel(FqCodelOpts::default()),
            );
            let _ = client.delete(NodeType::Qdisc, &synthetic_qdisc).await;

            match client.delete(node.node_type, &node.object).await {
                Ok(()) => {
                    report.ops.push(ReconcileOp::DeletedAfterQdiscClean {
                        node_type: node.node_type,
                        handle: node.object.handle,
                    });
                    Ok(())
                }
                Err(retry_err) => {
                    report.ops.push(ReconcileOp::Failed {
                        node_type: node.node_type,
                        handle: node.object.handle,
                        error: retry_err.to_string(),
                    });
                    Ok(())
                }
            }
        }
        Err(e) => Err(e.with_context(format!("delete {} {}", node.node_type_str(), node.name))),
    }
}

impl Node {
    fn node_type_str(&self) -> &'static str {
        match self.node_type {
            NodeType::Qdisc => "qdisc",
            NodeType::Class => "class",
            NodeType::Filter => "filter",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributePayload, FqCodelOpts, HfscClassOpts, HfscQdiscOpts, ServiceCurve};
    use crate::handle;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Replace(NodeType, u32),
        Delete(NodeType, u32),
    }

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<Call>>,
        busy_once: Mutex<Vec<u32>>,
    }

    impl ReconcileClient for RecordingClient {
        async fn replace(&self, node_type: NodeType, object: &TcObject) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Replace(node_type, object.handle));
            Ok(())
        }

        async fn delete(&self, node_type: NodeType, object: &TcObject) -> Result<()> {
            let mut busy = self.busy_once.lock().unwrap();
            if let Some(pos) = busy.iter().position(|h| *h == object.handle) {
                busy.remove(pos);
                return Err(Error::from_errno(-libc::EBUSY));
            }
            drop(busy);
            self.calls.lock().unwrap().push(Call::Delete(node_type, object.handle));
            Ok(())
        }
    }

    fn qdisc(name: &str, h: u32, parent: u32) -> Node {
        Node::new(
            name,
            NodeType::Qdisc,
            TcObject::new(1, h, parent, AttributePayload::HfscQdisc(HfscQdiscOpts { defcls: 2 })),
        )
    }

    fn class(name: &str, h: u32, parent: u32, m1: u32) -> Node {
        Node::new(
            name,
            NodeType::Class,
            TcObject::new(
                1,
                h,
                parent,
                AttributePayload::HfscClass(HfscClassOpts {
                    fsc: Some(ServiceCurve { m1, d: 0, m2: 0 }),
                    ..Default::default()
                }),
            ),
        )
    }

    #[tokio::test]
    async fn empty_live_tree_replaces_pre_order() {
        let mut root = qdisc("root", 0x10000, handle::ROOT);
        root.add_child(class("mid", 0x10001, 0x10000, 100));

        let client = RecordingClient::default();
        let report = reconcile_tree(&root, None, &client).await.unwrap();
        assert_eq!(report.ops.len(), 2);

        let calls = client.calls.lock().unwrap();
        assert_eq!(*calls, vec![Call::Replace(NodeType::Qdisc, 0x10000), Call::Replace(NodeType::Class, 0x10001)]);
    }

    #[tokio::test]
    async fn identical_trees_emit_nothing() {
        let root = qdisc("root", 0x10000, handle::ROOT);
        let client = RecordingClient::default();
        let report = reconcile_tree(&root, Some(&root), &client).await.unwrap();
        assert!(report.ops.is_empty());
    }

    #[tokio::test]
    async fn divergent_trees_delete_post_order_then_replace_pre_order() {
        let mut desired = qdisc("root", 0x10000, handle::ROOT);
        desired.add_child(class("mid", 0x10001, 0x10000, 300_000_000));

        let mut live = qdisc("root", 0x10000, handle::ROOT);
        live.add_child(class("mid", 0x10001, 0x10000, 100_000_000));

        let client = RecordingClient::default();
        let report = reconcile_tree(&desired, Some(&live), &client).await.unwrap();
        assert_eq!(report.ops.len(), 4);

        let calls = client.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                Call::Delete(NodeType::Class, 0x10001),
                Call::Delete(NodeType::Qdisc, 0x10000),
                Call::Replace(NodeType::Qdisc, 0x10000),
                Call::Replace(NodeType::Class, 0x10001),
            ]
        );
    }

    #[tokio::test]
    async fn class_delete_retries_after_busy_via_synthetic_qdisc_clean() {
        let live = class("mid", 0x10001, 0x10000, 100);
        let client = RecordingClient::default();
        client.busy_once.lock().unwrap().push(0x10001);

        let mut report = ReconcileReport::default();
        delete_post_order(&live, &client, &mut report).await.unwrap();

        assert_eq!(
            report.ops,
            vec![ReconcileOp::DeletedAfterQdiscClean {
                node_type: NodeType::Class,
                handle: 0x10001
            }]
        );
    }
}
