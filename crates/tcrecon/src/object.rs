//! The TC object model: a `(msg, attribute)` pair identifying one kernel
//! qdisc, class, or filter.

use serde::{Deserialize, Serialize};

use crate::attribute::AttributePayload;
use crate::handle;

/// Unspecified address family, used on every message this controller sends.
pub const AF_UNSPEC: u8 = 0;

/// One qdisc, class, or filter, as the kernel and this controller both see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcObject {
    #[serde(default = "default_family", skip_serializing_if = "is_default_family")]
    pub family: u8,
    pub ifindex: i32,
    #[serde(with = "handle_codec")]
    pub handle: u32,
    #[serde(with = "handle_codec", default = "root_handle", skip_serializing_if = "is_root")]
    pub parent: u32,
    #[serde(default)]
    pub info: u32,
    pub payload: AttributePayload,
}

fn default_family() -> u8 {
    AF_UNSPEC
}

fn is_default_family(f: &u8) -> bool {
    *f == AF_UNSPEC
}

fn root_handle() -> u32 {
    handle::ROOT
}

fn is_root(h: &u32) -> bool {
    *h == handle::ROOT
}

mod handle_codec {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::handle;

    pub fn serialize<S: Serializer>(h: &u32, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&handle::format(*h))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        let s = String::deserialize(d)?;
        handle::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl TcObject {
    pub fn new(ifindex: i32, handle: u32, parent: u32, payload: AttributePayload) -> Self {
        Self {
            family: AF_UNSPEC,
            ifindex,
            handle,
            parent,
            info: 0,
            payload,
        }
    }

    /// Pack a filter's `tcm_info` field from protocol and priority: the
    /// kernel reads protocol from the upper 16 bits and priority from the
    /// lower 16 (`tcm_info = (protocol << 16) | priority`).
    pub fn with_filter_info(mut self, protocol: u16, priority: u16) -> Self {
        self.info = ((protocol as u32) << 16) | priority as u32;
        self
    }

    pub fn protocol(&self) -> u16 {
        (self.info >> 16) as u16
    }

    pub fn priority(&self) -> u16 {
        (self.info & 0xFFFF) as u16
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind_str()
    }

    /// Identity equality: `ifindex`, `handle`, and `parent` all match.
    pub fn identity_eq(&self, other: &Self) -> bool {
        self.ifindex == other.ifindex && self.handle == other.handle && self.parent == other.parent
    }

    /// Semantic equality per the controller's documented resolution: identity
    /// equality, plus kind-specific payload equality (the stricter HFSC rule
    /// lives inside `AttributePayload::semantically_eq`).
    pub fn semantically_eq(&self, other: &Self) -> bool {
        self.identity_eq(other) && self.payload.semantically_eq(&other.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{FqCodelOpts, HfscClassOpts, ServiceCurve};

    fn fq_codel(ifindex: i32, h: u32, parent: u32) -> TcObject {
        TcObject::new(ifindex, h, parent, AttributePayload::FqCodel(FqCodelOpts::default()))
    }

    #[test]
    fn filter_info_packs_protocol_in_upper_half() {
        let obj = fq_codel(1, 0x10000, handle::ROOT).with_filter_info(0x0800, 10);
        assert_eq!(obj.protocol(), 0x0800);
        assert_eq!(obj.priority(), 10);
        assert_eq!(obj.info, 0x0800_000A);
    }

    #[test]
    fn identity_eq_ignores_payload() {
        let a = fq_codel(1, 0x10000, handle::ROOT);
        let mut b = a.clone();
        b.payload = AttributePayload::HfscClass(HfscClassOpts::default());
        assert!(a.identity_eq(&b));
        assert!(!a.semantically_eq(&b));
    }

    #[test]
    fn hfsc_class_semantic_equality_is_strict() {
        let with_curve = TcObject::new(
            1,
            0x10001,
            0x10000,
            AttributePayload::HfscClass(HfscClassOpts {
                rsc: Some(ServiceCurve { m1: 1, d: 0, m2: 1 }),
                ..Default::default()
            }),
        );
        let without_curve = TcObject::new(1, 0x10001, 0x10000, AttributePayload::HfscClass(HfscClassOpts::default()));
        assert!(!with_curve.semantically_eq(&without_curve));
    }

    #[test]
    fn handle_serializes_as_canonical_hex() {
        let obj = fq_codel(1, 0x00010000, handle::ROOT);
        let json = serde_json::to_value(&obj).unwrap();
        assert_eq!(json["handle"], "1:0");
        assert!(json.get("parent").is_none());
    }
}
