//! Strongly-typed attribute payloads for the TC kinds this controller supports.
//!
//! Each kind gets its own struct; [`AttributePayload`] is the tagged sum type
//! that ties a struct to the `kind` string sent over the wire. This mirrors
//! how the kernel's own `TCA_*` attribute spaces are disjoint per qdisc/filter
//! kind, and keeps each kind's option parsing local to one match arm instead
//! of behind a shared trait object.

use serde::{Deserialize, Serialize};

use crate::netlink::attr::{AttrIter, get};
use crate::netlink::builder::MessageBuilder;

/// An HFSC service curve: `(m1, d, m2)` in bits/sec and milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServiceCurve {
    pub m1: u32,
    pub d: u32,
    pub m2: u32,
}

mod tca {
    pub mod fq_codel {
        pub const TARGET: u16 = 1;
        pub const LIMIT: u16 = 2;
        pub const INTERVAL: u16 = 3;
        pub const ECN: u16 = 4;
        pub const FLOWS: u16 = 5;
        pub const QUANTUM: u16 = 6;
        pub const CE_THRESHOLD: u16 = 7;
        pub const DROP_BATCH_SIZE: u16 = 8;
        pub const MEMORY_LIMIT: u16 = 9;
    }
    pub mod hfsc_qdisc {
        pub const DEFCLS: u16 = 1;
    }
    pub mod hfsc_class {
        pub const RSC: u16 = 1;
        pub const FSC: u16 = 2;
        pub const USC: u16 = 3;
    }
    pub mod u32 {
        pub const CLASSID: u16 = 1;
        pub const SEL: u16 = 4;
        pub const POLICE: u16 = 5;
        pub const ACT: u16 = 6;
        pub const MARK: u16 = 8;
    }
    pub mod fw {
        pub const CLASSID: u16 = 1;
        pub const POLICE: u16 = 2;
        pub const INDEV: u16 = 3;
        pub const MASK: u16 = 5;
    }
    pub mod basic {
        pub const CLASSID: u16 = 1;
        pub const EMATCHES: u16 = 2;
        pub const POLICE: u16 = 4;
    }
    pub mod matchall {
        pub const CLASSID: u16 = 1;
        pub const ACT: u16 = 2;
    }
    pub mod route4 {
        pub const CLASSID: u16 = 1;
        pub const TO: u16 = 2;
        pub const FROM: u16 = 3;
        pub const IIF: u16 = 4;
    }
    pub mod flow {
        pub const KEYS: u16 = 1;
        pub const MODE: u16 = 2;
        pub const BASECLASS: u16 = 3;
        pub const RSHIFT: u16 = 4;
        pub const ADDEND: u16 = 5;
        pub const MASK: u16 = 6;
        pub const XOR: u16 = 7;
        pub const DIVISOR: u16 = 8;
        pub const PERTURB: u16 = 10;
    }
    pub mod flower {
        pub const CLASSID: u16 = 1;
        pub const INDEV: u16 = 2;
        pub const KEY_ETH_DST: u16 = 4;
        pub const KEY_ETH_DST_MASK: u16 = 5;
        pub const KEY_ETH_SRC: u16 = 6;
        pub const KEY_ETH_SRC_MASK: u16 = 7;
        pub const KEY_ETH_TYPE: u16 = 8;
        pub const KEY_IP_PROTO: u16 = 9;
        pub const KEY_IPV4_SRC: u16 = 10;
        pub const KEY_IPV4_SRC_MASK: u16 = 11;
        pub const KEY_IPV4_DST: u16 = 12;
        pub const KEY_IPV4_DST_MASK: u16 = 13;
        pub const KEY_TCP_SRC: u16 = 14;
        pub const KEY_TCP_DST: u16 = 15;
        pub const KEY_UDP_SRC: u16 = 16;
        pub const KEY_UDP_DST: u16 = 17;
        pub const KEY_VLAN_ID: u16 = 23;
    }
    pub mod tcindex {
        pub const HASH: u16 = 1;
        pub const MASK: u16 = 2;
        pub const SHIFT: u16 = 3;
        pub const FALL_THROUGH: u16 = 4;
        pub const CLASSID: u16 = 5;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FqCodelOpts {
    pub target: Option<u32>,
    pub limit: Option<u32>,
    pub interval: Option<u32>,
    pub ecn: Option<u32>,
    pub flows: Option<u32>,
    pub quantum: Option<u32>,
    pub ce_threshold: Option<u32>,
    pub drop_batch_size: Option<u32>,
    pub memory_limit: Option<u32>,
}

impl FqCodelOpts {
    fn write(&self, b: &mut MessageBuilder) {
        if let Some(v) = self.target {
            b.append_attr_u32(tca::fq_codel::TARGET, v);
        }
        if let Some(v) = self.limit {
            b.append_attr_u32(tca::fq_codel::LIMIT, v);
        }
        if let Some(v) = self.interval {
            b.append_attr_u32(tca::fq_codel::INTERVAL, v);
        }
        if let Some(v) = self.ecn {
            b.append_attr_u32(tca::fq_codel::ECN, v);
        }
        if let Some(v) = self.flows {
            b.append_attr_u32(tca::fq_codel::FLOWS, v);
        }
        if let Some(v) = self.quantum {
            b.append_attr_u32(tca::fq_codel::QUANTUM, v);
        }
        if let Some(v) = self.ce_threshold {
            b.append_attr_u32(tca::fq_codel::CE_THRESHOLD, v);
        }
        if let Some(v) = self.drop_batch_size {
            b.append_attr_u32(tca::fq_codel::DROP_BATCH_SIZE, v);
        }
        if let Some(v) = self.memory_limit {
            b.append_attr_u32(tca::fq_codel::MEMORY_LIMIT, v);
        }
    }

    fn parse(data: &[u8]) -> Self {
        let mut o = Self::default();
        for (kind, payload) in AttrIter::new(data) {
            let v = get::u32_ne(payload).ok();
            match kind {
                k if k == tca::fq_codel::TARGET => o.target = v,
                k if k == tca::fq_codel::LIMIT => o.limit = v,
                k if k == tca::fq_codel::INTERVAL => o.interval = v,
                k if k == tca::fq_codel::ECN => o.ecn = v,
                k if k == tca::fq_codel::FLOWS => o.flows = v,
                k if k == tca::fq_codel::QUANTUM => o.quantum = v,
                k if k == tca::fq_codel::CE_THRESHOLD => o.ce_threshold = v,
                k if k == tca::fq_codel::DROP_BATCH_SIZE => o.drop_batch_size = v,
                k if k == tca::fq_codel::MEMORY_LIMIT => o.memory_limit = v,
                _ => {}
            }
        }
        o
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HfscQdiscOpts {
    pub defcls: u16,
}

impl HfscQdiscOpts {
    fn write(&self, b: &mut MessageBuilder) {
        b.append_attr_u16(tca::hfsc_qdisc::DEFCLS, self.defcls);
    }

    fn parse(data: &[u8]) -> Self {
        let mut o = Self::default();
        for (kind, payload) in AttrIter::new(data) {
            if kind == tca::hfsc_qdisc::DEFCLS {
                o.defcls = get::u16_ne(payload).unwrap_or(0);
            }
        }
        o
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HfscClassOpts {
    pub rsc: Option<ServiceCurve>,
    pub fsc: Option<ServiceCurve>,
    pub usc: Option<ServiceCurve>,
}

fn write_curve(b: &mut MessageBuilder, attr: u16, curve: &ServiceCurve) {
    // struct tc_service_curve { __u32 m1; __u32 d; __u32 m2; }
    let mut payload = [0u8; 12];
    payload[0..4].copy_from_slice(&curve.m1.to_ne_bytes());
    payload[4..8].copy_from_slice(&curve.d.to_ne_bytes());
    payload[8..12].copy_from_slice(&curve.m2.to_ne_bytes());
    b.append_attr(attr, &payload);
}

fn parse_curve(payload: &[u8]) -> Option<ServiceCurve> {
    if payload.len() < 12 {
        return None;
    }
    Some(ServiceCurve {
        m1: get::u32_ne(&payload[0..4]).ok()?,
        d: get::u32_ne(&payload[4..8]).ok()?,
        m2: get::u32_ne(&payload[8..12]).ok()?,
    })
}

impl HfscClassOpts {
    fn write(&self, b: &mut MessageBuilder) {
        if let Some(c) = &self.rsc {
            write_curve(b, tca::hfsc_class::RSC, c);
        }
        if let Some(c) = &self.fsc {
            write_curve(b, tca::hfsc_class::FSC, c);
        }
        if let Some(c) = &self.usc {
            write_curve(b, tca::hfsc_class::USC, c);
        }
    }

    fn parse(data: &[u8]) -> Self {
        let mut o = Self::default();
        for (kind, payload) in AttrIter::new(data) {
            match kind {
                k if k == tca::hfsc_class::RSC => o.rsc = parse_curve(payload),
                k if k == tca::hfsc_class::FSC => o.fsc = parse_curve(payload),
                k if k == tca::hfsc_class::USC => o.usc = parse_curve(payload),
                _ => {}
            }
        }
        o
    }

    /// Stricter than treating a missing curve as "equal to anything": a curve
    /// present on only one side counts as a difference (see the controller's
    /// documented resolution of the semantic-equality open question).
    fn semantically_eq(&self, other: &Self) -> bool {
        self.rsc == other.rsc && self.fsc == other.fsc && self.usc == other.usc
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkMatch {
    pub value: u32,
    pub mask: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Police {
    pub rate: u64,
    pub burst: u32,
    pub mtu: u32,
}

/// `struct tc_u32_sel` reduced to its presence: this controller never builds
/// match-key selectors beyond the always-present, empty selector every u32
/// filter carries (the grounding source always sets `Sel: &tc.U32Sel{}`, even
/// on filters with no key fields of their own).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct U32Sel;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct U32Opts {
    pub classid: Option<u32>,
    pub sel: Option<U32Sel>,
    pub mark: Option<MarkMatch>,
    pub police: Option<Police>,
    #[serde(with = "hex_bytes_opt", default)]
    pub actions: Option<Vec<u8>>,
}

impl U32Opts {
    fn write(&self, b: &mut MessageBuilder) {
        if let Some(classid) = self.classid {
            b.append_attr_u32(tca::u32::CLASSID, classid);
        }
        if self.sel.is_some() {
            b.append_attr_empty(tca::u32::SEL);
        }
        if let Some(m) = &self.mark {
            // struct tc_u32_mark { __u32 val; __u32 mask; __u32 success; }
            let mut payload = [0u8; 12];
            payload[0..4].copy_from_slice(&m.value.to_ne_bytes());
            payload[4..8].copy_from_slice(&m.mask.to_ne_bytes());
            b.append_attr(tca::u32::MARK, &payload);
        }
        if let Some(p) = &self.police {
            write_police(b, tca::u32::POLICE, p);
        }
        if let Some(actions) = &self.actions {
            b.append_attr(tca::u32::ACT, actions);
        }
    }

    fn parse(data: &[u8]) -> Self {
        let mut o = Self::default();
        for (kind, payload) in AttrIter::new(data) {
            match kind {
                k if k == tca::u32::CLASSID => o.classid = get::u32_ne(payload).ok(),
                k if k == tca::u32::SEL => o.sel = Some(U32Sel),
                k if k == tca::u32::MARK && payload.len() >= 8 => {
                    o.mark = Some(MarkMatch {
                        value: get::u32_ne(&payload[0..4]).unwrap_or(0),
                        mask: get::u32_ne(&payload[4..8]).unwrap_or(0),
                    });
                }
                k if k == tca::u32::POLICE => o.police = parse_police(payload),
                k if k == tca::u32::ACT => o.actions = Some(payload.to_vec()),
                _ => {}
            }
        }
        o
    }
}

fn write_police(b: &mut MessageBuilder, attr: u16, p: &Police) {
    let nest = b.nest_start(attr);
    // A trimmed `struct tc_police`: rate/burst/mtu only, the fields this
    // controller's callers actually set.
    let mut payload = [0u8; 12];
    payload[0..4].copy_from_slice(&(p.rate as u32).to_ne_bytes());
    payload[4..8].copy_from_slice(&p.burst.to_ne_bytes());
    payload[8..12].copy_from_slice(&p.mtu.to_ne_bytes());
    b.append_attr(1, &payload);
    if p.rate > u32::MAX as u64 {
        b.append_attr_u64(2, p.rate);
    }
    b.nest_end(nest);
}

fn parse_police(data: &[u8]) -> Option<Police> {
    let mut police = None;
    let mut rate64 = None;
    for (kind, payload) in AttrIter::new(data) {
        match kind {
            1 if payload.len() >= 12 => {
                police = Some(Police {
                    rate: get::u32_ne(&payload[0..4]).unwrap_or(0) as u64,
                    burst: get::u32_ne(&payload[4..8]).unwrap_or(0),
                    mtu: get::u32_ne(&payload[8..12]).unwrap_or(0),
                });
            }
            2 => rate64 = get::u64_ne(payload).ok(),
            _ => {}
        }
    }
    if let (Some(mut p), Some(r)) = (police, rate64) {
        p.rate = r;
        police = Some(p);
    }
    police
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FwOpts {
    pub classid: Option<u32>,
    pub mask: Option<u32>,
    pub indev: Option<String>,
    pub police: Option<Police>,
}

impl FwOpts {
    fn write(&self, b: &mut MessageBuilder) {
        if let Some(classid) = self.classid {
            b.append_attr_u32(tca::fw::CLASSID, classid);
        }
        if let Some(mask) = self.mask {
            b.append_attr_u32(tca::fw::MASK, mask);
        }
        if let Some(indev) = &self.indev {
            b.append_attr_str(tca::fw::INDEV, indev);
        }
        if let Some(p) = &self.police {
            write_police(b, tca::fw::POLICE, p);
        }
    }

    fn parse(data: &[u8]) -> Self {
        let mut o = Self::default();
        for (kind, payload) in AttrIter::new(data) {
            match kind {
                k if k == tca::fw::CLASSID => o.classid = get::u32_ne(payload).ok(),
                k if k == tca::fw::MASK => o.mask = get::u32_ne(payload).ok(),
                k if k == tca::fw::INDEV => o.indev = get::string(payload).ok().map(str::to_string),
                k if k == tca::fw::POLICE => o.police = parse_police(payload),
                _ => {}
            }
        }
        o
    }
}

/// An opaque ematch program: write-only from this controller's perspective
/// (see the documented resolution of the round-trip-fidelity open question).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicOpts {
    pub classid: Option<u32>,
    pub police: Option<Police>,
    #[serde(with = "hex_bytes_opt", default)]
    pub ematch: Option<Vec<u8>>,
}

impl BasicOpts {
    fn write(&self, b: &mut MessageBuilder) {
        if let Some(classid) = self.classid {
            b.append_attr_u32(tca::basic::CLASSID, classid);
        }
        if let Some(p) = &self.police {
            write_police(b, tca::basic::POLICE, p);
        }
        if let Some(bytes) = &self.ematch {
            b.append_attr(tca::basic::EMATCHES, bytes);
        }
    }

    fn parse(data: &[u8]) -> Self {
        let mut o = Self::default();
        for (kind, payload) in AttrIter::new(data) {
            match kind {
                k if k == tca::basic::CLASSID => o.classid = get::u32_ne(payload).ok(),
                k if k == tca::basic::POLICE => o.police = parse_police(payload),
                k if k == tca::basic::EMATCHES => o.ematch = Some(payload.to_vec()),
                _ => {}
            }
        }
        o
    }
}

mod hex_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => s.serialize_str(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let opt: Option<String> = Option::deserialize(d)?;
        opt.map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }

    mod hex {
        pub fn encode(bytes: &[u8]) -> String {
            bytes.iter().map(|b| format!("{b:02x}")).collect()
        }
        pub fn decode(s: String) -> Result<Vec<u8>, String> {
            if s.len() % 2 != 0 {
                return Err("odd-length hex string".into());
            }
            (0..s.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
                .collect()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchallOpts {
    pub classid: Option<u32>,
    #[serde(with = "hex_bytes_opt", default)]
    pub actions: Option<Vec<u8>>,
}

impl MatchallOpts {
    fn write(&self, b: &mut MessageBuilder) {
        if let Some(classid) = self.classid {
            b.append_attr_u32(tca::matchall::CLASSID, classid);
        }
        if let Some(actions) = &self.actions {
            b.append_attr(tca::matchall::ACT, actions);
        }
    }

    fn parse(data: &[u8]) -> Self {
        let mut o = Self::default();
        for (kind, payload) in AttrIter::new(data) {
            match kind {
                k if k == tca::matchall::CLASSID => o.classid = get::u32_ne(payload).ok(),
                k if k == tca::matchall::ACT => o.actions = Some(payload.to_vec()),
                _ => {}
            }
        }
        o
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Route4Opts {
    pub classid: Option<u32>,
    pub to: Option<u32>,
    pub from: Option<u32>,
    pub iif: Option<u32>,
}

impl Route4Opts {
    fn write(&self, b: &mut MessageBuilder) {
        if let Some(v) = self.classid {
            b.append_attr_u32(tca::route4::CLASSID, v);
        }
        if let Some(v) = self.to {
            b.append_attr_u32(tca::route4::TO, v);
        }
        if let Some(v) = self.from {
            b.append_attr_u32(tca::route4::FROM, v);
        }
        if let Some(v) = self.iif {
            b.append_attr_u32(tca::route4::IIF, v);
        }
    }

    fn parse(data: &[u8]) -> Self {
        let mut o = Self::default();
        for (kind, payload) in AttrIter::new(data) {
            let v = get::u32_ne(payload).ok();
            match kind {
                k if k == tca::route4::CLASSID => o.classid = v,
                k if k == tca::route4::TO => o.to = v,
                k if k == tca::route4::FROM => o.from = v,
                k if k == tca::route4::IIF => o.iif = v,
                _ => {}
            }
        }
        o
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowOpts {
    pub keys: Option<u32>,
    pub mode: Option<u32>,
    pub baseclass: Option<u32>,
    pub rshift: Option<u32>,
    pub addend: Option<u32>,
    pub mask: Option<u32>,
    pub xor: Option<u32>,
    pub divisor: Option<u32>,
    pub perturb: Option<u32>,
}

impl FlowOpts {
    fn write(&self, b: &mut MessageBuilder) {
        let fields: [(u16, Option<u32>); 9] = [
            (tca::flow::KEYS, self.keys),
            (tca::flow::MODE, self.mode),
            (tca::flow::BASECLASS, self.baseclass),
            (tca::flow::RSHIFT, self.rshift),
            (tca::flow::ADDEND, self.addend),
            (tca::flow::MASK, self.mask),
            (tca::flow::XOR, self.xor),
            (tca::flow::DIVISOR, self.divisor),
            (tca::flow::PERTURB, self.perturb),
        ];
        for (attr, value) in fields {
            if let Some(v) = value {
                b.append_attr_u32(attr, v);
            }
        }
    }

    fn parse(data: &[u8]) -> Self {
        let mut o = Self::default();
        for (kind, payload) in AttrIter::new(data) {
            let v = get::u32_ne(payload).ok();
            match kind {
                k if k == tca::flow::KEYS => o.keys = v,
                k if k == tca::flow::MODE => o.mode = v,
                k if k == tca::flow::BASECLASS => o.baseclass = v,
                k if k == tca::flow::RSHIFT => o.rshift = v,
                k if k == tca::flow::ADDEND => o.addend = v,
                k if k == tca::flow::MASK => o.mask = v,
                k if k == tca::flow::XOR => o.xor = v,
                k if k == tca::flow::DIVISOR => o.divisor = v,
                k if k == tca::flow::PERTURB => o.perturb = v,
                _ => {}
            }
        }
        o
    }
}

/// A representative subset of flower's match keys: L2 MAC (with masks), L3
/// IPv4 (with CIDR masks), L4 ports, VLAN ID, and IP protocol. The full
/// kernel key space runs to roughly sixty fields; this set covers the common
/// cases and is documented as a deliberately reduced scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowerOpts {
    pub classid: Option<u32>,
    pub indev: Option<String>,
    pub eth_type: Option<u16>,
    pub ip_proto: Option<u8>,
    pub dst_mac: Option<[u8; 6]>,
    pub dst_mac_mask: Option<[u8; 6]>,
    pub src_mac: Option<[u8; 6]>,
    pub src_mac_mask: Option<[u8; 6]>,
    pub ipv4_dst: Option<std::net::Ipv4Addr>,
    pub ipv4_dst_mask: Option<std::net::Ipv4Addr>,
    pub ipv4_src: Option<std::net::Ipv4Addr>,
    pub ipv4_src_mask: Option<std::net::Ipv4Addr>,
    pub tcp_src: Option<u16>,
    pub tcp_dst: Option<u16>,
    pub udp_src: Option<u16>,
    pub udp_dst: Option<u16>,
    pub vlan_id: Option<u16>,
}

impl FlowerOpts {
    fn write(&self, b: &mut MessageBuilder) {
        if let Some(v) = self.classid {
            b.append_attr_u32(tca::flower::CLASSID, v);
        }
        if let Some(indev) = &self.indev {
            b.append_attr_str(tca::flower::INDEV, indev);
        }
        if let Some(v) = self.eth_type {
            b.append_attr(tca::flower::KEY_ETH_TYPE, &v.to_be_bytes());
        }
        if let Some(v) = self.ip_proto {
            b.append_attr_u8(tca::flower::KEY_IP_PROTO, v);
        }
        if let Some(v) = self.dst_mac {
            b.append_attr(tca::flower::KEY_ETH_DST, &v);
        }
        if let Some(v) = self.dst_mac_mask {
            b.append_attr(tca::flower::KEY_ETH_DST_MASK, &v);
        }
        if let Some(v) = self.src_mac {
            b.append_attr(tca::flower::KEY_ETH_SRC, &v);
        }
        if let Some(v) = self.src_mac_mask {
            b.append_attr(tca::flower::KEY_ETH_SRC_MASK, &v);
        }
        if let Some(v) = self.ipv4_dst {
            b.append_attr(tca::flower::KEY_IPV4_DST, &v.octets());
        }
        if let Some(v) = self.ipv4_dst_mask {
            b.append_attr(tca::flower::KEY_IPV4_DST_MASK, &v.octets());
        }
        if let Some(v) = self.ipv4_src {
            b.append_attr(tca::flower::KEY_IPV4_SRC, &v.octets());
        }
        if let Some(v) = self.ipv4_src_mask {
            b.append_attr(tca::flower::KEY_IPV4_SRC_MASK, &v.octets());
        }
        if let Some(v) = self.tcp_src {
            b.append_attr(tca::flower::KEY_TCP_SRC, &v.to_be_bytes());
        }
        if let Some(v) = self.tcp_dst {
            b.append_attr(tca::flower::KEY_TCP_DST, &v.to_be_bytes());
        }
        if let Some(v) = self.udp_src {
            b.append_attr(tca::flower::KEY_UDP_SRC, &v.to_be_bytes());
        }
        if let Some(v) = self.udp_dst {
            b.append_attr(tca::flower::KEY_UDP_DST, &v.to_be_bytes());
        }
        if let Some(v) = self.vlan_id {
            b.append_attr(tca::flower::KEY_VLAN_ID, &v.to_ne_bytes());
        }
    }

    fn parse(data: &[u8]) -> Self {
        let mut o = Self::default();
        let mac = |p: &[u8]| -> Option<[u8; 6]> { p.get(0..6)?.try_into().ok() };
        for (kind, payload) in AttrIter::new(data) {
            match kind {
                k if k == tca::flower::CLASSID => o.classid = get::u32_ne(payload).ok(),
                k if k == tca::flower::INDEV => o.indev = get::string(payload).ok().map(str::to_string),
                k if k == tca::flower::KEY_ETH_TYPE => o.eth_type = get::u16_be(payload).ok(),
                k if k == tca::flower::KEY_IP_PROTO => o.ip_proto = get::u8(payload).ok(),
                k if k == tca::flower::KEY_ETH_DST => o.dst_mac = mac(payload),
                k if k == tca::flower::KEY_ETH_DST_MASK => o.dst_mac_mask = mac(payload),
                k if k == tca::flower::KEY_ETH_SRC => o.src_mac = mac(payload),
                k if k == tca::flower::KEY_ETH_SRC_MASK => o.src_mac_mask = mac(payload),
                k if k == tca::flower::KEY_IPV4_DST => {
                    o.ipv4_dst = payload.get(0..4).map(|b| std::net::Ipv4Addr::new(b[0], b[1], b[2], b[3]));
                }
                k if k == tca::flower::KEY_IPV4_DST_MASK => {
                    o.ipv4_dst_mask = payload.get(0..4).map(|b| std::net::Ipv4Addr::new(b[0], b[1], b[2], b[3]));
                }
                k if k == tca::flower::KEY_IPV4_SRC => {
                    o.ipv4_src = payload.get(0..4).map(|b| std::net::Ipv4Addr::new(b[0], b[1], b[2], b[3]));
                }
                k if k == tca::flower::KEY_IPV4_SRC_MASK => {
                    o.ipv4_src_mask = payload.get(0..4).map(|b| std::net::Ipv4Addr::new(b[0], b[1], b[2], b[3]));
                }
                k if k == tca::flower::KEY_TCP_SRC => o.tcp_src = get::u16_be(payload).ok(),
                k if k == tca::flower::KEY_TCP_DST => o.tcp_dst = get::u16_be(payload).ok(),
                k if k == tca::flower::KEY_UDP_SRC => o.udp_src = get::u16_be(payload).ok(),
                k if k == tca::flower::KEY_UDP_DST => o.udp_dst = get::u16_be(payload).ok(),
                k if k == tca::flower::KEY_VLAN_ID => o.vlan_id = get::u16_ne(payload).ok(),
                _ => {}
            }
        }
        o
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcIndexOpts {
    pub classid: Option<u32>,
    pub hash: Option<u32>,
    pub mask: Option<u16>,
    pub shift: Option<u16>,
    pub fallthrough: Option<u32>,
}

impl TcIndexOpts {
    fn write(&self, b: &mut MessageBuilder) {
        if let Some(v) = self.classid {
            b.append_attr_u32(tca::tcindex::CLASSID, v);
        }
        if let Some(v) = self.hash {
            b.append_attr_u32(tca::tcindex::HASH, v);
        }
        if let Some(v) = self.mask {
            b.append_attr_u16(tca::tcindex::MASK, v);
        }
        if let Some(v) = self.shift {
            b.append_attr_u16(tca::tcindex::SHIFT, v);
        }
        if let Some(v) = self.fallthrough {
            b.append_attr_u32(tca::tcindex::FALL_THROUGH, v);
        }
    }

    fn parse(data: &[u8]) -> Self {
        let mut o = Self::default();
        for (kind, payload) in AttrIter::new(data) {
            match kind {
                k if k == tca::tcindex::CLASSID => o.classid = get::u32_ne(payload).ok(),
                k if k == tca::tcindex::HASH => o.hash = get::u32_ne(payload).ok(),
                k if k == tca::tcindex::MASK => o.mask = get::u16_ne(payload).ok(),
                k if k == tca::tcindex::SHIFT => o.shift = get::u16_ne(payload).ok(),
                k if k == tca::tcindex::FALL_THROUGH => o.fallthrough = get::u32_ne(payload).ok(),
                _ => {}
            }
        }
        o
    }
}

/// The tagged sum type over every supported qdisc/class/filter kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "attr", rename_all = "snake_case")]
pub enum AttributePayload {
    FqCodel(FqCodelOpts),
    HfscQdisc(HfscQdiscOpts),
    HfscClass(HfscClassOpts),
    U32(U32Opts),
    Fw(FwOpts),
    Basic(BasicOpts),
    Matchall(MatchallOpts),
    Route4(Route4Opts),
    Flow(FlowOpts),
    Flower(FlowerOpts),
    TcIndex(TcIndexOpts),
}

impl AttributePayload {
    /// The wire `kind` string sent in `TCA_KIND`.
    pub fn kind_str(&self) -> &'static str {
        match self {
            AttributePayload::FqCodel(_) => "fq_codel",
            AttributePayload::HfscQdisc(_) | AttributePayload::HfscClass(_) => "hfsc",
            AttributePayload::U32(_) => "u32",
            AttributePayload::Fw(_) => "fw",
            AttributePayload::Basic(_) => "basic",
            AttributePayload::Matchall(_) => "matchall",
            AttributePayload::Route4(_) => "route4",
            AttributePayload::Flow(_) => "flow",
            AttributePayload::Flower(_) => "flower",
            AttributePayload::TcIndex(_) => "tcindex",
        }
    }

    /// Write this payload's option bytes into a `TCA_OPTIONS`-nested region.
    pub fn write_options(&self, b: &mut MessageBuilder, options_attr: u16) {
        let nest = b.nest_start(options_attr);
        match self {
            AttributePayload::FqCodel(o) => o.write(b),
            AttributePayload::HfscQdisc(o) => o.write(b),
            AttributePayload::HfscClass(o) => o.write(b),
            AttributePayload::U32(o) => o.write(b),
            AttributePayload::Fw(o) => o.write(b),
            AttributePayload::Basic(o) => o.write(b),
            AttributePayload::Matchall(o) => o.write(b),
            AttributePayload::Route4(o) => o.write(b),
            AttributePayload::Flow(o) => o.write(b),
            AttributePayload::Flower(o) => o.write(b),
            AttributePayload::TcIndex(o) => o.write(b),
        }
        b.nest_end(nest);
    }

    /// Parse `TCA_OPTIONS` bytes for a known `kind` string.
    pub fn parse(kind: &str, options: &[u8]) -> Option<Self> {
        Some(match kind {
            "fq_codel" => AttributePayload::FqCodel(FqCodelOpts::parse(options)),
            "u32" => AttributePayload::U32(U32Opts::parse(options)),
            "fw" => AttributePayload::Fw(FwOpts::parse(options)),
            "basic" => AttributePayload::Basic(BasicOpts::parse(options)),
            "matchall" => AttributePayload::Matchall(MatchallOpts::parse(options)),
            "route4" => AttributePayload::Route4(Route4Opts::parse(options)),
            "flow" => AttributePayload::Flow(FlowOpts::parse(options)),
            "flower" => AttributePayload::Flower(FlowerOpts::parse(options)),
            "tcindex" => AttributePayload::TcIndex(TcIndexOpts::parse(options)),
            _ => return None,
        })
    }

    /// Parse `hfsc`'s options, disambiguated by message kind (qdisc vs class)
    /// since both share the kernel kind string `"hfsc"`.
    pub fn parse_hfsc(is_qdisc: bool, options: &[u8]) -> Self {
        if is_qdisc {
            AttributePayload::HfscQdisc(HfscQdiscOpts::parse(options))
        } else {
            AttributePayload::HfscClass(HfscClassOpts::parse(options))
        }
    }

    /// Semantic equality: identity fields are compared by the caller; this
    /// compares only the kind-specific payload, with the stricter nil-vs-present
    /// HFSC rule documented in the controller's design notes.
    pub fn semantically_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttributePayload::HfscClass(a), AttributePayload::HfscClass(b)) => a.semantically_eq(b),
            _ => self == other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fq_codel_roundtrips_through_wire_bytes() {
        let opts = FqCodelOpts {
            target: Some(5000),
            limit: Some(1200),
            flows: Some(1024),
            ..Default::default()
        };
        let mut b = MessageBuilder::new(1, 0);
        let nest = b.nest_start(2);
        opts.write(&mut b);
        b.nest_end(nest);

        // Strip the outer nest header to parse as a flat attribute region.
        let bytes = b.as_bytes();
        let inner = &bytes[crate::netlink::message::NLMSG_HDRLEN + crate::netlink::attr::NLA_HDRLEN..];
        let parsed = FqCodelOpts::parse(inner);
        assert_eq!(parsed.target, Some(5000));
        assert_eq!(parsed.limit, Some(1200));
        assert_eq!(parsed.flows, Some(1024));
    }

    #[test]
    fn hfsc_class_equality_is_strict_on_missing_curve() {
        let with_curve = HfscClassOpts {
            rsc: Some(ServiceCurve { m1: 1, d: 0, m2: 1 }),
            ..Default::default()
        };
        let without_curve = HfscClassOpts::default();
        assert!(!with_curve.semantically_eq(&without_curve));
        assert!(with_curve.semantically_eq(&with_curve));
    }

    #[test]
    fn attribute_payload_kind_strings() {
        assert_eq!(AttributePayload::FqCodel(Default::default()).kind_str(), "fq_codel");
        assert_eq!(AttributePayload::HfscClass(Default::default()).kind_str(), "hfsc");
        assert_eq!(AttributePayload::U32(Default::default()).kind_str(), "u32");
    }
}
