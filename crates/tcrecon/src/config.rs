//! TOML configuration loading and two-pass symbolic handle resolution.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::attribute::{
    AttributePayload, BasicOpts, FlowOpts, FlowerOpts, FqCodelOpts, FwOpts, HfscClassOpts, HfscQdiscOpts,
    MarkMatch, MatchallOpts, Police, Route4Opts, ServiceCurve, TcIndexOpts, U32Opts, U32Sel,
};
use crate::handle;
use crate::netlink::error::{Error, Result};
use crate::node::{Node, NodeType, compose};
use crate::object::TcObject;

fn default_addr() -> String {
    "127.0.0.1:9090".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    Declarative,
    Simple,
    LanParty,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "Handle")]
    pub handle: Option<String>,
    #[serde(rename = "ClassID")]
    pub classid: Option<String>,
    #[serde(rename = "FilterID")]
    pub filterid: Option<String>,
    #[serde(rename = "Parent")]
    pub parent: String,
    #[serde(rename = "Specs", default)]
    pub specs: toml::value::Table,
}

impl Entry {
    fn own_handle_field(&self) -> Option<&str> {
        self.handle.as_deref().or(self.classid.as_deref()).or(self.filterid.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    #[serde(rename = "Interface")]
    pub interface: String,
    #[serde(rename = "DownloadSpeed")]
    pub download_speed: f64,
    #[serde(rename = "UploadSpeed")]
    pub upload_speed: f64,
    #[serde(rename = "TrafficFile")]
    pub traffic_file: Option<String>,
    #[serde(rename = "Addr", default = "default_addr")]
    pub addr: String,
    #[serde(rename = "Mode", default)]
    pub mode: Mode,
    #[serde(rename = "Qdiscs", default)]
    pub qdiscs: BTreeMap<String, Entry>,
    #[serde(rename = "Classes", default)]
    pub classes: BTreeMap<String, Entry>,
    #[serde(rename = "Filters", default)]
    pub filters: BTreeMap<String, Entry>,
}

pub struct Config {
    pub raw: RawConfig,
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        let raw: RawConfig = toml::from_str(&text).map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))?;
        Ok(Self { raw })
    }

    pub fn interface(&self) -> &str {
        &self.raw.interface
    }

    pub fn addr(&self) -> &str {
        &self.raw.addr
    }

    pub fn mode(&self) -> Mode {
        self.raw.mode
    }

    /// Build the desired qdisc/class tree plus the flat filter list for a
    /// resolved interface index, either from the declarative dictionaries or
    /// from a QoS template, per `Mode`.
    pub fn build_desired(&self, ifindex: i32) -> Result<(Node, Vec<Node>)> {
        match self.raw.mode {
            Mode::Declarative => self.build_declarative(ifindex),
            Mode::Simple => Ok(crate::qos::simple(ifindex, self.raw.interface_speed(), self.raw.internet_speed())),
            Mode::LanParty => Ok(crate::qos::lan_party(
                ifindex,
                &self.raw.interface,
                self.raw.interface_speed(),
                self.raw.internet_speed(),
            )),
        }
    }

    fn build_declarative(&self, ifindex: i32) -> Result<(Node, Vec<Node>)> {
        let handle_map = self.build_handle_map()?;

        let mut qdisc_classes = Vec::new();
        for (name, entry) in &self.raw.qdiscs {
            qdisc_classes.push(self.resolve_entry(name, entry, NodeType::Qdisc, ifindex, &handle_map)?);
        }
        for (name, entry) in &self.raw.classes {
            qdisc_classes.push(self.resolve_entry(name, entry, NodeType::Class, ifindex, &handle_map)?);
        }

        let (tree, leftovers) = compose(qdisc_classes)?;
        if !leftovers.is_empty() {
            let names: Vec<_> = leftovers.iter().map(|n| n.name.clone()).collect();
            return Err(Error::Tree(format!("unreachable nodes (parent not found in tree): {names:?}")));
        }

        let mut filters = Vec::new();
        for (name, entry) in &self.raw.filters {
            match self.resolve_entry(name, entry, NodeType::Filter, ifindex, &handle_map) {
                Ok(node) => filters.push(node),
                Err(e) => tracing::warn!(filter = name, error = %e, "skipping filter with unresolved reference"),
            }
        }

        Ok((tree, filters))
    }

    fn build_handle_map(&self) -> Result<BTreeMap<String, u32>> {
        let mut map = BTreeMap::new();
        for (dict_name, dict) in [
            ("qdiscs", &self.raw.qdiscs),
            ("classes", &self.raw.classes),
            ("filters", &self.raw.filters),
        ] {
            for (name, entry) in dict {
                if let Some(own) = entry.own_handle_field() {
                    let h = handle::parse(own)?;
                    if map.insert(name.clone(), h).is_some() {
                        return Err(Error::Config(format!("name {name:?} used in more than one dictionary (last seen in {dict_name})")));
                    }
                }
            }
        }
        Ok(map)
    }

    fn resolve_entry(
        &self,
        name: &str,
        entry: &Entry,
        node_type: NodeType,
        ifindex: i32,
        handle_map: &BTreeMap<String, u32>,
    ) -> Result<Node> {
        let own_handle = entry
            .own_handle_field()
            .ok_or_else(|| Error::Config(format!("{name:?} missing its own handle field")))?;
        let own = handle::parse(own_handle)?;

        let parent = if entry.parent.eq_ignore_ascii_case("root") {
            handle::ROOT
        } else {
            *handle_map
                .get(&entry.parent)
                .ok_or_else(|| Error::Config(format!("{name:?} references unknown parent {:?}", entry.parent)))?
        };

        let payload = payload_from_specs(&entry.kind, node_type, &entry.specs, handle_map)?;
        let object = TcObject::new(ifindex, own, parent, payload);
        Ok(Node::new(name, node_type, object))
    }
}

impl RawConfig {
    fn interface_speed(&self) -> f64 {
        self.download_speed.max(self.upload_speed)
    }

    fn internet_speed(&self) -> f64 {
        self.download_speed
    }
}

fn spec_u32(specs: &toml::value::Table, key: &str) -> Option<u32> {
    specs.get(key).and_then(|v| v.as_integer()).map(|v| v as u32)
}

fn spec_u16(specs: &toml::value::Table, key: &str) -> Option<u16> {
    specs.get(key).and_then(|v| v.as_integer()).map(|v| v as u16)
}

fn spec_str<'a>(specs: &'a toml::value::Table, key: &str) -> Option<&'a str> {
    specs.get(key).and_then(|v| v.as_str())
}

fn resolve_symbol(handle_map: &BTreeMap<String, u32>, value: &str) -> Result<u32> {
    if let Ok(h) = handle::parse(value) {
        return Ok(h);
    }
    handle_map
        .get(value)
        .copied()
        .ok_or_else(|| Error::Config(format!("unresolved symbolic reference {value:?}")))
}

fn spec_curve(specs: &toml::value::Table, key: &str) -> Option<ServiceCurve> {
    let table = specs.get(key)?.as_table()?;
    Some(ServiceCurve {
        m1: table.get("burst").and_then(|v| v.as_integer()).unwrap_or(0) as u32,
        d: table.get("delay").and_then(|v| v.as_integer()).unwrap_or(0) as u32,
        m2: table.get("rate").and_then(|v| v.as_integer()).unwrap_or(0) as u32,
    })
}

fn spec_police(specs: &toml::value::Table) -> Option<Police> {
    let table = specs.get("police")?.as_table()?;
    Some(Police {
        rate: table.get("rate").and_then(|v| v.as_integer()).unwrap_or(0) as u64,
        burst: table.get("burst").and_then(|v| v.as_integer()).unwrap_or(0) as u32,
        mtu: table.get("mtu").and_then(|v| v.as_integer()).unwrap_or(0) as u32,
    })
}

/// Translate a kind's spec map into its typed payload, resolving symbolic
/// `classid`/`parent` references against the controller's handle map.
/// Unknown keys within a recognised kind are ignored; unknown kinds error.
fn payload_from_specs(
    kind: &str,
    node_type: NodeType,
    specs: &toml::value::Table,
    handle_map: &BTreeMap<String, u32>,
) -> Result<AttributePayload> {
    let classid = specs
        .get("classid")
        .and_then(|v| v.as_str())
        .map(|v| resolve_symbol(handle_map, v))
        .transpose()?;

    Ok(match kind {
        "fq_codel" => AttributePayload::FqCodel(FqCodelOpts {
            target: spec_u32(specs, "target"),
            limit: spec_u32(specs, "limit"),
            interval: spec_u32(specs, "interval"),
            ecn: spec_u32(specs, "ecn"),
            flows: spec_u32(specs, "flows"),
            quantum: spec_u32(specs, "quantum"),
            ce_threshold: spec_u32(specs, "cethreshold"),
            drop_batch_size: spec_u32(specs, "dropbatchsize"),
            memory_limit: spec_u32(specs, "memorylimit"),
        }),
        "hfsc" if node_type == NodeType::Qdisc => AttributePayload::HfscQdisc(HfscQdiscOpts {
            defcls: spec_u16(specs, "defcls").unwrap_or(0),
        }),
        "hfsc" => {
            let mut opts = HfscClassOpts::default();
            if let Some(sc) = spec_curve(specs, "sc") {
                opts.rsc = Some(sc);
                opts.fsc = Some(sc);
            }
            if let Some(ul) = spec_curve(specs, "ul") {
                opts.usc = Some(ul);
            }
            if let Some(ls) = spec_curve(specs, "ls") {
                opts.fsc = Some(ls);
            }
            if let Some(rt) = spec_curve(specs, "rt") {
                opts.rsc = Some(rt);
            }
            AttributePayload::HfscClass(opts)
        }
        "u32" => AttributePayload::U32(U32Opts {
            classid,
            sel: Some(U32Sel),
            mark: specs.get("mark").and_then(|v| v.as_table()).map(|m| MarkMatch {
                value: m.get("val").and_then(|v| v.as_integer()).unwrap_or(0) as u32,
                mask: m.get("mask").and_then(|v| v.as_integer()).unwrap_or(0) as u32,
            }),
            police: spec_police(specs),
            actions: None,
        }),
        "fw" => AttributePayload::Fw(FwOpts {
            classid,
            mask: spec_u32(specs, "mask"),
            indev: spec_str(specs, "indev").map(str::to_string),
            police: spec_police(specs),
        }),
        "basic" => AttributePayload::Basic(BasicOpts {
            classid,
            police: spec_police(specs),
            ematch: None,
        }),
        "matchall" => AttributePayload::Matchall(MatchallOpts { classid, actions: None }),
        "route4" => AttributePayload::Route4(Route4Opts {
            classid,
            to: spec_u32(specs, "to"),
            from: spec_u32(specs, "from"),
            iif: spec_u32(specs, "iif"),
        }),
        "flow" => AttributePayload::Flow(FlowOpts {
            keys: spec_u32(specs, "keys"),
            mode: spec_u32(specs, "mode"),
            baseclass: classid,
            rshift: spec_u32(specs, "rshift"),
            addend: spec_u32(specs, "addend"),
            mask: spec_u32(specs, "mask"),
            xor: spec_u32(specs, "xor"),
            divisor: spec_u32(specs, "divisor"),
            perturb: spec_u32(specs, "perturb"),
        }),
        "flower" => AttributePayload::Flower(FlowerOpts {
            classid,
            indev: spec_str(specs, "indev").map(str::to_string),
            eth_type: spec_u16(specs, "ethtype"),
            ip_proto: specs.get("ipproto").and_then(|v| v.as_integer()).map(|v| v as u8),
            dst_mac: None,
            dst_mac_mask: None,
            src_mac: None,
            src_mac_mask: None,
            ipv4_dst: spec_str(specs, "dstip").and_then(|s| s.parse().ok()),
            ipv4_dst_mask: spec_str(specs, "dstipmask").and_then(|s| s.parse().ok()),
            ipv4_src: spec_str(specs, "srcip").and_then(|s| s.parse().ok()),
            ipv4_src_mask: spec_str(specs, "srcipmask").and_then(|s| s.parse().ok()),
            tcp_src: spec_u16(specs, "tcpsrc"),
            tcp_dst: spec_u16(specs, "tcpdst"),
            udp_src: spec_u16(specs, "udpsrc"),
            udp_dst: spec_u16(specs, "udpdst"),
            vlan_id: spec_u16(specs, "vlanid"),
        }),
        "tcindex" => AttributePayload::TcIndex(TcIndexOpts {
            classid,
            hash: spec_u32(specs, "hash"),
            mask: spec_u16(specs, "mask"),
            shift: spec_u16(specs, "shift"),
            fallthrough: spec_u32(specs, "fallthrough"),
        }),
        other => return Err(Error::Config(format!("unsupported kind {other:?}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toml_config(body: &str) -> RawConfig {
        toml::from_str(body).unwrap()
    }

    #[test]
    fn parses_minimal_declarative_config() {
        let raw = toml_config(
            r#"
            Interface = "eth0"
            DownloadSpeed = 1.0e8
            UploadSpeed = 2.0e7

            [Qdiscs.root]
            type = "hfsc"
            Handle = "1:0"
            Parent = "root"
            [Qdiscs.root.Specs]
            defcls = 2
            "#,
        );
        assert_eq!(raw.interface, "eth0");
        assert_eq!(raw.mode, Mode::Declarative);
        assert_eq!(raw.addr, "127.0.0.1:9090");
        assert_eq!(raw.qdiscs.len(), 1);
    }

    #[test]
    fn duplicate_name_across_dictionaries_is_an_error() {
        let config = Config {
            raw: toml_config(
                r#"
                Interface = "eth0"
                DownloadSpeed = 1.0
                UploadSpeed = 1.0

                [Qdiscs.shared]
                type = "hfsc"
                Handle = "1:0"
                Parent = "root"

                [Classes.shared]
                type = "hfsc"
                ClassID = "1:1"
                Parent = "root"
                "#,
            ),
        };
        assert!(config.build_handle_map().is_err());
    }

    #[test]
    fn duplicate_name_across_dictionaries_is_an_error_even_with_the_same_handle() {
        let config = Config {
            raw: toml_config(
                r#"
                Interface = "eth0"
                DownloadSpeed = 1.0
                UploadSpeed = 1.0

                [Qdiscs.shared]
                type = "hfsc"
                Handle = "1:0"
                Parent = "root"

                [Classes.shared]
                type = "hfsc"
                ClassID = "1:0"
                Parent = "root"
                "#,
            ),
        };
        assert!(config.build_handle_map().is_err());
    }

    #[test]
    fn missing_parent_reference_is_an_error_for_classes() {
        let config = Config {
            raw: toml_config(
                r#"
                Interface = "eth0"
                DownloadSpeed = 1.0
                UploadSpeed = 1.0

                [Classes.orphan]
                type = "hfsc"
                ClassID = "1:1"
                Parent = "nonexistent"
                "#,
            ),
        };
        assert!(config.build_declarative(1).is_err());
    }
}
