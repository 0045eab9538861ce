//! High-level `Qdisc`/`Class`/`Filter` operations over a netlink connection,
//! in terms of the object model rather than raw TLV bytes.

use crate::attribute::AttributePayload;
use crate::netlink::attr::{AttrIter, get};
use crate::netlink::connection::{self, Connection};
use crate::netlink::error::{Error, Result};
use crate::netlink::message::NlMsgType;
use crate::node::NodeType;
use crate::object::TcObject;
use crate::reconcile::ReconcileClient;

const TCA_KIND: u16 = 1;
const TCA_OPTIONS: u16 = 2;

/// `struct tcmsg`: family, two padding bytes, interface index, handle,
/// parent, and a reserved `info` field used by filters for protocol/priority.
mod tc_header {
    pub const LEN: usize = 20;

    pub fn write(ifindex: i32, handle: u32, parent: u32, info: u32) -> [u8; LEN] {
        let mut buf = [0u8; LEN];
        buf[0] = 0; // family: AF_UNSPEC
        buf[4..8].copy_from_slice(&ifindex.to_ne_bytes());
        buf[8..12].copy_from_slice(&handle.to_ne_bytes());
        buf[12..16].copy_from_slice(&parent.to_ne_bytes());
        buf[16..20].copy_from_slice(&info.to_ne_bytes());
        buf
    }

    pub struct Parsed {
        pub ifindex: i32,
        pub handle: u32,
        pub parent: u32,
        pub info: u32,
    }

    pub fn parse(data: &[u8]) -> super::Result<Parsed> {
        if data.len() < LEN {
            return Err(super::Error::Truncated { expected: LEN, actual: data.len() });
        }
        Ok(Parsed {
            ifindex: i32::from_ne_bytes(data[4..8].try_into().unwrap()),
            handle: u32::from_ne_bytes(data[8..12].try_into().unwrap()),
            parent: u32::from_ne_bytes(data[12..16].try_into().unwrap()),
            info: u32::from_ne_bytes(data[16..20].try_into().unwrap()),
        })
    }
}

/// Resolve an interface name to its kernel index.
pub fn ifindex_for(name: &str) -> Result<i32> {
    let c_name = std::ffi::CString::new(name).map_err(|_| Error::InterfaceNotFound { name: name.to_string() })?;
    // SAFETY: c_name is a valid, NUL-terminated C string for the duration of the call.
    let idx = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if idx == 0 {
        return Err(Error::InterfaceNotFound { name: name.to_string() });
    }
    Ok(idx as i32)
}

pub struct Client {
    connection: Connection,
}

impl Client {
    pub fn open() -> Result<Self> {
        Ok(Self { connection: Connection::new()? })
    }

    pub async fn get_qdiscs(&self, ifindex: i32) -> Result<Vec<TcObject>> {
        // TC dump requests require a tcmsg header; the kernel rejects a bare
        // nlmsghdr with -EINVAL.
        let mut builder = connection::dump_request(NlMsgType::RTM_GETQDISC);
        builder.append_bytes(&tc_header::write(ifindex, 0, 0, 0));
        let payloads = self.connection.request_dump(builder, "get qdiscs").await?;
        Ok(payloads
            .iter()
            .filter_map(|p| parse_object(p, true).ok())
            .filter(|o| o.ifindex == ifindex)
            .collect())
    }

    pub async fn get_classes(&self, ifindex: i32) -> Result<Vec<TcObject>> {
        let mut builder = connection::dump_request(NlMsgType::RTM_GETTCLASS);
        builder.append_bytes(&tc_header::write(ifindex, 0, 0, 0));
        let payloads = self.connection.request_dump(builder, "get classes").await?;
        Ok(payloads
            .iter()
            .filter_map(|p| parse_object(p, false).ok())
            .filter(|o| o.ifindex == ifindex)
            .collect())
    }

    pub async fn get_filters(&self, ifindex: i32, parent: u32) -> Result<Vec<TcObject>> {
        let mut builder = connection::dump_request(NlMsgType::RTM_GETTFILTER);
        builder.append_bytes(&tc_header::write(ifindex, 0, parent, 0));
        let payloads = self.connection.request_dump(builder, "get filters").await?;
        Ok(payloads
            .iter()
            .filter_map(|p| parse_object(p, false).ok())
            .filter(|o| o.ifindex == ifindex && o.parent == parent)
            .collect())
    }

    pub async fn replace_qdisc(&self, object: &TcObject) -> Result<()> {
        self.send(NlMsgType::RTM_NEWQDISC, object, "replace qdisc").await
    }

    pub async fn delete_qdisc(&self, object: &TcObject) -> Result<()> {
        self.send_delete(NlMsgType::RTM_DELQDISC, object, "delete qdisc").await
    }

    pub async fn replace_class(&self, object: &TcObject) -> Result<()> {
        self.send(NlMsgType::RTM_NEWTCLASS, object, "replace class").await
    }

    pub async fn delete_class(&self, object: &TcObject) -> Result<()> {
        self.send_delete(NlMsgType::RTM_DELTCLASS, object, "delete class").await
    }

    pub async fn replace_filter(&self, object: &TcObject) -> Result<()> {
        self.send(NlMsgType::RTM_NEWTFILTER, object, "replace filter").await
    }

    pub async fn delete_filter(&self, object: &TcObject) -> Result<()> {
        self.send_delete(NlMsgType::RTM_DELTFILTER, object, "delete filter").await
    }

    async fn send(&self, msg_type: u16, object: &TcObject, operation: &str) -> Result<()> {
        let builder = build_message(connection::replace_request(msg_type), object);
        self.connection.request_ack(builder, operation).await
    }

    async fn send_delete(&self, msg_type: u16, object: &TcObject, operation: &str) -> Result<()> {
        let builder = build_message(connection::ack_request(msg_type), object);
        self.connection.request_ack(builder, operation).await
    }
}

fn build_message(mut builder: crate::netlink::builder::MessageBuilder, object: &TcObject) -> crate::netlink::builder::MessageBuilder {
    builder.append_bytes(&tc_header::write(object.ifindex, object.handle, object.parent, object.info));
    builder.append_attr_str(TCA_KIND, object.kind());
    object.payload.write_options(&mut builder, TCA_OPTIONS);
    builder
}

fn parse_object(payload: &[u8], is_qdisc: bool) -> Result<TcObject> {
    let header = tc_header::parse(payload)?;
    let mut kind: Option<String> = None;
    let mut options: &[u8] = &[];

    for (attr_kind, attr_payload) in AttrIter::new(&payload[tc_header::LEN..]) {
        match attr_kind {
            k if k == TCA_KIND => kind = get::string(attr_payload).ok().map(str::to_string),
            k if k == TCA_OPTIONS => options = attr_payload,
            _ => {}
        }
    }

    let kind = kind.ok_or_else(|| Error::InvalidMessage("tc message missing TCA_KIND".into()))?;
    let attribute = if kind == "hfsc" {
        AttributePayload::parse_hfsc(is_qdisc, options)
    } else {
        AttributePayload::parse(&kind, options).ok_or_else(|| Error::InvalidAttribute(format!("unsupported kind {kind:?}")))?
    };

    Ok(TcObject {
        family: 0,
        ifindex: header.ifindex,
        handle: header.handle,
        parent: header.parent,
        info: header.info,
        payload: attribute,
    })
}

impl ReconcileClient for Client {
    async fn replace(&self, node_type: NodeType, object: &TcObject) -> Result<()> {
        match node_type {
            NodeType::Qdisc => self.replace_qdisc(object).await,
            NodeType::Class => self.replace_class(object).await,
            NodeType::Filter => self.replace_filter(object).await,
        }
    }

    async fn delete(&self, node_type: NodeType, object: &TcObject) -> Result<()> {
        match node_type {
            NodeType::Qdisc => self.delete_qdisc(object).await,
            NodeType::Class => self.delete_class(object).await,
            NodeType::Filter => self.delete_filter(object).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{FqCodelOpts, HfscQdiscOpts};

    #[test]
    fn build_message_roundtrips_kind_and_options() {
        let object = TcObject::new(
            3,
            0x0001_0000,
            crate::handle::ROOT,
            AttributePayload::FqCodel(FqCodelOpts {
                target: Some(5000),
                ..Default::default()
            }),
        );
        let builder = build_message(crate::netlink::connection::replace_request(NlMsgType::RTM_NEWQDISC), &object);
        let bytes = builder.finish();
        let payload = &bytes[crate::netlink::message::NLMSG_HDRLEN..];
        let parsed = parse_object(payload, true).unwrap();
        assert_eq!(parsed.ifindex, 3);
        assert_eq!(parsed.handle, 0x0001_0000);
        assert_eq!(parsed.kind(), "fq_codel");
        match parsed.payload {
            AttributePayload::FqCodel(opts) => assert_eq!(opts.target, Some(5000)),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn build_message_disambiguates_hfsc_by_caller_context() {
        let object = TcObject::new(
            1,
            0x0001_0000,
            crate::handle::ROOT,
            AttributePayload::HfscQdisc(HfscQdiscOpts { defcls: 2 }),
        );
        let builder = build_message(crate::netlink::connection::replace_request(NlMsgType::RTM_NEWQDISC), &object);
        let bytes = builder.finish();
        let payload = &bytes[crate::netlink::message::NLMSG_HDRLEN..];
        let parsed = parse_object(payload, true).unwrap();
        match parsed.payload {
            AttributePayload::HfscQdisc(opts) => assert_eq!(opts.defcls, 2),
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
