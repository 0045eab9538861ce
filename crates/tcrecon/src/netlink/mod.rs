//! Minimal async netlink primitives: message/attribute framing, a TLV builder,
//! and a connection over `NETLINK_ROUTE` used to drive the TC hierarchy.

pub mod attr;
pub mod builder;
pub mod connection;
pub mod error;
pub mod message;
pub mod socket;

pub use attr::{AttrIter, NlAttr};
pub use builder::{MessageBuilder, NestToken};
pub use connection::Connection;
pub use error::{Error, Result};
pub use message::{MessageIter, NLMSG_HDRLEN, NlMsgHdr, NlMsgType};
pub use socket::NetlinkSocket;
