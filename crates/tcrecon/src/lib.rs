//! A declarative controller for a Linux traffic-control hierarchy: parses
//! configuration or QoS templates into a tree of qdiscs/classes/filters,
//! reconciles it against the kernel via rtnetlink, and exposes an HTTP API
//! for direct object manipulation.

pub mod attribute;
pub mod client;
pub mod config;
pub mod handle;
pub mod http;
pub mod netlink;
pub mod node;
pub mod object;
pub mod qos;
pub mod reconcile;
