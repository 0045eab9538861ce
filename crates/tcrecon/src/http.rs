//! REST surface: thin JSON translation over the object model, routed by
//! interface name and handle string.

use axum::Json;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::attribute::AttributePayload;
use crate::client::{self, Client};
use crate::handle;
use crate::netlink::error::Error;
use crate::node::NodeType;
use crate::object::TcObject;

pub fn router() -> Router {
    Router::new()
        .route("/api/v1/tc/:interface", get(list_handler).post(create_handler))
        .route(
            "/api/v1/tc/:interface/:handle",
            get(get_handler).put(put_handler).delete(delete_handler),
        )
        .route("/healthz", get(healthz))
}

async fn healthz() -> &'static str {
    "ok"
}

/// Wire shape: `{name?, type, interface, handle, parent?, attr}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TcObjectJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub interface: String,
    #[serde(with = "handle_str")]
    pub handle: u32,
    #[serde(with = "handle_str", default = "root", skip_serializing_if = "is_root")]
    pub parent: u32,
    pub attr: AttributePayload,
}

fn root() -> u32 {
    handle::ROOT
}

fn is_root(h: &u32) -> bool {
    *h == handle::ROOT
}

mod handle_str {
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

impl TcObjectJson {
    fn from_object(node_type: NodeType, interface: &str, object: &TcObject) -> Self {
        Self {
            name: None,
            node_type,
            interface: interface.to_string(),
            handle: object.handle,
            parent: object.parent,
            attr: object.payload.clone(),
        }
    }

    fn into_object(self, ifindex: i32) -> (NodeType, TcObject) {
        (self.node_type, TcObject::new(ifindex, self.handle, self.parent, self.attr))
    }
}

pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Config(_) | Error::HandleParse(_) | Error::Json(_) | Error::InvalidAttribute(_) => StatusCode::BAD_REQUEST,
            Error::InterfaceNotFound { .. } | Error::QdiscNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

async fn resolve_ifindex(interface: &str) -> Result<i32, ApiError> {
    client::ifindex_for(interface).map_err(ApiError::from)
}

async fn list_objects(interface: &str) -> Result<Vec<TcObjectJson>, ApiError> {
    let ifindex = resolve_ifindex(interface).await?;
    let c = Client::open().map_err(ApiError::from)?;

    let qdiscs = c.get_qdiscs(ifindex).await.map_err(ApiError::from)?;
    let classes = c.get_classes(ifindex).await.map_err(ApiError::from)?;

    let mut out: Vec<TcObjectJson> = Vec::new();
    for q in &qdiscs {
        out.push(TcObjectJson::from_object(NodeType::Qdisc, interface, q));
        let filters = c.get_filters(ifindex, q.handle).await.map_err(ApiError::from)?;
        out.extend(filters.iter().map(|f| TcObjectJson::from_object(NodeType::Filter, interface, f)));
    }
    out.extend(classes.iter().map(|cl| TcObjectJson::from_object(NodeType::Class, interface, cl)));

    Ok(out)
}

async fn list_handler(Path(interface): Path<String>) -> Result<Json<Vec<TcObjectJson>>, ApiError> {
    tracing::info!(interface, "list tc objects");
    Ok(Json(list_objects(&interface).await?))
}

async fn create_handler(Path(interface): Path<String>, Json(objects): Json<Vec<TcObjectJson>>) -> Result<StatusCode, ApiError> {
    tracing::info!(interface, count = objects.len(), "apply tc objects");
    let ifindex = resolve_ifindex(&interface).await?;
    let c = Client::open().map_err(ApiError::from)?;
    for json in objects {
        let (node_type, object) = json.into_object(ifindex);
        replace_by_type(&c, node_type, &object).await?;
    }
    Ok(StatusCode::CREATED)
}

async fn get_handler(Path((interface, handle_str)): Path<(String, String)>) -> Result<Json<TcObjectJson>, ApiError> {
    let h = handle::parse(&handle_str).map_err(ApiError::from)?;
    let (node_type, object) = find_by_handle(&interface, h).await?;
    Ok(Json(TcObjectJson::from_object(node_type, &interface, &object)))
}

async fn put_handler(
    Path((interface, handle_str)): Path<(String, String)>,
    Json(json): Json<TcObjectJson>,
) -> Result<StatusCode, ApiError> {
    let h = handle::parse(&handle_str).map_err(ApiError::from)?;
    let ifindex = resolve_ifindex(&interface).await?;
    let c = Client::open().map_err(ApiError::from)?;
    let (node_type, mut object) = json.into_object(ifindex);
    object.handle = h;
    tracing::info!(interface, handle = %handle_str, "replace tc object");
    replace_by_type(&c, node_type, &object).await?;
    Ok(StatusCode::OK)
}

async fn delete_handler(Path((interface, handle_str)): Path<(String, String)>) -> Result<StatusCode, ApiError> {
    let h = handle::parse(&handle_str).map_err(ApiError::from)?;
    let (node_type, object) = find_by_handle(&interface, h).await?;
    let c = Client::open().map_err(ApiError::from)?;
    tracing::info!(interface, handle = %handle_str, "delete tc object");
    match node_type {
        NodeType::Qdisc => c.delete_qdisc(&object).await,
        NodeType::Class => c.delete_class(&object).await,
        NodeType::Filter => c.delete_filter(&object).await,
    }
    .map_err(ApiError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn replace_by_type(c: &Client, node_type: NodeType, object: &TcObject) -> Result<(), ApiError> {
    match node_type {
        NodeType::Qdisc => c.replace_qdisc(object).await,
        NodeType::Class => c.replace_class(object).await,
        NodeType::Filter => c.replace_filter(object).await,
    }
    .map_err(ApiError::from)
}

async fn find_by_handle(interface: &str, h: u32) -> Result<(NodeType, TcObject), ApiError> {
    let ifindex = resolve_ifindex(interface).await?;
    let c = Client::open().map_err(ApiError::from)?;

    for q in c.get_qdiscs(ifindex).await.map_err(ApiError::from)? {
        if q.handle == h {
            return Ok((NodeType::Qdisc, q));
        }
        for f in c.get_filters(ifindex, q.handle).await.map_err(ApiError::from)? {
            if f.handle == h {
                return Ok((NodeType::Filter, f));
            }
        }
    }
    for cl in c.get_classes(ifindex).await.map_err(ApiError::from)? {
        if cl.handle == h {
            return Ok((NodeType::Class, cl));
        }
    }

    Err(ApiError::from(Error::QdiscNotFound {
        kind: "unknown".to_string(),
        interface: interface.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tc_object_json_round_trips_hex_handle() {
        let json = serde_json::json!({
            "type": "qdisc",
            "interface": "eth0",
            "handle": "1:0",
            "attr": { "kind": "fq_codel", "attr": {} }
        });
        let parsed: TcObjectJson = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.handle, 0x0001_0000);
        assert_eq!(parsed.parent, handle::ROOT);
    }
}
