//! Domain operations understood by the reference server.
//!
//! Every queued operation targets one entity in a named collection:
//!
//! | type            | request                                        |
//! |-----------------|------------------------------------------------|
//! | `entity.create` | `POST   /api/entities/{collection}`            |
//! | `entity.update` | `PUT    /api/entities/{collection}/{entityId}` |
//! | `entity.delete` | `DELETE /api/entities/{collection}/{entityId}` |

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};

use driftsync_core::executor::{RequestResolver, ResolveError, SyncRequest};
use driftsync_core::queue::{NewOperation, QueuedOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "entity.create",
            OperationKind::Update => "entity.update",
            OperationKind::Delete => "entity.delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entity.create" => Ok(OperationKind::Create),
            "entity.update" => Ok(OperationKind::Update),
            "entity.delete" => Ok(OperationKind::Delete),
            other => Err(format!("Unknown operation type: {}", other)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EntityPayload {
    collection: String,
    #[serde(default)]
    data: Value,
}

/// Builds a queue entry for an entity change.
pub fn entity_operation(
    kind: OperationKind,
    collection: &str,
    entity_id: Option<String>,
    entity_version: Option<i64>,
    data: Value,
) -> Result<NewOperation, String> {
    validate_segment("collection", collection)?;
    if let Some(id) = &entity_id {
        validate_segment("entity id", id)?;
    }
    if kind != OperationKind::Create && entity_id.is_none() {
        return Err(format!("{} requires an entity id", kind));
    }

    let mut operation = NewOperation::new(
        kind.as_str(),
        json!({ "collection": collection, "data": data }),
    );
    if let Some(id) = entity_id {
        operation = operation.with_entity(id, entity_version);
    }
    Ok(operation)
}

fn validate_segment(what: &str, value: &str) -> Result<(), String> {
    if value.is_empty() || value.contains('/') {
        return Err(format!("Invalid {}: '{}'", what, value));
    }
    Ok(())
}

/// Maps `entity.*` operations to reference server requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct EntityResolver;

impl RequestResolver for EntityResolver {
    fn resolve(&self, operation: &QueuedOperation) -> Result<SyncRequest, ResolveError> {
        let kind: OperationKind = operation
            .kind
            .parse()
            .map_err(|_| ResolveError::UnknownKind(operation.kind.clone()))?;
        let payload: EntityPayload = serde_json::from_value(operation.payload.clone())
            .map_err(|e| ResolveError::InvalidPayload(e.to_string()))?;
        validate_segment("collection", &payload.collection).map_err(ResolveError::InvalidPayload)?;

        let collection = urlencoding::encode(&payload.collection);
        let entity_path = || match &operation.entity_id {
            Some(id) => Ok(format!(
                "/api/entities/{}/{}",
                collection,
                urlencoding::encode(id)
            )),
            None => Err(ResolveError::InvalidPayload(format!(
                "{} without an entity id",
                kind
            ))),
        };

        let request = match kind {
            OperationKind::Create => {
                let mut body = json!({ "data": payload.data });
                if let Some(id) = &operation.entity_id {
                    body["id"] = json!(id);
                }
                SyncRequest::new(Method::POST, format!("/api/entities/{}", collection))
                    .with_body(body)
            }
            OperationKind::Update => SyncRequest::new(Method::PUT, entity_path()?).with_body(
                json!({ "data": payload.data, "entityVersion": operation.entity_version }),
            ),
            OperationKind::Delete => {
                let request = SyncRequest::new(Method::DELETE, entity_path()?);
                match operation.entity_version {
                    Some(version) => request.with_body(json!({ "entityVersion": version })),
                    None => request,
                }
            }
        };

        Ok(request)
    }
}
