//! Graph gateway client
//!
//! Strict parameterized GraphQL over HTTP. Every string parameter is
//! sanitised before it is sent, and error bodies are truncated before
//! they can reach a log line or an LLM prompt.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::ContextError;
use crate::types::Decision;

/// Largest error body surfaced to callers
const MAX_ERROR_BODY: usize = 4096;

/// Traversal depth is clamped to this range
const DEPTH_RANGE: (u32, u32) = (1, 3);

const ENTITIES_BY_PREFIX_QUERY: &str = r"query($prefix: String!) {
  entities(filter: { predicatePrefix: $prefix }) { id triples { predicate object } }
}";

const ENTITY_QUERY: &str = r"query($id: String!) {
  entity(id: $id) { id triples { predicate object } }
}";

const TRAVERSE_QUERY: &str = r"query($start: String!, $depth: Int!, $direction: TraversalDirection!, $predicate: String) {
  traverse(start: $start, depth: $depth, direction: $direction, predicate: $predicate) {
    nodes { id triples { predicate object } }
  }
}";

const ENTITIES_BY_PREDICATE_VALUE_QUERY: &str = r"query($predicate: String!, $value: String!) {
  entities(filter: { predicate: $predicate, value: $value }) { id triples { predicate object } }
}";

/// One predicate/object pair on an entity
#[derive(Debug, Clone, Deserialize)]
pub struct Triple {
    pub predicate: String,
    pub object: String,
}

/// A graph entity with its triples
#[derive(Debug, Clone, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(default)]
    pub triples: Vec<Triple>,
}

impl Entity {
    /// First object for a predicate, if any
    pub fn first(&self, predicate: &str) -> Option<&str> {
        self.triples
            .iter()
            .find(|t| t.predicate == predicate)
            .map(|t| t.object.as_str())
    }

    /// All objects for a predicate, in triple order
    pub fn all(&self, predicate: &str) -> Vec<&str> {
        self.triples
            .iter()
            .filter(|t| t.predicate == predicate)
            .map(|t| t.object.as_str())
            .collect()
    }
}

/// Direction of a graph traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalDirection {
    Inbound,
    Outbound,
}

impl TraversalDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraversalDirection::Inbound => "INBOUND",
            TraversalDirection::Outbound => "OUTBOUND",
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphErrorItem>>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorItem {
    message: String,
}

/// HTTP client for the graph gateway's GraphQL surface
#[derive(Debug, Clone)]
pub struct GraphClient {
    base_url: String,
    http: reqwest::Client,
}

impl GraphClient {
    /// Create a client for a gateway base URL (without `/graphql`)
    pub fn new(base_url: impl Into<String>) -> Result<Self, ContextError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Strip NUL bytes and escape backslashes in a string parameter.
    ///
    /// Parameters already travel as GraphQL variables; this is a second
    /// layer for gateways that log or re-embed them.
    pub fn sanitize(input: &str) -> String {
        input.replace('\0', "").replace('\\', "\\\\")
    }

    /// Execute a parameterized query and return the `data` value
    pub async fn execute_query(&self, query: &str, variables: Value) -> Result<Value, ContextError> {
        let url = format!("{}/graphql", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ContextError::Graph(format!(
                "status {}: {}",
                status.as_u16(),
                truncate_body(&body)
            )));
        }

        let parsed: GraphResponse = response.json().await?;
        if let Some(errors) = parsed.errors
            && !errors.is_empty()
        {
            let joined = errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ContextError::Graph(truncate_body(&joined)));
        }

        parsed
            .data
            .ok_or_else(|| ContextError::Graph("response carried no data".to_string()))
    }

    /// All entities whose id starts with a predicate prefix
    pub async fn query_entities_by_predicate(&self, prefix: &str) -> Result<Vec<Entity>, ContextError> {
        let data = self
            .execute_query(
                ENTITIES_BY_PREFIX_QUERY,
                json!({ "prefix": Self::sanitize(prefix) }),
            )
            .await?;
        parse_entities(&data["entities"])
    }

    /// One entity by id
    pub async fn get_entity(&self, id: &str) -> Result<Option<Entity>, ContextError> {
        let data = self
            .execute_query(ENTITY_QUERY, json!({ "id": Self::sanitize(id) }))
            .await?;
        if data["entity"].is_null() {
            return Ok(None);
        }
        let entity: Entity = serde_json::from_value(data["entity"].clone())?;
        Ok(Some(entity))
    }

    /// Fetch an entity together with related context.
    ///
    /// `depth` is accepted for forward compatibility with recursive
    /// hydration and is currently ignored.
    pub async fn hydrate_entity(&self, id: &str, _depth: u32) -> Result<Option<Entity>, ContextError> {
        self.get_entity(id).await
    }

    /// Walk the graph from a start entity. Depth is clamped to [1, 3].
    pub async fn traverse(
        &self,
        start: &str,
        predicate: Option<&str>,
        direction: TraversalDirection,
        depth: u32,
    ) -> Result<Vec<Entity>, ContextError> {
        let depth = depth.clamp(DEPTH_RANGE.0, DEPTH_RANGE.1);
        let data = self
            .execute_query(
                TRAVERSE_QUERY,
                json!({
                    "start": Self::sanitize(start),
                    "depth": depth,
                    "direction": direction.as_str(),
                    "predicate": predicate.map(Self::sanitize),
                }),
            )
            .await?;
        parse_entities(&data["traverse"]["nodes"])
    }

    /// Entities with an exact predicate/value match
    pub async fn entities_by_predicate_value(
        &self,
        predicate: &str,
        value: &str,
    ) -> Result<Vec<Entity>, ContextError> {
        let data = self
            .execute_query(
                ENTITIES_BY_PREDICATE_VALUE_QUERY,
                json!({
                    "predicate": Self::sanitize(predicate),
                    "value": Self::sanitize(value),
                }),
            )
            .await?;
        parse_entities(&data["entities"])
    }

    /// Engineering decisions recorded for a project
    pub async fn decisions_for_project(&self, project: &str) -> Result<Vec<Decision>, ContextError> {
        let entities = self.entities_by_predicate_value("source.project", project).await?;
        Ok(entities.iter().map(decision_from_entity).collect())
    }

    /// Single readiness probe
    pub async fn ping(&self) -> Result<(), ContextError> {
        self.execute_query("query { __typename }", json!({})).await?;
        Ok(())
    }

    /// Probe readiness with exponential back-off and jitter.
    ///
    /// Returns once the gateway answers, or with the last error after
    /// `attempts` probes.
    pub async fn wait_ready(&self, attempts: u32) -> Result<(), ContextError> {
        let mut delay = Duration::from_millis(250);
        let mut last = None;

        for attempt in 1..=attempts.max(1) {
            match self.ping().await {
                Ok(()) => {
                    debug!(attempt, "graph gateway ready");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "graph gateway not ready");
                    last = Some(e);
                }
            }
            if attempt < attempts {
                let jitter = rand::rng().random_range(0..250);
                tokio::time::sleep(delay + Duration::from_millis(jitter)).await;
                delay = (delay * 2).min(Duration::from_secs(10));
            }
        }

        Err(last.unwrap_or_else(|| ContextError::Graph("unreachable".to_string())))
    }
}

fn parse_entities(value: &Value) -> Result<Vec<Entity>, ContextError> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let entities: Vec<Entity> = serde_json::from_value(value.clone())?;
    Ok(entities)
}

fn decision_from_entity(entity: &Entity) -> Decision {
    let get = |p: &str| entity.first(p).unwrap_or_default().to_string();
    Decision {
        id: entity.id.clone(),
        kind: get("decision.type"),
        file: get("decision.file"),
        commit: get("decision.commit"),
        message: get("decision.message"),
        branch: get("decision.branch"),
        agent: get("decision.agent"),
        loop_id: get("decision.loop"),
        operation: get("decision.operation"),
        timestamp: entity
            .first("decision.timestamp")
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&chrono::Utc)),
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut cut = MAX_ERROR_BODY;
    while cut > 0 && !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... [truncated]", &body[..cut])
}
