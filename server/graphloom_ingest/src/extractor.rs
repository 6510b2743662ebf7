//! HTTP client for the external candidate-extraction service.
//!
//! The service contract is loose by design: responses are walked as generic
//! JSON, alias keys (`"name"`/`"text"`, `"relation"`/`"type"`) are accepted,
//! and anything malformed degrades to an empty candidate list. `Err` is
//! reserved for transport failures and non-2xx statuses; the rest of the
//! engine only ever sees the strict [`ExtractedEntity`] / [`ExtractedRelation`]
//! structs produced here.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tracing::debug;

use graphloom_config::ExtractionSettings;

use crate::{ExtractedEntity, ExtractedRelation, ExtractionClient};

/// Default confidence for relations whose extraction omits the field.
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Blocking HTTP client for the extraction service.
pub struct HttpExtractionClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
}

impl HttpExtractionClient {
    /// Creates a client for the service at `endpoint` (scheme + host + port,
    /// no trailing path). An empty `api_key` disables bearer auth.
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .user_agent("graphloom-ingest/0.1")
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            client,
            endpoint: trim_endpoint(endpoint),
            api_key: api_key.to_string(),
        }
    }

    /// Creates a client from the `[extraction]` config section.
    pub fn from_settings(settings: &ExtractionSettings) -> Self {
        Self::new(
            &settings.endpoint,
            &settings.api_key,
            Duration::from_secs(settings.timeout_secs),
        )
    }

    /// POST a JSON payload and return the decoded response body. A body that
    /// is not valid JSON is a malformed response, not an error: it decodes to
    /// `Value::Null`, which the parsers turn into an empty candidate list.
    fn post(&self, path: &str, payload: &Value) -> Result<Value> {
        let url = format!("{}{}", self.endpoint, path);
        let mut request = self.client.post(&url).json(payload);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let resp = request
            .send()
            .with_context(|| format!("extraction service request to {} failed", url))?;
        if !resp.status().is_success() {
            bail!("extraction service error on {}: {}", url, resp.status());
        }

        match resp.json() {
            Ok(value) => Ok(value),
            Err(err) => {
                debug!("Non-JSON response from {}: {:#}", url, err);
                Ok(Value::Null)
            }
        }
    }
}

impl ExtractionClient for HttpExtractionClient {
    fn extract_entities(
        &self,
        text: &str,
        entity_types: &[String],
    ) -> Result<Vec<ExtractedEntity>> {
        let payload = json!({ "text": text, "entityTypes": entity_types });
        let value = self.post("/extract/entities", &payload)?;
        Ok(parse_entities(&value))
    }

    fn extract_relations(
        &self,
        text: &str,
        entity_names: &[String],
    ) -> Result<Vec<ExtractedRelation>> {
        let payload = json!({ "text": text, "entityNames": entity_names });
        let value = self.post("/extract/relations", &payload)?;
        Ok(parse_relations(&value))
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn trim_endpoint(endpoint: &str) -> String {
    endpoint.trim().trim_end_matches('/').to_string()
}

/// The candidate array may be the top-level value or sit under a wrapper key
/// (`"entities"`, `"relations"`, or a generic `"results"`).
fn candidate_array<'a>(value: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    if let Some(items) = value.as_array() {
        return Some(items);
    }
    value
        .get(key)
        .and_then(Value::as_array)
        .or_else(|| value.get("results").and_then(Value::as_array))
}

/// First non-empty trimmed string among the alias keys.
fn text_field(item: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = item.get(*key).and_then(Value::as_str) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Parse an entity-extraction response. Items missing a usable name or type
/// are skipped; a response with no recognizable array yields an empty list.
pub(crate) fn parse_entities(value: &Value) -> Vec<ExtractedEntity> {
    let Some(items) = candidate_array(value, "entities") else {
        return Vec::new();
    };

    let mut entities = Vec::new();
    for item in items {
        let Some(name) = text_field(item, &["name", "text"]) else {
            continue;
        };
        let Some(entity_type) = text_field(item, &["type", "entityType", "entity_type"]) else {
            continue;
        };
        let description = text_field(item, &["description"]).unwrap_or_default();
        entities.push(ExtractedEntity {
            name,
            entity_type,
            description,
        });
    }
    entities
}

/// Parse a relation-extraction response. Items missing head, tail or type are
/// skipped; a missing confidence defaults to [`DEFAULT_CONFIDENCE`] and all
/// values are clamped to [0, 1].
pub(crate) fn parse_relations(value: &Value) -> Vec<ExtractedRelation> {
    let Some(items) = candidate_array(value, "relations") else {
        return Vec::new();
    };

    let mut relations = Vec::new();
    for item in items {
        let Some(head) = text_field(item, &["head", "source"]) else {
            continue;
        };
        let Some(tail) = text_field(item, &["tail", "target"]) else {
            continue;
        };
        let Some(relation_type) = text_field(item, &["relation", "relationType", "type"]) else {
            continue;
        };
        let description = text_field(item, &["description"]).unwrap_or_default();
        let confidence = item
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c.clamp(0.0, 1.0) as f32)
            .unwrap_or(DEFAULT_CONFIDENCE);
        relations.push(ExtractedRelation {
            head,
            relation_type,
            tail,
            description,
            confidence,
        });
    }
    relations
}
