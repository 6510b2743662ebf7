//! # Graphloom Configuration
//!
//! TOML configuration for the Graphloom ingestion engine, with environment
//! variable overrides and validation.
//!
//! Loading precedence (later wins):
//! 1. Struct defaults
//! 2. TOML file values
//! 3. `GRAPHLOOM_*` environment variables
//!
//! ```no_run
//! use graphloom_config::GraphloomConfig;
//!
//! let config = GraphloomConfig::from_file("graphloom.toml").unwrap();
//! assert!(config.resolution.local_merge_threshold > 0.0);
//! ```

use serde::{Deserialize, Serialize};

/// Root configuration for the Graphloom engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphloomConfig {
    /// Ingestion pipeline settings.
    pub ingestion: IngestionSettings,
    /// Entity resolution and merge settings.
    pub resolution: ResolutionSettings,
    /// Entity and relation type taxonomies.
    pub taxonomy: TaxonomySettings,
    /// External candidate-extraction service settings.
    pub extraction: ExtractionSettings,
}

// ---------------------------------------------------------------------------
// [ingestion]
// ---------------------------------------------------------------------------

/// Ingestion pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSettings {
    /// Chunking strategy: "full_document", "paragraph" or "sentence"
    /// (default: "paragraph").
    #[serde(default = "default_chunk_strategy")]
    pub chunk_strategy: String,
    /// Maximum concurrent extraction calls per document (default: 4).
    #[serde(default = "default_max_concurrent_extractions")]
    pub max_concurrent_extractions: usize,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            chunk_strategy: default_chunk_strategy(),
            max_concurrent_extractions: default_max_concurrent_extractions(),
        }
    }
}

fn default_chunk_strategy() -> String {
    "paragraph".to_string()
}
fn default_max_concurrent_extractions() -> usize {
    4
}

// ---------------------------------------------------------------------------
// [resolution]
// ---------------------------------------------------------------------------

/// Entity resolution and merge settings.
///
/// The two similarity thresholds are deliberately independent: candidates
/// within one document are held to a stricter bar (0.92) than candidates
/// matched against the persisted graph (0.90), where names tend to be
/// paraphrased across documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionSettings {
    /// Similarity threshold for merging candidates within one document
    /// (default: 0.92).
    #[serde(default = "default_local_merge_threshold")]
    pub local_merge_threshold: f64,
    /// Similarity threshold for matching candidates against persisted
    /// entities (default: 0.90).
    #[serde(default = "default_graph_merge_threshold")]
    pub graph_merge_threshold: f64,
    /// Maximum number of existing entities loaded per document for
    /// resolution (default: 10000).
    #[serde(default = "default_max_existing_entities")]
    pub max_existing_entities: usize,
    /// Attempts per entity write when conditional updates hit version
    /// conflicts (default: 5).
    #[serde(default = "default_update_retry_limit")]
    pub update_retry_limit: usize,
    /// Collapse duplicate relation triples on the surviving entity after a
    /// manual merge (default: false, matching the historical behavior of
    /// leaving duplicates in place).
    #[serde(default)]
    pub dedup_relations_after_merge: bool,
}

impl Default for ResolutionSettings {
    fn default() -> Self {
        Self {
            local_merge_threshold: default_local_merge_threshold(),
            graph_merge_threshold: default_graph_merge_threshold(),
            max_existing_entities: default_max_existing_entities(),
            update_retry_limit: default_update_retry_limit(),
            dedup_relations_after_merge: false,
        }
    }
}

fn default_local_merge_threshold() -> f64 {
    0.92
}
fn default_graph_merge_threshold() -> f64 {
    0.90
}
fn default_max_existing_entities() -> usize {
    10_000
}
fn default_update_retry_limit() -> usize {
    5
}

// ---------------------------------------------------------------------------
// [taxonomy]
// ---------------------------------------------------------------------------

/// Entity and relation type taxonomies.
///
/// Entity types guide the extractor; stored entities may carry types outside
/// the current list (taxonomies evolve, entities persist). Relation types are
/// enforced: a candidate relation with a type outside the list is dropped
/// during validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomySettings {
    /// Entity types requested from the extractor.
    #[serde(default = "default_entity_types")]
    pub entity_types: Vec<String>,
    /// Relation types accepted during validation.
    #[serde(default = "default_relation_types")]
    pub relation_types: Vec<String>,
}

impl Default for TaxonomySettings {
    fn default() -> Self {
        Self {
            entity_types: default_entity_types(),
            relation_types: default_relation_types(),
        }
    }
}

fn default_entity_types() -> Vec<String> {
    vec![
        "person".to_string(),
        "organization".to_string(),
        "location".to_string(),
        "material".to_string(),
        "equipment".to_string(),
        "concept".to_string(),
    ]
}

fn default_relation_types() -> Vec<String> {
    vec![
        "causes".to_string(),
        "part_of".to_string(),
        "located_in".to_string(),
        "produces".to_string(),
        "supplies".to_string(),
        "uses".to_string(),
    ]
}

// ---------------------------------------------------------------------------
// [extraction]
// ---------------------------------------------------------------------------

/// External candidate-extraction service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Base URL of the extraction service (default: "http://localhost:8600").
    /// The client posts to `{endpoint}/extract/entities` and
    /// `{endpoint}/extract/relations`.
    #[serde(default = "default_extraction_endpoint")]
    pub endpoint: String,
    /// Bearer token for the extraction service. Empty disables auth.
    /// Prefer the `GRAPHLOOM_EXTRACTION_API_KEY` env var over TOML.
    #[serde(default)]
    pub api_key: String,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_extraction_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            endpoint: default_extraction_endpoint(),
            api_key: String::new(),
            timeout_secs: default_extraction_timeout_secs(),
        }
    }
}

fn default_extraction_endpoint() -> String {
    "http://localhost:8600".to_string()
}
fn default_extraction_timeout_secs() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Loading, overrides, validation
// ---------------------------------------------------------------------------

impl GraphloomConfig {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides and validate.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
        Self::parse_toml(&contents)
    }

    /// Parse configuration from a TOML string, apply env overrides, then
    /// validate.
    pub fn parse_toml(toml_str: &str) -> anyhow::Result<Self> {
        let mut config: GraphloomConfig = toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML config: {}", e))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Variables use the `GRAPHLOOM_` prefix with `_` as section separator:
    /// - `GRAPHLOOM_INGESTION_CHUNK_STRATEGY` → `ingestion.chunk_strategy`
    /// - `GRAPHLOOM_INGESTION_MAX_CONCURRENT_EXTRACTIONS` → `ingestion.max_concurrent_extractions`
    /// - `GRAPHLOOM_RESOLUTION_LOCAL_MERGE_THRESHOLD` → `resolution.local_merge_threshold`
    /// - `GRAPHLOOM_RESOLUTION_GRAPH_MERGE_THRESHOLD` → `resolution.graph_merge_threshold`
    /// - `GRAPHLOOM_RESOLUTION_MAX_EXISTING_ENTITIES` → `resolution.max_existing_entities`
    /// - `GRAPHLOOM_RESOLUTION_UPDATE_RETRY_LIMIT` → `resolution.update_retry_limit`
    /// - `GRAPHLOOM_RESOLUTION_DEDUP_RELATIONS_AFTER_MERGE` → `resolution.dedup_relations_after_merge`
    /// - `GRAPHLOOM_EXTRACTION_ENDPOINT` → `extraction.endpoint`
    /// - `GRAPHLOOM_EXTRACTION_API_KEY` → `extraction.api_key`
    /// - `GRAPHLOOM_EXTRACTION_TIMEOUT_SECS` → `extraction.timeout_secs`
    pub fn apply_env_overrides(&mut self) {
        // Ingestion overrides
        if let Ok(v) = std::env::var("GRAPHLOOM_INGESTION_CHUNK_STRATEGY") {
            self.ingestion.chunk_strategy = v;
        }
        if let Ok(v) = std::env::var("GRAPHLOOM_INGESTION_MAX_CONCURRENT_EXTRACTIONS") {
            if let Ok(n) = v.parse::<usize>() {
                self.ingestion.max_concurrent_extractions = n;
            }
        }

        // Resolution overrides
        if let Ok(v) = std::env::var("GRAPHLOOM_RESOLUTION_LOCAL_MERGE_THRESHOLD") {
            if let Ok(t) = v.parse::<f64>() {
                self.resolution.local_merge_threshold = t;
            }
        }
        if let Ok(v) = std::env::var("GRAPHLOOM_RESOLUTION_GRAPH_MERGE_THRESHOLD") {
            if let Ok(t) = v.parse::<f64>() {
                self.resolution.graph_merge_threshold = t;
            }
        }
        if let Ok(v) = std::env::var("GRAPHLOOM_RESOLUTION_MAX_EXISTING_ENTITIES") {
            if let Ok(n) = v.parse::<usize>() {
                self.resolution.max_existing_entities = n;
            }
        }
        if let Ok(v) = std::env::var("GRAPHLOOM_RESOLUTION_UPDATE_RETRY_LIMIT") {
            if let Ok(n) = v.parse::<usize>() {
                self.resolution.update_retry_limit = n;
            }
        }
        if let Ok(v) = std::env::var("GRAPHLOOM_RESOLUTION_DEDUP_RELATIONS_AFTER_MERGE") {
            if let Ok(b) = v.parse::<bool>() {
                self.resolution.dedup_relations_after_merge = b;
            }
        }

        // Extraction overrides
        if let Ok(v) = std::env::var("GRAPHLOOM_EXTRACTION_ENDPOINT") {
            self.extraction.endpoint = v;
        }
        if let Ok(v) = std::env::var("GRAPHLOOM_EXTRACTION_API_KEY") {
            self.extraction.api_key = v;
        }
        if let Ok(v) = std::env::var("GRAPHLOOM_EXTRACTION_TIMEOUT_SECS") {
            if let Ok(s) = v.parse::<u64>() {
                self.extraction.timeout_secs = s;
            }
        }
    }

    /// Validate configuration values with detailed error messages.
    pub fn validate(&self) -> anyhow::Result<()> {
        // --- Ingestion validation ---
        let valid_strategies = ["full_document", "paragraph", "sentence"];
        if !valid_strategies.contains(&self.ingestion.chunk_strategy.as_str()) {
            anyhow::bail!(
                "ingestion.chunk_strategy must be one of: {} (got '{}').",
                valid_strategies.join(", "),
                self.ingestion.chunk_strategy
            );
        }
        if self.ingestion.max_concurrent_extractions == 0 {
            anyhow::bail!(
                "ingestion.max_concurrent_extractions must be > 0 (got 0). Set it in graphloom.toml or via GRAPHLOOM_INGESTION_MAX_CONCURRENT_EXTRACTIONS."
            );
        }

        // --- Resolution validation ---
        for (field, value) in [
            (
                "resolution.local_merge_threshold",
                self.resolution.local_merge_threshold,
            ),
            (
                "resolution.graph_merge_threshold",
                self.resolution.graph_merge_threshold,
            ),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                anyhow::bail!(
                    "{} must be in (0.0, 1.0] (got {}). Similarity ratios are normalized to that range.",
                    field,
                    value
                );
            }
        }
        if self.resolution.max_existing_entities == 0 {
            anyhow::bail!(
                "resolution.max_existing_entities must be > 0 (got 0); resolution needs at least one loadable entity."
            );
        }
        if self.resolution.update_retry_limit == 0 {
            anyhow::bail!("resolution.update_retry_limit must be > 0 (got 0).");
        }

        // --- Taxonomy validation ---
        if self.taxonomy.entity_types.is_empty() {
            anyhow::bail!(
                "taxonomy.entity_types must not be empty; the extractor needs at least one type to look for."
            );
        }
        if self
            .taxonomy
            .entity_types
            .iter()
            .chain(self.taxonomy.relation_types.iter())
            .any(|t| t.trim().is_empty())
        {
            anyhow::bail!("taxonomy entries must not be blank strings.");
        }

        // --- Extraction validation ---
        if self.extraction.endpoint.trim().is_empty() {
            anyhow::bail!(
                "extraction.endpoint must not be empty. Set it in graphloom.toml or via GRAPHLOOM_EXTRACTION_ENDPOINT."
            );
        }
        if self.extraction.timeout_secs == 0 {
            anyhow::bail!("extraction.timeout_secs must be > 0 (got 0).");
        }

        Ok(())
    }

    /// Generate an example configuration file from the defaults.
    pub fn example_toml() -> String {
        let config = GraphloomConfig::default();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| "# Failed to generate example".to_string())
    }

    /// Generate a fully commented example configuration file.
    pub fn example_toml_commented() -> String {
        r#"# =============================================================================
# Graphloom Configuration File
# =============================================================================
# This file configures the Graphloom knowledge-graph ingestion engine.
# All values shown below are defaults — uncomment and modify as needed.
#
# Environment variables override TOML values. Use the GRAPHLOOM_ prefix:
#   GRAPHLOOM_EXTRACTION_ENDPOINT=http://extractor:8600 my_host_service

# -----------------------------------------------------------------------------
# [ingestion] — document ingestion pipeline
# -----------------------------------------------------------------------------
[ingestion]
# Chunking strategy: "full_document", "paragraph" (triple-newline separated)
# or "sentence".
chunk_strategy = "paragraph"
# Maximum concurrent extraction calls per document.
max_concurrent_extractions = 4

# -----------------------------------------------------------------------------
# [resolution] — entity resolution and merging
# -----------------------------------------------------------------------------
[resolution]
# Similarity threshold for merging candidates within one document.
local_merge_threshold = 0.92
# Similarity threshold for matching candidates against persisted entities.
# Slightly looser than the local threshold: names get paraphrased across
# documents.
graph_merge_threshold = 0.90
# Maximum existing entities loaded per document for resolution.
max_existing_entities = 10000
# Attempts per entity write when conditional updates conflict.
update_retry_limit = 5
# Collapse duplicate relation triples after a manual entity merge.
dedup_relations_after_merge = false

# -----------------------------------------------------------------------------
# [taxonomy] — entity and relation type lists
# -----------------------------------------------------------------------------
[taxonomy]
# Entity types requested from the extractor. Stored entities may carry types
# outside this list after a taxonomy change.
entity_types = ["person", "organization", "location", "material", "equipment", "concept"]
# Relation types accepted during validation; anything else is dropped.
relation_types = ["causes", "part_of", "located_in", "produces", "supplies", "uses"]

# -----------------------------------------------------------------------------
# [extraction] — external candidate-extraction service
# -----------------------------------------------------------------------------
[extraction]
# Base URL; the client posts to {endpoint}/extract/entities and
# {endpoint}/extract/relations.
endpoint = "http://localhost:8600"
# Bearer token; empty disables auth. Prefer GRAPHLOOM_EXTRACTION_API_KEY.
api_key = ""
# Per-request timeout in seconds.
timeout_secs = 30
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = GraphloomConfig::default();
        assert_eq!(config.ingestion.chunk_strategy, "paragraph");
        assert_eq!(config.ingestion.max_concurrent_extractions, 4);
        assert!((config.resolution.local_merge_threshold - 0.92).abs() < f64::EPSILON);
        assert!((config.resolution.graph_merge_threshold - 0.90).abs() < f64::EPSILON);
        assert_eq!(config.resolution.max_existing_entities, 10_000);
        assert_eq!(config.resolution.update_retry_limit, 5);
        assert!(!config.resolution.dedup_relations_after_merge);
        assert!(config
            .taxonomy
            .entity_types
            .contains(&"organization".to_string()));
        assert!(config.taxonomy.relation_types.contains(&"causes".to_string()));
        assert_eq!(config.extraction.endpoint, "http://localhost:8600");
        assert!(config.extraction.api_key.is_empty());
        assert_eq!(config.extraction.timeout_secs, 30);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = GraphloomConfig::parse_toml("").unwrap();
        assert_eq!(config.ingestion.chunk_strategy, "paragraph");
        assert_eq!(config.resolution.max_existing_entities, 10_000);
    }

    #[test]
    fn test_parse_custom_toml() {
        let toml = r#"
[ingestion]
chunk_strategy = "sentence"
max_concurrent_extractions = 8

[resolution]
local_merge_threshold = 0.95
graph_merge_threshold = 0.85
dedup_relations_after_merge = true

[taxonomy]
entity_types = ["material", "equipment"]
relation_types = ["causes"]

[extraction]
endpoint = "http://extractor:9000"
timeout_secs = 10
"#;
        let config = GraphloomConfig::parse_toml(toml).unwrap();
        assert_eq!(config.ingestion.chunk_strategy, "sentence");
        assert_eq!(config.ingestion.max_concurrent_extractions, 8);
        assert!((config.resolution.local_merge_threshold - 0.95).abs() < f64::EPSILON);
        assert!((config.resolution.graph_merge_threshold - 0.85).abs() < f64::EPSILON);
        assert!(config.resolution.dedup_relations_after_merge);
        assert_eq!(config.taxonomy.entity_types, vec!["material", "equipment"]);
        assert_eq!(config.taxonomy.relation_types, vec!["causes"]);
        assert_eq!(config.extraction.endpoint, "http://extractor:9000");
        assert_eq!(config.extraction.timeout_secs, 10);
    }

    #[test]
    fn test_invalid_chunk_strategy() {
        let toml = r#"
[ingestion]
chunk_strategy = "token"
"#;
        let result = GraphloomConfig::parse_toml(toml);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("ingestion.chunk_strategy"));
        assert!(err.contains("token"));
    }

    #[test]
    fn test_invalid_thresholds() {
        let zero = r#"
[resolution]
local_merge_threshold = 0.0
"#;
        let result = GraphloomConfig::parse_toml(zero);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("resolution.local_merge_threshold"));

        let too_big = r#"
[resolution]
graph_merge_threshold = 1.5
"#;
        let result = GraphloomConfig::parse_toml(too_big);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("resolution.graph_merge_threshold"));
    }

    #[test]
    fn test_empty_entity_taxonomy_rejected() {
        let toml = r#"
[taxonomy]
entity_types = []
"#;
        let result = GraphloomConfig::parse_toml(toml);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("taxonomy.entity_types"));
    }

    #[test]
    fn test_empty_relation_taxonomy_allowed() {
        let toml = r#"
[taxonomy]
relation_types = []
"#;
        let config = GraphloomConfig::parse_toml(toml).unwrap();
        assert!(config.taxonomy.relation_types.is_empty());
    }

    #[test]
    fn test_invalid_extraction_endpoint() {
        let toml = r#"
[extraction]
endpoint = "  "
"#;
        let result = GraphloomConfig::parse_toml(toml);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("extraction.endpoint"));
    }

    #[test]
    fn test_env_override_retry_limit() {
        std::env::set_var("GRAPHLOOM_RESOLUTION_UPDATE_RETRY_LIMIT", "9");
        let mut config = GraphloomConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.resolution.update_retry_limit, 9);
        std::env::remove_var("GRAPHLOOM_RESOLUTION_UPDATE_RETRY_LIMIT");
    }

    #[test]
    fn test_env_override_api_key() {
        std::env::set_var("GRAPHLOOM_EXTRACTION_API_KEY", "secret-token");
        let mut config = GraphloomConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.extraction.api_key, "secret-token");
        std::env::remove_var("GRAPHLOOM_EXTRACTION_API_KEY");
    }

    #[test]
    fn test_example_toml_generation() {
        let example = GraphloomConfig::example_toml();
        assert!(example.contains("chunk_strategy"));
        assert!(example.contains("0.92"));
        // Verify it round-trips
        let _config = GraphloomConfig::parse_toml(&example).unwrap();
    }

    #[test]
    fn test_example_toml_commented_round_trips() {
        let example = GraphloomConfig::example_toml_commented();
        let config = GraphloomConfig::parse_toml(&example).unwrap();
        assert_eq!(config.ingestion.chunk_strategy, "paragraph");
        assert_eq!(config.extraction.timeout_secs, 30);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[ingestion]\nchunk_strategy = \"full_document\"\n"
        )
        .unwrap();
        let config = GraphloomConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.ingestion.chunk_strategy, "full_document");

        assert!(GraphloomConfig::from_file("/nonexistent/graphloom.toml").is_err());
    }
}
