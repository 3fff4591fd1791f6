use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,
    /// Vector store connection settings
    pub chroma: ChromaConfig,
    /// Query embedding provider
    pub embedding: EmbeddingConfig,
    /// Collections to fan out to, in priority order (earlier wins ties)
    pub collections: Vec<String>,
    /// Fusion and ranking settings
    pub search: SearchConfig,
    /// Hybrid (lexical + semantic) scoring settings
    pub hybrid: HybridConfig,
    /// File-based task queue settings
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChromaConfig {
    /// Base URL of the ChromaDB HTTP server
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the embeddings API
    pub base_url: String,
    /// Model name for embeddings. Must match the model the collections were built with.
    pub model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            model: "all-minilm".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// `n_results` used when a request omits it
    pub default_results: usize,
    /// Upper bound on `n_results` accepted from clients
    pub max_results: usize,
    /// Floor on hits requested from each collection
    pub min_per_collection: usize,
    /// Hits requested per collection = max(min_per_collection, n_results * factor)
    pub per_collection_factor: usize,
    /// Returned documents are cut to at most this many bytes, on a char boundary
    pub max_document_chars: usize,
    /// Per-collection query timeout in seconds
    pub query_timeout_secs: u64,
    pub boost: BoostConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_results: 10,
            max_results: 50,
            min_per_collection: 20,
            per_collection_factor: 4,
            max_document_chars: 2_000,
            query_timeout_secs: 10,
            boost: BoostConfig::default(),
        }
    }
}

/// Distance offsets applied to favoured content. Empirical starting values,
/// not calibrated; override through the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostConfig {
    /// Subtracted when `type`, `source` or `category` names a boosted category
    pub general_offset: f32,
    /// Subtracted when `title` names a recognised expert or brand
    pub expert_offset: f32,
    /// Case-folded substrings that mark a boosted category
    pub category_keywords: Vec<String>,
    /// Case-folded substrings of titles that get the expert offset
    pub expert_names: Vec<String>,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            general_offset: 0.5,
            expert_offset: 0.6,
            category_keywords: ["book", "training", "business", "course"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            expert_names: [
                "hormozi",
                "brunson",
                "$100m",
                "dotcom secrets",
                "expert secrets",
                "traffic secrets",
                "dan kennedy",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    /// LRU capacity for hybrid results (0 disables caching)
    pub cache_capacity: usize,
    /// How far a perfect lexical match pulls the distance down
    pub lexical_weight: f32,
    /// term -> synonyms used for lexical query expansion
    pub synonyms: Vec<(String, Vec<String>)>,
}

impl Default for HybridConfig {
    fn default() -> Self {
        let table: &[(&str, &[&str])] = &[
            ("ghl", &["gohighlevel", "highlevel"]),
            ("gohighlevel", &["ghl", "highlevel"]),
            ("workflow", &["automation", "trigger"]),
            ("automation", &["workflow"]),
            ("funnel", &["landing", "page", "website"]),
            ("crm", &["contacts", "pipeline"]),
            ("sms", &["text", "message"]),
            ("email", &["campaign", "newsletter"]),
            ("calendar", &["booking", "appointment"]),
            ("pipeline", &["opportunity", "stage"]),
            ("snapshot", &["template"]),
        ];
        Self {
            cache_capacity: 256,
            lexical_weight: 0.3,
            synonyms: table
                .iter()
                .map(|(term, syns)| {
                    (
                        term.to_string(),
                        syns.iter().map(|s| s.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Root holding the `todo`, `processing` and `completed` directories
    pub root: PathBuf,
    /// Identity stamped on claims and completed records
    pub machine_name: String,
    /// Idle poll interval in seconds
    pub poll_interval_secs: u64,
    /// Claims older than this are requeued (0 disables recovery)
    pub lease_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./tasks"),
            machine_name: default_machine_name(),
            poll_interval_secs: 5,
            lease_secs: 1_800,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8001".to_string(),
            chroma: ChromaConfig::default(),
            embedding: EmbeddingConfig::default(),
            collections: [
                "ghl-tutorials",
                "ghl-docs",
                "ghl-best-practices",
                "ghl-snapshots",
                "ghl-youtube",
                "business-books",
                "ghl-commands",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            search: SearchConfig::default(),
            hybrid: HybridConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("WHIZ_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(url) = std::env::var("CHROMA_URL") {
            config.chroma.base_url = url;
        }
        if let Some(v) = parse_env("CHROMA_TIMEOUT_SECS") {
            config.chroma.timeout_secs = v;
        }
        if let Ok(list) = std::env::var("WHIZ_COLLECTIONS") {
            let collections = split_csv(&list);
            if !collections.is_empty() {
                config.collections = collections;
            }
        }

        // Embeddings
        if let Ok(provider) = std::env::var("EMBED_PROVIDER") {
            config.embedding.provider = provider;
        }
        if let Ok(url) = std::env::var("EMBED_BASE_URL") {
            config.embedding.base_url = url;
        }
        if let Ok(model) = std::env::var("EMBED_MODEL") {
            config.embedding.model = model;
        }
        if let Ok(key) = std::env::var("EMBED_API_KEY") {
            config.embedding.api_key = Some(key);
        }

        // Search
        if let Some(v) = parse_env("WHIZ_DEFAULT_RESULTS") {
            config.search.default_results = v;
        }
        if let Some(v) = parse_env("WHIZ_MAX_RESULTS") {
            config.search.max_results = v;
        }
        if let Some(v) = parse_env("WHIZ_MIN_PER_COLLECTION") {
            config.search.min_per_collection = v;
        }
        if let Some(v) = parse_env("WHIZ_PER_COLLECTION_FACTOR") {
            config.search.per_collection_factor = v;
        }
        if let Some(v) = parse_env("WHIZ_MAX_DOCUMENT_CHARS") {
            config.search.max_document_chars = v;
        }
        if let Some(v) = parse_env("WHIZ_QUERY_TIMEOUT_SECS") {
            config.search.query_timeout_secs = v;
        }
        if let Some(v) = parse_env("WHIZ_BOOST_GENERAL") {
            config.search.boost.general_offset = v;
        }
        if let Some(v) = parse_env("WHIZ_BOOST_EXPERT") {
            config.search.boost.expert_offset = v;
        }
        if let Ok(list) = std::env::var("WHIZ_BOOST_KEYWORDS") {
            config.search.boost.category_keywords = lowercase(split_csv(&list));
        }
        if let Ok(list) = std::env::var("WHIZ_EXPERT_NAMES") {
            config.search.boost.expert_names = lowercase(split_csv(&list));
        }

        // Hybrid
        if let Some(v) = parse_env("WHIZ_CACHE_CAPACITY") {
            config.hybrid.cache_capacity = v;
        }
        if let Some(v) = parse_env("WHIZ_LEXICAL_WEIGHT") {
            config.hybrid.lexical_weight = v;
        }
        if let Ok(table) = std::env::var("WHIZ_SYNONYMS") {
            config.hybrid.synonyms = parse_synonyms(&table);
        }

        // Queue
        if let Ok(dir) = std::env::var("WHIZ_QUEUE_DIR") {
            config.queue.root = PathBuf::from(dir);
        }
        if let Ok(name) = std::env::var("WHIZ_MACHINE_NAME") {
            config.queue.machine_name = name;
        }
        if let Some(v) = parse_env("WHIZ_POLL_INTERVAL_SECS") {
            config.queue.poll_interval_secs = v;
        }
        if let Some(v) = parse_env("WHIZ_LEASE_SECS") {
            config.queue.lease_secs = v;
        }

        config
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {key}={raw}");
            None
        }
    }
}

/// Trimmed, non-empty comma-separated entries.
fn split_csv(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn lowercase(items: Vec<String>) -> Vec<String> {
    items.into_iter().map(|s| s.to_lowercase()).collect()
}

/// Parse `term=syn1|syn2;other=syn3` into a synonym table.
pub fn parse_synonyms(table: &str) -> Vec<(String, Vec<String>)> {
    table
        .split(';')
        .filter_map(|entry| {
            let (term, syns) = entry.split_once('=')?;
            let term = term.trim().to_lowercase();
            let syns: Vec<String> = syns
                .split('|')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            if term.is_empty() || syns.is_empty() {
                None
            } else {
                Some((term, syns))
            }
        })
        .collect()
}

fn default_machine_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "worker".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_collection_count() {
        let config = Config::default();
        assert_eq!(config.collections.len(), 7);
        assert_eq!(config.search.min_per_collection, 20);
        assert_eq!(config.search.per_collection_factor, 4);
    }

    #[test]
    fn test_split_csv_keeps_case() {
        // Collection names are case-sensitive on the store side
        assert_eq!(
            split_csv(" Docs, BOOKS ,,tutorials "),
            vec!["Docs", "BOOKS", "tutorials"]
        );
        assert_eq!(lowercase(split_csv("Hormozi,Brunson")), vec!["hormozi", "brunson"]);
    }

    #[test]
    fn test_parse_synonyms() {
        let table = parse_synonyms("GHL=gohighlevel|HighLevel; sms = text ;bad;empty=");
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].0, "ghl");
        assert_eq!(table[0].1, vec!["gohighlevel", "highlevel"]);
        assert_eq!(table[1], ("sms".to_string(), vec!["text".to_string()]));
    }
}
