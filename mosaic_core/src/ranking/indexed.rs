//! Ranking delegated to an external full-text index.
//!
//! Entities reach the index through the manager's discovery notifications;
//! search-time ranking asks the index to score the merged candidate set.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{sort_ranked, DiscoverySink, LocalRanker, RankingStrategy};
use crate::entity::{AttributeValue, Entity, EntityId};
use crate::error::{FederationError, ProviderError};
use crate::federated::SearchQuery;

/// One scored document returned by the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: EntityId,
    pub score: f64,
}

#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Adds or replaces documents for `instance`. With `wait`, returns only
    /// once the index has applied them.
    async fn ingest(
        &self,
        instance: &str,
        entities: &[Entity],
        wait: bool,
    ) -> Result<(), ProviderError>;

    async fn delete_instance(&self, instance: &str, wait: bool) -> Result<(), ProviderError>;

    /// Scores `candidates` against `text`. Candidates the index does not
    /// match are absent from the answer.
    async fn search(
        &self,
        text: &str,
        candidates: &[EntityId],
    ) -> Result<Vec<IndexHit>, ProviderError>;
}

fn default_index_uid() -> String {
    "mosaic_entities".to_string()
}

fn default_index_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    pub url: String,

    #[serde(default = "default_index_uid")]
    pub index_uid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Block discovery notifications until the index finished its task.
    #[serde(default)]
    pub wait_for_indexing: bool,

    #[serde(default = "default_index_timeout_ms")]
    pub timeout_ms: u64,
}

impl IndexSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            index_uid: default_index_uid(),
            api_key: None,
            wait_for_indexing: false,
            timeout_ms: default_index_timeout_ms(),
        }
    }
}

/// Index document ids must be URL-safe, entity ids contain `:`.
pub fn document_id(id: &EntityId) -> String {
    URL_SAFE_NO_PAD.encode(id.as_str())
}

pub fn decode_document_id(doc_id: &str) -> Option<EntityId> {
    let bytes = URL_SAFE_NO_PAD.decode(doc_id).ok()?;
    let raw = String::from_utf8(bytes).ok()?;
    EntityId::parse(&raw).ok()
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// The document stored for one entity.
pub fn entity_document(instance: &str, entity: &Entity) -> Value {
    let text: Vec<String> = entity
        .attributes
        .values()
        .filter_map(|v| match v {
            AttributeValue::Text(s) => Some(s.clone()),
            AttributeValue::List(items) => Some(
                items
                    .iter()
                    .filter_map(AttributeValue::as_str)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            _ => None,
        })
        .collect();
    json!({
        "id": document_id(&entity.id),
        "entity_id": entity.id.as_str(),
        "instance": instance,
        "type": entity.entity_type,
        "title": entity.title,
        "description": entity.description,
        "tokens": entity.search_tokens,
        "text": text,
    })
}

/// Meilisearch-compatible REST backend.
pub struct HttpIndexBackend {
    client: Client,
    settings: IndexSettings,
    prepared: tokio::sync::OnceCell<()>,
}

impl HttpIndexBackend {
    pub fn new(settings: IndexSettings) -> Result<Self, ProviderError> {
        url::Url::parse(&settings.url)
            .map_err(|e| ProviderError::Config(format!("index url {}: {}", settings.url, e)))?;
        let client = Client::builder()
            .user_agent(concat!("mosaic/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;
        Ok(Self {
            client,
            settings,
            prepared: tokio::sync::OnceCell::new(),
        })
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    fn base(&self) -> &str {
        self.settings.url.trim_end_matches('/')
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/indexes/{}/{}", self.base(), self.settings.index_uid, path)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.settings.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value, ProviderError> {
        let value = builder
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(value)
    }

    /// Creates the index and declares the attributes used in filters, once
    /// per backend.
    async fn prepare(&self) -> Result<(), ProviderError> {
        self.prepared
            .get_or_try_init(|| async {
                self.create_index().await?;
                let body = json!({
                    "filterableAttributes": ["id", "instance", "type"],
                    "searchableAttributes": ["title", "tokens", "description", "text"],
                });
                let url = self.endpoint("settings");
                let task = self.send(self.request(reqwest::Method::PATCH, &url).json(&body)).await?;
                self.wait_task(&task).await
            })
            .await
            .map(|_| ())
    }

    /// An index that already exists counts as created.
    async fn create_index(&self) -> Result<(), ProviderError> {
        let body = json!({ "uid": self.settings.index_uid, "primaryKey": "id" });
        let url = format!("{}/indexes", self.base());
        let response = self.request(reqwest::Method::POST, &url).json(&body).send().await?;
        if response.status() == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }
        let task = response.error_for_status()?.json::<Value>().await?;
        match self.poll_task(&task).await? {
            Some((code, _)) if code == "index_already_exists" => Ok(()),
            Some((_, message)) => Err(ProviderError::Unknown(message)),
            None => Ok(()),
        }
    }

    async fn wait_task(&self, task: &Value) -> Result<(), ProviderError> {
        match self.poll_task(task).await? {
            Some((_, message)) => Err(ProviderError::Unknown(message)),
            None => Ok(()),
        }
    }

    /// Polls an enqueued task until it settles. Returns the error code and
    /// message of a failed or canceled task.
    async fn poll_task(&self, task: &Value) -> Result<Option<(String, String)>, ProviderError> {
        let Some(uid) = task.get("taskUid").and_then(Value::as_u64) else {
            return Ok(None);
        };
        let url = format!("{}/tasks/{}", self.base(), uid);
        let budget = Duration::from_millis(self.settings.timeout_ms);
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            let status = self.send(self.request(reqwest::Method::GET, &url)).await?;
            match status.get("status").and_then(Value::as_str) {
                Some("succeeded") => return Ok(None),
                Some("failed") | Some("canceled") => {
                    let field = |name: &str, default: &str| {
                        status
                            .pointer(name)
                            .and_then(Value::as_str)
                            .unwrap_or(default)
                            .to_string()
                    };
                    let code = field("/error/code", "");
                    let message = field("/error/message", "index task failed");
                    return Ok(Some((code, message)));
                }
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ProviderError::Temporary(format!("index task {} still pending", uid)));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[async_trait]
impl IndexBackend for HttpIndexBackend {
    async fn ingest(
        &self,
        instance: &str,
        entities: &[Entity],
        wait: bool,
    ) -> Result<(), ProviderError> {
        if entities.is_empty() {
            return Ok(());
        }
        self.prepare().await?;
        let documents: Vec<Value> = entities.iter().map(|e| entity_document(instance, e)).collect();
        let url = self.endpoint("documents");
        let request = self
            .request(reqwest::Method::POST, &url)
            .query(&[("primaryKey", "id")])
            .json(&documents);
        let task = self.send(request).await?;
        debug!(instance = %instance, documents = documents.len(), "submitted documents to index");
        if wait {
            self.wait_task(&task).await?;
        }
        Ok(())
    }

    async fn delete_instance(&self, instance: &str, wait: bool) -> Result<(), ProviderError> {
        self.prepare().await?;
        let body = json!({ "filter": format!("instance = {}", quote(instance)) });
        let url = self.endpoint("documents/delete");
        let task = self.send(self.request(reqwest::Method::POST, &url).json(&body)).await?;
        if wait {
            self.wait_task(&task).await?;
        }
        Ok(())
    }

    async fn search(
        &self,
        text: &str,
        candidates: &[EntityId],
    ) -> Result<Vec<IndexHit>, ProviderError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        self.prepare().await?;
        let ids: Vec<String> = candidates.iter().map(|id| quote(&document_id(id))).collect();
        let body = json!({
            "q": text,
            "filter": format!("id IN [{}]", ids.join(", ")),
            "limit": candidates.len(),
            "attributesToRetrieve": ["id"],
            "showRankingScore": true,
        });
        let url = self.endpoint("search");
        let response = self.send(self.request(reqwest::Method::POST, &url).json(&body)).await?;
        let hits = response
            .get("hits")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| {
                        let id = decode_document_id(hit.get("id")?.as_str()?)?;
                        let score = hit.get("_rankingScore").and_then(Value::as_f64).unwrap_or(0.0);
                        Some(IndexHit { id, score })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }
}

/// Ranks by index relevance. Entities the index does not match score zero.
pub struct IndexedRanker {
    backend: Arc<dyn IndexBackend>,
    wait_for_indexing: bool,
    fallback: Option<LocalRanker>,
}

impl IndexedRanker {
    pub fn new(backend: Arc<dyn IndexBackend>, wait_for_indexing: bool) -> Self {
        Self {
            backend,
            wait_for_indexing,
            fallback: None,
        }
    }

    /// Used for empty queries and when the index is unreachable.
    pub fn with_fallback(mut self, fallback: LocalRanker) -> Self {
        self.fallback = Some(fallback);
        self
    }

    async fn fall_back(
        &self,
        entities: Vec<Entity>,
        query: &SearchQuery,
        err: ProviderError,
    ) -> Result<Vec<Entity>, FederationError> {
        match &self.fallback {
            Some(local) => {
                warn!(error = %err, "index ranking failed, using local ranking");
                local.score(entities, query).await
            }
            None => Err(FederationError::Ranking(err.to_string())),
        }
    }
}

#[async_trait]
impl RankingStrategy for IndexedRanker {
    fn name(&self) -> &'static str {
        "index"
    }

    async fn score(
        &self,
        mut entities: Vec<Entity>,
        query: &SearchQuery,
    ) -> Result<Vec<Entity>, FederationError> {
        if query.query.trim().is_empty() {
            if let Some(local) = &self.fallback {
                return local.score(entities, query).await;
            }
        }

        let candidates: Vec<EntityId> = entities.iter().map(|e| e.id.clone()).collect();
        let hits = match self.backend.search(&query.query, &candidates).await {
            Ok(hits) => hits,
            Err(err) => return self.fall_back(entities, query, err).await,
        };
        let scores: BTreeMap<EntityId, f64> = hits.into_iter().map(|h| (h.id, h.score)).collect();
        for entity in &mut entities {
            entity.score = Some(scores.get(&entity.id).copied().unwrap_or(0.0));
        }
        sort_ranked(&mut entities);
        Ok(entities)
    }
}

#[async_trait]
impl DiscoverySink for IndexedRanker {
    async fn on_discovered(&self, instance: &str, entities: &[Entity]) {
        if let Err(err) = self.backend.ingest(instance, entities, self.wait_for_indexing).await {
            warn!(instance = %instance, error = %err, "index ingestion failed");
        }
    }

    async fn on_removed(&self, instance: &str) {
        if let Err(err) = self.backend.delete_instance(instance, self.wait_for_indexing).await {
            warn!(instance = %instance, error = %err, "index cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scores by number of title words containing the query text.
    #[derive(Default)]
    struct MemoryIndex {
        docs: Mutex<BTreeMap<EntityId, (String, String)>>,
        broken: bool,
    }

    #[async_trait]
    impl IndexBackend for MemoryIndex {
        async fn ingest(
            &self,
            instance: &str,
            entities: &[Entity],
            _wait: bool,
        ) -> Result<(), ProviderError> {
            let mut docs = self.docs.lock().unwrap();
            for e in entities {
                docs.insert(e.id.clone(), (instance.to_string(), e.title.to_lowercase()));
            }
            Ok(())
        }

        async fn delete_instance(&self, instance: &str, _wait: bool) -> Result<(), ProviderError> {
            self.docs.lock().unwrap().retain(|_, (owner, _)| owner != instance);
            Ok(())
        }

        async fn search(
            &self,
            text: &str,
            candidates: &[EntityId],
        ) -> Result<Vec<IndexHit>, ProviderError> {
            if self.broken {
                return Err(ProviderError::Temporary("index down".into()));
            }
            let docs = self.docs.lock().unwrap();
            let needle = text.to_lowercase();
            Ok(candidates
                .iter()
                .filter_map(|id| {
                    let (_, title) = docs.get(id)?;
                    let words = title.split_whitespace().filter(|w| w.contains(&needle));
                    let score = words.count() as f64;
                    (score > 0.0).then(|| IndexHit { id: id.clone(), score })
                })
                .collect())
        }
    }

    fn entity(resource: &str, title: &str) -> Entity {
        Entity::new(EntityId::new("mock", "default", resource), "file", "mock:default", title)
    }

    #[test]
    fn test_document_id_round_trip_is_url_safe() {
        let id = EntityId::new("localfs", "photos", "2024/a b.jpg");
        let doc = document_id(&id);
        assert!(doc.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(decode_document_id(&doc), Some(id));
        assert_eq!(decode_document_id("%%%"), None);
    }

    #[tokio::test]
    async fn test_ranks_by_index_score_after_ingestion() {
        let index = Arc::new(MemoryIndex::default());
        let ranker = IndexedRanker::new(index.clone(), true);
        let entities = vec![entity("a", "cat"), entity("b", "cat cat"), entity("c", "dog")];
        ranker.on_discovered("mock:default", &entities).await;

        let ranked = ranker.score(entities, &SearchQuery::new("cat")).await.unwrap();
        let order: Vec<_> = ranked.iter().map(|e| e.id.resource_id()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
        assert_eq!(ranked[2].score, Some(0.0));

        ranker.on_removed("mock:default").await;
        assert!(index.docs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_index_uses_fallback_or_fails() {
        let index = Arc::new(MemoryIndex {
            broken: true,
            ..MemoryIndex::default()
        });
        let strict = IndexedRanker::new(index.clone(), false);
        let err = strict.score(vec![entity("a", "x")], &SearchQuery::new("x")).await.unwrap_err();
        assert_eq!(err.code_str(), "ranking_failed");

        let lenient = IndexedRanker::new(index, false).with_fallback(LocalRanker::default());
        let ranked = lenient.score(vec![entity("a", "x")], &SearchQuery::new("x")).await.unwrap();
        assert_eq!(ranked.len(), 1);
    }

    /// One recorded HTTP exchange: method, path with query, JSON body.
    type Exchange = (String, String, Value);

    /// Minimal Meilisearch stand-in: answers every request from `reply` and
    /// records what it received. One request per connection.
    async fn serve_stub(
        reply: fn(&str, &str) -> (u16, Value),
    ) -> (String, Arc<Mutex<Vec<Exchange>>>) {
        use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let mut reader = BufReader::new(stream);
                let mut request_line = String::new();
                reader.read_line(&mut request_line).await.unwrap();
                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or_default().to_string();
                let path = parts.next().unwrap_or_default().to_string();
                let mut length = 0usize;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).await.unwrap();
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            length = value.trim().parse().unwrap();
                        }
                    }
                }
                let mut body = vec![0u8; length];
                reader.read_exact(&mut body).await.unwrap();
                let body = serde_json::from_slice(&body).unwrap_or(Value::Null);

                let (status, payload) = reply(&method, &path);
                log.lock().unwrap().push((method, path, body));
                let payload = payload.to_string();
                let response = format!(
                    "HTTP/1.1 {} OK\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    payload.len(),
                    payload
                );
                let mut stream = reader.into_inner();
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
        });
        (url, seen)
    }

    fn meili_reply(method: &str, path: &str) -> (u16, Value) {
        match (method, path) {
            ("POST", "/indexes") => (202, json!({"taskUid": 1})),
            ("GET", "/tasks/1") => (
                200,
                json!({
                    "status": "failed",
                    "error": {"code": "index_already_exists", "message": "exists"}
                }),
            ),
            ("GET", _) => (200, json!({"status": "succeeded"})),
            ("PATCH", _) => (202, json!({"taskUid": 2})),
            ("POST", "/indexes/mosaic_entities/search") => {
                let id = document_id(&EntityId::new("mock", "default", "b"));
                (200, json!({"hits": [{"id": id, "_rankingScore": 0.75}]}))
            }
            ("POST", _) => (202, json!({"taskUid": 3})),
            _ => (404, json!({})),
        }
    }

    #[tokio::test]
    async fn test_http_backend_creates_index_then_ingests_and_searches() {
        let (url, seen) = serve_stub(meili_reply).await;
        let backend = HttpIndexBackend::new(IndexSettings::new(url)).unwrap();

        let entities = vec![entity("a", "cat"), entity("b", "cat cat")];
        backend.ingest("mock:default", &entities, true).await.unwrap();
        let hits = backend
            .search("cat", &[entities[0].id.clone(), entities[1].id.clone()])
            .await
            .unwrap();
        assert_eq!(hits, vec![IndexHit { id: entities[1].id.clone(), score: 0.75 }]);

        let seen = seen.lock().unwrap();
        let requests: Vec<(&str, &str)> =
            seen.iter().map(|(m, p, _)| (m.as_str(), p.as_str())).collect();
        assert_eq!(
            requests,
            vec![
                ("POST", "/indexes"),
                ("GET", "/tasks/1"),
                ("PATCH", "/indexes/mosaic_entities/settings"),
                ("GET", "/tasks/2"),
                ("POST", "/indexes/mosaic_entities/documents?primaryKey=id"),
                ("GET", "/tasks/3"),
                ("POST", "/indexes/mosaic_entities/search"),
            ]
        );

        assert_eq!(seen[0].2, json!({"uid": "mosaic_entities", "primaryKey": "id"}));
        let settings = seen[2].2.as_object().unwrap();
        assert!(!settings.contains_key("primaryKey"));
        assert!(settings.contains_key("filterableAttributes"));
        assert!(settings.contains_key("searchableAttributes"));
        assert_eq!(seen[4].2.as_array().unwrap().len(), 2);
        assert_eq!(seen[4].2[0]["entity_id"], "mock:default:a");
    }

    #[tokio::test]
    async fn test_http_backend_reports_failed_index_creation() {
        fn reply(method: &str, path: &str) -> (u16, Value) {
            match (method, path) {
                ("POST", "/indexes") => (202, json!({"taskUid": 1})),
                _ => (
                    200,
                    json!({
                        "status": "failed",
                        "error": {"code": "invalid_index_uid", "message": "bad uid"}
                    }),
                ),
            }
        }
        let (url, _) = serve_stub(reply).await;
        let backend = HttpIndexBackend::new(IndexSettings::new(url)).unwrap();
        let err = backend.delete_instance("mock:default", false).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown error: bad uid");
    }

    #[test]
    fn test_http_backend_rejects_bad_url() {
        assert!(HttpIndexBackend::new(IndexSettings::new("not a url")).is_err());
        let backend = HttpIndexBackend::new(IndexSettings::new("http://localhost:7700/")).unwrap();
        assert_eq!(
            backend.endpoint("search"),
            "http://localhost:7700/indexes/mosaic_entities/search"
        );
    }
}
