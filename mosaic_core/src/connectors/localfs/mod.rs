//! Local directory tree as a provider: one entity per file, one collection
//! per directory.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;
use walkdir::WalkDir;

use crate::capabilities::{Field, FieldType, ProviderConfigSchema};
use crate::entity::{self, decode_segment, Entity, EntityId};
use crate::error::ProviderError;
use crate::federated::SearchQuery;
use crate::filters::{self, FilterCapability, FilterOption};
use crate::provider::{FilterValuesProvider, Provider, ProviderConfig};
use crate::types::type_matches;

mod types;

pub use types::{detect_file_kind, mime_type, FileKind, FileRecord};

const PROVIDER_TYPE: &str = "localfs";

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git",
    "**/.git/**",
    "**/node_modules",
    "**/node_modules/**",
];

/// Expand `~` to the user's home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ProviderError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| ProviderError::Config(format!("exclude pattern {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| ProviderError::Config(e.to_string()))
}

#[derive(Debug, Clone)]
struct WalkOptions {
    root: PathBuf,
    follow_links: bool,
    include_hidden: bool,
    max_depth: Option<usize>,
    exclude: GlobSet,
}

impl WalkOptions {
    fn skips(&self, rel_path: &str, name: &str) -> bool {
        (!self.include_hidden && name.starts_with('.')) || self.exclude.is_match(rel_path)
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn load_record(path: &Path, rel_path: String) -> std::io::Result<FileRecord> {
    let metadata = std::fs::metadata(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    let kind = if metadata.is_dir() {
        FileKind::Directory
    } else {
        detect_file_kind(path)
    };
    Ok(FileRecord {
        rel_path,
        name,
        extension: if metadata.is_dir() { None } else { extension },
        size_bytes: if metadata.is_dir() { 0 } else { metadata.len() },
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        kind,
    })
}

/// Walks the whole tree; unreadable entries are skipped.
fn walk(options: &WalkOptions) -> Vec<FileRecord> {
    let mut walker = WalkDir::new(&options.root)
        .follow_links(options.follow_links)
        .min_depth(1);
    if let Some(depth) = options.max_depth {
        walker = walker.max_depth(depth);
    }

    let mut records = Vec::new();
    let entries = walker.into_iter().filter_entry(|e| {
        let rel = relative_path(&options.root, e.path());
        !options.skips(&rel, &e.file_name().to_string_lossy())
    });
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        let rel = relative_path(&options.root, entry.path());
        match load_record(entry.path(), rel) {
            Ok(record) => records.push(record),
            Err(err) => debug!(path = %entry.path().display(), error = %err, "skipping entry"),
        }
    }

    // Sort for deterministic ordering
    records.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    records
}

/// One entry plus, for directories, its visible children.
fn load_one(
    options: &WalkOptions,
    rel_path: &str,
) -> Result<(FileRecord, Vec<String>), ProviderError> {
    let path = options.root.join(rel_path);
    let record = load_record(&path, rel_path.to_string())?;
    let mut children = Vec::new();
    if record.is_dir() {
        for entry in std::fs::read_dir(&path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = format!("{rel_path}/{name}");
            if !options.skips(&child, &name) {
                children.push(child);
            }
        }
        children.sort();
    }
    Ok((record, children))
}

/// Rejects anything that could leave the root.
fn safe_relative(resource: &str) -> Option<String> {
    let decoded = decode_segment(resource);
    let path = Path::new(&decoded);
    let normal = path.components().all(|c| matches!(c, Component::Normal(_)));
    (normal && !decoded.is_empty()).then_some(decoded)
}

#[derive(Default)]
pub struct LocalFsProvider {
    instance_id: String,
    options: Option<Arc<WalkOptions>>,
}

impl LocalFsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn options(&self) -> Result<Arc<WalkOptions>, ProviderError> {
        self.options
            .clone()
            .ok_or_else(|| ProviderError::Config("localfs provider is not initialized".to_string()))
    }

    fn instance_key(&self) -> String {
        entity::instance_key(PROVIDER_TYPE, &self.instance_id)
    }

    fn id_for(&self, rel_path: &str) -> EntityId {
        EntityId::new(PROVIDER_TYPE, &self.instance_id, rel_path)
    }

    async fn records(&self) -> Result<Vec<FileRecord>, ProviderError> {
        let options = self.options()?;
        tokio::task::spawn_blocking(move || walk(&options))
            .await
            .map_err(|e| ProviderError::Unknown(format!("directory walk aborted: {e}")))
    }

    fn to_entity(&self, record: &FileRecord, children: &[&str]) -> Entity {
        let mut entity = Entity::new(
            self.id_for(&record.rel_path),
            record.kind.entity_type(),
            self.instance_key(),
            record.name.clone(),
        )
        .with_attribute("path", record.rel_path.clone());

        if record.is_dir() {
            entity = entity.with_attribute("item_count", children.len() as i64);
        } else {
            entity = entity.with_attribute("size", record.size_bytes as i64);
            if let Some(ext) = &record.extension {
                entity = entity.with_attribute("extension", ext.clone());
                if let Some(mime) = mime_type(ext) {
                    entity = entity.with_attribute("mime_type", mime);
                }
            }
        }
        if let Some(modified) = record.modified {
            entity = entity.with_attribute("modified", modified).with_timestamp(modified);
        }
        if let Some(parent) = record.parent() {
            entity = entity
                .with_search_tokens(parent.split('/').map(str::to_string))
                .with_relationship("parent", self.id_for(parent));
        }
        for child in children {
            entity = entity.with_relationship("contains", self.id_for(child));
        }
        entity
    }

    fn to_entities(&self, records: &[FileRecord]) -> Vec<Entity> {
        let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for record in records {
            if let Some(parent) = record.parent() {
                children.entry(parent).or_default().push(&record.rel_path);
            }
        }
        let mut entities: Vec<Entity> = records
            .iter()
            .map(|r| {
                let kids = children.get(r.rel_path.as_str()).map(Vec::as_slice).unwrap_or(&[]);
                self.to_entity(r, kids)
            })
            .collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        entities
    }

    fn matches_text(entity: &Entity, terms: &[String]) -> bool {
        let title = entity.title.to_lowercase();
        let path = entity
            .attribute("path")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_lowercase();
        terms.iter().all(|t| title.contains(t.as_str()) || path.contains(t.as_str()))
    }
}

#[async_trait]
impl Provider for LocalFsProvider {
    fn name(&self) -> &'static str {
        PROVIDER_TYPE
    }

    fn description(&self) -> &'static str {
        "Files and folders under a local directory"
    }

    fn config_schema(&self) -> ProviderConfigSchema {
        ProviderConfigSchema::new(vec![
            Field::new("root", "Root directory", FieldType::Path)
                .required()
                .with_description("Directory to index; `~` expands to the home directory"),
            Field::new("exclude", "Exclude globs", FieldType::Text)
                .with_description("Comma-separated globs relative to the root"),
            Field::new("follow_links", "Follow symlinks", FieldType::Boolean),
            Field::new("include_hidden", "Include hidden files", FieldType::Boolean),
            Field::new("max_depth", "Maximum depth", FieldType::Number),
        ])
    }

    async fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ProviderError> {
        let root = config
            .get_str("root")
            .map(expand_path)
            .ok_or_else(|| ProviderError::Config("root is required".to_string()))?;
        if !root.is_dir() {
            return Err(ProviderError::Config(format!(
                "root is not a directory: {}",
                root.display()
            )));
        }

        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.get_str_list("exclude"));

        self.instance_id = config.instance_id.clone();
        self.options = Some(Arc::new(WalkOptions {
            root,
            follow_links: config.get_bool("follow_links").unwrap_or(false),
            include_hidden: config.get_bool("include_hidden").unwrap_or(false),
            max_depth: config.get_u64("max_depth").map(|d| d as usize),
            exclude: build_globset(&excludes)?,
        }));
        Ok(())
    }

    async fn discover(&self) -> Result<Vec<Entity>, ProviderError> {
        let records = self.records().await?;
        Ok(self.to_entities(&records))
    }

    async fn hydrate(&self, id: &EntityId) -> Result<Entity, ProviderError> {
        if id.instance_key() != self.instance_key() {
            return Err(ProviderError::NotFound(id.to_string()));
        }
        let rel = safe_relative(id.resource_id())
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        let options = self.options()?;
        let (record, children) = tokio::task::spawn_blocking(move || load_one(&options, &rel))
            .await
            .map_err(|e| ProviderError::Unknown(e.to_string()))??;
        let kids: Vec<&str> = children.iter().map(String::as_str).collect();
        Ok(self.to_entity(&record, &kids))
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Entity>, ProviderError> {
        let terms = query.terms();
        let mut results = Vec::new();
        for entity in self.discover().await? {
            if let Some(scope) = query.entity_type.as_deref() {
                if !type_matches(&entity.entity_type, scope) {
                    continue;
                }
            }
            if !Self::matches_text(&entity, &terms) {
                continue;
            }
            let keep = filters::matches(&entity, &query.filters)
                .map_err(|e| ProviderError::Config(e.to_string()))?;
            if !keep {
                continue;
            }
            results.push(entity);
        }
        Ok(results)
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    /// Entries modified after `since`, judged by mtime.
    async fn discover_since(&self, since: DateTime<Utc>) -> Result<Vec<Entity>, ProviderError> {
        let mut entities = self.discover().await?;
        entities.retain(|e| e.timestamp.is_some_and(|t| t > since));
        Ok(entities)
    }

    async fn filter_capabilities(
        &self,
    ) -> Result<BTreeMap<String, FilterCapability>, ProviderError> {
        let mut caps = BTreeMap::new();
        caps.insert("path".to_string(), FilterCapability::text());
        caps.insert(
            "extension".to_string(),
            FilterCapability {
                supports_glob: true,
                ..FilterCapability::equality()
            },
        );
        caps.insert(
            "mime_type".to_string(),
            FilterCapability {
                supports_glob: true,
                ..FilterCapability::equality()
            },
        );
        caps.insert("size".to_string(), FilterCapability::range(Some(0.0), None));
        caps.insert("modified".to_string(), FilterCapability::range(None, None));
        Ok(caps)
    }

    fn as_filter_values(&self) -> Option<&dyn FilterValuesProvider> {
        Some(self)
    }
}

#[async_trait]
impl FilterValuesProvider for LocalFsProvider {
    /// Counts of each extension or MIME type present under the root.
    async fn filter_values(&self, attribute: &str) -> Result<Vec<FilterOption>, ProviderError> {
        if !matches!(attribute, "extension" | "mime_type") {
            return Ok(Vec::new());
        }
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for record in self.records().await? {
            let Some(ext) = record.extension.as_deref() else {
                continue;
            };
            let value = match attribute {
                "extension" => Some(ext),
                _ => mime_type(ext),
            };
            if let Some(value) = value {
                *counts.entry(value.to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|(value, count)| FilterOption::new(value).with_count(count))
            .collect())
    }
}
