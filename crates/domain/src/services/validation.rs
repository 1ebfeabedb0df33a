//! JSON-Schema validation of configuration values.
//!
//! Compiled validators are cached by the canonical serialization of their
//! schema. The cache is the only shared mutable state of the engine and is
//! injected through the [`SchemaCache`] trait.

use jsonschema::JSONSchema;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{ConfigError, FieldError};
use crate::value_objects::ConfigurationValue;

/// Default number of compiled schemas kept in memory.
pub const DEFAULT_SCHEMA_CACHE_CAPACITY: usize = 256;

/// Keys that are rejected anywhere inside a stored value.
pub const RESERVED_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Storage for compiled validators.
pub trait SchemaCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Arc<JSONSchema>>;
    fn put(&self, key: String, schema: Arc<JSONSchema>);
    fn clear(&self);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct CacheEntries {
    compiled: HashMap<String, Arc<JSONSchema>>,
    insertion_order: VecDeque<String>,
}

/// Bounded in-memory cache. Evicts the oldest entry once full.
pub struct InMemorySchemaCache {
    capacity: usize,
    entries: RwLock<CacheEntries>,
}

impl InMemorySchemaCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(CacheEntries::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemorySchemaCache {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for InMemorySchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySchemaCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl SchemaCache for InMemorySchemaCache {
    fn get(&self, key: &str) -> Option<Arc<JSONSchema>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.compiled.get(key).cloned()
    }

    fn put(&self, key: String, schema: Arc<JSONSchema>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.compiled.insert(key.clone(), schema).is_some() {
            return;
        }
        entries.insertion_order.push_back(key);
        while entries.compiled.len() > self.capacity {
            match entries.insertion_order.pop_front() {
                Some(oldest) => {
                    entries.compiled.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.compiled.clear();
        entries.insertion_order.clear();
    }

    fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.compiled.len()
    }
}

/// Validates configuration values against optional JSON schemas.
#[derive(Clone)]
pub struct SchemaValidationService {
    cache: Arc<dyn SchemaCache>,
}

impl SchemaValidationService {
    pub fn new(cache: Arc<dyn SchemaCache>) -> Self {
        Self { cache }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(Arc::new(InMemorySchemaCache::new(capacity)))
    }

    /// Fails with `InvalidSchema` for a malformed schema and with
    /// `ValidationFailed` listing every violated constraint.
    pub fn validate(
        &self,
        value: &ConfigurationValue,
        schema: Option<&Value>,
    ) -> Result<(), ConfigError> {
        let Some(schema) = schema.filter(|s| !is_empty_schema(s)) else {
            return Ok(());
        };

        let compiled = self.compile(schema)?;
        let instance = value.to_json();
        let errors = collect_errors(&compiled, &instance);
        if errors.is_empty() {
            Ok(())
        } else {
            tracing::debug!(error_count = errors.len(), "Value rejected by schema");
            Err(ConfigError::ValidationFailed(errors))
        }
    }

    /// A malformed schema counts as invalid.
    pub fn is_valid(&self, value: &ConfigurationValue, schema: Option<&Value>) -> bool {
        self.validate(value, schema).is_ok()
    }

    /// Violations as a list; a malformed schema is reported as a single
    /// root-level entry.
    pub fn validation_errors(
        &self,
        value: &ConfigurationValue,
        schema: Option<&Value>,
    ) -> Vec<FieldError> {
        match self.validate(value, schema) {
            Ok(()) => Vec::new(),
            Err(ConfigError::ValidationFailed(errors)) => errors,
            Err(other) => vec![FieldError::new("", other.to_string())],
        }
    }

    /// Returns the cached validator for `schema`, compiling it on a miss.
    pub fn compile(&self, schema: &Value) -> Result<Arc<JSONSchema>, ConfigError> {
        let cache_key = canonical_json(schema);
        if let Some(compiled) = self.cache.get(&cache_key) {
            tracing::debug!("Schema cache hit");
            return Ok(compiled);
        }

        tracing::debug!("Schema cache miss, compiling");
        let compiled = JSONSchema::compile(schema)
            .map_err(|e| ConfigError::InvalidSchema(e.to_string()))?;
        let compiled = Arc::new(compiled);
        self.cache.put(cache_key, compiled.clone());
        Ok(compiled)
    }

    /// Checks that `schema` is a compilable JSON schema.
    pub fn validate_schema(&self, schema: &Value) -> Result<(), ConfigError> {
        if !(schema.is_object() || schema.is_boolean()) {
            return Err(ConfigError::InvalidSchema(
                "schema must be a JSON object or boolean".to_string(),
            ));
        }
        self.compile(schema).map(|_| ())
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!("Schema cache cleared");
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }
}

impl Default for SchemaValidationService {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SCHEMA_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for SchemaValidationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidationService")
            .field("cached_schemas", &self.cache.len())
            .finish()
    }
}

fn collect_errors(compiled: &JSONSchema, instance: &Value) -> Vec<FieldError> {
    match compiled.validate(instance) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|e| FieldError::new(e.instance_path.to_string(), e.to_string()))
            .collect(),
    }
}

/// `None`, `null` and `{}` impose no constraints.
fn is_empty_schema(schema: &Value) -> bool {
    match schema {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Serialization with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut sorted = Map::new();
                for key in keys {
                    sorted.insert(key.clone(), sort(&map[key]));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

/// Infers a permissive schema describing the shape of `value`.
pub fn generate_schema_from_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({"type": "null"}),
        Value::Bool(_) => json!({"type": "boolean"}),
        Value::Number(n) if n.is_i64() || n.is_u64() => json!({"type": "integer"}),
        Value::Number(_) => json!({"type": "number"}),
        Value::String(_) => json!({"type": "string"}),
        Value::Array(items) => {
            let item_schema = items.first().map(generate_schema_from_value).unwrap_or_else(|| json!({}));
            json!({"type": "array", "items": item_schema})
        }
        Value::Object(map) => {
            let properties: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), generate_schema_from_value(v)))
                .collect();
            let required: Vec<&String> = map.keys().collect();
            json!({"type": "object", "properties": properties, "required": required})
        }
    }
}

/// Dotted paths of every reserved key found at any depth.
pub fn find_reserved_keys(value: &Value) -> Vec<String> {
    fn walk(value: &Value, prefix: &str, found: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, nested) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", prefix, key)
                    };
                    if RESERVED_KEYS.contains(&key.as_str()) {
                        found.push(path.clone());
                    }
                    walk(nested, &path, found);
                }
            }
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    let path = if prefix.is_empty() {
                        index.to_string()
                    } else {
                        format!("{}.{}", prefix, index)
                    };
                    walk(item, &path, found);
                }
            }
            _ => {}
        }
    }

    let mut found = Vec::new();
    walk(value, "", &mut found);
    found
}
