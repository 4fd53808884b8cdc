//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use intentful_core::{
    IntentfulBehaviour, IntentfulSignature, Kind, PathSegment, Provider,
};
use intentful_engine::{EngineConfig, HandlerError, HandlerRequest, IntentHandler};
use intentful_storage::{EntityStore, MemoryStorage};
use serde_json::{json, Value};

pub const PREFIX: &str = "test";
pub const VERSION: &str = "1";

pub fn signature(name: &str) -> IntentfulSignature {
    IntentfulSignature {
        name: name.to_string(),
        signature: name.to_string(),
        procedure_callback: format!("http://handler.local/{}", name),
        base_callback: "http://handler.local".to_string(),
    }
}

pub fn kind(name: &str, behaviour: IntentfulBehaviour, signatures: &[&str]) -> Kind {
    Kind {
        name: name.to_string(),
        name_plural: None,
        kind_structure: json!({
            name: {
                "type": "object",
                "properties": {
                    "cpu": { "type": "integer" },
                    "memory": { "type": "integer" },
                    "ip": { "type": "string", "x-intentful": "status-only" }
                }
            }
        }),
        intentful_behaviour: behaviour,
        intentful_signatures: signatures.iter().map(|s| signature(s)).collect(),
        dependency_tree: Default::default(),
        diff_delay: None,
        diff_retry_exponent: None,
        diff_selection_strategy: Default::default(),
    }
}

/// `vm` is differ-based over `cpu` and `memory`; `label` mirrors; `note` is spec-only.
pub fn provider() -> Provider {
    Provider {
        prefix: PREFIX.to_string(),
        version: VERSION.to_string(),
        kinds: vec![
            kind("vm", IntentfulBehaviour::DifferBased, &["cpu", "memory"]),
            kind("label", IntentfulBehaviour::ImmediateMirror, &[]),
            kind("note", IntentfulBehaviour::SpecOnly, &[]),
        ],
        extension_structure: Value::Null,
        created_at: None,
    }
}

/// Fast loops, small jitter.
pub fn config() -> EngineConfig {
    EngineConfig {
        diff_resolve_delay: 20,
        intent_resolve_delay: 20,
        entity_poll_delay: 10,
        deleted_watcher_persist_time: 0,
        debug: true,
        ..EngineConfig::default()
    }
}

/// In-process intent handler that applies each diff field it receives to the
/// entity's status, and records how it was called.
pub struct RecordingHandler {
    storage: Arc<MemoryStorage>,
    pub calls: AtomicUsize,
    pub health_checks: AtomicUsize,
    pub healthy: AtomicBool,
    pub failing: AtomicBool,
    /// When set, report success without touching status.
    pub inert: AtomicBool,
    pub delay_secs: Mutex<Option<f64>>,
    running: Mutex<HashMap<String, usize>>,
    pub max_per_entity: AtomicUsize,
}

impl RecordingHandler {
    pub fn new(storage: Arc<MemoryStorage>) -> Arc<Self> {
        Arc::new(RecordingHandler {
            storage,
            calls: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            inert: AtomicBool::new(false),
            delay_secs: Mutex::new(None),
            running: Mutex::new(HashMap::new()),
            max_per_entity: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self, key: &str) {
        let mut running = self.running.lock().unwrap();
        let n = running.entry(key.to_string()).or_insert(0);
        *n += 1;
        self.max_per_entity.fetch_max(*n, Ordering::SeqCst);
    }

    fn leave(&self, key: &str) {
        let mut running = self.running.lock().unwrap();
        if let Some(n) = running.get_mut(key) {
            *n -= 1;
        }
    }
}

/// `{"a": {"b": value}}` for path `["a", "b"]`.
fn patch_for(path: &[PathSegment], value: Value) -> Value {
    path.iter().rev().fold(value, |acc, seg| match seg {
        PathSegment::Field(name) => json!({ name.as_str(): acc }),
        PathSegment::Index(_) => acc,
    })
}

#[async_trait]
impl IntentHandler for RecordingHandler {
    async fn invoke(
        &self,
        url: &str,
        request: &HandlerRequest,
    ) -> Result<Option<f64>, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let entity_ref = request.metadata.entity_ref();
        let key = entity_ref.key();
        self.enter(&key);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(HandlerError::Status {
                url: url.to_string(),
                status: 500,
            })
        } else {
            if !self.inert.load(Ordering::SeqCst) {
                for field in &request.input {
                    let value = field.spec.first().cloned().unwrap_or(Value::Null);
                    let patch = patch_for(&field.path, value);
                    self.storage
                        .update_status(&entity_ref, &patch, None)
                        .await
                        .unwrap();
                }
            }
            let delay = *self.delay_secs.lock().unwrap();
            Ok(delay)
        };
        self.leave(&key);
        result
    }

    async fn healthy(&self, _url: &str) -> bool {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst)
    }
}
