//! Conformance test suite for storage backends.
//!
//! Any implementation of [`Storage`] can run this backend-agnostic suite to
//! verify it behaves the way the engine expects. The suite covers:
//!
//! - **Entities**: optimistic spec versioning, status hashing and merging, retention
//! - **Watchlist**: atomic edits and version bumps
//! - **Watchers**: save, partial update, filtered listing, deletion
//! - **Providers**: registration, replacement, intentful kind lookup
//! - **Concurrency**: racing spec writers, racing watchlist editors
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use intentful_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn my_backend_conformance() {
//!     let report = run_conformance_suite(|| async { MyBackend::connect().await }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod concurrent;
mod entity;
mod provider;
mod watcher;
mod watchlist;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use intentful_core::{
    DiffSelection, EntityRef, IntentWatcher, IntentfulBehaviour, IntentfulSignature,
    IntentfulStatus, Kind, Provider,
};
use time::OffsetDateTime;

use crate::Storage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "entity", "watchlist").
    pub category: String,
    /// Test name (e.g. "update_spec_bumps_version").
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: Storage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(entity::run_entity_tests(&factory).await);
    results.extend(watchlist::run_watchlist_tests(&factory).await);
    results.extend(watcher::run_watcher_tests(&factory).await);
    results.extend(provider::run_provider_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

/// Turn a failed expectation into the suite's error string.
fn check(cond: bool, msg: impl FnOnce() -> String) -> Result<(), String> {
    if cond {
        Ok(())
    } else {
        Err(msg())
    }
}

// ── Helpers: fixtures with sensible defaults ────────────────────────────────

fn make_ref(uuid: &str) -> EntityRef {
    EntityRef::new("test", "1.0", "widget", uuid)
}

fn make_kind(name: &str, behaviour: IntentfulBehaviour) -> Kind {
    Kind {
        name: name.to_string(),
        name_plural: None,
        kind_structure: serde_json::json!({ name: {"type": "object"} }),
        intentful_behaviour: behaviour,
        intentful_signatures: vec![IntentfulSignature {
            name: "size".to_string(),
            signature: "size".to_string(),
            procedure_callback: "http://127.0.0.1:1/size".to_string(),
            base_callback: "http://127.0.0.1:1".to_string(),
        }],
        dependency_tree: BTreeMap::new(),
        diff_delay: None,
        diff_retry_exponent: None,
        diff_selection_strategy: DiffSelection::Basic,
    }
}

fn make_provider(version: &str) -> Provider {
    Provider {
        prefix: "test".to_string(),
        version: version.to_string(),
        kinds: vec![
            make_kind("widget", IntentfulBehaviour::DifferBased),
            make_kind("label", IntentfulBehaviour::SpecOnly),
        ],
        extension_structure: serde_json::Value::Null,
        created_at: None,
    }
}

fn make_watcher(uuid: &str, entity: &EntityRef, spec_version: u64) -> IntentWatcher {
    IntentWatcher {
        uuid: uuid.to_string(),
        entity_ref: entity.clone(),
        spec_version,
        user: None,
        diffs: Vec::new(),
        status: IntentfulStatus::Active,
        resolved_diff_count: 0,
        last_status_changed: None,
        created_at: OffsetDateTime::now_utc(),
    }
}
