use intentful_engine::Engine;
use intentful_storage::MemoryStorage;

/// Shared state for the HTTP handlers.
pub(crate) struct AppState {
    pub(crate) engine: Engine<MemoryStorage>,
}
