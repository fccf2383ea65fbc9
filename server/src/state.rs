use std::sync::Arc;
use supervisor::{preprocess::Preprocessor, store::DatasetStore, Supervisor};

/// Shared by every handler; all members are cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: DatasetStore,
    pub supervisor: Supervisor,
    pub preprocessor: Arc<Preprocessor>,
}
