use crate::llm::TextGenerator;
use crate::storage::Storage;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub generator: Arc<dyn TextGenerator>,
}
