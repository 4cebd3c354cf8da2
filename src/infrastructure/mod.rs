pub mod gemini;
pub mod mock;
pub mod oanda;
pub mod playbook_store;
pub mod state_sync;
pub mod telegram;

pub use playbook_store::PlaybookStore;
pub use state_sync::StateSynchronizer;
