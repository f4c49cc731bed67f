pub mod catalog;
pub mod composer;
pub mod computer;
pub mod event_source;
pub mod factorization;
pub mod ingestor;
pub mod retry;

pub use catalog::ItemCatalog;
pub use composer::{Composer, ServingPolicy};
pub use event_source::{EventPublisher, EventSource};
pub use ingestor::Ingestor;
