pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ingest;
pub mod query;
pub mod store;
pub mod watch;

pub use config::Config;
pub use error::{ChemkgError, Result};
pub use gateway::{CommandParserGateway, ParseOutcome, ParserGateway};
pub use ingest::{IngestOutcome, IngestReport, IngestionCoordinator, KnowledgeService, ProcessedFileIndex};
pub use query::{QueryEngine, QueryOptions};
pub use store::{KnowledgeStore, ProcessedFileRecord};
pub use watch::{DirectoryWatcher, WatchedFile};
