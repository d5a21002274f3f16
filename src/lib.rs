pub mod alerts;
pub mod config;
pub mod detection;
pub mod error;
pub mod generator;
pub mod optimize;
pub mod store;
pub mod surveillance;
pub mod timing;
pub mod types;

pub use alerts::{Alert, AlertEngine, AlertSeverity, AlertSummary, RuleId};
pub use config::DetectorConfig;
pub use error::{DetectError, Result};
pub use store::{DirStore, MemoryStore, TableStore};
pub use surveillance::{DetectionReport, InsiderTradingDetector};
