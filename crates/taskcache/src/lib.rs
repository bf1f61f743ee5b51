//! Scheduled task history from the Windows Task Scheduler cache.
//!
//! The SOFTWARE hive keeps a record of every registered scheduled task under
//! `Microsoft\Windows NT\CurrentVersion\Schedule\TaskCache`. This crate walks
//! that key through the [`winreg::RegistryKey`] abstraction, joins each task's
//! identifier to its name and turns the cached timestamps into
//! [`events::EventRecord`]s.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod plugins;
pub mod scan;
pub mod time;

pub use config::{ConfigError, OutputFormat, ScanConfig};
pub use context::{CollectingContext, Diagnostic, ParserContext};
pub use error::{TaskCacheError, TaskCacheResult};
pub use events::{EventEnvelope, EventRecord};
pub use plugins::task_cache::TaskCachePlugin;
