//! # Repository Layer
//!
//! Repositories that encapsulate SeaORM operations for the pipeline tables.
//! Inserts are single-row autocommit writes; `prune_older_than` is the only
//! deletion path for the log tables.

pub mod chat_log;
pub mod event;
pub mod interaction;
pub mod settings;

pub use chat_log::ChatLogRepository;
pub use event::EventRepository;
pub use interaction::InteractionRepository;
pub use settings::SettingsRepository;

/// Identifier assigned by the store to an inserted row.
pub type RowId = i64;
