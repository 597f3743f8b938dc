//! Campaign orchestration core: durable job queue with leasing, the
//! resumable domain generation engine, DNS and HTTP/keyword stage runners,
//! the campaign state machine, and the ordered event broadcaster.
#![allow(missing_docs)]

pub mod campaign;
pub mod directory;
pub mod error;
pub mod events;
pub mod generation;
pub mod memory;
pub mod orchestration;
pub mod results;
pub mod validation;

pub use error::{CoreError, Result};

/// Embedded schema migrations; applied by the server at startup and by
/// `db migrate`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
