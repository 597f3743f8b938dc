pub mod store;

pub use store::{PostgresResultStore, ResultStore};
