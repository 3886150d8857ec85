//! Filecoin verified-registry claim ingestion
//!
//! See [`pipeline`] for the run flow.

pub mod pipeline;
pub mod sqlite_pragma;
