//! Typed flat-file records and everything that owns the repository on disk:
//! per-entity stores, scoped constant values, the single-writer lock, the
//! git persistence layer, and schema migrations.
//!
//! One file per entity kind at the repository root, one record per line,
//! fields comma-separated with no escape character. All mutation goes
//! through [`lock`] and is committed via [`vcs`].

pub mod entities;
pub mod lock;
pub mod record;
pub mod schema;
pub mod values;
pub mod vcs;

pub use record::{Record, Store};
