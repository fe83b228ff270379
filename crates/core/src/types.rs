//! Domain types for persisted records and the quote/component model.

pub mod catalog;
pub mod quote;
pub mod record;

pub use catalog::{ComponentCatalog, ExclusionGroup, NumericParam};
pub use quote::{Adjustment, AdjustmentKind, ComponentRecord, ProjectInfo, Quote, Timestamps};
pub use record::{payload_timestamp, IndexValue, Record, RecordId, StoreName};
