//! Change-data-capture ingress (spec.md §4.5, C5).

pub mod ingress;
pub mod record;

pub use ingress::ingest;
pub use record::{CdcAction, CdcBatch, CdcMetadata, CdcRecord};
