//! Stimulus catalog: turns a test name into the ordered sequence the trial
//! engine presents, and maps image names onto turntable bays.

mod bays;
mod catalog;
mod error;
mod order;

pub use bays::{BayAssignment, BAY_COUNT};
pub use catalog::{scan_folder, CatalogSettings, Resolved, StimulusCatalog, IMAGE_EXTENSIONS};
pub use error::{CatalogError, CatalogResult};
pub use order::{export_order, read_order, write_order};
