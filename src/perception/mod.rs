pub mod address_map;
pub mod snapshot;
pub mod types;

pub use address_map::{ElementAddressMap, Resolution};
pub use snapshot::{Snapshot, SnapshotService};
pub use types::{AxNode, AxTree, ElementRef};
