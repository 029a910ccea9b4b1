pub mod client;
pub mod error;
pub mod types;

pub use client::{KoboClient, RequestBody};
pub use error::TransportError;
pub use types::{ExportFormat, ExportSpec, FormAsset, MultipleSelect};
