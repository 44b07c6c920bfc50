//! Shared types for pour: package descriptors, checksums and install receipts.

pub mod descriptor;
pub mod hash;
pub mod receipt;
pub mod types;

// Re-exports
pub use descriptor::{DescriptorError, InstallRule, PackageDescriptor, PatchRule, Source};
pub use hash::*;
pub use receipt::{AppliedPatch, InstallReceipt, PlacedFile, ReceiptStatus};
pub use types::*;
