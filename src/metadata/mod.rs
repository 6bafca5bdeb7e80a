//! Metadata virtualization layer: stores and retrieves the fake-ownership
//! record attached to each backing filesystem object.

pub mod codec;
pub mod record;
pub mod store;
pub mod symlink;

pub use codec::{Flags, RECORD_LEN};
pub use record::Record;
pub use store::MetadataStore;
