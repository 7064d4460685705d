//! Catalog
//!
//! Book copies, edition holdings and thumbnails.
//!
//! A copy is identified by its `code`; copies sharing an ISBN-13 form a
//! holding whose `stock` is the number of copies not on an active loan.
//! Thumbnail replacement coordinates with object storage and compensates a
//! fresh upload when the previous asset cannot be removed.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod validation;
pub mod object_store;
pub mod catalog;

pub use catalog::{BookDetails, Catalog, Holding};
pub use object_store::{MemoryObjectStorage, ObjectStorage, StoredObject};
pub use validation::NewBook;
