//! Small, self-contained helpers shared across the storage core that don't
//! belong to any one region.

pub mod bytes_ext;

pub use bytes_ext::BytesMutExt;
