//! Contains all of the types needed to specify options to client operations.
//!
//! Most of the options structs in this module use the
//! [`typed-builder`](https://crates.io/crates/typed-builder) crate to derive a type-safe builder
//! API on them. For example, to create an instance of [`FindOptions`] with only `limit` and
//! `batch_size` set, the builder API can be used as follows:
//!
//! ```rust
//! # use mongoc::options::FindOptions;
//! #
//! # let options = FindOptions::builder()
//! #                   .limit(20)
//! #                   .batch_size(5)
//! #                   .build();
//! ```

pub use crate::{
    change_stream::options::*,
    client::options::*,
    coll::options::*,
    selection_criteria::*,
};
