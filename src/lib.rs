//! A MongoDB client built around two state machines: the cursor, which iterates query results
//! batch by batch over the modern command protocol or the legacy OP_QUERY / OP_GETMORE one,
//! and the topology, which monitors a deployment and selects a suitable server for every
//! operation. It uses the [`bson`] crate for BSON support and runs on [`tokio`].
//!
//! # Example
//!
//! ```rust,no_run
//! use mongoc::{bson::doc, error::Result, Client};
//!
//! # async fn run() -> Result<()> {
//! let client = Client::with_uri_str("mongodb://localhost:27017/?replicaSet=rs0")?;
//! let coll = client.database("shop").collection("orders");
//!
//! let mut cursor = coll.find(doc! { "status": "open" }, None);
//! while let Some(order) = cursor.next().await {
//!     println!("{}", order);
//! }
//! if let Some(error) = cursor.error() {
//!     return Err(error.clone());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Topology modes
//!
//! A client created with [`TopologyMode::Single`](options::TopologyMode::Single) (the default)
//! has no background tasks: servers are scanned while selecting one, at most once per call when
//! `serverSelectionTryOnce` is set. A [`TopologyMode::Pooled`](options::TopologyMode::Pooled)
//! client monitors the deployment from a background task, and selection waits for that task to
//! publish a suitable description.
//!
//! # Logging
//!
//! Events are emitted with the [`tracing`](https://docs.rs/tracing) crate under the targets
//! `mongoc::server_selection`, `mongoc::topology`, `mongoc::command` and `mongoc::cursor`, all
//! at debug level. Install a subscriber to see them.

#![warn(missing_docs)]

pub mod options;

pub use ::bson;

pub mod change_stream;
mod client;
mod cmap;
mod coll;
mod cursor;
mod db;
pub mod error;
mod hello;
mod sdam;
mod selection_criteria;
mod serde_util;
#[cfg(test)]
mod test;
mod trace;

pub use crate::{
    client::{ClusterTime, Client},
    coll::{Collection, Namespace},
    cursor::Cursor,
    db::Database,
    hello::HandshakeMetadata,
    sdam::{ServerDescription, ServerType, TopologyType},
    selection_criteria::OperationType,
};
