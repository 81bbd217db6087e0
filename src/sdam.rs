//! Server discovery and monitoring: the description of the deployment, the scanner that keeps it
//! current, and server selection.

mod description;
pub(crate) mod scanner;
mod topology;

pub use self::description::{
    server::{ServerDescription, ServerType},
    topology::TopologyType,
};
pub(crate) use self::{
    description::{
        server::{MAX_WIRE_VERSION, MIN_WIRE_VERSION},
        topology::TopologyDescription,
    },
    scanner::ScannerState,
    topology::Topology,
};
