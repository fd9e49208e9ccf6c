//! LAN mesh scheduling for the Loka gateway
//!
//! Tracks discovered peer nodes, scores them for task placement, manages
//! idle-to-sleep transitions with magic-packet wake, and gates cooperative
//! task routing through the credit ledger.

pub mod coop;
pub mod discovery;
pub mod registry;
pub mod scheduler;
pub mod sleep;
pub mod types;
pub mod wake;

pub use registry::NodeRegistry;
pub use scheduler::select_node;
pub use types::{MeshNode, MeshTask, NodeCapabilities, NodeRole, NodeState, TaskPriority, ThermalZone};
