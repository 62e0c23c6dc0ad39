//! Peer-to-peer synchronization
//!
//! Connection-per-message protocol: each TCP connection carries one framed
//! [`Package`], handled on its own thread. Nodes exchange heights with
//! `version`, pull missing blocks one `getdata` at a time and gossip new
//! transactions and blocks through `inv`.

pub mod message;
pub mod node;
pub mod server;

pub use message::{OpType, Package, COMMAND_LEN, NODE_VERSION};
pub use node::{Node, Nodes};
pub use server::{send_tx, NodeState, Server};
