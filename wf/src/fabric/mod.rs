//! Message stream and state KV substrate
//!
//! Workers talk to the broker only through the [`WorkflowStream`] and
//! [`StateStore`] traits. [`NatsFabric`] is the production binding;
//! [`MemoryFabric`] reproduces the same semantics in-process.

mod error;
mod memory;
mod nats;
mod stream;
pub mod subjects;

pub use error::{FabricError, StateError};
pub use memory::MemoryFabric;
pub use nats::{NatsFabric, NatsStateStore, NatsStream};
pub use stream::{ConsumerSpec, Delivery, MessageFetcher, StateEntry, StateStore, WorkflowStream};
