//! The serializer family: executors that impose ordering and parallelism
//! constraints on top of any base executor.
//!
//! All three share one shape: an internal FIFO buffers surplus tasks, and
//! a counter decides when a submission may go straight to the base
//! executor versus wait its turn. None of them ever blocks a worker
//! thread; constraints are enforced purely by when tasks are released.

pub mod n_serializer;
pub mod rw_serializer;
pub mod serializer;

pub use n_serializer::NSerializer;
pub use rw_serializer::{RwCounts, RwReader, RwSerializer, RwWriter};
pub use serializer::Serializer;
