//! Low-level building blocks shared by the executor and the deque.

pub mod cache_padded;
pub mod deque;

pub use cache_padded::CachePadded;
pub use deque::ConcurrentDeque;
