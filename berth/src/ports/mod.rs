//! Port allocation

pub mod allocator;

pub use allocator::PortAllocator;
