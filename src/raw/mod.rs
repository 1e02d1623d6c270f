mod arena;
mod handle;
mod node;
mod raw_ring_tree;

pub(crate) use raw_ring_tree::RawRingTree;
