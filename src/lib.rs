//! An in-memory B+ tree keyed by 64-bit unsigned integers.
//!
//! This crate provides [`RingTree`], an ordered index mapping `u64` keys to
//! opaque values. It was built as the lookup structure behind a
//! consistent-hash ring: entries are addressed by hashed identifiers (see
//! [`key::ident_key`]) and the common read pattern is "the next few entries
//! clockwise from here", served by [`RingTree::next_n`].
//!
//! # Example
//!
//! ```
//! use ringtree::{key, RingTree};
//!
//! let mut ring = RingTree::new(16)?;
//! ring.insert(key::ident_key("node-a.internal"), "node-a");
//! ring.insert(key::ident_key("node-b.internal"), "node-b");
//! ring.insert(key::ident_key("node-c.internal"), "node-c");
//!
//! // The owner of an item is the first node clockwise from its hash.
//! let item = key::ident_key("user:1234");
//! let mut owners = ring.next_n(item, 1);
//! if owners.is_empty() {
//!     // Past the last node; the ring wraps to the lowest hash.
//!     owners = ring.next_n(0, 1);
//! }
//! assert_eq!(owners.len(), 1);
//! # Ok::<(), ringtree::RingTreeError>(())
//! ```
//!
//! # Implementation
//!
//! The index is a B+ tree: all pairs live in the leaves, internal nodes
//! hold separator keys only. Leaves are chained through a cyclic
//! doubly-linked ring in ascending key order, so a forward scan never
//! re-descends the tree and wraps around the key space for free, which is
//! exactly the shape a hash ring wants. Nodes live in an arena and reference each
//! other through integer handles, which keeps the parent back-links and
//! sibling rings free of ownership cycles.
//!
//! The tree is single-writer: mutation takes `&mut self` and runs to
//! completion. Callers that need concurrency must serialize externally.

#![no_std]
#![forbid(keyword_idents)]
#![forbid(non_ascii_idents)]
#![forbid(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

extern crate alloc;

mod error;
mod raw;

pub mod key;
pub mod ring_tree;

pub use error::RingTreeError;
pub use ring_tree::RingTree;

/// Tree key: an unsigned 64-bit integer, ordered by the natural unsigned
/// comparison.
pub type Key = u64;
