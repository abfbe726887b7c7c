//! A cache-conscious hybrid burst-trie / array hash table.
//!
//! [`HatTrie`] maps arbitrary byte-string keys — including keys containing
//! embedded zero bytes — to `u64` counters. Internally it is a trie of
//! 256-way branch nodes over [`ArrayHashTable`] leaves: each leaf packs its
//! suffix records into a small number of contiguous byte buffers rather than
//! a node per key, and bursts into a subtrie once it grows past
//! [`trie::BURST_THRESHOLD`] records. The [`aht`] module is also usable on
//! its own as a flat, bucket-indexed byte-keyed counter map.

mod hash;
mod varint;

pub mod aht;
pub mod trie;

pub use aht::{AhtConfig, AhtValueRef, ArrayHashTable};
pub use trie::{HatTrie, HatTrieConfig, Iter, ValueRef};
