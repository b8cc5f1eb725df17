//! B+ tree index: a disk-based ordered map supporting point lookups,
//! insertions, and deletions. Range scans are an explicit non-goal.

mod tree;

pub use tree::BTree;
