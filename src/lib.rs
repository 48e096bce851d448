//! Dynamically-updatable double-array trie over raw byte strings.
//!
//! The branching structure lives in a flat pair of parallel index arrays
//! (`base`, `check`) as specified in the paper: "An efficient implementation
//! of trie structures" <https://dl.acm.org/citation.cfm?id=146691>, and every
//! maximal run of single-child states is compressed into one stored byte
//! suffix in a side tail store. Keys are arbitrary byte sequences; `0x00` is
//! an ordinary byte.
//!
//! Add it to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tailtrie = "0.1"
//! ```
//!
//! ## Example
//!
//! ```rust
//! use tailtrie::Trie;
//!
//! let mut trie = Trie::new();
//! assert!(trie.add(b"bar").unwrap());
//! assert!(trie.add(b"barn").unwrap());
//! assert!(trie.add(b"barter").unwrap());
//! assert!(!trie.add(b"bar").unwrap());
//!
//! assert!(trie.contains(b"bar"));
//! assert!(!trie.contains(b"ba"));
//!
//! let keys = trie.children_with_prefix(b"bar");
//! assert_eq!(keys, vec![b"bar".to_vec(), b"barn".to_vec(), b"barter".to_vec()]);
//!
//! assert!(trie.delete(b"bar"));
//! assert!(!trie.contains(b"bar"));
//! assert_eq!(trie.len(), 2);
//! ```

mod darray;
mod error;
mod tail;
mod trie;

pub use crate::error::Error;
pub use crate::trie::{Cursor, Trie};
