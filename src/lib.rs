//! Pure Rust implementation of LMDB with modern performance optimizations
//!
//! This crate provides a high-performance, type-safe embedded database
//! that is compatible with LMDB while leveraging modern Rust features
//! and performance technologies like SIMD.

#![warn(missing_docs)]
#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![deny(unsafe_op_in_unsafe_fn)]
// #![cfg_attr(feature = "simd", feature(portable_simd))]

pub mod branch;
pub mod btree;
pub mod cache_aligned;
pub mod catalog;
pub mod checksum;
pub mod comparator;
pub mod cursor;
pub mod cursor_iter;
pub mod db;
pub mod dpl;
pub mod dupsort;
pub mod durability;
pub mod env;
pub mod error;
pub mod fixed_size;
pub mod freelist;
pub mod geometry;
pub mod io;
pub mod meta;
pub mod nested_txn;
pub mod overflow;
pub mod page;
pub mod pnl;
pub mod reader;
pub mod rkl;
pub mod segregated_freelist;
pub mod space_info;
pub mod spill;
pub mod tree_utils;
pub mod troika;
pub mod txn;


#[cfg(test)]
mod io_test;

// Re-exports
pub use db::{Database, DatabaseFlags, Key, Value};
pub use env::{EnvBuilder, Environment};
pub use error::{Error, Result};
pub use txn::{ReadTransaction, Transaction, WriteTransaction};

// Type aliases for common use cases
/// A read-only transaction
pub type RoTxn<'env> = Transaction<'env, txn::Read>;
/// A read-write transaction
pub type RwTxn<'env> = Transaction<'env, txn::Write>;

/// The default page size (4KB)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Maximum key size (when not using longer-keys feature)


/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
