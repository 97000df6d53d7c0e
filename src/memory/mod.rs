//! Shared memory primitives for in-process sample exchange.
//!
//! # Architecture
//!
//! - [`SampleCell`]: lock-free latest-value buffer, one writer side and many
//!   concurrent readers
//! - [`ReadCursor`]: per-reader last-seen generation
//! - [`CellReader`]: a cell paired with its own cursor
//!
//! # Example
//!
//! ```rust
//! use topiclink::element::FlowStatus;
//! use topiclink::memory::{ReadCursor, SampleCell};
//!
//! let cell = SampleCell::new(0u64);
//! let cursor = ReadCursor::new();
//!
//! cell.write(42).unwrap();
//!
//! let mut value = 0;
//! assert_eq!(cell.read(&cursor, &mut value, false), FlowStatus::NewData);
//! assert_eq!(value, 42);
//! assert_eq!(cell.read(&cursor, &mut value, false), FlowStatus::OldData);
//! ```

mod cell;

pub use cell::{CellReader, ReadCursor, SampleCell};
