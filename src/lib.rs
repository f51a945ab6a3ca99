//! chain-hashmap: byte-keyed chaining hash tables with prime-modulus
//! growth.
//!
//! Keys and elements are fixed-size byte blocks; typed facades can wrap
//! the byte core. Three layers:
//!
//! - [`chain`]: the circular doubly linked ring backing every table chain.
//!   Nodes keep their addresses for their whole lifetime, so tables can
//!   use node pointers as index values and growth can splice nodes instead
//!   of reallocating them.
//! - [`DivChainMap`]: the single-threaded division-method table. Slot
//!   counts walk a fixed prime schedule; the load-factor bound is pure
//!   integer arithmetic ([`LoadBound`]).
//! - [`StripedChainMap`]: the concurrent variant with batched insertion,
//!   striped slot-group locks and a reader/writer rehash lock.
//!
//! Key comparison, the key-to-word reduction and element teardown are
//! supplied per table through [`MapPolicy`]; [`BytesPolicy`] is the
//! byte-wise default.

pub mod chain;
pub mod div_chain_map;
pub mod policy;
pub mod striped_chain_map;

mod bound;
mod primes;

mod div_chain_map_proptest;

pub use bound::LoadBound;
pub use div_chain_map::DivChainMap;
pub use policy::{le_byte_fold, BytesPolicy, MapPolicy};
pub use striped_chain_map::{EltRef, StripedChainMap};
