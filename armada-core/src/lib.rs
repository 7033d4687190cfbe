//! Core types shared by the armada client, backends and workers.
//!
//! Nothing in this crate talks to a backend. It defines what travels between the
//! client and the execution backend (invocations, handle states, identifiers), the
//! codec seam used to turn values into bytes, the lazy argument container, and the
//! content hasher behind materialization.

pub mod codec;
pub mod digest;
pub mod error;
pub mod invocation;
pub mod lazy;
pub mod materialize;
pub mod primitives;
pub mod state;

pub use error::{ArmadaError, Result};
pub use invocation::{Argument, Invocation};
pub use lazy::LazyArgs;
pub use materialize::{Materialize, MaterializeKind, materialize};
pub use primitives::{ContentDigest, ResultId, SessionToken};
pub use state::HandleState;
