//! # vigil process
//!
//! Low-level process operations used by the supervisor:
//! - Graceful termination and force kill
//! - Process existence checks
//!
//! Only unix targets carry real implementations; elsewhere every
//! operation reports failure.

pub mod check;
pub mod terminate;

pub use check::*;
pub use terminate::*;
