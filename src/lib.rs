#![cfg_attr(not(test), no_std)]
#![deny(clippy::all)]
#![allow(clippy::needless_return)]
#![allow(clippy::upper_case_acronyms)]

//! Kernel-plane queueing, congestion control and block-cipher core.
//!
//! Four largely independent pieces live here:
//!
//! - [`aqm`]: CoDel-style controlled-delay active queue management.
//! - [`fq`]: flow-queue deficit round-robin scheduler built on top of [`aqm`].
//! - [`tcp_cc`]: a pluggable TCP congestion-control framework (NewReno, CUBIC).
//! - [`aes_ct`]: constant-time bitsliced AES.
//!
//! Every public operation on the hot path (queueing, scheduling, congestion
//! control) is infallible; only one-time configuration can fail, and it fails
//! through [`system_error::NetCoreError`] rather than panicking.

extern crate alloc;

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod aes_ct;
pub mod aqm;
pub mod fq;
pub mod tcp_cc;

pub use system_error::NetCoreError;
