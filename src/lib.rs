//! `grootfs`: a fake-root overlay FUSE filesystem engine.
//!
//! An unprivileged process can use this crate to present a writable view of
//! a backing directory in which `chmod`/`chown`/`mkdir`-with-explicit-owner
//! and arbitrary `setxattr` all "work" without ever touching the backing
//! tree's real ownership or requiring host privileges. The emulated
//! ownership/mode is persisted as a single extended attribute per backing
//! object (`metadata`); the attribute namespace clients see is a filtered
//! projection of the same backing xattr store (`xattr`); the full FUSE
//! operation set is implemented against those two layers (`ops`); a session
//! driver frames requests against the kernel device (`session`); and the
//! multi-process mount bring-up protocol lives in `bringup`.
//!
//! Out of scope: CLI flag parsing, the preload shim that runs bring-up
//! before a target binary's `main`, and the external setuid helpers
//! (`newuidmap`/`newgidmap`) this crate only shells out to.

pub mod bringup;
pub mod config;
pub mod error;
pub mod metadata;
pub mod ops;
pub mod path;
pub mod session;
pub mod xattr;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use ops::Engine;
