//! Mount bring-up protocol: the multi-process dance that produces a
//! mounted, serving instance.
//!
//! Four actors cooperate: the [`launcher`] (the caller of [`launcher::bring_up`]),
//! a short-lived `newuidmap`/`newgidmap` [`helper`], a long-lived [`worker`]
//! that owns every session loop, and the in-kernel FUSE driver. [`fd_passing`]
//! carries the mounted `/dev/fuse` descriptor from launcher to worker;
//! [`idmap`] builds the `newuidmap`/`newgidmap` argument lists from
//! `/etc/subuid`/`/etc/subgid`; [`process`] is the shared double-fork
//! primitive both the helper and the worker detach with.

pub mod fd_passing;
pub mod helper;
pub mod idmap;
pub mod launcher;
pub mod process;
pub mod worker;

pub use launcher::{bring_up, BringUpError, BringUpReport};
pub use worker::Target;
