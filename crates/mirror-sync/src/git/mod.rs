//! Git remotes, driven through the `git` binary.

mod client;
mod command;
mod parse;
mod staging;

pub use client::{GitClient, MIRROR_NAMESPACE};
pub use staging::StagingRepo;
