//! lockpid - hold pid-stamped lock files from the shell
//!
//! Thin command-line driver over [`lockpid_core`].

pub mod cli;
