//! Use cases orchestrating domain entities through ports

pub mod new_account;

pub use new_account::NewAccountTask;
