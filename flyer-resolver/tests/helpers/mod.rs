//! Test Helper Utilities
//!
//! Shared utilities for testing flyer-resolver

#![allow(dead_code)]

pub mod db_utils;
pub mod fakes;

pub use db_utils::{add_products, create_file_db, create_project, insert_certified};
pub use fakes::{ScriptedSearch, ScriptedValidator, Verdict};
