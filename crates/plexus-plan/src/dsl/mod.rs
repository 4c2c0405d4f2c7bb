//! Front doors into the plan vocabulary: YAML/JSON documents and a small
//! set of constructor functions for building trees in code.

pub mod build;
pub mod yaml;
