//! CLI Commands

pub mod plan;
pub mod protocols;
pub mod run;
pub mod show;
