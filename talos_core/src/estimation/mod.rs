// talos_core/src/estimation/mod.rs

pub mod discretization;
pub mod filters;
pub mod group;
pub mod process_model;
