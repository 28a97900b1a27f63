// Aggregates challenge detection and solving layers used to get past bot gates on rendered pages.

pub mod core;
pub mod detectors;
pub mod solvers;
pub mod user_agents;
