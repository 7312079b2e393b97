pub mod registry;
pub mod simulation;
