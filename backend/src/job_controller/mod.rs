pub mod runner;
pub mod state;
pub mod sweeper;
