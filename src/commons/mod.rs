//! The commons game: data model, simulation rules and the tick job.

pub mod model;
pub mod rules;
pub mod tick_job;

pub use model::{Commons, CommonsConfig, ParticipantState, User};
pub use rules::{RuleSet, StandardRules, TickEvent, TickInput, TickOutcome};
pub use tick_job::{SIMULATION_TICK_JOB, SimulationTickJob, TickTotals};
