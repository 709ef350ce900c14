//! Autonomous game-playing movie search.
//!
//! Given a deterministic black-box game engine plus two pre-learned
//! artifacts (weighted objectives and input motifs), the planner
//! searches for a controller-input movie that makes progress: each
//! round it proposes candidate actions, scores them by immediate
//! effect plus simulated lookahead through a rolling pool of futures,
//! commits the winner, and periodically backtracks to replace a
//! committed span with a better one. Scoring work fans out to worker
//! processes over TCP when any are configured.

pub mod backtrack;
pub mod cache;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod hashing;
pub mod motifs;
pub mod movie;
pub mod objectives;
pub mod planner;
pub mod scoring;
pub mod toy;
pub mod worker;

pub use cache::StateCache;
pub use config::PlannerConfig;
pub use dispatch::Dispatcher;
pub use engine::{Buttons, Engine, NO_MENU_MASK};
pub use motifs::Motifs;
pub use movie::Movie;
pub use objectives::WeightedObjectives;
pub use planner::Planner;
pub use toy::ToyEngine;
pub use worker::Worker;
