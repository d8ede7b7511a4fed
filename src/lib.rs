//! MCCFR blueprint training and real-time subgame resolving for no-limit
//! hold'em.
//!
//! Offline, [`trainer::Trainer`] drives Monte Carlo CFR iterations over an
//! abstracted game ([`abstraction`], [`game`]) against a regret/strategy
//! [`store`], checkpointing as it goes and producing a [`policy::Policy`]
//! blueprint. Online, [`resolver::Resolver`] loads that blueprint and, for
//! each live [`table_state::TableState`], solves a small depth-limited
//! subgame within a fixed time budget to produce an action.

pub mod abstraction;
pub mod actions;
pub mod card_utils;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod game;
pub mod leaf;
pub mod policy;
pub mod resolver;
pub mod sampler;
pub mod store;
pub mod table_state;
pub mod trainer;

pub use error::{Result, SolverError};
