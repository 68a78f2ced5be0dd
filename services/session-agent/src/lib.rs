//! idlefleet session agent
//!
//! Runs one on-demand game server session: bring the fleet's address into
//! DNS, restore world data, launch the server, watch occupancy until the
//! server has been empty long enough, then stop it, persist world data,
//! remove the record, and scale the fleet back to zero.
//!
//! ## Architecture
//!
//! - **Session**: Phase state machine sequencing every step ([`session`])
//! - **Capacity**: Fleet discovery and desired capacity ([`capacity`])
//! - **DNS**: Publishes the record and remembers what it published ([`dns`])
//! - **Tasks**: Launch, stop, and await cluster tasks ([`tasks`])
//! - **Probe / Watchdog**: Readiness and idle detection over Server List Ping
//!
//! External systems sit behind the traits in [`cloud`] and [`probe`], with
//! AWS implementations in [`aws`] and scripted ones in [`mock`].

pub mod aws;
pub mod capacity;
pub mod cloud;
pub mod config;
pub mod dns;
pub mod error;
pub mod mock;
pub mod probe;
pub mod session;
pub mod tasks;
pub mod watchdog;

pub use config::{Config, ConfigError, LogFormat};
pub use error::{Error, Result};
pub use session::{Collaborators, Phase, Session, SessionOrchestrator};
