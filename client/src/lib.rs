//! # Snow Arena Client Library
//!
//! This library provides the client side of the snow arena. There is no
//! authoritative server: every client simulates its own player against
//! terrain generated locally from the seed the relay hands out, publishes
//! its state, and mirrors everyone else's from what the relay forwards.
//!
//! ## Architecture Overview
//!
//! Two execution contexts run side by side and hand data over in one
//! direction each:
//!
//! ### Simulation
//! A fixed-tick loop ([`scheduler`]) asks an [`input::IntentSource`] what the
//! player wants, advances the [`game::World`] and, at a lower send rate,
//! collects outbound records from [`sync::OutboundSync`]. The simulation is
//! the only writer of the outbound side.
//!
//! ### Network I/O
//! A tokio task ([`network`]) owns the websocket. It encodes and sends what
//! the simulation hands it, decodes inbound records, and is the only writer
//! of the [`reconciler::StateReconciler`] registry that the simulation reads
//! once per tick.
//!
//! ## Module Organization
//!
//! ### Player Module (`player`)
//! - Local player state, digging and throwing
//! - Snowball variants and their triggers
//! - Powerup timers
//!
//! ### Sync Module (`sync`)
//! - Dirty-field deltas against the last sent values
//! - Periodic full resync
//! - The irregular event lane
//!
//! ### Reconciler Module (`reconciler`)
//! - Remote players created on first mention
//! - Partial updates where an absent field means unchanged
//! - Cascading removal on disconnect or liveness timeout
//!
//! ### Network Module (`network`)
//! - Connection with a bounded connect timeout
//! - `ConnectionState` published through a watch channel
//! - Bounded close handshake on shutdown
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::input::ScriptedIntent;
//! use client::scheduler::run_session;
//! use shared::SyncConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut bot = ScriptedIntent::patrol();
//!     let outcome = run_session("ws://127.0.0.1:3000", &SyncConfig::default(), "bot", &mut bot, None).await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;
pub mod player;
pub mod reconciler;
pub mod scheduler;
pub mod sync;
