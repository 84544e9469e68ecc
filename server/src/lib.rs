//! # Relay Server Library
//!
//! This library provides the relay used by the snow arena clients. Unlike an
//! authoritative game server it never simulates anything: every client runs
//! its own physics against terrain generated from a shared seed, and the
//! relay only moves records between them.
//!
//! ## Core Responsibilities
//!
//! ### Fan-out
//! Every `cl` (state) and `ir` (irregular event) record a client sends is
//! parsed for validation and then forwarded byte-for-byte to every other
//! connected client. Malformed records are logged and dropped without
//! closing the connection.
//!
//! ### Connection Lifecycle
//! On connect the relay assigns an id that is never reused, replies with a
//! `hi` welcome carrying the terrain seed plus the last known state of
//! everyone already present, and announces the newcomer with `cn`. On
//! disconnect it announces `dc` so peers can drop the player and everything
//! it owns. Connections beyond capacity receive `kc` and are closed.
//!
//! ### Round Flow
//! An admin connection can start and stop rounds, kick players and drop
//! powerups. While a round runs the relay broadcasts the countdown (`tm`),
//! wind changes (`wd`) and powerup drops (`ad`), and finally the leaderboard
//! (`en`) built from the scores clients reported about themselves.
//!
//! ## Architecture Design
//!
//! Each websocket gets a reader task and a writer task. Readers forward
//! inbound text to a single central loop over an mpsc channel; the central
//! loop owns the [`client_manager::ClientManager`] and the
//! [`flow::GameFlow`], and queues outbound frames on each connection's
//! writer channel. No lock is shared between tasks.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Relay, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = Relay::bind("127.0.0.1:3000", RelayConfig::default()).await?;
//!     println!("seed {}", relay.seed());
//!     relay.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod flow;
pub mod network;
