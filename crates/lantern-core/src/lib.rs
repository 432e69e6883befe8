//! # LANTERN Core
//!
//! Peer coordination for the LANTERN LAN transfer protocol:
//! - Long-term identity and peer-id derivation
//! - The typed message codec carried inside records
//! - A discovery adapter consuming LAN observations from the host shell
//! - The peer manager: inbound acceptance, outbound dialing, duplicate
//!   suppression, message routing, and broadcast
//! - The chunked, resumable file-transfer engine
//!
//! The host shell drives the core through [`PeerManager`] and a discovery
//! channel, and consumes typed [`Event`]s from a bounded queue.
//!
//! ```no_run
//! use lantern_core::{discovery_channel, Config, LocalIdentity, PeerManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lantern_core::Error> {
//!     let identity = LocalIdentity::generate()?;
//!     let config = Config::new("/var/lib/lantern".into());
//!     let (manager, mut events) = PeerManager::new(identity, config);
//!
//!     let port = manager.start().await?;
//!     println!("listening on {port}");
//!
//!     let (discovery, observations) = discovery_channel(32);
//!     manager.attach_discovery(observations);
//!     // ... hand `discovery` to the LAN responder, consume `events` ...
//!     # let _ = (discovery, events.recv().await);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod identity;
pub mod manager;
pub mod protocol;
pub mod session;
pub mod transfer;

pub use config::Config;
pub use discovery::{discovery_channel, DiscoveryEvent, DiscoveryHandle};
pub use error::{Error, TimeoutPhase};
pub use events::{Direction, Event};
pub use identity::{LocalIdentity, PeerId, RemoteIdentity};
pub use manager::PeerManager;
pub use protocol::{Message, MessageKind};
