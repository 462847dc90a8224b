#![warn(rust_2018_idioms)]

//! AX.25/KISS framing, connected-mode sessions, the AXDP reliable-datagram
//! protocol and NET/ROM routing intelligence for a packet-radio terminal.

pub mod address;
pub mod ax25;
pub mod axdp;
pub mod clock;
pub mod compression;
pub mod decay;
pub mod error;
pub mod ingress;
pub mod kiss;
pub mod link_quality;
pub mod netrom;
pub mod persistence;
pub mod session;
pub mod transfer;

pub use error::Error;
pub use ingress::{CapabilityEvent, CoreObserver, CoreStats, IngressPipeline};
pub use session::{SessionConfig, SessionKey};

/// Maximum AX.25 information field size admitted by this core (spec §4.1).
pub(crate) const MAX_INFO_FIELD_BYTES: usize = 256;
