pub mod collaborators;
pub mod connection;
pub mod ice;
pub mod media;
pub mod types;

pub use collaborators::{CaptureSource, Connection, RegisteredPeer, Signaling};
pub use media::{MediaStreamHandle, MediaTrack, StreamOrigin, TrackKind, TrackState};
pub use types::{CaptureConstraints, IceCandidate, PeerIdentity, ServerConfig, SessionDescription};
