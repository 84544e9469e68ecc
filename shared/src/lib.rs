//! Code shared by the relay and the clients: the deterministic world, motion
//! integration and the wire protocol.

pub mod config;
pub mod physics;
pub mod protocol;
pub mod terrain;

pub use config::SyncConfig;
pub use physics::{PhysicsBody, Projectile, ProjectileStatus, Vector2, WorldBounds};
pub use protocol::{decode, Message, PlayerPayload, ProtocolError};
pub use terrain::{Layer, TerrainField};

pub const DEFAULT_PORT: u16 = 3000;
/// Seconds a picked-up powerup stays active.
pub const POWERUP_DURATION: f32 = 4.0;
/// Identifier of a connection, assigned by the relay and never reused.
pub type ClientId = u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peers_agree_on_spawn_height() {
        // Two peers with the same seed collide against the same ground.
        let a = TerrainField::generate(2024);
        let b = TerrainField::generate(2024);
        let pa = PhysicsBody::spawn_on(&a, 0.0, Layer::Near);
        let pb = PhysicsBody::spawn_on(&b, 0.0, Layer::Near);
        assert_eq!(pa.position.y.to_bits(), pb.position.y.to_bits());
    }

    #[test]
    fn test_welcome_carries_seed() {
        let hi = Message::Welcome {
            id: 0,
            seed: 2024,
            wind: 0.0,
            running: false,
            players: vec![],
        };
        let decoded = decode(&hi.encode().unwrap()).unwrap();
        assert!(matches!(decoded, Message::Welcome { seed: 2024, .. }));
    }
}
