//! Herald transports.
//!
//! `BroadcastPublisher` fans envelopes out inside one process over a tokio
//! broadcast channel. `RedisPublisher` carries them between nodes over Redis
//! pub/sub, one channel per event type.

pub mod broadcast;
pub mod redis_pubsub;

pub use broadcast::BroadcastPublisher;
pub use redis_pubsub::RedisPublisher;
