//! Route modules of the operator surface.

pub mod events;
pub mod health;
pub mod recovery;
