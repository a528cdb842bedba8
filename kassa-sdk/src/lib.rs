//! Wire types and signing primitives shared between Kassa and the
//! liquidity counterparties it trades with.

pub mod objects;
pub mod signature;
