//! Device model: shared state, topic layout, inbound decoding and the
//! notifications presentation code listens to.

pub mod events;
pub mod state;
pub mod synchronizer;
pub mod topics;
