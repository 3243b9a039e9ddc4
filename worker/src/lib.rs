//! The fleet worker node.
//!
//! Everything a node is lives here: the broker boundary ([bus]), liveness
//! tracking ([heartbeat]), the reliable-broadcast substrate ([rb]), leader
//! bookkeeping ([job]), subclip selection ([aggregate]) and the run loop
//! tying them together ([node]).
pub mod aggregate;
pub mod bus;
pub mod heartbeat;
pub mod job;
pub mod node;
pub mod rb;
