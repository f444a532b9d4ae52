//! The protocol layer: message model, receive and transmit machines, and the
//! hard reset machine.
//!
//! PRL-RX and PRL-TX sit between the policy engine and the PHY. RX filters
//! duplicate message IDs and hands ownership of fresh messages to the policy
//! engine; TX serializes transmit requests, stamps message IDs, and reports
//! GoodCRC outcomes. The hard reset machine sits beside them and is the only
//! entity allowed to restart their state synchronously.
//!
//! There are no GoodCRC transmission or retry states here: the PHY
//! acknowledges received messages and retries transmissions on its own.
pub mod hard_reset;
pub mod message;
pub mod rx;
pub mod tx;

pub use rx::ProtocolRx;
pub use tx::ProtocolTx;
