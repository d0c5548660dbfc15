//! Transport layer module.

pub mod awusb;
pub mod bulk;

pub use awusb::{BulkTransport, Exchange, Payload};
pub use bulk::{BulkRun, Direction};
