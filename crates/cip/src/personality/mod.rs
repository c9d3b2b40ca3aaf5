//! Object personalities: the CIP objects a configured server instance
//! actually exposes. Each personality registers itself into a
//! [`crate::handler::HandlerRegistry`] at the appropriate specificity tier.

pub mod adapter;
pub mod generic;
pub mod identity;
pub mod logix;
pub mod modbus;
pub mod pccc;

pub use adapter::{Assembly, AssemblyHandler, UpdatePattern};
pub use generic::GenericHandler;
pub use identity::{IdentityHandler, IdentityObject};
pub use logix::{LogixHandler, Tag};
pub use modbus::ModbusHandler;
pub use pccc::{PcccDataTable, PcccHandler};
