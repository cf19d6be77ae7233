//! Representation of the program being compiled: the sea-of-nodes graph, its blocks and modes,
//! the per-block schedules, and the stack frame.

mod entities;
mod graph;
mod modes;
mod opcode;
mod stackslot;

pub mod layout;

pub use self::entities::{Block, Node, StackSlot};
pub use self::graph::{DisplayNode, Graph, NodeReqs, NodeUse, ValueLoc};
pub use self::layout::Layout;
pub use self::modes::Mode;
pub use self::opcode::Opcode;
pub use self::stackslot::{StackSlotData, StackSlots};
