//! Block schedules.
//!
//! The `Layout` struct holds the linear order of nodes within every basic block: the output of
//! the list scheduler and the ground truth every later pass walks. It is a doubly-linked list
//! per block, stored in side tables keyed by node so the IR nodes themselves stay free of
//! intrusive links.
//!
//! Phi nodes are never present in a schedule; they logically occupy position zero of their block
//! and are kept in the block's phi list instead.

use crate::ir::{Block, Node};
use gantry_entity::packed_option::PackedOption;
use gantry_entity::SecondaryMap;

/// The linear schedule of every block.
#[derive(Clone)]
pub struct Layout {
    first_inst: SecondaryMap<Block, PackedOption<Node>>,
    last_inst: SecondaryMap<Block, PackedOption<Node>>,
    next_inst: SecondaryMap<Node, PackedOption<Node>>,
    prev_inst: SecondaryMap<Node, PackedOption<Node>>,
    inst_block: SecondaryMap<Node, PackedOption<Block>>,
}

impl Layout {
    /// Create a new empty layout.
    pub fn new() -> Self {
        Self {
            first_inst: SecondaryMap::new(),
            last_inst: SecondaryMap::new(),
            next_inst: SecondaryMap::new(),
            prev_inst: SecondaryMap::new(),
            inst_block: SecondaryMap::new(),
        }
    }

    /// Clear the layout.
    pub fn clear(&mut self) {
        self.first_inst.clear();
        self.last_inst.clear();
        self.next_inst.clear();
        self.prev_inst.clear();
        self.inst_block.clear();
    }

    /// Is `node` currently placed in a schedule?
    pub fn is_scheduled(&self, node: Node) -> bool {
        self.inst_block[node].is_some()
    }

    /// The block `node` is scheduled in.
    pub fn inst_block(&self, node: Node) -> Option<Block> {
        self.inst_block[node].expand()
    }

    /// The first scheduled node of `block`.
    pub fn first_inst(&self, block: Block) -> Option<Node> {
        self.first_inst[block].expand()
    }

    /// The last scheduled node of `block`, its terminator once scheduling is complete.
    pub fn last_inst(&self, block: Block) -> Option<Node> {
        self.last_inst[block].expand()
    }

    /// The node scheduled after `node`, if any.
    pub fn next_inst(&self, node: Node) -> Option<Node> {
        self.next_inst[node].expand()
    }

    /// The node scheduled before `node`, if any.
    pub fn prev_inst(&self, node: Node) -> Option<Node> {
        self.prev_inst[node].expand()
    }

    /// Append `node` to the end of `block`'s schedule.
    pub fn append_inst(&mut self, node: Node, block: Block) {
        debug_assert!(!self.is_scheduled(node), "{} is already scheduled", node);
        self.inst_block[node] = block.into();
        self.next_inst[node] = None.into();
        match self.last_inst[block].expand() {
            None => {
                self.first_inst[block] = node.into();
                self.prev_inst[node] = None.into();
            }
            Some(last) => {
                self.next_inst[last] = node.into();
                self.prev_inst[node] = last.into();
            }
        }
        self.last_inst[block] = node.into();
    }

    /// Insert `node` into the schedule immediately before `before`.
    pub fn insert_inst_before(&mut self, node: Node, before: Node) {
        debug_assert!(!self.is_scheduled(node), "{} is already scheduled", node);
        let block = self
            .inst_block(before)
            .expect("insertion point must be scheduled");
        self.inst_block[node] = block.into();
        self.next_inst[node] = before.into();
        match self.prev_inst[before].expand() {
            None => self.first_inst[block] = node.into(),
            Some(prev) => self.next_inst[prev] = node.into(),
        }
        self.prev_inst[node] = self.prev_inst[before];
        self.prev_inst[before] = node.into();
    }

    /// Insert `node` into the schedule immediately after `after`.
    pub fn insert_inst_after(&mut self, node: Node, after: Node) {
        debug_assert!(!self.is_scheduled(node), "{} is already scheduled", node);
        let block = self
            .inst_block(after)
            .expect("insertion point must be scheduled");
        self.inst_block[node] = block.into();
        self.prev_inst[node] = after.into();
        match self.next_inst[after].expand() {
            None => self.last_inst[block] = node.into(),
            Some(next) => self.prev_inst[next] = node.into(),
        }
        self.next_inst[node] = self.next_inst[after];
        self.next_inst[after] = node.into();
    }

    /// Insert `node` at the head of `block`'s schedule.
    pub fn prepend_inst(&mut self, node: Node, block: Block) {
        match self.first_inst(block) {
            None => self.append_inst(node, block),
            Some(first) => self.insert_inst_before(node, first),
        }
    }

    /// Remove `node` from its schedule.
    pub fn remove_inst(&mut self, node: Node) {
        let block = self.inst_block(node).expect("node is not scheduled");
        match self.prev_inst[node].expand() {
            None => self.first_inst[block] = self.next_inst[node],
            Some(prev) => self.next_inst[prev] = self.next_inst[node],
        }
        match self.next_inst[node].expand() {
            None => self.last_inst[block] = self.prev_inst[node],
            Some(next) => self.prev_inst[next] = self.prev_inst[node],
        }
        self.inst_block[node] = None.into();
        self.next_inst[node] = None.into();
        self.prev_inst[node] = None.into();
    }

    /// Remove every node from `block`'s schedule, returning them in order.
    pub fn clear_block(&mut self, block: Block) -> Vec<Node> {
        let mut insts = Vec::new();
        let mut cur = self.first_inst(block);
        while let Some(node) = cur {
            cur = self.next_inst(node);
            insts.push(node);
            self.inst_block[node] = None.into();
            self.next_inst[node] = None.into();
            self.prev_inst[node] = None.into();
        }
        self.first_inst[block] = None.into();
        self.last_inst[block] = None.into();
        insts
    }

    /// Iterate over the nodes of `block` in schedule order.
    pub fn block_insts(&self, block: Block) -> Insts {
        Insts {
            layout: self,
            head: self.first_inst(block),
        }
    }

    /// Does `a` precede `b` in their common block's schedule?
    pub fn precedes(&self, a: Node, b: Node) -> bool {
        debug_assert_eq!(self.inst_block(a), self.inst_block(b));
        let mut cur = self.next_inst(a);
        while let Some(node) = cur {
            if node == b {
                return true;
            }
            cur = self.next_inst(node);
        }
        false
    }
}

/// Iterator over the nodes of one block in schedule order.
pub struct Insts<'a> {
    layout: &'a Layout,
    head: Option<Node>,
}

impl<'a> Iterator for Insts<'a> {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        let cur = self.head;
        if let Some(node) = cur {
            self.head = self.layout.next_inst(node);
        }
        cur
    }
}
