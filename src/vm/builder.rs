//! Block-structured instruction builder
//!
//! Code generation appends instructions into nested blocks. A block is
//! closed into its parent once its contents are known, which is also the
//! moment the length of a forward jump over it becomes known.
//!
//! Jump lengths are never written into an instruction while blocks are still
//! open. Every length is recorded as a [`PendingPatch`] naming the jump by
//! its [`InstructionId`], and all patches are resolved in one pass by
//! [`InstructionBuilder::finalize`], after the blocks have been flattened.
//!
//! Misuse (no open block, patching a non-jump, releasing before finalize) is
//! a bug in the code generator and panics.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::vm::opcode::{Instruction, InstructionList};

/// Stable identity of an emitted instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstructionId(usize);

/// Identity of a block, valid for the life of the builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(usize);

#[derive(Debug)]
struct Block {
    id: BlockId,
    instructions: Vec<(InstructionId, Instruction)>,
}

/// Where a patched jump length comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatchLength {
    /// Instruction count of a closed block
    Block(BlockId),
    /// A length computed by the caller
    Fixed(i32),
}

/// A jump whose length is resolved at finalize time
#[derive(Debug, Clone, Copy)]
struct PendingPatch {
    /// Block that was open when the patch was recorded
    block: BlockId,
    site: InstructionId,
    length: PatchLength,
}

#[derive(Debug, Default)]
pub struct InstructionBuilder {
    /// Open blocks, innermost last
    open: Vec<Block>,
    /// Instructions of top-level blocks that have been closed
    completed: Vec<(InstructionId, Instruction)>,
    closed_lengths: FxHashMap<BlockId, usize>,
    patches: Vec<PendingPatch>,
    next_instruction: usize,
    next_block: usize,
    finalized: Option<Rc<InstructionList>>,
}

impl InstructionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new block nested in the current one
    pub fn create_block(&mut self) -> BlockId {
        assert!(self.finalized.is_none(), "builder already finalized");
        let id = BlockId(self.next_block);
        self.next_block += 1;
        self.open.push(Block {
            id,
            instructions: Vec::new(),
        });
        id
    }

    /// Append to the block being built
    ///
    /// # Panics
    /// Panics if no block is open.
    pub fn add_instruction(&mut self, instruction: Instruction) -> InstructionId {
        let id = InstructionId(self.next_instruction);
        let Some(block) = self.open.last_mut() else {
            panic!("add_instruction({}) with no open block", instruction.opcode.name());
        };
        self.next_instruction += 1;
        block.instructions.push((id, instruction));
        id
    }

    /// Close the current block and append it to its parent
    pub fn end_block(&mut self) {
        let block = self.pop_block("end_block");
        self.close_into_parent(block);
    }

    /// Close the current block and make its length the length of the jump
    /// most recently appended to the parent
    ///
    /// # Panics
    /// Panics if there is no parent block, or if the parent's last
    /// instruction is not a jump.
    pub fn end_block_for_jump(&mut self) {
        let block = self.pop_block("end_block_for_jump");
        let site = self.parent_jump(0, "end_block_for_jump");
        self.patches.push(PendingPatch {
            block: block.id,
            site,
            length: PatchLength::Block(block.id),
        });
        self.close_into_parent(block);
    }

    /// Record the current length of the open block against the jump most
    /// recently appended to its parent. Used by if/else, where the "then"
    /// block ends in a jump over the "else" block and the parent's
    /// conditional jump must skip exactly the "then" part.
    ///
    /// # Panics
    /// Panics if the open block has no parent ending in a jump.
    pub fn update_stacked_jump(&mut self) {
        let Some(block) = self.open.last() else {
            panic!("update_stacked_jump with no open block");
        };
        let (block, length) = (block.id, block.instructions.len());
        let site = self.parent_jump(1, "update_stacked_jump");
        self.patches.push(PendingPatch {
            block,
            site,
            length: PatchLength::Fixed(length as i32),
        });
    }

    /// Number of instructions in the open block
    pub fn current_length(&self) -> usize {
        self.open.last().map_or(0, |b| b.instructions.len())
    }

    /// Record a caller-computed length for a jump
    pub fn patch_jump(&mut self, site: InstructionId, length: i32) {
        let Some(block) = self.open.last() else {
            panic!("patch_jump with no open block");
        };
        self.patches.push(PendingPatch {
            block: block.id,
            site,
            length: PatchLength::Fixed(length),
        });
    }

    /// Close all open blocks and resolve every pending patch
    ///
    /// # Panics
    /// Panics if a patch targets a non-jump instruction.
    pub fn finalize(&mut self) {
        if self.finalized.is_some() {
            return;
        }
        while let Some(block) = self.open.pop() {
            self.close_into_parent(block);
        }

        let positions: FxHashMap<InstructionId, usize> = self
            .completed
            .iter()
            .enumerate()
            .map(|(pos, (id, _))| (*id, pos))
            .collect();

        let mut instructions: Vec<Instruction> =
            std::mem::take(&mut self.completed).into_iter().map(|(_, i)| i).collect();

        for patch in &self.patches {
            let length = match patch.length {
                PatchLength::Fixed(len) => len,
                PatchLength::Block(id) => self.closed_lengths[&id] as i32,
            };
            let pos = positions[&patch.site];
            let instruction = &mut instructions[pos];
            assert!(
                instruction.opcode.is_jump(),
                "jump patch from block {:?} targets `{}` at {}",
                patch.block,
                instruction.opcode.name(),
                pos
            );
            instruction.jump = length;
        }

        self.patches.clear();
        self.finalized = Some(Rc::new(InstructionList::new(instructions)));
    }

    /// Hand out the finalized list
    ///
    /// # Panics
    /// Panics if [`finalize`](Self::finalize) has not run.
    pub fn release_instruction_list(&self) -> Rc<InstructionList> {
        match &self.finalized {
            Some(list) => Rc::clone(list),
            None => panic!("release_instruction_list called before finalize"),
        }
    }

    fn pop_block(&mut self, op: &str) -> Block {
        match self.open.pop() {
            Some(block) => block,
            None => panic!("{} with no open block", op),
        }
    }

    /// Id of the last instruction of the open block `depth` levels below
    /// the innermost one, which must be a jump
    fn parent_jump(&self, depth: usize, op: &str) -> InstructionId {
        let parent = self
            .open
            .len()
            .checked_sub(depth + 1)
            .and_then(|i| self.open.get(i));
        let Some(parent) = parent else {
            panic!("{} without a parent block", op);
        };
        match parent.instructions.last() {
            Some((id, instr)) if instr.opcode.is_jump() => *id,
            Some((_, instr)) => panic!(
                "{}: parent block ends in `{}`, not a jump",
                op,
                instr.opcode.name()
            ),
            None => panic!("{}: parent block is empty", op),
        }
    }

    fn close_into_parent(&mut self, block: Block) {
        self.closed_lengths.insert(block.id, block.instructions.len());
        match self.open.last_mut() {
            Some(parent) => parent.instructions.extend(block.instructions),
            None => self.completed.extend(block.instructions),
        }
    }
}
