//! Operand stack and call-frame stack for the VM

use std::rc::Rc;

use crate::value::Value;
use crate::vm::interpreter::VmFlags;
use crate::vm::opcode::InstructionList;

/// Value stack for bytecode execution
#[derive(Debug, Default)]
pub struct Stack {
    values: Vec<Value>,
}

impl Stack {
    /// Create a new stack with the given capacity
    pub fn new(capacity: usize) -> Self {
        Stack {
            values: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<Value> {
        self.values.pop()
    }

    /// Peek at the top value without removing it
    #[inline]
    pub fn peek(&self) -> Option<&Value> {
        self.values.last()
    }

    /// Peek at a value at offset from top (0 = top)
    #[inline]
    pub fn peek_at(&self, offset: usize) -> Option<&Value> {
        let len = self.values.len();
        if offset < len {
            self.values.get(len - 1 - offset)
        } else {
            None
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Pop the top `n` values, returned in push order
    pub fn pop_n(&mut self, n: usize) -> Option<Vec<Value>> {
        let len = self.values.len();
        if n > len {
            return None;
        }
        Some(self.values.split_off(len - n))
    }

    /// Duplicate the top value
    pub fn dup(&mut self) -> Option<()> {
        let val = self.peek()?.clone();
        self.push(val);
        Some(())
    }

    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Caller state captured at a call
#[derive(Debug, Clone)]
pub struct SavedState {
    pub code: Rc<InstructionList>,
    pub pc: usize,
    pub end: usize,
    pub flags: VmFlags,
    pub stack_len: usize,
    pub this_len: usize,
}

/// Call frames as four parallel stacks: program position, end position,
/// flag bits, and operand/this stack sizes. They always have equal depth.
#[derive(Debug, Default)]
pub struct CallStack {
    positions: Vec<(Rc<InstructionList>, usize)>,
    ends: Vec<usize>,
    flags: Vec<VmFlags>,
    sizes: Vec<(usize, usize)>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, state: SavedState) {
        self.positions.push((state.code, state.pc));
        self.ends.push(state.end);
        self.flags.push(state.flags);
        self.sizes.push((state.stack_len, state.this_len));
    }

    pub fn pop(&mut self) -> Option<SavedState> {
        let (code, pc) = self.positions.pop()?;
        let end = self.ends.pop()?;
        let flags = self.flags.pop()?;
        let (stack_len, this_len) = self.sizes.pop()?;
        Some(SavedState {
            code,
            pc,
            end,
            flags,
            stack_len,
            this_len,
        })
    }

    #[inline]
    pub fn depth(&self) -> usize {
        debug_assert!(
            self.positions.len() == self.ends.len()
                && self.ends.len() == self.flags.len()
                && self.flags.len() == self.sizes.len()
        );
        self.positions.len()
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.ends.clear();
        self.flags.clear();
        self.sizes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(stack: Option<Value>) -> Option<f64> {
        stack.and_then(|v| v.as_number())
    }

    #[test]
    fn test_push_pop() {
        let mut stack = Stack::new(16);

        stack.push(Value::number(1.0));
        stack.push(Value::number(2.0));
        stack.push(Value::number(3.0));

        assert_eq!(stack.len(), 3);
        assert_eq!(n(stack.pop()), Some(3.0));
        assert_eq!(n(stack.pop()), Some(2.0));
        assert_eq!(n(stack.pop()), Some(1.0));
        assert!(stack.is_empty());
        assert!(stack.pop().is_none());
    }

    #[test]
    fn test_peek() {
        let mut stack = Stack::new(16);

        stack.push(Value::number(1.0));
        stack.push(Value::number(2.0));

        assert_eq!(stack.peek().and_then(|v| v.as_number()), Some(2.0));
        assert_eq!(stack.peek_at(1).and_then(|v| v.as_number()), Some(1.0));
        assert!(stack.peek_at(2).is_none());
    }

    #[test]
    fn test_dup_shares_handle() {
        let mut stack = Stack::new(16);
        stack.push(Value::object());
        stack.dup();

        let a = stack.pop().unwrap();
        let b = stack.pop().unwrap();
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn test_pop_n_keeps_order() {
        let mut stack = Stack::new(16);
        for i in 0..4 {
            stack.push(Value::number(i as f64));
        }
        let top: Vec<_> = stack.pop_n(3).unwrap().iter().map(|v| v.to_string()).collect();
        assert_eq!(top, vec!["1", "2", "3"]);
        assert_eq!(stack.len(), 1);
        assert!(stack.pop_n(2).is_none());
    }

    #[test]
    fn test_call_stack_symmetry() {
        let code = Rc::new(InstructionList::default());
        let mut frames = CallStack::new();
        for depth in 0..8 {
            frames.push(SavedState {
                code: Rc::clone(&code),
                pc: depth,
                end: depth + 10,
                flags: VmFlags::MEMBER_CALL,
                stack_len: depth * 2,
                this_len: depth,
            });
        }
        assert_eq!(frames.depth(), 8);
        for depth in (0..8).rev() {
            let state = frames.pop().unwrap();
            assert_eq!(state.pc, depth);
            assert_eq!(state.end, depth + 10);
            assert_eq!(state.stack_len, depth * 2);
            assert_eq!(state.flags, VmFlags::MEMBER_CALL);
        }
        assert_eq!(frames.depth(), 0);
        assert!(frames.pop().is_none());
    }
}
