//! Bytecode interpreter
//!
//! Executes instruction lists on a stack machine. One instruction runs per
//! loop iteration; calls, returns and interrupts never recurse on the native
//! stack. A call saves the caller's position, end, flags and stack sizes on
//! the [`CallStack`] and switches to the callee's instruction list. An
//! interrupt saves the same state on a separate frame stack and switches to
//! the queued range; when the queue drains the state is restored.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::Duration;

use bitflags::bitflags;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::builtins::Intrinsics;
use crate::builtins::timer::TimerQueue;
use crate::parser::compiler::CompileError;
use crate::runtime::function::{Arguments, FunctionKind};
use crate::runtime::object::{ObjectType, parse_index};
use crate::runtime::operators::{self, ArithmeticOp, CompareOp};
use crate::util::number_to_string;
use crate::value::{PROTOTYPE, Value};
use crate::vm::opcode::{CodeRange, Instruction, InstructionList, OpCode, Operand};
use crate::vm::scope::ScopeStore;
use crate::vm::stack::{CallStack, SavedState, Stack};

bitflags! {
    /// Flag register
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VmFlags: u8 {
        /// The most recently produced value was falsy
        const ZERO = 1 << 0;
        /// The next call constructs
        const CONSTRUCTOR_CALL = 1 << 1;
        /// The next call has a receiver below the callee
        const MEMBER_CALL = 1 << 2;
        /// Interrupts are queued
        const INTERRUPT = 1 << 3;
        /// An interrupt is being serviced
        const INTERRUPT_ACK = 1 << 4;
    }
}

const CALL_MARKERS: VmFlags = VmFlags::CONSTRUCTOR_CALL.union(VmFlags::MEMBER_CALL);

/// Interpreter error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InterpreterError {
    #[error("ReferenceError: {0}")]
    ReferenceError(String),
    #[error("TypeError: {0}")]
    TypeError(String),
    #[error("RangeError: {0}")]
    RangeError(String),
    #[error("InternalError: {0}")]
    InternalError(String),
    #[error("InternalError: stack underflow")]
    StackUnderflow,
    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl InterpreterError {
    pub fn invalid_array_length() -> Self {
        InterpreterError::RangeError("invalid array length".to_string())
    }
}

/// Result type for interpreter operations
pub type InterpreterResult<T> = Result<T, InterpreterError>;

/// Run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Nothing loaded
    Idle,
    /// Counters set, waiting for `run`
    Ready,
    Running,
    /// Servicing an interrupt
    Acknowledging,
}

#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// Initial operand stack capacity
    pub stack_capacity: usize,
    /// Maximum call nesting
    pub max_call_depth: usize,
    /// Log every executed instruction at trace level
    pub trace_execution: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            stack_capacity: 1024,
            max_call_depth: 512,
            trace_execution: false,
        }
    }
}

/// Execution counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterpreterStats {
    pub instructions_executed: u64,
    pub calls: u64,
    pub functions_compiled: u64,
    pub interrupts_serviced: u64,
}

/// Run state saved while an interrupt range executes
#[derive(Debug)]
struct InterruptFrame {
    code: Rc<InstructionList>,
    pc: usize,
    end: usize,
    flags: VmFlags,
    stack_len: usize,
    this_len: usize,
    call_depth: usize,
}

/// Interpreter state
pub struct Interpreter {
    config: InterpreterConfig,
    state: VmState,

    code: Rc<InstructionList>,
    pc: usize,
    end: usize,
    flags: VmFlags,

    stack: Stack,
    this_stack: Vec<Value>,
    frames: CallStack,
    scopes: ScopeStore,

    /// Receiver of plain calls and of top-level code
    global: Value,
    intrinsics: Intrinsics,

    interrupts: VecDeque<CodeRange>,
    interrupt_frames: Vec<InterruptFrame>,
    timers: TimerQueue,

    output: Box<dyn Write>,
    error_output: Box<dyn Write>,
    stats: InterpreterStats,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Create a new interpreter
    pub fn new() -> Self {
        Self::with_config(InterpreterConfig::default())
    }

    /// Create an interpreter with custom settings
    pub fn with_config(config: InterpreterConfig) -> Self {
        Interpreter {
            stack: Stack::new(config.stack_capacity),
            config,
            state: VmState::Idle,
            code: Rc::new(InstructionList::default()),
            pc: 0,
            end: 0,
            flags: VmFlags::empty(),
            this_stack: Vec::new(),
            frames: CallStack::new(),
            scopes: ScopeStore::new(),
            global: Value::object(),
            intrinsics: Intrinsics::default(),
            interrupts: VecDeque::new(),
            interrupt_frames: Vec::new(),
            timers: TimerQueue::new(),
            output: Box::new(io::stdout()),
            error_output: Box::new(io::stderr()),
            stats: InterpreterStats::default(),
        }
    }

    // Accessors

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn stats(&self) -> InterpreterStats {
        self.stats
    }

    pub fn flags(&self) -> VmFlags {
        self.flags
    }

    pub fn call_depth(&self) -> usize {
        self.frames.depth()
    }

    pub fn this_depth(&self) -> usize {
        self.this_stack.len()
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn global_object(&self) -> &Value {
        &self.global
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    pub fn intrinsics_mut(&mut self) -> &mut Intrinsics {
        &mut self.intrinsics
    }

    pub fn scopes(&self) -> &ScopeStore {
        &self.scopes
    }

    /// Bind a name in the global scope
    pub fn define_global(&mut self, name: &str, value: Value) {
        self.scopes.declare_global(name, value);
    }

    pub fn lookup_global(&self, name: &str) -> Option<Value> {
        self.scopes.global().get(name).cloned()
    }

    /// Sink for `console.log`
    pub fn output(&mut self) -> &mut dyn Write {
        self.output.as_mut()
    }

    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    /// Sink for `console.error`
    pub fn error_output(&mut self) -> &mut dyn Write {
        self.error_output.as_mut()
    }

    pub fn set_error_output(&mut self, output: Box<dyn Write>) {
        self.error_output = output;
    }

    // Entry points

    /// Load a range to execute
    pub fn set_counters(&mut self, range: CodeRange) -> InterpreterResult<()> {
        if matches!(self.state, VmState::Running | VmState::Acknowledging) {
            return Err(InterpreterError::InternalError(
                "set_counters while running".to_string(),
            ));
        }
        self.code = range.code;
        self.pc = range.start;
        self.end = range.end;
        self.state = VmState::Ready;
        Ok(())
    }

    /// Run the loaded range to its end, servicing interrupts on the way
    pub fn run(&mut self) -> InterpreterResult<()> {
        if self.state != VmState::Ready {
            return Err(InterpreterError::InternalError(format!(
                "run called in state {:?}",
                self.state
            )));
        }
        self.state = VmState::Running;

        loop {
            self.poll_timers();

            if self.pc >= self.end {
                let base = self.interrupt_frames.last().map_or(0, |f| f.call_depth);
                if self.frames.depth() > base {
                    // Fell off the end of a function body (or `leave`)
                    self.scopes.pop_scope();
                    self.finish_call(Value::undefined())?;
                    continue;
                }
                if !self.interrupt_frames.is_empty() {
                    self.end_interrupt();
                    continue;
                }
                if self.interrupt_pending() {
                    self.begin_interrupt();
                    continue;
                }
                break;
            }

            if self.interrupt_pending() {
                self.begin_interrupt();
                continue;
            }

            self.step()?;
        }

        self.state = VmState::Idle;
        Ok(())
    }

    /// Call `callee` from native code and run it to completion. With a
    /// receiver the call binds `this` like a member call.
    ///
    /// Interrupts raised meanwhile stay queued until the outer loop reaches
    /// an instruction boundary.
    pub fn call_function(
        &mut self,
        callee: &Value,
        this: Option<Value>,
        args: Vec<Value>,
    ) -> InterpreterResult<Value> {
        let saved_flags = self.flags;
        let depth = self.frames.depth();
        let argc = args.len();

        self.flags.remove(CALL_MARKERS);
        if let Some(this) = this {
            self.stack.push(this);
            self.flags.insert(VmFlags::MEMBER_CALL);
        }
        self.stack.push(callee.clone());
        for arg in args {
            self.stack.push(arg);
        }
        self.call(argc)?;

        while self.frames.depth() > depth {
            if self.pc >= self.end {
                self.scopes.pop_scope();
                self.finish_call(Value::undefined())?;
                continue;
            }
            self.step()?;
        }

        let result = self.pop()?;
        self.flags = (saved_flags - VmFlags::INTERRUPT) | (self.flags & VmFlags::INTERRUPT);
        Ok(result)
    }

    /// Execute the instruction at `pc`
    fn step(&mut self) -> InterpreterResult<()> {
        let code = Rc::clone(&self.code);
        let instruction = &code[self.pc];
        if self.config.trace_execution {
            trace!(pc = self.pc, depth = self.stack.len(), "{}", instruction);
        }
        let depth = self.stack.len();
        self.pc += 1;
        self.stats.instructions_executed += 1;
        self.execute(instruction)?;

        if let Some(effect) = instruction.opcode.stack_effect() {
            debug_assert_eq!(
                self.stack.len() as isize,
                depth as isize + effect,
                "{} left the operand stack unbalanced",
                instruction.opcode.name()
            );
        }
        Ok(())
    }

    /// Top of the operand stack, or undefined
    pub fn get_result(&self) -> Value {
        self.stack.peek().cloned().unwrap_or_else(Value::undefined)
    }

    /// Clear all run state. Global bindings survive; function scopes do not.
    pub fn reset(&mut self) {
        if self.state != VmState::Idle {
            warn!(state = ?self.state, "resetting interpreter that is not idle");
        }
        self.stack.clear();
        self.this_stack.clear();
        self.frames.clear();
        self.flags = VmFlags::empty();
        self.interrupts.clear();
        self.interrupt_frames.clear();
        self.scopes.truncate_to_global();
        self.code = Rc::new(InstructionList::default());
        self.pc = 0;
        self.end = 0;
        self.state = VmState::Idle;
    }

    /// Reset and drop every pending timer
    pub fn shut_down(&mut self) {
        self.reset();
        self.timers.clear();
    }

    /// Queue a range to run at the next instruction boundary
    pub fn request_interrupt(&mut self, range: CodeRange) {
        self.interrupts.push_back(range);
        self.flags.insert(VmFlags::INTERRUPT);
    }

    /// Queue a call of `callback` with no arguments
    pub fn schedule_callback(&mut self, callback: Value) {
        self.request_interrupt(callback_range(callback));
    }

    /// Call `callback` once `delay` has passed. Returns the timer id.
    pub fn schedule_timer(&mut self, callback: Value, delay: Duration) -> u64 {
        self.timers.schedule(callback_range(callback), delay)
    }

    /// Block until the next timer fires. `None` when no timer is pending.
    pub fn wait_timer(&mut self) -> Option<CodeRange> {
        self.timers.wait()
    }

    /// The next expired timer, without blocking
    pub fn poll_timer(&mut self) -> Option<CodeRange> {
        self.timers.poll()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    // Interrupts

    fn poll_timers(&mut self) {
        if self.timers.pending() == 0 {
            return;
        }
        while let Some(range) = self.timers.poll() {
            self.request_interrupt(range);
        }
    }

    fn interrupt_pending(&self) -> bool {
        self.flags.contains(VmFlags::INTERRUPT)
            && !self.flags.contains(VmFlags::INTERRUPT_ACK)
            && !self.interrupts.is_empty()
    }

    fn begin_interrupt(&mut self) {
        let Some(range) = self.interrupts.pop_front() else {
            return;
        };
        debug!(queued = self.interrupts.len(), "servicing interrupt");
        self.interrupt_frames.push(InterruptFrame {
            code: Rc::clone(&self.code),
            pc: self.pc,
            end: self.end,
            flags: self.flags,
            stack_len: self.stack.len(),
            this_len: self.this_stack.len(),
            call_depth: self.frames.depth(),
        });
        // A pending `markst`/`markmem` belongs to the interrupted code
        self.flags.remove(CALL_MARKERS);
        self.flags.insert(VmFlags::INTERRUPT_ACK);
        self.state = VmState::Acknowledging;
        self.enter_range(range);
    }

    /// An interrupt range finished: start the next queued one, or restore
    /// the interrupted state
    fn end_interrupt(&mut self) {
        let Some(frame) = self.interrupt_frames.last() else {
            return;
        };
        self.stack.truncate(frame.stack_len);
        self.this_stack.truncate(frame.this_len);

        if let Some(range) = self.interrupts.pop_front() {
            debug!(queued = self.interrupts.len(), "servicing interrupt");
            self.enter_range(range);
            return;
        }

        let Some(frame) = self.interrupt_frames.pop() else {
            return;
        };
        self.code = frame.code;
        self.pc = frame.pc;
        self.end = frame.end;
        self.flags = frame.flags - VmFlags::INTERRUPT - VmFlags::INTERRUPT_ACK;
        self.state = VmState::Running;
    }

    fn enter_range(&mut self, range: CodeRange) {
        self.stats.interrupts_serviced += 1;
        self.code = range.code;
        self.pc = range.start;
        self.end = range.end;
    }

    // Stack helpers

    #[inline]
    fn pop(&mut self) -> InterpreterResult<Value> {
        self.stack.pop().ok_or(InterpreterError::StackUnderflow)
    }

    /// Push a produced value and update the zero flag
    #[inline]
    fn push_value(&mut self, value: Value) {
        self.flags.set(VmFlags::ZERO, !value.is_true());
        self.stack.push(value);
    }

    fn name_operand<'a>(&self, instruction: &'a Instruction) -> InterpreterResult<&'a str> {
        instruction.operand.as_name().ok_or_else(|| {
            InterpreterError::InternalError(format!(
                "{} requires a name operand",
                instruction.opcode.name()
            ))
        })
    }

    fn count_operand(&self, instruction: &Instruction) -> InterpreterResult<usize> {
        instruction.operand.as_count().ok_or_else(|| {
            InterpreterError::InternalError(format!(
                "{} requires a count operand",
                instruction.opcode.name()
            ))
        })
    }

    // Dispatch

    fn execute(&mut self, instruction: &Instruction) -> InterpreterResult<()> {
        match instruction.opcode {
            OpCode::Noop => {}

            OpCode::Fetch => {
                let name = self.name_operand(instruction)?;
                let value = self
                    .scopes
                    .lookup(name)
                    .cloned()
                    .ok_or_else(|| not_defined(name))?;
                self.push_value(value);
            }
            OpCode::Store => {
                let name = self.name_operand(instruction)?;
                let value = self
                    .stack
                    .peek()
                    .cloned()
                    .ok_or(InterpreterError::StackUnderflow)?;
                self.assign(name, value);
            }
            OpCode::Decl => {
                let name = self.name_operand(instruction)?;
                if !self.scopes.declared_locally(name) {
                    self.scopes.declare(name, Value::undefined());
                }
            }

            OpCode::Push => {
                let value = match &instruction.operand {
                    Operand::Object(literal) => instantiate(literal),
                    operand => operand.to_value(),
                };
                self.push_value(value);
            }
            OpCode::Pop => {
                self.pop()?;
            }
            OpCode::Dup => {
                self.stack.dup().ok_or(InterpreterError::StackUnderflow)?;
            }
            OpCode::PushThis => {
                let this = self.this_stack.last().unwrap_or(&self.global).clone();
                self.push_value(this);
            }

            OpCode::GetProp => {
                let name = self.name_operand(instruction)?;
                let target = self.pop()?;
                self.check_property_access(&target, name)?;
                let value = self.get_property(&target, name);
                self.push_value(value);
            }
            OpCode::SetProp => {
                let name = self.name_operand(instruction)?;
                let value = self.pop()?;
                let target = self.pop()?;
                self.check_property_access(&target, name)?;
                set_property(&target, name, value.clone())?;
                self.push_value(value);
            }
            OpCode::GetIndex => {
                let key = property_key(&self.pop()?);
                let target = self.pop()?;
                self.check_property_access(&target, &key)?;
                let value = self.get_property(&target, &key);
                self.push_value(value);
            }
            OpCode::SetIndex => {
                let value = self.pop()?;
                let key = property_key(&self.pop()?);
                let target = self.pop()?;
                self.check_property_access(&target, &key)?;
                set_property(&target, &key, value.clone())?;
                self.push_value(value);
            }

            OpCode::NewArray => {
                let count = self.count_operand(instruction)?;
                let elements = self
                    .stack
                    .pop_n(count)
                    .ok_or(InterpreterError::StackUnderflow)?;
                self.push_value(Value::array(elements));
            }
            OpCode::NewObject => {
                let count = self.count_operand(instruction)?;
                let items = self
                    .stack
                    .pop_n(count * 2)
                    .ok_or(InterpreterError::StackUnderflow)?;
                let object = Value::object();
                for pair in items.chunks_exact(2) {
                    object.set_property(&pair[0].to_string(), pair[1].clone());
                }
                self.push_value(object);
            }

            OpCode::MarkConstructor => self.flags.insert(VmFlags::CONSTRUCTOR_CALL),
            OpCode::MarkMember => self.flags.insert(VmFlags::MEMBER_CALL),

            OpCode::Inc => self.update(instruction, 1.0, true)?,
            OpCode::Dec => self.update(instruction, -1.0, true)?,
            OpCode::PostInc => self.update(instruction, 1.0, false)?,
            OpCode::PostDec => self.update(instruction, -1.0, false)?,
            OpCode::Not => {
                let value = self.pop()?;
                self.push_value(operators::not(&value));
            }
            OpCode::BitNot => {
                let value = self.pop()?;
                self.push_value(operators::bit_not(&value));
            }
            OpCode::Neg => {
                let value = self.pop()?;
                self.push_value(operators::negate(&value));
            }

            OpCode::Add => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let sum = operators::add(&lhs, &rhs)?;
                self.push_value(sum);
            }
            OpCode::Sub => self.arithmetic(ArithmeticOp::Sub)?,
            OpCode::Mul => self.arithmetic(ArithmeticOp::Mul)?,
            OpCode::Div => self.arithmetic(ArithmeticOp::Div)?,
            OpCode::Rem => self.arithmetic(ArithmeticOp::Rem)?,
            OpCode::Shl => self.arithmetic(ArithmeticOp::Shl)?,
            OpCode::Shr => self.arithmetic(ArithmeticOp::Shr)?,
            OpCode::BitAnd => self.arithmetic(ArithmeticOp::BitAnd)?,
            OpCode::BitOr => self.arithmetic(ArithmeticOp::BitOr)?,
            OpCode::BitXor => self.arithmetic(ArithmeticOp::BitXor)?,
            OpCode::And => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push_value(operators::logical_and(lhs, rhs));
            }
            OpCode::Or => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push_value(operators::logical_or(lhs, rhs));
            }
            OpCode::Lt => self.compare(CompareOp::Lt)?,
            OpCode::Gt => self.compare(CompareOp::Gt)?,
            OpCode::Lte => self.compare(CompareOp::Lte)?,
            OpCode::Gte => self.compare(CompareOp::Gte)?,
            OpCode::Eq | OpCode::Neq => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let equal = operators::equals(&lhs, &rhs);
                self.push_value(Value::bool(equal == (instruction.opcode == OpCode::Eq)));
            }

            OpCode::Jmp => self.jump(instruction.jump)?,
            OpCode::Jmpz => {
                if self.flags.contains(VmFlags::ZERO) {
                    self.jump(instruction.jump)?;
                }
            }
            OpCode::Jmpnz => {
                if !self.flags.contains(VmFlags::ZERO) {
                    self.jump(instruction.jump)?;
                }
            }

            OpCode::Call => {
                let argc = self.count_operand(instruction)?;
                self.call(argc)?;
            }
            OpCode::Ret => {
                let value = self.pop()?;
                self.scopes.pop_scope();
                self.finish_call(value)?;
            }
            OpCode::Leave => self.pc = self.end,
        }
        Ok(())
    }

    fn jump(&mut self, length: i32) -> InterpreterResult<()> {
        let target = self.pc as i64 + length as i64;
        if target < 0 || target as usize > self.code.len() {
            return Err(InterpreterError::InternalError(format!(
                "jump to {} outside of code",
                target
            )));
        }
        self.pc = target as usize;
        Ok(())
    }

    fn arithmetic(&mut self, op: ArithmeticOp) -> InterpreterResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        self.push_value(operators::arithmetic(op, &lhs, &rhs));
        Ok(())
    }

    fn compare(&mut self, op: CompareOp) -> InterpreterResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        self.push_value(operators::compare(op, &lhs, &rhs));
        Ok(())
    }

    /// `++`/`--` on a variable. Prefix pushes the new value, postfix the old.
    fn update(&mut self, instruction: &Instruction, delta: f64, prefix: bool) -> InterpreterResult<()> {
        let Operand::Name(name) = &instruction.operand else {
            return Err(InterpreterError::ReferenceError(
                "invalid increment/decrement operand".to_string(),
            ));
        };
        let current = self
            .scopes
            .lookup(name)
            .cloned()
            .ok_or_else(|| not_defined(name))?;
        let updated = operators::step(&current, delta);
        self.assign(name, updated.clone());
        self.push_value(if prefix { updated } else { current });
        Ok(())
    }

    /// Variable store; a non-writable binding is left alone
    fn assign(&mut self, name: &str, value: Value) {
        if self.scopes.lookup(name).is_some_and(|v| !v.is_writable()) {
            return;
        }
        self.scopes.assign(name, value);
    }

    fn check_property_access(&self, target: &Value, name: &str) -> InterpreterResult<()> {
        if target.is_nullish() {
            return Err(InterpreterError::TypeError(format!(
                "cannot access property '{}' of {}",
                name,
                target.get_type()
            )));
        }
        Ok(())
    }

    /// Property lookup: own, synthetic, then the intrinsic table for the
    /// value's type, then the methods shared by all objects
    pub fn get_property(&self, target: &Value, name: &str) -> Value {
        if target.has_own_property(name) {
            return target.get_property(name);
        }
        if target.is_nullish() {
            return Value::undefined();
        }
        let tables = [
            self.intrinsics.for_type(target.get_type()),
            Some(&self.intrinsics.object),
        ];
        tables
            .into_iter()
            .flatten()
            .find(|table| table.has_own_property(name))
            .map_or_else(Value::undefined, |table| table.get_property(name))
    }

    // Calls

    /// Compile a script function on first use
    fn prepare(&mut self, callee: &Value) -> InterpreterResult<()> {
        if !callee.is_function() {
            return Err(InterpreterError::TypeError(format!(
                "{} is not a function",
                callee.as_string()
            )));
        }
        let mut object = callee.borrow_mut();
        let Some(function) = object.as_function_mut() else {
            return Ok(());
        };
        if function.prepare()? {
            self.stats.functions_compiled += 1;
            debug!(name = function.name().unwrap_or("<anonymous>"), "compiled function");
        }
        Ok(())
    }

    /// Stack layout: `[receiver] callee arg1 .. argN`
    fn call(&mut self, argc: usize) -> InterpreterResult<()> {
        let args = self
            .stack
            .pop_n(argc)
            .ok_or(InterpreterError::StackUnderflow)?;
        let callee = self.pop()?;
        let receiver = if self.flags.contains(VmFlags::MEMBER_CALL) {
            Some(self.pop()?)
        } else {
            None
        };

        if self.frames.depth() >= self.config.max_call_depth {
            return Err(InterpreterError::RangeError(
                "maximum call stack size exceeded".to_string(),
            ));
        }
        self.prepare(&callee)?;

        let constructing = self.flags.contains(VmFlags::CONSTRUCTOR_CALL);
        self.frames.push(SavedState {
            code: Rc::clone(&self.code),
            pc: self.pc,
            end: self.end,
            flags: self.flags,
            stack_len: self.stack.len(),
            this_len: self.this_stack.len(),
        });
        self.flags.remove(CALL_MARKERS);

        let this = if constructing {
            let object = Value::object();
            object.copy_properties_from(&callee.get_property(PROTOTYPE), false);
            object
        } else {
            receiver.unwrap_or_else(|| self.global.clone())
        };
        self.this_stack.push(this.clone());
        self.stats.calls += 1;

        let (kind, params, code) = {
            let object = callee.borrow();
            let Some(function) = object.as_function() else {
                return Err(InterpreterError::InternalError("callee changed type".to_string()));
            };
            (
                function.kind().clone(),
                function.params().to_vec(),
                function.code().cloned(),
            )
        };

        match kind {
            FunctionKind::Native(native) => {
                let arguments = Arguments::new(&params, args, this);
                let result = native(self, &arguments)?;
                self.finish_call(result)
            }
            FunctionKind::Script(_) => {
                let code = code.ok_or_else(|| {
                    InterpreterError::InternalError("calling an uncompiled function".to_string())
                })?;
                self.scopes.push_scope();
                for (i, name) in params.iter().enumerate() {
                    let value = args.get(i).cloned().unwrap_or_else(Value::undefined);
                    self.scopes.declare(name, value);
                }
                self.scopes.declare("arguments", Value::array(args));
                self.end = code.len();
                self.pc = 0;
                self.code = code;
                Ok(())
            }
        }
    }

    /// Restore the caller and push the call result
    fn finish_call(&mut self, value: Value) -> InterpreterResult<()> {
        let saved = self.frames.pop().ok_or_else(|| {
            InterpreterError::InternalError("return without a matching call".to_string())
        })?;
        let this = self.this_stack.pop().ok_or_else(|| {
            InterpreterError::InternalError("return without a bound receiver".to_string())
        })?;
        self.stack.truncate(saved.stack_len);
        self.this_stack.truncate(saved.this_len);
        self.code = saved.code;
        self.pc = saved.pc;
        self.end = saved.end;
        let live_interrupt = self.flags & VmFlags::INTERRUPT;
        self.flags = (saved.flags - VmFlags::INTERRUPT) | live_interrupt;

        let result = if saved.flags.contains(VmFlags::CONSTRUCTOR_CALL) {
            if value.is_object_like() {
                value.copy_properties_from(&this, true);
                value
            } else {
                this
            }
        } else {
            value
        };
        self.flags.remove(CALL_MARKERS);
        self.push_value(result);
        Ok(())
    }
}

fn not_defined(name: &str) -> InterpreterError {
    InterpreterError::ReferenceError(format!("{} is not defined", name))
}

/// Canonical property name of a computed key
fn property_key(key: &Value) -> String {
    match key.as_number() {
        Some(n) => number_to_string(n),
        None => key.to_string(),
    }
}

/// Property store. Array indices write elements; numbers and strings
/// ignore stores.
fn set_property(target: &Value, name: &str, value: Value) -> InterpreterResult<()> {
    match target.get_type() {
        ObjectType::Number | ObjectType::String => {}
        ObjectType::Array => {
            if let Some(index) = parse_index(name) {
                let stored = target
                    .borrow_mut()
                    .as_array_mut()
                    .is_none_or(|array| array.set(index, value));
                if !stored {
                    return Err(InterpreterError::invalid_array_length());
                }
                return Ok(());
            }
            target.set_property(name, value);
        }
        _ => {
            target.set_property(name, value);
        }
    }
    Ok(())
}

/// A script function in the code is a template: each evaluation yields a
/// new function object with its own properties
fn instantiate(literal: &Value) -> Value {
    let function = match literal.borrow().as_function() {
        Some(function) if !function.is_native() => function.instance(),
        _ => return literal.clone(),
    };
    Value::function(function)
}

/// `push fn; call 0; pop`
fn callback_range(callback: Value) -> CodeRange {
    let code = InstructionList::new(vec![
        Instruction::with_operand(OpCode::Push, Operand::Object(callback)),
        Instruction::with_operand(OpCode::Call, Operand::Number(0.0)),
        Instruction::simple(OpCode::Pop),
    ]);
    CodeRange::full(Rc::new(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::compiler::Compiler;
    use crate::parser::parse;
    use crate::runtime::function::Function;

    fn compile(source: &str) -> CodeRange {
        let program = parse(source).unwrap();
        CodeRange::full(Compiler::new().generate(&program).unwrap())
    }

    fn run(interp: &mut Interpreter, source: &str) -> InterpreterResult<Value> {
        interp.set_counters(compile(source))?;
        interp.run()?;
        Ok(interp.get_result())
    }

    fn eval(source: &str) -> String {
        let mut interp = Interpreter::new();
        run(&mut interp, source).unwrap().to_string()
    }

    fn defer(interp: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
        interp.schedule_callback(args.at(0));
        Ok(Value::undefined())
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("2 + 3;"), "5");
        assert_eq!(eval("10 - 2 * 3;"), "4");
        assert_eq!(eval("7 % 4;"), "3");
        assert_eq!(eval("'a' + 1;"), "a1");
    }

    #[test]
    fn test_variables() {
        assert_eq!(eval("var x = 10; x + 1;"), "11");
        assert_eq!(eval("var x = 1; x += 4; x;"), "5");
        assert_eq!(eval("var i = 5; i++; i;"), "6");
        assert_eq!(eval("var i = 5; i--;"), "5");
        assert_eq!(eval("var i = 5; --i;"), "4");
    }

    #[test]
    fn test_conditional_jump() {
        assert_eq!(eval("if (0) { 1; } else { 2; }"), "2");
        assert_eq!(eval("if (1) { 1; } else { 2; }"), "1");
        assert_eq!(eval("var r = 0; if ('') { r = 1; } r;"), "0");
        assert_eq!(eval("0 ? 'a' : 'b';"), "b");
    }

    #[test]
    fn test_loops() {
        assert_eq!(eval("var s = 0; for (var i = 0; i < 5; i++) { s += i; } s;"), "10");
        assert_eq!(eval("var n = 0; while (n < 7) { n++; } n;"), "7");
        assert_eq!(eval("var n = 0; do { n++; } while (n < 3); n;"), "3");
        assert_eq!(eval("var n = 10; do { n++; } while (0); n;"), "11");
    }

    #[test]
    fn test_function_call_and_return() {
        assert_eq!(eval("function add(a, b) { return a + b; } add(2, 3);"), "5");
        assert_eq!(eval("function f(a, b) { return b; } f(1);"), "undefined");
        assert_eq!(eval("function f() { return arguments.length; } f(1, 2, 3);"), "3");
        assert_eq!(eval("function f() { } f();"), "undefined");
    }

    #[test]
    fn test_member_call_binds_this() {
        let source = "var o = { n: 4, get: function() { return this.n; } }; o.get();";
        assert_eq!(eval(source), "4");
    }

    #[test]
    fn test_constructor_call() {
        let source = "function P(x) { this.x = x; } var p = new P(9); p.x;";
        assert_eq!(eval(source), "9");

        let source = "function P() { } P.prototype.k = 3; var p = new P(); p.k;";
        assert_eq!(eval(source), "3");

        let mut interp = Interpreter::new();
        run(&mut interp, "function P() { return 1; } new P();").unwrap();
        assert_eq!(interp.get_result().get_type(), ObjectType::Object);
        assert!(!interp.flags().contains(VmFlags::CONSTRUCTOR_CALL));
    }

    #[test]
    fn test_call_symmetry() {
        let source = "function f(n) { if (n > 0) { f(n - 1); } return n; }";
        for depth in 0..=8 {
            let mut interp = Interpreter::new();
            let result = run(&mut interp, &format!("{} f({});", source, depth)).unwrap();
            assert_eq!(result.to_string(), depth.to_string());
            assert_eq!(interp.call_depth(), 0);
            assert_eq!(interp.this_depth(), 0);
            assert_eq!(interp.scopes().depth(), 1);
            assert!(interp.stack_len() <= 1);
            assert!(!interp.flags().intersects(CALL_MARKERS));
        }
    }

    #[test]
    fn test_stack_balance() {
        let corpus = [
            "var a = 1; a = a + 1; a;",
            "for (var i = 0; i < 10; i++) { i * 2; } 0;",
            "var n = 0; while (n < 4) { n++; n; } n;",
            "function f(x) { x; x; return x; } f(1); f(2); f(3);",
            "var o = {}; o.a = 1; o.a += 2; o.a;",
            "var a = [1, 2]; a[0] = 3; a[0];",
            "1, 2, 3;",
        ];
        for source in corpus {
            let mut interp = Interpreter::new();
            run(&mut interp, source).unwrap();
            assert!(interp.stack_len() <= 1, "{} left {}", source, interp.stack_len());
        }
    }

    #[test]
    fn test_top_level_return_stops_program() {
        let mut interp = Interpreter::new();
        let result = run(&mut interp, "1; return 7; 8;").unwrap();
        assert_eq!(result.to_string(), "7");
    }

    #[test]
    fn test_lazy_compilation_once() {
        let mut interp = Interpreter::new();
        run(&mut interp, "function f() { return 1; } f(); f(); f();").unwrap();
        assert_eq!(interp.stats().functions_compiled, 1);
        assert_eq!(interp.stats().calls, 3);
    }

    #[test]
    fn test_errors() {
        let mut interp = Interpreter::new();
        let err = run(&mut interp, "y;").unwrap_err();
        assert_eq!(err, InterpreterError::ReferenceError("y is not defined".into()));
        assert_eq!(err.to_string(), "ReferenceError: y is not defined");

        let mut interp = Interpreter::new();
        let err = run(&mut interp, "var x = 1; x();").unwrap_err();
        assert!(matches!(err, InterpreterError::TypeError(_)));

        let mut interp = Interpreter::new();
        let err = run(&mut interp, "null.x;").unwrap_err();
        assert!(matches!(err, InterpreterError::TypeError(_)));

        let mut interp = Interpreter::new();
        let err = run(&mut interp, "var o = {}; o.x++;").unwrap_err();
        assert!(matches!(err, InterpreterError::ReferenceError(_)));
    }

    #[test]
    fn test_mismatched_return() {
        let code = InstructionList::new(vec![
            Instruction::with_operand(OpCode::Push, Operand::Number(1.0)),
            Instruction::simple(OpCode::Ret),
        ]);
        let mut interp = Interpreter::new();
        interp.set_counters(CodeRange::full(Rc::new(code))).unwrap();
        let err = interp.run().unwrap_err();
        assert!(matches!(err, InterpreterError::InternalError(_)));
    }

    #[test]
    fn test_recursion_limit() {
        let mut interp = Interpreter::with_config(InterpreterConfig {
            max_call_depth: 16,
            ..InterpreterConfig::default()
        });
        let err = run(&mut interp, "function f() { return f(); } f();").unwrap_err();
        assert!(matches!(err, InterpreterError::RangeError(_)));

        interp.reset();
        assert_eq!(interp.call_depth(), 0);
        assert_eq!(interp.state(), VmState::Idle);
    }

    #[test]
    fn test_run_requires_counters() {
        let mut interp = Interpreter::new();
        assert!(matches!(interp.run(), Err(InterpreterError::InternalError(_))));
    }

    #[test]
    fn test_interrupts_run_first_in_order() {
        let mut interp = Interpreter::new();
        interp.define_global("order", Value::string(""));
        interp.request_interrupt(compile("order = order + 'a';"));
        interp.request_interrupt(compile("order = order + 'b';"));
        let result = run(&mut interp, "order = order + 'm'; order;").unwrap();
        assert_eq!(result.to_string(), "abm");
        assert_eq!(interp.stats().interrupts_serviced, 2);
        assert!(!interp.flags().contains(VmFlags::INTERRUPT));
    }

    #[test]
    fn test_interrupt_from_native_inside_call() {
        let mut interp = Interpreter::new();
        interp.define_global("defer", Value::function(Function::native("defer", &["f"], defer)));
        let source = "var s = ''; \
                      function cb() { s = s + 'i'; } \
                      function g() { defer(cb); s = s + 'g'; } \
                      g(); s = s + 'm'; s;";
        let result = run(&mut interp, source).unwrap();
        assert_eq!(result.to_string(), "igm");
        assert_eq!(interp.call_depth(), 0);
        assert_eq!(interp.state(), VmState::Idle);
    }

    #[test]
    fn test_interrupt_preserves_zero_flag() {
        let mut interp = Interpreter::new();
        interp.define_global("defer", Value::function(Function::native("defer", &["f"], defer)));
        // The callback returns a truthy value between the test and the jump
        let source = "function cb() { return 1; } \
                      var r = 'else'; \
                      if (defer(cb)) { r = 'then'; } r;";
        assert_eq!(run(&mut interp, source).unwrap().to_string(), "else");
    }

    fn five(_: &mut Interpreter, _: &Arguments) -> InterpreterResult<Value> {
        Ok(Value::number(5.0))
    }

    fn apply(interp: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
        interp.call_function(&args.at(0), None, vec![args.at(1)])
    }

    #[test]
    fn test_interrupt_keeps_pending_member_call() {
        let mut interp = Interpreter::new();
        let receiver = Value::object();
        let method = Value::function(Function::native("m", &[], five));
        let setup = [
            Instruction::with_operand(OpCode::Push, Operand::Object(receiver)),
            Instruction::with_operand(OpCode::Push, Operand::Object(method)),
            Instruction::simple(OpCode::MarkMember),
        ];
        for instruction in &setup {
            interp.execute(instruction).unwrap();
        }

        // The callback arrives between `markmem` and the call it marks
        interp.schedule_callback(Value::function(Function::native("cb", &[], five)));
        let rest = InstructionList::new(vec![Instruction::with_operand(
            OpCode::Call,
            Operand::Number(0.0),
        )]);
        interp.set_counters(CodeRange::full(Rc::new(rest))).unwrap();
        interp.run().unwrap();

        assert_eq!(interp.get_result().to_string(), "5");
        assert_eq!(interp.stack_len(), 1);
        assert_eq!(interp.stats().interrupts_serviced, 1);
        assert!(!interp.flags().intersects(CALL_MARKERS));
    }

    #[test]
    fn test_native_constructor_with_builtins() {
        let mut interp = Interpreter::new();
        crate::builtins::install(&mut interp);
        let result = run(&mut interp, "new Array(3);").unwrap();
        assert!(!interp.flags().contains(VmFlags::CONSTRUCTOR_CALL));
        assert_eq!(result.get_type(), ObjectType::Array);
        assert_eq!(result.get_property("length").to_string(), "3");
        assert!(result.get_property("0").is_undefined());
        assert!(result.has_own_property("push"));
        assert!(result.has_own_property("join"));
    }

    #[test]
    fn test_call_function() {
        let mut interp = Interpreter::new();
        run(
            &mut interp,
            "var o = { k: 2, f: function(x) { return this.k * x; } }; function g() { }",
        )
        .unwrap();
        let stack_len = interp.stack_len();
        let o = interp.lookup_global("o").unwrap();
        let f = o.get_property("f");
        let result = interp
            .call_function(&f, Some(o.clone()), vec![Value::number(21.0)])
            .unwrap();
        assert_eq!(result.to_string(), "42");

        let g = interp.lookup_global("g").unwrap();
        assert!(interp.call_function(&g, None, vec![]).unwrap().is_undefined());
        assert_eq!(interp.call_depth(), 0);
        assert_eq!(interp.stack_len(), stack_len);
        assert_eq!(interp.scopes().depth(), 1);

        let err = interp.call_function(&Value::number(1.0), None, vec![]).unwrap_err();
        assert!(matches!(err, InterpreterError::TypeError(_)));
    }

    #[test]
    fn test_call_function_nested_in_script() {
        let mut interp = Interpreter::new();
        interp.define_global("apply", Value::function(Function::native("apply", &[], apply)));
        interp.define_global("defer", Value::function(Function::native("defer", &["f"], defer)));
        assert_eq!(
            run(&mut interp, "function sq(n) { return n * n; } apply(sq, 7) + 1;")
                .unwrap()
                .to_string(),
            "50"
        );
        assert_eq!(
            run(&mut interp, "function f(n) { return n > 0 ? apply(f, n - 1) + 1 : 0; } f(5);")
                .unwrap()
                .to_string(),
            "5"
        );

        // Interrupts raised inside the nested call wait for the outer loop
        let source = "var s = ''; \
                      function cb() { s = s + 'i'; } \
                      function h() { defer(cb); s = s + 'h'; } \
                      apply(h, 0); s = s + 'm'; s;";
        assert_eq!(run(&mut interp, source).unwrap().to_string(), "him");
        assert_eq!(interp.call_depth(), 0);
    }

    #[test]
    fn test_huge_array_index_is_range_error() {
        let mut interp = Interpreter::new();
        let err = run(&mut interp, "var a = []; a[1073741822] = 1;").unwrap_err();
        assert_eq!(err, InterpreterError::invalid_array_length());

        assert_eq!(eval("var a = []; a[5] = 1; a.length;"), "6");
        assert_eq!(eval("var a = []; a[5] = 1; a[2];"), "undefined");
    }

    #[test]
    fn test_reset_clears_run_state() {
        let mut interp = Interpreter::new();
        run(&mut interp, "var g = 1; 2;").unwrap();
        interp.request_interrupt(compile("3;"));
        interp.reset();
        assert_eq!(interp.stack_len(), 0);
        assert!(interp.flags().is_empty());
        assert!(interp.lookup_global("g").is_some());
    }
}
