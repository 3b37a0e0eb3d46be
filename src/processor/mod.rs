// The processor: fetch/decode/execute, register file, stacks, operand
// cache, interrupt dispatch, sleep/wake. Grounded on
// class_processor.py's `main_loop`/`get_value_from_address`/
// `send_value_to_address`/`process_interrupts`/`execute_call`, generalized
// from a single reentrant bus lock held across a whole instruction (the
// Python `ControlBus.Lock` is reentrant) to per-transaction locking, since
// `std::sync::Mutex` is not reentrant -- each bus access in this module
// takes and releases the lock on its own, exactly as spec.md §4.6.1
// describes `fetch`/`store` doing independently of the outer instruction
// loop. Noted as a REDESIGN in DESIGN.md.

pub mod opcode;

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::bus::Cell;
use crate::bus::Bus as BusWait;
use crate::device::{interrupts, Device, DeviceContext};
use crate::error::RuntimeFault;
use opcode::Opcode;

const REGISTER_COUNT: usize = 8;
const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareResult {
    LessThan,
    Equal,
    GreaterThan,
    Inconclusive,
}

/// Address-keyed cache for cacheable bus reads (instruction opcodes and
/// operand cells). Bounded per spec.md §9's redesign note; eviction is
/// oldest-write-first once the capacity is reached.
struct OperandCache {
    capacity: usize,
    order: VecDeque<Cell>,
    values: HashMap<Cell, Cell>,
}

impl OperandCache {
    fn new(capacity: usize) -> Self {
        OperandCache { capacity, order: VecDeque::new(), values: HashMap::new() }
    }

    fn get(&self, addr: Cell) -> Option<Cell> {
        self.values.get(&addr).copied()
    }

    fn insert(&mut self, addr: Cell, value: Cell) {
        if !self.values.contains_key(&addr) {
            if self.order.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.values.remove(&oldest);
                }
            }
            self.order.push_back(addr);
        }
        self.values.insert(addr, value);
    }

    fn remove(&mut self, addr: Cell) {
        self.values.remove(&addr);
        self.order.retain(|&a| a != addr);
    }

    fn clear(&mut self) {
        self.values.clear();
        self.order.clear();
    }
}

pub struct Processor {
    ctx: DeviceContext,
    reset_ip: Cell,
    ip: Cell,
    registers: [Cell; REGISTER_COUNT],
    user_stack: Vec<Cell>,
    register_stack: Vec<[Cell; REGISTER_COUNT]>,
    ip_stack: Vec<Cell>,
    call_source_stack: Vec<bool>,
    compare: CompareResult,
    interrupt_vectors: BTreeMap<Cell, Cell>,
    handling_interrupt: bool,
    interrupt_stack_depth: usize,
    sleeping: bool,
    sleep_mode: bool,
    cache: OperandCache,
    /// Interrupt numbers raised by this processor's own `INT` opcode and
    /// still pending on the bus. Dispatching one of these clears it
    /// immediately (spec.md §4.6.5); device-raised interrupts are left for
    /// the raising device to clear.
    self_raised: BTreeSet<Cell>,
}

impl Processor {
    pub fn new(ctx: DeviceContext) -> Self {
        let reset_ip = ctx.starting_address;
        Processor {
            ctx,
            reset_ip,
            ip: reset_ip,
            registers: [0; REGISTER_COUNT],
            user_stack: Vec::new(),
            register_stack: Vec::new(),
            ip_stack: Vec::new(),
            call_source_stack: Vec::new(),
            compare: CompareResult::Inconclusive,
            interrupt_vectors: BTreeMap::new(),
            handling_interrupt: false,
            interrupt_stack_depth: 0,
            sleeping: false,
            sleep_mode: false,
            cache: OperandCache::new(DEFAULT_CACHE_CAPACITY),
            self_raised: BTreeSet::new(),
        }
    }

    #[cfg(test)]
    pub fn registers(&self) -> [Cell; REGISTER_COUNT] {
        self.registers
    }
    #[cfg(test)]
    pub fn compare(&self) -> CompareResult {
        self.compare
    }
    #[cfg(test)]
    pub fn handling_interrupt(&self) -> bool {
        self.handling_interrupt
    }
    #[cfg(test)]
    pub fn ip(&self) -> Cell {
        self.ip
    }
    #[cfg(test)]
    pub fn is_sleeping(&self) -> bool {
        self.sleeping
    }

    fn effective(&self, operand: Cell) -> Cell {
        if operand < 0 {
            self.registers[(-operand) as usize]
        } else {
            operand
        }
    }

    fn recompute_compare(&mut self) {
        self.compare = if self.registers[1] < self.registers[2] {
            CompareResult::LessThan
        } else if self.registers[1] > self.registers[2] {
            CompareResult::GreaterThan
        } else {
            CompareResult::Equal
        };
    }

    fn set_register(&mut self, index: usize, value: Cell) {
        self.registers[index] = value;
        if index == 1 || index == 2 {
            self.recompute_compare();
        }
    }

    /// One bus read transaction (spec.md §4.6.1). Cacheable reads are
    /// served from, and populate, the operand cache; others bypass and
    /// invalidate it.
    fn fetch(&mut self, addr: Cell, cacheable: bool) -> Cell {
        if cacheable {
            if let Some(value) = self.cache.get(addr) {
                return value;
            }
        }
        {
            let mut lock = self.ctx.control_bus.lock();
            lock.set_address(addr);
            lock.set_read_request(true);
        }
        BusWait::wait_for_response(&self.ctx.control_bus);
        let value;
        {
            let mut lock = self.ctx.control_bus.lock();
            value = lock.data();
            lock.set_response(false);
        }
        if cacheable {
            self.cache.insert(addr, value);
        } else {
            self.cache.remove(addr);
        }
        value
    }

    /// One bus write transaction. Writes always evict the target address
    /// from the cache (spec.md §4.6.1: "writes to any cached address evict
    /// that address").
    fn store(&mut self, addr: Cell, value: Cell) {
        {
            let mut lock = self.ctx.control_bus.lock();
            lock.set_address(addr);
            lock.set_data(value);
            lock.set_write_request(true);
        }
        BusWait::wait_for_response(&self.ctx.control_bus);
        {
            let mut lock = self.ctx.control_bus.lock();
            lock.set_response(false);
        }
        self.cache.remove(addr);
    }

    fn fault(&mut self, err: RuntimeFault) {
        log::error!("{err}");
        self.ctx.control_bus.lock().set_interrupt(interrupts::HALT);
    }

    fn pop_user_stack(&mut self) -> Option<Cell> {
        let value = self.user_stack.pop();
        if value.is_none() {
            self.fault(RuntimeFault::StackUnderflow { ip: self.ip });
        }
        value
    }

    /// Between-instruction interrupt check (spec.md §4.6.5): dispatches the
    /// lowest-numbered pending, vectored interrupt via a synthetic CALL.
    fn process_interrupts(&mut self) {
        if self.handling_interrupt {
            return;
        }
        let pending = {
            let lock = self.ctx.control_bus.lock();
            lock.interrupt_awaiting()
        };
        let Some(n) = pending else { return };
        let Some(&target) = self.interrupt_vectors.get(&n) else { return };

        if self.self_raised.remove(&n) {
            self.ctx.control_bus.lock().clear_interrupt(n);
        }

        self.interrupt_stack_depth = self.ip_stack.len();
        self.ip_stack.push(self.ip);
        self.register_stack.push(self.registers);
        self.call_source_stack.push(true);
        self.handling_interrupt = true;
        self.ip = target;
        self.sleeping = false;
    }

    fn execute_one_instruction(&mut self) {
        let opcode_cell = self.fetch(self.ip, true);
        let Some(opcode) = Opcode::from_cell(opcode_cell) else {
            self.fault(RuntimeFault::UnknownOpcode { opcode: opcode_cell, ip: self.ip });
            return;
        };
        let operand_count = opcode.operand_count();
        let mut operands = [0 as Cell; 2];
        for (i, slot) in operands.iter_mut().enumerate().take(operand_count) {
            *slot = self.fetch(self.ip + 1 + i as Cell, true);
        }
        let faulting_ip = self.ip;
        self.ip += 1 + operand_count as Cell;
        self.execute(opcode, &operands[..operand_count], faulting_ip);
    }

    fn execute(&mut self, opcode: Opcode, operands: &[Cell], faulting_ip: Cell) {
        match opcode {
            Opcode::Nop => {}
            Opcode::Lr => {
                let rd = operands[0] as usize;
                self.set_register(rd, operands[1]);
            }
            Opcode::Lrm => {
                let rd = operands[0] as usize;
                let addr = self.effective(operands[1]);
                let value = self.fetch(addr, false);
                self.set_register(rd, value);
            }
            Opcode::Lrr => {
                let rd = operands[0] as usize;
                let rs = operands[1] as usize;
                let value = self.registers[rs];
                self.set_register(rd, value);
            }
            Opcode::Mrm => {
                let rs = operands[0] as usize;
                let addr = self.effective(operands[1]);
                let value = self.registers[rs];
                self.store(addr, value);
            }
            Opcode::Add => self.set_register(3, self.registers[1].wrapping_add(self.registers[2])),
            Opcode::Sub => self.set_register(3, self.registers[1].wrapping_sub(self.registers[2])),
            Opcode::Mul => self.set_register(3, self.registers[1].wrapping_mul(self.registers[2])),
            Opcode::Div => {
                if self.registers[2] == 0 {
                    self.fault(RuntimeFault::ArithmeticFault { ip: faulting_ip });
                } else {
                    let result = floor_div(self.registers[1], self.registers[2]);
                    self.set_register(3, result);
                }
            }
            Opcode::Halt => {
                self.ctx.control_bus.lock().set_interrupt(interrupts::HALT);
            }
            Opcode::Debug => {
                log::info!(
                    "[{}] ip={} registers={:?} compare={:?} sleeping={} sleep_mode={}",
                    self.ctx.id,
                    self.ip,
                    self.registers,
                    self.compare,
                    self.sleeping,
                    self.sleep_mode,
                );
            }
            Opcode::Jmp => self.ip = self.effective(operands[0]),
            Opcode::Rst => self.reset(),
            Opcode::Cmp => self.recompute_compare(),
            Opcode::Je => {
                if self.compare == CompareResult::Equal {
                    self.ip = self.effective(operands[0]);
                }
            }
            Opcode::Jne => {
                if self.compare != CompareResult::Equal && self.compare != CompareResult::Inconclusive {
                    self.ip = self.effective(operands[0]);
                }
            }
            Opcode::Jl => {
                if self.compare == CompareResult::LessThan {
                    self.ip = self.effective(operands[0]);
                }
            }
            Opcode::Jg => {
                if self.compare == CompareResult::GreaterThan {
                    self.ip = self.effective(operands[0]);
                }
            }
            Opcode::Push => {
                let rs = operands[0] as usize;
                self.user_stack.push(self.registers[rs]);
            }
            Opcode::Pop => {
                let rd = operands[0] as usize;
                if let Some(value) = self.pop_user_stack() {
                    self.set_register(rd, value);
                }
            }
            Opcode::Call => {
                let target = self.effective(operands[0]);
                self.ip_stack.push(self.ip);
                self.register_stack.push(self.registers);
                self.call_source_stack.push(false);
                self.ip = target;
            }
            Opcode::Rtn => self.execute_rtn(faulting_ip),
            Opcode::Not => self.set_register(3, !self.registers[1]),
            Opcode::Or => self.set_register(3, self.registers[1] | self.registers[2]),
            Opcode::And => self.set_register(3, self.registers[1] & self.registers[2]),
            Opcode::Xor => self.set_register(3, self.registers[1] ^ self.registers[2]),
            Opcode::Siv => {
                let n = operands[0];
                if n < 0 {
                    self.fault(RuntimeFault::InvalidInterruptNumber { number: n, ip: faulting_ip });
                } else {
                    let target = self.effective(operands[1]);
                    self.interrupt_vectors.insert(n, target);
                }
            }
            Opcode::Inc => {
                let rd = operands[0] as usize;
                let value = self.registers[rd].wrapping_add(1);
                self.set_register(rd, value);
            }
            Opcode::Sleep => {
                self.sleeping = true;
                self.sleep_mode = true;
            }
            Opcode::Wake => {
                self.sleeping = false;
                self.sleep_mode = false;
            }
            Opcode::Dec => {
                let rd = operands[0] as usize;
                let value = self.registers[rd].wrapping_sub(1);
                self.set_register(rd, value);
            }
            Opcode::Int => {
                let n = operands[0];
                self.self_raised.insert(n);
                self.ctx.control_bus.lock().set_interrupt(n);
            }
            Opcode::Peek => {
                let rd = operands[0] as usize;
                match self.user_stack.last().copied() {
                    Some(value) => self.set_register(rd, value),
                    None => self.fault(RuntimeFault::StackUnderflow { ip: faulting_ip }),
                }
            }
        }
    }

    fn execute_rtn(&mut self, faulting_ip: Cell) {
        let Some(registers) = self.register_stack.pop() else {
            self.fault(RuntimeFault::StackUnderflow { ip: faulting_ip });
            return;
        };
        self.registers = registers;
        self.recompute_compare();

        let Some(ip) = self.ip_stack.pop() else {
            self.fault(RuntimeFault::StackUnderflow { ip: faulting_ip });
            return;
        };
        self.ip = ip;

        let Some(from_interrupt) = self.call_source_stack.pop() else {
            self.fault(RuntimeFault::StackUnderflow { ip: faulting_ip });
            return;
        };
        if from_interrupt {
            self.handling_interrupt = false;
            if self.sleep_mode && self.ip_stack.is_empty() {
                self.sleeping = true;
            }
        }
    }

    fn reset(&mut self) {
        self.ip = self.reset_ip;
        self.registers = [0; REGISTER_COUNT];
        self.user_stack.clear();
        self.register_stack.clear();
        self.ip_stack.clear();
        self.call_source_stack.clear();
        self.interrupt_vectors.clear();
        self.handling_interrupt = false;
        self.interrupt_stack_depth = 0;
        self.sleeping = false;
        self.sleep_mode = false;
        self.compare = CompareResult::Inconclusive;
        self.cache.clear();
        self.self_raised.clear();
    }
}

/// `a div b`, rounding toward negative infinity (Python's `//`), rather
/// than Rust's default truncation toward zero.
fn floor_div(a: Cell, b: Cell) -> Cell {
    let q = a.wrapping_div(b);
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) {
        q - 1
    } else {
        q
    }
}

impl Device for Processor {
    fn id(&self) -> &str {
        &self.ctx.id
    }

    fn run(mut self: Box<Self>) {
        loop {
            {
                let lock = self.ctx.control_bus.lock();
                if !lock.power_on() || lock.test_interrupt(interrupts::HALT) {
                    break;
                }
            }
            self.process_interrupts();
            if !self.sleeping {
                self.execute_one_instruction();
            }
        }
        self.ctx.trace("stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;

    fn processor() -> Box<Processor> {
        let (a, d, c, i) = Bus::buses();
        let ctx = DeviceContext::new("Processor", 0, 0, a, d, c, i);
        Box::new(Processor::new(ctx))
    }

    #[test]
    fn floor_div_rounds_toward_negative_infinity() {
        assert_eq!(floor_div(7, 2), 3);
        assert_eq!(floor_div(-7, 2), -4);
        assert_eq!(floor_div(7, -2), -4);
        assert_eq!(floor_div(-7, -2), 3);
    }

    #[test]
    fn lr_and_arithmetic_update_registers_and_compare() {
        let mut p = processor();
        p.execute(Opcode::Lr, &[1, 1], 0);
        p.execute(Opcode::Lr, &[2, 2], 0);
        p.execute(Opcode::Add, &[], 0);
        assert_eq!(p.registers()[3], 3);
        assert_eq!(p.compare(), CompareResult::LessThan);
    }

    #[test]
    fn call_then_rtn_restores_registers_and_ip() {
        let mut p = processor();
        p.execute(Opcode::Lr, &[4, 99], 0);
        p.ip = 10;
        p.execute(Opcode::Call, &[20], 0);
        assert_eq!(p.ip, 20);
        p.execute(Opcode::Lr, &[4, 1], 0);
        p.execute(Opcode::Rtn, &[], 0);
        assert_eq!(p.ip, 10);
        assert_eq!(p.registers()[4], 99);
        assert!(!p.handling_interrupt());
    }

    #[test]
    fn register_indirect_operand_resolves_through_register_file() {
        let mut p = processor();
        p.execute(Opcode::Lr, &[5, 123], 0);
        assert_eq!(p.effective(-5), 123);
        assert_eq!(p.effective(7), 7);
    }

    #[test]
    fn rst_clears_everything_but_memory() {
        let mut p = processor();
        p.execute(Opcode::Lr, &[1, 5], 0);
        p.user_stack.push(1);
        p.execute(Opcode::Rst, &[], 0);
        assert_eq!(p.registers(), [0; REGISTER_COUNT]);
        assert!(p.user_stack.is_empty());
        assert_eq!(p.compare(), CompareResult::Inconclusive);
    }

    #[test]
    fn sleep_then_wake_is_a_no_op_on_registers() {
        let mut p = processor();
        p.execute(Opcode::Sleep, &[], 0);
        assert!(p.is_sleeping());
        p.execute(Opcode::Wake, &[], 0);
        assert!(!p.is_sleeping());
    }

    #[test]
    fn loop_counting_to_five_leaves_equal_compare() {
        let mut p = processor();
        p.execute(Opcode::Lr, &[1, 0], 0);
        p.execute(Opcode::Lr, &[2, 5], 0);
        while p.registers()[1] < 5 {
            p.execute(Opcode::Inc, &[1], 0);
        }
        assert_eq!(p.registers()[1], 5);
        assert_eq!(p.compare(), CompareResult::Equal);
    }

    /// `SIV 2 :handler; LR 4 0; INT 2` (HALT never actually executes in
    /// this test; it stands in for "the instruction after INT"). RTN's
    /// full register-snapshot restore (§4.6.4 step 1) means the handler's
    /// own register writes do not survive past the matching RTN -- unlike
    /// the narrative summary in spec.md §8's scenario 3, which describes
    /// R[4] as still 1 after RTN. The restore-on-RTN rule in §4.6.4 is the
    /// precise operational contract, so this crate follows it; §8's prose
    /// is the looser description and is treated as approximate here
    /// (documented as a discrepancy in DESIGN.md).
    #[test]
    fn interrupt_dispatch_then_return_restores_dispatch_time_registers() {
        let mut p = processor();
        p.execute(Opcode::Siv, &[2, 20], 0);
        p.execute(Opcode::Lr, &[4, 0], 0);
        p.ctx.control_bus.lock().set_interrupt(2);

        p.process_interrupts();
        assert!(p.handling_interrupt());
        assert_eq!(p.ip, 20);

        p.execute(Opcode::Inc, &[4], 0);
        assert_eq!(p.registers()[4], 1);

        p.execute(Opcode::Rtn, &[], 0);
        assert!(!p.handling_interrupt());
        assert_eq!(p.registers()[4], 0);
    }

    /// `SIV 2 :h; INT 2` raises IRQ2 via the processor's own opcode rather
    /// than a device. Dispatch must clear it from the bus (spec.md §4.6.5);
    /// otherwise `process_interrupts` would see it still pending after RTN
    /// and redispatch the same handler forever instead of letting execution
    /// continue past the `INT`.
    #[test]
    fn int_raised_interrupt_is_cleared_from_the_bus_on_dispatch() {
        let mut p = processor();
        p.execute(Opcode::Siv, &[2, 20], 0);
        p.execute(Opcode::Int, &[2], 0);
        assert!(p.ctx.control_bus.lock().test_interrupt(2));

        p.process_interrupts();
        assert!(p.handling_interrupt());
        assert!(!p.ctx.control_bus.lock().test_interrupt(2));

        p.execute(Opcode::Rtn, &[], 0);
        assert!(!p.handling_interrupt());

        // No longer pending, so a further poll must not redispatch it.
        p.process_interrupts();
        assert!(!p.handling_interrupt());
    }

    /// `SIV 2 :h; SLEEP` with IRQ2 already pending: the processor wakes to
    /// service the handler, and because `sleep_mode` is sticky, RTN
    /// re-enters sleep rather than falling through.
    #[test]
    fn sleep_resumed_by_interrupt_then_re_entered() {
        let mut p = processor();
        p.execute(Opcode::Siv, &[2, 20], 0);
        p.execute(Opcode::Sleep, &[], 0);
        assert!(p.is_sleeping());

        p.ctx.control_bus.lock().set_interrupt(2);
        p.process_interrupts();
        assert!(!p.is_sleeping());
        assert!(p.handling_interrupt());

        p.execute(Opcode::Inc, &[5], 0);
        p.execute(Opcode::Rtn, &[], 0);
        assert!(p.is_sleeping());
        assert!(!p.handling_interrupt());
    }
}
