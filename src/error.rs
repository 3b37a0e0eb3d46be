// Error taxonomy for the assembler and the running machine.
// Assembler errors abort compilation before the backplane ever runs;
// runtime faults are logged and resolved into a HALT interrupt instead
// of unwinding the host process (see processor::Processor::halt_on_fault).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("line {line}: unknown instruction '{name}'")]
    UnknownInstruction { name: String, line: usize },

    #[error("line {line}: unknown label '{name}'")]
    UnknownLabel { name: String, line: usize },

    #[error("include cycle detected at '{path}'")]
    IncludeCycle { path: String },

    #[error("program of {compiled} cells exceeds RAM size {capacity}")]
    CapacityExceeded { compiled: usize, capacity: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFault {
    #[error("unknown opcode {opcode} at ip={ip}")]
    UnknownOpcode { opcode: i64, ip: i64 },

    #[error("stack underflow at ip={ip}")]
    StackUnderflow { ip: i64 },

    #[error("division by zero at ip={ip}")]
    ArithmeticFault { ip: i64 },

    #[error("invalid interrupt number {number} at ip={ip}")]
    InvalidInterruptNumber { number: i64, ip: i64 },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("the {device} device requires '{key}' to be specified")]
    MissingParameter { device: &'static str, key: &'static str },

    #[error(transparent)]
    Compile(#[from] CompileError),
}
