// The instruction set, straight out of spec.md's opcode table (mirrored
// from the reference's `get_instruction_code` dispatch in
// class_rubbish_compiler.py and the `match instruction:` in
// class_processor.py). A dense match is idiomatic here and the set is
// closed, so there's no dispatch-table indirection to maintain.

use crate::bus::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Nop,
    Lr,
    Lrm,
    Lrr,
    Mrm,
    Add,
    Sub,
    Mul,
    Div,
    Halt,
    Debug,
    Jmp,
    Rst,
    Cmp,
    Je,
    Jne,
    Jl,
    Jg,
    Push,
    Pop,
    Call,
    Rtn,
    Not,
    Or,
    And,
    Xor,
    Siv,
    Inc,
    Sleep,
    Wake,
    Dec,
    Int,
    Peek,
}

impl Opcode {
    pub fn code(self) -> Cell {
        match self {
            Opcode::Nop => 0,
            Opcode::Lr => 1,
            Opcode::Lrm => 2,
            Opcode::Lrr => 3,
            Opcode::Mrm => 4,
            Opcode::Add => 5,
            Opcode::Sub => 6,
            Opcode::Mul => 7,
            Opcode::Div => 8,
            Opcode::Halt => 9,
            Opcode::Debug => 10,
            Opcode::Jmp => 11,
            Opcode::Rst => 12,
            Opcode::Cmp => 13,
            Opcode::Je => 14,
            Opcode::Jne => 15,
            Opcode::Jl => 16,
            Opcode::Jg => 17,
            Opcode::Push => 18,
            Opcode::Pop => 19,
            Opcode::Call => 20,
            Opcode::Rtn => 21,
            Opcode::Not => 22,
            Opcode::Or => 23,
            Opcode::And => 24,
            Opcode::Xor => 25,
            Opcode::Siv => 26,
            Opcode::Inc => 27,
            Opcode::Sleep => 28,
            Opcode::Wake => 29,
            Opcode::Dec => 30,
            Opcode::Int => 31,
            Opcode::Peek => 34,
        }
    }

    pub fn from_cell(cell: Cell) -> Option<Opcode> {
        Some(match cell {
            0 => Opcode::Nop,
            1 => Opcode::Lr,
            2 => Opcode::Lrm,
            3 => Opcode::Lrr,
            4 => Opcode::Mrm,
            5 => Opcode::Add,
            6 => Opcode::Sub,
            7 => Opcode::Mul,
            8 => Opcode::Div,
            9 => Opcode::Halt,
            10 => Opcode::Debug,
            11 => Opcode::Jmp,
            12 => Opcode::Rst,
            13 => Opcode::Cmp,
            14 => Opcode::Je,
            15 => Opcode::Jne,
            16 => Opcode::Jl,
            17 => Opcode::Jg,
            18 => Opcode::Push,
            19 => Opcode::Pop,
            20 => Opcode::Call,
            21 => Opcode::Rtn,
            22 => Opcode::Not,
            23 => Opcode::Or,
            24 => Opcode::And,
            25 => Opcode::Xor,
            26 => Opcode::Siv,
            27 => Opcode::Inc,
            28 => Opcode::Sleep,
            29 => Opcode::Wake,
            30 => Opcode::Dec,
            31 => Opcode::Int,
            34 => Opcode::Peek,
            _ => return None,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Lr => "LR",
            Opcode::Lrm => "LRM",
            Opcode::Lrr => "LRR",
            Opcode::Mrm => "MRM",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Halt => "HALT",
            Opcode::Debug => "DEBUG",
            Opcode::Jmp => "JMP",
            Opcode::Rst => "RST",
            Opcode::Cmp => "CMP",
            Opcode::Je => "JE",
            Opcode::Jne => "JNE",
            Opcode::Jl => "JL",
            Opcode::Jg => "JG",
            Opcode::Push => "PUSH",
            Opcode::Pop => "POP",
            Opcode::Call => "CALL",
            Opcode::Rtn => "RTN",
            Opcode::Not => "NOT",
            Opcode::Or => "OR",
            Opcode::And => "AND",
            Opcode::Xor => "XOR",
            Opcode::Siv => "SIV",
            Opcode::Inc => "INC",
            Opcode::Sleep => "SLEEP",
            Opcode::Wake => "WAKE",
            Opcode::Dec => "DEC",
            Opcode::Int => "INT",
            Opcode::Peek => "PEEK",
        }
    }

    pub fn from_mnemonic(name: &str) -> Option<Opcode> {
        let upper = name.to_ascii_uppercase();
        Some(match upper.as_str() {
            "NOP" => Opcode::Nop,
            "LR" => Opcode::Lr,
            "LRM" => Opcode::Lrm,
            "LRR" => Opcode::Lrr,
            "MRM" => Opcode::Mrm,
            "ADD" => Opcode::Add,
            "SUB" => Opcode::Sub,
            "MUL" => Opcode::Mul,
            "DIV" => Opcode::Div,
            "HALT" => Opcode::Halt,
            "DEBUG" => Opcode::Debug,
            "JMP" => Opcode::Jmp,
            "RST" => Opcode::Rst,
            "CMP" => Opcode::Cmp,
            "JE" => Opcode::Je,
            "JNE" => Opcode::Jne,
            "JL" => Opcode::Jl,
            "JG" => Opcode::Jg,
            "PUSH" => Opcode::Push,
            "POP" => Opcode::Pop,
            "CALL" => Opcode::Call,
            "RTN" => Opcode::Rtn,
            "NOT" => Opcode::Not,
            "OR" => Opcode::Or,
            "AND" => Opcode::And,
            "XOR" => Opcode::Xor,
            "SIV" => Opcode::Siv,
            "INC" => Opcode::Inc,
            "SLEEP" => Opcode::Sleep,
            "WAKE" => Opcode::Wake,
            "DEC" => Opcode::Dec,
            "INT" => Opcode::Int,
            "PEEK" => Opcode::Peek,
            _ => return None,
        })
    }

    /// Number of operand cells following the opcode cell.
    pub fn operand_count(self) -> usize {
        match self {
            Opcode::Nop
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Halt
            | Opcode::Debug
            | Opcode::Rst
            | Opcode::Cmp
            | Opcode::Rtn
            | Opcode::Not
            | Opcode::Or
            | Opcode::And
            | Opcode::Xor
            | Opcode::Sleep
            | Opcode::Wake => 0,
            Opcode::Jmp
            | Opcode::Je
            | Opcode::Jne
            | Opcode::Jl
            | Opcode::Jg
            | Opcode::Push
            | Opcode::Pop
            | Opcode::Call
            | Opcode::Inc
            | Opcode::Dec
            | Opcode::Int
            | Opcode::Peek => 1,
            Opcode::Lr | Opcode::Lrm | Opcode::Lrr | Opcode::Mrm | Opcode::Siv => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_opcode_round_trips_through_its_numeric_code() {
        let all = [
            Opcode::Nop,
            Opcode::Lr,
            Opcode::Lrm,
            Opcode::Lrr,
            Opcode::Mrm,
            Opcode::Add,
            Opcode::Sub,
            Opcode::Mul,
            Opcode::Div,
            Opcode::Halt,
            Opcode::Debug,
            Opcode::Jmp,
            Opcode::Rst,
            Opcode::Cmp,
            Opcode::Je,
            Opcode::Jne,
            Opcode::Jl,
            Opcode::Jg,
            Opcode::Push,
            Opcode::Pop,
            Opcode::Call,
            Opcode::Rtn,
            Opcode::Not,
            Opcode::Or,
            Opcode::And,
            Opcode::Xor,
            Opcode::Siv,
            Opcode::Inc,
            Opcode::Sleep,
            Opcode::Wake,
            Opcode::Dec,
            Opcode::Int,
            Opcode::Peek,
        ];
        for op in all {
            assert_eq!(Opcode::from_cell(op.code()), Some(op));
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(op));
        }
    }

    #[test]
    fn peek_keeps_its_noncontiguous_code() {
        assert_eq!(Opcode::Peek.code(), 34);
        assert_eq!(Opcode::from_cell(32), None);
        assert_eq!(Opcode::from_cell(33), None);
    }
}
