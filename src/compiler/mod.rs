// Two-pass assembler. Grounded on class_rubbish_compiler.py's
// `RubbishCompiler`: `read_file` recursively inlines `include <path>`
// lines, pass 1 walks the flattened source to resolve labels against a
// running cell count, and pass 2 re-walks it to emit the opcode/operand
// cell stream. Cycle protection on `include` is a supplemental robustness
// feature the Python original lacks (documented in DESIGN.md).

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::bus::Cell;
use crate::error::CompileError;
use crate::processor::opcode::Opcode;

const REGISTER_INDIRECT_MARKER: char = '@';

/// Reads `path`, recursively inlining `include <path>` lines in place.
/// Inclusion is relative to the including file's directory, matching
/// `read_file`'s behavior in the reference.
pub fn read_file(path: &Path) -> Result<Vec<String>, CompileError> {
    let mut visited = HashSet::new();
    read_file_inner(path, &mut visited)
}

fn read_file_inner(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<Vec<String>, CompileError> {
    let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical.clone()) {
        return Err(CompileError::IncludeCycle { path: path.display().to_string() });
    }
    let text = fs::read_to_string(path)?;
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let mut lines = Vec::new();
    for raw_line in text.lines() {
        if let Some(included) = raw_line.strip_prefix("include ") {
            let included_path = directory.join(included.trim());
            lines.extend(read_file_inner(&included_path, visited)?);
        } else {
            lines.push(raw_line.to_string());
        }
    }
    visited.remove(&canonical);
    Ok(lines)
}

/// Substitutes the four escapes the reference's `DATA` directive supports.
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('r') => {
                    out.push('\r');
                    chars.next();
                }
                Some('n') => {
                    out.push('\n');
                    chars.next();
                }
                Some('0') => {
                    out.push('\0');
                    chars.next();
                }
                Some('f') => {
                    out.push('\u{c}');
                    chars.next();
                }
                _ => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn is_comment_or_blank(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('\'') || trimmed.starts_with('#')
}

/// Splits a possible `LABEL:` prefix off the front of a line, returning the
/// label name (if any) and the remainder of the line to process normally.
fn split_label<'a>(line: &'a str) -> (Option<&'a str>, &'a str) {
    let trimmed = line.trim_start();
    if let Some(colon) = trimmed.find(':') {
        let candidate = &trimmed[..colon];
        if !candidate.is_empty() && candidate.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return (Some(candidate), trimmed[colon + 1..].trim_start());
        }
    }
    (None, trimmed)
}

/// Number of cells a non-label instruction body emits, without resolving
/// label references (pass 1 only needs the length).
fn instruction_length(rest: &str) -> Result<usize, CompileError> {
    if is_comment_or_blank(rest) {
        return Ok(0);
    }
    let mut tokens = rest.split_whitespace();
    let mnemonic = tokens.next().unwrap_or("");
    if mnemonic.eq_ignore_ascii_case("DATA") {
        let text = rest.splitn(2, char::is_whitespace).nth(1).unwrap_or("");
        return Ok(unescape(text).chars().count());
    }
    if mnemonic.eq_ignore_ascii_case("CMP") {
        return Ok(0);
    }
    match Opcode::from_mnemonic(mnemonic) {
        Some(op) => Ok(1 + op.operand_count()),
        None => Err(CompileError::UnknownInstruction { name: mnemonic.to_string(), line: 0 }),
    }
}

/// Pass 1: resolves every `LABEL:` to its cell address.
fn resolve_labels(lines: &[String], base_address: Cell) -> Result<HashMap<String, Cell>, CompileError> {
    let mut labels = HashMap::new();
    let mut length: Cell = 0;
    for (line_no, line) in lines.iter().enumerate() {
        let (label, rest) = split_label(line);
        if let Some(name) = label {
            labels.insert(name.to_string(), base_address + length);
        }
        length += instruction_length(rest).map_err(|e| retag_line(e, line_no + 1))? as Cell;
    }
    Ok(labels)
}

fn retag_line(err: CompileError, line: usize) -> CompileError {
    match err {
        CompileError::UnknownInstruction { name, .. } => CompileError::UnknownInstruction { name, line },
        other => other,
    }
}

/// Resolves one operand token to its runtime cell value: a register-indirect
/// marker (`@k` -> `-k`), a label, or a plain integer literal.
fn resolve_operand(token: &str, labels: &HashMap<String, Cell>, line: usize) -> Result<Cell, CompileError> {
    if let Some(register) = token.strip_prefix(REGISTER_INDIRECT_MARKER) {
        let k: Cell = register
            .parse()
            .map_err(|_| CompileError::UnknownLabel { name: token.to_string(), line })?;
        return Ok(-k);
    }
    let bare = token.strip_prefix(':').unwrap_or(token);
    if let Ok(value) = bare.parse::<Cell>() {
        return Ok(value);
    }
    labels
        .get(bare)
        .copied()
        .ok_or_else(|| CompileError::UnknownLabel { name: bare.to_string(), line })
}

/// Pass 2: re-walks the source, emitting opcode/operand cells.
fn emit(lines: &[String], labels: &HashMap<String, Cell>) -> Result<Vec<Cell>, CompileError> {
    let mut cells = Vec::new();
    for (line_no, line) in lines.iter().enumerate() {
        let line_number = line_no + 1;
        let (_, rest) = split_label(line);
        if is_comment_or_blank(rest) {
            continue;
        }
        let mut tokens = rest.split_whitespace();
        let mnemonic = tokens.next().unwrap_or("");
        if mnemonic.eq_ignore_ascii_case("CMP") {
            continue;
        }
        if mnemonic.eq_ignore_ascii_case("DATA") {
            let text = rest.splitn(2, char::is_whitespace).nth(1).unwrap_or("");
            cells.extend(unescape(text).chars().map(|c| c as Cell));
            continue;
        }
        let opcode = Opcode::from_mnemonic(mnemonic)
            .ok_or_else(|| CompileError::UnknownInstruction { name: mnemonic.to_string(), line: line_number })?;
        cells.push(opcode.code());
        for token in tokens {
            cells.push(resolve_operand(token, labels, line_number)?);
        }
    }
    Ok(cells)
}

/// Compiles `path` into a flat cell stream starting at `base_address`.
pub fn compile(path: &Path, base_address: Cell) -> Result<Vec<Cell>, CompileError> {
    let lines = read_file(path)?;
    let labels = resolve_labels(&lines, base_address)?;
    emit(&lines, &labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_source(source: &str, base_address: Cell) -> Result<Vec<Cell>, CompileError> {
        let lines: Vec<String> = source.lines().map(str::to_string).collect();
        let labels = resolve_labels(&lines, base_address)?;
        emit(&lines, &labels)
    }

    #[test]
    fn sum_of_one_and_two() {
        let cells = compile_source("LR 1 1\nLR 2 2\nADD\nHALT\n", 0).unwrap();
        assert_eq!(cells, vec![1, 1, 1, 1, 2, 2, 5, 9]);
    }

    #[test]
    fn loop_counting_to_five_resolves_forward_and_backward_labels() {
        let source = "LR 1 0\nLR 2 5\nloop: INC 1\nCMP\nJL :loop\nHALT\n";
        let cells = compile_source(source, 0).unwrap();
        // INC 1 is at cell index 6 (two LR's = 6 cells); JL should target it.
        assert_eq!(cells[cells.len() - 3], Opcode::Jl.code());
        assert_eq!(cells[cells.len() - 2], 6);
    }

    #[test]
    fn register_indirect_marker_becomes_negative_cell() {
        let cells = compile_source("MRM 1 @2\n", 0).unwrap();
        assert_eq!(cells, vec![Opcode::Mrm.code(), 1, -2]);
    }

    #[test]
    fn data_directive_emits_unescaped_characters() {
        let cells = compile_source("DATA Hi\\n", 0).unwrap();
        assert_eq!(cells, vec!['H' as Cell, 'i' as Cell, '\n' as Cell]);
    }

    #[test]
    fn unknown_mnemonic_fails_with_line_number() {
        let err = compile_source("BOGUS 1 2\n", 0).unwrap_err();
        match err {
            CompileError::UnknownInstruction { name, line } => {
                assert_eq!(name, "BOGUS");
                assert_eq!(line, 1);
            }
            other => panic!("expected UnknownInstruction, got {other:?}"),
        }
    }

    #[test]
    fn label_order_does_not_affect_output() {
        // Same program, two label-declaration orders: a forward reference
        // (`loop:` declared after its first use) and a backward reference
        // (`start:` declared before its use). Both compile to the identical
        // cell stream (spec.md §8 invariant 7).
        let forward_reference = compile_source("JMP :loop\nNOP\nloop: HALT\n", 0).unwrap();
        let backward_reference = compile_source("start: NOP\nJMP :start\n", 0).unwrap();
        assert_eq!(forward_reference, vec![Opcode::Jmp.code(), 2, Opcode::Nop.code(), Opcode::Halt.code()]);
        assert_eq!(backward_reference, vec![Opcode::Nop.code(), Opcode::Jmp.code(), 0]);
    }
}
