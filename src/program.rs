//! Parsed program representation: statements in source order with label
//! definitions, resolved into a sparse memory image.

use fxhash::FxHashMap;
use miette::Result;

use crate::error;
use crate::isa::{Arg, Arguments, Instruction, InstrKind, OperandSpec, Word};
use crate::runtime::MEMORY_SIZE;
use crate::span::Span;

/// Operand as parsed; label references are resolved during layout.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum PendArg {
    Arg(Arg),
    Label(String),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Operand {
    pub arg: PendArg,
    pub span: Span,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum PendArguments {
    None,
    Unary(Operand),
    Binary(Operand, Operand),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum StmtKind {
    Instr { kind: InstrKind, args: PendArguments },
    /// `.word N`
    Word(Word),
    /// `.addr N`, moves the location counter
    Addr(Word),
    /// `.space N`, reserves N zeroed words
    Space(Word),
    /// `.string "..."`, one word per character
    Str(String),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

/// A statement or a label definition, in source order.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Item {
    Label { name: String, span: Span },
    Stmt(Stmt),
}

/// Sparse image of assembled memory cells.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Image {
    cells: Vec<(Word, Word)>,
}

impl Image {
    pub fn cells(&self) -> &[(Word, Word)] {
        &self.cells
    }

    fn push(&mut self, addr: u64, value: Word, span: Span, src: &str) -> Result<()> {
        if addr >= MEMORY_SIZE as u64 {
            return Err(error::asm_out_of_memory(span, src, addr));
        }
        self.cells.push((addr as Word, value));
        Ok(())
    }
}

/// Program as produced by [`crate::parser::AsmParser`].
#[derive(Debug, Default)]
pub struct Program {
    items: Vec<Item>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of memory words a statement occupies.
    fn size(stmt: &StmtKind) -> u64 {
        match stmt {
            StmtKind::Instr { .. } => 2,
            StmtKind::Word(_) => 1,
            StmtKind::Addr(_) => 0,
            StmtKind::Space(words) => *words as u64,
            StmtKind::Str(text) => text.chars().count() as u64,
        }
    }

    /// Address of every label, walking the layout once. Errors on duplicates.
    fn label_addresses(&self, src: &str) -> Result<FxHashMap<String, Word>> {
        let mut labels = FxHashMap::default();
        let mut counter: u64 = 0;
        for item in &self.items {
            match item {
                Item::Label { name, span } => {
                    if labels.insert(name.clone(), counter as Word).is_some() {
                        return Err(error::asm_duplicate_label(*span, src));
                    }
                }
                Item::Stmt(stmt) => {
                    if let StmtKind::Addr(addr) = stmt.kind {
                        counter = addr as u64;
                    } else {
                        counter += Self::size(&stmt.kind);
                    }
                }
            }
        }
        Ok(labels)
    }

    /// Resolve labels, validate addressing modes, encode and lay out every
    /// statement into a sparse image.
    pub fn assemble(&self, src: &str) -> Result<Image> {
        let labels = self.label_addresses(src)?;
        let mut image = Image::default();
        let mut counter: u64 = 0;

        for item in &self.items {
            let stmt = match item {
                Item::Label { .. } => continue,
                Item::Stmt(stmt) => stmt,
            };
            match &stmt.kind {
                StmtKind::Addr(addr) => {
                    counter = *addr as u64;
                    continue;
                }
                StmtKind::Word(value) => image.push(counter, *value, stmt.span, src)?,
                StmtKind::Space(words) => {
                    for i in 0..*words as u64 {
                        image.push(counter + i, 0, stmt.span, src)?;
                    }
                }
                StmtKind::Str(text) => {
                    for (i, c) in text.chars().enumerate() {
                        image.push(counter + i as u64, c as Word, stmt.span, src)?;
                    }
                }
                StmtKind::Instr { kind, args } => {
                    let instr = resolve(*kind, args, &labels, src)?;
                    let raw = instr
                        .encode()
                        .ok_or_else(|| error::asm_unencodable(stmt.span, src))?;
                    image.push(counter, (raw >> 32) as Word, stmt.span, src)?;
                    image.push(counter + 1, raw as Word, stmt.span, src)?;
                }
            }
            counter += Self::size(&stmt.kind);
        }
        Ok(image)
    }
}

/// Fill label references with their addresses and check the result against
/// the instruction's declared modes.
fn resolve(
    kind: InstrKind,
    args: &PendArguments,
    labels: &FxHashMap<String, Word>,
    src: &str,
) -> Result<Instruction> {
    let fill = |operand: &Operand, modes: crate::isa::ModeSet| -> Result<Arg> {
        let arg = match &operand.arg {
            PendArg::Arg(arg) => *arg,
            PendArg::Label(name) => {
                let addr = labels
                    .get(name)
                    .ok_or_else(|| error::asm_unknown_label(operand.span, src, name))?;
                Arg::Imm(*addr)
            }
        };
        if !modes.contains(arg.kind()) {
            return Err(error::parse_operand_not_allowed(
                operand.span,
                src,
                kind.mnemonic(),
            ));
        }
        Ok(arg)
    };

    let args = match (kind.operand_spec(), args) {
        (OperandSpec::None, PendArguments::None) => Arguments::None,
        (OperandSpec::Unary(modes), PendArguments::Unary(op)) => {
            Arguments::Unary(fill(op, modes)?)
        }
        (OperandSpec::Binary(lhs, rhs), PendArguments::Binary(a, b)) => {
            Arguments::Binary(fill(a, lhs)?, fill(b, rhs)?)
        }
        _ => unreachable!("parser produced arguments of the wrong arity"),
    };
    // Modes were just validated against the same spec
    Ok(Instruction::new(kind, args).expect("validated operands must construct"))
}
