//! Assembly statement parser. Walks the expanded source text and produces a
//! [`Program`] of labels, directives and instructions with spanned operands.

use miette::Result;

use crate::error;
use crate::isa::{Arg, Arguments, Instruction, InstrKind, ModeSet, OperandSpec, Reg, Word};
use crate::program::{Item, Operand, PendArg, PendArguments, Program, Stmt, StmtKind};
use crate::span::Span;

mod cursor;
use cursor::Cursor;

/// Parse one instruction starting at `at`, returning it together with the
/// position just past its last operand. Label operands are rejected here;
/// they only resolve during full-program assembly.
pub fn parse_instruction(src: &str, at: usize) -> Result<(Instruction, usize)> {
    let mut parser = AsmParser {
        cur: Cursor::at(src, at),
        prog: Program::new(),
    };
    parser.skip_space();
    let start = parser.cur.pos();
    let ident = parser.expect_ident("an instruction mnemonic")?;
    let span = parser.cur.span_from(start);
    let kind = InstrKind::from_mnemonic(ident)
        .ok_or_else(|| error::parse_unknown_instruction(span, src))?;
    let args = parser.parse_operands(kind)?;

    let concrete = |operand: Operand| -> Result<Arg> {
        match operand.arg {
            PendArg::Arg(arg) => Ok(arg),
            PendArg::Label(_) => Err(error::parse_expected(
                operand.span,
                src,
                "a concrete operand",
            )),
        }
    };
    let args = match args {
        PendArguments::None => Arguments::None,
        PendArguments::Unary(op) => Arguments::Unary(concrete(op)?),
        PendArguments::Binary(lhs, rhs) => Arguments::Binary(concrete(lhs)?, concrete(rhs)?),
    };
    // parse_operands already validated the modes
    let instr = Instruction::new(kind, args).expect("validated operands must construct");
    Ok((instr, parser.cur.pos()))
}

/// Transforms source text into a [`Program`].
pub struct AsmParser<'a> {
    cur: Cursor<'a>,
    prog: Program,
}

impl<'a> AsmParser<'a> {
    pub fn new(src: &'a str) -> Self {
        AsmParser {
            cur: Cursor::new(src),
            prog: Program::new(),
        }
    }

    fn src(&self) -> &'a str {
        self.cur.src()
    }

    /// Parse the whole source into statements and label definitions.
    pub fn parse(mut self) -> Result<Program> {
        loop {
            self.skip_trivia();
            if self.cur.is_eof() {
                break;
            }
            self.parse_item()?;
        }
        Ok(self.prog)
    }

    /// Spaces and tabs only
    fn skip_space(&mut self) {
        self.cur.take_while(|c| c == ' ' || c == '\t' || c == '\r');
    }

    /// Whitespace of any kind plus line comments
    fn skip_trivia(&mut self) {
        loop {
            self.cur.take_while(char::is_whitespace);
            if self.cur.first() == '/' && self.cur.second() == '/' {
                self.cur.take_while(|c| c != '\n');
            } else {
                break;
            }
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<&'a str> {
        if self.cur.is_eof() {
            return Err(error::parse_eof(self.src()));
        }
        let start = self.cur.pos();
        if !is_ident_start(self.cur.first()) {
            let span = Span::at(start, 1.min(self.src().len() - start));
            return Err(error::parse_expected(span, self.src(), expected));
        }
        Ok(self.cur.take_while(is_ident_char))
    }

    /// A statement must be followed by a line break or the end of the file,
    /// allowing a trailing comment.
    fn end_statement(&mut self) -> Result<()> {
        self.skip_space();
        if self.cur.first() == '/' && self.cur.second() == '/' {
            self.cur.take_while(|c| c != '\n');
        }
        if self.cur.is_eof() || self.cur.first() == '\n' {
            Ok(())
        } else {
            let span = Span::at(self.cur.pos(), 1);
            Err(error::parse_expected(span, self.src(), "end of statement"))
        }
    }

    fn parse_item(&mut self) -> Result<()> {
        let start = self.cur.pos();
        if self.cur.first() == '.' {
            return self.parse_directive();
        }

        let ident = self.expect_ident("a label, directive or instruction")?;
        let span = self.cur.span_from(start);
        if self.cur.eat(':') {
            self.prog.push(Item::Label {
                name: ident.to_string(),
                span,
            });
            return Ok(());
        }

        let kind = InstrKind::from_mnemonic(ident)
            .ok_or_else(|| error::parse_unknown_instruction(span, self.src()))?;
        let args = self.parse_operands(kind)?;
        let span = self.cur.span_from(start);
        self.end_statement()?;
        self.prog.push(Item::Stmt(Stmt {
            kind: StmtKind::Instr { kind, args },
            span,
        }));
        Ok(())
    }

    fn parse_operands(&mut self, kind: InstrKind) -> Result<PendArguments> {
        match kind.operand_spec() {
            OperandSpec::None => Ok(PendArguments::None),
            OperandSpec::Unary(modes) => {
                self.skip_space();
                let operand = self.parse_operand(kind, modes)?;
                Ok(PendArguments::Unary(operand))
            }
            OperandSpec::Binary(lhs_modes, rhs_modes) => {
                self.skip_space();
                let lhs = self.parse_operand(kind, lhs_modes)?;
                self.skip_space();
                if !self.cur.eat(',') {
                    let span = Span::at(self.cur.pos(), 1);
                    return Err(error::parse_expected(
                        span,
                        self.src(),
                        "`,` between operands",
                    ));
                }
                self.skip_space();
                let rhs = self.parse_operand(kind, rhs_modes)?;
                Ok(PendArguments::Binary(lhs, rhs))
            }
        }
    }

    /// One operand in any addressing mode, checked against the modes the
    /// instruction accepts at this position. Bare identifiers become label
    /// references and are checked after resolution instead.
    fn parse_operand(&mut self, kind: InstrKind, modes: ModeSet) -> Result<Operand> {
        let start = self.cur.pos();
        let arg = match self.cur.first() {
            '%' => {
                let reg = self.parse_register()?;
                PendArg::Arg(Arg::Reg(reg))
            }
            '[' => PendArg::Arg(self.parse_bracket()?),
            c if c == '-' || c.is_ascii_digit() => {
                let (value, _) = self.parse_literal()?;
                PendArg::Arg(Arg::Imm(value))
            }
            c if is_ident_start(c) => {
                let ident = self.cur.take_while(is_ident_char);
                PendArg::Label(ident.to_string())
            }
            _ if self.cur.is_eof() => return Err(error::parse_eof(self.src())),
            _ => {
                let span = Span::at(start, 1);
                return Err(error::parse_expected(span, self.src(), "an operand"));
            }
        };
        let span = self.cur.span_from(start);
        if let PendArg::Arg(arg) = &arg {
            if !modes.contains(arg.kind()) {
                return Err(error::parse_operand_not_allowed(
                    span,
                    self.src(),
                    kind.mnemonic(),
                ));
            }
        }
        Ok(Operand { arg, span })
    }

    fn parse_register(&mut self) -> Result<Reg> {
        let start = self.cur.pos();
        self.cur.bump(); // %
        self.cur.take_while(is_ident_char);
        let span = self.cur.span_from(start);
        let name = &self.src()[start + 1..self.cur.pos()];
        Reg::from_name(name).ok_or_else(|| error::parse_unknown_register(span, self.src()))
    }

    /// `[N]`, `[%reg]`, `[%reg + K]` or `[%reg - K]`
    fn parse_bracket(&mut self) -> Result<Arg> {
        let start = self.cur.pos();
        self.cur.bump(); // [
        self.skip_space();

        let arg = if self.cur.first() == '%' {
            let reg = self.parse_register()?;
            self.skip_space();
            match self.cur.first() {
                ']' => Arg::Indirect(reg),
                sign @ ('+' | '-') => {
                    self.cur.bump();
                    self.skip_space();
                    let (value, _) = self.parse_literal()?;
                    let offs = match sign {
                        '+' => value as i32,
                        _ => (value as i32).wrapping_neg(),
                    };
                    Arg::Idx(reg, offs)
                }
                _ => {
                    let span = Span::at(self.cur.pos(), 1);
                    return Err(error::parse_expected(
                        span,
                        self.src(),
                        "`]`, `+` or `-` after the register",
                    ));
                }
            }
        } else {
            let (addr, _) = self.parse_literal()?;
            Arg::Direct(addr)
        };

        self.skip_space();
        if !self.cur.eat(']') {
            let span = self.cur.span_from(start);
            return Err(error::parse_expected(span, self.src(), "a closing `]`"));
        }
        Ok(arg)
    }

    /// Decimal (optionally negative), `0x` hex or `0b` binary. Hex and
    /// binary are bit patterns filling the 32-bit word verbatim.
    fn parse_literal(&mut self) -> Result<(Word, Span)> {
        let start = self.cur.pos();
        let src = self.src();

        if self.cur.first() == '0' && (self.cur.second() == 'x' || self.cur.second() == 'b') {
            let radix = if self.cur.second() == 'x' { 16 } else { 2 };
            self.cur.bump();
            self.cur.bump();
            let digits = self.cur.take_while(|c| c.is_ascii_alphanumeric());
            let span = self.cur.span_from(start);
            let value = (!digits.is_empty())
                .then(|| Word::from_str_radix(digits, radix).ok())
                .flatten()
                .ok_or_else(|| error::parse_bad_literal(span, src))?;
            return Ok((value, span));
        }

        let negative = self.cur.eat('-');
        let digits = self.cur.take_while(|c| c.is_ascii_digit());
        let span = self.cur.span_from(start);
        if digits.is_empty() {
            return Err(error::parse_bad_literal(span, src));
        }
        let mut value: i128 = digits
            .parse()
            .map_err(|_| error::parse_bad_literal(span, src))?;
        if negative {
            value = -value;
        }
        if value < i32::MIN as i128 || value > u32::MAX as i128 {
            return Err(error::parse_bad_literal(span, src));
        }
        let word = if negative {
            value as i32 as Word
        } else {
            value as Word
        };
        Ok((word, span))
    }

    /// String literal with `\" \n \r \t \0` escapes
    fn parse_string(&mut self) -> Result<String> {
        let start = self.cur.pos();
        self.cur.bump(); // "
        let mut result = String::new();
        loop {
            match self.cur.bump() {
                None | Some('\n') => {
                    return Err(error::parse_unclosed_str(
                        self.cur.span_from(start),
                        self.src(),
                    ))
                }
                Some('"') => break,
                Some('\\') => {
                    let escape_start = self.cur.pos() - 1;
                    let unescaped = match self.cur.bump() {
                        Some('"') => '"',
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some('0') => '\0',
                        _ => {
                            return Err(error::parse_bad_escape(
                                self.cur.span_from(escape_start),
                                self.src(),
                            ))
                        }
                    };
                    result.push(unescaped);
                }
                Some(c) => result.push(c),
            }
        }
        Ok(result)
    }

    /// `.word N`, `.addr N`, `.space N` or `.string "…"`
    fn parse_directive(&mut self) -> Result<()> {
        let start = self.cur.pos();
        self.cur.bump(); // .
        let name = self.cur.take_while(is_ident_char);
        let span = self.cur.span_from(start);
        self.skip_space();

        let kind = match name {
            "word" => StmtKind::Word(self.parse_literal()?.0),
            "addr" => StmtKind::Addr(self.parse_literal()?.0),
            "space" => StmtKind::Space(self.parse_literal()?.0),
            "string" => {
                if self.cur.first() != '"' {
                    let span = Span::at(self.cur.pos(), 1);
                    return Err(error::parse_expected(span, self.src(), "a string literal"));
                }
                StmtKind::Str(self.parse_string()?)
            }
            _ => {
                return Err(error::parse_expected(
                    span,
                    self.src(),
                    "a directive (.word, .addr, .space or .string)",
                ))
            }
        };
        let span = self.cur.span_from(start);
        self.end_statement()?;
        self.prog.push(Item::Stmt(Stmt { kind, span }));
        Ok(())
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::program::Item;

    fn parse(src: &str) -> Result<Program> {
        AsmParser::new(src).parse()
    }

    fn first_stmt(prog: &Program) -> &StmtKind {
        prog.items()
            .iter()
            .find_map(|item| match item {
                Item::Stmt(stmt) => Some(&stmt.kind),
                _ => None,
            })
            .expect("no statement parsed")
    }

    #[test]
    fn parse_add_basic() {
        let prog = parse("add 3, %a").unwrap();
        match first_stmt(&prog) {
            StmtKind::Instr { kind, args } => {
                assert_eq!(*kind, InstrKind::Add);
                match args {
                    PendArguments::Binary(lhs, rhs) => {
                        assert_eq!(lhs.arg, PendArg::Arg(Arg::Imm(3)));
                        assert_eq!(rhs.arg, PendArg::Arg(Arg::Reg(Reg::A)));
                    }
                    _ => panic!("expected binary arguments"),
                }
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn parse_negative_and_bit_pattern_literals() {
        let prog = parse("push -2").unwrap();
        match first_stmt(&prog) {
            StmtKind::Instr { args, .. } => match args {
                PendArguments::Unary(op) => {
                    assert_eq!(op.arg, PendArg::Arg(Arg::Imm(0xFFFF_FFFE)))
                }
                _ => panic!(),
            },
            _ => panic!(),
        }

        let prog = parse("push 0xFFFFFFFF").unwrap();
        match first_stmt(&prog) {
            StmtKind::Instr { args, .. } => match args {
                PendArguments::Unary(op) => {
                    assert_eq!(op.arg, PendArg::Arg(Arg::Imm(0xFFFF_FFFF)))
                }
                _ => panic!(),
            },
            _ => panic!(),
        }

        let prog = parse("push 0b1010").unwrap();
        match first_stmt(&prog) {
            StmtKind::Instr { args, .. } => match args {
                PendArguments::Unary(op) => assert_eq!(op.arg, PendArg::Arg(Arg::Imm(10))),
                _ => panic!(),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn parse_all_addressing_modes() {
        let prog = parse("ld [100], %a\nld [%b], %a\nld [%sp + 4], %a\nld [%sp - 4], %b").unwrap();
        let stmts: Vec<_> = prog
            .items()
            .iter()
            .filter_map(|item| match item {
                Item::Stmt(stmt) => Some(&stmt.kind),
                _ => None,
            })
            .collect();
        let args: Vec<_> = stmts
            .iter()
            .map(|kind| match kind {
                StmtKind::Instr {
                    args: PendArguments::Binary(lhs, _),
                    ..
                } => lhs.arg.clone(),
                _ => panic!(),
            })
            .collect();
        assert_eq!(args[0], PendArg::Arg(Arg::Direct(100)));
        assert_eq!(args[1], PendArg::Arg(Arg::Indirect(Reg::B)));
        assert_eq!(args[2], PendArg::Arg(Arg::Idx(Reg::Sp, 4)));
        assert_eq!(args[3], PendArg::Arg(Arg::Idx(Reg::Sp, -4)));
    }

    #[test]
    fn parse_label_definition_and_reference() {
        let prog = parse("main:\n    jmp main\n").unwrap();
        assert_eq!(prog.len(), 2);
        match &prog.items()[0] {
            Item::Label { name, .. } => assert_eq!(name, "main"),
            _ => panic!("expected label"),
        }
        match first_stmt(&prog) {
            StmtKind::Instr { args, .. } => match args {
                PendArguments::Unary(op) => {
                    assert_eq!(op.arg, PendArg::Label("main".to_string()))
                }
                _ => panic!(),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn parse_directives() {
        let prog = parse(".addr 500\n.word 7\n.space 3\n.string \"hi\\n\"").unwrap();
        let kinds: Vec<_> = prog
            .items()
            .iter()
            .map(|item| match item {
                Item::Stmt(stmt) => stmt.kind.clone(),
                _ => panic!(),
            })
            .collect();
        assert_eq!(kinds[0], StmtKind::Addr(500));
        assert_eq!(kinds[1], StmtKind::Word(7));
        assert_eq!(kinds[2], StmtKind::Space(3));
        assert_eq!(kinds[3], StmtKind::Str("hi\n".to_string()));
    }

    #[test]
    fn parse_comments_and_blank_lines() {
        let prog = parse("// leading comment\n\nnop // trailing\n\n  reset\n").unwrap();
        assert_eq!(prog.len(), 2);
    }

    #[test]
    fn operand_mode_is_checked_at_parse_time() {
        // not takes a register only
        assert!(parse("not 3").is_err());
        // fas lhs must name memory
        assert!(parse("fas 3, %a").is_err());
        // push accepts no memory operand
        assert!(parse("push [100]").is_err());
        // st rhs must name memory
        assert!(parse("st %a, %b").is_err());
    }

    #[test]
    fn unknown_names_are_errors() {
        assert!(parse("frob %a").is_err());
        assert!(parse("add 3, %x").is_err());
        assert!(parse(".weird 3").is_err());
    }

    #[test]
    fn malformed_literals_are_errors() {
        assert!(parse("push 4294967296").is_err());
        assert!(parse("push -2147483649").is_err());
        assert!(parse("push 0x").is_err());
        assert!(parse("push 0x1G2").is_err());
        assert!(parse("push 99999999999999999999999999").is_err());
    }

    #[test]
    fn string_escape_errors() {
        assert!(parse(".string \"unterminated").is_err());
        assert!(parse(".string \"bad \\q escape\"").is_err());
        assert!(parse(".string \"ok \\\" \\n \\r \\t \\0\"").is_ok());
    }

    #[test]
    fn missing_separator_is_an_error() {
        assert!(parse("add 3 %a").is_err());
        assert!(parse("nop nop").is_err());
    }

    #[test]
    fn single_statement_parse_advances() {
        let src = "add 3, %a\nsub 1, %b";
        let (instr, next) = parse_instruction(src, 0).unwrap();
        assert_eq!(instr.to_string(), "add 3, %a");
        assert_eq!(&src[..next], "add 3, %a");

        let (instr, next) = parse_instruction(src, 10).unwrap();
        assert_eq!(instr.to_string(), "sub 1, %b");
        assert_eq!(next, src.len());
    }

    #[test]
    fn single_statement_rejects_labels() {
        assert!(parse_instruction("jmp somewhere", 0).is_err());
    }

    #[test]
    fn formatting_round_trips() {
        let canonical = [
            "add 3, %a",
            "sub 1, %b",
            "ld [%sp - 4], %a",
            "st %a, [200]",
            "jmp 500",
            "push -1",
            "nop",
        ];
        for text in canonical {
            let (instr, _) = parse_instruction(text, 0).unwrap();
            assert_eq!(instr.to_string(), text);
        }
    }
}
