use miette::{miette, LabeledSpan, Report, Severity};

use crate::span::Span;

fn with_src(report: Report, src: &str) -> Report {
    report.with_source_code(src.to_string())
}

// Preprocessor errors

pub fn preproc_unknown_dir(span: Span, src: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "preproc::dir",
            help = "supported directives are #include, #define, #if, #elseif, #else and #endif.",
            labels = vec![LabeledSpan::at(span, "unknown directive")],
            "Encountered an unknown preprocessor directive.",
        ),
        src,
    )
}

pub fn preproc_missing_close(span: Span, src: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "preproc::include",
            help = "include paths are written as #include <path>.",
            labels = vec![LabeledSpan::at(span, "missing `>`")],
            "Unterminated include path.",
        ),
        src,
    )
}

pub fn preproc_bad_define_value(span: Span, src: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "preproc::define",
            help = "a define value is either a decimal number or a \"string\" literal.",
            labels = vec![LabeledSpan::at(span, "invalid value")],
            "Invalid #define value.",
        ),
        src,
    )
}

pub fn preproc_duplicate_define(span: Span, src: &str, name: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "preproc::define",
            help = "a symbol may only be defined once per program.",
            labels = vec![LabeledSpan::at(span, "redefinition")],
            "Symbol `{name}` is already defined.",
        ),
        src,
    )
}

pub fn preproc_bad_condition(span: Span, src: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "preproc::cond",
            help = "conditions are written as defined(NAME) or notdefined(NAME).",
            labels = vec![LabeledSpan::at(span, "invalid condition")],
            "Invalid conditional expression.",
        ),
        src,
    )
}

pub fn preproc_dangling(span: Span, src: &str, directive: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "preproc::cond",
            help = "conditional branches must follow an open #if.",
            labels = vec![LabeledSpan::at(span, "no matching #if")],
            "Found `{directive}` without a matching #if.",
        ),
        src,
    )
}

pub fn preproc_branch_after_else(span: Span, src: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "preproc::cond",
            help = "#else must be the final branch of a conditional.",
            labels = vec![LabeledSpan::at(span, "branch after #else")],
            "Conditional branch after #else.",
        ),
        src,
    )
}

pub fn preproc_unclosed_if(span: Span, src: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "preproc::cond",
            help = "close every #if with #endif.",
            labels = vec![LabeledSpan::at(span, "unclosed #if")],
            "Found #if without a matching #endif.",
        ),
        src,
    )
}

pub fn preproc_include_cycle(span: Span, src: &str, path: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "preproc::include",
            help = "a file cannot include itself, directly or through other files.",
            labels = vec![LabeledSpan::at(span, "recursive include")],
            "Including `{path}` again while it is still being expanded.",
        ),
        src,
    )
}

// Assembly parser errors

pub fn parse_unknown_instruction(span: Span, src: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "parse::instr",
            help = "check the instruction list in the documentation.",
            labels = vec![LabeledSpan::at(span, "unknown mnemonic")],
            "Encountered an unknown instruction.",
        ),
        src,
    )
}

pub fn parse_unknown_register(span: Span, src: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "parse::reg",
            help = "available registers are %a, %b, %pc, %sp and %sr.",
            labels = vec![LabeledSpan::at(span, "unknown register")],
            "Encountered an unknown register name.",
        ),
        src,
    )
}

pub fn parse_bad_literal(span: Span, src: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "parse::lit",
            help = "literals are decimal (optionally negative), 0x hex or 0b binary, and must fit in 32 bits.",
            labels = vec![LabeledSpan::at(span, "invalid literal")],
            "Encountered an invalid numeric literal.",
        ),
        src,
    )
}

pub fn parse_unclosed_str(span: Span, src: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "parse::str_lit",
            help = "make sure to close string literals with a \" character.",
            labels = vec![LabeledSpan::at(span, "unterminated literal")],
            "Encountered an unterminated string literal.",
        ),
        src,
    )
}

pub fn parse_bad_escape(span: Span, src: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "parse::str_lit",
            help = r#"supported escapes are \" \n \r \t and \0."#,
            labels = vec![LabeledSpan::at(span, "invalid escape")],
            "Encountered an invalid escape sequence.",
        ),
        src,
    )
}

pub fn parse_operand_not_allowed(span: Span, src: &str, mnemonic: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "parse::operand",
            help = "check the addressing modes accepted by this instruction.",
            labels = vec![LabeledSpan::at(span, "operand not allowed")],
            "Operand not allowed for `{mnemonic}`.",
        ),
        src,
    )
}

pub fn parse_expected(span: Span, src: &str, expected: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "parse::unexpected_token",
            help = "check the syntax of the current statement.",
            labels = vec![LabeledSpan::at(span, "unexpected token")],
            "Expected {expected}.",
        ),
        src,
    )
}

pub fn parse_eof(src: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "parse::unexpected_eof",
            help = "you may be missing operands in your last statement",
            labels = vec![LabeledSpan::at_offset(src.len().saturating_sub(1), "unexpected end")],
            "Unexpected end of file",
        ),
        src,
    )
}

// Assembly layout errors

pub fn asm_duplicate_label(span: Span, src: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "asm::duplicate_label",
            help = "labels are only allowed once per program",
            labels = vec![LabeledSpan::at(span, "duplicate label")],
            "Duplicate label",
        ),
        src,
    )
}

pub fn asm_unknown_label(span: Span, src: &str, name: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "asm::unknown_label",
            help = "every referenced label must be declared somewhere in the program",
            labels = vec![LabeledSpan::at(span, "unknown label")],
            "Label `{name}` is not defined.",
        ),
        src,
    )
}

pub fn asm_unencodable(span: Span, src: &str) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "asm::encoding",
            help = "indexed offsets must fit in 24 signed bits.",
            labels = vec![LabeledSpan::at(span, "cannot be encoded")],
            "Instruction operands cannot be encoded.",
        ),
        src,
    )
}

pub fn asm_out_of_memory(span: Span, src: &str, addr: u64) -> Report {
    with_src(
        miette!(
            severity = Severity::Error,
            code = "asm::out_of_memory",
            help = "the standard machine has 10,000 words of memory.",
            labels = vec![LabeledSpan::at(span, "placed outside memory")],
            "Statement would be placed at address {addr}, outside memory.",
        ),
        src,
    )
}
