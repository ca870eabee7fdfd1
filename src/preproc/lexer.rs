//! Line-level directive lexer. Each directive must occupy its own line
//! (leading whitespace and a trailing `//` comment are allowed); everything
//! else is collected into code tokens.

use std::ops::Range;

use lazy_static::lazy_static;
use miette::Result;
use regex::Regex;

use super::{Condition, DefineValue};
use crate::error;
use crate::span::Span;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum LineTok {
    /// One or more contiguous non-directive lines
    Code { range: Range<usize> },
    Include {
        path: String,
        /// Whole line including the terminator
        line: Range<usize>,
        path_span: Span,
    },
    Define {
        name: String,
        value: DefineValue,
        line: Range<usize>,
        /// The directive itself, for redefinition reports
        dir_span: Span,
        /// The value token (or the name, when bare); where substituted text
        /// points back to
        value_span: Span,
    },
    If {
        cond: Condition,
        line: Range<usize>,
        span: Span,
    },
    ElseIf {
        cond: Condition,
        line: Range<usize>,
        span: Span,
    },
    Else { line: Range<usize>, span: Span },
    EndIf { line: Range<usize>, span: Span },
}

lazy_static! {
    // Order-insensitive: dispatch happens on the directive name first.
    static ref DIRECTIVE: Regex = Regex::new(r"^\s*#([A-Za-z_]\w*)").unwrap();
    static ref INCLUDE: Regex =
        Regex::new(r"^\s*#include\s*<([^>\n]*)>\s*(?://[^\n]*)?$").unwrap();
    static ref DEFINE: Regex =
        Regex::new(r"^\s*#define\s+([A-Za-z_]\w*)[ \t]*(.*?)\s*$").unwrap();
    static ref DEFINE_NUMBER: Regex = Regex::new(r"^(-?\d+)\s*(?://.*)?$").unwrap();
    static ref DEFINE_STRING: Regex = Regex::new(r#"^("[^"\n]*")\s*(?://.*)?$"#).unwrap();
    static ref CONDITION: Regex = Regex::new(
        r"^\s*#(?:if|elseif)\s+(defined|notdefined)\(\s*([A-Za-z_]\w*)\s*\)\s*(?://[^\n]*)?$"
    )
    .unwrap();
    static ref BARE: Regex = Regex::new(r"^\s*#(?:else|endif)\s*(?://[^\n]*)?$").unwrap();
}

/// Lex the whole source, walking it line by line.
pub fn lex(src: &str) -> Result<Vec<LineTok>> {
    let mut toks = Vec::new();
    let mut pos = 0;
    while pos < src.len() {
        let line_end = src[pos..]
            .find('\n')
            .map(|i| pos + i + 1)
            .unwrap_or(src.len());
        let body = src[pos..line_end].trim_end_matches('\n');

        if body.trim_start().starts_with('#') {
            toks.push(directive(src, pos, body)?);
        } else {
            // Contiguous code lines merge into a single token
            match toks.last_mut() {
                Some(LineTok::Code { range }) if range.end == pos => range.end = line_end,
                _ => toks.push(LineTok::Code {
                    range: pos..line_end,
                }),
            }
        }
        pos = line_end;
    }
    Ok(toks)
}

/// Span of a capture group, offset to absolute source positions.
fn capture_span(at: usize, m: &regex::Match) -> Span {
    Span::at(at + m.start(), m.len())
}

fn directive(src: &str, at: usize, body: &str) -> Result<LineTok> {
    let line = at..at + body.len() + usize::from(src[at..].len() > body.len());
    let dir_span = Span::at(at + body.len() - body.trim_start().len(), body.trim().len());
    let name = match DIRECTIVE.captures(body) {
        Some(caps) => caps.get(1).unwrap().as_str(),
        // A bare or malformed `#` line
        None => return Err(error::preproc_unknown_dir(dir_span, src)),
    };

    match name {
        "include" => {
            let caps = INCLUDE
                .captures(body)
                .ok_or_else(|| error::preproc_missing_close(dir_span, src))?;
            let path = caps.get(1).unwrap();
            Ok(LineTok::Include {
                path: path.as_str().to_string(),
                line,
                path_span: capture_span(at, &path),
            })
        }
        "define" => {
            let caps = DEFINE
                .captures(body)
                .ok_or_else(|| error::preproc_bad_define_value(dir_span, src))?;
            let name = caps.get(1).unwrap();
            let rest = caps.get(2).unwrap();
            let (value, value_span) = define_value(src, at, &name, &rest)?;
            Ok(LineTok::Define {
                name: name.as_str().to_string(),
                value,
                line,
                dir_span,
                value_span,
            })
        }
        "if" | "elseif" => {
            let caps = CONDITION
                .captures(body)
                .ok_or_else(|| error::preproc_bad_condition(dir_span, src))?;
            let symbol = caps.get(2).unwrap().as_str().to_string();
            let cond = match caps.get(1).unwrap().as_str() {
                "defined" => Condition::Defined(symbol),
                _ => Condition::NotDefined(symbol),
            };
            if name == "if" {
                Ok(LineTok::If {
                    cond,
                    line,
                    span: dir_span,
                })
            } else {
                Ok(LineTok::ElseIf {
                    cond,
                    line,
                    span: dir_span,
                })
            }
        }
        "else" | "endif" => {
            if !BARE.is_match(body) {
                return Err(error::preproc_bad_condition(dir_span, src));
            }
            if name == "else" {
                Ok(LineTok::Else {
                    line,
                    span: dir_span,
                })
            } else {
                Ok(LineTok::EndIf {
                    line,
                    span: dir_span,
                })
            }
        }
        _ => Err(error::preproc_unknown_dir(dir_span, src)),
    }
}

/// `#define NAME`, `#define NAME <number>` or `#define NAME "<string>"`, each
/// optionally followed by a comment.
fn define_value(
    src: &str,
    at: usize,
    name: &regex::Match,
    rest: &regex::Match,
) -> Result<(DefineValue, Span)> {
    let text = rest.as_str();
    if text.is_empty() || text.starts_with("//") {
        return Ok((DefineValue::Empty, capture_span(at, name)));
    }
    if let Some(caps) = DEFINE_STRING.captures(text) {
        let lit = caps.get(1).unwrap();
        let inner = &lit.as_str()[1..lit.as_str().len() - 1];
        let span = Span::at(at + rest.start() + lit.start(), lit.len());
        return Ok((DefineValue::Str(inner.to_string()), span));
    }
    if let Some(caps) = DEFINE_NUMBER.captures(text) {
        let lit = caps.get(1).unwrap();
        let span = Span::at(at + rest.start() + lit.start(), lit.len());
        let value = lit
            .as_str()
            .parse::<i32>()
            .map_err(|_| error::preproc_bad_define_value(span, src))?;
        return Ok((DefineValue::Number(value), span));
    }
    let span = Span::at(at + rest.start(), text.len());
    Err(error::preproc_bad_define_value(span, src))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn code_lines_merge() {
        let toks = lex("add 1, %a\nsub 2, %b\n").unwrap();
        assert_eq!(
            toks,
            vec![LineTok::Code { range: 0..20 }]
        );
    }

    #[test]
    fn include_directive() {
        let src = "#include <lib.s>\nnop\n";
        let toks = lex(src).unwrap();
        match &toks[0] {
            LineTok::Include { path, line, path_span } => {
                assert_eq!(path, "lib.s");
                assert_eq!(*line, 0..17);
                assert_eq!(&src[path_span.as_range()], "lib.s");
            }
            other => panic!("unexpected token {other:?}"),
        }
        assert_eq!(toks[1], LineTok::Code { range: 17..21 });
    }

    #[test]
    fn include_requires_closing_angle() {
        assert!(lex("#include <lib.s\n").is_err());
        assert!(lex("#include lib.s\n").is_err());
    }

    #[test]
    fn define_forms() {
        let src = "#define BARE\n#define NUM -42\n#define STR \"hi\" // c\n";
        let toks = lex(src).unwrap();
        match &toks[0] {
            LineTok::Define { name, value, .. } => {
                assert_eq!(name, "BARE");
                assert_eq!(*value, DefineValue::Empty);
            }
            _ => panic!(),
        }
        match &toks[1] {
            LineTok::Define { name, value, value_span, .. } => {
                assert_eq!(name, "NUM");
                assert_eq!(*value, DefineValue::Number(-42));
                assert_eq!(&src[value_span.as_range()], "-42");
            }
            _ => panic!(),
        }
        match &toks[2] {
            LineTok::Define { value, value_span, .. } => {
                assert_eq!(*value, DefineValue::Str("hi".to_string()));
                assert_eq!(&src[value_span.as_range()], "\"hi\"");
            }
            _ => panic!(),
        }
    }

    #[test]
    fn define_rejects_garbage_values() {
        assert!(lex("#define X 1.5\n").is_err());
        assert!(lex("#define X nope\n").is_err());
        assert!(lex("#define X 99999999999\n").is_err());
        assert!(lex("#define 9X 1\n").is_err());
    }

    #[test]
    fn conditional_directives() {
        let src = "#if defined(A)\n#elseif notdefined(B) // c\n#else\n#endif\n";
        let toks = lex(src).unwrap();
        assert!(matches!(
            &toks[0],
            LineTok::If { cond: Condition::Defined(name), .. } if name == "A"
        ));
        assert!(matches!(
            &toks[1],
            LineTok::ElseIf { cond: Condition::NotDefined(name), .. } if name == "B"
        ));
        assert!(matches!(&toks[2], LineTok::Else { .. }));
        assert!(matches!(&toks[3], LineTok::EndIf { .. }));
    }

    #[test]
    fn conditional_expression_is_exact() {
        assert!(lex("#if A\n").is_err());
        assert!(lex("#if defined A\n").is_err());
        assert!(lex("#else junk\n").is_err());
        assert!(lex("#endif junk\n").is_err());
    }

    #[test]
    fn unknown_directive_is_an_error() {
        assert!(lex("#pragma once\n").is_err());
    }

    #[test]
    fn hash_must_start_the_line() {
        // mid-line hashes are plain code
        let toks = lex("add 1, %a # not a directive\n").unwrap();
        assert!(matches!(&toks[0], LineTok::Code { .. }));
        // indentation before the directive is fine
        let toks = lex("   #define X\n").unwrap();
        assert!(matches!(&toks[0], LineTok::Define { .. }));
    }

    #[test]
    fn last_line_without_newline() {
        let toks = lex("#define X 1").unwrap();
        match &toks[0] {
            LineTok::Define { line, value, .. } => {
                assert_eq!(*line, 0..11);
                assert_eq!(*value, DefineValue::Number(1));
            }
            _ => panic!(),
        }
    }
}
