//! Directive tree built over an arena of nodes. Parent links are plain
//! indices into the arena; children are evaluated in document order.

use std::ops::Range;

use miette::Result;

use super::lexer::LineTok;
use super::{Condition, DefineValue};
use crate::error;
use crate::span::Span;

pub type NodeIdx = usize;

#[derive(Clone, Debug)]
pub struct Node {
    pub parent: Option<NodeIdx>,
    pub children: Vec<NodeIdx>,
    pub kind: NodeKind,
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Root,
    Code {
        range: Range<usize>,
    },
    Include {
        path: String,
        line: Range<usize>,
        path_span: Span,
    },
    Define {
        name: String,
        value: DefineValue,
        line: Range<usize>,
        dir_span: Span,
        value_span: Span,
    },
    /// `#if … #endif`; children are the branches in order
    Group {
        endif_line: Range<usize>,
    },
    /// One arm of a group; `cond` is absent for `#else`
    Branch {
        cond: Option<Condition>,
        line: Range<usize>,
    },
}

#[derive(Debug)]
pub struct Ast {
    nodes: Vec<Node>,
}

pub const ROOT: NodeIdx = 0;

impl Ast {
    pub fn node(&self, idx: NodeIdx) -> &Node {
        &self.nodes[idx]
    }

    fn push(&mut self, parent: NodeIdx, kind: NodeKind) -> NodeIdx {
        let idx = self.nodes.len();
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            kind,
        });
        self.nodes[parent].children.push(idx);
        idx
    }
}

/// Assemble the token stream into a tree, enforcing conditional structure.
pub fn build(toks: Vec<LineTok>, src: &str) -> Result<Ast> {
    let mut ast = Ast {
        nodes: vec![Node {
            parent: None,
            children: Vec::new(),
            kind: NodeKind::Root,
        }],
    };
    // Innermost group and its #if span for unclosed reports
    let mut groups: Vec<(NodeIdx, Span)> = Vec::new();
    let mut container = ROOT;

    for tok in toks {
        match tok {
            LineTok::Code { range } => {
                ast.push(container, NodeKind::Code { range });
            }
            LineTok::Include {
                path,
                line,
                path_span,
            } => {
                ast.push(
                    container,
                    NodeKind::Include {
                        path,
                        line,
                        path_span,
                    },
                );
            }
            LineTok::Define {
                name,
                value,
                line,
                dir_span,
                value_span,
            } => {
                ast.push(
                    container,
                    NodeKind::Define {
                        name,
                        value,
                        line,
                        dir_span,
                        value_span,
                    },
                );
            }
            LineTok::If { cond, line, span } => {
                let group = ast.push(container, NodeKind::Group { endif_line: 0..0 });
                groups.push((group, span));
                container = ast.push(
                    group,
                    NodeKind::Branch {
                        cond: Some(cond),
                        line,
                    },
                );
            }
            LineTok::ElseIf { cond, line, span } => {
                let (group, _) = *groups
                    .last()
                    .ok_or_else(|| error::preproc_dangling(span, src, "#elseif"))?;
                check_open(&ast, group, span, src)?;
                container = ast.push(
                    group,
                    NodeKind::Branch {
                        cond: Some(cond),
                        line,
                    },
                );
            }
            LineTok::Else { line, span } => {
                let (group, _) = *groups
                    .last()
                    .ok_or_else(|| error::preproc_dangling(span, src, "#else"))?;
                check_open(&ast, group, span, src)?;
                container = ast.push(group, NodeKind::Branch { cond: None, line });
            }
            LineTok::EndIf { line, span } => {
                let (group, _) = groups
                    .pop()
                    .ok_or_else(|| error::preproc_dangling(span, src, "#endif"))?;
                if let NodeKind::Group { endif_line } = &mut ast.nodes[group].kind {
                    *endif_line = line;
                }
                // Resume in whatever held the group
                container = ast.nodes[group].parent.expect("groups have parents");
            }
        }
    }

    if let Some((_, span)) = groups.last() {
        return Err(error::preproc_unclosed_if(*span, src));
    }
    Ok(ast)
}

/// A group stops accepting branches once it has an `#else`.
fn check_open(ast: &Ast, group: NodeIdx, span: Span, src: &str) -> Result<()> {
    let last = *ast.nodes[group].children.last().expect("group has a branch");
    if matches!(ast.nodes[last].kind, NodeKind::Branch { cond: None, .. }) {
        return Err(error::preproc_branch_after_else(span, src));
    }
    Ok(())
}
