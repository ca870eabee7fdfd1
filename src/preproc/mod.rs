//! Preprocessor: expands `#include`, `#define` and conditional directives
//! into a normalised source text, recording a [`CodeMap`] per file so any
//! position in the expansion traces back to where it came from.

use std::ops::Range;

use fxhash::FxHashMap;
use miette::Result;

use crate::codemap::{CodeMap, FileId};
use crate::error;
use crate::resolver::FileResolver;
use crate::span::Span;

mod ast;
mod lexer;

use ast::{Ast, NodeIdx, NodeKind};

/// Conditional expression of `#if`/`#elseif`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Condition {
    Defined(String),
    NotDefined(String),
}

/// Value bound by a `#define`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum DefineValue {
    Empty,
    Number(i32),
    Str(String),
}

impl DefineValue {
    /// Text inserted at substitution sites.
    fn render(&self) -> String {
        match self {
            DefineValue::Empty => String::new(),
            DefineValue::Number(val) => val.to_string(),
            DefineValue::Str(text) => format!("\"{text}\""),
        }
    }
}

/// A registered define with its provenance, so substituted text can map back
/// to the definition site.
struct Define {
    value: DefineValue,
    file: FileId,
    span: Span,
}

/// Shared state of one preprocessing job: the resolver, the define table and
/// the Code-Map of every file expanded so far. Owned by the top invocation
/// and threaded through the recursively spawned child invocations.
struct Context<'r> {
    resolver: &'r dyn FileResolver,
    defines: FxHashMap<String, Define>,
    maps: FxHashMap<FileId, CodeMap>,
    paths: FxHashMap<FileId, String>,
    /// Canonical paths currently being expanded, for cycle detection
    stack: Vec<String>,
    next_id: u32,
}

/// Result of preprocessing a program: the root file plus the Code-Map and
/// canonical path of every file that took part.
#[derive(Debug)]
pub struct Preprocessed {
    root: FileId,
    maps: FxHashMap<FileId, CodeMap>,
    paths: FxHashMap<FileId, String>,
}

impl Preprocessed {
    pub fn root(&self) -> FileId {
        self.root
    }

    /// The expanded program text.
    pub fn text(&self) -> &str {
        self.maps[&self.root].modified()
    }

    pub fn map(&self, file: FileId) -> Option<&CodeMap> {
        self.maps.get(&file)
    }

    pub fn path(&self, file: FileId) -> Option<&str> {
        self.paths.get(&file).map(String::as_str)
    }

    pub fn file_id(&self, path: &str) -> Option<FileId> {
        self.paths
            .iter()
            .find(|(_, p)| p.as_str() == path)
            .map(|(id, _)| *id)
    }
}

/// Expand the program rooted at `path`.
pub fn preprocess(resolver: &dyn FileResolver, path: &str) -> Result<Preprocessed> {
    let mut ctx = Context {
        resolver,
        defines: FxHashMap::default(),
        maps: FxHashMap::default(),
        paths: FxHashMap::default(),
        stack: Vec::new(),
        next_id: 0,
    };
    let canon = resolver.canonical_path(path)?;
    let src = resolver.file_contents(&canon)?;
    let root = Preprocessor::expand(&mut ctx, canon, src)?;
    Ok(Preprocessed {
        root,
        maps: ctx.maps,
        paths: ctx.paths,
    })
}

/// Expansion of a single file. One instance exists per included file, each
/// carrying its own id; includes spawn child instances against the shared
/// context.
struct Preprocessor<'c, 'r> {
    ctx: &'c mut Context<'r>,
    file: FileId,
    src: String,
}

impl<'c, 'r> Preprocessor<'c, 'r> {
    fn expand(ctx: &mut Context<'r>, path: String, src: String) -> Result<FileId> {
        let file = FileId::new(ctx.next_id);
        ctx.next_id += 1;
        ctx.paths.insert(file, path.clone());
        ctx.stack.push(path);

        let toks = lexer::lex(&src)?;
        let tree = ast::build(toks, &src)?;
        let mut map = CodeMap::new(src.as_str());
        let mut pp = Preprocessor { ctx, file, src };
        pp.eval_children(&tree, ast::ROOT, &mut map)?;
        pp.substitute(&mut map)?;

        let ctx = pp.ctx;
        ctx.stack.pop();
        ctx.maps.insert(file, map);
        Ok(file)
    }

    fn eval_children(&mut self, tree: &Ast, node: NodeIdx, map: &mut CodeMap) -> Result<()> {
        for &child in &tree.node(node).children {
            self.eval(tree, child, map)?;
        }
        Ok(())
    }

    fn eval(&mut self, tree: &Ast, node: NodeIdx, map: &mut CodeMap) -> Result<()> {
        match &tree.node(node).kind {
            NodeKind::Code { .. } => Ok(()),
            NodeKind::Define {
                name,
                value,
                line,
                dir_span,
                value_span,
            } => self.eval_define(map, name, value, line, *dir_span, *value_span),
            NodeKind::Include {
                path,
                line,
                path_span,
            } => self.eval_include(map, path, line, *path_span),
            NodeKind::Group { .. } => self.eval_group(tree, node, map),
            NodeKind::Root | NodeKind::Branch { .. } => {
                unreachable!("structure nodes are walked by their parents")
            }
        }
    }

    fn eval_define(
        &mut self,
        map: &mut CodeMap,
        name: &str,
        value: &DefineValue,
        line: &Range<usize>,
        dir_span: Span,
        value_span: Span,
    ) -> Result<()> {
        if self.ctx.defines.contains_key(name) {
            return Err(error::preproc_duplicate_define(dir_span, &self.src, name));
        }
        self.ctx.defines.insert(
            name.to_string(),
            Define {
                value: value.clone(),
                file: self.file,
                span: value_span,
            },
        );
        self.remove(map, line.clone());
        Ok(())
    }

    fn eval_include(
        &mut self,
        map: &mut CodeMap,
        path: &str,
        line: &Range<usize>,
        path_span: Span,
    ) -> Result<()> {
        let canon = self.ctx.resolver.canonical_path(path)?;
        if self.ctx.stack.contains(&canon) {
            return Err(error::preproc_include_cycle(path_span, &self.src, path));
        }
        let text = self.ctx.resolver.file_contents(&canon)?;
        let child = Preprocessor::expand(self.ctx, canon, text)?;
        let child_text = self.ctx.maps[&child].modified().to_string();

        let at = map
            .convert_to_modified(line.start)
            .expect("unprocessed source region must still map");
        map.insert_file_contents(&child_text, child, at..at + line.len());
        Ok(())
    }

    /// Choose at most one branch, drop the others wholesale (their defines
    /// never register) and erase every directive line of the group.
    fn eval_group(&mut self, tree: &Ast, group: NodeIdx, map: &mut CodeMap) -> Result<()> {
        let endif_line = match &tree.node(group).kind {
            NodeKind::Group { endif_line } => endif_line.clone(),
            _ => unreachable!(),
        };
        let branches = &tree.node(group).children;

        let branch_parts: Vec<(NodeIdx, Option<&Condition>, Range<usize>)> = branches
            .iter()
            .map(|&idx| match &tree.node(idx).kind {
                NodeKind::Branch { cond, line } => (idx, cond.as_ref(), line.clone()),
                _ => unreachable!("groups hold branches only"),
            })
            .collect();

        let chosen = branch_parts
            .iter()
            .position(|(_, cond, _)| cond.map_or(true, |c| self.holds(c)));

        for (i, (idx, _, line)) in branch_parts.iter().enumerate() {
            self.remove(map, line.clone());
            let content_end = branch_parts
                .get(i + 1)
                .map(|(_, _, next)| next.start)
                .unwrap_or(endif_line.start);
            if Some(i) == chosen {
                self.eval_children(tree, *idx, map)?;
            } else {
                self.remove(map, line.end..content_end);
            }
        }
        self.remove(map, endif_line);
        Ok(())
    }

    fn holds(&self, cond: &Condition) -> bool {
        match cond {
            Condition::Defined(name) => self.ctx.defines.contains_key(name),
            Condition::NotDefined(name) => !self.ctx.defines.contains_key(name),
        }
    }

    /// Erase an original-text region from the expansion. The region has not
    /// been edited yet (evaluation walks the document in order), so it still
    /// maps directly.
    fn remove(&self, map: &mut CodeMap, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        let start = map
            .convert_to_modified(range.start)
            .expect("unprocessed source region must still map");
        map.replace_characters(start..start + range.len(), "");
    }

    /// Substitute defined symbols in the remaining local text. Whole
    /// identifier tokens only, skipping string literals, comments, and text
    /// that came from included files (the child already substituted those).
    fn substitute(&mut self, map: &mut CodeMap) -> Result<()> {
        if self.ctx.defines.is_empty() {
            return Ok(());
        }

        let text = map.modified().to_string();
        let bytes = text.as_bytes();
        let mut replacements: Vec<(Range<usize>, String, Span, Option<FileId>)> = Vec::new();

        let mut i = 0;
        let mut in_str = false;
        let mut in_comment = false;
        while i < bytes.len() {
            let c = bytes[i];
            if c == b'\n' {
                in_str = false;
                in_comment = false;
                i += 1;
            } else if in_comment {
                i += 1;
            } else if in_str {
                match c {
                    b'\\' => i += 2,
                    b'"' => {
                        in_str = false;
                        i += 1;
                    }
                    _ => i += 1,
                }
            } else if c == b'"' {
                in_str = true;
                i += 1;
            } else if c == b'/' && bytes.get(i + 1) == Some(&b'/') {
                in_comment = true;
                i += 2;
            } else if c.is_ascii_alphabetic() || c == b'_' {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                let name = &text[start..i];
                if let Some(define) = self.ctx.defines.get(name) {
                    if local_direct(map, start..i) {
                        let external = (define.file != self.file).then_some(define.file);
                        replacements.push((
                            start..i,
                            define.value.render(),
                            define.span,
                            external,
                        ));
                    }
                }
            } else {
                i += 1;
            }
        }

        // Right to left, so earlier offsets stay valid while editing
        for (range, text, previous, external) in replacements.into_iter().rev() {
            map.replace_mapped(range, &text, previous, external);
        }
        Ok(())
    }
}

/// The whole range lies inside one direct segment of this file's own text.
fn local_direct(map: &CodeMap, range: Range<usize>) -> bool {
    let seg = &map.segments()[map.segment_index(range.start)];
    seg.is_direct() && seg.external().is_none() && seg.current().end() >= range.end
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codemap::OriginalPos;
    use crate::resolver::MemoryResolver;

    fn expand(files: &[(&str, &str)]) -> Result<Preprocessed> {
        let mut resolver = MemoryResolver::new();
        for (path, contents) in files {
            resolver = resolver.with_file(*path, *contents);
        }
        preprocess(&resolver, files[0].0)
    }

    #[test]
    fn passthrough_without_directives() {
        let out = expand(&[("main.s", "add 1, %a\nnop\n")]).unwrap();
        assert_eq!(out.text(), "add 1, %a\nnop\n");
        let map = out.map(out.root()).unwrap();
        assert_eq!(map.convert_to_original(4), OriginalPos::OneToOne(4));
    }

    #[test]
    fn define_number_substitutes_and_maps_to_value() {
        let src = "#define FOO 10\nadd FOO, %a\n";
        let out = expand(&[("main.s", src)]).unwrap();
        assert_eq!(out.text(), "add 10, %a\n");
        // "10" maps back to the value token of the define
        let map = out.map(out.root()).unwrap();
        let value_offs = src.find("10").unwrap();
        assert_eq!(
            map.convert_to_original(4),
            OriginalPos::OneToRange(value_offs..value_offs + 2)
        );
    }

    #[test]
    fn define_empty_and_string_values() {
        let out = expand(&[("main.s", "#define DEBUG\nDEBUG nop\n")]).unwrap();
        assert_eq!(out.text(), " nop\n");

        let out = expand(&[(
            "main.s",
            "#define GREETING \"hi\"\n.string GREETING\n",
        )])
        .unwrap();
        assert_eq!(out.text(), ".string \"hi\"\n");
    }

    #[test]
    fn substitution_skips_strings_and_comments() {
        let out = expand(&[(
            "main.s",
            "#define X 1\n.string \"X\"\nnop // X marks the spot\nadd X, %a\n",
        )])
        .unwrap();
        assert_eq!(
            out.text(),
            ".string \"X\"\nnop // X marks the spot\nadd 1, %a\n"
        );
    }

    #[test]
    fn substitution_matches_whole_identifiers_only() {
        let out = expand(&[("main.s", "#define FOO 1\njmp FOOBAR\njmp FOO\n")]).unwrap();
        assert_eq!(out.text(), "jmp FOOBAR\njmp 1\n");
    }

    #[test]
    fn duplicate_define_is_an_error() {
        let err = expand(&[("main.s", "#define X 1\n#define X 2\n")]).unwrap_err();
        assert!(err.to_string().contains("already defined"), "{err}");
    }

    #[test]
    fn include_expands_and_maps_across_files() {
        let out = expand(&[
            ("main.s", "#include <a.s>\nadd FOO, %a"),
            ("a.s", "#define FOO 10"),
        ])
        .unwrap();
        assert_eq!(out.text(), "\nadd 10, %a");

        let a = out.file_id("a.s").unwrap();
        let map = out.map(out.root()).unwrap();
        let offs = out.text().find("10").unwrap();
        assert_eq!(
            map.convert_to_original(offs),
            OriginalPos::InFile(a, "#define FOO ".len())
        );
    }

    #[test]
    fn include_splices_file_contents() {
        let out = expand(&[
            ("main.s", "before\n#include <mid.s>\nafter\n"),
            ("mid.s", "middle\n"),
        ])
        .unwrap();
        assert_eq!(out.text(), "before\nmiddle\nafter\n");

        let mid = out.file_id("mid.s").unwrap();
        let map = out.map(out.root()).unwrap();
        assert_eq!(map.convert_to_original(7), OriginalPos::InFile(mid, 0));
        assert_eq!(map.convert_to_original(14), OriginalPos::OneToOne(24));
    }

    #[test]
    fn nested_includes() {
        let out = expand(&[
            ("main.s", "#include <a.s>\nmain\n"),
            ("a.s", "#include <b.s>\na\n"),
            ("b.s", "b\n"),
        ])
        .unwrap();
        assert_eq!(out.text(), "b\na\nmain\n");
    }

    #[test]
    fn missing_include_propagates_resolver_error() {
        let err = expand(&[("main.s", "#include <gone.s>\n")]).unwrap_err();
        assert!(err.to_string().contains("gone.s"), "{err}");
    }

    #[test]
    fn include_cycle_is_detected() {
        let err = expand(&[
            ("main.s", "#include <other.s>\n"),
            ("other.s", "#include <main.s>\n"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("still being expanded"), "{err}");

        let err = expand(&[("self.s", "#include <self.s>\n")]).unwrap_err();
        assert!(err.to_string().contains("still being expanded"), "{err}");
    }

    #[test]
    fn conditional_takes_first_true_branch() {
        let src = "#define A\n#if defined(A)\nyes\n#else\nno\n#endif\n";
        let out = expand(&[("main.s", src)]).unwrap();
        assert_eq!(out.text(), "yes\n");

        let src = "#if defined(A)\nyes\n#else\nno\n#endif\n";
        let out = expand(&[("main.s", src)]).unwrap();
        assert_eq!(out.text(), "no\n");

        let src = "#define B\n\
                   #if defined(A)\none\n\
                   #elseif defined(B)\ntwo\n\
                   #elseif notdefined(A)\nthree\n\
                   #else\nfour\n#endif\n";
        let out = expand(&[("main.s", src)]).unwrap();
        assert_eq!(out.text(), "two\n");
    }

    #[test]
    fn group_without_true_branch_vanishes() {
        let out = expand(&[("main.s", "#if defined(A)\nx\n#endif\nrest\n")]).unwrap();
        assert_eq!(out.text(), "rest\n");
    }

    #[test]
    fn dropped_branches_do_not_evaluate() {
        // the define never registers
        let out = expand(&[("main.s", "#if defined(NO)\n#define X 1\n#endif\nX\n")]).unwrap();
        assert_eq!(out.text(), "X\n");
        // the include never resolves
        let out = expand(&[(
            "main.s",
            "#if defined(NO)\n#include <missing.s>\n#endif\nnop\n",
        )])
        .unwrap();
        assert_eq!(out.text(), "nop\n");
    }

    #[test]
    fn nested_conditionals() {
        let src = "#define A\n\
                   #if defined(A)\n\
                   outer\n\
                   #if notdefined(B)\ninner\n#endif\n\
                   #endif\n";
        let out = expand(&[("main.s", src)]).unwrap();
        assert_eq!(out.text(), "outer\ninner\n");
    }

    #[test]
    fn defines_from_included_file_apply_to_later_text() {
        let out = expand(&[
            ("main.s", "#include <defs.s>\n#if defined(FLAG)\non\n#endif\n"),
            ("defs.s", "#define FLAG"),
        ])
        .unwrap();
        assert_eq!(out.text(), "\non\n");
    }

    #[test]
    fn direct_positions_round_trip() {
        let src = "#define FOO 10\nadd FOO, %a\nnop\n";
        let out = expand(&[("main.s", src)]).unwrap();
        let map = out.map(out.root()).unwrap();
        // a position inside untouched text survives the round trip
        let orig = src.find("nop").unwrap();
        let modified = map.convert_to_modified(orig).unwrap();
        assert_eq!(map.convert_to_original(modified), OriginalPos::OneToOne(orig));
    }
}
