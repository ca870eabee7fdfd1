use std::ops::Range;

use miette::SourceSpan;

/// Half-open region of text, identified by byte positions.
///
/// Serves two roles: labelling diagnostics, and acting as the unit of
/// segment arithmetic in [`crate::codemap`], where every segment carries one
/// span into the modified text and one into its origin and edits split and
/// shift them.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Span {
    start: usize,
    end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        assert!(start <= end, "span ends before it starts");
        Span { start, end }
    }

    /// Span of `len` bytes starting at `offs`
    pub fn at(offs: usize, len: usize) -> Self {
        Span {
            start: offs,
            end: offs + len,
        }
    }

    /// Zero-length span marking a position rather than a region
    pub fn empty(at: usize) -> Self {
        Span { start: at, end: at }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.start <= idx && idx < self.end
    }

    /// Distance of an absolute position from the start of the span
    pub fn offset_of(&self, idx: usize) -> usize {
        idx.saturating_sub(self.start)
    }

    /// Cut into two adjoining spans at an absolute position within
    pub fn split_at(&self, at: usize) -> (Span, Span) {
        debug_assert!(self.start <= at && at <= self.end, "cut outside span");
        (Span::new(self.start, at), Span::new(at, self.end))
    }

    /// Same region moved by a signed distance
    pub fn shifted(&self, delta: isize) -> Span {
        Span {
            start: (self.start as isize + delta) as usize,
            end: (self.end as isize + delta) as usize,
        }
    }

    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }
}

impl From<Span> for SourceSpan {
    fn from(span: Span) -> Self {
        SourceSpan::new(span.start.into(), span.len())
    }
}
