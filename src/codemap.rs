use std::ops::Range;

use crate::span::Span;

/// Identifies the expansion of one preprocessed file within a context.
///
/// Allocated by the preprocessor context; ids are only meaningful within the
/// context that produced them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FileId(u32);

impl FileId {
    pub(crate) fn new(raw: u32) -> Self {
        FileId(raw)
    }
}

/// Answer to tracing a position in the edited text back to where it came from.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum OriginalPos {
    /// Exact character in the original text
    OneToOne(usize),
    /// The position was produced by an edit covering this original range
    OneToRange(Range<usize>),
    /// The position comes from another file's expansion at this offset
    InFile(FileId, usize),
}

/// One contiguous piece of the modified text and where it maps back to.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Segment {
    /// Region in the original text, or in the external file's expansion
    previous: Span,
    /// Region in the modified text
    current: Span,
    /// One-to-one character correspondence between previous and current
    direct: bool,
    /// Set when `previous` refers into another file's expansion
    external: Option<FileId>,
}

impl Segment {
    pub fn previous(&self) -> Span {
        self.previous
    }

    pub fn current(&self) -> Span {
        self.current
    }

    pub fn is_direct(&self) -> bool {
        self.direct
    }

    pub fn external(&self) -> Option<FileId> {
        self.external
    }
}

/// Records successive character-level edits of a source string and converts
/// positions between the original and modified text in both directions.
///
/// Segments tile `modified` contiguously and in order. Pure removals keep no
/// segment, so a removed original position has no modified counterpart.
#[derive(Clone, Debug)]
pub struct CodeMap {
    original: String,
    modified: String,
    segments: Vec<Segment>,
}

impl CodeMap {
    pub fn new(source: impl Into<String>) -> Self {
        let original = source.into();
        let len = original.len();
        let segments = if len == 0 {
            Vec::new()
        } else {
            vec![Segment {
                previous: Span::at(0, len),
                current: Span::at(0, len),
                direct: true,
                external: None,
            }]
        };
        CodeMap {
            modified: original.clone(),
            original,
            segments,
        }
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn modified(&self) -> &str {
        &self.modified
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Index of the segment containing `idx` (inclusive lower, exclusive
    /// upper). `idx == modified.len()` selects the last segment.
    pub fn segment_index(&self, idx: usize) -> usize {
        assert!(!self.segments.is_empty(), "no segments to index");
        assert!(idx <= self.modified.len(), "index outside modified text");
        let i = self.segments.partition_point(|seg| seg.current.end() <= idx);
        i.min(self.segments.len() - 1)
    }

    /// Splits the direct segment containing `at` into two direct segments
    /// with proportional previous spans. Splitting a non-direct segment is a
    /// programmer error.
    pub fn split_segment(&mut self, at: usize) {
        let i = self.segment_index(at);
        self.split_segment_inner(i, at);
    }

    fn split_segment_inner(&mut self, i: usize, at: usize) {
        let seg = &self.segments[i];
        assert!(
            seg.current.start() < at && at < seg.current.end(),
            "split position must fall strictly inside the segment"
        );
        assert!(seg.direct, "cannot split a non-direct segment");
        let (cur_left, cur_right) = seg.current.split_at(at);
        let (prev_left, prev_right) = seg
            .previous
            .split_at(seg.previous.start() + seg.current.offset_of(at));
        let left = Segment {
            previous: prev_left,
            current: cur_left,
            direct: true,
            external: seg.external,
        };
        let right = Segment {
            previous: prev_right,
            current: cur_right,
            direct: true,
            external: seg.external,
        };
        self.segments.splice(i..=i, [left, right]);
    }

    /// Split at `at` if it falls strictly inside a segment, so that `at`
    /// becomes a segment boundary.
    fn split_boundary(&mut self, at: usize) {
        if self.segments.is_empty() || at >= self.modified.len() {
            return;
        }
        let i = self.segment_index(at);
        if self.segments[i].current.start() != at {
            self.split_segment_inner(i, at);
        }
    }

    /// Replaces `modified[range]` with `text`. The affected span becomes a
    /// single non-direct segment mapping back to the original span that was
    /// replaced; an empty `text` drops the affected segments entirely.
    /// Subsequent segments shift by the length delta.
    pub fn replace_characters(&mut self, range: Range<usize>, text: &str) {
        self.split_boundary(range.start);
        self.split_boundary(range.end);
        let (first, last) = self.covered(&range);

        let removed = &self.segments[first..last];
        debug_assert!(
            removed.windows(2).all(|w| w[0].external == w[1].external),
            "replacement must not span file boundaries"
        );
        let external = removed.first().and_then(|seg| seg.external);
        let previous = match (removed.first(), removed.last()) {
            (Some(head), Some(tail)) => Span::new(
                head.previous.start(),
                tail.previous.end().max(head.previous.start()),
            ),
            // Pure insertion: map to the empty original span at the boundary
            _ => Span::empty(
                self.segments
                    .get(first)
                    .map(|seg| seg.previous.start())
                    .unwrap_or(self.original.len()),
            ),
        };

        let replacement = (!text.is_empty()).then(|| Segment {
            previous,
            current: Span::at(range.start, text.len()),
            direct: false,
            external,
        });
        self.apply(range, text, first..last, replacement.into_iter().collect());
    }

    /// As [`replace_characters`], but the replacement segment carries an
    /// explicit provenance instead of deriving it from the replaced span.
    /// Used for symbol substitution, where the inserted text maps to the
    /// definition site (possibly in another file).
    ///
    /// [`replace_characters`]: CodeMap::replace_characters
    pub(crate) fn replace_mapped(
        &mut self,
        range: Range<usize>,
        text: &str,
        previous: Span,
        external: Option<FileId>,
    ) {
        self.split_boundary(range.start);
        self.split_boundary(range.end);
        let (first, last) = self.covered(&range);
        let replacement = (!text.is_empty()).then(|| Segment {
            previous,
            current: Span::at(range.start, text.len()),
            direct: false,
            external,
        });
        self.apply(range, text, first..last, replacement.into_iter().collect());
    }

    /// Replaces `modified[range]` with the expansion of another file. The
    /// inserted text maps one-to-one into that file's expansion; if it lacks
    /// a trailing newline, one is appended as a non-direct segment.
    pub fn insert_file_contents(&mut self, text: &str, file: FileId, range: Range<usize>) {
        self.split_boundary(range.start);
        self.split_boundary(range.end);
        let (first, last) = self.covered(&range);

        let at = range.start;
        let mut inserted = Vec::new();
        if !text.is_empty() {
            inserted.push(Segment {
                previous: Span::at(0, text.len()),
                current: Span::at(at, text.len()),
                direct: true,
                external: Some(file),
            });
        }
        let mut full = text.to_string();
        if !text.ends_with('\n') {
            full.push('\n');
            inserted.push(Segment {
                previous: Span::empty(text.len()),
                current: Span::at(at + text.len(), 1),
                direct: false,
                external: Some(file),
            });
        }
        self.apply(range, &full, first..last, inserted);
    }

    /// Segment indices covered by `range`, assuming boundaries are split.
    fn covered(&self, range: &Range<usize>) -> (usize, usize) {
        let first = self
            .segments
            .partition_point(|seg| seg.current.end() <= range.start);
        let last = self
            .segments
            .partition_point(|seg| seg.current.start() < range.end);
        (first, last.max(first))
    }

    /// Splice `replacement` segments over `seg_range`, rewrite the text and
    /// shift everything after the edit.
    fn apply(
        &mut self,
        range: Range<usize>,
        text: &str,
        seg_range: Range<usize>,
        replacement: Vec<Segment>,
    ) {
        let delta = text.len() as isize - range.len() as isize;
        let after = seg_range.start + replacement.len();
        self.segments.splice(seg_range, replacement);
        for seg in &mut self.segments[after..] {
            seg.current = seg.current.shifted(delta);
        }
        self.modified.replace_range(range, text);
    }

    /// Trace a position in the modified text back to its origin.
    pub fn convert_to_original(&self, idx: usize) -> OriginalPos {
        assert!(idx <= self.modified.len(), "index outside modified text");
        if self.segments.is_empty() {
            return OriginalPos::OneToRange(0..0);
        }
        let seg = &self.segments[self.segment_index(idx)];
        let offs = seg.current.offset_of(idx);
        match (seg.external, seg.direct) {
            (Some(file), true) => OriginalPos::InFile(file, seg.previous.start() + offs),
            (Some(file), false) => OriginalPos::InFile(file, seg.previous.start()),
            (None, true) => OriginalPos::OneToOne(seg.previous.start() + offs),
            (None, false) => OriginalPos::OneToRange(seg.previous.as_range()),
        }
    }

    /// Where an original position ended up in the modified text. Absent when
    /// the position has been removed or its text now lives in another file.
    pub fn convert_to_modified(&self, idx: usize) -> Option<usize> {
        self.segments
            .iter()
            .find(|seg| seg.direct && seg.external.is_none() && seg.previous.contains(idx))
            .map(|seg| seg.current.start() + seg.previous.offset_of(idx))
    }
}
