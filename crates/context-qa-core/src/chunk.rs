//! Overlapping fixed-size text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `size` characters where
//! consecutive chunks share exactly `overlap` characters. Cut points prefer
//! natural boundaries near the target size so words are not severed.
//!
//! # Algorithm
//!
//! 1. Start at character offset 0.
//! 2. If the remaining text fits in `size`, emit it as the final chunk.
//! 3. Otherwise look for a cut inside the window `[start + size - W, start + size]`,
//!    preferring a paragraph break, then a line break, then any whitespace.
//! 4. With no boundary in the window, hard-cut at `start + size`.
//! 5. The next chunk starts at `cut - overlap`.
//!
//! With `W = 0` every cut is a hard cut, so chunk `i` starts at exactly
//! `i * (size - overlap)`. The window is clamped to `size - overlap - 1`, which
//! keeps every chunk longer than the overlap and guarantees progress.
//!
//! Stripping the trailing `overlap` characters from every non-final chunk
//! and concatenating the results reproduces the input exactly.
//!
//! # Example
//!
//! ```rust
//! use context_qa_core::chunk::{chunk_text, ChunkParams};
//!
//! let params = ChunkParams::new(40, 10).unwrap();
//! let chunks = chunk_text("policy.txt", "Vacation policy: employees accrue 1.5 days per month.", &params);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].overlap, 10);
//! ```

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Chunk;

/// Approximate characters-per-token ratio used when sizes are given in tokens.
pub const CHARS_PER_TOKEN: usize = 4;

/// Validated chunking parameters, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    size: usize,
    overlap: usize,
    boundary_window: usize,
}

impl ChunkParams {
    /// Build parameters with the default boundary window (`size / 10`).
    ///
    /// Fails with [`Error::Configuration`] unless `0 <= overlap < size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::configuration("chunk size must be > 0"));
        }
        if overlap >= size {
            return Err(Error::configuration(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap, size
            )));
        }
        Ok(Self {
            size,
            overlap,
            boundary_window: size / 10,
        })
    }

    /// Set how far before the target size a boundary may be taken. `0` forces hard cuts.
    pub fn with_boundary_window(mut self, window: usize) -> Self {
        self.boundary_window = window;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn boundary_window(&self) -> usize {
        self.effective_window()
    }

    fn effective_window(&self) -> usize {
        self.boundary_window.min(self.size - self.overlap - 1)
    }
}

/// Split `text` into overlapping chunks.
///
/// Empty text yields no chunks. Text of at most `size` characters yields a
/// single chunk equal to the whole text. Output is fully determined by the
/// inputs; chunk ids are derived from `(document_id, index)`.
pub fn chunk_text(document_id: &str, text: &str, params: &ChunkParams) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    // Byte offset of every char position, plus one past the end.
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = chars.len();
    let window = params.effective_window();

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let index = chunks.len();
        let overlap = if index == 0 { 0 } else { params.overlap };

        if total - start <= params.size {
            chunks.push(make_chunk(document_id, index, text, &offsets, start, total, overlap));
            break;
        }

        let hard_end = start + params.size;
        let end = find_boundary(&chars, hard_end, window).unwrap_or(hard_end);
        chunks.push(make_chunk(document_id, index, text, &offsets, start, end, overlap));
        start = end - params.overlap;
    }

    chunks
}

/// Drop chunks with no visible text and renumber the rest densely.
///
/// Long whitespace runs (page gaps in extracted PDFs) can fill a whole chunk.
/// The overlap of each kept chunk is recomputed against the previous kept one.
pub fn drop_blank_chunks(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut kept: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for mut chunk in chunks {
        if chunk.text.trim().is_empty() {
            continue;
        }
        let index = kept.len();
        chunk.overlap = kept
            .last()
            .map_or(0, |prev| prev.end.saturating_sub(chunk.start));
        if chunk.index != index {
            chunk.index = index;
            chunk.id = chunk_id(&chunk.document_id, index);
        }
        kept.push(chunk);
    }
    kept
}

fn chunk_id(document_id: &str, index: usize) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}#{}", document_id, index).as_bytes(),
    )
    .to_string()
}

#[derive(Clone, Copy)]
enum Boundary {
    Paragraph,
    Line,
    Space,
}

/// Latest cut position in `[hard_end - window, hard_end]` of the strongest
/// boundary class present. `hard_end` is always strictly inside the text.
fn find_boundary(chars: &[char], hard_end: usize, window: usize) -> Option<usize> {
    if window == 0 {
        return None;
    }
    let lo = hard_end - window;
    for class in [Boundary::Paragraph, Boundary::Line, Boundary::Space] {
        if let Some(pos) = (lo..=hard_end).rev().find(|&p| is_boundary(chars, p, class)) {
            return Some(pos);
        }
    }
    None
}

/// Whether cutting before `chars[pos]` lands on a boundary of `class`.
fn is_boundary(chars: &[char], pos: usize, class: Boundary) -> bool {
    if pos == 0 || pos >= chars.len() {
        return false;
    }
    let before = chars[pos - 1];
    let after = chars[pos];
    match class {
        Boundary::Paragraph => pos >= 2 && before == '\n' && chars[pos - 2] == '\n',
        Boundary::Line => before == '\n',
        Boundary::Space => before.is_whitespace() || after.is_whitespace(),
    }
}

fn make_chunk(
    document_id: &str,
    index: usize,
    text: &str,
    offsets: &[usize],
    start: usize,
    end: usize,
    overlap: usize,
) -> Chunk {
    Chunk {
        id: chunk_id(document_id, index),
        document_id: document_id.to_string(),
        index,
        text: text[offsets[start]..offsets[end]].to_string(),
        start,
        end,
        overlap,
    }
}
