use mem_storage::ChunkParams;

use super::files::hash_text;

/// Size-bounded, line-overlapped fragment of one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    /// 1-based inclusive source-line range.
    pub line_start: usize,
    pub line_end: usize,
    /// SHA-256 of `content`, hex encoded.
    pub hash: String,
}

/// One line (or slice of an oversized line) queued for accumulation.
struct Segment {
    line: usize,
    text: String,
    chars: usize,
}

/// Split `content` into overlapping chunks.
///
/// Character budgets derive from the token-denominated settings:
/// `max_chars = max(min_chars, tokens * chars_per_token)` and
/// `overlap_chars = overlap * chars_per_token`. Deterministic for fixed
/// settings and content.
pub fn chunk(content: &str, params: &ChunkParams) -> Vec<Chunk> {
    if content.is_empty() {
        return Vec::new();
    }

    let max_chars = (params.tokens as usize * params.chars_per_token as usize)
        .max(params.min_chars as usize)
        .max(1);
    let overlap_chars = params.overlap as usize * params.chars_per_token as usize;

    let segments = split_segments(content, max_chars);

    let mut chunks = Vec::new();
    let mut current: Vec<Segment> = Vec::new();
    let mut current_chars = 0usize;

    for segment in segments {
        // Each kept entry reconstructs its trailing newline.
        let added = segment.chars + 1;

        if !current.is_empty() && current_chars + added > max_chars {
            chunks.push(flush(&current));

            if overlap_chars > 0 {
                let (carried, carried_chars) = carry_tail(current, overlap_chars);
                current = carried;
                current_chars = carried_chars;
            } else {
                current.clear();
                current_chars = 0;
            }
        }

        current_chars += added;
        current.push(segment);
    }

    if !current.is_empty() {
        chunks.push(flush(&current));
    }

    chunks
}

fn split_segments(content: &str, max_chars: usize) -> Vec<Segment> {
    let mut segments = Vec::new();

    for (index, line) in content.split('\n').enumerate() {
        let line_no = index + 1;
        let char_count = line.chars().count();

        if char_count <= max_chars {
            segments.push(Segment {
                line: line_no,
                text: line.to_string(),
                chars: char_count,
            });
            continue;
        }

        // Oversized line: slice into max_chars-character pieces, all tagged
        // with the same source line number.
        let chars: Vec<char> = line.chars().collect();
        for piece in chars.chunks(max_chars) {
            segments.push(Segment {
                line: line_no,
                text: piece.iter().collect(),
                chars: piece.len(),
            });
        }
    }

    segments
}

fn flush(entries: &[Segment]) -> Chunk {
    let content = entries
        .iter()
        .map(|segment| segment.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    Chunk {
        hash: hash_text(&content),
        line_start: entries.first().map(|segment| segment.line).unwrap_or(1),
        line_end: entries.last().map(|segment| segment.line).unwrap_or(1),
        content,
    }
}

/// Tail entries whose cumulative size first reaches `overlap_chars`, kept in
/// source order as the next chunk's prefix.
fn carry_tail(entries: Vec<Segment>, overlap_chars: usize) -> (Vec<Segment>, usize) {
    let mut carried: Vec<Segment> = Vec::new();
    let mut carried_chars = 0usize;

    for segment in entries.into_iter().rev() {
        carried_chars += segment.chars + 1;
        carried.push(segment);
        if carried_chars >= overlap_chars {
            break;
        }
    }

    carried.reverse();
    (carried, carried_chars)
}
