//! Boundary-aware text chunker with overlap.
//!
//! Splits document text into passages no longer than a configured maximum,
//! cutting at the highest-priority boundary present in the current window:
//! paragraph break, line break, sentence punctuation, clause punctuation,
//! whitespace, then a raw cut. Consecutive chunks share roughly `overlap`
//! characters across the cut so that context is not lost at chunk edges.
//!
//! Chunks are exact substrings of the input. Concatenating them with the
//! overlapping prefixes removed reconstructs the source text.
//!
//! [`chunk_markdown`] first splits on H1–H3 heading boundaries and tags each
//! piece with its heading path (e.g. `"Setup > Installation"`).

/// Cut-point candidates in priority order. Each entry is searched for its
/// last occurrence in the window before falling through to the next.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " "];

/// Split text into overlapping chunks of at most `max_size` bytes.
///
/// Empty or whitespace-only input yields an empty vector. A chunk may exceed
/// `max_size` only when a single code point is itself wider than the limit.
pub fn chunk_text(text: &str, max_size: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let max_size = max_size.max(1);
    if text.len() <= max_size {
        return vec![text.to_string()];
    }
    // Cap the overlap so every step still makes forward progress.
    let overlap = overlap.min(max_size / 2);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < text.len() {
        let mut end = floor_char_boundary(text, (start + max_size).min(text.len()));
        if end <= start {
            end = ceil_char_boundary(text, start + 1);
        }
        if end >= text.len() {
            chunks.push(text[start..].to_string());
            break;
        }

        let cut = match split_point(&text[start..end]) {
            Some(p) => start + p,
            None => end,
        };
        chunks.push(text[start..cut].to_string());

        let mut next = ceil_char_boundary(text, cut.saturating_sub(overlap));
        if next <= start {
            next = cut;
        }
        start = next;
    }
    chunks
}

/// Split markdown into `(chunk, heading_path)` pairs.
///
/// Heading lines (`#`, `##`, `###`) open a new section and are folded into
/// the heading path rather than the chunk content; each section then goes
/// through the same size/overlap splitting as [`chunk_text`].
pub fn chunk_markdown(text: &str, max_size: usize, overlap: usize) -> Vec<(String, String)> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut sections: Vec<(String, String)> = Vec::new();
    let mut headings: [Option<String>; 3] = [None, None, None];
    let mut body = String::new();

    for line in text.lines() {
        if let Some((level, title)) = heading_level(line) {
            push_section(&mut sections, &headings, &mut body);
            headings[level - 1] = Some(title.to_string());
            for slot in headings.iter_mut().skip(level) {
                *slot = None;
            }
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }
    push_section(&mut sections, &headings, &mut body);

    let mut out = Vec::new();
    for (path, section) in sections {
        for piece in chunk_text(&section, max_size, overlap) {
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                out.push((trimmed.to_string(), path.clone()));
            }
        }
    }
    out
}

/// Find the cut position inside `window`: the end of the last occurrence of
/// the highest-priority separator present, or `None` for a raw cut.
fn split_point(window: &str) -> Option<usize> {
    for sep in SEPARATORS {
        if let Some(pos) = window.rfind(sep) {
            let cut = pos + sep.len();
            if cut > 0 {
                return Some(cut);
            }
        }
    }
    None
}

fn heading_level(line: &str) -> Option<(usize, &str)> {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if (1..=3).contains(&hashes) {
        if let Some(title) = line[hashes..].strip_prefix(' ') {
            return Some((hashes, title.trim()));
        }
    }
    None
}

fn heading_path(headings: &[Option<String>; 3]) -> String {
    headings
        .iter()
        .flatten()
        .cloned()
        .collect::<Vec<_>>()
        .join(" > ")
}

fn push_section(
    sections: &mut Vec<(String, String)>,
    headings: &[Option<String>; 3],
    body: &mut String,
) {
    if body.trim().is_empty() {
        body.clear();
    } else {
        sections.push((heading_path(headings), std::mem::take(body)));
    }
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}
