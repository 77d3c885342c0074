//! Trim meeting notes down to the part worth extracting from.

/// Heading markers, most useful first. The earliest occurrence of any of
/// them anchors the window.
pub const HEADING_MARKERS: &[&str] = &[
    "action items",
    "next steps",
    "follow-ups",
    "follow ups",
    "takeaways",
    "decisions",
    "summary",
];

/// Byte offset of the earliest heading marker, matched case-insensitively.
pub fn find_heading(text: &str) -> Option<usize> {
    // ASCII lowering keeps byte offsets aligned with `text`.
    let lowered = text.to_ascii_lowercase();
    HEADING_MARKERS
        .iter()
        .filter_map(|marker| lowered.find(marker))
        .min()
}

/// Reduce `text` to at most `max_chars` bytes centred on the action-oriented
/// part of the notes.
///
/// With a heading marker present the window starts `context_before` bytes
/// ahead of it (pulled back to the start of that line). Without one the
/// head of the document is kept, cut at a word boundary.
pub fn simplify_notes_for_extraction(text: &str, max_chars: usize, context_before: usize) -> String {
    let normalized = text.replace("\r\n", "\n");
    let trimmed = normalized.trim();
    if trimmed.is_empty() || max_chars == 0 {
        return String::new();
    }

    match find_heading(trimmed) {
        Some(heading_at) => {
            let mut start = floor_char_boundary(trimmed, heading_at.saturating_sub(context_before));
            start = trimmed[..start].rfind('\n').map(|nl| nl + 1).unwrap_or(0);
            // The line pull-back must not push the heading out of the window.
            if heading_at - start >= max_chars {
                start = floor_char_boundary(trimmed, heading_at);
            }
            let end = floor_char_boundary(trimmed, start.saturating_add(max_chars));
            trimmed[start..end].trim().to_string()
        }
        None if trimmed.len() <= max_chars => trimmed.to_string(),
        None => {
            let end = floor_char_boundary(trimmed, max_chars);
            let head = &trimmed[..end];
            match head.rfind(char::is_whitespace) {
                Some(last_space) if last_space > 0 => head[..last_space].trim().to_string(),
                _ => head.trim().to_string(),
            }
        }
    }
}

/// Largest char boundary at or below `index`, clamped to the string length.
fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
