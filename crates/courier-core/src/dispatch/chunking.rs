const FENCE: &str = "```";

/// Split text into parts of at most `max_chars` characters (plus a closing
/// fence when a code block straddles the split).
///
/// Prefers the last line break past 70% of the limit, then the last space
/// past 80%, else splits hard at the limit. A code block left open by a
/// split is closed at the end of that part and re-opened in the next one.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(16);
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut remaining = text.to_string();

    while remaining.chars().count() > max_chars {
        let split_at = split_point(&remaining, max_chars);
        let (head, tail) = remaining.split_at(split_at);
        let mut part = head.to_string();

        let next = if part.matches(FENCE).count() % 2 == 1 {
            let info = open_fence_info(&part).to_string();
            part.push('\n');
            part.push_str(FENCE);
            format!("{}{}\n{}", FENCE, info, tail)
        } else {
            tail.to_string()
        };

        let trimmed = part.trim_end();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_string());
        }
        remaining = next;
    }

    let last = remaining.trim();
    if !last.is_empty() {
        parts.push(last.to_string());
    }

    parts
}

/// Info string (language tag) of the last fence opened in `part`
fn open_fence_info(part: &str) -> &str {
    part.rfind(FENCE)
        .map(|i| &part[i + FENCE.len()..])
        .and_then(|rest| rest.lines().next())
        .map(str::trim)
        .unwrap_or("")
}

/// Byte offset to split at; always on a char boundary and past zero
fn split_point(text: &str, max_chars: usize) -> usize {
    let limit = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let window = &text[..limit];

    if let Some(nl) = window.rfind('\n') {
        if window[..nl].chars().count() * 10 > max_chars * 7 {
            return nl + 1;
        }
    }
    if let Some(sp) = window.rfind(' ') {
        if window[..sp].chars().count() * 10 > max_chars * 8 {
            return sp + 1;
        }
    }
    limit
}
