use std::sync::LazyLock;

use regex::Regex;

/// Selection cursor the agent draws next to the highlighted option
pub const MARKER_GLYPH: char = '❯';

/// One numbered option line, optionally inside a box border and optionally
/// carrying the selection cursor.
static OPTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\s│┃|]*(❯)?\s*(\d{1,2})\.\s+(.*?)[\s│┃|]*$").expect("valid option regex")
});

struct OptionLine {
    marked: bool,
    number: usize,
    text: String,
}

fn parse_option_line(line: &str) -> Option<OptionLine> {
    let caps = OPTION_LINE.captures(line)?;
    let text = caps.get(3)?.as_str().trim().to_string();
    if text.is_empty() {
        return None;
    }
    Some(OptionLine {
        marked: caps.get(1).is_some(),
        number: caps.get(2)?.as_str().parse().ok()?,
        text,
    })
}

/// Find a permission prompt in a pane buffer.
///
/// Looks for the most recent line carrying the marker glyph in front of a
/// numbered option, then collects the contiguous run of numbered lines
/// around it. The run must be numbered 1..=n with n >= 2.
pub fn detect_prompt(buffer: &str) -> Option<Vec<String>> {
    let lines: Vec<&str> = buffer.lines().collect();

    let marked_idx = lines.iter().rposition(|line| {
        parse_option_line(line)
            .map(|opt| opt.marked)
            .unwrap_or(false)
    })?;

    let mut start = marked_idx;
    while start > 0 && parse_option_line(lines[start - 1]).is_some() {
        start -= 1;
    }
    let mut end = marked_idx;
    while end + 1 < lines.len() && parse_option_line(lines[end + 1]).is_some() {
        end += 1;
    }

    let options: Vec<OptionLine> = lines[start..=end]
        .iter()
        .filter_map(|line| parse_option_line(line))
        .collect();

    let numbered_in_order = options
        .iter()
        .enumerate()
        .all(|(i, opt)| opt.number == i + 1);
    if options.len() < 2 || !numbered_in_order {
        return None;
    }

    Some(options.into_iter().map(|opt| opt.text).collect())
}
