/// Fence labels whose body is worth decoding. An empty label is a bare fence.
const STRUCTURED_LABELS: [&str; 4] = ["", "yaml", "yml", "json"];

/// Bodies of fenced blocks in order of appearance.
///
/// Any line starting with three backticks opens a block whatever its label, and the next such
/// line closes it. Only blocks labelled yaml, yml, json or left bare are returned. A trailing
/// fence that was opened but never closed (truncated output) comes last.
pub fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut open: Option<(bool, usize)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let Some(rest) = line.trim_start().strip_prefix("```") else {
            continue;
        };
        match open.take() {
            Some((structured, body_start)) => {
                if structured {
                    blocks.push(&text[body_start..start]);
                }
            }
            None => open = Some((is_structured(rest), offset)),
        }
    }

    if let Some((true, body_start)) = open {
        let body = &text[body_start..];
        if !body.trim().is_empty() {
            blocks.push(body);
        }
    }
    blocks
}

fn is_structured(label: &str) -> bool {
    let label = label.split_whitespace().next().unwrap_or("");
    STRUCTURED_LABELS
        .iter()
        .any(|known| label.eq_ignore_ascii_case(known))
}

/// Strips blank edge lines and the whitespace prefix shared by every non-blank line.
pub fn dedent(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    let (Some(first), Some(last)) = (first, last) else {
        return String::new();
    };
    let lines = &lines[first..=last];

    let prefix = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| leading_whitespace(l))
        .reduce(common_prefix)
        .unwrap_or("");

    lines
        .iter()
        .map(|l| l.strip_prefix(prefix).unwrap_or_else(|| l.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn leading_whitespace(line: &str) -> &str {
    let end = line
        .char_indices()
        .find(|(_, c)| *c != ' ' && *c != '\t')
        .map_or(line.len(), |(i, _)| i);
    &line[..end]
}

fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let len = a
        .bytes()
        .zip(b.bytes())
        .take_while(|(x, y)| x == y)
        .count();
    &a[..len]
}
