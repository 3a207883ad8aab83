//! Sentence chunking of persona speech.

const TERMINALS: &[char] = &['!', '?', '.', '！', '？', '…', '‥', '。', '｡'];

const PERIODS: &[char] = &['.', '。', '｡'];

const BRACKETS: &[(char, char)] = &[
    ('「', '」'),
    ('『', '』'),
    ('（', '）'),
    ('(', ')'),
    ('【', '】'),
    ('［', '］'),
    ('[', ']'),
    ('｛', '｝'),
    ('{', '}'),
    ('〈', '〉'),
    ('《', '》'),
    ('“', '”'),
];

/// Split speech into independently postable chunks.
///
/// A terminal mark ends a chunk unless it sits inside brackets or is
/// immediately followed by another terminal mark. A lone trailing period is
/// dropped from each chunk; empty chunks are discarded.
pub fn split_into_chunks(speech: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut chars = speech.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        if BRACKETS.iter().any(|(open, _)| *open == c) {
            depth += 1;
        } else if BRACKETS.iter().any(|(_, close)| *close == c) {
            depth = depth.saturating_sub(1);
        } else if depth == 0
            && TERMINALS.contains(&c)
            && !chars.peek().is_some_and(|next| TERMINALS.contains(next))
        {
            chunks.push(std::mem::take(&mut current));
        }
    }
    chunks.push(current);

    chunks
        .iter()
        .map(|chunk| strip_single_trailing_period(chunk.trim()))
        .filter(|chunk| !chunk.is_empty())
        .map(str::to_string)
        .collect()
}

/// Drop one trailing `.`/`。`/`｡` unless it ends a run of periods.
pub fn strip_single_trailing_period(chunk: &str) -> &str {
    let mut tail = chunk.chars().rev();
    match (tail.next(), tail.next()) {
        (Some(last), previous)
            if PERIODS.contains(&last) && !previous.is_some_and(|c| PERIODS.contains(&c)) =>
        {
            &chunk[..chunk.len() - last.len_utf8()]
        }
        _ => chunk,
    }
}
