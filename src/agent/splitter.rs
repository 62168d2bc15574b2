use serde::Serialize;
use tracing::warn;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineRange {
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub lines: LineRange,
}

/// Splits on paragraphs, then lines, then words, then characters until every
/// piece fits `chunk_size`, re-merging neighbours with `chunk_overlap` carried over.
/// Sizes are in characters.
#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    /// Like [`split_text`](Self::split_text) but records which source lines each chunk spans.
    pub fn create_chunks(&self, text: &str) -> Vec<Chunk> {
        let mut search_from = 0;
        self.split_text(text)
            .into_iter()
            .map(|piece| {
                let start = text[search_from..]
                    .find(piece.as_str())
                    .map(|pos| pos + search_from)
                    .or_else(|| text.find(piece.as_str()));

                let lines = match start {
                    Some(start) => {
                        search_from = start + piece.chars().next().map_or(1, char::len_utf8);
                        let from = 1 + text[..start].matches('\n').count();
                        LineRange {
                            from,
                            to: from + piece.matches('\n').count(),
                        }
                    }
                    None => LineRange { from: 1, to: 1 },
                };

                Chunk { text: piece, lines }
            })
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (position, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, sep)| sep.is_empty() || text.contains(**sep))
            .map(|(i, sep)| (i, *sep))
            .unwrap_or((separators.len().saturating_sub(1), ""));
        let remaining = &separators[(position + 1).min(separators.len())..];

        let splits: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut output = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();
        for split in splits {
            if char_len(split) < self.chunk_size {
                fitting.push(split);
                continue;
            }

            if !fitting.is_empty() {
                output.extend(self.merge_splits(&fitting, separator));
                fitting.clear();
            }
            if remaining.is_empty() {
                output.push(split.to_string());
            } else {
                output.extend(self.split_recursive(split, remaining));
            }
        }
        if !fitting.is_empty() {
            output.extend(self.merge_splits(&fitting, separator));
        }
        output
    }

    fn merge_splits(&self, splits: &[&str], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut docs = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for split in splits {
            let len = char_len(split);
            let joiner = if current.is_empty() { 0 } else { separator_len };

            if total + len + joiner > self.chunk_size {
                if total > self.chunk_size {
                    warn!(
                        "Created a chunk of size {}, which is longer than the specified {}",
                        total, self.chunk_size
                    );
                }
                if !current.is_empty() {
                    push_joined(&mut docs, &current, separator);

                    loop {
                        let joiner = if current.is_empty() { 0 } else { separator_len };
                        let above_overlap = total > self.chunk_overlap;
                        let still_too_big = total > 0 && total + len + joiner > self.chunk_size;
                        if !(above_overlap || still_too_big) {
                            break;
                        }
                        let Some(first) = current.first() else {
                            break;
                        };
                        let trailing = if current.len() > 1 { separator_len } else { 0 };
                        total -= char_len(first) + trailing;
                        current.remove(0);
                    }
                }
            }

            let joiner = if current.is_empty() { 0 } else { separator_len };
            current.push(split);
            total += len + joiner;
        }

        push_joined(&mut docs, &current, separator);
        docs
    }
}

fn push_joined(docs: &mut Vec<String>, parts: &[&str], separator: &str) {
    let joined = parts.join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let splitter = TextSplitter::new(100, 10);
        assert_eq!(splitter.split_text("  hello world  "), vec!["hello world"]);
        assert!(splitter.split_text("").is_empty());
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let splitter = TextSplitter::new(20, 0);
        let text = "first paragraph\n\nsecond paragraph\n\nthird";
        assert_eq!(
            splitter.split_text(text),
            vec!["first paragraph", "second paragraph", "third"]
        );
    }

    #[test]
    fn carries_overlap_between_word_chunks() {
        let splitter = TextSplitter::new(10, 4);
        let chunks = splitter.split_text("aa bb cc dd ee ff");
        assert_eq!(chunks, vec!["aa bb cc", "cc dd ee", "ee ff"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn falls_back_to_characters_for_long_words() {
        let splitter = TextSplitter::new(4, 0);
        assert_eq!(splitter.split_text("abcdefghij"), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let splitter = TextSplitter::new(3, 0);
        assert_eq!(splitter.split_text("ééé èèè"), vec!["ééé", "èèè"]);
    }

    #[test]
    fn chunks_record_line_spans() {
        let splitter = TextSplitter::new(12, 0);
        let text = "line one\nline two\n\nline four";
        let chunks = splitter.create_chunks(text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "line one");
        assert_eq!(chunks[0].lines, LineRange { from: 1, to: 1 });
        assert_eq!(chunks[1].lines, LineRange { from: 2, to: 2 });
        assert_eq!(chunks[2].text, "line four");
        assert_eq!(chunks[2].lines, LineRange { from: 4, to: 4 });
    }
}
