use crate::cleaning::TextCleaner;
use crate::error::IngestError;
use crate::models::{Chunk, ChunkingConfig};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Boundaries tried in order: paragraph, line, word, then single characters.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
    cleaner: TextCleaner,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            config,
            cleaner: TextCleaner::new()?,
        })
    }

    /// Splits `text` into overlapping windows of at most `chunk_size` characters,
    /// preferring paragraph, line and word boundaries over hard cuts.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    /// Splits and cleans `raw`. Windows that clean down to nothing are dropped.
    pub fn chunk(&self, raw: &str) -> Vec<String> {
        if raw.trim().is_empty() {
            warn!("no content to chunk");
            return Vec::new();
        }

        let windows = self.split(raw);
        let window_count = windows.len();
        let cleaned = windows
            .into_iter()
            .map(|window| self.cleaner.clean(&window))
            .filter(|window| !window.is_empty())
            .collect::<Vec<_>>();

        debug!(
            windows = window_count,
            kept = cleaned.len(),
            "split text into chunks"
        );
        cleaned
    }

    pub fn chunk_document(&self, document_id: &str, raw: &str) -> Vec<Chunk> {
        self.chunk(raw)
            .into_iter()
            .enumerate()
            .map(|(position, text)| Chunk {
                document_id: document_id.to_string(),
                position,
                text,
            })
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (index, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, separator)| separator.is_empty() || text.contains(**separator))
            .map(|(index, separator)| (index, *separator))
            .unwrap_or((separators.len(), ""));
        let finer = separators.get(index + 1..).unwrap_or_default();

        let mut finished = Vec::new();
        let mut pending = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.config.chunk_size {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                finished.extend(self.merge(&pending));
                pending.clear();
            }

            if finer.is_empty() {
                finished.push(piece.to_string());
            } else {
                finished.extend(self.split_recursive(piece, finer));
            }
        }

        if !pending.is_empty() {
            finished.extend(self.merge(&pending));
        }

        finished
    }

    /// Packs small pieces into windows, carrying up to `chunk_overlap`
    /// characters of trailing pieces into the next window.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let ChunkingConfig {
            chunk_size,
            chunk_overlap,
        } = self.config;

        let mut windows = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let length = char_len(piece);

            if total + length > chunk_size && !current.is_empty() {
                push_window(&current, &mut windows);

                while total > chunk_overlap || (total + length > chunk_size && total > 0) {
                    match current.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }

            current.push_back(piece);
            total += length;
        }

        push_window(&current, &mut windows);
        windows
    }
}

fn push_window(pieces: &VecDeque<&str>, windows: &mut Vec<String>) {
    let joined = pieces.iter().copied().collect::<String>();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        windows.push(trimmed.to_string());
    }
}

/// Splits before every occurrence of `separator`, so each piece after the
/// first starts with it. An empty separator yields single characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(at, character)| &text[at..at + character.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (at, _) in text.match_indices(separator) {
        if at > start {
            pieces.push(&text[start..at]);
        }
        start = at;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(chunk_size: usize, chunk_overlap: usize) -> Chunker {
        Chunker::new(ChunkingConfig {
            chunk_size,
            chunk_overlap,
        })
        .expect("valid config")
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let result = Chunker::new(ChunkingConfig {
            chunk_size: 10,
            chunk_overlap: 10,
        });
        assert!(matches!(result, Err(IngestError::InvalidChunkConfig(_))));

        let result = Chunker::new(ChunkingConfig {
            chunk_size: 0,
            chunk_overlap: 0,
        });
        assert!(matches!(result, Err(IngestError::InvalidChunkConfig(_))));
    }

    #[test]
    fn short_text_is_a_single_window() {
        let windows = chunker(100, 20).split("A short paragraph.");
        assert_eq!(windows, vec!["A short paragraph.".to_string()]);
    }

    #[test]
    fn windows_respect_the_size_bound() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        let windows = chunker(40, 10).split(&text);

        assert!(windows.len() > 1);
        for window in &windows {
            assert!(window.chars().count() <= 40, "window too long: {window:?}");
        }
    }

    #[test]
    fn consecutive_windows_overlap_on_word_boundaries() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";
        let windows = chunker(20, 10).split(text);

        assert!(windows.len() > 2);
        for pair in windows.windows(2) {
            let last_word = pair[0].split(' ').last().unwrap_or_default();
            assert!(
                pair[1].contains(last_word),
                "{:?} does not carry over {:?}",
                pair[1],
                last_word
            );
        }
    }

    #[test]
    fn paragraph_boundaries_are_preferred() {
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let windows = chunker(30, 5).split(text);
        assert_eq!(
            windows,
            vec![
                "First paragraph here.".to_string(),
                "Second paragraph here.".to_string()
            ]
        );
    }

    #[test]
    fn unbroken_text_falls_back_to_character_cuts() {
        let text = "x".repeat(25);
        let windows = chunker(10, 0).split(&text);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].len(), 10);
        assert_eq!(windows[2].len(), 5);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "é".repeat(30);
        let windows = chunker(8, 2).split(&text);
        for window in windows {
            assert!(window.chars().count() <= 8);
        }
    }

    #[test]
    fn empty_source_yields_no_chunks() {
        assert!(chunker(100, 50).chunk("   \n\t").is_empty());
    }

    #[test]
    fn chunks_are_cleaned_and_empty_ones_dropped() {
        let chunks = chunker(100, 10).chunk("Harry[1] lived  here.\n\nReferences\n\nLinks");
        assert_eq!(chunks, vec!["Harry lived here.".to_string()]);
    }

    #[test]
    fn document_chunks_carry_positions() {
        let chunks = chunker(20, 5).chunk_document("1.txt", "one two three four five six seven");
        assert!(chunks.len() > 1);
        for (expected, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.position, expected);
            assert_eq!(chunk.document_id, "1.txt");
        }
    }
}
