use crate::error::IngestError;
use regex::Regex;

const FOOTNOTE_PATTERN: &str = r"\[\s*\d+\s*\]";
/// Matched anywhere, including inside longer words: "Footnotes" cuts at "notes".
const BOILERPLATE_PATTERN: &str = r"(?i)references|external\s+links|see\s+also|notes";
const CHAPTER_PATTERN: &str = r"Chapter\s+\d+\s*:\s*";
const EMPTY_BRACKETS: &str = "[]";
const ZERO_WIDTH: [char; 4] = ['\u{200b}', '\u{200c}', '\u{200d}', '\u{feff}'];

/// Collapses every run of whitespace (including non-breaking spaces) to one space.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strips wiki-style artifacts from a chunk of text.
///
/// A single pass removes footnote markers, cuts everything from the first
/// boilerplate header onwards, drops zero-width characters and chapter
/// headings, then collapses whitespace. Passes repeat until the text stops
/// changing, so `clean(clean(x)) == clean(x)`.
#[derive(Debug, Clone)]
pub struct TextCleaner {
    footnote: Regex,
    boilerplate: Regex,
    chapter: Regex,
}

impl TextCleaner {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            footnote: Regex::new(FOOTNOTE_PATTERN)?,
            boilerplate: Regex::new(BOILERPLATE_PATTERN)?,
            chapter: Regex::new(CHAPTER_PATTERN)?,
        })
    }

    pub fn clean(&self, text: &str) -> String {
        let mut current = self.clean_once(text);
        loop {
            let next = self.clean_once(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn clean_once(&self, text: &str) -> String {
        let without_footnotes = self.footnote.replace_all(text, "");

        let body = match self.boilerplate.find(&without_footnotes) {
            Some(found) => &without_footnotes[..found.start()],
            None => &without_footnotes[..],
        };

        let visible = body
            .chars()
            .filter(|character| !ZERO_WIDTH.contains(character))
            .map(|character| if character == '\u{a0}' { ' ' } else { character })
            .collect::<String>();

        let without_chapters = self.chapter.replace_all(&visible, "");
        let without_brackets = without_chapters.replace(EMPTY_BRACKETS, "");

        normalize_whitespace(&without_brackets)
    }
}
