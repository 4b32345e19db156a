//! Streaming extraction of OSC window-title sequences.
//!
//! The Claude CLI reports progress by resetting the terminal title
//! (`ESC ] 0 ; <title> BEL`). PTY reads split sequences at arbitrary byte
//! boundaries, so the extractor keeps state between calls and yields every
//! complete title in stream order. Bytes are never modified; this only
//! observes the stream.

use tracing::debug;

/// Longest OSC payload kept before the sequence is abandoned.
pub const MAX_OSC_LEN: usize = 4096;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    Osc,
    OscEscape,
}

/// Incremental OSC 0/2 title parser.
#[derive(Debug)]
pub struct OscTitleExtractor {
    state: State,
    payload: Vec<u8>,
}

impl Default for OscTitleExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl OscTitleExtractor {
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            payload: Vec::new(),
        }
    }

    /// Feeds a chunk and returns the titles completed within it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut titles = Vec::new();
        for &b in bytes {
            match self.state {
                State::Ground => {
                    if b == ESC {
                        self.state = State::Escape;
                    }
                }
                State::Escape => {
                    if b == b']' {
                        self.payload.clear();
                        self.state = State::Osc;
                    } else if b != ESC {
                        self.state = State::Ground;
                    }
                }
                State::Osc => match b {
                    BEL => {
                        if let Some(title) = self.finish() {
                            titles.push(title);
                        }
                    }
                    ESC => self.state = State::OscEscape,
                    _ => {
                        if self.payload.len() >= MAX_OSC_LEN {
                            debug!(len = self.payload.len(), "Abandoning oversized OSC sequence");
                            self.payload.clear();
                            self.state = State::Ground;
                        } else {
                            self.payload.push(b);
                        }
                    }
                },
                State::OscEscape => {
                    if b == b'\\' {
                        if let Some(title) = self.finish() {
                            titles.push(title);
                        }
                    } else {
                        // Unterminated OSC; this ESC starts a new sequence.
                        self.payload.clear();
                        self.state = if b == b']' { State::Osc } else { State::Ground };
                    }
                }
            }
        }
        titles
    }

    fn finish(&mut self) -> Option<String> {
        self.state = State::Ground;
        let payload = std::mem::take(&mut self.payload);
        let sep = payload.iter().position(|&b| b == b';')?;
        let (code, rest) = payload.split_at(sep);
        match code {
            b"0" | b"2" => {
                let title = String::from_utf8_lossy(rest.get(1..).unwrap_or_default());
                Some(title.into_owned())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bel_terminated_title() {
        let mut ex = OscTitleExtractor::new();
        let titles = ex.feed("hello\x1b]0;⠋ Thinking\x07world".as_bytes());
        assert_eq!(titles, vec!["⠋ Thinking".to_string()]);
    }

    #[test]
    fn test_st_terminated_title() {
        let mut ex = OscTitleExtractor::new();
        let titles = ex.feed("\x1b]2;✳ Done\x1b\\".as_bytes());
        assert_eq!(titles, vec!["✳ Done".to_string()]);
    }

    #[test]
    fn test_title_split_across_reads() {
        let mut ex = OscTitleExtractor::new();
        let bytes = "\x1b]0;⠋ Read src/a.rs\x07".as_bytes();
        let (a, b) = bytes.split_at(5); // inside the braille glyph
        assert!(ex.feed(a).is_empty());
        assert_eq!(ex.feed(b), vec!["⠋ Read src/a.rs".to_string()]);
    }

    #[test]
    fn test_multiple_titles_in_one_chunk_keep_order() {
        let mut ex = OscTitleExtractor::new();
        let titles = ex.feed("\x1b]0;⠋ Thinking\x07text\x1b]0;✳ Churned\x07".as_bytes());
        assert_eq!(titles, vec!["⠋ Thinking", "✳ Churned"]);
    }

    #[test]
    fn test_ignores_other_osc_codes_and_csi() {
        let mut ex = OscTitleExtractor::new();
        let titles = ex.feed(b"\x1b[31mred\x1b[0m\x1b]1;icon\x07\x1b]8;;http://x\x07");
        assert!(titles.is_empty());
    }

    #[test]
    fn test_oversized_payload_is_abandoned() {
        let mut ex = OscTitleExtractor::new();
        let mut bytes = b"\x1b]0;".to_vec();
        bytes.extend(std::iter::repeat(b'x').take(MAX_OSC_LEN + 10));
        bytes.push(BEL);
        assert!(ex.feed(&bytes).is_empty());
        assert_eq!(ex.feed(b"\x1b]0;ok\x07"), vec!["ok".to_string()]);
    }

    #[test]
    fn test_empty_title() {
        let mut ex = OscTitleExtractor::new();
        assert_eq!(ex.feed(b"\x1b]0;\x07"), vec![String::new()]);
    }
}
