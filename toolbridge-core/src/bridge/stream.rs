//! Incremental tool-call block scanner
//!
//! Model output arrives in chunks that may split a `[TOOL_CALL]` or
//! `[/TOOL_CALL]` marker anywhere. [`ToolCallScanner`] is fed one chunk at a
//! time and only retains the unresolved trailing fragment: a partial marker or
//! the body of an open block. Text outside blocks is released as soon as it
//! cannot be the start of a marker.

use super::protocol::{TOOL_CALL_CLOSE, TOOL_CALL_OPEN};

/// Scanner position relative to the block markers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Plain text
    OutsideBlock,
    /// A prefix of the open marker has been seen
    PartialOpen,
    /// Between the markers
    InsideBlock,
    /// A prefix of the close marker has been seen inside a block
    PartialClose,
}

/// Output of the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// Visible text
    Text(String),
    /// Raw payload of a completed block, markers excluded
    Block(String),
}

/// Streaming splitter for tool-call blocks
#[derive(Debug, Clone)]
pub struct ToolCallScanner {
    state: ScanState,
    marker: String,
    block: String,
}

impl Default for ToolCallScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallScanner {
    pub fn new() -> Self {
        Self {
            state: ScanState::OutsideBlock,
            marker: String::new(),
            block: String::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Whether a block or partial marker is being held back
    pub fn is_holding(&self) -> bool {
        self.state != ScanState::OutsideBlock
    }

    /// Consume one chunk and return the events it completes, in order
    pub fn feed(&mut self, chunk: &str) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        let mut text = String::new();

        for c in chunk.chars() {
            self.step(c, &mut text, &mut events);
        }

        if !text.is_empty() {
            events.push(ScanEvent::Text(text));
        }
        events
    }

    /// End of input. A dangling partial open marker is released as text; an
    /// unterminated block is dropped.
    pub fn finish(&mut self) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        match self.state {
            ScanState::PartialOpen => {
                events.push(ScanEvent::Text(std::mem::take(&mut self.marker)));
            }
            ScanState::InsideBlock | ScanState::PartialClose => {
                tracing::debug!(len = self.block.len(), "Dropping unterminated tool call block");
            }
            ScanState::OutsideBlock => {}
        }
        *self = Self::new();
        events
    }

    // Both markers start with '[' and contain no other '[', so on a mismatch
    // the held fragment can never overlap a new marker start.
    fn step(&mut self, c: char, text: &mut String, events: &mut Vec<ScanEvent>) {
        match self.state {
            ScanState::OutsideBlock => {
                if TOOL_CALL_OPEN.starts_with(c) {
                    self.marker.push(c);
                    self.state = ScanState::PartialOpen;
                } else {
                    text.push(c);
                }
            }
            ScanState::PartialOpen => {
                self.marker.push(c);
                if self.marker == TOOL_CALL_OPEN {
                    self.marker.clear();
                    self.block.clear();
                    self.state = ScanState::InsideBlock;
                    if !text.is_empty() {
                        events.push(ScanEvent::Text(std::mem::take(text)));
                    }
                } else if !TOOL_CALL_OPEN.starts_with(self.marker.as_str()) {
                    self.marker.pop();
                    text.push_str(&self.marker);
                    self.marker.clear();
                    self.state = ScanState::OutsideBlock;
                    self.step(c, text, events);
                }
            }
            ScanState::InsideBlock => {
                if TOOL_CALL_CLOSE.starts_with(c) {
                    self.marker.push(c);
                    self.state = ScanState::PartialClose;
                } else {
                    self.block.push(c);
                }
            }
            ScanState::PartialClose => {
                self.marker.push(c);
                if self.marker == TOOL_CALL_CLOSE {
                    self.marker.clear();
                    events.push(ScanEvent::Block(std::mem::take(&mut self.block)));
                    self.state = ScanState::OutsideBlock;
                } else if !TOOL_CALL_CLOSE.starts_with(self.marker.as_str()) {
                    self.marker.pop();
                    self.block.push_str(&self.marker);
                    self.marker.clear();
                    self.state = ScanState::InsideBlock;
                    self.step(c, text, events);
                }
            }
        }
    }
}

#[cfg(test)]
mod stream_tests {
    use super::*;

    fn run(chunks: &[&str]) -> Vec<ScanEvent> {
        let mut scanner = ToolCallScanner::new();
        let mut events: Vec<ScanEvent> = chunks.iter().flat_map(|c| scanner.feed(c)).collect();
        events.extend(scanner.finish());
        merge_text(events)
    }

    fn merge_text(events: Vec<ScanEvent>) -> Vec<ScanEvent> {
        let mut merged: Vec<ScanEvent> = Vec::new();
        for event in events {
            match (merged.last_mut(), event) {
                (Some(ScanEvent::Text(prev)), ScanEvent::Text(next)) => prev.push_str(&next),
                (_, event) => merged.push(event),
            }
        }
        merged
    }

    #[test]
    fn test_single_chunk_block() {
        let events = run(&[r#"Let me check. [TOOL_CALL]{"name":"q"}[/TOOL_CALL] Done."#]);
        assert_eq!(
            events,
            vec![
                ScanEvent::Text("Let me check. ".to_string()),
                ScanEvent::Block(r#"{"name":"q"}"#.to_string()),
                ScanEvent::Text(" Done.".to_string()),
            ]
        );
    }

    #[test]
    fn test_markers_split_across_three_chunks() {
        let events = run(&[
            "Checking [TOO",
            r#"L_CALL]{"name":"q","params":{}}[/TOOL"#,
            "_CALL] ok",
        ]);
        assert_eq!(
            events,
            vec![
                ScanEvent::Text("Checking ".to_string()),
                ScanEvent::Block(r#"{"name":"q","params":{}}"#.to_string()),
                ScanEvent::Text(" ok".to_string()),
            ]
        );
    }

    #[test]
    fn test_partial_marker_held_back() {
        let mut scanner = ToolCallScanner::new();
        assert_eq!(scanner.feed("abc [TOOL_"), vec![ScanEvent::Text("abc ".to_string())]);
        assert_eq!(scanner.state(), ScanState::PartialOpen);
        assert!(scanner.is_holding());

        // The fragment turns out not to be a marker
        assert_eq!(scanner.feed("X]"), vec![ScanEvent::Text("[TOOL_X]".to_string())]);
        assert_eq!(scanner.state(), ScanState::OutsideBlock);
    }

    #[test]
    fn test_bracket_text_passes_through() {
        let events = run(&["array[0] and [[x]] and [/TOOL_CALL]"]);
        assert_eq!(
            events,
            vec![ScanEvent::Text("array[0] and [[x]] and [/TOOL_CALL]".to_string())]
        );
    }

    #[test]
    fn test_false_close_inside_block() {
        let events = run(&[r#"[TOOL_CALL]{"a":"[x]","b":"[/TOOL"}[/TOOL_CALL]"#]);
        assert_eq!(
            events,
            vec![ScanEvent::Block(r#"{"a":"[x]","b":"[/TOOL"}"#.to_string())]
        );
    }

    #[test]
    fn test_one_char_chunks() {
        let input = r#"hi [TOOL_CALL]{"name":"a"}[/TOOL_CALL][TOOL_CALL]{"name":"b"}[/TOOL_CALL]!"#;
        let chars: Vec<String> = input.chars().map(|c| c.to_string()).collect();
        let chunks: Vec<&str> = chars.iter().map(String::as_str).collect();

        assert_eq!(
            run(&chunks),
            vec![
                ScanEvent::Text("hi ".to_string()),
                ScanEvent::Block(r#"{"name":"a"}"#.to_string()),
                ScanEvent::Block(r#"{"name":"b"}"#.to_string()),
                ScanEvent::Text("!".to_string()),
            ]
        );
    }

    #[test]
    fn test_finish_flushes_partial_open_and_drops_open_block() {
        assert_eq!(run(&["tail [TOOL"]), vec![ScanEvent::Text("tail [TOOL".to_string())]);
        assert_eq!(
            run(&["text [TOOL_CALL]{\"name\":"]),
            vec![ScanEvent::Text("text ".to_string())]
        );
    }
}
