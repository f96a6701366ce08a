// Loosely modelled on `rustc_lexer`'s cursor, reduced to what a line-oriented assembler needs.
// See https://doc.rust-lang.org/beta/nightly-rustc/src/rustc_lexer/cursor.rs.html

use crate::symbol::Span;

/// Forward-only scanner over one source line that remembers where it is in the whole file.
#[derive(Clone)]
pub struct Cursor<'a> {
    /// Byte offset of `chars` within the source file
    base: usize,
    /// Index that the cursor is pointing to in `chars`
    curr_pt: usize,
    chars: &'a str,
}

impl<'a> Cursor<'a> {
    pub fn new(input: &'a str, base: usize) -> Cursor<'a> {
        Cursor {
            base,
            curr_pt: 0,
            chars: input,
        }
    }

    /// Line is finished
    pub fn is_eof(&self) -> bool {
        self.curr_pt >= self.chars.len()
    }

    /// Return slice of input starting at the current point of the cursor
    pub fn at_curr_pt(&self) -> &'a str {
        &self.chars[self.curr_pt..]
    }

    /// Move cursor ahead in the input by given amount of bytes
    pub fn advance(&mut self, amt: usize) {
        self.curr_pt = (self.curr_pt + amt).min(self.chars.len());
    }

    /// Advance past the next character
    pub fn bump(&mut self) {
        let width = self.at_curr_pt().chars().next().map_or(0, char::len_utf8);
        self.advance(width)
    }

    /// Returns current position relative to the whole file
    pub fn curr_pt(&self) -> usize {
        self.base + self.curr_pt
    }

    pub fn skip_whitespace(&mut self) {
        self.take_while(char::is_whitespace);
    }

    /// Consume characters while `pred` holds, returning them with their location.
    pub fn take_while(&mut self, pred: impl Fn(char) -> bool) -> (&'a str, Span) {
        let rest = self.at_curr_pt();
        let len = rest.find(|c: char| !pred(c)).unwrap_or(rest.len());
        let span = Span::new(self.curr_pt(), len);
        self.advance(len);
        (&rest[..len], span)
    }
}
