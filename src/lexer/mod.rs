use crate::lexer::cursor::Cursor;
use crate::symbol::Span;

pub mod cursor;

/// A non-blank source line with its `//` comment stripped and surrounding whitespace trimmed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SourceLine<'a> {
    /// 1-based line number
    pub number: usize,
    pub text: &'a str,
    pub span: Span,
}

/// Piece of a line, such as a mnemonic or a single operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token<'a> {
    pub text: &'a str,
    pub span: Span,
}

/// Instruction line split into its mnemonic and comma separated operands.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Statement<'a> {
    pub mnemonic: Token<'a>,
    pub operands: Vec<Token<'a>>,
}

/// Iterate over every line that carries something other than whitespace or a comment.
pub fn lines(src: &str) -> impl Iterator<Item = SourceLine<'_>> + '_ {
    let mut offs = 0;
    src.split('\n').enumerate().filter_map(move |(i, raw)| {
        let start = offs;
        offs += raw.len() + 1;

        let code = match raw.find("//") {
            Some(idx) => &raw[..idx],
            None => raw,
        };
        let text = code.trim();
        if text.is_empty() {
            return None;
        }
        let lead = code.len() - code.trim_start().len();
        Some(SourceLine {
            number: i + 1,
            text,
            span: Span::new(start + lead, text.len()),
        })
    })
}

impl<'a> SourceLine<'a> {
    /// Label declared by this line, i.e. everything before a trailing `:`.
    pub fn label(&self) -> Option<Token<'a>> {
        let name = self.text.strip_suffix(':')?;
        let trimmed = name.trim();
        let lead = name.len() - name.trim_start().len();
        Some(Token {
            text: trimmed,
            span: Span::new(self.span.offs() + lead, trimmed.len()),
        })
    }

    /// Split into a mnemonic (first whitespace delimited word) and operands.
    pub fn statement(&self) -> Statement<'a> {
        let mut cur = Cursor::new(self.text, self.span.offs());
        let (text, span) = cur.take_while(|c| !c.is_whitespace());
        let mnemonic = Token { text, span };
        cur.skip_whitespace();

        let mut operands = Vec::new();
        if !cur.is_eof() {
            loop {
                let (raw, raw_span) = cur.take_while(|c| c != ',');
                operands.push(trim_token(raw, raw_span));
                if cur.is_eof() {
                    break;
                }
                // Comma
                cur.bump();
            }
        }
        Statement { mnemonic, operands }
    }
}

fn trim_token(raw: &str, span: Span) -> Token<'_> {
    let text = raw.trim();
    let lead = raw.len() - raw.trim_start().len();
    Token {
        text,
        span: Span::new(span.offs() + lead, text.len()),
    }
}
