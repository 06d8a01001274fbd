//! Minimal SQL tokenizer used by the statement rules.
//!
//! Comments are dropped. String literals and quoted identifiers are kept as
//! single tokens so that `;`, keywords, or comment markers inside them never
//! leak into the rule checks. Unterminated literals and comments run to the
//! end of input.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Bare word: keyword or identifier
    Word,
    /// `"name"`, `` `name` `` or `[name]`
    QuotedIdent,
    /// `'text'`
    StringLit,
    Number,
    /// Any other single non-whitespace character
    Symbol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    /// Source text of the token, quotes included
    pub text: &'a str,
    /// Byte offset of the token in the source
    pub start: usize,
}

impl<'a> Token<'a> {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }

    pub fn is_symbol(&self, c: char) -> bool {
        self.kind == TokenKind::Symbol && self.text.starts_with(c)
    }

    /// Case-insensitive keyword match on a bare word
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(word)
    }

    /// Identifier name with quoting removed
    pub fn ident_name(&self) -> Option<String> {
        match self.kind {
            TokenKind::Word => Some(self.text.to_string()),
            TokenKind::QuotedIdent => {
                let mut chars = self.text.chars();
                let open = chars.next()?;
                let close = if open == '[' { ']' } else { open };
                let body = chars.as_str();
                let inner = body.strip_suffix(close).unwrap_or(body);
                let doubled: String = [close, close].iter().collect();
                Some(inner.replace(&doubled, &close.to_string()))
            }
            _ => None,
        }
    }
}

pub fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Split `sql` into tokens, skipping whitespace and comments.
pub fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut chars = sql.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        // -- line comment
        if c == '-' && bytes.get(start + 1) == Some(&b'-') {
            for (_, ch) in chars.by_ref() {
                if ch == '\n' {
                    break;
                }
            }
            continue;
        }

        // /* block comment */
        if c == '/' && bytes.get(start + 1) == Some(&b'*') {
            chars.next();
            chars.next();
            let mut prev = '\0';
            for (_, ch) in chars.by_ref() {
                if prev == '*' && ch == '/' {
                    break;
                }
                prev = ch;
            }
            continue;
        }

        let (kind, end) = match c {
            '\'' => (TokenKind::StringLit, scan_quoted(sql, start, '\'')),
            '"' => (TokenKind::QuotedIdent, scan_quoted(sql, start, '"')),
            '`' => (TokenKind::QuotedIdent, scan_quoted(sql, start, '`')),
            '[' => (TokenKind::QuotedIdent, scan_until(sql, start, ']')),
            c if c.is_ascii_digit() => (
                TokenKind::Number,
                scan_while(sql, start, |ch| ch.is_ascii_alphanumeric() || ch == '.'),
            ),
            c if is_ident_char(c) => (TokenKind::Word, scan_while(sql, start, is_ident_char)),
            c => (TokenKind::Symbol, start + c.len_utf8()),
        };

        tokens.push(Token {
            kind,
            text: &sql[start..end],
            start,
        });

        while let Some(&(idx, _)) = chars.peek() {
            if idx >= end {
                break;
            }
            chars.next();
        }
    }

    tokens
}

/// Quoted run where a doubled quote escapes itself. Returns the end offset.
fn scan_quoted(sql: &str, start: usize, quote: char) -> usize {
    let mut iter = sql[start + 1..].char_indices().peekable();
    while let Some((offset, ch)) = iter.next() {
        if ch == quote {
            if matches!(iter.peek(), Some((_, next)) if *next == quote) {
                iter.next();
                continue;
            }
            return start + 1 + offset + ch.len_utf8();
        }
    }
    sql.len()
}

fn scan_until(sql: &str, start: usize, close: char) -> usize {
    match sql[start + 1..].find(close) {
        Some(offset) => start + 1 + offset + close.len_utf8(),
        None => sql.len(),
    }
}

fn scan_while(sql: &str, start: usize, pred: impl Fn(char) -> bool) -> usize {
    sql[start..]
        .char_indices()
        .find(|(_, ch)| !pred(*ch))
        .map_or(sql.len(), |(offset, _)| start + offset)
}

/// Uppercased bare words in the raw text, comments and literals included.
pub fn raw_words(sql: &str) -> impl Iterator<Item = String> + '_ {
    sql.split(|c: char| !is_ident_char(c))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_uppercase())
}
