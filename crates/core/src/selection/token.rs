//! Lexer for the selection language.

use crate::selection::error::SelectionError;

/// A token with its byte span in the input string.
#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub span: (usize, usize),
}

/// Token types for the selection language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Logical operators and prefixes
    Or,
    And,
    Not,
    Within,
    Of,
    By,
    Residue,
    All,
    To,
    /// `periodic`/`pbc` (true) or `nonperiodic`/`nopbc` (false)
    Periodic(bool),
    // Text keywords
    Name,
    Resname,
    Tag,
    Chain,
    // Integer keywords
    Resid,
    Resindex,
    Index,
    // Numeric fields
    X,
    Y,
    Z,
    Beta,
    Occupancy,
    // Distance primitives
    Dist,
    Point,
    Vector,
    Plane,
    // Literals
    Integer(i64),
    Float(f64),
    Str(String),
    Regex(String),
    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    // End
    Eof,
}

impl Token {
    /// Keyword lookup, case-insensitive.
    fn keyword(word: &str) -> Option<Token> {
        let token = match word.to_ascii_lowercase().as_str() {
            "or" => Token::Or,
            "and" => Token::And,
            "not" => Token::Not,
            "within" => Token::Within,
            "of" => Token::Of,
            "by" => Token::By,
            "residue" | "res" => Token::Residue,
            "all" => Token::All,
            "to" => Token::To,
            "periodic" | "pbc" => Token::Periodic(true),
            "nonperiodic" | "nopbc" => Token::Periodic(false),
            "name" => Token::Name,
            "resname" => Token::Resname,
            "tag" => Token::Tag,
            "chain" => Token::Chain,
            "resid" => Token::Resid,
            "resindex" => Token::Resindex,
            "index" => Token::Index,
            "x" => Token::X,
            "y" => Token::Y,
            "z" => Token::Z,
            "beta" => Token::Beta,
            "occupancy" => Token::Occupancy,
            "dist" | "distance" => Token::Dist,
            "point" => Token::Point,
            "vector" => Token::Vector,
            "plane" => Token::Plane,
            _ => return None,
        };
        Some(token)
    }
}

/// Characters that always end the current word.
#[inline]
fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'+' | b'*' | b'/' | b'(' | b')' | b'-' | b'<' | b'>' | b'=' | b'"' | b'\''
    )
}

/// Alphanumeric text is a plain string, anything else is a regex.
fn text_token(text: &str) -> Token {
    if !text.is_empty() && text.chars().all(|c| c.is_alphanumeric()) {
        Token::Str(text.to_string())
    } else {
        Token::Regex(text.to_string())
    }
}

/// Lexer that tokenizes a selection expression string.
pub struct Lexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek_next(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>, SelectionError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let start = self.pos;
            if self.pos >= self.bytes.len() {
                tokens.push(SpannedToken {
                    token: Token::Eof,
                    span: (start, start),
                });
                break;
            }
            let ch = self.bytes[self.pos];
            let token = match ch {
                b'"' | b'\'' => self.lex_quoted(ch)?,
                b'+' => self.single(Token::Plus),
                b'-' => self.single(Token::Minus),
                b'*' => self.single(Token::Star),
                b'/' => self.single(Token::Slash),
                b'(' => self.single(Token::LParen),
                b')' => self.single(Token::RParen),
                b'>' => match self.peek_next() {
                    Some(b'=') => self.double(Token::Ge),
                    _ => self.single(Token::Gt),
                },
                b'<' => match self.peek_next() {
                    Some(b'=') => self.double(Token::Le),
                    Some(b'>') => self.double(Token::Ne),
                    _ => self.single(Token::Lt),
                },
                b'=' => match self.peek_next() {
                    Some(b'=') => self.double(Token::Eq),
                    _ => self.single(Token::Eq),
                },
                b'!' if self.peek_next() == Some(b'=') => self.double(Token::Ne),
                _ => self.lex_word(),
            };
            tokens.push(SpannedToken {
                token,
                span: (start, self.pos),
            });
        }
        Ok(tokens)
    }

    fn single(&mut self, token: Token) -> Token {
        self.pos += 1;
        token
    }

    fn double(&mut self, token: Token) -> Token {
        self.pos += 2;
        token
    }

    fn lex_quoted(&mut self, delim: u8) -> Result<Token, SelectionError> {
        let start = self.pos;
        let body_start = start + 1;
        let close = self.bytes[body_start..]
            .iter()
            .position(|&b| b == delim)
            .ok_or_else(|| SelectionError::syntax("Unterminated quote", start, self.input))?;
        let body = &self.input[body_start..body_start + close];
        self.pos = body_start + close + 1;
        Ok(text_token(body))
    }

    fn lex_word(&mut self) -> Token {
        let start = self.pos;
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            if b.is_ascii_whitespace() {
                break;
            }
            if b == b'!' && self.peek_next() == Some(b'=') {
                break;
            }
            if is_delimiter(b) {
                // Keep the minus of scientific notation such as 4.5e-5
                let exponent = b == b'-'
                    && self.pos >= start + 2
                    && matches!(self.bytes[self.pos - 1], b'e' | b'E')
                    && self.bytes[self.pos - 2].is_ascii_digit();
                if !exponent {
                    break;
                }
            }
            self.pos += 1;
        }
        classify_word(&self.input[start..self.pos])
    }
}

/// Keyword, then integer, then float, then string or regex.
fn classify_word(word: &str) -> Token {
    if let Some(token) = Token::keyword(word) {
        return token;
    }
    let numeric_start = word
        .bytes()
        .next()
        .map_or(false, |b| b.is_ascii_digit() || b == b'.');
    if numeric_start {
        if let Ok(i) = word.parse::<i64>() {
            return Token::Integer(i);
        }
        if let Ok(f) = word.parse::<f64>() {
            return Token::Float(f);
        }
    }
    text_token(word)
}

/// Tokenize a query string.
pub fn tokenize(input: &str) -> Result<Vec<SpannedToken>, SelectionError> {
    Lexer::new(input).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_basic_tokenize() {
        let tokens = tokenize("name CA").unwrap();
        assert_eq!(tokens.len(), 3); // Name, Str("CA"), Eof
        assert_eq!(tokens[0].token, Token::Name);
        assert!(matches!(&tokens[1].token, Token::Str(s) if s == "CA"));
        assert_eq!(tokens[1].span, (5, 7));
        assert_eq!(tokens[2].token, Token::Eof);
    }

    #[test]
    fn test_numeric_tokens() {
        assert_eq!(
            kinds("beta > 12.0"),
            vec![Token::Beta, Token::Gt, Token::Float(12.0), Token::Eof]
        );
        assert_eq!(
            kinds("x<4.5e-5"),
            vec![Token::X, Token::Lt, Token::Float(4.5e-5), Token::Eof]
        );
    }

    #[test]
    fn test_range_tokens() {
        assert_eq!(
            kinds("resid 1-10"),
            vec![
                Token::Resid,
                Token::Integer(1),
                Token::Minus,
                Token::Integer(10),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_comparison_ops() {
        assert_eq!(
            kinds(">= <= == != <> = < >"),
            vec![
                Token::Ge,
                Token::Le,
                Token::Eq,
                Token::Ne,
                Token::Ne,
                Token::Eq,
                Token::Lt,
                Token::Gt,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_quoted_tokens() {
        let t = kinds("name \"C.*\" 'two words' \"CB\"");
        assert_eq!(t[1], Token::Regex("C.*".into()));
        assert_eq!(t[2], Token::Regex("two words".into()));
        assert_eq!(t[3], Token::Str("CB".into()));
    }

    #[test]
    fn test_unquoted_regex() {
        assert_eq!(kinds("name C.?")[1], Token::Regex("C.?".into()));
    }

    #[test]
    fn test_unterminated_quote() {
        let err = tokenize("name 'CA").unwrap_err();
        assert_eq!(err.offset(), Some(5));
    }

    #[test]
    fn test_keyword_aliases() {
        assert_eq!(
            kinds("WITHIN 3 nopbc OF res By distance PBC"),
            vec![
                Token::Within,
                Token::Integer(3),
                Token::Periodic(false),
                Token::Of,
                Token::Residue,
                Token::By,
                Token::Dist,
                Token::Periodic(true),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_names_that_look_numeric() {
        assert_eq!(kinds("name 1HB")[1], Token::Str("1HB".into()));
        assert_eq!(kinds("name nan")[1], Token::Str("nan".into()));
    }
}
