//! Minimal FPCore header reader.
//!
//! Program text is otherwise opaque; only the argument list and the
//! `:name` property are needed to build a [`crate::ProgramCore`].

use anyhow::{anyhow, bail, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FpcoreHeader {
    pub name: Option<String>,
    pub arg_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Str(String),
    Atom(String),
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '(' | '[' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' | ']' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped) => value.push(escaped),
                            None => bail!("unterminated string in {}", text),
                        },
                        Some('"') => break,
                        Some(other) => value.push(other),
                        None => bail!("unterminated string in {}", text),
                    }
                }
                tokens.push(Token::Str(value));
            }
            ';' => {
                while let Some(skipped) = chars.next() {
                    if skipped == '\n' {
                        break;
                    }
                }
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            _ => {
                let mut atom = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '"' | ';') {
                        break;
                    }
                    atom.push(c);
                    chars.next();
                }
                tokens.push(Token::Atom(atom));
            }
        }
    }
    Ok(tokens)
}

/// Skip one datum starting at `pos`, returning the position after it.
fn skip_datum(tokens: &[Token], pos: usize) -> Result<usize> {
    match tokens.get(pos) {
        Some(Token::Open) => {
            let mut depth = 0usize;
            for (offset, token) in tokens[pos..].iter().enumerate() {
                match token {
                    Token::Open => depth += 1,
                    Token::Close => {
                        depth -= 1;
                        if depth == 0 {
                            return Ok(pos + offset + 1);
                        }
                    }
                    _ => {}
                }
            }
            bail!("unbalanced parentheses")
        }
        Some(Token::Close) => bail!("unexpected `)`"),
        Some(_) => Ok(pos + 1),
        None => bail!("unexpected end of program"),
    }
}

/// Read the argument count and `:name` of an `(FPCore ...)` form.
pub fn parse_header(text: &str) -> Result<FpcoreHeader> {
    let tokens = tokenize(text)?;
    if tokens.first() != Some(&Token::Open) {
        bail!("expected `(FPCore ...)`, got: {}", text);
    }
    match tokens.get(1) {
        Some(Token::Atom(head)) if head == "FPCore" => {}
        _ => bail!("expected `(FPCore ...)`, got: {}", text),
    }

    let mut pos = 2;
    if let Some(Token::Atom(_)) = tokens.get(pos) {
        // named form: (FPCore ident (args) ...)
        pos += 1;
    }
    if tokens.get(pos) != Some(&Token::Open) {
        return Err(anyhow!("missing argument list in: {}", text));
    }

    let mut arg_count = 0;
    let mut cursor = pos + 1;
    while tokens.get(cursor) != Some(&Token::Close) {
        cursor = skip_datum(&tokens, cursor)?;
        arg_count += 1;
    }
    cursor += 1;

    let mut name = None;
    while cursor < tokens.len() && tokens[cursor] != Token::Close {
        if let Token::Atom(atom) = &tokens[cursor] {
            if atom == ":name" {
                if let Some(Token::Str(value)) = tokens.get(cursor + 1) {
                    name = Some(value.clone());
                }
            }
        }
        cursor = skip_datum(&tokens, cursor)?;
    }

    Ok(FpcoreHeader { name, arg_count })
}
