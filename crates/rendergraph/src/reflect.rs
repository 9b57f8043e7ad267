//! WGSL uniform reflection.
//!
//! A small tokenizer feeds a declaration parser that only understands what the
//! engine needs: `@group(N) @binding(M) var<uniform> name: Type;`. Everything
//! else in the source (functions, structs, storage bindings) is skipped.

use std::collections::HashMap;

use crate::error::ReflectError;
use crate::values::UniformType;

/// Highest group index accepted (the default `max_bind_groups` limit is 4).
pub const MAX_GROUP: u32 = 3;
pub const MAX_BINDING: u32 = 999;

/// A `var<uniform>` declaration discovered in shader source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedUniform {
    pub group: u32,
    pub binding: u32,
    pub name: String,
    pub ty: UniformType,
    /// Type text as written, generics preserved.
    pub type_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Ident(String),
    Number(String),
    Attribute(String),
    Punct(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    kind: TokenKind,
    line: usize,
}

fn tokenize(source: &str) -> Vec<Token> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    let take_word = |start: usize| -> usize {
        let mut end = start;
        while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
            end += 1;
        }
        end
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let mut depth = 0usize;
                while i < chars.len() {
                    if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
                        depth += 1;
                        i += 2;
                    } else if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        depth -= 1;
                        i += 2;
                        if depth == 0 {
                            break;
                        }
                    } else {
                        if chars[i] == '\n' {
                            line += 1;
                        }
                        i += 1;
                    }
                }
            }
            '@' => {
                let end = take_word(i + 1);
                let name: String = chars[i + 1..end].iter().collect();
                tokens.push(Token {
                    kind: TokenKind::Attribute(name),
                    line,
                });
                i = end;
            }
            c if c.is_ascii_digit() => {
                let mut end = i;
                while end < chars.len()
                    && (chars[end].is_ascii_alphanumeric() || chars[end] == '.' || chars[end] == '_')
                {
                    end += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Number(chars[i..end].iter().collect()),
                    line,
                });
                i = end;
            }
            c if c.is_alphabetic() || c == '_' => {
                let end = take_word(i);
                tokens.push(Token {
                    kind: TokenKind::Ident(chars[i..end].iter().collect()),
                    line,
                });
                i = end;
            }
            other => {
                tokens.push(Token {
                    kind: TokenKind::Punct(other),
                    line,
                });
                i += 1;
            }
        }
    }
    tokens
}

/// Attribute seen ahead of a declaration, with its raw arguments.
#[derive(Debug)]
struct PendingAttribute {
    name: String,
    args: Vec<TokenKind>,
    line: usize,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn last_line(&self) -> usize {
        self.tokens.last().map(|token| token.line).unwrap_or(1)
    }

    fn eat_punct(&mut self, expected: char) -> bool {
        if matches!(self.peek(), Some(Token { kind: TokenKind::Punct(c), .. }) if *c == expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Arguments of an attribute, if it is followed by a parenthesised list.
    fn attribute_args(&mut self) -> Vec<TokenKind> {
        let mut args = Vec::new();
        if !self.eat_punct('(') {
            return args;
        }
        let mut depth = 1usize;
        while let Some(token) = self.next() {
            match token.kind {
                TokenKind::Punct('(') => depth += 1,
                TokenKind::Punct(')') => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                TokenKind::Punct(',') if depth == 1 => continue,
                _ => {}
            }
            args.push(token.kind);
        }
        args
    }

    /// Address space of `var<...>`, `None` for plain `var`.
    fn address_space(&mut self) -> Option<String> {
        if !self.eat_punct('<') {
            return None;
        }
        let mut space = None;
        while let Some(token) = self.next() {
            match token.kind {
                TokenKind::Punct('>') => break,
                TokenKind::Ident(name) if space.is_none() => space = Some(name),
                _ => {}
            }
        }
        space
    }

    fn uniform_declaration(&mut self, line: usize) -> Result<(String, String), ReflectError> {
        let name = match self.next() {
            Some(Token {
                kind: TokenKind::Ident(name),
                ..
            }) => name,
            other => {
                return Err(ReflectError::Syntax {
                    line: other.map(|token| token.line).unwrap_or(line),
                    message: "expected a name after var<uniform>".to_string(),
                })
            }
        };
        if !self.eat_punct(':') {
            return Err(ReflectError::Syntax {
                line,
                message: format!("expected ':' after uniform '{name}'"),
            });
        }
        let mut type_text = String::new();
        loop {
            match self.next() {
                Some(Token {
                    kind: TokenKind::Punct(';'),
                    ..
                }) => break,
                Some(Token { kind, .. }) => match kind {
                    TokenKind::Ident(text) | TokenKind::Number(text) => type_text.push_str(&text),
                    TokenKind::Punct(c) => type_text.push(c),
                    TokenKind::Attribute(attr) => {
                        return Err(ReflectError::Syntax {
                            line,
                            message: format!("unexpected @{attr} in type of uniform '{name}'"),
                        })
                    }
                },
                None => {
                    return Err(ReflectError::Syntax {
                        line: self.last_line(),
                        message: format!("uniform '{name}' is not terminated by ';'"),
                    })
                }
            }
        }
        if type_text.is_empty() {
            return Err(ReflectError::Syntax {
                line,
                message: format!("uniform '{name}' has no type"),
            });
        }
        Ok((name, type_text))
    }
}

fn attribute_index(
    attributes: &[PendingAttribute],
    attribute: &'static str,
    max: u32,
    name: &str,
    line: usize,
) -> Result<u32, ReflectError> {
    let Some(found) = attributes.iter().rev().find(|attr| attr.name == attribute) else {
        return Err(ReflectError::MissingAttribute {
            line,
            name: name.to_string(),
            attribute,
        });
    };
    let value = match found.args.as_slice() {
        [TokenKind::Number(text)] => parse_integer(text),
        _ => None,
    }
    .ok_or_else(|| ReflectError::Syntax {
        line: found.line,
        message: format!("@{attribute} of uniform '{name}' expects an integer literal"),
    })?;
    if value > u64::from(max) {
        return Err(ReflectError::OutOfRange {
            line: found.line,
            attribute,
            value,
            max,
        });
    }
    Ok(value as u32)
}

fn parse_integer(text: &str) -> Option<u64> {
    let digits = text.trim_end_matches(['u', 'i']);
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16).ok();
    }
    digits.parse().ok()
}

/// Extracts every uniform declaration from `source`, in source order.
pub fn reflect_uniforms(source: &str) -> Result<Vec<ReflectedUniform>, ReflectError> {
    let mut parser = Parser {
        tokens: tokenize(source),
        pos: 0,
    };
    let mut uniforms = Vec::new();
    let mut taken: HashMap<(u32, u32), String> = HashMap::new();
    let mut pending: Vec<PendingAttribute> = Vec::new();

    while let Some(token) = parser.next() {
        match token.kind {
            TokenKind::Attribute(name) => {
                let args = parser.attribute_args();
                pending.push(PendingAttribute {
                    name,
                    args,
                    line: token.line,
                });
            }
            TokenKind::Ident(ref keyword) if keyword == "var" => {
                let attributes = std::mem::take(&mut pending);
                if parser.address_space().as_deref() != Some("uniform") {
                    continue;
                }
                let (name, type_text) = parser.uniform_declaration(token.line)?;
                let group = attribute_index(&attributes, "group", MAX_GROUP, &name, token.line)?;
                let binding =
                    attribute_index(&attributes, "binding", MAX_BINDING, &name, token.line)?;
                if let Some(previous) = taken.get(&(group, binding)) {
                    return Err(ReflectError::DuplicateBinding {
                        line: token.line,
                        name,
                        previous: previous.clone(),
                        group,
                        binding,
                    });
                }
                taken.insert((group, binding), name.clone());
                uniforms.push(ReflectedUniform {
                    group,
                    binding,
                    ty: UniformType::parse(&type_text),
                    name,
                    type_text,
                });
            }
            _ => pending.clear(),
        }
    }

    Ok(uniforms)
}
