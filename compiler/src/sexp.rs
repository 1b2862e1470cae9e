//! Text form of the input tree.
//!
//! `(tag child ...)`, where the tag may carry a source position as
//! `tag@line:col`. Children are nodes, integers, floats, `"strings"`,
//! `:symbols` (or `:"quoted symbols"`), bare words (read as symbols) and
//! `nil`. A `;` starts a comment. Several top-level forms are wrapped in a
//! `block` node.

use thiserror::Error;

use crate::ast::{Child, Literal, Node, Pos, Tag};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{line}:{column}: unexpected end of input")]
    UnexpectedEof { line: u32, column: u32 },
    #[error("{line}:{column}: unexpected character {ch:?}")]
    UnexpectedChar { ch: char, line: u32, column: u32 },
    #[error("{line}:{column}: unknown node tag `{name}`")]
    UnknownTag { name: String, line: u32, column: u32 },
    #[error("{line}:{column}: malformed number `{text}`")]
    BadNumber { text: String, line: u32, column: u32 },
    #[error("{line}:{column}: malformed position `{text}`")]
    BadPosition { text: String, line: u32, column: u32 },
}

pub fn parse(src: &str) -> Result<Node, ParseError> {
    let mut reader = Reader { chars: src.chars().collect(), pos: 0, line: 1, column: 0 };
    let mut forms = Vec::new();
    loop {
        reader.skip_trivia();
        if reader.peek().is_none() {
            break;
        }
        forms.push(reader.node()?);
    }
    if forms.len() == 1 {
        if let Some(node) = forms.pop() {
            return Ok(node);
        }
    }
    Ok(Node::new(Tag::Block, forms.into_iter().map(Child::Node).collect()))
}

struct Reader {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';')
}

impl Reader {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eof(&self) -> ParseError {
        ParseError::UnexpectedEof { line: self.line, column: self.column }
    }

    fn unexpected(&self, ch: char) -> ParseError {
        ParseError::UnexpectedChar { ch, line: self.line, column: self.column }
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c == ';' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn word(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if is_delimiter(c) {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }

    fn node(&mut self) -> Result<Node, ParseError> {
        match self.bump() {
            Some('(') => {}
            Some(c) => return Err(self.unexpected(c)),
            None => return Err(self.eof()),
        }
        let (line, column) = (self.line, self.column);
        let head = self.word();
        let (name, pos) = match head.split_once('@') {
            Some((name, at)) => (name.to_string(), Some(self.position(at)?)),
            None => (head, None),
        };
        let tag = Tag::from_name(&name)
            .ok_or(ParseError::UnknownTag { name, line, column })?;
        let mut node = Node::new(tag, Vec::new());
        node.pos = pos;
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(self.eof()),
                Some(')') => {
                    self.bump();
                    return Ok(node);
                }
                Some('(') => node.children.push(Child::Node(self.node()?)),
                Some(_) => node.children.push(Child::Lit(self.literal()?)),
            }
        }
    }

    fn position(&self, text: &str) -> Result<Pos, ParseError> {
        let bad = || ParseError::BadPosition {
            text: text.to_string(),
            line: self.line,
            column: self.column,
        };
        let (line, column) = text.split_once(':').ok_or_else(bad)?;
        Ok(Pos {
            line: line.parse().map_err(|_| bad())?,
            column: column.parse().map_err(|_| bad())?,
        })
    }

    fn literal(&mut self) -> Result<Literal, ParseError> {
        let (line, column) = (self.line, self.column);
        match self.peek() {
            Some('"') => Ok(Literal::Str(self.string()?)),
            Some(':') => {
                self.bump();
                if self.peek() == Some('"') {
                    return Ok(Literal::Sym(self.string()?));
                }
                let word = self.word();
                if word.is_empty() {
                    return match self.peek() {
                        Some(c) => Err(self.unexpected(c)),
                        None => Err(self.eof()),
                    };
                }
                Ok(Literal::Sym(word))
            }
            Some(c) if c.is_ascii_digit() || (c == '-' && self.starts_number()) => {
                let text = self.word();
                let bad = || ParseError::BadNumber { text: text.clone(), line, column };
                if text.contains(['.', 'e', 'E']) {
                    text.parse::<f64>().map(Literal::Float).map_err(|_| bad())
                } else {
                    text.replace('_', "").parse::<i64>().map(Literal::Int).map_err(|_| bad())
                }
            }
            Some(_) => {
                let word = self.word();
                Ok(match word.as_str() {
                    "nil" => Literal::Nil,
                    _ => Literal::Sym(word),
                })
            }
            None => Err(self.eof()),
        }
    }

    fn starts_number(&self) -> bool {
        self.chars.get(self.pos + 1).is_some_and(|c| c.is_ascii_digit())
    }

    fn string(&mut self) -> Result<String, ParseError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.eof()),
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('e') => out.push('\x1b'),
                    Some('0') => out.push('\0'),
                    Some(c @ ('"' | '\\')) => out.push(c),
                    Some(c) => return Err(self.unexpected(c)),
                    None => return Err(self.eof()),
                },
                Some(c) => out.push(c),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_nested_forms() {
        let node = parse("(call@3:4 nil :puts (lit 42) (str \"a\\nb\"))").unwrap();
        assert_eq!(node.tag, Tag::Call);
        assert_eq!(node.pos, Some(Pos { line: 3, column: 4 }));
        assert_eq!(node.child(0), Some(&Child::Lit(Literal::Nil)));
        assert_eq!(node.name(1), Some("puts"));
        let lit = node.node(2).unwrap();
        assert_eq!(lit.child(0), Some(&Child::Lit(Literal::Int(42))));
        let s = node.node(3).unwrap();
        assert_eq!(s.child(0), Some(&Child::Lit(Literal::Str("a\nb".into()))));
    }

    #[test]
    fn numbers_and_symbols() {
        let node = parse("(array (lit -7) (lit 2.5) (lit :<=>) (lit :\"odd sym\") bare)").unwrap();
        let lits: Vec<_> = node.children.iter().take(4).map(|c| match c {
            Child::Node(n) => n.children[0].clone(),
            Child::Lit(l) => Child::Lit(l.clone()),
        }).collect();
        assert_eq!(lits[0], Child::Lit(Literal::Int(-7)));
        assert_eq!(lits[1], Child::Lit(Literal::Float(2.5)));
        assert_eq!(lits[2], Child::Lit(Literal::Sym("<=>".into())));
        assert_eq!(lits[3], Child::Lit(Literal::Sym("odd sym".into())));
        assert_eq!(node.name(4), Some("bare"));
    }

    #[test]
    fn several_forms_become_a_block() {
        let node = parse("; comment\n(nil)\n(true) ; trailing\n").unwrap();
        assert_eq!(node.tag, Tag::Block);
        assert_eq!(node.children.len(), 2);
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert!(matches!(
            parse("(frobnicate 1)"),
            Err(ParseError::UnknownTag { ref name, .. }) if name == "frobnicate"
        ));
    }

    #[test]
    fn unterminated_input() {
        assert!(matches!(parse("(array (lit 1)"), Err(ParseError::UnexpectedEof { .. })));
        assert!(matches!(parse("(str \"abc)"), Err(ParseError::UnexpectedEof { .. })));
    }

    #[test]
    fn display_reads_back() {
        let src = "(block@1:0 (lasgn :x (lit 1)) (call (lvar :x) :+ (lit 2.5)) (str \"q\\\"\"))";
        let node = parse(src).unwrap();
        assert_eq!(parse(&node.to_string()).unwrap(), node);
    }
}
