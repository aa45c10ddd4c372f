//! Template parser.
//!
//! Supports the subset of Go template syntax DockhandSecret data uses:
//! text, `{{ fn "arg" `raw` }}` calls, parenthesised nested calls, bare string
//! literal actions, `{{/* comments */}}` and `{{-` / `-}}` whitespace trimming.

use super::{Delimiters, TemplateError};
use crate::provider::TemplateFunction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(String),
    Call {
        function: TemplateFunction,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Action(Expr),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// True when the template contains no actions that need a backend
    #[must_use]
    pub fn is_static(&self) -> bool {
        fn has_call(expr: &Expr) -> bool {
            matches!(expr, Expr::Call { .. })
        }
        !self
            .nodes
            .iter()
            .any(|n| matches!(n, Node::Action(e) if has_call(e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Open,
    Close,
}

/// Tokenizer for the inside of one action
struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    right: &'a str,
}

/// What terminated an action
struct ActionEnd {
    /// Byte offset just past the closing delimiter
    next: usize,
    trim_right: bool,
}

impl<'a> Lexer<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_whitespace(&mut self) -> bool {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
        rest.len() != trimmed.len()
    }

    /// Lex tokens up to and including the right delimiter
    fn tokens(&mut self) -> Result<(Vec<(usize, Token)>, ActionEnd), TemplateError> {
        let mut tokens = Vec::new();
        loop {
            let had_space = self.skip_whitespace();
            let rest = self.rest();
            let start = self.pos;

            if rest.is_empty() {
                return Err(TemplateError::parse(start, "unclosed action"));
            }
            if let Some(after_dash) = rest.strip_prefix('-') {
                if had_space && after_dash.starts_with(self.right) {
                    self.pos += 1 + self.right.len();
                    return Ok((
                        tokens,
                        ActionEnd {
                            next: self.pos,
                            trim_right: true,
                        },
                    ));
                }
            }
            if rest.starts_with(self.right) {
                self.pos += self.right.len();
                return Ok((
                    tokens,
                    ActionEnd {
                        next: self.pos,
                        trim_right: false,
                    },
                ));
            }

            let mut chars = rest.chars();
            let token = match chars.next() {
                Some('(') => {
                    self.pos += 1;
                    Token::Open
                }
                Some(')') => {
                    self.pos += 1;
                    Token::Close
                }
                Some('"') => Token::Str(self.quoted()?),
                Some('`') => Token::Str(self.raw()?),
                Some(c) if c.is_alphanumeric() || c == '_' => {
                    let len = rest
                        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                        .unwrap_or(rest.len());
                    self.pos += len;
                    Token::Ident(rest[..len].to_string())
                }
                Some(c) => {
                    return Err(TemplateError::parse(
                        start,
                        format!("unexpected {c:?} in action"),
                    ));
                }
                None => return Err(TemplateError::parse(start, "unclosed action")),
            };
            tokens.push((start, token));
        }
    }

    fn quoted(&mut self) -> Result<String, TemplateError> {
        let start = self.pos;
        let mut out = String::new();
        let mut chars = self.rest().char_indices().skip(1);
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok(out);
                }
                '\n' => break,
                '\\' => {
                    let escaped = match chars.next() {
                        Some((_, 'n')) => '\n',
                        Some((_, 't')) => '\t',
                        Some((_, 'r')) => '\r',
                        Some((_, '\\')) => '\\',
                        Some((_, '"')) => '"',
                        Some((_, '\'')) => '\'',
                        Some((_, '0')) => '\0',
                        Some((j, other)) => {
                            return Err(TemplateError::parse(
                                start + j,
                                format!("unknown escape sequence \\{other}"),
                            ));
                        }
                        None => break,
                    };
                    out.push(escaped);
                }
                c => out.push(c),
            }
        }
        Err(TemplateError::parse(start, "unterminated quoted string"))
    }

    fn raw(&mut self) -> Result<String, TemplateError> {
        let start = self.pos;
        let body = &self.rest()[1..];
        match body.find('`') {
            Some(end) => {
                self.pos += end + 2;
                Ok(body[..end].to_string())
            }
            None => Err(TemplateError::parse(start, "unterminated raw quoted string")),
        }
    }
}

/// Recursive-descent over one action's tokens
struct ExprParser {
    tokens: Vec<(usize, Token)>,
    idx: usize,
    end_offset: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&(usize, Token)> {
        self.tokens.get(self.idx)
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.end_offset, |(o, _)| *o)
    }

    /// A command: either a lone literal or `fn arg*`
    fn command(&mut self, nested: bool) -> Result<Expr, TemplateError> {
        let offset = self.offset();
        let Some((_, token)) = self.tokens.get(self.idx).cloned() else {
            return Err(TemplateError::parse(offset, "missing value for command"));
        };
        self.idx += 1;

        let expr = match token {
            Token::Str(s) => Expr::Literal(s),
            Token::Open => {
                let inner = self.command(true)?;
                self.expect_close()?;
                inner
            }
            Token::Close => return Err(TemplateError::parse(offset, "unexpected right paren")),
            Token::Ident(name) => {
                let function = TemplateFunction::from_name(&name)
                    .ok_or(TemplateError::UnknownFunction(name))?;
                let mut args = Vec::new();
                while let Some((_, t)) = self.peek() {
                    if *t == Token::Close {
                        break;
                    }
                    args.push(self.operand()?);
                }
                if args.len() != function.arity() {
                    return Err(TemplateError::Arity {
                        function: function.name(),
                        expected: function.arity(),
                        found: args.len(),
                    });
                }
                return Ok(Expr::Call { function, args });
            }
        };

        match self.peek() {
            Some((_, Token::Close)) if nested => Ok(expr),
            None => Ok(expr),
            Some((o, _)) => Err(TemplateError::parse(*o, "unexpected operand after value")),
        }
    }

    fn operand(&mut self) -> Result<Expr, TemplateError> {
        let offset = self.offset();
        match self.tokens.get(self.idx).cloned() {
            Some((_, Token::Str(s))) => {
                self.idx += 1;
                Ok(Expr::Literal(s))
            }
            Some((_, Token::Open)) => {
                self.idx += 1;
                let inner = self.command(true)?;
                self.expect_close()?;
                Ok(inner)
            }
            Some((_, Token::Ident(name))) => {
                // A bare identifier is a zero-argument call
                self.idx += 1;
                let function = TemplateFunction::from_name(&name)
                    .ok_or(TemplateError::UnknownFunction(name))?;
                Err(TemplateError::Arity {
                    function: function.name(),
                    expected: function.arity(),
                    found: 0,
                })
            }
            _ => Err(TemplateError::parse(offset, "expected operand")),
        }
    }

    fn expect_close(&mut self) -> Result<(), TemplateError> {
        match self.peek() {
            Some((_, Token::Close)) => {
                self.idx += 1;
                Ok(())
            }
            _ => Err(TemplateError::parse(self.offset(), "unclosed left paren")),
        }
    }
}

fn push_text(nodes: &mut Vec<Node>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Node::Text(prev)) = nodes.last_mut() {
        prev.push_str(text);
    } else {
        nodes.push(Node::Text(text.to_string()));
    }
}

/// Parse `src` into a [`Template`]
pub fn parse(src: &str, delims: &Delimiters) -> Result<Template, TemplateError> {
    let mut nodes = Vec::new();
    let mut pos = 0;
    let mut trim_next_text = false;

    while let Some(found) = src[pos..].find(delims.left.as_str()) {
        let start = pos + found;
        let mut text = &src[pos..start];
        if trim_next_text {
            text = text.trim_start();
        }

        let mut inner = start + delims.left.len();
        let trim_left = src[inner..].starts_with("- ")
            || src[inner..].starts_with("-\t")
            || src[inner..].starts_with("-\n")
            || src[inner..].starts_with("-\r");
        if trim_left {
            text = text.trim_end();
            inner += 1;
        }
        push_text(&mut nodes, text);

        // Comments must open immediately after the delimiter (and trim marker)
        let body = src[inner..].trim_start();
        if body.starts_with("/*") && (trim_left || src[inner..].starts_with("/*")) {
            let comment_start = src.len() - body.len();
            let close = body
                .find("*/")
                .ok_or_else(|| TemplateError::parse(comment_start, "unclosed comment"))?;
            let mut lexer = Lexer {
                src,
                pos: comment_start + close + 2,
                right: &delims.right,
            };
            let (tokens, end) = lexer.tokens()?;
            if !tokens.is_empty() {
                return Err(TemplateError::parse(lexer.pos, "comment ends before closing delimiter"));
            }
            pos = end.next;
            trim_next_text = end.trim_right;
            continue;
        }

        let mut lexer = Lexer {
            src,
            pos: inner,
            right: &delims.right,
        };
        let (tokens, end) = lexer.tokens()?;
        let mut parser = ExprParser {
            tokens,
            idx: 0,
            end_offset: end.next,
        };
        let expr = parser.command(false)?;
        if let Some((offset, _)) = parser.peek() {
            return Err(TemplateError::parse(*offset, "unexpected right paren"));
        }
        nodes.push(Node::Action(expr));

        pos = end.next;
        trim_next_text = end.trim_right;
    }

    let mut tail = &src[pos..];
    if trim_next_text {
        tail = tail.trim_start();
    }
    push_text(&mut nodes, tail);

    Ok(Template { nodes })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(src: &str) -> Result<Template, TemplateError> {
        parse(src, &Delimiters::braces())
    }

    fn lit(s: &str) -> Expr {
        Expr::Literal(s.to_string())
    }

    #[test]
    fn test_plain_text() {
        let t = p("no actions here").unwrap();
        assert_eq!(t.nodes(), &[Node::Text("no actions here".to_string())]);
        assert!(t.is_static());
    }

    #[test]
    fn test_call_with_quoted_and_raw_args() {
        let t = p(r#"pw={{ vault "secret/data/db" `password` }}!"#).unwrap();
        assert_eq!(
            t.nodes(),
            &[
                Node::Text("pw=".to_string()),
                Node::Action(Expr::Call {
                    function: TemplateFunction::Vault,
                    args: vec![lit("secret/data/db"), lit("password")],
                }),
                Node::Text("!".to_string()),
            ]
        );
        assert!(!t.is_static());
    }

    #[test]
    fn test_nested_call() {
        let t = p(r#"{{ aws (gcpText "name-of-secret") "key" }}"#).unwrap();
        assert_eq!(
            t.nodes(),
            &[Node::Action(Expr::Call {
                function: TemplateFunction::Aws,
                args: vec![
                    Expr::Call {
                        function: TemplateFunction::GcpText,
                        args: vec![lit("name-of-secret")],
                    },
                    lit("key"),
                ],
            })]
        );
    }

    #[test]
    fn test_literal_action_and_escapes() {
        let t = p(r#"{{ "a\"b\n" }}"#).unwrap();
        assert_eq!(t.nodes(), &[Node::Action(lit("a\"b\n"))]);
        assert!(t.is_static());
    }

    #[test]
    fn test_trim_markers_and_comments() {
        let t = p("a   {{- /* note */ -}}   b").unwrap();
        assert_eq!(t.nodes(), &[Node::Text("ab".to_string())]);

        let t = p("x{{/* c */}}y").unwrap();
        assert_eq!(t.nodes(), &[Node::Text("xy".to_string())]);
    }

    #[test]
    fn test_alternate_delimiters_leave_braces_alone() {
        let t = parse(r#"{{ raw }} << azureText "s" >>"#, &Delimiters::alternate()).unwrap();
        assert_eq!(t.nodes()[0], Node::Text("{{ raw }} ".to_string()));
        assert_eq!(
            t.nodes()[1],
            Node::Action(Expr::Call {
                function: TemplateFunction::AzureText,
                args: vec![lit("s")],
            })
        );
    }

    #[test]
    fn test_unknown_function() {
        let err = p(r#"{{ consul "a" "b" }}"#).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownFunction(name) if name == "consul"));
    }

    #[test]
    fn test_wrong_arity() {
        let err = p(r#"{{ gcpJson "only-name" }}"#).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::Arity {
                function: "gcpJson",
                expected: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(p("{{ vault \"a\" "), Err(TemplateError::Parse { .. })));
        assert!(matches!(p("{{ \"unterminated }}"), Err(TemplateError::Parse { .. })));
        assert!(matches!(p("{{ }}"), Err(TemplateError::Parse { .. })));
        assert!(matches!(p("{{ \"a\" \"b\" }}"), Err(TemplateError::Parse { .. })));
        assert!(matches!(p("{{ (azureText \"a\" }}"), Err(TemplateError::Parse { .. })));
        assert!(matches!(p("{{ $x }}"), Err(TemplateError::Parse { .. })));
    }

    #[test]
    fn test_closing_delimiter_inside_string() {
        let t = p(r#"{{ azureText "a}}b" }}"#).unwrap();
        assert_eq!(
            t.nodes(),
            &[Node::Action(Expr::Call {
                function: TemplateFunction::AzureText,
                args: vec![lit("a}}b")],
            })]
        );
    }
}
