//! Brace notation:
//!
//! ```text
//! root=value
//! {
//!   attr=value other="quoted value" flag
//!   child{ nested=1 }
//! }
//! ```
//!
//! A name followed by `{` opens a section; anything else is an attribute.
//! A bare attribute name has no value. `//` and `/* */` start comments only
//! at the beginning of a token.

use super::{parse_error, Format};
use crate::config::{ConfigError, Configuration, Node, NodeId};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Open,
    Close,
    Equals,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 1,
        }
    }

    fn error(&self, message: impl std::fmt::Display) -> ConfigError {
        parse_error(Format::Laconic, format!("line {}: {message}", self.line))
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    /// Skips whitespace and comments.
    fn skip_trivia(&mut self) -> Result<(), ConfigError> {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    match ahead.peek() {
                        Some('/') => {
                            while !matches!(self.bump(), None | Some('\n')) {}
                        }
                        Some('*') => {
                            self.bump();
                            self.bump();
                            let mut star = false;
                            loop {
                                match self.bump() {
                                    None => return Err(self.error("unterminated comment")),
                                    Some('/') if star => break,
                                    Some(c) => star = c == '*',
                                }
                            }
                        }
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, ConfigError> {
        self.skip_trivia()?;
        let Some(c) = self.bump() else {
            return Ok(None);
        };
        let token = match c {
            '{' => Token::Open,
            '}' => Token::Close,
            '=' => Token::Equals,
            '"' | '\'' => {
                let mut s = String::new();
                loop {
                    match self.bump() {
                        None => return Err(self.error("unterminated string")),
                        Some(q) if q == c => break,
                        Some('\\') => match self.bump() {
                            Some('n') => s.push('\n'),
                            Some('r') => s.push('\r'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => return Err(self.error("unterminated string")),
                        },
                        Some(other) => s.push(other),
                    }
                }
                Token::Quoted(s)
            }
            _ => {
                let mut word = String::from(c);
                while let Some(&next) = self.chars.peek() {
                    if next.is_whitespace() || matches!(next, '{' | '}' | '=') {
                        break;
                    }
                    word.push(next);
                    self.bump();
                }
                Token::Word(word)
            }
        };
        Ok(Some(token))
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    peeked: Option<Token>,
}

impl Parser<'_> {
    fn peek(&mut self) -> Result<Option<&Token>, ConfigError> {
        if self.peeked.is_none() {
            self.peeked = self.lexer.next_token()?;
        }
        Ok(self.peeked.as_ref())
    }

    fn next(&mut self) -> Result<Option<Token>, ConfigError> {
        match self.peeked.take() {
            Some(token) => Ok(Some(token)),
            None => self.lexer.next_token(),
        }
    }

    fn text(&mut self, what: &str) -> Result<String, ConfigError> {
        match self.next()? {
            Some(Token::Word(s) | Token::Quoted(s)) => Ok(s),
            Some(other) => Err(self.lexer.error(format!("expected {what}, found {other:?}"))),
            None => Err(self.lexer.error(format!("expected {what}, found end of input"))),
        }
    }

    /// `name [= value]`
    fn header(&mut self) -> Result<(String, Option<String>), ConfigError> {
        let name = self.text("a name")?;
        if self.peek()? == Some(&Token::Equals) {
            self.next()?;
            let value = self.text("a value")?;
            Ok((name, Some(value)))
        } else {
            Ok((name, None))
        }
    }

    /// Reads entries up to and including the closing brace of `section`.
    fn body(&mut self, conf: &mut Configuration, section: NodeId) -> Result<(), ConfigError> {
        loop {
            match self.peek()? {
                Some(Token::Close) => {
                    self.next()?;
                    return Ok(());
                }
                None => return Err(self.lexer.error("missing '}'")),
                _ => {}
            }
            let (name, value) = self.header()?;
            if self.peek()? == Some(&Token::Open) {
                self.next()?;
                let child = conf
                    .add_section(section, &name, value.as_deref())
                    .map_err(|e| self.lexer.error(e))?;
                self.body(conf, child)?;
            } else {
                conf.add_attribute(section, &name, value.as_deref())
                    .map_err(|e| self.lexer.error(e))?;
            }
        }
    }
}

pub(super) fn parse(text: &str) -> Result<Configuration, ConfigError> {
    let mut parser = Parser {
        lexer: Lexer::new(text),
        peeked: None,
    };

    let (name, value) = parser.header()?;
    match parser.next()? {
        Some(Token::Open) => {}
        _ => return Err(parser.lexer.error("the root must be a section")),
    }

    let mut conf = Configuration::with_root(&name);
    let root = conf.root_id();
    conf.set_value(root, value.as_deref())?;
    parser.body(&mut conf, root)?;

    if let Some(extra) = parser.next()? {
        return Err(parser
            .lexer
            .error(format!("unexpected {extra:?} after the root section")));
    }
    Ok(conf)
}

pub(super) fn write(section: Node<'_>) -> String {
    let mut out = String::new();
    write_section(&mut out, section, 0);
    out
}

fn write_section(out: &mut String, section: Node<'_>, depth: usize) {
    let indent = "  ".repeat(depth);
    out.push_str(&indent);
    write_header(out, section);

    if section.attribute_count() == 0 && section.child_count() == 0 {
        out.push_str("{}\n");
        return;
    }

    out.push('\n');
    out.push_str(&indent);
    out.push_str("{\n");
    for attr in section.attributes() {
        out.push_str(&indent);
        out.push_str("  ");
        write_header(out, attr);
        out.push('\n');
    }
    for child in section.children() {
        write_section(out, child, depth + 1);
    }
    out.push_str(&indent);
    out.push_str("}\n");
}

fn write_header(out: &mut String, node: Node<'_>) {
    out.push_str(&quote(node.name()));
    if let Some(value) = node.verbatim_value() {
        out.push('=');
        out.push_str(&quote(value));
    }
}

fn needs_quotes(text: &str) -> bool {
    text.is_empty()
        || text.starts_with("//")
        || text.starts_with("/*")
        || text.chars().any(|c| {
            c.is_whitespace() || matches!(c, '{' | '}' | '=' | '"' | '\'' | '\\')
        })
}

fn quote(text: &str) -> String {
    if !needs_quotes(text) {
        return text.to_string();
    }
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_structure() {
        let conf = parse(
            r#"
            // leading comment
            app=main
            {
              name="demo app" flag empty=''
              /* block
                 comment */
              db{ host=localhost url=tcp://$($host):5432 }
              path=/var/lib
            }
            "#,
        )
        .unwrap();

        let root = conf.root();
        assert_eq!(root.name(), "app");
        assert_eq!(root.verbatim_value(), Some("main"));
        assert_eq!(root.attribute("name").verbatim_value(), Some("demo app"));
        assert!(root.attribute("flag").exists());
        assert_eq!(root.attribute("flag").verbatim_value(), None);
        assert_eq!(root.attribute("empty").verbatim_value(), Some(""));
        assert_eq!(root.attribute("path").verbatim_value(), Some("/var/lib"));
        assert_eq!(
            conf.navigate("/db/$url").unwrap().value().unwrap().as_deref(),
            Some("tcp://localhost:5432")
        );
    }

    #[test]
    fn test_escapes() {
        let conf = parse(r#"r{ a="say \"hi\"\n" b='it''s' }"#).unwrap();
        assert_eq!(conf.root().attribute("a").verbatim_value(), Some("say \"hi\"\n"));
        // Adjacent quoted strings are separate tokens.
        assert_eq!(conf.root().attribute("b").verbatim_value(), Some("it"));
        assert!(conf.root().attribute("s").exists());
    }

    #[test]
    fn test_errors() {
        for bad in ["", "r", "r{", "r{ a= }", "r{ } extra{}", "r{ \"open }", "r{ /* x }"] {
            assert!(
                matches!(parse(bad), Err(ConfigError::ParseError { .. })),
                "{bad:?} should fail"
            );
        }
    }

    #[test]
    fn test_write_quotes_when_needed() {
        let mut conf = Configuration::with_root("r");
        let root = conf.root_id();
        conf.add_attribute(root, "plain", Some("value")).unwrap();
        conf.add_attribute(root, "spaced", Some("a b")).unwrap();
        conf.add_attribute(root, "comment", Some("//x")).unwrap();
        conf.add_attribute(root, "null", None).unwrap();
        conf.add_section(root, "child", Some("")).unwrap();

        let text = write(conf.root());
        assert!(text.contains("plain=value"));
        assert!(text.contains("spaced=\"a b\""));
        assert!(text.contains("comment=\"//x\""));
        assert!(text.contains("  null\n"));
        assert!(text.contains("child=\"\"{}"));

        let reread = parse(&text).unwrap();
        assert_eq!(reread.root().attribute("comment").verbatim_value(), Some("//x"));
        assert_eq!(reread.root().child("child").verbatim_value(), Some(""));
    }

    #[test]
    fn test_write_layout() {
        let conf = parse("r=v{ a=1 child{ b=2 } leaf{} }").unwrap();
        assert_eq!(
            write(conf.root()),
            "r=v\n{\n  a=1\n  child\n  {\n    b=2\n  }\n  leaf{}\n}\n"
        );
    }
}
