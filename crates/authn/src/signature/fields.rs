//! Structured field values (RFC 8941), the subset HTTP message signatures use.
//!
//! `Signature-Input`, `Signature` and `Content-Digest` are all dictionaries.
//! Members are either bare items or inner lists, each with parameters.

use std::fmt::{self, Write as _};

use base64::{Engine, engine::general_purpose::STANDARD};

/// A bare item value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BareItem {
    /// `?1` / `?0`.
    Boolean(bool),
    /// Decimal integer.
    Integer(i64),
    /// Quoted string.
    String(String),
    /// Unquoted token.
    Token(String),
    /// `:base64:` byte sequence.
    ByteSeq(Vec<u8>),
}

impl fmt::Display for BareItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => f.write_str(if *b { "?1" } else { "?0" }),
            Self::Integer(i) => write!(f, "{i}"),
            Self::String(s) => {
                f.write_char('"')?;
                for c in s.chars() {
                    if c == '"' || c == '\\' {
                        f.write_char('\\')?;
                    }
                    f.write_char(c)?;
                }
                f.write_char('"')
            },
            Self::Token(t) => f.write_str(t),
            Self::ByteSeq(bytes) => write!(f, ":{}:", STANDARD.encode(bytes)),
        }
    }
}

/// Ordered `;key=value` parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters(pub Vec<(String, BareItem)>);

impl Parameters {
    /// The value of parameter `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&BareItem> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Whether no parameters are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.0 {
            match value {
                BareItem::Boolean(true) => write!(f, ";{key}")?,
                other => write!(f, ";{key}={other}")?,
            }
        }
        Ok(())
    }
}

/// An item with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// The value.
    pub value: BareItem,
    /// Its parameters.
    pub params: Parameters,
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.params)
    }
}

/// A dictionary member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    /// A single item.
    Item(Item),
    /// A parenthesized list of items, with parameters on the list.
    InnerList(Vec<Item>, Parameters),
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Item(item) => item.fmt(f),
            Self::InnerList(items, params) => {
                f.write_char('(')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_char(' ')?;
                    }
                    item.fmt(f)?;
                }
                write!(f, "){params}")
            },
        }
    }
}

/// Why a field value could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Byte offset of the failure.
    pub position: usize,
    /// What was expected there.
    pub expected: &'static str,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {} at offset {}", self.expected, self.position)
    }
}

impl std::error::Error for ParseError {}

/// Parses a dictionary field value, preserving member order.
///
/// # Errors
///
/// Returns a [`ParseError`] on any syntax error, including duplicate keys.
pub fn parse_dictionary(input: &str) -> Result<Vec<(String, Member)>, ParseError> {
    let mut parser = Parser { input: input.as_bytes(), pos: 0 };
    parser.skip_sp();
    let mut members: Vec<(String, Member)> = Vec::new();
    while !parser.at_end() {
        let key = parser.key()?;
        let member = if parser.eat(b'=') {
            parser.member()?
        } else {
            Member::Item(Item { value: BareItem::Boolean(true), params: parser.params()? })
        };
        if members.iter().any(|(k, _)| *k == key) {
            return Err(parser.error("unique dictionary key"));
        }
        members.push((key, member));

        parser.skip_ows();
        if parser.at_end() {
            break;
        }
        if !parser.eat(b',') {
            return Err(parser.error("','"));
        }
        parser.skip_ows();
        if parser.at_end() {
            return Err(parser.error("member after ','"));
        }
    }
    Ok(members)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, expected: &'static str) -> ParseError {
        ParseError { position: self.pos, expected }
    }

    fn skip_sp(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    fn skip_ows(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t')) {
            self.pos += 1;
        }
    }

    fn key(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_lowercase() || c == b'*' => self.pos += 1,
            _ => return Err(self.error("key")),
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, b'_' | b'-' | b'.' | b'*')
            {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(self.slice(start))
    }

    fn slice(&self, start: usize) -> String {
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn member(&mut self) -> Result<Member, ParseError> {
        if self.eat(b'(') {
            let mut items = Vec::new();
            loop {
                self.skip_sp();
                if self.eat(b')') {
                    break;
                }
                items.push(self.item()?);
                if !matches!(self.peek(), Some(b' ' | b')')) {
                    return Err(self.error("' ' or ')'"));
                }
            }
            Ok(Member::InnerList(items, self.params()?))
        } else {
            self.item().map(Member::Item)
        }
    }

    fn item(&mut self) -> Result<Item, ParseError> {
        let value = self.bare_item()?;
        Ok(Item { value, params: self.params()? })
    }

    fn params(&mut self) -> Result<Parameters, ParseError> {
        let mut params = Parameters::default();
        while self.eat(b';') {
            self.skip_sp();
            let key = self.key()?;
            let value = if self.eat(b'=') { self.bare_item()? } else { BareItem::Boolean(true) };
            match params.0.iter_mut().find(|(k, _)| *k == key) {
                Some(existing) => existing.1 = value,
                None => params.0.push((key, value)),
            }
        }
        Ok(params)
    }

    fn bare_item(&mut self) -> Result<BareItem, ParseError> {
        match self.peek() {
            Some(b'"') => self.string(),
            Some(b':') => self.byte_seq(),
            Some(b'?') => self.boolean(),
            Some(c) if c == b'-' || c.is_ascii_digit() => self.integer(),
            Some(c) if c.is_ascii_alphabetic() || c == b'*' => Ok(self.token()),
            _ => Err(self.error("bare item")),
        }
    }

    fn string(&mut self) -> Result<BareItem, ParseError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("closing '\"'")),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(BareItem::String(out));
                },
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c @ (b'"' | b'\\')) => {
                            out.push(char::from(c));
                            self.pos += 1;
                        },
                        _ => return Err(self.error("escaped '\"' or '\\'")),
                    }
                },
                Some(c) if (0x20..0x7f).contains(&c) => {
                    out.push(char::from(c));
                    self.pos += 1;
                },
                Some(_) => return Err(self.error("visible ASCII")),
            }
        }
    }

    fn byte_seq(&mut self) -> Result<BareItem, ParseError> {
        self.pos += 1;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b':' {
                break;
            }
            if !(c.is_ascii_alphanumeric() || matches!(c, b'+' | b'/' | b'=')) {
                return Err(self.error("base64"));
            }
            self.pos += 1;
        }
        let encoded = self.slice(start);
        if !self.eat(b':') {
            return Err(self.error("closing ':'"));
        }
        STANDARD
            .decode(encoded)
            .map(BareItem::ByteSeq)
            .map_err(|_| ParseError { position: start, expected: "valid base64" })
    }

    fn boolean(&mut self) -> Result<BareItem, ParseError> {
        self.pos += 1;
        if self.eat(b'1') {
            Ok(BareItem::Boolean(true))
        } else if self.eat(b'0') {
            Ok(BareItem::Boolean(false))
        } else {
            Err(self.error("'1' or '0'"))
        }
    }

    fn integer(&mut self) -> Result<BareItem, ParseError> {
        let start = self.pos;
        self.eat(b'-');
        let digits = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == digits || self.pos - digits > 15 {
            return Err(self.error("integer of 1 to 15 digits"));
        }
        self.slice(start)
            .parse()
            .map(BareItem::Integer)
            .map_err(|_| ParseError { position: start, expected: "integer" })
    }

    fn token(&mut self) -> BareItem {
        let start = self.pos;
        self.pos += 1;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~:/".contains(&c) {
                self.pos += 1;
            } else {
                break;
            }
        }
        BareItem::Token(self.slice(start))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_signature_input_dictionary() {
        let input = r#"sig1=("@method" "@authority" "content-digest");created=1618884473;keyid="test-key-rsa-pss";alg="rsa-pss-sha512""#;
        let dict = parse_dictionary(input).unwrap();
        assert_eq!(dict.len(), 1);
        let (label, member) = &dict[0];
        assert_eq!(label, "sig1");
        let Member::InnerList(items, params) = member else { panic!("expected inner list") };
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].value, BareItem::String("@method".into()));
        assert_eq!(params.get("created"), Some(&BareItem::Integer(1_618_884_473)));
        assert_eq!(params.get("keyid"), Some(&BareItem::String("test-key-rsa-pss".into())));
    }

    #[test]
    fn test_member_reserializes_canonically() {
        let input = r#"sig1=("@method"  "@path");created=1;nonce="a\"b""#;
        let dict = parse_dictionary(input).unwrap();
        assert_eq!(dict[0].1.to_string(), r#"("@method" "@path");created=1;nonce="a\"b""#);
    }

    #[test]
    fn test_byte_sequences_and_multiple_members() {
        let dict = parse_dictionary("sha-256=:AAEC:, sha-512=:/w==:").unwrap();
        assert_eq!(dict.len(), 2);
        assert!(matches!(&dict[0].1, Member::Item(Item { value: BareItem::ByteSeq(b), .. }) if b == &[0, 1, 2]));
        assert_eq!(dict[1].0, "sha-512");
    }

    #[test]
    fn test_component_parameters() {
        let dict = parse_dictionary(r#"sig=("@query-param";name="id" "x-h";sf)"#).unwrap();
        let Member::InnerList(items, _) = &dict[0].1 else { panic!() };
        assert_eq!(items[0].params.get("name"), Some(&BareItem::String("id".into())));
        assert_eq!(items[1].params.get("sf"), Some(&BareItem::Boolean(true)));
        assert_eq!(dict[0].1.to_string(), r#"("@query-param";name="id" "x-h";sf)"#);
    }

    #[rstest]
    #[case::uppercase_key("Sig1=:AA==:")]
    #[case::unterminated_string(r#"sig1=("@method)"#)]
    #[case::bad_base64("sig1=:!!:")]
    #[case::trailing_comma("sig1=:AA==:,")]
    #[case::duplicate_key("a=1, a=2")]
    #[case::missing_separator("a=1 b=2")]
    fn test_rejects_malformed(#[case] input: &str) {
        assert!(parse_dictionary(input).is_err(), "accepted {input:?}");
    }
}
