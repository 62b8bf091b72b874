//! Hierarchical model for tagged (XML) seeds.
//!
//! The reader understands elements, quoted attributes, character data, CDATA
//! sections and the predefined/numeric entities. Declarations, comments and a
//! doctype before the root element are kept verbatim as the prolog.

use crate::formats::FormatError;
use crate::mutator::{Mutation, Operation, StructuralModel};
use rand::Rng;
use rand_core::RngCore;

/// Nesting limit for seeds; deeper documents are rejected rather than
/// recursed into.
const MAX_DEPTH: usize = 256;
const LONG_TAG_LEN: usize = 0xFF;
const FORGED_ELEMENTS: usize = 0xFF;
const OVERFLOW_DEPTH: usize = 0xFFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    /// Visits this element and every descendant element, pre-order.
    pub fn walk_mut(&mut self, visit: &mut dyn FnMut(&mut Element)) {
        visit(self);
        for child in self.children.iter_mut() {
            if let Node::Element(e) = child {
                e.walk_mut(visit);
            }
        }
    }

    pub fn walk(&self, visit: &mut dyn FnMut(&Element)) {
        visit(self);
        for child in &self.children {
            if let Node::Element(e) = child {
                e.walk(visit);
            }
        }
    }

    fn write(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.tag);
        for (name, value) in &self.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            escape_into(value, true, out);
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str(" />");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                Node::Element(e) => e.write(out),
                Node::Text(t) => escape_into(t, false, out),
            }
        }
        out.push_str("</");
        out.push_str(&self.tag);
        out.push('>');
    }
}

/// A document: verbatim prolog followed by exactly one root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    prolog: String,
    root: Element,
}

impl Tree {
    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn prolog(&self) -> &str {
        &self.prolog
    }

    pub fn parse_document(input: &[u8]) -> Result<Self, FormatError> {
        let src = std::str::from_utf8(input).map_err(|_| FormatError::NotUtf8)?;
        let mut reader = Reader { src, pos: 0 };

        reader.skip_misc()?;
        let prolog = src[..reader.pos].to_string();
        if !reader.rest().starts_with('<') {
            return Err(reader.error("expected root element"));
        }
        let root = reader.element(0)?;
        reader.skip_misc()?;
        if reader.pos != src.len() {
            return Err(reader.error("content after root element"));
        }
        Ok(Self { prolog, root })
    }

    pub fn to_xml(&self) -> String {
        let mut out = self.prolog.clone();
        self.root.write(&mut out);
        out
    }
}

fn escape_into(text: &str, in_attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if in_attribute => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').and_then(|semi| {
            let entity = &rest[1..semi];
            let c = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            c.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn error(&self, reason: &str) -> FormatError {
        FormatError::Xml {
            offset: self.pos,
            reason: reason.to_string(),
        }
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    /// Advances past the next `terminator`, failing if it never appears.
    fn skip_past(&mut self, terminator: &str, what: &str) -> Result<&'a str, FormatError> {
        match self.rest().find(terminator) {
            Some(idx) => {
                let skipped = &self.rest()[..idx];
                self.pos += idx + terminator.len();
                Ok(skipped)
            }
            None => Err(self.error(&format!("unterminated {what}"))),
        }
    }

    /// Skips whitespace, comments, processing instructions and doctypes.
    fn skip_misc(&mut self) -> Result<(), FormatError> {
        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.starts_with("<?") {
                self.skip_past("?>", "processing instruction")?;
            } else if rest.starts_with("<!--") {
                self.skip_past("-->", "comment")?;
            } else if rest.starts_with("<!DOCTYPE") {
                self.skip_doctype()?;
            } else {
                return Ok(());
            }
        }
    }

    fn skip_doctype(&mut self) -> Result<(), FormatError> {
        let mut depth = 0usize;
        for (idx, c) in self.rest().char_indices() {
            match c {
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                '>' if depth == 0 => {
                    self.pos += idx + 1;
                    return Ok(());
                }
                _ => {}
            }
        }
        Err(self.error("unterminated doctype"))
    }

    fn name(&mut self) -> Result<&'a str, FormatError> {
        let rest = self.rest();
        let end = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '/' | '>' | '=' | '<'))
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(self.error("expected a name"));
        }
        self.pos += end;
        Ok(&rest[..end])
    }

    fn expect(&mut self, token: &str) -> Result<(), FormatError> {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            Ok(())
        } else {
            Err(self.error(&format!("expected '{token}'")))
        }
    }

    fn attribute_value(&mut self) -> Result<String, FormatError> {
        let quote = match self.rest().chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error("expected quoted attribute value")),
        };
        self.pos += 1;
        let raw = match self.rest().find(quote) {
            Some(idx) => {
                let raw = &self.rest()[..idx];
                self.pos += idx + 1;
                raw
            }
            None => return Err(self.error("unterminated attribute value")),
        };
        Ok(unescape(raw))
    }

    fn element(&mut self, depth: usize) -> Result<Element, FormatError> {
        if depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.expect("<")?;
        let mut element = Element::new(self.name()?);

        loop {
            self.skip_whitespace();
            if self.rest().starts_with("/>") {
                self.pos += 2;
                return Ok(element);
            }
            if self.rest().starts_with('>') {
                self.pos += 1;
                break;
            }
            let name = self.name()?;
            self.skip_whitespace();
            self.expect("=")?;
            self.skip_whitespace();
            let value = self.attribute_value()?;
            element.attributes.push((name.to_string(), value));
        }

        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return Err(self.error(&format!("unclosed element <{}>", element.tag)));
            } else if rest.starts_with("</") {
                self.pos += 2;
                let name = self.name()?;
                if name != element.tag {
                    return Err(self.error(&format!(
                        "mismatched closing tag </{name}> for <{}>",
                        element.tag
                    )));
                }
                self.skip_whitespace();
                self.expect(">")?;
                return Ok(element);
            } else if rest.starts_with("<!--") {
                self.skip_past("-->", "comment")?;
            } else if rest.starts_with("<![CDATA[") {
                self.pos += "<![CDATA[".len();
                let data = self.skip_past("]]>", "CDATA section")?;
                element.children.push(Node::Text(data.to_string()));
            } else if rest.starts_with("<?") {
                self.skip_past("?>", "processing instruction")?;
            } else if rest.starts_with('<') {
                let child = self.element(depth + 1)?;
                element.children.push(Node::Element(child));
            } else {
                let end = rest.find('<').unwrap_or(rest.len());
                element.children.push(Node::Text(unescape(&rest[..end])));
                self.pos += end;
            }
        }
    }
}

fn random_tag(rng: &mut dyn RngCore) -> String {
    (0..LONG_TAG_LEN)
        .map(|_| rng.random_range(b'a'..=b'z') as char)
        .collect()
}

fn make_longer_tag(tree: &Tree, _seed: &[u8], rng: &mut dyn RngCore) -> Mutation<Tree> {
    let mut tree = tree.clone();
    tree.root.walk_mut(&mut |e| e.tag = random_tag(rng));
    Mutation::Model(tree)
}

fn forge_attributes(tree: &Tree, _seed: &[u8], _rng: &mut dyn RngCore) -> Mutation<Tree> {
    let mut tree = tree.clone();
    for _ in 0..FORGED_ELEMENTS {
        let mut forged = Element::new("h1");
        forged.set_attribute("id", "%s".repeat(10));
        tree.root.children.push(Node::Element(forged));
    }
    Mutation::Model(tree)
}

fn alter_href(tree: &Tree, _seed: &[u8], _rng: &mut dyn RngCore) -> Mutation<Tree> {
    let mut tree = tree.clone();
    tree.root.walk_mut(&mut |e| {
        if e.attribute("href").is_some() {
            e.set_attribute("href", "%s".repeat(10));
        }
    });
    Mutation::Model(tree)
}

fn recursion_overflow(_tree: &Tree, _seed: &[u8], _rng: &mut dyn RngCore) -> Mutation<Tree> {
    let mut bytes = b"<fuz>".repeat(OVERFLOW_DEPTH);
    bytes.extend_from_slice(&b"</fuz>".repeat(OVERFLOW_DEPTH));
    Mutation::Raw(bytes)
}

impl StructuralModel for Tree {
    fn parse(seed: &[u8]) -> Result<Self, FormatError> {
        Self::parse_document(seed)
    }

    fn serialize(&self, _rng: &mut dyn RngCore) -> Vec<u8> {
        self.to_xml().into_bytes()
    }

    fn operations() -> Vec<Operation<Self>> {
        vec![
            Operation::new("make_longer_tag", make_longer_tag),
            Operation::new("forge_attributes", forge_attributes),
            Operation::new("recursion_overflow", recursion_overflow),
            Operation::new("alter_href", alter_href),
        ]
    }
}
