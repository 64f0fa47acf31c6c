//! Lazy decoding of one marshal buffer.
//!
//! A [`Marshal`] owns the borrowed body slice together with the two sidecar
//! tables the format mutates while parsing: the symbol table (resolving `;`
//! back-references) and the object table (resolving `@` back-references).
//! A [`Node`] is a copyable handle naming one encoded value by its byte
//! offset; children only come into existence when a caller descends into a
//! container, and a container's byte span is measured once and memoized.

use std::borrow::Cow;
use std::collections::HashMap;

use log::trace;

use crate::cursor::Cursor;
use crate::types::Error;
use crate::types::Kind;
use crate::types::Result;
use crate::types::Tag;
use crate::varint;

/// Handle to one encoded value inside a [`Marshal`] buffer.
///
/// Handles are plain offsets: cheap to copy, only meaningful together with
/// the `Marshal` that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node(usize);

/// A decoded marshal buffer.
///
/// Accessors that can discover new symbols or objects take `&mut self`:
/// decoding appends to the shared tables as a side effect. The contract is
/// single-thread-per-root; independent buffers are fully independent.
pub struct Marshal<'a> {
    major: u8,
    minor: u8,
    body: &'a [u8],
    symbols: Vec<&'a [u8]>,
    objects: Vec<usize>,
    spans: HashMap<usize, usize>,
}

/// Splits off the two version bytes and wraps the remainder as a root node
/// seeded with fresh, empty tables.
///
/// The version bytes are kept for inspection but nothing branches on them.
pub fn decode(buf: &[u8]) -> Result<Marshal<'_>> {
    if buf.len() < 2 {
        return Err(Error::Incomplete);
    }
    let (version, body) = buf.split_at(2);
    Ok(Marshal {
        major: version[0],
        minor: version[1],
        body,
        symbols: Vec::new(),
        objects: Vec::new(),
        spans: HashMap::new(),
    })
}

/// Length-prefixed byte run: packed length, then the payload.
fn read_raw<'a>(cursor: &mut Cursor<'a>) -> Result<&'a [u8]> {
    let len = varint::read(cursor)?;
    if len < 0 {
        return Err(Error::Incomplete);
    }
    cursor.read_bytes(len as usize)
}

impl<'a> Marshal<'a> {
    /// The root value.
    pub fn root(&self) -> Node {
        Node(0)
    }

    /// Format version bytes from the header (Ruby emits 4 and 8).
    pub fn version(&self) -> (u8, u8) {
        (self.major, self.minor)
    }

    /// Number of symbols interned so far.
    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Number of objects registered so far.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// What `node` is. Total: back-references are followed, and anything
    /// unreadable or outside the supported alphabet is `Kind::Unknown`.
    pub fn kind(&self, node: Node) -> Kind {
        match self.resolve(node.0) {
            Ok(off) => self.kind_at(off),
            Err(_) => Kind::Unknown,
        }
    }

    /// Encoded byte length of the value at `node`: scalars directly from
    /// their bytes, containers by one full traversal that is memoized.
    ///
    /// A `@` reference reports its own encoding length, not its target's.
    /// Measuring interns symbols and registers objects it walks over, so a
    /// later back-reference resolves even if the caller skipped the values.
    pub fn size(&mut self, node: Node) -> Result<usize> {
        self.measure(node.0)
    }

    /// Reads `node` as a boolean.
    pub fn as_bool(&self, node: Node) -> Result<bool> {
        let off = self.resolve(node.0)?;
        match self.tag_at(off)? {
            Tag::True => Ok(true),
            Tag::False => Ok(false),
            _ => Err(self.mismatch(Kind::Bool, off)),
        }
    }

    /// Reads `node` as a signed 64-bit integer.
    pub fn as_integer(&self, node: Node) -> Result<i64> {
        let off = self.resolve(node.0)?;
        if self.tag_at(off)? != Tag::Fixnum {
            return Err(self.mismatch(Kind::Integer, off));
        }
        let mut cursor = self.cursor_at(off + 1)?;
        varint::read(&mut cursor)
    }

    /// Reads `node` as an IEEE-754 double parsed from its decimal literal.
    pub fn as_float(&self, node: Node) -> Result<f64> {
        let off = self.resolve(node.0)?;
        if self.tag_at(off)? != Tag::Float {
            return Err(self.mismatch(Kind::Float, off));
        }
        let mut cursor = self.cursor_at(off + 1)?;
        let text = read_raw(&mut cursor)?;
        Ok(String::from_utf8_lossy(text).parse::<f64>()?)
    }

    /// Reads `node` as a string: a raw byte-string, an ivar-decorated
    /// byte-string, a symbol definition (interning it), or a symbol
    /// back-reference. Payload bytes are exposed as UTF-8, lossily.
    pub fn as_string(&mut self, node: Node) -> Result<Cow<'a, str>> {
        let off = self.resolve(node.0)?;
        let mut cursor = self.cursor_at(off)?;
        let b = cursor.read_byte()?;
        let text = match Tag::from_u8(b) {
            Some(Tag::RawString) => read_raw(&mut cursor)?,
            Some(Tag::Symbol) => {
                let text = read_raw(&mut cursor)?;
                self.intern(text);
                text
            }
            Some(Tag::SymbolRef) => {
                let index = varint::read(&mut cursor)?;
                self.symbol_at(index)?
            }
            Some(Tag::Ivar) => self.read_decorated(&mut cursor)?,
            Some(_) => return Err(self.mismatch(Kind::String, off)),
            None => return Err(Error::UnknownTag(b)),
        };
        Ok(String::from_utf8_lossy(text))
    }

    /// Reads `node` as an array of child handles.
    ///
    /// The walk registers the array and its children in the object table in
    /// depth-first pre-order, matching Ruby's writer.
    pub fn as_array(&mut self, node: Node) -> Result<Vec<Node>> {
        let off = self.resolve(node.0)?;
        if self.tag_at(off)? != Tag::Array {
            return Err(self.mismatch(Kind::Array, off));
        }
        self.walk_array(off).map(|(children, _)| children)
    }

    /// Reads `node` as a mapping from normalized key text to value handle.
    ///
    /// Keys are reduced with [`Marshal::to_text`]; duplicate keys resolve to
    /// the last occurrence, as in Ruby. Use [`Marshal::as_pairs`] when key
    /// identity matters.
    pub fn as_map(&mut self, node: Node) -> Result<HashMap<String, Node>> {
        let pairs = self.as_pairs(node)?;
        let mut map = HashMap::with_capacity(pairs.len());
        for (key, value) in pairs {
            map.insert(self.to_text(key)?, value);
        }
        Ok(map)
    }

    /// Reads `node` as ordered key/value handle pairs, preserving key
    /// identity (two keys that normalize to the same text stay distinct).
    pub fn as_pairs(&mut self, node: Node) -> Result<Vec<(Node, Node)>> {
        let off = self.resolve(node.0)?;
        if self.tag_at(off)? != Tag::Hash {
            return Err(self.mismatch(Kind::Map, off));
        }
        self.walk_hash(off).map(|(pairs, _)| pairs)
    }

    /// Canonical text for `node`: `<nil>`, `true`/`false`, decimal integers
    /// and floats (shortest round-trip form), string contents. Containers
    /// normalize to the empty string; they do not occur as hash keys in
    /// well-formed session data.
    pub fn to_text(&mut self, node: Node) -> Result<String> {
        let off = self.resolve(node.0)?;
        match self.kind_at(off) {
            Kind::Nil => Ok("<nil>".to_string()),
            Kind::Bool => {
                let text = if self.as_bool(node)? { "true" } else { "false" };
                Ok(text.to_string())
            }
            Kind::Integer => Ok(self.as_integer(node)?.to_string()),
            Kind::Float => Ok(self.as_float(node)?.to_string()),
            Kind::String => Ok(self.as_string(node)?.into_owned()),
            Kind::Array | Kind::Map => Ok(String::new()),
            Kind::Unknown => match self.body.get(off) {
                Some(&b) => Err(Error::UnknownTag(b)),
                None => Err(Error::Incomplete),
            },
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn cursor_at(&self, off: usize) -> Result<Cursor<'a>> {
        let body = self.body;
        body.get(off..).map(Cursor::new).ok_or(Error::Incomplete)
    }

    fn tag_at(&self, off: usize) -> Result<Tag> {
        match self.body.get(off) {
            Some(&b) => Tag::from_u8(b).ok_or(Error::UnknownTag(b)),
            None => Err(Error::Incomplete),
        }
    }

    fn kind_at(&self, off: usize) -> Kind {
        let b = match self.body.get(off) {
            Some(&b) => b,
            None => return Kind::Unknown,
        };
        match Tag::from_u8(b) {
            Some(Tag::Nil) => Kind::Nil,
            Some(Tag::True | Tag::False) => Kind::Bool,
            Some(Tag::Fixnum) => Kind::Integer,
            Some(Tag::Float) => Kind::Float,
            Some(Tag::Symbol | Tag::SymbolRef | Tag::RawString) => Kind::String,
            Some(Tag::Ivar) => match self.body.get(off + 1) {
                Some(&next) if next == Tag::RawString as u8 => Kind::String,
                _ => Kind::Unknown,
            },
            Some(Tag::Array) => Kind::Array,
            Some(Tag::Hash) => Kind::Map,
            // A resolved offset never lands on a reference; the table only
            // stores non-reference nodes.
            Some(Tag::Link) | None => Kind::Unknown,
        }
    }

    fn mismatch(&self, expected: Kind, off: usize) -> Error {
        Error::TypeMismatch { expected, found: self.kind_at(off) }
    }

    /// Follows an `@` reference to the node it names. One hop suffices:
    /// reference nodes are never registered.
    fn resolve(&self, off: usize) -> Result<usize> {
        match self.body.get(off) {
            Some(&b) if b == Tag::Link as u8 => {
                let mut cursor = self.cursor_at(off + 1)?;
                let index = varint::read(&mut cursor)?;
                if index < 0 {
                    return Err(Error::Incomplete);
                }
                self.objects.get(index as usize).copied().ok_or(Error::Incomplete)
            }
            Some(_) => Ok(off),
            None => Err(Error::Incomplete),
        }
    }

    fn symbol_at(&self, index: i64) -> Result<&'a [u8]> {
        if index < 0 {
            return Err(Error::Incomplete);
        }
        self.symbols.get(index as usize).copied().ok_or(Error::Incomplete)
    }

    fn intern(&mut self, text: &'a [u8]) {
        if !self.symbols.iter().any(|known| *known == text) {
            trace!(
                "interned symbol {:?} as index {}",
                String::from_utf8_lossy(text),
                self.symbols.len()
            );
            self.symbols.push(text);
        }
    }

    /// Object-table registration. Only candidates whose own kind is String,
    /// Array, or Map are registrable, and never through a reference or
    /// symbol form. An offset already present keeps its slot.
    fn register(&mut self, off: usize) {
        match self.kind_at(off) {
            Kind::String | Kind::Array | Kind::Map => {}
            _ => return,
        }
        if let Some(&b) = self.body.get(off) {
            if b == Tag::Link as u8 || b == Tag::Symbol as u8 || b == Tag::SymbolRef as u8 {
                return;
            }
        }
        if !self.objects.contains(&off) {
            trace!("registered object at offset {} as index {}", off, self.objects.len());
            self.objects.push(off);
        }
    }

    /// Encoded byte length of the value starting at `off`.
    fn measure(&mut self, off: usize) -> Result<usize> {
        let mut cursor = self.cursor_at(off)?;
        let b = cursor.read_byte()?;
        match Tag::from_u8(b) {
            Some(Tag::Nil | Tag::True | Tag::False) => Ok(1),
            Some(Tag::Fixnum | Tag::SymbolRef | Tag::Link) => {
                varint::read(&mut cursor)?;
                Ok(cursor.pos())
            }
            Some(Tag::Float | Tag::RawString) => {
                read_raw(&mut cursor)?;
                Ok(cursor.pos())
            }
            Some(Tag::Symbol) => {
                let text = read_raw(&mut cursor)?;
                self.intern(text);
                Ok(cursor.pos())
            }
            Some(Tag::Ivar) => {
                self.read_decorated(&mut cursor)?;
                Ok(cursor.pos())
            }
            Some(Tag::Array) => {
                if let Some(&span) = self.spans.get(&off) {
                    return Ok(span);
                }
                self.walk_array(off).map(|(_, span)| span)
            }
            Some(Tag::Hash) => {
                if let Some(&span) = self.spans.get(&off) {
                    return Ok(span);
                }
                self.walk_hash(off).map(|(_, span)| span)
            }
            None => Err(Error::UnknownTag(b)),
        }
    }

    /// Array traversal. Registers the array first, then measures and
    /// registers each child in order; the total span is memoized.
    fn walk_array(&mut self, off: usize) -> Result<(Vec<Node>, usize)> {
        let mut cursor = self.cursor_at(off)?;
        let b = cursor.read_byte()?;
        debug_assert_eq!(b, Tag::Array as u8);
        let count = varint::read(&mut cursor)?;
        if count < 0 {
            return Err(Error::Incomplete);
        }
        self.register(off);
        let mut children = Vec::with_capacity((count as usize).min(cursor.remaining()));
        let mut child = off + cursor.pos();
        for _ in 0..count {
            let span = self.measure(child)?;
            self.register(child);
            children.push(Node(child));
            child += span;
        }
        let total = child - off;
        self.spans.insert(off, total);
        Ok((children, total))
    }

    /// Hash traversal. Registration order is the container, then key, then
    /// value, for each pair — matching Ruby's writer.
    fn walk_hash(&mut self, off: usize) -> Result<(Vec<(Node, Node)>, usize)> {
        let mut cursor = self.cursor_at(off)?;
        let b = cursor.read_byte()?;
        debug_assert_eq!(b, Tag::Hash as u8);
        let count = varint::read(&mut cursor)?;
        if count < 0 {
            return Err(Error::Incomplete);
        }
        self.register(off);
        let mut pairs = Vec::with_capacity((count as usize).min(cursor.remaining()));
        let mut next = off + cursor.pos();
        for _ in 0..count {
            let key = next;
            let span = self.measure(key)?;
            self.register(key);
            next = key + span;

            let value = next;
            let span = self.measure(value)?;
            self.register(value);
            next = value + span;

            pairs.push((Node(key), Node(value)));
        }
        let total = next - off;
        self.spans.insert(off, total);
        Ok((pairs, total))
    }

    /// `I"` decorated string, with the cursor positioned after the `I`.
    ///
    /// Returns the raw body and consumes the attached instance-variable
    /// pairs exactly (sizes depend on it) while ignoring their meaning.
    /// Rails writers attach one pair, `:E => true/false`, or `:encoding`
    /// with a raw byte-string naming the encoding.
    fn read_decorated(&mut self, cursor: &mut Cursor<'a>) -> Result<&'a [u8]> {
        let b = cursor.read_byte()?;
        if b != Tag::RawString as u8 {
            return Err(Error::UnknownTag(b));
        }
        let text = read_raw(cursor)?;
        let pairs = varint::read(cursor)?;
        if pairs < 0 {
            return Err(Error::Incomplete);
        }
        for _ in 0..pairs {
            self.read_annotation_symbol(cursor)?;
            if cursor.peek_byte()? == Tag::RawString as u8 {
                cursor.skip(1)?;
                read_raw(cursor)?;
            } else {
                // One-byte primitive, the true/false of the :E flag.
                cursor.skip(1)?;
            }
        }
        Ok(text)
    }

    /// A symbol in annotation position: a definition (interned) or a
    /// back-reference.
    fn read_annotation_symbol(&mut self, cursor: &mut Cursor<'a>) -> Result<&'a [u8]> {
        let b = cursor.read_byte()?;
        match Tag::from_u8(b) {
            Some(Tag::Symbol) => {
                let text = read_raw(cursor)?;
                self.intern(text);
                Ok(text)
            }
            Some(Tag::SymbolRef) => {
                let index = varint::read(cursor)?;
                self.symbol_at(index)
            }
            _ => Err(Error::UnknownTag(b)),
        }
    }
}
