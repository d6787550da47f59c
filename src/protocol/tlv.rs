//! Tagged byte container (`tag:2, length:1, value:0..255` records)
// (c) 2024 the OpenSPA developers

/// Container tag. Two bytes on the wire, big-endian.
pub type Tag = u16;

/// Largest value a single record can carry; longer values are fragmented.
pub const MAX_RECORD_VALUE: usize = 255;

/// Bytes of tag + length preceding every value fragment
pub const RECORD_OVERHEAD: usize = 3;

/// One tagged value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Tag
    pub tag: Tag,
    /// Value (may be empty, may exceed one record)
    pub value: Vec<u8>,
}

impl Node {
    fn encoded_len(&self) -> usize {
        if self.value.is_empty() {
            RECORD_OVERHEAD
        } else {
            self.value.len() + self.value.len().div_ceil(MAX_RECORD_VALUE) * RECORD_OVERHEAD
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        if self.value.is_empty() {
            out.extend_from_slice(&self.tag.to_be_bytes());
            out.push(0);
            return;
        }
        for chunk in self.value.chunks(MAX_RECORD_VALUE) {
            out.extend_from_slice(&self.tag.to_be_bytes());
            #[allow(clippy::cast_possible_truncation)] // chunks are at most 255 bytes
            out.push(chunk.len() as u8);
            out.extend_from_slice(chunk);
        }
    }
}

/// An ordered, append-only bag of tagged values.
///
/// Writes never deduplicate: each [`set`](Container::set) adds a node.
/// Reads concatenate every node sharing the tag, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    nodes: Vec<Node>,
}

impl Container {
    /// Creates an empty container
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value under `tag`.
    /// Values longer than 255 bytes are split into several records when encoded.
    pub fn set<B: AsRef<[u8]>>(&mut self, tag: Tag, value: B) {
        self.nodes.push(Node {
            tag,
            value: value.as_ref().to_vec(),
        });
    }

    /// Returns the concatenation of every value stored under `tag`, or None if there are none.
    #[must_use]
    pub fn get(&self, tag: Tag) -> Option<Vec<u8>> {
        let mut found = false;
        let mut result = Vec::new();
        for node in self.nodes.iter().filter(|n| n.tag == tag) {
            found = true;
            result.extend_from_slice(&node.value);
        }
        found.then_some(result)
    }

    /// Removes every node stored under `tag`. Returns whether anything was removed.
    pub fn remove(&mut self, tag: Tag) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.tag != tag);
        before != self.nodes.len()
    }

    /// Is there anything under `tag`?
    #[must_use]
    pub fn contains(&self, tag: Tag) -> bool {
        self.nodes.iter().any(|n| n.tag == tag)
    }

    /// Number of nodes (not records)
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the container holds no nodes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates the nodes in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Length of [`encode`](Container::encode)'s output, without encoding
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.nodes.iter().map(Node::encoded_len).sum()
    }

    /// Serializes the nodes in insertion order
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        for node in &self.nodes {
            node.encode_into(&mut out);
        }
        out
    }

    /// Parses a record stream.
    ///
    /// Records sharing a tag are concatenated (in encounter order) into a single node.
    /// A truncated final record is dropped, as are 1-2 stray trailing bytes.
    #[must_use]
    pub fn parse(mut data: &[u8]) -> Self {
        let mut container = Self::new();
        while data.len() >= RECORD_OVERHEAD {
            let tag = Tag::from_be_bytes([data[0], data[1]]);
            let len = usize::from(data[2]);
            data = &data[RECORD_OVERHEAD..];
            if data.len() < len {
                break;
            }
            let (value, rest) = data.split_at(len);
            data = rest;
            if let Some(node) = container.nodes.iter_mut().find(|n| n.tag == tag) {
                node.value.extend_from_slice(value);
            } else {
                container.nodes.push(Node {
                    tag,
                    value: value.to_vec(),
                });
            }
        }
        container
    }
}
