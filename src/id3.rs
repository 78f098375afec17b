//! ID3v2.4 tag assembly.
//!
//! Frames live in an arena owned by [`Id3Tag`] and are addressed through
//! [`FrameHandle`]s. Attachment is a stack: the most recently attached
//! top-level frame is written first, and the same holds for frames embedded in
//! a chapter. Readers in the field depend on that order.
//!
//! Size fields use the historical encoding of this tag writer: the plain
//! 32-bit value is shifted through 7-bit positions without masking each byte.
//! For sizes below 128 this matches real syncsafe integers.

use tracing::warn;

/// Length of the tag header and of every frame header.
pub const HEADER_BYTES: usize = 10;

/// Errors raised while building or compiling a tag.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Id3Error {
    /// Identifiers are four characters from `A-Z0-9`.
    #[error("invalid frame identifier {0:?}")]
    InvalidIdentifier(String),
    /// The identifier does not belong to the requested frame class.
    #[error("frame {id} cannot be built as a {class} frame")]
    WrongClass {
        /// Identifier given.
        id: String,
        /// Frame class requested.
        class: &'static str,
    },
    /// Only chapter frames accept embedded frames.
    #[error("frame {0} does not support embedded frames")]
    EmbeddingNotSupported(String),
    /// The handle does not belong to this tag.
    #[error("unknown frame handle {0}")]
    UnknownFrame(usize),
    /// The chapter element identifier contains a null byte.
    #[error("chapter element id contains a null byte")]
    InvalidElementId,
    /// The compiled tag would not fit the 32-bit size field.
    #[error("tag size {0} exceeds the size field")]
    TooLarge(usize),
}

/// Text encoding marker written before text payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextEncoding {
    /// ISO-8859-1, marker 0.
    Latin1 = 0,
    /// UTF-8, marker 3.
    Utf8 = 3,
}

impl TextEncoding {
    fn encode(text: &str) -> (Self, Vec<u8>) {
        if text.chars().all(|c| (c as u32) < 0x100) {
            (Self::Latin1, text.chars().map(|c| c as u8).collect())
        } else {
            (Self::Utf8, text.as_bytes().to_vec())
        }
    }
}

/// Payload of a frame, fixed when the frame is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameBody {
    /// Encoding marker, text, optional terminating null.
    Text {
        /// Encoding of `bytes`.
        encoding: TextEncoding,
        /// Encoded text.
        bytes: Vec<u8>,
        /// Append a null after the text.
        terminated: bool,
    },
    /// `TXXX`: encoding marker, description, null, value.
    UserText {
        /// Encoding of both strings.
        encoding: TextEncoding,
        /// Encoded description.
        description: Vec<u8>,
        /// Encoded value.
        value: Vec<u8>,
    },
    /// Decimal digits with no encoding marker.
    Numeric(u64),
    /// `CHAP`: element id, timing and offsets; embedded frames follow.
    Chapter {
        /// Element identifier, written null terminated.
        element_id: Vec<u8>,
        /// Start time in milliseconds.
        start_ms: u32,
        /// End time in milliseconds.
        end_ms: u32,
        /// Byte offset of the chapter start, `u32::MAX` if unused.
        start_offset: u32,
        /// Byte offset of the chapter end, `u32::MAX` if unused.
        end_offset: u32,
    },
}

impl FrameBody {
    fn class(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::UserText { .. } => "user text",
            Self::Numeric(_) => "numeric",
            Self::Chapter { .. } => "chapter",
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Text {
                bytes, terminated, ..
            } => 1 + bytes.len() + *terminated as usize,
            Self::UserText {
                description, value, ..
            } => 1 + description.len() + 1 + value.len(),
            Self::Numeric(value) => decimal_len(*value),
            Self::Chapter { element_id, .. } => element_id.len() + 1 + 16,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            Self::Text {
                encoding,
                bytes,
                terminated,
            } => {
                out.push(*encoding as u8);
                out.extend_from_slice(bytes);
                if *terminated {
                    out.push(0);
                }
            }
            Self::UserText {
                encoding,
                description,
                value,
            } => {
                out.push(*encoding as u8);
                out.extend_from_slice(description);
                out.push(0);
                out.extend_from_slice(value);
            }
            Self::Numeric(value) => out.extend_from_slice(value.to_string().as_bytes()),
            Self::Chapter {
                element_id,
                start_ms,
                end_ms,
                start_offset,
                end_offset,
            } => {
                out.extend_from_slice(element_id);
                out.push(0);
                for field in [start_ms, end_ms, start_offset, end_offset] {
                    out.extend_from_slice(&field.to_be_bytes());
                }
            }
        }
    }
}

fn decimal_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 10 {
        value /= 10;
        len += 1;
    }
    len
}

/// A frame ready to be attached to a tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Id3Frame {
    id: [u8; 4],
    body: FrameBody,
}

impl Id3Frame {
    /// Text information frame (`T???` other than `TXXX` and `TLEN`),
    /// null terminated.
    pub fn text(id: &str, text: &str) -> Result<Self, Id3Error> {
        let id = parse_id(id)?;
        if id[0] != b'T' || &id == b"TXXX" || &id == b"TLEN" {
            return Err(wrong_class(id, "text"));
        }
        let (encoding, bytes) = TextEncoding::encode(text);
        Ok(Self {
            id,
            body: FrameBody::Text {
                encoding,
                bytes,
                terminated: true,
            },
        })
    }

    /// Drop the terminating null of a text frame.
    pub fn unterminated(mut self) -> Self {
        if let FrameBody::Text { terminated, .. } = &mut self.body {
            *terminated = false;
        }
        self
    }

    /// User-defined text frame (`TXXX`).
    pub fn user_text(description: &str, value: &str) -> Self {
        let combined = format!("{description}{value}");
        let (encoding, _) = TextEncoding::encode(&combined);
        let encode = |s: &str| match encoding {
            TextEncoding::Latin1 => s.chars().map(|c| c as u8).collect(),
            TextEncoding::Utf8 => s.as_bytes().to_vec(),
        };
        Self {
            id: *b"TXXX",
            body: FrameBody::UserText {
                encoding,
                description: encode(description),
                value: encode(value),
            },
        }
    }

    /// Numeric frame such as `TLEN` (length in milliseconds).
    pub fn numeric(id: &str, value: u64) -> Result<Self, Id3Error> {
        let id = parse_id(id)?;
        if &id == b"TXXX" || &id == b"CHAP" {
            return Err(wrong_class(id, "numeric"));
        }
        Ok(Self {
            id,
            body: FrameBody::Numeric(value),
        })
    }

    /// Chapter frame. Use `u32::MAX` for offsets that are not known.
    pub fn chapter(
        element_id: &str,
        start_ms: u32,
        end_ms: u32,
        start_offset: u32,
        end_offset: u32,
    ) -> Result<Self, Id3Error> {
        if element_id.as_bytes().contains(&0) {
            return Err(Id3Error::InvalidElementId);
        }
        Ok(Self {
            id: *b"CHAP",
            body: FrameBody::Chapter {
                element_id: element_id.as_bytes().to_vec(),
                start_ms,
                end_ms,
                start_offset,
                end_offset,
            },
        })
    }

    /// Four character identifier.
    pub fn id(&self) -> &str {
        // Identifiers are validated ASCII.
        std::str::from_utf8(&self.id).unwrap_or("????")
    }

    /// Payload.
    pub fn body(&self) -> &FrameBody {
        &self.body
    }

    fn accepts_children(&self) -> bool {
        matches!(self.body, FrameBody::Chapter { .. })
    }
}

fn parse_id(id: &str) -> Result<[u8; 4], Id3Error> {
    let bytes = id.as_bytes();
    if bytes.len() != 4
        || !bytes
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    {
        return Err(Id3Error::InvalidIdentifier(id.to_string()));
    }
    Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn wrong_class(id: [u8; 4], class: &'static str) -> Id3Error {
    Id3Error::WrongClass {
        id: String::from_utf8_lossy(&id).into_owned(),
        class,
    }
}

/// Handle to a frame attached to an [`Id3Tag`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameHandle(usize);

struct FrameNode {
    frame: Id3Frame,
    parent: Option<FrameHandle>,
    next: Option<FrameHandle>,
    prev: Option<FrameHandle>,
    first_child: Option<FrameHandle>,
}

/// A tag under construction.
pub struct Id3Tag {
    nodes: Vec<FrameNode>,
    first: Option<FrameHandle>,
    padding: usize,
}

impl Id3Tag {
    /// Empty tag with `padding` zero bytes after the frames.
    pub fn new(padding: usize) -> Self {
        Self {
            nodes: Vec::new(),
            first: None,
            padding,
        }
    }

    /// Number of frames, embedded ones included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tag has no frames.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Frame behind a handle.
    pub fn frame(&self, handle: FrameHandle) -> Option<&Id3Frame> {
        self.nodes.get(handle.0).map(|node| &node.frame)
    }

    /// Parent of an embedded frame.
    pub fn parent(&self, handle: FrameHandle) -> Option<FrameHandle> {
        self.nodes.get(handle.0).and_then(|node| node.parent)
    }

    /// Push a frame onto the top level.
    pub fn attach(&mut self, frame: Id3Frame) -> FrameHandle {
        let handle = self.insert(frame, None, self.first);
        self.first = Some(handle);
        handle
    }

    /// Push a frame into a chapter.
    pub fn embed(&mut self, parent: FrameHandle, frame: Id3Frame) -> Result<FrameHandle, Id3Error> {
        let node = self
            .nodes
            .get(parent.0)
            .ok_or(Id3Error::UnknownFrame(parent.0))?;
        if !node.frame.accepts_children() {
            let id = node.frame.id().to_string();
            warn!(
                frame = %id,
                class = node.frame.body.class(),
                child = frame.id(),
                "embedding not supported"
            );
            return Err(Id3Error::EmbeddingNotSupported(id));
        }
        let first_child = node.first_child;
        let handle = self.insert(frame, Some(parent), first_child);
        self.nodes[parent.0].first_child = Some(handle);
        Ok(handle)
    }

    fn insert(
        &mut self,
        frame: Id3Frame,
        parent: Option<FrameHandle>,
        next: Option<FrameHandle>,
    ) -> FrameHandle {
        let handle = FrameHandle(self.nodes.len());
        if let Some(next) = next {
            self.nodes[next.0].prev = Some(handle);
        }
        self.nodes.push(FrameNode {
            frame,
            parent,
            next,
            prev: None,
            first_child: None,
        });
        handle
    }

    /// Top-level frames in output order.
    pub fn frames(&self) -> Vec<FrameHandle> {
        self.chain(self.first)
    }

    /// Frames embedded in `parent`, in output order.
    pub fn children(&self, parent: FrameHandle) -> Vec<FrameHandle> {
        self.chain(self.nodes.get(parent.0).and_then(|node| node.first_child))
    }

    fn chain(&self, mut cursor: Option<FrameHandle>) -> Vec<FrameHandle> {
        let mut out = Vec::new();
        while let Some(handle) = cursor {
            out.push(handle);
            cursor = self.nodes[handle.0].next;
        }
        out
    }

    /// Sibling attached right after `handle`, which is written just before it.
    pub fn previous(&self, handle: FrameHandle) -> Option<FrameHandle> {
        self.nodes.get(handle.0).and_then(|node| node.prev)
    }

    /// Serialise the tag: header, frames, padding.
    pub fn compile(&self) -> Result<Vec<u8>, Id3Error> {
        // Frame sizes, children first. Embedded frames are always created
        // after their parent, so a descending index walk is post-order.
        let mut total = vec![0usize; self.nodes.len()];
        for index in (0..self.nodes.len()).rev() {
            let node = &self.nodes[index];
            total[index] += HEADER_BYTES + node.frame.body.len();
            if let Some(parent) = node.parent {
                debug_assert!(parent.0 < index);
                total[parent.0] += total[index];
            }
        }

        let frames_len: usize = self.frames().iter().map(|h| total[h.0]).sum();
        let tag_size = frames_len + self.padding;
        let tag_size_field = size_field(tag_size)?;

        let mut out = Vec::with_capacity(HEADER_BYTES + tag_size);
        out.extend_from_slice(b"ID3\x04\x00\x00");
        out.extend_from_slice(&tag_size_field);

        let mut stack: Vec<FrameHandle> = self.frames().into_iter().rev().collect();
        while let Some(handle) = stack.pop() {
            let node = &self.nodes[handle.0];
            out.extend_from_slice(&node.frame.id);
            out.extend_from_slice(&size_field(total[handle.0] - HEADER_BYTES)?);
            out.extend_from_slice(&[0, 0]);
            node.frame.body.write(&mut out);
            stack.extend(self.children(handle).into_iter().rev());
        }
        out.resize(out.len() + self.padding, 0);
        Ok(out)
    }
}

/// Size field as written by this tag writer.
pub fn size_field(size: usize) -> Result<[u8; 4], Id3Error> {
    let value = u32::try_from(size).map_err(|_| Id3Error::TooLarge(size))?;
    Ok([
        (value >> 21) as u8,
        (value >> 14) as u8,
        (value >> 7) as u8,
        value as u8,
    ])
}
