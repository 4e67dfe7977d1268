//! Incremental markup decoding.
//!
//! Bytes arrive in arbitrary chunks. Each [`StreamingDecoder::feed`] parses
//! the longest prefix that ends on a tag boundary and keeps the tail for the
//! next call, so the payload is never buffered whole before parsing starts.
//! Open elements live on the decoder's own stack, so an element may open in
//! one chunk and close many chunks later. Long runs of character data are
//! flushed into the open element without waiting for the next tag.
//!
//! An element holding both child elements and non-blank text keeps the
//! trimmed text under a `data` key beside its children.

use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;

use super::StructuredValue;

/// Upper bound on bytes held back while waiting for a tag to complete.
const MAX_HELD_BYTES: usize = 1024 * 1024;

/// Character data held past this size is flushed before the next tag arrives.
const TEXT_FLUSH_BYTES: usize = 64 * 1024;

/// Key under which mixed-content text is kept.
const MIXED_TEXT_KEY: &str = "data";

/// Errors raised by malformed or truncated markup.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The markup parser rejected the input.
    #[error("malformed markup at byte {offset}: {source}")]
    Syntax {
        /// Offset into the body where parsing failed.
        offset: usize,
        /// The underlying parser error.
        #[source]
        source: quick_xml::Error,
    },

    /// Text or a tag name could not be decoded.
    #[error("invalid text at byte {offset}: {reason}")]
    InvalidText {
        /// Offset of the event that failed.
        offset: usize,
        /// Decoder message.
        reason: String,
    },

    /// A closing tag did not match the innermost open element.
    #[error("closing tag </{found}> does not match open <{expected}>")]
    MismatchedTag {
        /// Name of the open element.
        expected: String,
        /// Name found in the closing tag.
        found: String,
    },

    /// A closing tag appeared with no element open.
    #[error("unexpected closing tag </{found}>")]
    UnexpectedClose {
        /// Name found in the closing tag.
        found: String,
    },

    /// A second top-level element started after the root closed.
    #[error("second root element <{name}>")]
    MultipleRoots {
        /// Name of the extra element.
        name: String,
    },

    /// The body ended inside an element.
    #[error("body ended inside <{open}>")]
    Truncated {
        /// Innermost element still open.
        open: String,
    },
}

impl DecodeError {
    fn invalid_text(offset: usize, reason: impl ToString) -> Self {
        Self::InvalidText {
            offset,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Frame {
    name: String,
    text: String,
    children: BTreeMap<String, Vec<StructuredValue>>,
}

impl Frame {
    fn into_value(self) -> StructuredValue {
        if self.children.is_empty() {
            return StructuredValue::Text(self.text);
        }
        let mixed = self.text.trim();
        let mut children = self.children;
        if !mixed.is_empty() && !children.contains_key(MIXED_TEXT_KEY) {
            children.insert(
                MIXED_TEXT_KEY.to_string(),
                vec![StructuredValue::Text(mixed.to_string())],
            );
        }
        let map = children
            .into_iter()
            .map(|(name, mut occurrences)| {
                let value = if occurrences.len() == 1 {
                    occurrences.remove(0)
                } else {
                    StructuredValue::Sequence(occurrences)
                };
                (name, value)
            })
            .collect();
        StructuredValue::Mapping(map)
    }
}

/// Builds a [`StructuredValue`] from markup fed in chunks.
#[derive(Debug, Default)]
pub struct StreamingDecoder {
    pending: Vec<u8>,
    consumed: usize,
    stack: Vec<Frame>,
    root: Option<StructuredValue>,
}

impl StreamingDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next chunk of the body.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] as soon as the markup is known to be malformed.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), DecodeError> {
        self.pending.extend_from_slice(chunk);
        if let Some(cut) = self.pending.iter().rposition(|&b| b == b'>') {
            let ready: Vec<u8> = self.pending.drain(..=cut).collect();
            self.parse(ready, false)?;
        }
        self.flush_text()?;
        self.check_held()
    }

    /// Completes decoding and returns the root mapping.
    ///
    /// An empty or whitespace-only body yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the remaining input is malformed or an
    /// element is still open.
    pub fn finish(mut self) -> Result<Option<StructuredValue>, DecodeError> {
        let rest = std::mem::take(&mut self.pending);
        if !rest.is_empty() {
            self.parse(rest, true)?;
        }
        if let Some(frame) = self.stack.last() {
            return Err(DecodeError::Truncated {
                open: frame.name.clone(),
            });
        }
        Ok(self.root)
    }

    fn check_held(&self) -> Result<(), DecodeError> {
        if self.pending.len() > MAX_HELD_BYTES {
            return Err(DecodeError::invalid_text(
                self.consumed,
                format!("markup not closed within {MAX_HELD_BYTES} bytes"),
            ));
        }
        Ok(())
    }

    /// Moves a long run of character data at the head of `pending` into the
    /// open element. Held input always starts after a `>` or at a `<`, so
    /// everything before the first `<` is text.
    fn flush_text(&mut self) -> Result<(), DecodeError> {
        let mut end = self
            .pending
            .iter()
            .position(|&b| b == b'<')
            .unwrap_or(self.pending.len());
        if end < TEXT_FLUSH_BYTES {
            return Ok(());
        }
        // Keep a trailing entity reference until its `;` arrives.
        if let Some(amp) = self.pending[..end].iter().rposition(|&b| b == b'&')
            && !self.pending[amp..end].contains(&b';')
        {
            end = amp;
        }
        let end = match std::str::from_utf8(&self.pending[..end]) {
            Ok(_) => end,
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                return Err(DecodeError::invalid_text(
                    self.consumed + e.valid_up_to(),
                    e,
                ));
            }
        };
        let raw = String::from_utf8(self.pending.drain(..end).collect())
            .map_err(|e| DecodeError::invalid_text(self.consumed, e))?;
        let text = quick_xml::escape::unescape(&raw)
            .map_err(|e| DecodeError::invalid_text(self.consumed, e))?;
        self.text(&text);
        self.consumed += end;
        Ok(())
    }

    /// Parses `input`. Outside the final pass, a parser error keeps the
    /// unparsed remainder pending, since a `>` inside a comment or attribute
    /// can end the prefix early.
    fn parse(&mut self, input: Vec<u8>, last: bool) -> Result<(), DecodeError> {
        let mut reader = Reader::from_reader(input.as_slice());
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.expand_empty_elements = true;

        let mut good = 0usize;
        loop {
            let offset = self.consumed + good;
            let event = match reader.read_event() {
                Ok(event) => event,
                Err(source) if last => return Err(DecodeError::Syntax { offset, source }),
                Err(_) => {
                    let mut held = input[good..].to_vec();
                    held.extend_from_slice(&self.pending);
                    self.pending = held;
                    self.consumed += good;
                    return Ok(());
                }
            };
            match event {
                Event::Start(start) => {
                    let name = std::str::from_utf8(start.name().as_ref())
                        .map_err(|e| DecodeError::invalid_text(offset, e))?
                        .to_string();
                    self.open(name)?;
                }
                Event::End(end) => {
                    let name = std::str::from_utf8(end.name().as_ref())
                        .map_err(|e| DecodeError::invalid_text(offset, e))?
                        .to_string();
                    self.close(&name)?;
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| DecodeError::invalid_text(offset, e))?;
                    self.text(&text);
                }
                Event::CData(data) => {
                    let bytes = data.into_inner();
                    let text = std::str::from_utf8(&bytes)
                        .map_err(|e| DecodeError::invalid_text(offset, e))?;
                    self.text(text);
                }
                Event::Eof => break,
                _ => {}
            }
            good = usize::try_from(reader.buffer_position()).unwrap_or(input.len());
        }
        self.consumed += input.len();
        Ok(())
    }

    fn open(&mut self, name: String) -> Result<(), DecodeError> {
        if self.stack.is_empty() && self.root.is_some() {
            return Err(DecodeError::MultipleRoots { name });
        }
        self.stack.push(Frame {
            name,
            ..Frame::default()
        });
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if let Some(frame) = self.stack.last_mut() {
            frame.text.push_str(text);
        }
    }

    fn close(&mut self, name: &str) -> Result<(), DecodeError> {
        let Some(frame) = self.stack.pop() else {
            return Err(DecodeError::UnexpectedClose {
                found: name.to_string(),
            });
        };
        if frame.name != name {
            return Err(DecodeError::MismatchedTag {
                expected: frame.name,
                found: name.to_string(),
            });
        }
        let name = frame.name.clone();
        let value = frame.into_value();
        match self.stack.last_mut() {
            Some(parent) => parent.children.entry(name).or_default().push(value),
            None => {
                let mut root = BTreeMap::new();
                root.insert(name, value);
                self.root = Some(StructuredValue::Mapping(root));
            }
        }
        Ok(())
    }
}

/// Decodes a complete body in one call.
///
/// # Errors
///
/// Returns [`DecodeError`] for malformed or truncated markup.
pub fn decode(body: &[u8]) -> Result<Option<StructuredValue>, DecodeError> {
    let mut decoder = StreamingDecoder::new();
    decoder.feed(body)?;
    decoder.finish()
}
