//! Incremental UTF-8 decoding of response body reads.
//!
//! The relay makes no promise about where one read ends and the next
//! begins, so a multi-byte character may arrive in two pieces. The decoder
//! holds back an incomplete trailing sequence until the rest shows up.

/// Longest possible UTF-8 sequence.
const MAX_SEQUENCE: usize = 4;

#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one read. Invalid sequences become U+FFFD; an incomplete
    /// sequence at the end is kept for the next call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            debug_assert!(self.pending.len() < MAX_SEQUENCE);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush at end of body. A sequence that never completed is replaced.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
