use super::input::ContentInput;
use crate::charset::Charset;
use crate::error::Result;

const READ_CHUNK: usize = 4096;

/// Incremental byte → character decoder.
///
/// Lives inside [`ContentInput`] so every [`BodyReader`] handed out for a request
/// continues where the previous one stopped, including a multi-byte sequence split
/// across two chunks.
#[derive(Debug, Default)]
pub struct CharDecoder {
    charset: Charset,
    pending: Vec<u8>,
    text: String,
}

impl CharDecoder {
    pub(super) fn set_charset(&mut self, charset: Charset) {
        self.charset = charset;
    }

    #[must_use]
    pub fn charset(&self) -> Charset {
        self.charset
    }

    fn decode(&mut self, bytes: &[u8]) {
        match self.charset {
            Charset::Iso8859_1 => self.text.extend(bytes.iter().map(|&b| char::from(b))),
            Charset::Utf8 => {
                self.pending.extend_from_slice(bytes);
                let mut start = 0;
                while start < self.pending.len() {
                    match std::str::from_utf8(&self.pending[start..]) {
                        Ok(s) => {
                            self.text.push_str(s);
                            start = self.pending.len();
                        }
                        Err(e) => {
                            let valid = e.valid_up_to();
                            self.text
                                .push_str(&String::from_utf8_lossy(&self.pending[start..start + valid]));
                            start += valid;
                            match e.error_len() {
                                Some(bad) => {
                                    self.text.push(char::REPLACEMENT_CHARACTER);
                                    start += bad;
                                }
                                // incomplete sequence, wait for the next chunk
                                None => break,
                            }
                        }
                    }
                }
                self.pending.drain(..start);
            }
        }
    }

    fn finish(&mut self) {
        if !self.pending.is_empty() {
            self.pending.clear();
            self.text.push(char::REPLACEMENT_CHARACTER);
        }
    }
}

/// Character view of a request body
pub struct BodyReader<'a> {
    input: &'a mut ContentInput,
}

impl<'a> BodyReader<'a> {
    pub(super) fn new(input: &'a mut ContentInput) -> Self {
        Self { input }
    }

    /// Charset the body is decoded with
    #[must_use]
    pub fn charset(&self) -> Charset {
        self.input.decoder.charset()
    }

    /// Decode another chunk; false at end of content
    fn fill(&mut self) -> Result<bool> {
        let mut buf = [0u8; READ_CHUNK];
        let n = self.input.read_bytes(&mut buf)?;
        if n == 0 {
            self.input.decoder.finish();
            return Ok(false);
        }
        self.input.decoder.decode(&buf[..n]);
        Ok(true)
    }

    /// Next run of decoded characters, `None` at end of content
    pub fn read_chunk(&mut self) -> Result<Option<String>> {
        loop {
            if !self.input.decoder.text.is_empty() {
                return Ok(Some(std::mem::take(&mut self.input.decoder.text)));
            }
            if !self.fill()? && self.input.decoder.text.is_empty() {
                return Ok(None);
            }
        }
    }

    /// Next line without its `\n` or `\r\n` terminator, `None` at end of content
    pub fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            let text = &mut self.input.decoder.text;
            if let Some(pos) = text.find('\n') {
                let mut line: String = text.drain(..=pos).collect();
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }
            if !self.fill()? {
                let rest = std::mem::take(&mut self.input.decoder.text);
                return Ok((!rest.is_empty()).then_some(rest));
            }
        }
    }

    /// Everything up to the end of content
    pub fn read_to_string(&mut self) -> Result<String> {
        while self.fill()? {}
        Ok(std::mem::take(&mut self.input.decoder.text))
    }
}
