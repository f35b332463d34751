//! PostgreSQL binary COPY stream writer

use super::value::EncodedField;

const SIGNATURE: &[u8; 11] = b"PGCOPY\n\xff\r\n\0";

/// Builds a `COPY ... FROM STDIN WITH BINARY` payload
///
/// Header is written on construction; call [`BinaryCopyWriter::finish`] to
/// append the trailer and take the bytes.
pub struct BinaryCopyWriter {
    buf: Vec<u8>,
    rows: usize,
}

impl BinaryCopyWriter {
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(4096);
        buf.extend_from_slice(SIGNATURE);
        // flags
        buf.extend_from_slice(&0i32.to_be_bytes());
        // header extension length
        buf.extend_from_slice(&0i32.to_be_bytes());
        Self { buf, rows: 0 }
    }

    /// Append one tuple. Field widths were checked when the batch was prepared.
    pub fn write_row(&mut self, fields: &[EncodedField]) {
        self.buf
            .extend_from_slice(&(fields.len() as i16).to_be_bytes());
        for field in fields {
            match field {
                None => self.buf.extend_from_slice(&(-1i32).to_be_bytes()),
                Some(bytes) => {
                    self.buf
                        .extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    self.buf.extend_from_slice(bytes);
                }
            }
        }
        self.rows += 1;
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.buf.extend_from_slice(&(-1i16).to_be_bytes());
        self.buf
    }
}

impl Default for BinaryCopyWriter {
    fn default() -> Self {
        Self::new()
    }
}
