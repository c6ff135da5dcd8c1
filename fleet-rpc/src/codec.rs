use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;

/// Splits a byte stream into newline-delimited JSON records.
///
/// Chunks may end mid-record; the tail is kept until the next newline arrives.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: BytesMut,
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Decodes the next complete line, skipping blank ones.
    pub fn next_record<T: DeserializeOwned>(&mut self) -> Option<serde_json::Result<T>> {
        loop {
            let pos = self.buf.iter().position(|b| *b == b'\n')?;
            let line = self.buf.split_to(pos);
            self.buf.advance(1);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(serde_json::from_slice(&line));
        }
    }

    /// Bytes received after the last newline.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use fleet_core::{Trace, Value};

    use super::*;

    #[test]
    fn records_split_across_chunks() {
        let a = Trace::new(vec![Value::from("a"), Value::from(1_i64)]);
        let b = Trace::new(vec![Value::from(true)]);
        let mut wire = serde_json::to_vec(&a).unwrap();
        wire.push(b'\n');
        wire.push(b'\n');
        wire.extend(serde_json::to_vec(&b).unwrap());
        wire.push(b'\n');

        let mut dec = LineDecoder::new();
        let mut out = Vec::new();
        for chunk in wire.chunks(7) {
            dec.extend(chunk);
            while let Some(rec) = dec.next_record::<Trace>() {
                out.push(rec.unwrap());
            }
        }
        assert_eq!(out, vec![a, b]);
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn partial_line_waits() {
        let mut dec = LineDecoder::new();
        dec.extend(br#"{"values":["#);
        assert!(dec.next_record::<Trace>().is_none());
        assert_eq!(dec.remaining(), 11);
        dec.extend(b"]}\nnot json\n");
        assert_eq!(dec.next_record::<Trace>().unwrap().unwrap(), Trace::new(vec![]));
        assert!(dec.next_record::<Trace>().unwrap().is_err());
    }
}
