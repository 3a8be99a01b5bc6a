//! Lazy row cursor over a select response body.
//!
//! The body is `{Data: [row, row, ...]}`. The cursor checks the envelope on
//! its first advance, then decodes one row per advance. It is forward-only
//! and cannot be restarted; run the select again for a second pass.

use std::io::Cursor;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::codec::{MsgPackCodec, StructureReader};
use crate::error::{DriverError, Result};
use crate::protocol::Key;

enum CursorState {
    Unstarted,
    Rows { remaining: u32 },
    Done,
}

/// Iterator of decoded rows from one select response.
pub struct RowCursor<T> {
    reader: StructureReader<Cursor<Vec<u8>>>,
    state: CursorState,
    _row: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for RowCursor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            CursorState::Unstarted => "unstarted".to_string(),
            CursorState::Rows { remaining } => format!("{remaining} rows left"),
            CursorState::Done => "done".to_string(),
        };
        f.debug_struct("RowCursor")
            .field("body_size", &self.reader.get_ref().get_ref().len())
            .field("state", &state)
            .finish()
    }
}

impl<T: DeserializeOwned> RowCursor<T> {
    /// Wrap a raw response body.
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            reader: StructureReader::new(Cursor::new(body)),
            state: CursorState::Unstarted,
            _row: PhantomData,
        }
    }

    /// Rows left to decode, once the envelope has been read.
    pub fn remaining(&self) -> Option<u32> {
        match self.state {
            CursorState::Unstarted => None,
            CursorState::Rows { remaining } => Some(remaining),
            CursorState::Done => Some(0),
        }
    }

    /// Decode every remaining row.
    pub fn try_collect(self) -> Result<Vec<T>> {
        self.collect()
    }

    fn open_envelope(&mut self) -> Result<u32> {
        let entries = self.reader.read_map_header()?;
        if entries != 1 {
            return Err(DriverError::protocol(format!(
                "expected a data map with one entry, found {entries}"
            )));
        }
        let key = self.reader.read_small_int()?;
        if key != i64::from(Key::Data.code()) {
            return Err(DriverError::protocol(format!(
                "expected data key {:#04x}, found {key:#04x}",
                Key::Data.code()
            )));
        }
        self.reader.read_array_header()
    }

    fn advance(&mut self) -> Result<Option<T>> {
        let remaining = match self.state {
            CursorState::Done => return Ok(None),
            CursorState::Unstarted => self.open_envelope()?,
            CursorState::Rows { remaining } => remaining,
        };
        if remaining == 0 {
            self.state = CursorState::Done;
            return Ok(None);
        }
        let row = MsgPackCodec::decode_from(self.reader.get_mut())?;
        self.state = CursorState::Rows {
            remaining: remaining - 1,
        };
        Ok(Some(row))
    }
}

impl<T: DeserializeOwned> Iterator for RowCursor<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(row) => row.map(Ok),
            Err(err) => {
                self.state = CursorState::Done;
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.remaining() {
            Some(n) => (0, Some(n as usize)),
            None => (0, None),
        }
    }
}

impl<T: DeserializeOwned> std::iter::FusedIterator for RowCursor<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_body(rows: &[(u32, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        rmp::encode::write_map_len(&mut body, 1).unwrap();
        rmp::encode::write_uint(&mut body, 0x30).unwrap();
        rmp::encode::write_array_len(&mut body, rows.len() as u32).unwrap();
        for row in rows {
            body.extend(MsgPackCodec::encode(row).unwrap());
        }
        body
    }

    #[test]
    fn test_yields_exactly_declared_rows() {
        let mut cursor: RowCursor<(u32, String)> = RowCursor::new(data_body(&[(1, "a"), (2, "b")]));
        assert_eq!(cursor.remaining(), None);

        assert_eq!(cursor.next().unwrap().unwrap(), (1, "a".to_string()));
        assert_eq!(cursor.remaining(), Some(1));
        assert_eq!(cursor.next().unwrap().unwrap(), (2, "b".to_string()));
        assert!(cursor.next().is_none());
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_empty_result() {
        let cursor: RowCursor<(u32, String)> = RowCursor::new(data_body(&[]));
        assert!(cursor.try_collect().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_wrong_key() {
        let mut body = Vec::new();
        rmp::encode::write_map_len(&mut body, 1).unwrap();
        rmp::encode::write_uint(&mut body, 0x31).unwrap();
        rmp::encode::write_array_len(&mut body, 0).unwrap();

        let mut cursor: RowCursor<(u32,)> = RowCursor::new(body);
        assert!(matches!(cursor.next(), Some(Err(DriverError::Protocol(_)))));
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_rejects_multi_entry_map() {
        let mut body = Vec::new();
        rmp::encode::write_map_len(&mut body, 2).unwrap();
        let mut cursor: RowCursor<(u32,)> = RowCursor::new(body);
        match cursor.next() {
            Some(Err(DriverError::Protocol(msg))) => assert!(msg.contains("one entry")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_row_type_mismatch_stops_cursor() {
        let mut cursor: RowCursor<(String, String)> = RowCursor::new(data_body(&[(1, "a"), (2, "b")]));
        assert!(matches!(cursor.next(), Some(Err(DriverError::MsgPackDecode(_)))));
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_struct_rows() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct User {
            id: u32,
            name: String,
        }

        let rows: Vec<User> = RowCursor::new(data_body(&[(5, "e")])).try_collect().unwrap();
        assert_eq!(
            rows,
            vec![User {
                id: 5,
                name: "e".to_string()
            }]
        );
    }
}
