//! Delta-encoded source map: maps bytecode offsets to source positions.
//!
//! Each entry is three BER values:
//! - `delta_pc` (unsigned)
//! - `delta_line` (signed, zigzag)
//! - `delta_column` (signed, zigzag)

use crate::DecodeError;
use crate::ber::{read_uint, write_uint, zigzag_decode, zigzag_encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    pub pc: u32,
    pub line: u32,
    pub column: u32,
}

/// Source markers for one code buffer, ordered by `pc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    marks: Vec<Mark>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a position for `pc`. A later mark at the same `pc` replaces
    /// the earlier one.
    pub fn add(&mut self, pc: u32, line: u32, column: u32) {
        if let Some(last) = self.marks.last_mut() {
            if last.pc == pc {
                last.line = line;
                last.column = column;
                return;
            }
        }
        self.marks.push(Mark { pc, line, column });
    }

    /// Append `other`, whose offsets are relative to `base`.
    pub fn append(&mut self, base: u32, other: SourceMap) {
        for mark in other.marks {
            self.add(base + mark.pc, mark.line, mark.column);
        }
    }

    pub fn marks(&self) -> &[Mark] {
        &self.marks
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Position of the last mark with `pc <= target`.
    pub fn lookup(&self, target: usize) -> Option<(u32, u32)> {
        let idx = self.marks.partition_point(|m| m.pc as usize <= target);
        idx.checked_sub(1)
            .map(|i| (self.marks[i].line, self.marks[i].column))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let (mut pc, mut line, mut column) = (0u32, 0i64, 0i64);
        for mark in &self.marks {
            write_uint(&mut buf, u64::from(mark.pc - pc));
            write_uint(&mut buf, zigzag_encode(i64::from(mark.line) - line));
            write_uint(&mut buf, zigzag_encode(i64::from(mark.column) - column));
            pc = mark.pc;
            line = i64::from(mark.line);
            column = i64::from(mark.column);
        }
        buf
    }

    pub fn decode(encoded: &[u8]) -> Result<Self, DecodeError> {
        let mut map = SourceMap::new();
        let mut pos = 0;
        let (mut pc, mut line, mut column) = (0u64, 0i64, 0i64);
        while pos < encoded.len() {
            let start = pos;
            pc += read_uint(encoded, &mut pos)?;
            line += zigzag_decode(read_uint(encoded, &mut pos)?);
            column += zigzag_decode(read_uint(encoded, &mut pos)?);
            let mark = Mark {
                pc: u32::try_from(pc).map_err(|_| DecodeError::Overlong { offset: start })?,
                line: u32::try_from(line).map_err(|_| DecodeError::Overlong { offset: start })?,
                column: u32::try_from(column)
                    .map_err(|_| DecodeError::Overlong { offset: start })?,
            };
            map.marks.push(mark);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_map() {
        let map = SourceMap::new();
        let encoded = map.encode();
        assert!(encoded.is_empty());
        assert_eq!(SourceMap::decode(&encoded).unwrap().lookup(0), None);
    }

    #[test]
    fn multiple_entries() {
        let mut map = SourceMap::new();
        map.add(0, 1, 0);
        map.add(3, 2, 4);
        map.add(7, 1, 2);
        let decoded = SourceMap::decode(&map.encode()).unwrap();
        assert_eq!(decoded, map);

        assert_eq!(decoded.lookup(0), Some((1, 0)));
        assert_eq!(decoded.lookup(2), Some((1, 0)));
        assert_eq!(decoded.lookup(3), Some((2, 4)));
        assert_eq!(decoded.lookup(7), Some((1, 2)));
        assert_eq!(decoded.lookup(100), Some((1, 2)));
    }

    #[test]
    fn same_pc_keeps_latest() {
        let mut map = SourceMap::new();
        map.add(4, 1, 1);
        map.add(4, 9, 3);
        assert_eq!(map.marks().len(), 1);
        assert_eq!(map.lookup(4), Some((9, 3)));
        assert_eq!(map.lookup(3), None);
    }

    #[test]
    fn append_rebases() {
        let mut inner = SourceMap::new();
        inner.add(0, 5, 1);
        let mut outer = SourceMap::new();
        outer.add(0, 1, 0);
        outer.append(10, inner);
        assert_eq!(outer.lookup(9), Some((1, 0)));
        assert_eq!(outer.lookup(10), Some((5, 1)));
    }

    #[test]
    fn typical_size() {
        let mut map = SourceMap::new();
        for i in 0..100u32 {
            map.add(i * 3, i + 1, i % 10);
        }
        assert!(map.encode().len() < 400);
    }
}
