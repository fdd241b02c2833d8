/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

/// Growable byte storage backing a regular file.
///
/// Positions are byte offsets; writing past the tail zero-fills the gap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteStore {
    bytes: Vec<u8>,
}

impl ByteStore {
    pub fn new() -> Self {
        ByteStore { bytes: Vec::new() }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Copies bytes starting at `position` into `buffer`, returning how many
    /// were copied. Zero at or past end of file.
    pub fn read(&self, position: u64, buffer: &mut [u8]) -> usize {
        let position = position as usize;
        if position >= self.bytes.len() || buffer.is_empty() {
            return 0;
        }
        let available = self.bytes.len() - position;
        let count = available.min(buffer.len());
        buffer[..count].copy_from_slice(&self.bytes[position..position + count]);
        count
    }

    /// Writes `buffer` at `position`, growing the store as needed and
    /// zero-filling any gap between the old tail and `position`.
    pub fn write(&mut self, position: u64, buffer: &[u8]) -> usize {
        let position = position as usize;
        let end = position + buffer.len();
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[position..end].copy_from_slice(buffer);
        buffer.len()
    }

    /// Drops the tail beyond `size`. Growing truncates are a no-op.
    pub fn truncate(&mut self, size: u64) {
        let size = size as usize;
        if size < self.bytes.len() {
            self.bytes.truncate(size);
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_empty() {
        let store = ByteStore::new();
        let mut buffer = [0; 8];
        assert_eq!(0, store.read(0, &mut buffer));
        assert_eq!(0, store.size());
    }

    #[test]
    fn test_write_then_read() {
        let mut store = ByteStore::new();
        assert_eq!(5, store.write(0, b"hello"));
        let mut buffer = [0; 8];
        assert_eq!(5, store.read(0, &mut buffer));
        assert_eq!(b"hello", &buffer[..5]);
    }

    #[test]
    fn test_read_past_end() {
        let mut store = ByteStore::new();
        store.write(0, b"abc");
        let mut buffer = [0; 4];
        assert_eq!(0, store.read(3, &mut buffer));
        assert_eq!(1, store.read(2, &mut buffer));
        assert_eq!(b'c', buffer[0]);
    }

    #[test]
    fn test_gap_is_zero_filled() {
        let mut store = ByteStore::new();
        store.write(0, b"ab");
        store.write(4, b"cd");
        assert_eq!(6, store.size());
        let mut buffer = [0xff; 6];
        assert_eq!(6, store.read(0, &mut buffer));
        assert_eq!(b"ab\0\0cd", &buffer);
    }

    #[test]
    fn test_overwrite_middle() {
        let mut store = ByteStore::new();
        store.write(0, b"hello world");
        store.write(6, b"there");
        assert_eq!(b"hello there".to_vec(), store.to_vec());
    }

    #[test]
    fn test_truncate() {
        let mut store = ByteStore::new();
        store.write(0, b"hello");
        store.truncate(2);
        assert_eq!(2, store.size());
        store.truncate(10);
        assert_eq!(2, store.size());
        assert_eq!(b"he".to_vec(), store.to_vec());
    }
}
