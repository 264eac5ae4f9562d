// storage.rs - Byte column per component type
//
// Each component type owns one densely packed column of fixed-size rows.
// A sparse index maps entity slot -> row so membership tests are O(1);
// removal swap-removes the last row into the hole.

use crate::ecs::ComponentInfo;
use rayon::prelude::*;

const NO_ROW: u32 = u32::MAX;

/// Densely packed rows for a single component type.
pub struct Column {
    elem_size: usize,
    bytes: Vec<u8>,       // len = rows * elem_size
    dense: Vec<u32>,      // row -> entity slot index
    sparse: Vec<u32>,     // entity slot index -> row (NO_ROW when absent)
}

impl Column {
    pub fn new(info: &ComponentInfo) -> Self {
        Self {
            elem_size: info.size,
            bytes: Vec::new(),
            dense: Vec::new(),
            sparse: Vec::new(),
        }
    }

    #[inline]
    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    /// Entity slot indices in row order.
    #[inline]
    pub fn entities(&self) -> &[u32] {
        &self.dense
    }

    #[inline]
    fn row_of(&self, slot: u32) -> Option<usize> {
        match self.sparse.get(slot as usize) {
            Some(&row) if row != NO_ROW => Some(row as usize),
            _ => None,
        }
    }

    #[inline]
    pub fn contains(&self, slot: u32) -> bool {
        self.row_of(slot).is_some()
    }

    /// Insert or overwrite the row for `slot`. Returns `true` when the row is new.
    pub fn insert(&mut self, slot: u32, src: &[u8]) -> bool {
        assert_eq!(src.len(), self.elem_size, "column row size mismatch");
        if let Some(row) = self.row_of(slot) {
            let start = row * self.elem_size;
            self.bytes[start..start + self.elem_size].copy_from_slice(src);
            return false;
        }

        if self.sparse.len() <= slot as usize {
            self.sparse.resize(slot as usize + 1, NO_ROW);
        }
        let row = self.dense.len();
        self.sparse[slot as usize] = row as u32;
        self.dense.push(slot);
        self.bytes.extend_from_slice(src);
        true
    }

    /// Swap-remove the row for `slot`. Returns `true` if a row was removed.
    pub fn remove(&mut self, slot: u32) -> bool {
        let Some(row) = self.row_of(slot) else {
            return false;
        };
        let last = self.dense.len() - 1;
        if row != last {
            let moved = self.dense[last];
            self.dense[row] = moved;
            self.sparse[moved as usize] = row as u32;
            let size = self.elem_size;
            self.bytes.copy_within(last * size..(last + 1) * size, row * size);
        }
        self.dense.pop();
        self.bytes.truncate(last * self.elem_size);
        self.sparse[slot as usize] = NO_ROW;
        true
    }

    pub fn get(&self, slot: u32) -> Option<&[u8]> {
        let row = self.row_of(slot)?;
        let start = row * self.elem_size;
        Some(&self.bytes[start..start + self.elem_size])
    }

    /// Run `f` over every row in parallel.
    ///
    /// Rows are visited in chunks so tiny components don't pay one task per row.
    pub fn par_for_each_row_mut<F>(&mut self, f: F)
    where
        F: Fn(&mut [u8]) + Sync + Send,
    {
        if self.elem_size == 0 {
            return;
        }
        let size = self.elem_size;
        self.bytes.par_chunks_mut(size * 1024).for_each(|chunk| {
            for row in chunk.chunks_mut(size) {
                f(row);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(size: usize) -> ComponentInfo {
        ComponentInfo {
            id: 1,
            name: "Test".into(),
            size,
            align: 4,
            layout: None,
        }
    }

    #[test]
    fn swap_remove_keeps_rows_consistent() {
        let mut col = Column::new(&info(4));
        for slot in 0..4u32 {
            assert!(col.insert(slot, &(slot * 10).to_ne_bytes()));
        }
        assert!(col.remove(1));
        assert!(!col.remove(1));
        assert_eq!(col.len(), 3);
        assert_eq!(col.get(3), Some(&30u32.to_ne_bytes()[..]));
        assert_eq!(col.get(0), Some(&0u32.to_ne_bytes()[..]));
        assert!(!col.contains(1));
    }

    #[test]
    fn insert_overwrites_existing_row() {
        let mut col = Column::new(&info(4));
        assert!(col.insert(7, &1u32.to_ne_bytes()));
        assert!(!col.insert(7, &2u32.to_ne_bytes()));
        assert_eq!(col.len(), 1);
        assert_eq!(col.get(7), Some(&2u32.to_ne_bytes()[..]));
    }

    #[test]
    fn parallel_rows_touch_every_row() {
        let mut col = Column::new(&info(4));
        for slot in 0..3000u32 {
            col.insert(slot, &slot.to_ne_bytes());
        }
        col.par_for_each_row_mut(|row| {
            let v = u32::from_ne_bytes([row[0], row[1], row[2], row[3]]);
            row.copy_from_slice(&(v + 1).to_ne_bytes());
        });
        assert_eq!(col.get(2999), Some(&3000u32.to_ne_bytes()[..]));
    }
}
