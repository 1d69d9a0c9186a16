/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use super::div_ceil;

/// Fixed-size bitmap, one bit per tracked unit.
pub(crate) struct BitArray {
    arr: Vec<u8>,
    len: usize,
}

impl BitArray {
    pub(crate) fn new(len: usize) -> Self {
        BitArray {
            arr: vec![0; div_ceil(len, 8)],
            len,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn set(&mut self, value: bool, index: usize) {
        debug_assert!(index < self.len, "bit {} out of range {}", index, self.len);
        let arr_index = index / 8;
        let internal_index = index % 8;

        let item = &mut self.arr[arr_index];
        if value {
            // set bit
            *item |= 1u8 << internal_index;
        } else {
            // unset bit
            *item &= !(1u8 << internal_index);
        }
    }

    pub(crate) fn is_set(&self, index: usize) -> bool {
        let arr_index = index / 8;
        let internal_index = index % 8;

        let item = self.arr[arr_index];
        (item & (1u8 << internal_index)) != 0
    }

    pub(crate) fn set_range(&mut self, value: bool, start: usize, cnt: usize) {
        for i in start..start + cnt {
            self.set(value, i);
        }
    }

    /// Number of set bits in `[start, start + cnt)`
    pub(crate) fn count_range(&self, start: usize, cnt: usize) -> usize {
        (start..start + cnt).filter(|i| self.is_set(*i)).count()
    }

    /// Finds the first group of `group` bits (starting at a multiple of `group`)
    /// where all bits are unset, sets all of them and returns the first index.
    pub(crate) fn scan_group_and_set(&mut self, group: usize) -> Option<usize> {
        debug_assert_ne!(group, 0);
        let groups = self.len / group;

        for g in 0..groups {
            let start = g * group;
            if self.count_range(start, group) == 0 {
                self.set_range(true, start, group);
                return Some(start);
            }
        }

        None
    }
}
