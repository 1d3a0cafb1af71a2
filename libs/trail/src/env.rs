//! The backtracking environment: cell arenas, worlds and the trail.

use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_ENV_ID: AtomicU32 = AtomicU32::new(0);

/// Handle on a trailed integer cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntCell {
    env: u32,
    idx: u32,
}

/// Handle on a trailed boolean cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoolCell {
    env: u32,
    idx: u32,
}

/// Handle on a trailed growable integer vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VecCell {
    env: u32,
    idx: u32,
}

/// A stored integer: current value plus the world of its last write.
#[derive(Debug, Clone, Copy)]
struct StoredInt {
    value: i64,
    stamp: u32,
}

#[derive(Debug, Clone, Copy)]
struct StoredBool {
    value: bool,
    stamp: u32,
}

/// A stored vector. Entries beyond `len` are stale leftovers from a
/// deeper world and are never observable.
#[derive(Debug, Default)]
struct StoredVec {
    data: Vec<i64>,
    stamps: Vec<u32>,
    len: usize,
    len_stamp: u32,
}

/// One reversible write. Replayed in reverse order on [`Environment::pop_world`].
#[derive(Debug, Clone, Copy)]
enum TrailEntry {
    Int { idx: u32, value: i64, stamp: u32 },
    Bool { idx: u32, value: bool, stamp: u32 },
    VecLen { idx: u32, len: usize, stamp: u32 },
    VecElem { idx: u32, at: usize, value: i64, stamp: u32 },
}

/// A process-local, reversible memory substrate.
///
/// The world counter starts at 0 (the root world). Writes performed at the
/// root are permanent: there is no world below to restore them for.
#[derive(Debug)]
pub struct Environment {
    id: u32,
    world: u32,
    ints: Vec<StoredInt>,
    bools: Vec<StoredBool>,
    vecs: Vec<StoredVec>,
    /// The trail, one frame per world above the root.
    trail: Vec<Vec<TrailEntry>>,
}

impl Environment {
    /// Create an empty environment at the root world.
    pub fn new() -> Self {
        Self {
            id: NEXT_ENV_ID.fetch_add(1, Ordering::Relaxed),
            world: 0,
            ints: Vec::new(),
            bools: Vec::new(),
            vecs: Vec::new(),
            trail: Vec::new(),
        }
    }

    /// The current world index.
    pub fn world_index(&self) -> u32 {
        self.world
    }

    /// Enter a deeper world.
    pub fn push_world(&mut self) {
        self.world += 1;
        self.trail.push(Vec::new());
    }

    /// Leave the current world, restoring every cell written in it.
    ///
    /// # Panics
    ///
    /// Panics when called at the root world: that is a search-loop bug.
    pub fn pop_world(&mut self) {
        assert!(self.world > 0, "pop_world at the root world");
        let frame = self.trail.pop().unwrap_or_default();
        for entry in frame.into_iter().rev() {
            match entry {
                TrailEntry::Int { idx, value, stamp } => {
                    self.ints[idx as usize] = StoredInt { value, stamp };
                }
                TrailEntry::Bool { idx, value, stamp } => {
                    self.bools[idx as usize] = StoredBool { value, stamp };
                }
                TrailEntry::VecLen { idx, len, stamp } => {
                    let v = &mut self.vecs[idx as usize];
                    v.len = len;
                    v.len_stamp = stamp;
                }
                TrailEntry::VecElem {
                    idx,
                    at,
                    value,
                    stamp,
                } => {
                    let v = &mut self.vecs[idx as usize];
                    v.data[at] = value;
                    v.stamps[at] = stamp;
                }
            }
        }
        self.world -= 1;
    }

    // --- integers ---

    /// Allocate a new integer cell holding `value`.
    pub fn new_int(&mut self, value: i64) -> IntCell {
        let idx = self.ints.len() as u32;
        self.ints.push(StoredInt {
            value,
            stamp: self.world,
        });
        IntCell { env: self.id, idx }
    }

    /// Current value of an integer cell.
    pub fn get_int(&self, cell: IntCell) -> i64 {
        debug_assert_eq!(cell.env, self.id, "cell from a foreign environment");
        self.ints[cell.idx as usize].value
    }

    /// Write an integer cell, trailing the previous value when needed.
    pub fn set_int(&mut self, cell: IntCell, value: i64) {
        debug_assert_eq!(cell.env, self.id, "cell from a foreign environment");
        let stored = &mut self.ints[cell.idx as usize];
        if stored.value == value {
            return;
        }
        if stored.stamp < self.world {
            let entry = TrailEntry::Int {
                idx: cell.idx,
                value: stored.value,
                stamp: stored.stamp,
            };
            stored.stamp = self.world;
            self.trail
                .last_mut()
                .expect("a non-root world always has a trail frame")
                .push(entry);
        }
        self.ints[cell.idx as usize].value = value;
    }

    // --- booleans ---

    /// Allocate a new boolean cell holding `value`.
    pub fn new_bool(&mut self, value: bool) -> BoolCell {
        let idx = self.bools.len() as u32;
        self.bools.push(StoredBool {
            value,
            stamp: self.world,
        });
        BoolCell { env: self.id, idx }
    }

    /// Current value of a boolean cell.
    pub fn get_bool(&self, cell: BoolCell) -> bool {
        debug_assert_eq!(cell.env, self.id, "cell from a foreign environment");
        self.bools[cell.idx as usize].value
    }

    /// Write a boolean cell, trailing the previous value when needed.
    pub fn set_bool(&mut self, cell: BoolCell, value: bool) {
        debug_assert_eq!(cell.env, self.id, "cell from a foreign environment");
        let stored = &mut self.bools[cell.idx as usize];
        if stored.value == value {
            return;
        }
        if stored.stamp < self.world {
            let entry = TrailEntry::Bool {
                idx: cell.idx,
                value: stored.value,
                stamp: stored.stamp,
            };
            stored.stamp = self.world;
            self.trail
                .last_mut()
                .expect("a non-root world always has a trail frame")
                .push(entry);
        }
        self.bools[cell.idx as usize].value = value;
    }

    // --- vectors ---

    /// Allocate a new, empty trailed vector.
    pub fn new_vec(&mut self) -> VecCell {
        let idx = self.vecs.len() as u32;
        self.vecs.push(StoredVec {
            len_stamp: self.world,
            ..StoredVec::default()
        });
        VecCell { env: self.id, idx }
    }

    /// Observable length of a trailed vector.
    pub fn vec_len(&self, cell: VecCell) -> usize {
        debug_assert_eq!(cell.env, self.id, "cell from a foreign environment");
        self.vecs[cell.idx as usize].len
    }

    /// Element at `at`, which must be below [`Environment::vec_len`].
    pub fn vec_get(&self, cell: VecCell, at: usize) -> i64 {
        debug_assert_eq!(cell.env, self.id, "cell from a foreign environment");
        let v = &self.vecs[cell.idx as usize];
        assert!(at < v.len, "vec_get out of bounds: {} >= {}", at, v.len);
        v.data[at]
    }

    /// Append `value`. The growth is undone when the current world is popped.
    pub fn vec_push(&mut self, cell: VecCell, value: i64) {
        debug_assert_eq!(cell.env, self.id, "cell from a foreign environment");
        let world = self.world;
        let v = &mut self.vecs[cell.idx as usize];
        let mut len_entry = None;
        let mut elem_entry = None;
        if v.len_stamp < world {
            len_entry = Some(TrailEntry::VecLen {
                idx: cell.idx,
                len: v.len,
                stamp: v.len_stamp,
            });
            v.len_stamp = world;
        }
        if v.len == v.data.len() {
            v.data.push(value);
            v.stamps.push(world);
        } else {
            // Reusing a slot. One freed by pop_world carries a stamp from
            // the reverted deeper world and is fresh; one freed by a clear
            // may still hold an element written in an outer world and must
            // be trailed like any overwrite.
            if v.stamps[v.len] < world {
                elem_entry = Some(TrailEntry::VecElem {
                    idx: cell.idx,
                    at: v.len,
                    value: v.data[v.len],
                    stamp: v.stamps[v.len],
                });
                v.stamps[v.len] = world;
            }
            v.data[v.len] = value;
        }
        v.len += 1;
        for entry in [len_entry, elem_entry].into_iter().flatten() {
            self.trail
                .last_mut()
                .expect("a non-root world always has a trail frame")
                .push(entry);
        }
    }

    /// Overwrite the element at `at`, trailing the previous value when needed.
    pub fn vec_set(&mut self, cell: VecCell, at: usize, value: i64) {
        debug_assert_eq!(cell.env, self.id, "cell from a foreign environment");
        let world = self.world;
        let v = &mut self.vecs[cell.idx as usize];
        assert!(at < v.len, "vec_set out of bounds: {} >= {}", at, v.len);
        if v.data[at] == value {
            return;
        }
        let mut entry = None;
        if v.stamps[at] < world {
            entry = Some(TrailEntry::VecElem {
                idx: cell.idx,
                at,
                value: v.data[at],
                stamp: v.stamps[at],
            });
            v.stamps[at] = world;
        }
        v.data[at] = value;
        if let Some(entry) = entry {
            self.trail
                .last_mut()
                .expect("a non-root world always has a trail frame")
                .push(entry);
        }
    }

    /// Truncate the vector to zero length (reversibly).
    pub fn vec_clear(&mut self, cell: VecCell) {
        debug_assert_eq!(cell.env, self.id, "cell from a foreign environment");
        let world = self.world;
        let v = &mut self.vecs[cell.idx as usize];
        if v.len == 0 {
            return;
        }
        let mut entry = None;
        if v.len_stamp < world {
            entry = Some(TrailEntry::VecLen {
                idx: cell.idx,
                len: v.len,
                stamp: v.len_stamp,
            });
            v.len_stamp = world;
        }
        v.len = 0;
        if let Some(entry) = entry {
            self.trail
                .last_mut()
                .expect("a non-root world always has a trail frame")
                .push(entry);
        }
    }

    /// Snapshot of the observable elements of a trailed vector.
    pub fn vec_iter(&self, cell: VecCell) -> impl Iterator<Item = i64> + '_ {
        debug_assert_eq!(cell.env, self.id, "cell from a foreign environment");
        let v = &self.vecs[cell.idx as usize];
        v.data[..v.len].iter().copied()
    }

    /// Number of trail entries recorded in the current world. Zero at the root.
    pub fn trail_len(&self) -> usize {
        self.trail.last().map_or(0, Vec::len)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
