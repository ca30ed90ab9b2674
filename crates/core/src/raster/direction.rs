//! D8 neighbour directions
//!
//! Direction codes run clockwise from North:
//! ```text
//!   7  0  1
//!   6  *  2
//!   5  4  3
//! ```
//! Every neighbour scan in the routing tools walks codes `0..=7` in this
//! order. Steepest-descent selection keeps the first maximum it meets, so
//! reordering these codes changes D8 results on ties.

use serde::{Deserialize, Serialize};

/// One of the eight D8 neighbour directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Direction(u8);

/// (row_offset, col_offset) per direction code. North is row - 1.
const OFFSETS: [(isize, isize); 8] = [
    (-1, 0),  // 0: N
    (-1, 1),  // 1: NE
    (0, 1),   // 2: E
    (1, 1),   // 3: SE
    (1, 0),   // 4: S
    (1, -1),  // 5: SW
    (0, -1),  // 6: W
    (-1, -1), // 7: NW
];

const NAMES: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

impl Direction {
    pub const N: Direction = Direction(0);
    pub const NE: Direction = Direction(1);
    pub const E: Direction = Direction(2);
    pub const SE: Direction = Direction(3);
    pub const S: Direction = Direction(4);
    pub const SW: Direction = Direction(5);
    pub const W: Direction = Direction(6);
    pub const NW: Direction = Direction(7);

    /// All directions in scan order.
    pub const ALL: [Direction; 8] = [
        Direction(0),
        Direction(1),
        Direction(2),
        Direction(3),
        Direction(4),
        Direction(5),
        Direction(6),
        Direction(7),
    ];

    /// Direction from its code, wrapping codes above 7.
    pub const fn new(code: u8) -> Self {
        Direction(code % 8)
    }

    /// Direction code in `0..=7`
    pub const fn code(self) -> u8 {
        self.0
    }

    /// Code as an array index
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// (row_offset, col_offset)
    pub const fn offset(self) -> (isize, isize) {
        OFFSETS[self.0 as usize]
    }

    pub const fn opposite(self) -> Direction {
        Direction((self.0 + 4) % 8)
    }

    pub const fn is_diagonal(self) -> bool {
        self.0 % 2 == 1
    }

    pub fn name(self) -> &'static str {
        NAMES[self.index()]
    }

    /// Apply the offset to a cell, without any bounds check.
    pub fn step(self, row: usize, col: usize) -> (isize, isize) {
        let (dr, dc) = self.offset();
        (row as isize + dr, col as isize + dc)
    }
}

impl TryFrom<u8> for Direction {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        if code < 8 {
            Ok(Direction(code))
        } else {
            Err(format!("direction code {} outside 0..=7", code))
        }
    }
}

impl From<Direction> for u8 {
    fn from(dir: Direction) -> u8 {
        dir.0
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
