//! Pixel adjacency used by labeling, flooding and tracing

/// Pixel adjacency rule.
///
/// `Rook` connects pixels sharing an edge (4 neighbours), `Queen` also
/// connects pixels sharing a corner (8 neighbours).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    #[default]
    Rook,
    Queen,
}

const ROOK: [(isize, isize); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];

const QUEEN: [(isize, isize); 8] = [
    (-1, -1), (-1, 0), (-1, 1),
    (0, -1),           (0, 1),
    (1, -1),  (1, 0),  (1, 1),
];

impl Connectivity {
    /// Relative (row, col) offsets of the neighbours
    pub fn offsets(&self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Rook => &ROOK,
            Connectivity::Queen => &QUEEN,
        }
    }

    /// In-bounds neighbours of `(row, col)` in a `rows x cols` grid
    pub fn neighbors(
        &self,
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    ) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.offsets().iter().filter_map(move |&(dr, dc)| {
            let nr = row as isize + dr;
            let nc = col as isize + dc;
            if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                None
            } else {
                Some((nr as usize, nc as usize))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rook_corner_has_two_neighbors() {
        let n: Vec<_> = Connectivity::Rook.neighbors(0, 0, 3, 3).collect();
        assert_eq!(n, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_queen_center_has_eight_neighbors() {
        assert_eq!(Connectivity::Queen.neighbors(1, 1, 3, 3).count(), 8);
    }
}
