//! Face-based (LDU) mesh addressing.
//!
//! Every internal face `f` connects an owner cell `lower_addr[f]` to a
//! neighbour cell `upper_addr[f]` with `lower < upper`. Faces are stored in
//! upper-triangular order: sorted by owner, then by neighbour. The matrix
//! coefficient `upper[f]` couples row `lower[f]` to column `upper[f]`, and
//! `lower[f]` the transpose position.
//!
//! # Derived addressing
//!
//! Smoothers need to visit the faces of a cell in row order. Two index
//! structures are derived on first use and cached for the lifetime of the
//! addressing:
//!
//! | Array | Length | Meaning |
//! |-------|--------|---------|
//! | `owner_start` | `n_cells + 1` | faces `owner_start[c]..owner_start[c+1]` have owner `c` |
//! | `losort` | `n_faces` | face indices sorted by neighbour |
//! | `losort_start` | `n_cells + 1` | `losort[losort_start[c]..losort_start[c+1]]` have neighbour `c` |

use once_cell::sync::OnceCell;

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// LduAddressing
// ---------------------------------------------------------------------------

/// Immutable face addressing of a mesh (or of one agglomerated level).
#[derive(Debug, Clone)]
pub struct LduAddressing {
    n_cells: usize,
    lower: Vec<usize>,
    upper: Vec<usize>,
    losort: OnceCell<Vec<usize>>,
    owner_start: OnceCell<Vec<usize>>,
    losort_start: OnceCell<Vec<usize>>,
}

impl LduAddressing {
    /// Build addressing from owner/neighbour arrays that are already in
    /// upper-triangular order.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the arrays differ in length, reference a
    /// cell outside `0..n_cells`, have `lower >= upper`, or are not sorted by
    /// `(lower, upper)` without duplicates.
    pub fn new(
        n_cells: usize,
        lower: Vec<usize>,
        upper: Vec<usize>,
    ) -> Result<Self, ValidationError> {
        if lower.len() != upper.len() {
            return Err(ValidationError::DimensionMismatch(format!(
                "lower_addr has {} faces but upper_addr has {}",
                lower.len(),
                upper.len(),
            )));
        }

        for face in 0..lower.len() {
            let (l, u) = (lower[face], upper[face]);
            for index in [l, u] {
                if index >= n_cells {
                    return Err(ValidationError::IndexOutOfBounds {
                        index,
                        face,
                        n_cells,
                    });
                }
            }
            if l >= u {
                return Err(ValidationError::NotUpperTriangular {
                    face,
                    detail: format!("owner {l} is not below neighbour {u}"),
                });
            }
            if face > 0 && (lower[face - 1], upper[face - 1]) >= (l, u) {
                return Err(ValidationError::NotUpperTriangular {
                    face,
                    detail: format!(
                        "face ({l}, {u}) follows ({}, {})",
                        lower[face - 1],
                        upper[face - 1],
                    ),
                });
            }
        }

        Ok(Self {
            n_cells,
            lower,
            upper,
            losort: OnceCell::new(),
            owner_start: OnceCell::new(),
            losort_start: OnceCell::new(),
        })
    }

    /// Canonicalise an arbitrary list of cell pairs into LDU addressing.
    ///
    /// Each pair is oriented so that the smaller cell is the owner, then the
    /// faces are sorted into upper-triangular order. The returned
    /// [`FaceOrdering`] records where each canonical face came from so the
    /// caller can permute its coefficients the same way.
    ///
    /// # Errors
    ///
    /// Rejects self-connections, out-of-range cells and duplicate faces.
    pub fn from_faces(
        n_cells: usize,
        pairs: &[(usize, usize)],
    ) -> Result<(Self, FaceOrdering), ValidationError> {
        let mut keyed = Vec::with_capacity(pairs.len());
        for (face, &(a, b)) in pairs.iter().enumerate() {
            for index in [a, b] {
                if index >= n_cells {
                    return Err(ValidationError::IndexOutOfBounds {
                        index,
                        face,
                        n_cells,
                    });
                }
            }
            if a == b {
                return Err(ValidationError::NotUpperTriangular {
                    face,
                    detail: format!("cell {a} is connected to itself"),
                });
            }
            keyed.push((a.min(b), a.max(b), face, a > b));
        }
        keyed.sort_unstable_by_key(|&(l, u, face, _)| (l, u, face));

        let mut lower = Vec::with_capacity(keyed.len());
        let mut upper = Vec::with_capacity(keyed.len());
        let mut permutation = Vec::with_capacity(keyed.len());
        let mut flipped = Vec::with_capacity(keyed.len());
        for &(l, u, face, flip) in &keyed {
            if lower.last() == Some(&l) && upper.last() == Some(&u) {
                return Err(ValidationError::NotUpperTriangular {
                    face,
                    detail: format!("duplicate face between cells {l} and {u}"),
                });
            }
            lower.push(l);
            upper.push(u);
            permutation.push(face);
            flipped.push(flip);
        }

        let addressing = Self::new(n_cells, lower, upper)?;
        Ok((
            addressing,
            FaceOrdering {
                permutation,
                flipped,
            },
        ))
    }

    /// Number of cells (matrix rows).
    #[inline]
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    /// Number of internal faces (off-diagonal pairs).
    #[inline]
    pub fn n_faces(&self) -> usize {
        self.lower.len()
    }

    /// Owner cell of every face.
    #[inline]
    pub fn lower_addr(&self) -> &[usize] {
        &self.lower
    }

    /// Neighbour cell of every face.
    #[inline]
    pub fn upper_addr(&self) -> &[usize] {
        &self.upper
    }

    /// Face indices sorted by neighbour cell (stable in face index).
    pub fn losort(&self) -> &[usize] {
        self.losort.get_or_init(|| {
            let mut order: Vec<usize> = (0..self.n_faces()).collect();
            order.sort_by_key(|&face| self.upper[face]);
            order
        })
    }

    /// Start offset of each owner's faces; length `n_cells + 1`.
    pub fn owner_start(&self) -> &[usize] {
        self.owner_start
            .get_or_init(|| start_offsets(self.n_cells, self.lower.iter().copied()))
    }

    /// Start offset of each neighbour's faces in [`losort`](Self::losort);
    /// length `n_cells + 1`.
    pub fn losort_start(&self) -> &[usize] {
        self.losort_start.get_or_init(|| {
            let upper = &self.upper;
            start_offsets(self.n_cells, self.losort().iter().map(|&f| upper[f]))
        })
    }

    /// Faces owned by `cell` (the upper-triangle entries of its row).
    #[inline]
    pub fn owner_faces(&self, cell: usize) -> std::ops::Range<usize> {
        let start = self.owner_start();
        start[cell]..start[cell + 1]
    }

    /// Faces whose neighbour is `cell` (the lower-triangle entries of its row).
    #[inline]
    pub fn neighbour_faces(&self, cell: usize) -> &[usize] {
        let start = self.losort_start();
        &self.losort()[start[cell]..start[cell + 1]]
    }

    /// Iterate `(face, other_cell)` over every face touching `cell`.
    pub fn cell_faces(&self, cell: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let owned = self.owner_faces(cell).map(move |f| (f, self.upper[f]));
        let neighboured = self
            .neighbour_faces(cell)
            .iter()
            .map(move |&f| (f, self.lower[f]));
        owned.chain(neighboured)
    }

    /// Whether the derived addressing has been built yet.
    pub fn derived_addressing_ready(&self) -> bool {
        self.losort.get().is_some() && self.owner_start.get().is_some()
    }
}

/// Counting-sort style start offsets for a non-decreasing key sequence.
fn start_offsets(n_cells: usize, keys: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut start = vec![0usize; n_cells + 1];
    for key in keys {
        start[key + 1] += 1;
    }
    for c in 0..n_cells {
        start[c + 1] += start[c];
    }
    start
}

// ---------------------------------------------------------------------------
// FaceOrdering
// ---------------------------------------------------------------------------

/// How [`LduAddressing::from_faces`] reordered the caller's faces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceOrdering {
    /// `permutation[f]` is the caller's index of canonical face `f`.
    pub permutation: Vec<usize>,
    /// `flipped[f]` is set when the caller listed canonical face `f` as
    /// `(neighbour, owner)`.
    pub flipped: Vec<bool>,
}

impl FaceOrdering {
    /// Permute a face-ordered field that does not depend on orientation
    /// (areas, weights, symmetric coefficients).
    pub fn reorder(&self, values: &[f64]) -> Vec<f64> {
        self.permutation.iter().map(|&f| values[f]).collect()
    }

    /// Permute asymmetric coefficients given per caller face as
    /// `(a_first_second, a_second_first)`, returning canonical
    /// `(upper, lower)` arrays.
    pub fn reorder_coeffs(&self, forward: &[f64], backward: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let mut upper = Vec::with_capacity(self.permutation.len());
        let mut lower = Vec::with_capacity(self.permutation.len());
        for (&f, &flip) in self.permutation.iter().zip(&self.flipped) {
            if flip {
                upper.push(backward[f]);
                lower.push(forward[f]);
            } else {
                upper.push(forward[f]);
                lower.push(backward[f]);
            }
        }
        (upper, lower)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
