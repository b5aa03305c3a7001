//! Coupled boundary interfaces.
//!
//! An interface is a set of boundary faces whose cells are coupled to cells
//! that are not part of the local addressing: either cells on another rank
//! (processor interface) or cells on the partner patch of the same mesh
//! (cyclic interface). Face `i` of an interface always matches face `i` of
//! its partner.

use serde::{Deserialize, Serialize};

/// What an interface couples to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceKind {
    /// Faces shared with another rank.
    Processor {
        /// Rank on the other side.
        neighbour_rank: usize,
        /// Message tag; both sides use the same tag.
        tag: u32,
    },
    /// Faces coupled to another patch of the same mesh.
    Cyclic {
        /// Index of the partner interface in the mesh's interface list.
        neighbour_patch: usize,
        /// Exactly one of the two partners is the owner.
        owner: bool,
    },
}

/// One coupled boundary: its kind and the cell behind each face.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LduInterface {
    name: String,
    kind: InterfaceKind,
    face_cells: Vec<usize>,
}

impl LduInterface {
    /// Processor interface to `neighbour_rank`.
    pub fn processor(
        name: impl Into<String>,
        neighbour_rank: usize,
        tag: u32,
        face_cells: Vec<usize>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: InterfaceKind::Processor {
                neighbour_rank,
                tag,
            },
            face_cells,
        }
    }

    /// Cyclic interface whose partner is interface `neighbour_patch`.
    pub fn cyclic(
        name: impl Into<String>,
        neighbour_patch: usize,
        owner: bool,
        face_cells: Vec<usize>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: InterfaceKind::Cyclic {
                neighbour_patch,
                owner,
            },
            face_cells,
        }
    }

    /// Same coupling on a different set of face cells (used for coarse levels).
    pub(crate) fn with_face_cells(&self, face_cells: Vec<usize>) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind.clone(),
            face_cells,
        }
    }

    /// Patch name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Coupling kind.
    pub fn kind(&self) -> &InterfaceKind {
        &self.kind
    }

    /// Local cell behind each interface face.
    pub fn face_cells(&self) -> &[usize] {
        &self.face_cells
    }

    /// Number of interface faces.
    pub fn size(&self) -> usize {
        self.face_cells.len()
    }

    /// Whether this side decides the ordering of agglomerated faces.
    ///
    /// For processor interfaces the lower rank is master; for cyclic
    /// interfaces the owner patch is.
    pub fn is_master(&self, my_rank: usize) -> bool {
        match self.kind {
            InterfaceKind::Processor { neighbour_rank, .. } => my_rank < neighbour_rank,
            InterfaceKind::Cyclic { owner, .. } => owner,
        }
    }

    /// Values of a cell field at the interface faces.
    pub fn internal_field<T: Copy>(&self, cell_values: &[T]) -> Vec<T> {
        self.face_cells.iter().map(|&c| cell_values[c]).collect()
    }
}
