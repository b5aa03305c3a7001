//! Cell agglomeration for the GAMG hierarchy.
//!
//! Each level groups fine cells into coarse cells and records:
//!
//! * `restrict_addr`: fine cell to coarse cell;
//! * `face_restrict`: fine face to coarse face (or "internal", when both
//!   ends landed in the same coarse cell), with an orientation flag;
//! * per-interface face restriction and the coarse [`LduMesh`].
//!
//! Grouping is done on face weights by one of the [`AgglomeratorType`]
//! strategies. `faceAreaPair` and `MGridGen` use the mesh face areas (ones
//! when none are attached); `algebraicPair` uses the normalised coupling of
//! the matrix the hierarchy is first built for. Weights of coarse faces are
//! the sums of the fine weights mapped onto them.
//!
//! # Parallel consistency
//!
//! Agglomeration is purely local; interface faces are never merged across
//! ranks. After each level the coarse cell of every interface face cell is
//! exchanged, and the coarse interface faces are the unique
//! `(master coarse cell, slave coarse cell)` pairs in sorted order, so both
//! sides of an interface agree on the coarse face order without further
//! messages.
//!
//! # Termination
//!
//! Coarsening stops when the global cell count is at most
//! `n_procs * nCellsInCoarsestLevel`, when a level fails to reduce the
//! global cell count, or after `maxLevels` levels.

mod mgridgen;
mod pair;

pub use mgridgen::agglomerate_regions;
pub use pair::agglomerate_pairs;

use std::sync::Arc;

use tracing::debug;

use crate::addressing::LduAddressing;
use crate::controls::AgglomeratorType;
use crate::error::{SolverError, ValidationError};
use crate::interface::LduInterface;
use crate::matrix::LduMatrix;
use crate::mesh::LduMesh;
use crate::types::VSMALL;

/// Parameters that determine an agglomeration; also the cache key on the
/// mesh.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgglomerationParams {
    /// Grouping strategy.
    pub agglomerator: AgglomeratorType,
    /// Target cells per rank on the coarsest level.
    pub n_cells_in_coarsest_level: usize,
    /// Pairing passes combined into one level.
    pub merge_levels: usize,
    /// Maximum number of coarse levels.
    pub max_levels: usize,
    /// Minimum fine cells per coarse cell (region growing only).
    pub min_size: usize,
    /// Maximum fine cells per coarse cell.
    pub max_size: usize,
}

/// Where a fine face ends up on the coarse level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceTarget {
    /// Both ends are in this coarse cell; the face disappears.
    Internal(usize),
    /// Maps to coarse face `index`; `flipped` when the fine owner lies in
    /// the coarse neighbour.
    Face {
        /// Coarse face index.
        index: usize,
        /// Orientation reversed relative to the coarse face.
        flipped: bool,
    },
}

/// One fine-to-coarse step of the hierarchy.
#[derive(Debug)]
pub struct AgglomerationLevel {
    restrict_addr: Vec<usize>,
    n_coarse_cells: usize,
    face_restrict: Vec<FaceTarget>,
    interface_face_restrict: Vec<Vec<usize>>,
    face_weights: Vec<f64>,
    coarse_mesh: Arc<LduMesh>,
}

impl AgglomerationLevel {
    /// Coarse cell of each fine cell.
    #[inline]
    pub fn restrict_addr(&self) -> &[usize] {
        &self.restrict_addr
    }

    /// Number of coarse cells on this rank.
    #[inline]
    pub fn n_coarse_cells(&self) -> usize {
        self.n_coarse_cells
    }

    /// Coarse target of each fine internal face.
    #[inline]
    pub fn face_restrict(&self) -> &[FaceTarget] {
        &self.face_restrict
    }

    /// For interface `i`, the coarse interface face of each fine face.
    #[inline]
    pub fn interface_face_restrict(&self) -> &[Vec<usize>] {
        &self.interface_face_restrict
    }

    /// Agglomeration weights of the coarse faces.
    #[inline]
    pub fn face_weights(&self) -> &[f64] {
        &self.face_weights
    }

    /// The coarse mesh.
    #[inline]
    pub fn coarse_mesh(&self) -> &Arc<LduMesh> {
        &self.coarse_mesh
    }
}

/// Fine-to-coarse mapping of every level of a GAMG hierarchy.
///
/// Level `i` maps the mesh of level `i` (level 0 is the mesh the hierarchy
/// was built on) to the mesh of level `i + 1`.
#[derive(Debug)]
pub struct GamgAgglomeration {
    params: AgglomerationParams,
    levels: Vec<AgglomerationLevel>,
}

impl GamgAgglomeration {
    /// Agglomerate the mesh of `matrix` until a termination rule applies.
    ///
    /// Collective: every rank must call this.
    pub fn build(matrix: &LduMatrix, params: &AgglomerationParams) -> Result<Self, SolverError> {
        let fine_mesh = Arc::clone(matrix.mesh());
        let comm = fine_mesh.comm_arc();
        let target = comm.n_procs() * params.n_cells_in_coarsest_level;

        let mut weights = initial_weights(matrix, params.agglomerator);
        let mut mesh = fine_mesh;
        let mut levels = Vec::new();
        let mut n_global = mesh.global_n_cells()?;

        while levels.len() < params.max_levels && n_global > target {
            let (restrict_addr, n_coarse) = agglomerate(mesh.addressing(), &weights, params)?;
            let n_coarse_global = comm.sum_label(n_coarse)?;
            if n_coarse_global >= n_global {
                debug!(level = levels.len(), n_global, "agglomeration stalled");
                break;
            }
            let level = build_level(&mesh, &weights, restrict_addr, n_coarse)?;
            debug!(
                level = levels.len() + 1,
                n_cells = n_coarse,
                n_global = n_coarse_global,
                n_faces = level.coarse_mesh.n_faces(),
                "agglomerated level"
            );
            weights = level.face_weights.clone();
            mesh = Arc::clone(&level.coarse_mesh);
            n_global = n_coarse_global;
            levels.push(level);
        }

        Ok(Self {
            params: params.clone(),
            levels,
        })
    }

    /// Number of coarse levels.
    #[inline]
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    /// Parameters this hierarchy was built with.
    #[inline]
    pub fn params(&self) -> &AgglomerationParams {
        &self.params
    }

    /// All levels, finest step first.
    #[inline]
    pub fn levels(&self) -> &[AgglomerationLevel] {
        &self.levels
    }

    /// Step `level` (from mesh `level` to mesh `level + 1`).
    #[inline]
    pub fn level(&self, level: usize) -> &AgglomerationLevel {
        &self.levels[level]
    }

    /// Mesh of coarse level `level + 1`.
    #[inline]
    pub fn coarse_mesh(&self, level: usize) -> &Arc<LduMesh> {
        &self.levels[level].coarse_mesh
    }

    /// Sum fine values into their coarse cells.
    pub fn restrict_field(&self, level: usize, fine: &[f64], coarse: &mut [f64]) {
        let r = &self.levels[level].restrict_addr;
        coarse.iter_mut().for_each(|c| *c = 0.0);
        for (&target, v) in r.iter().zip(fine) {
            coarse[target] += v;
        }
    }

    /// Average fine values over their coarse cells.
    pub fn restrict_mean(&self, level: usize, fine: &[f64], coarse: &mut [f64]) {
        let r = &self.levels[level].restrict_addr;
        let mut count = vec![0usize; coarse.len()];
        coarse.iter_mut().for_each(|c| *c = 0.0);
        for (&target, v) in r.iter().zip(fine) {
            coarse[target] += v;
            count[target] += 1;
        }
        for (c, n) in coarse.iter_mut().zip(count) {
            if n > 0 {
                *c /= n as f64;
            }
        }
    }

    /// Inject coarse values into every fine cell of each group.
    pub fn prolong_field(&self, level: usize, coarse: &[f64], fine: &mut [f64]) {
        let r = &self.levels[level].restrict_addr;
        for (f, &source) in fine.iter_mut().zip(r) {
            *f = coarse[source];
        }
    }

    /// Sum fine face values onto coarse faces; internal faces are dropped.
    pub fn restrict_face_field(&self, level: usize, fine: &[f64], coarse: &mut [f64]) {
        coarse.iter_mut().for_each(|c| *c = 0.0);
        for (target, v) in self.levels[level].face_restrict.iter().zip(fine) {
            if let FaceTarget::Face { index, .. } = *target {
                coarse[index] += v;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Weights and grouping
// ---------------------------------------------------------------------------

fn initial_weights(matrix: &LduMatrix, agglomerator: AgglomeratorType) -> Vec<f64> {
    let mesh = matrix.mesh();
    match agglomerator {
        AgglomeratorType::FaceAreaPair | AgglomeratorType::MGridGen => mesh
            .face_areas()
            .map(<[f64]>::to_vec)
            .unwrap_or_else(|| vec![1.0; mesh.n_faces()]),
        AgglomeratorType::AlgebraicPair => algebraic_weights(matrix),
    }
}

/// `max(|upper|, |lower|) / sqrt(|d_owner d_neighbour|)` per face.
pub fn algebraic_weights(matrix: &LduMatrix) -> Vec<f64> {
    let addr = matrix.mesh().addressing();
    let (l, u) = (addr.lower_addr(), addr.upper_addr());
    let (diag, upper, lower) = (matrix.diag(), matrix.upper(), matrix.lower());
    (0..l.len())
        .map(|face| {
            let coupling = upper[face].abs().max(lower[face].abs());
            let scale = (diag[l[face]] * diag[u[face]]).abs().sqrt().max(VSMALL);
            coupling / scale
        })
        .collect()
}

/// One level's grouping, composing `merge_levels` passes.
fn agglomerate(
    addr: &LduAddressing,
    weights: &[f64],
    params: &AgglomerationParams,
) -> Result<(Vec<usize>, usize), ValidationError> {
    let (mut restrict, mut n_coarse) = group_once(addr, weights, params);
    if params.merge_levels <= 1 {
        return Ok((restrict, n_coarse));
    }

    let (mut pass_addr, targets) = coarse_addressing(addr, &restrict, n_coarse)?;
    let mut pass_weights = sum_face_weights(&targets, weights, pass_addr.n_faces());
    for pass in 1..params.merge_levels {
        let (pass_restrict, pass_n) = group_once(&pass_addr, &pass_weights, params);
        if pass_n >= n_coarse {
            break;
        }
        for r in restrict.iter_mut() {
            *r = pass_restrict[*r];
        }
        n_coarse = pass_n;
        if pass + 1 < params.merge_levels {
            let (next_addr, next_targets) = coarse_addressing(&pass_addr, &pass_restrict, pass_n)?;
            pass_weights = sum_face_weights(&next_targets, &pass_weights, next_addr.n_faces());
            pass_addr = next_addr;
        }
    }
    let n_coarse = renumber_by_first_appearance(&mut restrict);
    Ok((restrict, n_coarse))
}

fn group_once(
    addr: &LduAddressing,
    weights: &[f64],
    params: &AgglomerationParams,
) -> (Vec<usize>, usize) {
    match params.agglomerator {
        AgglomeratorType::FaceAreaPair | AgglomeratorType::AlgebraicPair => {
            agglomerate_pairs(addr, weights, params.max_size)
        }
        AgglomeratorType::MGridGen => {
            agglomerate_regions(addr, weights, params.min_size, params.max_size)
        }
    }
}

/// Relabel groups `0..n` in order of their first fine cell; returns `n`.
pub(crate) fn renumber_by_first_appearance(groups: &mut [usize]) -> usize {
    let n_old = groups.iter().map(|&g| g + 1).max().unwrap_or(0);
    let mut new_id = vec![usize::MAX; n_old];
    let mut next = 0;
    for g in groups.iter_mut() {
        if new_id[*g] == usize::MAX {
            new_id[*g] = next;
            next += 1;
        }
        *g = new_id[*g];
    }
    next
}

// ---------------------------------------------------------------------------
// Coarse topology
// ---------------------------------------------------------------------------

/// Coarse addressing induced by `restrict`, plus the target of every fine
/// face.
///
/// Coarse faces are the distinct `(min, max)` coarse cell pairs in sorted
/// order, which is upper-triangular by construction.
pub fn coarse_addressing(
    fine: &LduAddressing,
    restrict: &[usize],
    n_coarse: usize,
) -> Result<(LduAddressing, Vec<FaceTarget>), ValidationError> {
    let (l, u) = (fine.lower_addr(), fine.upper_addr());
    let pair = |face: usize| (restrict[l[face]], restrict[u[face]]);

    let mut keys: Vec<(usize, usize)> = (0..l.len())
        .map(pair)
        .filter(|(a, b)| a != b)
        .map(|(a, b)| (a.min(b), a.max(b)))
        .collect();
    keys.sort_unstable();
    keys.dedup();

    let targets = (0..l.len())
        .map(|face| {
            let (a, b) = pair(face);
            if a == b {
                FaceTarget::Internal(a)
            } else {
                let key = (a.min(b), a.max(b));
                FaceTarget::Face {
                    index: keys.partition_point(|k| *k < key),
                    flipped: a > b,
                }
            }
        })
        .collect();

    let (lower, upper) = keys.into_iter().unzip();
    Ok((LduAddressing::new(n_coarse, lower, upper)?, targets))
}

fn sum_face_weights(targets: &[FaceTarget], fine: &[f64], n_coarse_faces: usize) -> Vec<f64> {
    let mut coarse = vec![0.0; n_coarse_faces];
    for (target, w) in targets.iter().zip(fine) {
        if let FaceTarget::Face { index, .. } = *target {
            coarse[index] += w;
        }
    }
    coarse
}

/// Coarse interfaces and the fine-to-coarse face map of each.
fn coarse_interfaces(
    mesh: &LduMesh,
    restrict: &[usize],
) -> Result<(Vec<LduInterface>, Vec<Vec<usize>>), SolverError> {
    if mesh.interfaces().is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }
    let rank = mesh.comm().rank();
    let remote = mesh.exchange_labels(restrict)?;

    let mut interfaces = Vec::with_capacity(remote.len());
    let mut face_maps = Vec::with_capacity(remote.len());
    for (iface, neighbour) in mesh.interfaces().iter().zip(&remote) {
        let master = iface.is_master(rank);
        let keys: Vec<(usize, usize)> = iface
            .face_cells()
            .iter()
            .zip(neighbour)
            .map(|(&cell, &other)| {
                let mine = restrict[cell];
                if master {
                    (mine, other)
                } else {
                    (other, mine)
                }
            })
            .collect();
        let mut unique = keys.clone();
        unique.sort_unstable();
        unique.dedup();

        face_maps.push(
            keys.iter()
                .map(|key| unique.partition_point(|k| k < key))
                .collect(),
        );
        let face_cells = unique
            .iter()
            .map(|&(m, s)| if master { m } else { s })
            .collect();
        interfaces.push(iface.with_face_cells(face_cells));
    }
    Ok((interfaces, face_maps))
}

fn build_level(
    mesh: &LduMesh,
    weights: &[f64],
    restrict_addr: Vec<usize>,
    n_coarse_cells: usize,
) -> Result<AgglomerationLevel, SolverError> {
    let (addressing, face_restrict) =
        coarse_addressing(mesh.addressing(), &restrict_addr, n_coarse_cells)?;
    let face_weights = sum_face_weights(&face_restrict, weights, addressing.n_faces());
    let (interfaces, interface_face_restrict) = coarse_interfaces(mesh, &restrict_addr)?;
    let coarse_mesh = Arc::new(LduMesh::new(addressing, interfaces, mesh.comm_arc())?);
    Ok(AgglomerationLevel {
        restrict_addr,
        n_coarse_cells,
        face_restrict,
        interface_face_restrict,
        face_weights,
        coarse_mesh,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
