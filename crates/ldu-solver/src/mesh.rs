//! The LDU mesh: addressing, coupled interfaces and communicator.
//!
//! [`LduMesh`] is what matrices and the multigrid hierarchy share through an
//! `Arc`. It also owns the GAMG agglomeration cache: a hierarchy is built the
//! first time a GAMG solve asks for it and reused for every later field
//! solved on the same mesh, until [`LduMesh::clear_agglomeration_cache`]
//! drops it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::addressing::LduAddressing;
use crate::agglomeration::{AgglomerationParams, GamgAgglomeration};
use crate::comm::{Communicator, Payload, SerialComm, COLLECTIVE_TAG};
use crate::error::{CommError, SolverError, ValidationError};
use crate::interface::{InterfaceKind, LduInterface};

/// Mesh topology plus the parallel context it lives in.
pub struct LduMesh {
    addressing: LduAddressing,
    interfaces: Vec<LduInterface>,
    comm: Arc<dyn Communicator>,
    face_areas: Option<Vec<f64>>,
    agglomeration_cache: Mutex<HashMap<AgglomerationParams, Arc<GamgAgglomeration>>>,
}

impl LduMesh {
    /// Build a mesh and check its interfaces.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when an interface face cell is out of
    /// range, a cyclic interface has no consistent partner, or a processor
    /// interface points at this rank, a rank outside the world, or uses the
    /// reserved collective tag.
    pub fn new(
        addressing: LduAddressing,
        interfaces: Vec<LduInterface>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, ValidationError> {
        check_interfaces(&addressing, &interfaces, comm.as_ref())?;
        Ok(Self {
            addressing,
            interfaces,
            comm,
            face_areas: None,
            agglomeration_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Single-process mesh without coupled interfaces.
    pub fn serial(addressing: LduAddressing) -> Self {
        Self {
            addressing,
            interfaces: Vec::new(),
            comm: Arc::new(SerialComm::new()),
            face_areas: None,
            agglomeration_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Attach face areas used as geometric agglomeration weights.
    pub fn with_face_areas(mut self, areas: Vec<f64>) -> Result<Self, ValidationError> {
        if areas.len() != self.addressing.n_faces() {
            return Err(ValidationError::DimensionMismatch(format!(
                "{} face areas for {} faces",
                areas.len(),
                self.addressing.n_faces(),
            )));
        }
        if let Some(face) = areas.iter().position(|a| !a.is_finite() || *a < 0.0) {
            return Err(ValidationError::NonFiniteValue(format!(
                "face area {} at face {face}",
                areas[face],
            )));
        }
        self.face_areas = Some(areas);
        Ok(self)
    }

    /// Face addressing.
    #[inline]
    pub fn addressing(&self) -> &LduAddressing {
        &self.addressing
    }

    /// Coupled interfaces in patch order.
    #[inline]
    pub fn interfaces(&self) -> &[LduInterface] {
        &self.interfaces
    }

    /// Communicator shared by every level of this mesh.
    #[inline]
    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    /// Shared handle to the communicator.
    #[inline]
    pub fn comm_arc(&self) -> Arc<dyn Communicator> {
        Arc::clone(&self.comm)
    }

    /// Face areas, if supplied.
    #[inline]
    pub fn face_areas(&self) -> Option<&[f64]> {
        self.face_areas.as_deref()
    }

    /// Local cell count.
    #[inline]
    pub fn n_cells(&self) -> usize {
        self.addressing.n_cells()
    }

    /// Local internal face count.
    #[inline]
    pub fn n_faces(&self) -> usize {
        self.addressing.n_faces()
    }

    /// Cell count summed over all ranks.
    pub fn global_n_cells(&self) -> Result<usize, CommError> {
        self.comm.sum_label(self.n_cells())
    }

    // -----------------------------------------------------------------------
    // Halo exchange
    // -----------------------------------------------------------------------

    /// Values of `psi` seen across every interface, one vector per interface.
    ///
    /// All processor sends are posted before any receive.
    pub fn exchange(&self, psi: &[f64]) -> Result<Vec<Vec<f64>>, CommError> {
        for iface in &self.interfaces {
            if let InterfaceKind::Processor { neighbour_rank, tag } = *iface.kind() {
                self.comm
                    .send(neighbour_rank, tag, Payload::Scalars(iface.internal_field(psi)))?;
            }
        }
        self.interfaces
            .iter()
            .map(|iface| match *iface.kind() {
                InterfaceKind::Processor { neighbour_rank, tag } => {
                    let values = self.comm.recv_scalars(neighbour_rank, tag)?;
                    check_halo_size(iface, values.len(), neighbour_rank, tag)?;
                    Ok(values)
                }
                InterfaceKind::Cyclic {
                    neighbour_patch, ..
                } => Ok(self.interfaces[neighbour_patch].internal_field(psi)),
            })
            .collect()
    }

    /// Label version of [`exchange`](Self::exchange).
    pub fn exchange_labels(&self, labels: &[usize]) -> Result<Vec<Vec<usize>>, CommError> {
        for iface in &self.interfaces {
            if let InterfaceKind::Processor { neighbour_rank, tag } = *iface.kind() {
                self.comm
                    .send(neighbour_rank, tag, Payload::Labels(iface.internal_field(labels)))?;
            }
        }
        self.interfaces
            .iter()
            .map(|iface| match *iface.kind() {
                InterfaceKind::Processor { neighbour_rank, tag } => {
                    let values = self.comm.recv_labels(neighbour_rank, tag)?;
                    check_halo_size(iface, values.len(), neighbour_rank, tag)?;
                    Ok(values)
                }
                InterfaceKind::Cyclic {
                    neighbour_patch, ..
                } => Ok(self.interfaces[neighbour_patch].internal_field(labels)),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Agglomeration cache
    // -----------------------------------------------------------------------

    /// Cached hierarchy for `params`, building it with `build` on a miss.
    pub fn agglomeration_or_build<F>(
        &self,
        params: &AgglomerationParams,
        build: F,
    ) -> Result<Arc<GamgAgglomeration>, SolverError>
    where
        F: FnOnce() -> Result<GamgAgglomeration, SolverError>,
    {
        let mut cache = self.agglomeration_cache.lock();
        if let Some(hit) = cache.get(params) {
            return Ok(Arc::clone(hit));
        }
        let built = Arc::new(build()?);
        debug!(
            levels = built.n_levels(),
            agglomerator = %params.agglomerator,
            "cached new GAMG agglomeration"
        );
        cache.insert(params.clone(), Arc::clone(&built));
        Ok(built)
    }

    /// Whether a hierarchy for `params` is cached.
    pub fn has_cached_agglomeration(&self, params: &AgglomerationParams) -> bool {
        self.agglomeration_cache.lock().contains_key(params)
    }

    /// Drop every cached hierarchy (after the topology or weights changed).
    pub fn clear_agglomeration_cache(&self) {
        self.agglomeration_cache.lock().clear();
    }
}

impl fmt::Debug for LduMesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LduMesh")
            .field("n_cells", &self.n_cells())
            .field("n_faces", &self.n_faces())
            .field("interfaces", &self.interfaces)
            .field("rank", &self.comm.rank())
            .field("n_procs", &self.comm.n_procs())
            .finish()
    }
}

fn check_halo_size(
    iface: &LduInterface,
    received: usize,
    peer: usize,
    tag: u32,
) -> Result<(), CommError> {
    if received == iface.size() {
        Ok(())
    } else {
        Err(CommError::UnexpectedPayload {
            peer,
            tag,
            detail: format!(
                "interface {} has {} faces but neighbour sent {received} values",
                iface.name(),
                iface.size(),
            ),
        })
    }
}

fn check_interfaces(
    addressing: &LduAddressing,
    interfaces: &[LduInterface],
    comm: &dyn Communicator,
) -> Result<(), ValidationError> {
    let n_cells = addressing.n_cells();
    for (index, iface) in interfaces.iter().enumerate() {
        if let Some(&cell) = iface.face_cells().iter().find(|&&c| c >= n_cells) {
            return Err(ValidationError::InterfaceMismatch(format!(
                "interface {} references cell {cell} of {n_cells}",
                iface.name(),
            )));
        }
        match *iface.kind() {
            InterfaceKind::Processor { neighbour_rank, tag } => {
                if neighbour_rank == comm.rank() || neighbour_rank >= comm.n_procs() {
                    return Err(ValidationError::InterfaceMismatch(format!(
                        "processor interface {} on rank {} points at rank {neighbour_rank} of {}",
                        iface.name(),
                        comm.rank(),
                        comm.n_procs(),
                    )));
                }
                if tag == COLLECTIVE_TAG {
                    return Err(ValidationError::InterfaceMismatch(format!(
                        "processor interface {} uses the reserved collective tag",
                        iface.name(),
                    )));
                }
            }
            InterfaceKind::Cyclic {
                neighbour_patch,
                owner,
            } => {
                let partner = interfaces.get(neighbour_patch).ok_or_else(|| {
                    ValidationError::InterfaceMismatch(format!(
                        "cyclic interface {} names missing partner {neighbour_patch}",
                        iface.name(),
                    ))
                })?;
                let consistent = match *partner.kind() {
                    InterfaceKind::Cyclic {
                        neighbour_patch: back,
                        owner: partner_owner,
                    } => back == index && owner != partner_owner,
                    InterfaceKind::Processor { .. } => false,
                };
                if !consistent || partner.size() != iface.size() {
                    return Err(ValidationError::InterfaceMismatch(format!(
                        "cyclic interfaces {} and {} are not a consistent owner/neighbour pair",
                        iface.name(),
                        partner.name(),
                    )));
                }
            }
        }
    }
    Ok(())
}
