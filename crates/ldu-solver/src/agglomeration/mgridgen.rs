//! Region-growing agglomeration in the spirit of MGridGen.
//!
//! Seeds are taken in order of increasing face count (ties by cell index).
//! A region grows by absorbing the free neighbour with the largest total
//! connection to it until it holds `min_size` cells, then keeps growing up
//! to `max_size` only while the candidate is more strongly connected to the
//! region than to the rest of the mesh. Regions that stay below `min_size`
//! are merged into their most strongly connected neighbouring region when
//! the result fits in `max_size`.

use std::collections::BTreeMap;

use crate::addressing::LduAddressing;

use super::renumber_by_first_appearance;

const FREE: usize = usize::MAX;

/// Grow regions of `min_size..=max_size` cells.
///
/// Returns the coarse cell of every fine cell and the coarse cell count.
pub fn agglomerate_regions(
    addr: &LduAddressing,
    weights: &[f64],
    min_size: usize,
    max_size: usize,
) -> (Vec<usize>, usize) {
    let n_cells = addr.n_cells();
    let total_weight: Vec<f64> = (0..n_cells)
        .map(|c| addr.cell_faces(c).map(|(f, _)| weights[f]).sum())
        .collect();

    let mut seeds: Vec<usize> = (0..n_cells).collect();
    seeds.sort_by_key(|&c| (addr.cell_faces(c).count(), c));

    let mut group = vec![FREE; n_cells];
    let mut members: Vec<Vec<usize>> = Vec::new();
    for seed in seeds {
        if group[seed] != FREE {
            continue;
        }
        let id = members.len();
        group[seed] = id;
        let mut region = vec![seed];
        let mut candidates: BTreeMap<usize, f64> = BTreeMap::new();
        add_neighbours(addr, weights, &group, seed, &mut candidates);

        while region.len() < max_size {
            let Some((cell, connection)) = strongest(&candidates) else {
                break;
            };
            if region.len() >= min_size && connection <= total_weight[cell] - connection {
                break;
            }
            candidates.remove(&cell);
            group[cell] = id;
            region.push(cell);
            add_neighbours(addr, weights, &group, cell, &mut candidates);
        }
        members.push(region);
    }

    merge_small_regions(addr, weights, &mut group, &mut members, min_size, max_size);
    let n_coarse = renumber_by_first_appearance(&mut group);
    (group, n_coarse)
}

/// Add the free neighbours of `cell` to the candidate set.
fn add_neighbours(
    addr: &LduAddressing,
    weights: &[f64],
    group: &[usize],
    cell: usize,
    candidates: &mut BTreeMap<usize, f64>,
) {
    for (face, other) in addr.cell_faces(cell) {
        if group[other] == FREE {
            *candidates.entry(other).or_insert(0.0) += weights[face];
        }
    }
}

/// Candidate with the largest connection; the lowest index wins ties.
fn strongest(candidates: &BTreeMap<usize, f64>) -> Option<(usize, f64)> {
    candidates
        .iter()
        .fold(None, |best: Option<(usize, f64)>, (&cell, &w)| match best {
            Some((_, bw)) if bw >= w => best,
            _ => Some((cell, w)),
        })
}

fn merge_small_regions(
    addr: &LduAddressing,
    weights: &[f64],
    group: &mut [usize],
    members: &mut [Vec<usize>],
    min_size: usize,
    max_size: usize,
) {
    for id in 0..members.len() {
        let size = members[id].len();
        if size == 0 || size >= min_size {
            continue;
        }
        let mut connection: BTreeMap<usize, f64> = BTreeMap::new();
        for &cell in &members[id] {
            for (face, other) in addr.cell_faces(cell) {
                let g = group[other];
                if g != id {
                    *connection.entry(g).or_insert(0.0) += weights[face];
                }
            }
        }
        connection.retain(|&g, _| members[g].len() + size <= max_size);
        if let Some((target, _)) = strongest(&connection) {
            let moved = std::mem::take(&mut members[id]);
            for &cell in &moved {
                group[cell] = target;
            }
            members[target].extend(moved);
        }
    }
}
