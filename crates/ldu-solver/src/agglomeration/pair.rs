//! Pairwise agglomeration.
//!
//! Faces are visited in descending weight (ties by ascending face index);
//! a face whose two cells are both still free makes them a new pair. Cells
//! left over are then visited in ascending order and join the group across
//! their heaviest face if that group still has room, otherwise they become
//! singletons. The result depends only on the addressing and the weights.

use crate::addressing::LduAddressing;

use super::renumber_by_first_appearance;

const FREE: usize = usize::MAX;

/// Pair cells along their heaviest faces.
///
/// Returns the coarse cell of every fine cell and the coarse cell count.
/// No group exceeds `max_size` cells (pairs are always allowed).
pub fn agglomerate_pairs(
    addr: &LduAddressing,
    weights: &[f64],
    max_size: usize,
) -> (Vec<usize>, usize) {
    let n_cells = addr.n_cells();
    let (l, u) = (addr.lower_addr(), addr.upper_addr());

    let mut order: Vec<usize> = (0..l.len()).collect();
    order.sort_by(|&a, &b| weights[b].total_cmp(&weights[a]).then(a.cmp(&b)));

    let mut group = vec![FREE; n_cells];
    let mut size: Vec<usize> = Vec::with_capacity(n_cells / 2 + 1);
    for face in order {
        let (owner, neighbour) = (l[face], u[face]);
        if group[owner] == FREE && group[neighbour] == FREE {
            group[owner] = size.len();
            group[neighbour] = size.len();
            size.push(2);
        }
    }

    for cell in 0..n_cells {
        if group[cell] != FREE {
            continue;
        }
        let mut best: Option<(usize, f64, usize)> = None;
        for (face, other) in addr.cell_faces(cell) {
            let g = group[other];
            if g == FREE || size[g] >= max_size {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_face, w, _)) => {
                    weights[face] > w || (weights[face] == w && face < best_face)
                }
            };
            if better {
                best = Some((face, weights[face], g));
            }
        }
        match best {
            Some((_, _, g)) => {
                group[cell] = g;
                size[g] += 1;
            }
            None => {
                group[cell] = size.len();
                size.push(1);
            }
        }
    }

    let n_coarse = renumber_by_first_appearance(&mut group);
    (group, n_coarse)
}
