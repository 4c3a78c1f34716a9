// src/tracking/assignment.rs
//
// Minimum-cost bipartite matching (Kuhn-Munkres with row/column potentials,
// O(n^3)). Rectangular matrices are padded to square; gated pairs carry a
// large finite cost and are dropped from the result, so the returned pairs
// are always a partial bijection between rows and columns.

/// Cost assigned to forbidden pairs before solving.
pub const GATED: f32 = 1.0e6;

/// Optimal assignment. Returns `(row, col)` pairs sorted by row; rows or
/// columns left over by a rectangular matrix stay unassigned.
pub fn hungarian(cost: &[Vec<f32>]) -> Vec<(usize, usize)> {
    let n_rows = cost.len();
    if n_rows == 0 {
        return Vec::new();
    }
    let n_cols = cost[0].len();
    if n_cols == 0 {
        return Vec::new();
    }

    let n = n_rows.max(n_cols);
    let pad = f64::from(GATED) * 10.0;
    let inf = f64::MAX / 2.0;

    let mut c = vec![vec![pad; n]; n];
    for (i, row) in cost.iter().enumerate() {
        for (j, &v) in row.iter().enumerate().take(n_cols) {
            c[i][j] = f64::from(v);
        }
    }

    // Potentials and matching are 1-indexed; column 0 is the dummy source.
    let mut u = vec![0.0_f64; n + 1];
    let mut v = vec![0.0_f64; n + 1];
    let mut p = vec![0_usize; n + 1];
    let mut way = vec![0_usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0_usize;
        let mut min_val = vec![inf; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = inf;
            let mut j1 = 0_usize;

            for j in 1..=n {
                if !used[j] {
                    let val = c[i0 - 1][j - 1] - u[i0] - v[j];
                    if val < min_val[j] {
                        min_val[j] = val;
                        way[j] = j0;
                    }
                    if min_val[j] < delta {
                        delta = min_val[j];
                        j1 = j;
                    }
                }
            }

            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_val[j] -= delta;
                }
            }

            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        loop {
            p[j0] = p[way[j0]];
            j0 = way[j0];
            if j0 == 0 {
                break;
            }
        }
    }

    let mut pairs: Vec<(usize, usize)> = (1..=n)
        .filter(|&j| p[j] != 0)
        .map(|j| (p[j] - 1, j - 1))
        .filter(|&(r, c)| r < n_rows && c < n_cols)
        .collect();
    pairs.sort_unstable();
    pairs
}

/// Optimal assignment restricted to pairs with `cost <= max_cost`.
pub fn gated_assignment(cost: &[Vec<f32>], max_cost: f32) -> Vec<(usize, usize)> {
    hungarian(cost)
        .into_iter()
        .filter(|&(r, c)| cost[r][c] < GATED && cost[r][c] <= max_cost)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn total(cost: &[Vec<f32>], pairs: &[(usize, usize)]) -> f32 {
        pairs.iter().map(|&(r, c)| cost[r][c]).sum()
    }

    #[test]
    fn test_square_optimal() {
        let cost = vec![
            vec![4.0, 1.0, 3.0],
            vec![2.0, 0.0, 5.0],
            vec![3.0, 2.0, 2.0],
        ];
        let pairs = hungarian(&cost);
        assert_eq!(pairs.len(), 3);
        assert!((total(&cost, &pairs) - 5.0).abs() < 1e-6, "got {:?}", pairs);
    }

    #[test]
    fn test_beats_greedy() {
        // Greedy takes (0,0)=0.1 and is then forced into (1,1)=0.9.
        let cost = vec![vec![0.1, 0.2], vec![0.15, 0.9]];
        let pairs = hungarian(&cost);
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_rectangular_more_columns() {
        let cost = vec![vec![0.9, 0.1, 0.5]];
        assert_eq!(hungarian(&cost), vec![(0, 1)]);
    }

    #[test]
    fn test_rectangular_more_rows() {
        let cost = vec![vec![0.7], vec![0.2], vec![0.4]];
        assert_eq!(hungarian(&cost), vec![(1, 0)]);
    }

    #[test]
    fn test_gating_drops_forbidden_pairs() {
        let cost = vec![vec![0.3, GATED], vec![GATED, 0.95]];
        let pairs = gated_assignment(&cost, 0.8);
        assert_eq!(pairs, vec![(0, 0)]);
    }

    #[test]
    fn test_result_is_bijection() {
        let cost: Vec<Vec<f32>> = (0..6)
            .map(|r| (0..4).map(|c| ((r * 7 + c * 3) % 5) as f32 * 0.1).collect())
            .collect();
        let pairs = hungarian(&cost);
        let rows: HashSet<_> = pairs.iter().map(|p| p.0).collect();
        let cols: HashSet<_> = pairs.iter().map(|p| p.1).collect();
        assert_eq!(rows.len(), pairs.len());
        assert_eq!(cols.len(), pairs.len());
        assert_eq!(pairs.len(), 4);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(hungarian(&[]).is_empty());
        assert!(hungarian(&[vec![]]).is_empty());
    }
}
