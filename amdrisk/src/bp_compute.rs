//! Numeric kernels of the sum-product algorithm.

use itertools::Itertools;
use ndarray::{Array1, ArrayView1, ArrayView2, ArrayViewD, Ix1, Ix2, IxDyn, Zip};

type Proba = f64;

/// For every message, the elementwise product of all the other messages.
///
/// Uses prefix and suffix products: O(n) products for n messages, and no division (zero
/// entries are fine).
pub(crate) fn exclusive_products(msgs: &[ArrayView1<Proba>], nc: usize) -> Vec<Array1<Proba>> {
    let n = msgs.len();
    // prefix[i] = msgs[0] * ... * msgs[i-1]
    let mut prefix = Vec::with_capacity(n);
    let mut acc = Array1::ones(nc);
    for m in msgs.iter() {
        prefix.push(acc.clone());
        acc *= m;
    }
    let mut res = prefix;
    let mut suffix = Array1::ones(nc);
    for (i, m) in msgs.iter().enumerate().rev() {
        res[i] *= &suffix;
        suffix *= m;
    }
    res
}

/// Elementwise product of all messages.
pub(crate) fn product<'a>(
    msgs: impl Iterator<Item = ArrayView1<'a, Proba>>,
    nc: usize,
) -> Array1<Proba> {
    let mut acc = Array1::ones(nc);
    for m in msgs {
        acc *= &m;
    }
    acc
}

/// Message from a factor to its variable at position `dest`: the potential summed over all
/// joint states of the other variables, weighted by their incoming messages.
///
/// Works for any factor degree by enumerating the Cartesian product of the variable states.
/// `incoming[dest]` is not used.
pub(crate) fn factor_to_var(
    table: ArrayViewD<Proba>,
    incoming: &[ArrayView1<Proba>],
    dest: usize,
) -> Array1<Proba> {
    let shape = table.shape();
    debug_assert_eq!(shape.len(), incoming.len());
    let mut res = Array1::zeros(shape[dest]);
    for states in shape.iter().map(|nc| 0..*nc).multi_cartesian_product() {
        let mut p = table[IxDyn(&states)];
        for (j, (s, m)) in states.iter().zip(incoming.iter()).enumerate() {
            if j != dest {
                p *= m[*s];
            }
        }
        res[states[dest]] += p;
    }
    res
}

/// Specialization of [`factor_to_var`] for pairwise factors (matrix-vector product).
pub(crate) fn factor_to_var_pairwise(
    table: ArrayView2<Proba>,
    other: ArrayView1<Proba>,
    dest: usize,
) -> Array1<Proba> {
    if dest == 0 {
        table.dot(&other)
    } else {
        table.t().dot(&other)
    }
}

/// Factor to variable message, dispatching on the factor degree.
pub(crate) fn factor_message(
    table: ArrayViewD<Proba>,
    incoming: &[ArrayView1<Proba>],
    dest: usize,
) -> Array1<Proba> {
    // Degree 1: no other variable to marginalize over.
    if let Ok(t) = table.view().into_dimensionality::<Ix1>() {
        return t.to_owned();
    }
    if let Ok(t) = table.view().into_dimensionality::<Ix2>() {
        return factor_to_var_pairwise(t, incoming[1 - dest].view(), dest);
    }
    factor_to_var(table, incoming, dest)
}

/// `|sum(old - new)|`.
///
/// Coarse: opposite differences on different states cancel out.
pub(crate) fn sum_difference(old: ArrayView1<Proba>, new: ArrayView1<Proba>) -> Proba {
    Zip::from(&old)
        .and(&new)
        .fold(0.0, |acc, o, n| acc + (o - n))
        .abs()
}

/// `max_i |old[i] - new[i]|`.
pub(crate) fn max_abs_difference(old: ArrayView1<Proba>, new: ArrayView1<Proba>) -> Proba {
    Zip::from(&old)
        .and(&new)
        .fold(0.0, |acc: Proba, o, n| acc.max((o - n).abs()))
}

/// Make the entries sum to 1.0. A zero-sum vector is left untouched, returns whether the
/// vector was normalized.
pub(crate) fn normalize(distri: &mut Array1<Proba>) -> bool {
    let s = distri.sum();
    if s == 0.0 {
        false
    } else {
        *distri /= s;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2, Array3};

    #[test]
    fn exclusive_products_skip_self() {
        let a = arr1(&[1.0, 2.0]);
        let b = arr1(&[3.0, 0.0]);
        let c = arr1(&[0.5, 4.0]);
        let res = exclusive_products(&[a.view(), b.view(), c.view()], 2);
        assert_eq!(res[0], arr1(&[1.5, 0.0]));
        assert_eq!(res[1], arr1(&[0.5, 8.0]));
        assert_eq!(res[2], arr1(&[3.0, 0.0]));
        let single = exclusive_products(&[a.view()], 2);
        assert_eq!(single[0], arr1(&[1.0, 1.0]));
        assert!(exclusive_products(&[], 2).is_empty());
    }

    #[test]
    fn pairwise_matches_generic() {
        let table = arr2(&[[0.1, 0.9], [0.4, 0.6], [0.7, 0.2]]);
        let m0 = arr1(&[0.2, 0.3, 0.5]);
        let m1 = arr1(&[0.8, 0.25]);
        let incoming = [m0.view(), m1.view()];
        for dest in 0..2 {
            let generic = factor_to_var(table.view().into_dyn(), &incoming, dest);
            let pairwise =
                factor_to_var_pairwise(table.view(), incoming[1 - dest].view(), dest);
            assert_abs_diff_eq!(generic, pairwise, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(
            factor_to_var(table.view().into_dyn(), &incoming, 0),
            arr1(&[0.305, 0.47, 0.61]),
            epsilon = 1e-12
        );
    }

    #[test]
    fn generic_degree_three() {
        let table = Array3::from_shape_fn((2, 3, 2), |(a, b, c)| (1 + a + 2 * b + 3 * c) as f64);
        let m = [arr1(&[1.0, 2.0]), arr1(&[1.0, 0.0, 1.0]), arr1(&[0.5, 0.5])];
        let incoming: Vec<_> = m.iter().map(|m| m.view()).collect();
        let res = factor_to_var(table.view().into_dyn(), &incoming, 1);
        // res[b] = sum_{a,c} t[a,b,c] m0[a] m2[c]
        let expected = Array1::from_shape_fn(3, |b| {
            let mut s = 0.0;
            for a in 0..2 {
                for c in 0..2 {
                    s += table[(a, b, c)] * m[0][a] * m[2][c];
                }
            }
            s
        });
        assert_abs_diff_eq!(res, expected, epsilon = 1e-12);
    }

    #[test]
    fn degree_one_is_table() {
        let table = arr1(&[0.0, 1.0, 0.0]);
        let m = arr1(&[5.0, 5.0, 5.0]);
        assert_eq!(
            factor_message(table.view().into_dyn(), &[m.view()], 0),
            table
        );
    }

    #[test]
    fn differences() {
        let old = arr1(&[0.5, 0.5]);
        let new = arr1(&[0.9, 0.1]);
        // cancellation
        assert_abs_diff_eq!(sum_difference(old.view(), new.view()), 0.0, epsilon = 1e-15);
        assert_abs_diff_eq!(max_abs_difference(old.view(), new.view()), 0.4, epsilon = 1e-15);
    }

    #[test]
    fn normalization() {
        let mut d = arr1(&[1.0, 3.0]);
        assert!(normalize(&mut d));
        assert_eq!(d, arr1(&[0.25, 0.75]));
        let mut z = arr1(&[0.0, 0.0]);
        assert!(!normalize(&mut z));
        assert_eq!(z, arr1(&[0.0, 0.0]));
    }
}
