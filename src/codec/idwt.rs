//! Inverse reversible LeGall 5/3 wavelet.
//!
//! Sub-bands are interleaved into a single canvas before synthesis:
//!
//! ```text
//!   even col  odd col
//! ┌─────────┬─────────┐
//! │   LL    │   HL    │  even row
//! ├─────────┼─────────┤
//! │   LH    │   HH    │  odd row
//! └─────────┴─────────┘
//! ```
//!
//! Synthesis runs along rows first, then along columns. Signal ends use
//! whole-sample symmetric extension.

/// Inverse 5/3 lifting on an interleaved 1-D signal, in place.
///
/// Even samples hold low-pass coefficients, odd samples high-pass.
pub fn inverse_53_1d(x: &mut [i32]) {
    let n = x.len();
    if n < 2 {
        return;
    }

    // Undo update: even -= floor((left + right + 2) / 4)
    for k in (0..n).step_by(2) {
        let left = if k == 0 { x[1] } else { x[k - 1] };
        let right = if k + 1 < n { x[k + 1] } else { x[k - 1] };
        x[k] -= (left + right + 2) >> 2;
    }

    // Undo predict: odd += floor((left + right) / 2)
    for k in (1..n).step_by(2) {
        let left = x[k - 1];
        let right = if k + 1 < n { x[k + 1] } else { x[k - 1] };
        x[k] += (left + right) >> 1;
    }
}

/// Inverse 5/3 on an interleaved `width x height` canvas, in place.
pub fn inverse_53_2d(data: &mut [i32], width: usize, height: usize) {
    debug_assert_eq!(data.len(), width * height);

    for row in data.chunks_exact_mut(width) {
        inverse_53_1d(row);
    }

    let mut column = vec![0i32; height];
    for x in 0..width {
        for (y, value) in column.iter_mut().enumerate() {
            *value = data[y * width + x];
        }
        inverse_53_1d(&mut column);
        for (y, value) in column.iter().enumerate() {
            data[y * width + x] = *value;
        }
    }
}

/// Forward 5/3 transforms, the exact inverse of the synthesis above.
#[cfg(test)]
pub(crate) mod forward {
    pub fn forward_53_1d(x: &mut [i32]) {
        let n = x.len();
        if n < 2 {
            return;
        }
        for k in (1..n).step_by(2) {
            let left = x[k - 1];
            let right = if k + 1 < n { x[k + 1] } else { x[k - 1] };
            x[k] -= (left + right) >> 1;
        }
        for k in (0..n).step_by(2) {
            let left = if k == 0 { x[1] } else { x[k - 1] };
            let right = if k + 1 < n { x[k + 1] } else { x[k - 1] };
            x[k] += (left + right + 2) >> 2;
        }
    }

    /// Columns first, then rows, so that rows-then-columns synthesis inverts it.
    pub fn forward_53_2d(data: &mut [i32], width: usize, height: usize) {
        let mut column = vec![0i32; height];
        for x in 0..width {
            for (y, value) in column.iter_mut().enumerate() {
                *value = data[y * width + x];
            }
            forward_53_1d(&mut column);
            for (y, value) in column.iter().enumerate() {
                data[y * width + x] = *value;
            }
        }
        for row in data.chunks_exact_mut(width) {
            forward_53_1d(row);
        }
    }
}
