use itertools::izip;
use multiversion::multiversion;

#[multiversion(targets("x86_64+avx+avx2", "x86+sse"))]
pub(crate) fn vector_dot(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());

    let head_length = a.len() - a.len() % 4;
    let (x, x_tail) = a.split_at(head_length);
    let (y, y_tail) = b.split_at(head_length);

    let mut acc = [0f64; 4];
    izip!(x.chunks_exact(4), y.chunks_exact(4)).for_each(|(x, y)| {
        for k in 0..4 {
            acc[k] += x[k] * y[k];
        }
    });

    let mut result = (acc[0] + acc[1]) + (acc[2] + acc[3]);
    for (val1, val2) in x_tail.iter().zip(y_tail) {
        result += *val1 * *val2;
    }
    result
}

#[multiversion(targets("x86_64+avx+avx2", "x86+sse"))]
pub(crate) fn axpy(x: &[f64], y: &mut [f64], a: f64) {
    let n = x.len();
    assert!(y.len() == n);

    izip!(x, y).for_each(|(x, y)| {
        *y += a * x;
    });
}

#[multiversion(targets("x86_64+avx+avx2", "x86+sse"))]
pub(crate) fn multiply(x: &[f64], y: &[f64], out: &mut [f64]) {
    let n = x.len();
    assert!(y.len() == n);
    assert!(out.len() == n);

    izip!(x, y, out).for_each(|(x, y, out)| {
        *out = x * y;
    });
}

/// `sum_i x_i^2 / w_i`
#[multiversion(targets("x86_64+avx+avx2", "x86+sse"))]
pub(crate) fn weighted_square_norm(x: &[f64], weights: &[f64]) -> f64 {
    assert!(x.len() == weights.len());

    izip!(x, weights).fold(0f64, |acc, (x, w)| acc + x * x / w)
}

pub(crate) fn all_finite(x: &[f64]) -> bool {
    x.iter().all(|val| val.is_finite())
}

/// Advance a zig-zag particle by `time` and fold the velocity flip at
/// `index` into the velocity-signed gradient and action buffers.
///
/// `column` must hold the precision column of `index`, signed by the
/// velocity before the flip.
#[multiversion(targets("x86_64+avx+avx2", "x86+sse"))]
pub(crate) fn update_dynamics(
    position: &mut [f64],
    velocity: &[f64],
    action: &mut [f64],
    gradient: &mut [f64],
    column: &[f64],
    time: f64,
    index: usize,
) {
    let n = position.len();
    assert!(velocity.len() == n);
    assert!(action.len() == n);
    assert!(gradient.len() == n);
    assert!(column.len() == n);
    assert!(index < n);

    let two_v = 2. * velocity[index];

    izip!(
        position.iter_mut(),
        velocity,
        action.iter_mut(),
        gradient.iter_mut(),
        column
    )
    .for_each(|(p, v, a, g, c)| {
        let ai = *a;
        *p += time * v;
        *g -= time * ai;
        *a = ai - two_v * c;
    });

    gradient[index] = -gradient[index];
    action[index] = -action[index];
}
