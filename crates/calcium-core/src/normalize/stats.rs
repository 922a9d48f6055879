use ndarray::{ArrayBase, Data, Dimension};

/// Population standard deviation ignoring NaN, over every element.
///
/// Multi-row shift arrays are treated as one flattened series; the result
/// is NaN when no finite value remains.
pub fn nanstd<S, D>(values: &ArrayBase<S, D>) -> f64
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    let (count, sum) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0usize, 0.0f64), |(n, s), &v| (n + 1, s + f64::from(v)));
    if count == 0 {
        return f64::NAN;
    }
    let mean = sum / count as f64;
    let sq = values
        .iter()
        .filter(|v| !v.is_nan())
        .map(|&v| (f64::from(v) - mean).powi(2))
        .sum::<f64>();
    (sq / count as f64).sqrt()
}
