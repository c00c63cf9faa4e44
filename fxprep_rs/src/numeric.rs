//! Optional-value arithmetic shared by the indicator library and the feature
//! assembler.
//!
//! Every derived column is a `Vec<Option<f64>>`. `None` marks an undefined
//! entry (warm-up, zero denominator, missing future bar) and any operation
//! touching an undefined operand yields `None`. Non-finite intermediate
//! results are normalised to `None` so NaN never leaks into a column.

/// A derived column: one optional value per row.
pub type Column = Vec<Option<f64>>;

/// Keep finite values, map NaN and infinities to `None`.
#[inline]
pub fn defined(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Division that is undefined for a zero denominator.
#[inline]
pub fn checked_div(num: f64, denom: f64) -> Option<f64> {
    if denom == 0.0 {
        None
    } else {
        defined(num / denom)
    }
}

/// Lift a raw price sequence into a column.
pub fn lift(values: &[f64]) -> Column {
    values.iter().map(|&v| defined(v)).collect()
}

/// Element-wise combination of two columns with undefined propagation.
pub fn zip_with(a: &[Option<f64>], b: &[Option<f64>], f: impl Fn(f64, f64) -> Option<f64>) -> Column {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => f(*x, *y).and_then(defined),
            _ => None,
        })
        .collect()
}

/// Element-wise transform of a column with undefined propagation.
pub fn map(values: &[Option<f64>], f: impl Fn(f64) -> Option<f64>) -> Column {
    values
        .iter()
        .map(|v| v.and_then(&f).and_then(defined))
        .collect()
}

/// Value observed `lag` rows earlier; the first `lag` rows are undefined.
pub fn shift<T: Copy>(values: &[Option<T>], lag: usize) -> Vec<Option<T>> {
    (0..values.len())
        .map(|i| if i < lag { None } else { values[i - lag] })
        .collect()
}

/// Value observed `horizon` rows later; the last `horizon` rows are
/// undefined. This is the only forward-looking primitive in the crate and is
/// reserved for label construction.
pub fn lead<T: Copy>(values: &[T], horizon: usize) -> Vec<Option<T>> {
    let len = values.len();
    (0..len)
        .map(|i| {
            i.checked_add(horizon)
                .filter(|&j| j < len)
                .map(|j| values[j])
        })
        .collect()
}

/// Apply `f` to every complete trailing window of `period` rows.
///
/// Rows before the window fills, and windows containing an undefined value,
/// are `None`.
pub fn rolling(values: &[Option<f64>], period: usize, f: impl Fn(&[f64]) -> Option<f64>) -> Column {
    let len = values.len();
    let mut out = vec![None; len];
    if period == 0 || period > len {
        return out;
    }
    let mut window = Vec::with_capacity(period);
    for i in (period - 1)..len {
        window.clear();
        let slice = &values[i + 1 - period..=i];
        if slice.iter().any(Option::is_none) {
            continue;
        }
        window.extend(slice.iter().flatten());
        out[i] = f(&window).and_then(defined);
    }
    out
}

pub fn mean(window: &[f64]) -> Option<f64> {
    if window.is_empty() {
        return None;
    }
    Some(window.iter().sum::<f64>() / window.len() as f64)
}

/// Degrees-of-freedom correction for a standard deviation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ddof {
    /// Divide by `n`.
    Population,
    /// Divide by `n - 1`.
    Sample,
}

pub fn std_dev(window: &[f64], ddof: Ddof) -> Option<f64> {
    let n = window.len();
    let denom = match ddof {
        Ddof::Population => n,
        Ddof::Sample => n.checked_sub(1)?,
    };
    if denom == 0 {
        return None;
    }
    let m = mean(window)?;
    let ss = window.iter().map(|x| (x - m).powi(2)).sum::<f64>();
    Some((ss / denom as f64).sqrt())
}

pub fn min(window: &[f64]) -> Option<f64> {
    window.iter().copied().reduce(f64::min)
}

pub fn max(window: &[f64]) -> Option<f64> {
    window.iter().copied().reduce(f64::max)
}

/// Map the sign of `a - b` to `+1` (strictly greater) or `-1` (otherwise).
pub fn sign_cross(a: &[Option<f64>], b: &[Option<f64>]) -> Vec<Option<i64>> {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => Some(if x > y { 1 } else { -1 }),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_operands_propagate() {
        let a = vec![Some(1.0), None, Some(3.0)];
        let b = vec![Some(2.0), Some(2.0), None];
        assert_eq!(zip_with(&a, &b, |x, y| Some(x + y)), vec![Some(3.0), None, None]);
        assert_eq!(checked_div(1.0, 0.0), None);
        assert_eq!(map(&[Some(-1.0)], |x| Some(x.ln())), vec![None]);
    }

    #[test]
    fn shift_and_lead_move_in_opposite_directions() {
        let values = vec![Some(1.0), Some(2.0), Some(3.0)];
        assert_eq!(shift(&values, 1), vec![None, Some(1.0), Some(2.0)]);
        assert_eq!(lead(&[1.0, 2.0, 3.0], 2), vec![Some(3.0), None, None]);
        assert_eq!(lead(&[1.0, 2.0], 5), vec![None, None]);
    }

    #[test]
    fn rolling_skips_incomplete_windows() {
        let values = vec![None, Some(1.0), Some(2.0), Some(3.0)];
        let out = rolling(&values, 2, mean);
        assert_eq!(out, vec![None, None, Some(1.5), Some(2.5)]);
    }

    #[test]
    fn std_dev_matches_population_and_sample_definitions() {
        let window = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(std_dev(&window, Ddof::Population), Some(2.0));
        let sample = std_dev(&window, Ddof::Sample).unwrap();
        assert!((sample - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert_eq!(std_dev(&[1.0], Ddof::Sample), None);
    }

    #[test]
    fn sign_cross_maps_ties_to_negative() {
        let a = vec![Some(2.0), Some(1.0), Some(1.0), None];
        let b = vec![Some(1.0), Some(2.0), Some(1.0), Some(0.0)];
        assert_eq!(sign_cross(&a, &b), vec![Some(1), Some(-1), Some(-1), None]);
    }
}
