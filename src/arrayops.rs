use num_traits::{Float, ToPrimitive};

/// `n` evenly spaced points from `start` to `end`, both included
pub fn linspace<T: Float + ToPrimitive>(start: T, end: T, n: usize) -> Vec<T> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / T::from(n - 1).unwrap();
            (0..n).map(|i| start + T::from(i).unwrap() * step).collect()
        }
    }
}

pub fn minmax<T: Float>(values: &[T]) -> (T, T) {
    let mut max = -T::infinity();
    let mut min = T::infinity();

    for v in values.iter() {
        if *v > max {
            max = *v;
        }
        if *v < min {
            min = *v
        }
    }
    (min, max)
}

/// The index and value of the largest element, ignoring NaN
pub fn argmax<T: Float>(values: &[T]) -> Option<(usize, T)> {
    values
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linspace(2.0, 3.0, 1), vec![2.0]);
        assert!(linspace(2.0f32, 3.0, 0).is_empty());
    }

    #[test]
    fn test_minmax_argmax() {
        let values = [3.0, -1.0, 7.5, f64::NAN, 7.5, 2.0];
        assert_eq!(minmax(&values), (-1.0, 7.5));
        assert_eq!(argmax(&values), Some((2, 7.5)));
        assert_eq!(argmax::<f64>(&[]), None);
    }
}
