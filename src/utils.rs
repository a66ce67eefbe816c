use ndarray::{ArrayBase, DataMut, Dimension};

/// A trait to replace all elements in a container with zeros.
pub trait ZeroOut {
    fn zero_out(&mut self);
}

impl<S, D> ZeroOut for ArrayBase<S, D>
where
    S: DataMut<Elem = f64>,
    D: Dimension,
{
    fn zero_out(&mut self) {
        self.fill(0.0);
    }
}

/// Returns the index of the largest value. Ties go to the first one.
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Borrows the elements at `indices` mutably at the same time.
///
/// `indices` must be sorted in ascending order; anything else is skipped.
pub fn select_mut<'a, T>(items: &'a mut [T], indices: &[usize]) -> Vec<&'a mut T> {
    debug_assert!(indices.windows(2).all(|w| w[0] < w[1]));
    let mut wanted = indices.iter().copied().peekable();
    let mut selected = Vec::with_capacity(indices.len());
    for (i, item) in items.iter_mut().enumerate() {
        if wanted.peek() == Some(&i) {
            wanted.next();
            selected.push(item);
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[]), None);
        assert_eq!(argmax(&[0.1, 0.9, 0.9]), Some(1));
        assert_eq!(argmax(&[-3.0, -1.0]), Some(1));
    }

    #[test]
    fn select_mut_borrows_disjoint_items() {
        let mut items = vec![0, 1, 2, 3, 4];
        for item in select_mut(&mut items, &[1, 3, 4]) {
            *item *= 10;
        }
        assert_eq!(items, [0, 10, 2, 30, 40]);
    }
}
