//! Training and test data.

/// One immutable `(input, target)` pair.
#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    input: Vec<f64>,
    target: Vec<f64>,
}

impl Pattern {
    pub fn new(input: Vec<f64>, target: Vec<f64>) -> Self {
        Pattern { input, target }
    }

    /// Creates a pattern whose target is the one-hot encoding of `label`
    /// among `classes` categories.
    ///
    /// A `label` outside `0..classes` yields an all-zero target.
    pub fn labeled(input: Vec<f64>, label: usize, classes: usize) -> Self {
        let target = (0..classes)
            .map(|class| if class == label { 1.0 } else { 0.0 })
            .collect();
        Pattern { input, target }
    }

    pub fn input(&self) -> &[f64] {
        &self.input
    }

    pub fn target(&self) -> &[f64] {
        &self.target
    }
}

/// An ordered, finite sequence of patterns that can be read again from the
/// start.
///
/// The trainer calls [`reset`](PatternSource::reset) before every pass and
/// then drains the source with [`next`](PatternSource::next).
pub trait PatternSource: Send {
    /// Number of patterns in one pass.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewinds to the first pattern.
    fn reset(&mut self);

    /// Returns the next pattern, or `None` at the end of the pass.
    fn next(&mut self) -> Option<&Pattern>;
}

/// A pattern source backed by a vector.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    patterns: Vec<Pattern>,
    cursor: usize,
}

impl MemorySource {
    pub fn new(patterns: Vec<Pattern>) -> Self {
        MemorySource {
            patterns,
            cursor: 0,
        }
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }
}

impl From<Vec<Pattern>> for MemorySource {
    fn from(patterns: Vec<Pattern>) -> Self {
        MemorySource::new(patterns)
    }
}

impl PatternSource for MemorySource {
    fn len(&self) -> usize {
        self.patterns.len()
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn next(&mut self) -> Option<&Pattern> {
        let pattern = self.patterns.get(self.cursor)?;
        self.cursor += 1;
        Some(pattern)
    }
}
