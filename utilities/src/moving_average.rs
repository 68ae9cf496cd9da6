use std::collections::VecDeque;

/// Fixed-size window over the most recent samples.
pub struct MovingAverage {
    values: VecDeque<f64>,
    max_size: usize,
}

impl MovingAverage {
    pub fn new(max_size: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(max_size),
            max_size: max_size.max(1),
        }
    }

    pub fn add(&mut self, value: f64) {
        if self.values.len() >= self.max_size {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn rms(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let sum_of_squares: f64 = self.values.iter().map(|v| v * v).sum();
        (sum_of_squares / self.values.len() as f64).sqrt()
    }
}
