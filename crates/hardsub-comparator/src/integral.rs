/// Summed-area table over a `width` x `height` grid.
pub struct SummedArea {
    stride: usize,
    table: Vec<f64>,
}

impl SummedArea {
    pub fn build(width: usize, height: usize, value: impl Fn(usize) -> f64) -> Self {
        let stride = width + 1;
        let mut table = vec![0.0; stride * (height + 1)];
        for y in 0..height {
            let mut row_sum = 0.0;
            for x in 0..width {
                row_sum += value(y * width + x);
                table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row_sum;
            }
        }
        Self { stride, table }
    }

    /// Sum over columns `[x0, x1)` and rows `[y0, y1)`.
    pub fn sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> f64 {
        let s = self.stride;
        self.table[y1 * s + x1] - self.table[y0 * s + x1] - self.table[y1 * s + x0]
            + self.table[y0 * s + x0]
    }
}

#[cfg(test)]
mod tests {
    use super::SummedArea;

    #[test]
    fn window_sums_match_brute_force() {
        let values: Vec<f64> = (0..20).map(f64::from).collect();
        let table = SummedArea::build(5, 4, |idx| values[idx]);
        let mut expected = 0.0;
        for y in 1..3 {
            for x in 2..5 {
                expected += values[y * 5 + x];
            }
        }
        assert_eq!(table.sum(2, 1, 5, 3), expected);
        assert_eq!(table.sum(0, 0, 5, 4), values.iter().sum::<f64>());
    }
}
