//! Reference engine: finds bright blobs on a coarse cell grid.
//!
//! Stands in for the model when no accelerator is available. Cells whose mean
//! gray level reaches the threshold are grouped into 4-connected blobs and
//! each blob's bounding box becomes a detection.

use crate::error::InferenceError;
use crate::inference::{DetectionRegion, GrayFrame, InferenceEngine};

const DARK: u8 = 0;
const BRIGHT: u8 = 1;
const VISITED: u8 = 2;

pub struct BrightSpotDetector {
    cell: u32,
    threshold: u8,
    grid: Vec<u8>,
    stack: Vec<usize>,
}

impl BrightSpotDetector {
    /// `max_width`/`max_height` bound the frames this detector accepts
    pub fn new(cell: u32, threshold: u8, max_width: u32, max_height: u32) -> Self {
        let cell = cell.max(1);
        let cells = max_width.div_ceil(cell) as usize * max_height.div_ceil(cell) as usize;
        Self {
            cell,
            threshold,
            grid: vec![DARK; cells],
            stack: Vec::with_capacity(cells),
        }
    }

    fn classify(&mut self, frame: &GrayFrame<'_>, cols: usize, rows: usize) {
        let cell = self.cell as usize;
        let width = frame.width as usize;
        let height = frame.height as usize;

        for row in 0..rows {
            for col in 0..cols {
                let x_end = ((col + 1) * cell).min(width);
                let y_end = ((row + 1) * cell).min(height);
                let mut sum = 0u64;
                for y in row * cell..y_end {
                    let line = &frame.data[y * width..(y + 1) * width];
                    sum += line[col * cell..x_end].iter().map(|v| u64::from(*v)).sum::<u64>();
                }
                let area = ((x_end - col * cell) * (y_end - row * cell)) as u64;
                let mean = if area == 0 { 0 } else { sum / area };
                self.grid[row * cols + col] = if mean >= u64::from(self.threshold) {
                    BRIGHT
                } else {
                    DARK
                };
            }
        }
    }

    /// Flood one blob starting at `start`, returning its cell bounds
    fn flood(&mut self, start: usize, cols: usize, rows: usize) -> (usize, usize, usize, usize) {
        let (mut min_c, mut min_r) = (start % cols, start / cols);
        let (mut max_c, mut max_r) = (min_c, min_r);

        self.stack.clear();
        self.grid[start] = VISITED;
        self.stack.push(start);

        while let Some(index) = self.stack.pop() {
            let (c, r) = (index % cols, index / cols);
            min_c = min_c.min(c);
            max_c = max_c.max(c);
            min_r = min_r.min(r);
            max_r = max_r.max(r);

            let neighbours = [
                (c > 0).then(|| index - 1),
                (c + 1 < cols).then(|| index + 1),
                (r > 0).then(|| index - cols),
                (r + 1 < rows).then(|| index + cols),
            ];
            for next in neighbours.into_iter().flatten() {
                if self.grid[next] == BRIGHT {
                    self.grid[next] = VISITED;
                    self.stack.push(next);
                }
            }
        }

        (min_c, min_r, max_c, max_r)
    }
}

impl InferenceEngine for BrightSpotDetector {
    fn run_inference(
        &mut self,
        frame: GrayFrame<'_>,
        regions: &mut [DetectionRegion],
    ) -> Result<usize, InferenceError> {
        let cols = frame.width.div_ceil(self.cell) as usize;
        let rows = frame.height.div_ceil(self.cell) as usize;
        let needed = frame.width as usize * frame.height as usize;
        if cols * rows > self.grid.len() || frame.data.len() < needed {
            return Err(InferenceError::Engine(-1));
        }

        self.classify(&frame, cols, rows);

        let mut found = 0;
        for start in 0..cols * rows {
            if self.grid[start] != BRIGHT {
                continue;
            }
            let (min_c, min_r, max_c, max_r) = self.flood(start, cols, rows);

            if let Some(region) = regions.get_mut(found) {
                let x = min_c as u32 * self.cell;
                let y = min_r as u32 * self.cell;
                let x_end = ((max_c as u32 + 1) * self.cell).min(frame.width);
                let y_end = ((max_r as u32 + 1) * self.cell).min(frame.height);
                *region = DetectionRegion::new(x, y, x_end - x, y_end - y);
            }
            found += 1;
        }

        Ok(found)
    }
}
