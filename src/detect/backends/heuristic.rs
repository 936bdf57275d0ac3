use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

const DEFAULT_CELL_SIZE: u32 = 8;
const HOT_CELL_FRACTION: f32 = 0.5;

/// Colour-segmentation backend for flames.
///
/// No model file is needed. The frame is split into square cells; a cell is
/// "hot" when at least half of its pixels have a flame-like colour. Connected
/// hot cells become one `fire` detection whose confidence is the mean flame
/// fraction of those cells.
pub struct HeuristicBackend {
    cell_size: u32,
    min_confidence: f32,
}

impl HeuristicBackend {
    pub fn new() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            min_confidence: 0.0,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_cell_size(mut self, cell_size: u32) -> Self {
        self.cell_size = cell_size.max(1);
        self
    }

    fn cell_fractions(&self, frame: &Frame) -> (Vec<f32>, u32, u32) {
        let cols = frame.width.div_ceil(self.cell_size);
        let rows = frame.height.div_ceil(self.cell_size);
        let mut fractions = vec![0.0f32; (cols * rows) as usize];

        for row in 0..rows {
            for col in 0..cols {
                let x0 = col * self.cell_size;
                let y0 = row * self.cell_size;
                let x1 = (x0 + self.cell_size).min(frame.width);
                let y1 = (y0 + self.cell_size).min(frame.height);
                let mut flame = 0u32;
                let mut total = 0u32;
                for y in y0..y1 {
                    for x in x0..x1 {
                        if let Some(rgb) = frame.pixel(x, y) {
                            total += 1;
                            if is_flame_colour(rgb) {
                                flame += 1;
                            }
                        }
                    }
                }
                if total > 0 {
                    fractions[(row * cols + col) as usize] = flame as f32 / total as f32;
                }
            }
        }
        (fractions, cols, rows)
    }
}

impl Default for HeuristicBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for HeuristicBackend {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn labels(&self) -> Vec<String> {
        vec!["fire".to_string()]
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (fractions, cols, rows) = self.cell_fractions(frame);
        let mut visited = vec![false; fractions.len()];
        let mut detections = Vec::new();

        for start in 0..fractions.len() {
            if visited[start] || fractions[start] < HOT_CELL_FRACTION {
                continue;
            }

            // 4-connected flood fill over hot cells.
            let mut stack = vec![start];
            visited[start] = true;
            let (mut min_c, mut min_r, mut max_c, mut max_r) = (cols, rows, 0u32, 0u32);
            let mut sum = 0.0f32;
            let mut count = 0u32;

            while let Some(idx) = stack.pop() {
                let col = idx as u32 % cols;
                let row = idx as u32 / cols;
                min_c = min_c.min(col);
                min_r = min_r.min(row);
                max_c = max_c.max(col);
                max_r = max_r.max(row);
                sum += fractions[idx];
                count += 1;

                let mut neighbours = Vec::with_capacity(4);
                if col > 0 {
                    neighbours.push(idx - 1);
                }
                if col + 1 < cols {
                    neighbours.push(idx + 1);
                }
                if row > 0 {
                    neighbours.push(idx - cols as usize);
                }
                if row + 1 < rows {
                    neighbours.push(idx + cols as usize);
                }
                for next in neighbours {
                    if !visited[next] && fractions[next] >= HOT_CELL_FRACTION {
                        visited[next] = true;
                        stack.push(next);
                    }
                }
            }

            let confidence = (sum / count as f32).clamp(0.0, 1.0);
            if confidence < self.min_confidence {
                continue;
            }
            let bbox = BoundingBox::new(
                (min_c * self.cell_size) as f32,
                (min_r * self.cell_size) as f32,
                ((max_c + 1) * self.cell_size).min(frame.width) as f32,
                ((max_r + 1) * self.cell_size).min(frame.height) as f32,
            )?;
            detections.push(Detection::new("fire", confidence, bbox)?);
        }

        Ok(detections)
    }
}

/// Bright, red-dominant pixels with a clear red-to-blue spread.
pub(crate) fn is_flame_colour([r, g, b]: [u8; 3]) -> bool {
    r >= 180 && r > g && g > b && r.saturating_sub(b) >= 80
}
