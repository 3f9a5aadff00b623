//! Turn raw YOLO head rows into a small set of boxes.

/// Pixel-space box, top-left origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BBox {
    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.w).min(other.x + other.w);
        let bottom = (self.y + self.h).min(other.y + other.h);
        let inter = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BBox,
}

/// Scan rows laid out as `[cx, cy, w, h, objectness, class scores...]`, with
/// coordinates normalized to the image, keeping rows whose best class score
/// reaches `min_confidence`. Objectness is ignored.
pub fn collect_candidates(
    rows: &[f32],
    row_len: usize,
    image_w: u32,
    image_h: u32,
    min_confidence: f32,
) -> Vec<Detection> {
    if row_len <= 5 {
        return Vec::new();
    }
    let (iw, ih) = (image_w as f32, image_h as f32);

    rows.chunks_exact(row_len)
        .filter_map(|row| {
            let (class_id, score) = row[5..]
                .iter()
                .copied()
                .enumerate()
                .fold((0usize, f32::MIN), |best, (i, s)| if s > best.1 { (i, s) } else { best });
            if score < min_confidence {
                return None;
            }
            // Whole-pixel coordinates.
            let cx = (row[0] * iw).trunc();
            let cy = (row[1] * ih).trunc();
            let w = (row[2] * iw).trunc();
            let h = (row[3] * ih).trunc();
            Some(Detection {
                class_id: class_id as u32,
                confidence: score,
                bbox: BBox {
                    x: cx - w / 2.0,
                    y: cy - h / 2.0,
                    w,
                    h,
                },
            })
        })
        .collect()
}

/// Greedy non-maximum suppression. Drops anything scoring at or below
/// `score_threshold`, then suppresses boxes overlapping a kept one by more
/// than `iou_threshold`. Returned in descending confidence.
pub fn non_max_suppression(
    mut detections: Vec<Detection>,
    score_threshold: f32,
    iou_threshold: f32,
) -> Vec<Detection> {
    detections.retain(|d| d.confidence > score_threshold);
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if kept
            .iter()
            .all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}
