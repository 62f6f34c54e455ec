//! Command-cursor cadences: progress checkpoints and snapshot exports.

/// Cursor positions (commands completed) at which a snapshot is exported.
///
/// With interval `p` percent over `total` commands, the k-th export fires
/// once `ceil(total * k * p / 100)` commands have run. The last point is
/// always `total`, which doubles as the final export. An empty sequence
/// still gets its final export, at cursor zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPlan {
    total: usize,
    points: Vec<usize>,
}

impl ExportPlan {
    pub fn new(total: usize, interval_percent: u32, enabled: bool) -> Self {
        let mut points = Vec::new();
        if enabled && total == 0 {
            points.push(0);
        } else if enabled {
            let percent = interval_percent.clamp(1, 100) as usize;
            let mut step = percent;
            while step < 100 {
                let point = (total * step).div_ceil(100);
                if points.last() != Some(&point) {
                    points.push(point);
                }
                step += percent;
            }
            if points.last() != Some(&total) {
                points.push(total);
            }
        }
        Self { total, points }
    }

    pub fn is_enabled(&self) -> bool {
        !self.points.is_empty()
    }

    pub fn points(&self) -> &[usize] {
        &self.points
    }

    pub fn is_due(&self, cursor: usize) -> bool {
        self.points.binary_search(&cursor).is_ok()
    }

    /// The export at this cursor is the last one of a complete build.
    pub fn is_final(&self, cursor: usize) -> bool {
        self.is_enabled() && cursor == self.total
    }
}

/// Log a progress checkpoint after every `interval` commands. Zero disables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPolicy {
    interval: usize,
}

impl CheckpointPolicy {
    pub fn every(interval: usize) -> Self {
        Self { interval }
    }

    pub fn is_due(&self, cursor: usize) -> bool {
        self.interval > 0 && cursor > 0 && cursor % self.interval == 0
    }
}
