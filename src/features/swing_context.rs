//! Global swing-point index (§4.4 step 6, §9 "Per-zone optional slice vs
//! global context"). Computed once over the full series when
//! `swing_scope == global`, then sliced per zone with neighbor awareness so a
//! swing that starts before a zone and ends inside it is still counted.

use serde::{Deserialize, Serialize};

/// One leg of price movement: a rally (trough -> peak) or a drop (peak -> trough).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SwingPoint {
    pub start_idx: usize,
    pub end_idx: usize,
    pub start_price: f64,
    pub end_price: f64,
    pub is_rally: bool,
}

impl SwingPoint {
    pub fn amplitude_pct(&self) -> f64 {
        if self.start_price == 0.0 {
            return 0.0;
        }
        (self.end_price - self.start_price) / self.start_price * 100.0
    }

    pub fn duration_bars(&self) -> usize {
        self.end_idx.saturating_sub(self.start_idx).max(1)
    }

    pub fn speed_pct_per_bar(&self) -> f64 {
        self.amplitude_pct().abs() / self.duration_bars() as f64
    }
}

/// Full-series swing index plus a slicing operation for global-scope aggregation.
#[derive(Debug, Clone, Default)]
pub struct SwingContext {
    pub points: Vec<SwingPoint>,
}

impl SwingContext {
    pub fn new(points: Vec<SwingPoint>) -> Self {
        Self { points }
    }

    /// Swing points overlapping `[zone_start, zone_end]`. A swing counts if
    /// any part of its span falls inside the zone, including legs that begin
    /// before the zone and end inside it.
    pub fn slice(&self, zone_start: usize, zone_end: usize) -> Vec<SwingPoint> {
        self.points
            .iter()
            .copied()
            .filter(|p| p.end_idx >= zone_start && p.start_idx <= zone_end)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_includes_swing_spanning_zone_boundary() {
        let ctx = SwingContext::new(vec![
            SwingPoint { start_idx: 0, end_idx: 5, start_price: 100.0, end_price: 110.0, is_rally: true },
            SwingPoint { start_idx: 5, end_idx: 12, start_price: 110.0, end_price: 90.0, is_rally: false },
            SwingPoint { start_idx: 20, end_idx: 25, start_price: 90.0, end_price: 95.0, is_rally: true },
        ]);
        let overlapping = ctx.slice(8, 22);
        assert_eq!(overlapping.len(), 2);
    }

    #[test]
    fn amplitude_pct_sign_matches_direction() {
        let rally = SwingPoint { start_idx: 0, end_idx: 4, start_price: 100.0, end_price: 120.0, is_rally: true };
        let drop = SwingPoint { start_idx: 4, end_idx: 8, start_price: 120.0, end_price: 96.0, is_rally: false };
        assert!(rally.amplitude_pct() > 0.0);
        assert!(drop.amplitude_pct() < 0.0);
    }
}
