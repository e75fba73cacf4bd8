//! Temporal pattern aggregation
//!
//! Bins historical telemetry into a fixed 7 × 24 grid of (day-of-week,
//! hour-of-day) cells and derives per-cell flow probability and consistency.
//! The grid is rebuilt from scratch on every run.

use serde::{Deserialize, Serialize};

use crate::types::{ClassifiedState, PatternCell, TelemetryRecord};

pub const DAYS_PER_WEEK: usize = 7;
pub const HOURS_PER_DAY: usize = 24;
pub const CELL_COUNT: usize = DAYS_PER_WEEK * HOURS_PER_DAY;

/// The full weekly grid of pattern cells
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternGrid {
    cells: Vec<PatternCell>,
}

impl Default for PatternGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternGrid {
    /// All 168 cells, zeroed
    pub fn new() -> Self {
        let cells = (0..DAYS_PER_WEEK)
            .flat_map(|day| (0..HOURS_PER_DAY).map(move |hour| PatternCell::empty(day as u8, hour as u8)))
            .collect();
        Self { cells }
    }

    fn index(day_of_week: u8, hour_of_day: u8) -> Option<usize> {
        let (day, hour) = (day_of_week as usize, hour_of_day as usize);
        (day < DAYS_PER_WEEK && hour < HOURS_PER_DAY).then_some(day * HOURS_PER_DAY + hour)
    }

    pub fn cell(&self, day_of_week: u8, hour_of_day: u8) -> Option<&PatternCell> {
        Self::index(day_of_week, hour_of_day).map(|i| &self.cells[i])
    }

    pub fn cells(&self) -> &[PatternCell] {
        &self.cells
    }

    /// Total samples across every cell
    pub fn total_samples(&self) -> u64 {
        self.cells.iter().map(|c| c.sample_count as u64).sum()
    }

    /// Cells ordered by descending flow probability, ignoring cells with fewer than `min_samples`
    pub fn top_cells(&self, min_samples: u32, limit: usize) -> Vec<&PatternCell> {
        let mut cells: Vec<&PatternCell> = self
            .cells
            .iter()
            .filter(|c| c.sample_count >= min_samples)
            .collect();
        cells.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        cells.truncate(limit);
        cells
    }
}

/// Aggregates telemetry records into a `PatternGrid`
pub struct PatternAggregator;

impl PatternAggregator {
    pub fn aggregate(records: &[TelemetryRecord]) -> PatternGrid {
        let mut grid = PatternGrid::new();

        for record in records {
            let Some(i) = PatternGrid::index(record.day_of_week, record.hour_of_day) else {
                continue;
            };
            let cell = &mut grid.cells[i];
            cell.sample_count += 1;
            cell.noise_sum += record.noise_db;
            cell.bpm_sum += record.bpm;
            cell.rr_sum += record.rr_interval_ms;
            if record.state == ClassifiedState::FlowState {
                cell.flow_count += 1;
            }
        }

        for cell in &mut grid.cells {
            finalize_cell(cell);
        }

        grid
    }
}

/// Derive probability and consistency from a cell's counters
fn finalize_cell(cell: &mut PatternCell) {
    if cell.sample_count == 0 {
        cell.probability = 0.0;
        cell.consistency = 0.0;
        return;
    }

    let n = cell.sample_count as f64;
    let flows = cell.flow_count as f64;
    let p = flows / n;

    // Population variance of the 0/1 flow indicator around p
    let variance = (flows * (1.0 - p).powi(2) + (n - flows) * p.powi(2)) / n;

    cell.probability = p;
    cell.consistency = 1.0 - variance.sqrt();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    fn record(day: u8, hour: u8, state: ClassifiedState) -> TelemetryRecord {
        TelemetryRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 14, 0, 0, 0).unwrap(),
            day_of_week: day,
            hour_of_day: hour,
            noise_db: 50.0,
            bpm: 70.0,
            rr_interval_ms: 850.0,
            state,
        }
    }

    #[test]
    fn test_grid_always_has_168_cells() {
        let grid = PatternAggregator::aggregate(&[]);
        assert_eq!(grid.cells().len(), CELL_COUNT);
        assert!(grid.cells().iter().all(|c| c.sample_count == 0 && c.probability == 0.0));
        assert_eq!(grid.cell(6, 23).unwrap().day_of_week, 6);
        assert!(grid.cell(7, 0).is_none());
        assert!(grid.cell(0, 24).is_none());
    }

    #[test]
    fn test_probability_and_consistency() {
        let mut records = Vec::new();
        for i in 0..20 {
            let state = if i < 8 {
                ClassifiedState::FlowState
            } else {
                ClassifiedState::Distracted
            };
            records.push(record(2, 14, state));
        }

        let grid = PatternAggregator::aggregate(&records);
        let cell = grid.cell(2, 14).unwrap();
        assert_eq!(cell.sample_count, 20);
        assert_eq!(cell.flow_count, 8);
        assert!((cell.probability - 0.4).abs() < 1e-12);
        // variance = p(1-p) = 0.24
        assert!((cell.consistency - (1.0 - 0.24f64.sqrt())).abs() < 1e-12);
        assert!((cell.avg_noise() - 50.0).abs() < 1e-12);
        assert!((cell.avg_bpm() - 70.0).abs() < 1e-12);
        assert!((cell.avg_rr() - 850.0).abs() < 1e-12);
        assert_eq!(grid.total_samples(), 20);
    }

    #[test]
    fn test_uniform_cell_is_fully_consistent() {
        let records: Vec<_> = (0..12).map(|_| record(0, 8, ClassifiedState::FlowState)).collect();
        let grid = PatternAggregator::aggregate(&records);
        let cell = grid.cell(0, 8).unwrap();
        assert_eq!(cell.probability, 1.0);
        assert_eq!(cell.consistency, 1.0);
    }

    #[test]
    fn test_out_of_range_buckets_ignored() {
        let grid = PatternAggregator::aggregate(&[record(9, 3, ClassifiedState::FlowState)]);
        assert_eq!(grid.total_samples(), 0);
    }

    #[test]
    fn test_top_cells() {
        let mut records: Vec<_> = (0..10).map(|_| record(1, 9, ClassifiedState::FlowState)).collect();
        records.extend((0..10).map(|_| record(1, 10, ClassifiedState::Standby)));
        records.extend((0..3).map(|_| record(1, 11, ClassifiedState::FlowState)));

        let grid = PatternAggregator::aggregate(&records);
        let top = grid.top_cells(10, 5);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].hour_of_day, 9);
    }

    fn arb_record() -> impl Strategy<Value = TelemetryRecord> {
        (0u8..7, 0u8..24, any::<bool>(), 30.0f64..90.0, 40.0f64..200.0, 0.0f64..1500.0).prop_map(
            |(day, hour, flow, noise_db, bpm, rr_interval_ms)| TelemetryRecord {
                timestamp: DateTime::<Utc>::UNIX_EPOCH,
                day_of_week: day,
                hour_of_day: hour,
                noise_db,
                bpm,
                rr_interval_ms,
                state: if flow {
                    ClassifiedState::FlowState
                } else {
                    ClassifiedState::NormalLearning
                },
            },
        )
    }

    proptest! {
        #[test]
        fn aggregation_is_idempotent(records in proptest::collection::vec(arb_record(), 0..300)) {
            let first = PatternAggregator::aggregate(&records);
            let second = PatternAggregator::aggregate(&records);
            for (a, b) in first.cells().iter().zip(second.cells()) {
                prop_assert_eq!(a.probability.to_bits(), b.probability.to_bits());
                prop_assert_eq!(a.consistency.to_bits(), b.consistency.to_bits());
            }
        }

        #[test]
        fn consistency_stays_within_bernoulli_bounds(records in proptest::collection::vec(arb_record(), 1..300)) {
            let grid = PatternAggregator::aggregate(&records);
            for cell in grid.cells().iter().filter(|c| c.sample_count > 0) {
                prop_assert!(cell.consistency >= 0.5 - 1e-12 && cell.consistency <= 1.0 + 1e-12);
                prop_assert!((0.0..=1.0).contains(&cell.probability));
            }
        }
    }
}
