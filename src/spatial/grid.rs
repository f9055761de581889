// grid.rs: longitudinal cell index.
//
// Cell width = detection radius, so anything within range sits in the own
// cell or one of its two neighbours. Vehicles are only re-bucketed when they
// cross a cell boundary.

use crate::core::vehicle::VehicleId;
use std::collections::{BTreeSet, HashMap};

/// Buckets vehicles by `floor(x / cell_size)`.
#[derive(Clone, Debug)]
pub struct SpatialIndex {
    cell_size: f64,
    /// cell → vehicles, ordered so neighbour lists come out sorted.
    cells: HashMap<u32, BTreeSet<VehicleId>>,
    /// vehicle → cell it is currently filed under.
    assigned: HashMap<VehicleId, u32>,
}

impl SpatialIndex {
    pub fn new(cell_size: f64) -> Self {
        SpatialIndex {
            cell_size,
            cells: HashMap::new(),
            assigned: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Positions before the route origin fold into cell 0.
    #[inline]
    pub fn cell_of(&self, x: f64) -> u32 {
        let cell = (x / self.cell_size).floor();
        if cell.is_finite() && cell > 0.0 {
            cell as u32
        } else {
            0
        }
    }

    /// File `id` at longitudinal position `x`. Returns true if its cell changed.
    pub fn update(&mut self, id: VehicleId, x: f64) -> bool {
        let cell = self.cell_of(x);
        match self.assigned.insert(id, cell) {
            Some(old) if old == cell => false,
            Some(old) => {
                self.detach(id, old);
                self.cells.entry(cell).or_default().insert(id);
                true
            }
            None => {
                self.cells.entry(cell).or_default().insert(id);
                true
            }
        }
    }

    pub fn remove(&mut self, id: VehicleId) {
        if let Some(cell) = self.assigned.remove(&id) {
            self.detach(id, cell);
        }
    }

    pub fn cell(&self, id: VehicleId) -> Option<u32> {
        self.assigned.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }

    /// Everyone in the own and adjacent cells except `id`, sorted by id.
    pub fn neighbors(&self, id: VehicleId) -> Vec<VehicleId> {
        let Some(&cell) = self.assigned.get(&id) else {
            return Vec::new();
        };
        let first = cell.saturating_sub(1);
        let mut out: Vec<VehicleId> = (first..=cell.saturating_add(1))
            .filter_map(|c| self.cells.get(&c))
            .flat_map(|bucket| bucket.iter().copied())
            .filter(|other| *other != id)
            .collect();
        out.sort_unstable();
        out
    }

    fn detach(&mut self, id: VehicleId, cell: u32) {
        if let Some(bucket) = self.cells.get_mut(&cell) {
            bucket.remove(&id);
            if bucket.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(positions: &[(u32, f64)]) -> SpatialIndex {
        let mut index = SpatialIndex::new(150.0);
        for &(id, x) in positions {
            index.update(VehicleId(id), x);
        }
        index
    }

    #[test]
    fn neighbours_span_three_cells() {
        let index = index(&[(1, 10.0), (2, 160.0), (3, 320.0), (4, 460.0), (5, 470.0)]);
        assert_eq!(index.neighbors(VehicleId(3)), vec![VehicleId(2), VehicleId(4), VehicleId(5)]);
        // first cell only looks forward
        assert_eq!(index.neighbors(VehicleId(1)), vec![VehicleId(2)]);
    }

    #[test]
    fn only_cell_changes_rebucket() {
        let mut index = index(&[(1, 10.0)]);
        assert_eq!(index.cell_size(), 150.0);
        assert!(!index.update(VehicleId(1), 120.0));
        assert!(index.update(VehicleId(1), 151.0));
        assert_eq!(index.cell(VehicleId(1)), Some(1));
        assert!(index.cells.get(&0).is_none());
    }

    #[test]
    fn negative_positions_fold_into_first_cell() {
        let index = index(&[(1, -40.0), (2, 30.0)]);
        assert_eq!(index.cell(VehicleId(1)), Some(0));
        assert_eq!(index.neighbors(VehicleId(2)), vec![VehicleId(1)]);
    }

    #[test]
    fn removed_vehicles_disappear() {
        let mut index = index(&[(1, 10.0), (2, 20.0)]);
        index.remove(VehicleId(2));
        assert!(index.neighbors(VehicleId(1)).is_empty());
        assert!(index.neighbors(VehicleId(2)).is_empty());
        assert_eq!(index.len(), 1);
    }
}
