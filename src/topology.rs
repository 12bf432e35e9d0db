use std::collections::BTreeMap;
use std::io;
use std::ops::RangeInclusive;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::Coordinate;

/// Default monthly rent for a two-bed room.
pub const RENT_TWO_SHARING: i64 = 11_000;
/// Default monthly rent for a three-bed room.
pub const RENT_THREE_SHARING: i64 = 9_000;

/// Static layout of the building: floor → room capacities (room `n` is at index `n - 1`).
///
/// Immutable after load. Every component that needs to know which beds exist
/// or what a bed costs holds an `Arc<Topology>` rather than its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    floors: BTreeMap<u32, Vec<u8>>,
    #[serde(default = "default_rent")]
    rent: BTreeMap<u8, i64>,
}

fn default_rent() -> BTreeMap<u8, i64> {
    BTreeMap::from([(2, RENT_TWO_SHARING), (3, RENT_THREE_SHARING)])
}

/// Occupancy figures for one capacity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacityClass {
    pub capacity: u8,
    pub rooms: u32,
    pub beds: u32,
    pub rent: i64,
}

impl Default for Topology {
    /// The hostel's actual layout: five floors of six rooms and a sixth floor of four.
    fn default() -> Self {
        let standard = vec![2, 2, 3, 3, 2, 2];
        let mut floors = BTreeMap::new();
        for floor in 1..=5 {
            floors.insert(floor, standard.clone());
        }
        floors.insert(6, vec![2, 2, 3, 3]);
        Self {
            floors,
            rent: default_rent(),
        }
    }
}

impl Topology {
    pub fn new(floors: BTreeMap<u32, Vec<u8>>) -> io::Result<Self> {
        let topology = Self {
            floors,
            rent: default_rent(),
        };
        topology.check()?;
        Ok(topology)
    }

    /// Parse a JSON layout, e.g. `{"floors": {"1": [2, 3]}, "rent": {"2": 11000, "3": 9000}}`.
    pub fn from_json(json: &str) -> io::Result<Self> {
        let mut topology: Topology = serde_json::from_str(json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        for (capacity, rent) in default_rent() {
            topology.rent.entry(capacity).or_insert(rent);
        }
        topology.check()?;
        Ok(topology)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    fn check(&self) -> io::Result<()> {
        let invalid = |msg: String| io::Error::new(io::ErrorKind::InvalidData, msg);
        if self.floors.is_empty() {
            return Err(invalid("topology has no floors".into()));
        }
        for (floor, rooms) in &self.floors {
            if *floor == 0 {
                return Err(invalid("floors are numbered from 1".into()));
            }
            if rooms.is_empty() {
                return Err(invalid(format!("floor {floor} has no rooms")));
            }
            if let Some(bad) = rooms.iter().find(|c| !matches!(**c, 2 | 3)) {
                return Err(invalid(format!(
                    "floor {floor} has a room of capacity {bad}; only 2 or 3 beds are supported"
                )));
            }
        }
        Ok(())
    }

    /// Bed count of a room, or `None` if the floor or room does not exist.
    pub fn capacity(&self, floor: u32, room: u32) -> Option<u8> {
        let index = usize::try_from(room.checked_sub(1)?).ok()?;
        self.floors.get(&floor)?.get(index).copied()
    }

    /// Bed numbers of a room, ascending (`1..=capacity`).
    pub fn beds(&self, floor: u32, room: u32) -> Option<RangeInclusive<u32>> {
        let capacity = self.capacity(floor, room)?;
        Some(1..=u32::from(capacity))
    }

    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        self.capacity(coordinate.floor, coordinate.room)
            .is_some_and(|cap| coordinate.bed >= 1 && coordinate.bed <= u32::from(cap))
    }

    /// Monthly rent for a room of the given capacity.
    pub fn rent_tier(&self, capacity: u8) -> Option<i64> {
        self.rent.get(&capacity).copied()
    }

    /// Monthly rent of the bed at `coordinate`.
    pub fn rent_for(&self, coordinate: &Coordinate) -> Option<i64> {
        self.rent_tier(self.capacity(coordinate.floor, coordinate.room)?)
    }

    pub fn floors(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.floors.iter().map(|(floor, rooms)| (*floor, rooms.as_slice()))
    }

    /// Every coordinate in the building, ordered floor → room → bed.
    pub fn coordinates(&self) -> impl Iterator<Item = Coordinate> + '_ {
        self.floors.iter().flat_map(|(floor, rooms)| {
            rooms.iter().zip(1u32..).flat_map(move |(capacity, room)| {
                (1..=u32::from(*capacity)).map(move |bed| Coordinate::new(*floor, room, bed))
            })
        })
    }

    pub fn total_beds(&self) -> u32 {
        self.floors
            .values()
            .flat_map(|rooms| rooms.iter())
            .map(|c| u32::from(*c))
            .sum()
    }

    /// Rooms and beds per capacity class, ascending by capacity.
    pub fn capacity_classes(&self) -> Vec<CapacityClass> {
        let mut classes: BTreeMap<u8, CapacityClass> = BTreeMap::new();
        for capacity in self.floors.values().flat_map(|rooms| rooms.iter()) {
            let class = classes.entry(*capacity).or_insert(CapacityClass {
                capacity: *capacity,
                rooms: 0,
                beds: 0,
                rent: self.rent_tier(*capacity).unwrap_or(0),
            });
            class.rooms += 1;
            class.beds += u32::from(*capacity);
        }
        classes.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let t = Topology::default();
        assert_eq!(t.total_beds(), 5 * 14 + 10);
        assert_eq!(t.capacity(1, 1), Some(2));
        assert_eq!(t.capacity(1, 3), Some(3));
        assert_eq!(t.capacity(6, 4), Some(3));
        assert_eq!(t.capacity(6, 5), None);
        assert_eq!(t.capacity(7, 1), None);
        assert_eq!(t.capacity(1, 0), None);
    }

    #[test]
    fn beds_are_one_based() {
        let t = Topology::default();
        let beds: Vec<u32> = t.beds(1, 3).unwrap().collect();
        assert_eq!(beds, vec![1, 2, 3]);
        assert!(t.beds(9, 1).is_none());
    }

    #[test]
    fn contains_checks_bed_range() {
        let t = Topology::default();
        assert!(t.contains(&Coordinate::new(1, 1, 2)));
        assert!(!t.contains(&Coordinate::new(1, 1, 3)));
        assert!(!t.contains(&Coordinate::new(1, 1, 0)));
        assert!(t.contains(&Coordinate::new(1, 3, 3)));
    }

    #[test]
    fn rent_tiers() {
        let t = Topology::default();
        assert_eq!(t.rent_tier(2), Some(11_000));
        assert_eq!(t.rent_tier(3), Some(9_000));
        assert_eq!(t.rent_for(&Coordinate::new(2, 4, 1)), Some(9_000));
        assert_eq!(t.rent_for(&Coordinate::new(2, 5, 1)), Some(11_000));
    }

    #[test]
    fn coordinates_enumerate_every_bed_in_order() {
        let t = Topology::new(BTreeMap::from([(1, vec![2, 3])])).unwrap();
        let all: Vec<Coordinate> = t.coordinates().collect();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0], Coordinate::new(1, 1, 1));
        assert_eq!(all[1], Coordinate::new(1, 1, 2));
        assert_eq!(all[2], Coordinate::new(1, 2, 1));
        assert_eq!(all[4], Coordinate::new(1, 2, 3));
    }

    #[test]
    fn capacity_classes_count_rooms_and_beds() {
        let t = Topology::new(BTreeMap::from([(1, vec![2, 3, 2]), (2, vec![3])])).unwrap();
        let classes = t.capacity_classes();
        assert_eq!(classes.len(), 2);
        assert_eq!(classes[0].capacity, 2);
        assert_eq!(classes[0].rooms, 2);
        assert_eq!(classes[0].beds, 4);
        assert_eq!(classes[0].rent, 11_000);
        assert_eq!(classes[1].rooms, 2);
        assert_eq!(classes[1].beds, 6);
    }

    #[test]
    fn from_json_fills_default_rent() {
        let t = Topology::from_json(r#"{"floors": {"1": [2, 3]}, "rent": {"2": 12000}}"#).unwrap();
        assert_eq!(t.rent_tier(2), Some(12_000));
        assert_eq!(t.rent_tier(3), Some(9_000));
        assert_eq!(t.capacity(1, 2), Some(3));
    }

    #[test]
    fn rejects_unsupported_capacity() {
        let err = Topology::from_json(r#"{"floors": {"1": [2, 4]}}"#).unwrap_err();
        assert!(err.to_string().contains("capacity 4"));
    }

    #[test]
    fn rejects_empty_layouts() {
        assert!(Topology::from_json(r#"{"floors": {}}"#).is_err());
        assert!(Topology::from_json(r#"{"floors": {"1": []}}"#).is_err());
        assert!(Topology::from_json(r#"{"floors": {"0": [2]}}"#).is_err());
    }
}
