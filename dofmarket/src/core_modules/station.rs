// THEORY:
// A station is a named pickup spot on the table: the detector class it sells, the
// approach pose the arm uses to reach it, and its price. The table is built once at
// startup from configuration and then shared read-only (behind an `Arc`) between the
// display loop, the ledger and the motion worker.
//
// Binding a control to a station happens here too. Instead of building one callback
// per button that captures the station name, the table hands out an ordered list of
// `PickCommand` values, each already carrying its station name and its key. The
// display only ever maps a key press to one of those values.

use serde::{Deserialize, Serialize};

use crate::core_modules::pose::JointPose;

/// One entry of the station table as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    /// Object class name, as reported by the detector.
    pub name: String,
    /// Pose that places the open gripper around the object.
    pub pose: JointPose,
    /// Price charged to the ledger when this station is picked.
    pub price: u32,
}

impl Station {
    pub fn new(name: impl Into<String>, pose: JointPose, price: u32) -> Self {
        Self {
            name: name.into(),
            pose,
            price,
        }
    }

    /// Caption for the pick control, e.g. "Pick Apple (Rs 20)".
    pub fn caption(&self) -> String {
        let mut chars = self.name.chars();
        let title: String = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
        format!("Pick {} (Rs {})", title, self.price)
    }
}

/// A pick request pre-bound to one station.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PickCommand {
    pub key: char,
    pub station: String,
    pub caption: String,
}

/// Immutable lookup table from station name to pose and price, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct StationTable {
    stations: Vec<Station>,
}

impl StationTable {
    /// Builds the table. Later duplicates of a name are ignored; configuration
    /// validation rejects them before this point.
    pub fn new(stations: impl IntoIterator<Item = Station>) -> Self {
        let mut table: Vec<Station> = Vec::new();
        for station in stations {
            if !table.iter().any(|s| s.name == station.name) {
                table.push(station);
            }
        }
        Self { stations: table }
    }

    pub fn get(&self, name: &str) -> Option<&Station> {
        self.stations.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn price_of(&self, name: &str) -> Option<u32> {
        self.get(name).map(|s| s.price)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Key bindings `'1'..='9'` in table order. Stations past the ninth get no key.
    pub fn commands(&self) -> Vec<PickCommand> {
        self.stations
            .iter()
            .zip('1'..='9')
            .map(|(station, key)| PickCommand {
                key,
                station: station.name.clone(),
                caption: station.caption(),
            })
            .collect()
    }

    /// Factory stock of the kiosk table.
    pub fn market_defaults() -> Vec<Station> {
        vec![
            Station::new("apple", JointPose::from([65, 90, -15, 90, 90, 40]), 20),
            Station::new("banana", JointPose::from([112, 72, 53, 46, 90, 40]), 25),
            Station::new("kiwi", JointPose::from([112, 90, -15, 90, 90, 40]), 30),
            Station::new("lemon", JointPose::from([90, 76, 51, 45, 90, 40]), 40),
            Station::new("lychee", JointPose::from([87, 100, -25, 90, 90, 40]), 50),
            Station::new("strawberry", JointPose::from([65, 60, 70, 43, 90, 40]), 60),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_capitalises_name() {
        let table = StationTable::new(StationTable::market_defaults());
        assert_eq!(table.get("banana").unwrap().caption(), "Pick Banana (Rs 25)");
    }

    #[test]
    fn commands_are_bound_in_table_order() {
        let table = StationTable::new(StationTable::market_defaults());
        let commands = table.commands();

        assert_eq!(commands.len(), 6);
        assert_eq!(commands[0].key, '1');
        assert_eq!(commands[0].station, "apple");
        assert_eq!(commands[5].key, '6');
        assert_eq!(commands[5].station, "strawberry");
    }

    #[test]
    fn unknown_name_has_no_price() {
        let table = StationTable::new(StationTable::market_defaults());
        assert_eq!(table.price_of("durian"), None);
        assert_eq!(table.price_of("kiwi"), Some(30));
    }

    #[test]
    fn duplicate_names_keep_first_entry() {
        let pose = JointPose::from([90, 90, 90, 90, 90, 40]);
        let table = StationTable::new(vec![
            Station::new("apple", pose, 20),
            Station::new("apple", pose, 99),
        ]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.price_of("apple"), Some(20));
    }
}
