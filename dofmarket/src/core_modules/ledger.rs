// THEORY:
// The ledger is the running bill of the current customer. It is deliberately tiny:
// one integer, two mutations. It reads prices from the shared station table and
// refuses names the table does not know, so an unrecognised pick can never be charged
// at some silent default price.

use std::sync::Arc;

use crate::core_modules::station::StationTable;
use crate::error::PickError;

/// Running total of the current session, in whole currency units.
#[derive(Debug, Clone)]
pub struct SessionLedger {
    stations: Arc<StationTable>,
    total: u32,
}

impl SessionLedger {
    pub fn new(stations: Arc<StationTable>) -> Self {
        Self { stations, total: 0 }
    }

    /// Charges the price of `name` and returns the new total.
    /// Unknown names leave the total untouched.
    pub fn add_fruit(&mut self, name: &str) -> Result<u32, PickError> {
        let price = self
            .stations
            .price_of(name)
            .ok_or_else(|| PickError::UnknownStation(name.to_string()))?;
        self.total = self.total.saturating_add(price);
        Ok(self.total)
    }

    pub fn reset(&mut self) {
        self.total = 0;
    }

    pub fn total(&self) -> u32 {
        self.total
    }
}
