use core::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use crate::error::AllocationError;

/// A strictly positive number of hardware units.
///
/// Zero is rejected rather than treated as a no-op so caller bugs surface.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(NonZeroU32);

impl Quantity {
    pub fn new(units: u32) -> Result<Self, AllocationError> {
        NonZeroU32::new(units)
            .map(Self)
            .ok_or(AllocationError::InvalidQuantity(i64::from(units)))
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl TryFrom<u32> for Quantity {
    type Error = AllocationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Transport payloads carry signed integers; negatives and values past `u32`
/// are invalid quantities, not parse errors.
impl TryFrom<i64> for Quantity {
    type Error = AllocationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        let units = u32::try_from(value).map_err(|_| AllocationError::InvalidQuantity(value))?;
        Self::new(units)
    }
}

impl From<Quantity> for u32 {
    fn from(value: Quantity) -> Self {
        value.get()
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}
