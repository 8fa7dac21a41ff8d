pub mod alarm;
pub mod attribute;
pub mod timeseries;

pub use alarm::read_alarms;
pub use attribute::read_attributes;
pub use timeseries::read_by_entity;
