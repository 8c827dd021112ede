//! Plate-attached sensors

mod events;
mod ultrasonic;

pub use events::{EventHub, SensorEvent, SubscriptionId};
pub use ultrasonic::UltrasonicSensor;
