//! Where the sun is: solar event times and the machine's approximate location.
//!
//! - [`solar`]: sunrise/sunset for a latitude, longitude and date
//! - [`location`]: IP geolocation with a cache shared by the scheduler

pub mod location;
pub mod solar;

pub use location::{Coordinates, IpApiLocator, LocationCache, LocationProvider};
pub use solar::{SunTimes, calculate_sun_times};
