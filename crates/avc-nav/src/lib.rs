pub mod doctor;
pub mod geo;
pub mod gnss;
pub mod navigator;
pub mod waypoints;

pub use geo::{distance_m, normalize_deg, relative_bearing_deg, GeoPoint, LocalFrame};
pub use navigator::{advance, NavOutput, NavigatorConfig, Waypoint};
pub use waypoints::{load_route, parse_route, Route, RouteFormat};
