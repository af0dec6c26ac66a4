//! Real Las Vegas / Henderson delivery points.
//!
//! Coordinates sourced from OpenStreetMap. Good enough for zone and
//! distance behaviour; nothing here needs a live routing server.

use saferoute_planner::geo::Coordinate;

/// A named location.
#[derive(Debug, Clone, Copy)]
pub struct Location {
    pub name: &'static str,
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub const fn new(name: &'static str, lat: f64, lon: f64) -> Self {
        Self { name, lat, lon }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate { lat: self.lat, lon: self.lon }
    }
}

// ============================================================================
// Depots
// ============================================================================

pub const DEPOTS: &[Location] = &[
    Location::new("Wynn Las Vegas", 36.1263781, -115.1658180),
    Location::new("MGM Grand", 36.1023654, -115.1688720),
    Location::new("Longhorn Casino", 36.1070664, -115.0591256),
];

// ============================================================================
// Strip drop-offs
// ============================================================================

pub const STRIP_DROPOFFS: &[Location] = &[
    Location::new("Hard Rock Cafe", 36.1041592, -115.1722166),
    Location::new("Public House", 36.1219193, -115.1689317),
    Location::new("Brooklyn Bowl", 36.1175388, -115.1695094),
    Location::new("Gordon Ramsay BurGR", 36.1107195, -115.1720818),
    Location::new("Spago", 36.1139368, -115.1741462),
    Location::new("Hash House A Go Go", 36.1181377, -115.1710989),
    Location::new("Otto Pizzeria", 36.1231219, -115.1684514),
    Location::new("Grand Lux Cafe", 36.1216416, -115.1685024),
    Location::new("Bacchanal Buffet", 36.1159581, -115.1762929),
    Location::new("Il Fornaio", 36.1024474, -115.1740110),
    Location::new("Charlie Palmer Steak", 36.0910624, -115.1743364),
    Location::new("Pyramid Cafe", 36.0956586, -115.1761902),
];

// ============================================================================
// Outlying drop-offs
// ============================================================================

pub const OUTLYING_DROPOFFS: &[Location] = &[
    Location::new("I Love Sushi Henderson", 35.9916660, -115.1028343),
    Location::new("Islander's Grill", 36.0335058, -114.9856162),
    Location::new("Green Valley Ranch Area", 36.0308, -115.0825),
    Location::new("Sunset Station Area", 36.0614, -115.0631),
    Location::new("Rivas Mexican Grill North", 36.1450055, -115.0482587),
    Location::new("Beers and Bets", 36.1428945, -115.1573836),
    Location::new("Bootlegger Bistro", 36.0492047, -115.1715744),
    Location::new("Pei Wei Town Square", 36.0810469, -115.1472694),
    Location::new("Hello Tokyo", 36.1161627, -115.0902096),
    Location::new("Tomo Sushi", 36.0992464, -115.1142123),
];

/// Strip drop-offs followed by outlying ones.
pub fn dropoffs(count: usize) -> Vec<Location> {
    STRIP_DROPOFFS
        .iter()
        .chain(OUTLYING_DROPOFFS)
        .copied()
        .take(count)
        .collect()
}
