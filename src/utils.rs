//! Utility functions for the ble-peripheral-manager crate.

/// Weakest signal strength on the progress scale, in dBm.
pub const RSSI_FLOOR: i16 = -100;

/// Strongest signal strength on the progress scale, in dBm.
pub const RSSI_CEILING: i16 = 0;

/// Map a signal-strength reading onto a `0.0..=1.0` progress value.
///
/// The reading is rescaled linearly from `-100..=0` dBm and rounded to one
/// decimal place, with halves rounded up. Readings outside that range
/// extrapolate linearly and are not clamped.
///
/// # Arguments
///
/// * `rssi` - Signal strength in dBm
///
/// # Example
///
/// ```
/// use ble_peripheral_manager::map_rssi_to_progress;
///
/// assert_eq!(map_rssi_to_progress(-100), 0.0);
/// assert_eq!(map_rssi_to_progress(-55), 0.5);
/// assert_eq!(map_rssi_to_progress(0), 1.0);
/// ```
#[inline]
pub fn map_rssi_to_progress(rssi: i16) -> f64 {
    let floor = f64::from(RSSI_FLOOR);
    let span = f64::from(RSSI_CEILING) - floor;
    let mapped = (f64::from(rssi) - floor) / span;
    (mapped * 10.0 + 0.5).floor() / 10.0
}
