use serde::ser::Error as _;
use serde_json::value::RawValue;

/// Format a number with a fixed count of decimal places as a raw JSON value
///
/// `serde_json` writes the shortest representation of a float, the hub side
/// expects e.g. `21.50`.
pub(crate) fn fixed(value: f64, decimals: usize) -> Result<Box<RawValue>, serde_json::Error> {
    if !value.is_finite() {
        return Err(serde_json::Error::custom(format!(
            "cannot encode non-finite number {value}"
        )));
    }
    RawValue::from_string(format!("{value:.decimals$}"))
}
