//! Unit conversion between native adapter units and declared units
//!
//! Conversions are pure `(value + offset) * factor` transforms keyed by
//! `(native units, target units)` pairs. Compound units (`GRAM/INCH`)
//! compose from their parts; `CUBIC_` prefixes cube the linear factor.

use tracing::warn;

/// A linear unit conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConversion {
    factor: f64,
    offset: f64,
}

impl UnitConversion {
    pub fn new(factor: f64, offset: f64) -> Self {
        Self { factor, offset }
    }

    /// Identity conversion, useful as a composition seed.
    pub const IDENTITY: UnitConversion = UnitConversion {
        factor: 1.0,
        offset: 0.0,
    };

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn convert(&self, value: f64) -> f64 {
        (value + self.offset) * self.factor
    }

    pub fn convert_vector(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|v| self.convert(*v)).collect()
    }

    /// Fold a native scale divisor into the conversion.
    pub fn scaled(mut self, scale: f64) -> Self {
        if scale != 0.0 {
            self.factor /= scale;
            self.offset /= scale;
        }
        self
    }

    /// Build the conversion from `native` to `target` units, or `None`
    /// when the units already agree or no conversion is known.
    pub fn create(native: &str, target: &str) -> Option<UnitConversion> {
        if native.is_empty() || target.is_empty() || native == target {
            return None;
        }

        // Compound units convert part-wise; offsets only make sense for
        // simple units.
        if let (Some((nn, nd)), Some((tn, td))) = (native.split_once('/'), target.split_once('/'))
        {
            let numerator = factor_to(nn, tn)?;
            let denominator = factor_to(nd, td)?;
            return Some(UnitConversion::new(numerator / denominator, 0.0));
        }

        if let (Some(n), Some(t)) = (
            native.strip_prefix("CUBIC_"),
            target.strip_prefix("CUBIC_"),
        ) {
            let linear = factor_to(n, t)?;
            return Some(UnitConversion::new(linear.powi(3), 0.0));
        }

        match lookup(native) {
            Some((canonical, factor, offset)) if canonical == target => {
                Some(UnitConversion::new(factor, offset))
            }
            _ => {
                warn!("No conversion from {} to {}", native, target);
                None
            }
        }
    }
}

/// Factor-only conversion between two simple units, requiring zero offset.
fn factor_to(native: &str, target: &str) -> Option<f64> {
    if native == target {
        return Some(1.0);
    }
    match lookup(native) {
        Some((canonical, factor, offset)) if canonical == target && offset == 0.0 => Some(factor),
        _ => None,
    }
}

/// `native unit → (canonical unit, factor, offset)`.
fn lookup(unit: &str) -> Option<(&'static str, f64, f64)> {
    let entry = match unit {
        // Length
        "INCH" => ("MILLIMETER", 25.4, 0.0),
        "FOOT" => ("MILLIMETER", 304.8, 0.0),
        "CENTIMETER" => ("MILLIMETER", 10.0, 0.0),
        "DECIMETER" => ("MILLIMETER", 100.0, 0.0),
        "METER" => ("MILLIMETER", 1000.0, 0.0),
        "FATHOM" => ("MILLIMETER", 1828.8, 0.0),
        "MILE" => ("MILLIMETER", 1_609_344.0, 0.0),

        // Mass
        "POUND" => ("KILOGRAM", 0.453_592_37, 0.0),
        "GRAM" => ("KILOGRAM", 0.001, 0.0),
        "OUNCE" => ("KILOGRAM", 0.028_349_523_125, 0.0),

        // Angle
        "RADIAN" => ("DEGREE", 57.295_779_513_082_32, 0.0),

        // Time
        "MINUTE" => ("SECOND", 60.0, 0.0),
        "HOUR" => ("SECOND", 3600.0, 0.0),
        "MILLISECOND" => ("SECOND", 0.001, 0.0),

        // Temperature
        "FAHRENHEIT" => ("CELSIUS", 5.0 / 9.0, -32.0),
        "KELVIN" => ("CELSIUS", 1.0, -273.15),

        // Electrical / power
        "KILOWATT" => ("WATT", 1000.0, 0.0),
        "KILOAMPERE" => ("AMPERE", 1000.0, 0.0),
        "KILOVOLT" => ("VOLT", 1000.0, 0.0),

        // Volume
        "GALLON" => ("LITER", 3.785_411_784, 0.0),

        // Pressure
        "BAR" => ("PASCAL", 100_000.0, 0.0),
        "TORR" => ("PASCAL", 133.322, 0.0),
        "MILLIMETER_MERCURY" => ("PASCAL", 133.322, 0.0),

        _ => return None,
    };
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foot_to_millimeter() {
        let conv = UnitConversion::create("FOOT", "MILLIMETER").unwrap();
        assert_eq!(conv.convert(1.0), 304.8);
    }

    #[test]
    fn fahrenheit_to_celsius_has_offset() {
        let conv = UnitConversion::create("FAHRENHEIT", "CELSIUS").unwrap();
        assert!((conv.convert(32.0)).abs() < 1e-9);
        assert!((conv.convert(212.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn compound_units_compose() {
        let conv = UnitConversion::create("GRAM/INCH", "KILOGRAM/MILLIMETER").unwrap();
        assert!((conv.convert(25.4) - 0.001).abs() < 1e-12);
    }

    #[test]
    fn cubic_units_cube_the_factor() {
        let conv = UnitConversion::create("CUBIC_INCH", "CUBIC_MILLIMETER").unwrap();
        assert!((conv.convert(1.0) - 25.4_f64.powi(3)).abs() < 1e-9);
    }

    #[test]
    fn identical_units_need_no_conversion() {
        assert_eq!(UnitConversion::create("MILLIMETER", "MILLIMETER"), None);
    }

    #[test]
    fn native_scale_divides() {
        let conv = UnitConversion::new(1.0, 0.0).scaled(10.0);
        assert_eq!(conv.convert(25.0), 2.5);
    }
}
