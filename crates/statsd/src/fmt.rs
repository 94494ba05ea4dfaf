/// Significant digits carried by a re-serialized counter value.
const COUNTER_DIGITS: usize = 15;

/// Formats an aggregated counter value with fifteen significant digits,
/// trailing zeros trimmed. Values whose decimal exponent falls outside
/// `[-4, 15)` are rendered in exponential notation, the classification C's
/// `%g` conversion uses.
pub fn format_counter(value: f64) -> String {
    format_significant(value, COUNTER_DIGITS)
}

fn format_significant(value: f64, digits: usize) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    // The correctly rounded scientific form decides between notations; a
    // floating-point log10 is off by one at values like 10^15 - 1.
    let scientific = format!("{:.*e}", digits - 1, value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if exponent < -4 || exponent >= digits as i32 {
        format!("{}e{}", trim_zeros(mantissa), exponent)
    } else {
        let precision = (digits as i32 - 1 - exponent).max(0) as usize;
        trim_zeros(&format!("{:.*}", precision, value)).to_string()
    }
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_numbers_print_without_fraction() {
        assert_eq!(format_counter(3.0), "3");
        assert_eq!(format_counter(10.0), "10");
        assert_eq!(format_counter(-42.0), "-42");
        assert_eq!(format_counter(0.0), "0");
    }

    #[test]
    fn fractions_keep_only_significant_digits() {
        assert_eq!(format_counter(0.5), "0.5");
        assert_eq!(format_counter(2.25), "2.25");
        assert_eq!(format_counter(0.0001), "0.0001");
    }

    #[test]
    fn fifteen_digits_round_the_sixteenth() {
        assert_eq!(format_counter(1.234567890123456), "1.23456789012346");
    }

    #[test]
    fn extreme_exponents_use_exponential_notation() {
        assert_eq!(format_counter(1e15), "1e15");
        assert_eq!(format_counter(2.5e20), "2.5e20");
        assert_eq!(format_counter(0.00001), "1e-5");
    }

    #[test]
    fn boundary_exponent_stays_fixed_point() {
        assert_eq!(format_counter(999999999999999.0), "999999999999999");
        assert_eq!(format_counter(0.001), "0.001");
    }

    #[test]
    fn rounding_across_the_boundary_switches_notation() {
        // Rounds up to 10^15, so the exponential branch must see it.
        assert_eq!(format_counter(999999999999999.9), "1e15");
    }
}
