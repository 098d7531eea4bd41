//! Size-adaptive wall-time rendering.

use std::time::Duration;

/// Formats a duration with at most three significant digits, picking the
/// largest unit (`ns`, `μs`, `ms`, `s`) that keeps the value above one.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    if nanos < 1_000_000 {
        return format!("{}μs", sig3(nanos as f64 / 1_000.0));
    }
    if nanos < 1_000_000_000 {
        return format!("{}ms", sig3(nanos as f64 / 1_000_000.0));
    }
    format!("{}s", sig3(d.as_secs_f64()))
}

/// Three-significant-digit rendering with `%.3g` semantics: plain decimal
/// while the value stays under three integer digits, scientific notation
/// (`1e+03`) once rounding pushes it past, trailing zeros trimmed.
fn sig3(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }

    let scale = 10f64.powi(2 - exponent_of(value));
    let rounded = (value * scale).round() / scale;

    // Rounding can carry into the next decade (999.5 -> 1000).
    let exp = exponent_of(rounded);
    if exp >= 3 {
        let mantissa = trim_zeros(format!("{:.2}", rounded / 10f64.powi(exp)));
        format!("{mantissa}e+{exp:02}")
    } else {
        let decimals = (2 - exp).max(0) as usize;
        trim_zeros(format!("{rounded:.decimals$}"))
    }
}

fn exponent_of(value: f64) -> i32 {
    let magnitude = value.abs();
    let mut exp = magnitude.log10().floor() as i32;
    // log10 of an exact power of ten can land a hair low.
    if 10f64.powi(exp + 1) <= magnitude {
        exp += 1;
    }
    exp
}

fn trim_zeros(rendered: String) -> String {
    if rendered.contains('.') {
        rendered
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(d: Duration, expected: &str) {
        assert_eq!(format_duration(d), expected, "for {d:?}");
    }

    #[test]
    fn nanosecond_range_prints_whole_nanoseconds() {
        check(Duration::from_nanos(500), "500ns");
        check(Duration::from_nanos(1), "1ns");
        check(Duration::from_nanos(999), "999ns");
        check(Duration::ZERO, "0ns");
    }

    #[test]
    fn microsecond_range_keeps_three_significant_digits() {
        check(Duration::from_nanos(1_500), "1.5μs");
        check(Duration::from_nanos(1_234), "1.23μs");
        check(Duration::from_micros(1), "1μs");
        check(Duration::from_nanos(100), "100ns");
        check(Duration::from_micros(100), "100μs");
    }

    #[test]
    fn millisecond_range_keeps_three_significant_digits() {
        check(Duration::from_micros(1_500), "1.5ms");
        check(Duration::from_nanos(1_814_595), "1.81ms");
        check(Duration::from_millis(1), "1ms");
        check(Duration::from_millis(100), "100ms");
    }

    #[test]
    fn second_range_keeps_three_significant_digits() {
        check(Duration::from_millis(1_500), "1.5s");
        check(Duration::from_millis(2_347), "2.35s");
        check(Duration::from_secs(1), "1s");
        check(Duration::from_secs(65), "65s");
        check(Duration::from_nanos(1_814_595_123), "1.81s");
    }

    #[test]
    fn rounding_past_three_digits_switches_to_scientific_notation() {
        check(Duration::from_nanos(999_500), "1e+03μs");
        check(Duration::from_micros(999_500), "1e+03ms");
        check(Duration::from_nanos(999_950), "1e+03μs");
    }

    #[test]
    fn formatting_is_idempotent_at_the_same_unit() {
        // Re-parsing the rendered value and formatting again must not drift.
        let rendered = format_duration(Duration::from_nanos(1_234));
        let value: f64 = rendered.trim_end_matches("μs").parse().unwrap();
        let again = format_duration(Duration::from_nanos((value * 1_000.0) as u64));
        assert_eq!(rendered, again);
    }
}
