use std::time::Duration;

pub(crate) fn format_duration(d: Duration) -> String {
    // One rounded component in us, ms or s keeps table columns short.
    let total_ns = d.as_nanos();

    const NS_PER_US: u128 = 1_000;
    const NS_PER_MS: u128 = 1_000_000;
    const NS_PER_S: u128 = 1_000_000_000;

    fn round_div(value: u128, unit: u128) -> u128 {
        (value + (unit / 2)) / unit
    }

    if total_ns >= 10 * NS_PER_S {
        return format!("{}s", round_div(total_ns, NS_PER_S));
    }
    if total_ns >= NS_PER_S {
        return format!("{:.2}s", d.as_secs_f64());
    }
    if total_ns >= NS_PER_MS {
        return format!("{}ms", round_div(total_ns, NS_PER_MS));
    }
    format!("{}us", round_div(total_ns, NS_PER_US))
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.0}")
    } else {
        "0".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_render_with_one_unit() {
        assert_eq!(format_duration(Duration::from_nanos(1_400)), "1us");
        assert_eq!(format_duration(Duration::from_micros(2_500)), "3ms");
        assert_eq!(format_duration(Duration::from_millis(1_234)), "1.23s");
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
    }

    #[test]
    fn rates_are_whole_numbers() {
        assert_eq!(format_rate(1234.56), "1235");
        assert_eq!(format_rate(f64::NAN), "0");
    }
}
