use gnss::prelude::Constellation;
use hifitime::prelude::{Epoch, TimeScale};

/// One day in milliseconds
pub const DAY_MS: i64 = 86_400_000;

/// Knots to m/s
pub const KNOTS_TO_MPS: f64 = 0.514_444;

/// Name of a [Constellation], as written in `satellite_system`
pub fn constellation_name(constellation: Constellation) -> &'static str {
    match constellation {
        Constellation::GPS => "GPS",
        Constellation::Glonass => "GLONASS",
        Constellation::Galileo => "Galileo",
        Constellation::BeiDou => "BeiDou",
        Constellation::QZSS => "QZSS",
        Constellation::IRNSS => "IRNSS",
        c if c.is_sbas() => "SBAS",
        _ => "Mixed",
    }
}

/// NMEA talker identifier to [Constellation].
/// "GN" (multi-constellation) has no single answer.
pub fn talker_to_constellation(talker: &str) -> Option<Constellation> {
    match talker {
        "GP" => Some(Constellation::GPS),
        "GL" => Some(Constellation::Glonass),
        "GA" => Some(Constellation::Galileo),
        "GB" | "BD" => Some(Constellation::BeiDou),
        "GQ" | "QZ" => Some(Constellation::QZSS),
        "GI" => Some(Constellation::IRNSS),
        _ => None,
    }
}

/// RINEX time system identifier to [TimeScale].
/// GLONASS time is UTC based; QZSS and IRNSS are aligned to GPST.
pub fn time_system_to_timescale(system: &str) -> TimeScale {
    match system.trim() {
        "GLO" | "UTC" => TimeScale::UTC,
        "GAL" => TimeScale::GST,
        "BDT" => TimeScale::BDT,
        _ => TimeScale::GPST,
    }
}

/// Calendar date and time (expressed in given [TimeScale])
/// to milliseconds since UNIX epoch.
pub fn unix_ms(
    year: i32,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    seconds: f64,
    timescale: TimeScale,
) -> Result<i64, String> {
    if !(0.0..61.0).contains(&seconds) {
        return Err(format!("invalid seconds {}", seconds));
    }

    let whole = seconds.trunc();
    let nanos = (((seconds - whole) * 1.0E9).round() as u32).min(999_999_999);

    let epoch = Epoch::maybe_from_gregorian(
        year,
        month,
        day,
        hour,
        minute,
        whole as u8,
        nanos,
        timescale,
    )
    .map_err(|e| e.to_string())?;

    Ok(epoch.to_unix_milliseconds().round() as i64)
}

/// NMEA `(d)ddmm.mmmm` coordinate and hemisphere to decimal degrees
pub fn nmea_to_decimal(value: &str, hemisphere: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let raw = value.parse::<f64>().ok()?;
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }

    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    if minutes >= 60.0 {
        return None;
    }

    let decimal = degrees + minutes / 60.0;

    match hemisphere.trim() {
        "S" | "W" => Some(-decimal),
        _ => Some(decimal),
    }
}

/// NMEA checksum: XOR of all payload bytes (between `$` and `*`)
pub fn nmea_checksum(payload: &str) -> u8 {
    payload.bytes().fold(0, |acc, b| acc ^ b)
}

/// Two digit year as found in RINEX V2 and NMEA RMC
pub fn full_year(yy: i32) -> i32 {
    if yy >= 100 {
        yy
    } else if yy < 80 {
        2000 + yy
    } else {
        1900 + yy
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nmea_coordinates() {
        let lat = nmea_to_decimal("4807.038", "N").unwrap();
        assert!((lat - 48.1173).abs() < 1.0E-4);

        let lon = nmea_to_decimal("01131.000", "W").unwrap();
        assert!((lon + 11.516_666).abs() < 1.0E-5);

        assert!(nmea_to_decimal("", "N").is_none());
        assert!(nmea_to_decimal("4875.000", "N").is_none());
        assert!(nmea_to_decimal("abc", "N").is_none());
    }

    #[test]
    fn checksum() {
        assert_eq!(
            nmea_checksum("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"),
            0x47
        );
    }

    #[test]
    fn utc_unix_ms() {
        assert_eq!(
            unix_ms(2020, 1, 1, 0, 0, 0.0, TimeScale::UTC),
            Ok(1_577_836_800_000)
        );
        assert_eq!(
            unix_ms(2020, 1, 1, 12, 35, 19.5, TimeScale::UTC),
            Ok(1_577_836_800_000 + 45_319_500)
        );
        assert!(unix_ms(2020, 13, 1, 0, 0, 0.0, TimeScale::UTC).is_err());
        assert!(unix_ms(2020, 1, 1, 0, 0, 75.0, TimeScale::UTC).is_err());
    }

    #[test]
    fn years() {
        assert_eq!(full_year(5), 2005);
        assert_eq!(full_year(94), 1994);
        assert_eq!(full_year(2021), 2021);
    }
}
