use crate::{
    classifier::Format, error::ConversionError, input::RawInput, record::Candidate,
};

pub mod generated;
pub mod nmea;
pub mod rinex;

pub use generated::{GeneratedLogic, GeneratedStrategy, SandboxLimits};
pub use nmea::NmeaConverter;
pub use rinex::RinexConverter;

/// A [ConversionStrategy] turns one [RawInput] into candidate records.
/// Failures are reported as [ConversionError], never as panics.
pub trait ConversionStrategy {
    /// Short name, for logging purposes
    fn name(&self) -> &'static str;

    fn convert(&self, raw: &RawInput) -> Result<Vec<Candidate>, ConversionError>;
}

/// Built-in (deterministic) strategy for this [Format]
pub fn standard_strategy(format: Format) -> Option<Box<dyn ConversionStrategy + Send + Sync>> {
    match format {
        Format::Rinex => Some(Box::new(RinexConverter)),
        Format::Nmea => Some(Box::new(NmeaConverter)),
        Format::Unknown => None,
    }
}
