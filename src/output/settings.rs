use crate::extractor::DedupPolicy;

/// Output file suffix
const SUFFIX: &str = ".location.jsonl";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Settings {
    /// GZIP compression
    pub gzip: bool,

    /// Custom output directory
    pub prefix: Option<String>,

    /// Duplicate collapse policy
    pub dedup: DedupPolicy,

    /// Keep records failing the plausibility bounds
    pub lenient: bool,
}

impl Settings {
    /// Output file path, for the input file of that stem
    pub fn filename(&self, stem: &str) -> String {
        let mut filepath = if let Some(prefix) = &self.prefix {
            format!("{}/", prefix.trim_end_matches('/'))
        } else {
            "".to_string()
        };

        filepath.push_str(stem);
        filepath.push_str(SUFFIX);

        if self.gzip {
            filepath.push_str(".gz");
        }

        filepath
    }
}
