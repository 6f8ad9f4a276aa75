//! Routing of change events by originating source

use crate::config::SyncConfig;

/// How records from a source are corrected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Revisions carry a running total; convert to increments
    CumulativeCounter,
    /// Records are re-emitted with the configured device identity
    Retag,
    /// Not ours to correct
    Unrecognized,
}

/// Maps source ids onto the correction strategy that applies to them
#[derive(Debug, Clone)]
pub struct SourceRouter {
    cumulative_source: String,
    retag_source: String,
}

impl SourceRouter {
    pub fn new(cumulative_source: impl Into<String>, retag_source: impl Into<String>) -> Self {
        Self {
            cumulative_source: cumulative_source.into(),
            retag_source: retag_source.into(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(&config.cumulative_source, &config.retag_source)
    }

    /// Pick the correction for `source_id`
    ///
    /// With the cumulative correction disabled, its source is treated like
    /// any other, so it is still re-tagged when it is also the re-tag source.
    pub fn classify(&self, source_id: &str, quirk_fix_enabled: bool) -> SourceKind {
        if quirk_fix_enabled && source_id == self.cumulative_source {
            SourceKind::CumulativeCounter
        } else if source_id == self.retag_source {
            SourceKind::Retag
        } else {
            SourceKind::Unrecognized
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_classify_default_sources() {
        let router = SourceRouter::from_config(&Config::default().sync);

        assert_eq!(
            router.classify("fi.polar.polarflow", true),
            SourceKind::CumulativeCounter
        );
        assert_eq!(
            router.classify("fi.polar.polarflow", false),
            SourceKind::Unrecognized
        );
        assert_eq!(
            router.classify("com.heytap.health.international", true),
            SourceKind::Retag
        );
        assert_eq!(
            router.classify("com.google.android.apps.fitness", true),
            SourceKind::Unrecognized
        );
        assert_eq!(router.classify("", true), SourceKind::Unrecognized);
    }

    #[test]
    fn test_shared_source_falls_back_to_retag() {
        let router = SourceRouter::new("com.example.steps", "com.example.steps");

        assert_eq!(
            router.classify("com.example.steps", true),
            SourceKind::CumulativeCounter
        );
        assert_eq!(router.classify("com.example.steps", false), SourceKind::Retag);
    }
}
