//! Age policy for the retention sweep.

use chrono::{DateTime, Duration, Utc};
use testbay_common::{AgeBoundary, RetentionSettings};

use crate::domain::device::{ArtifactArea, ArtifactEntry, ArtifactLayout};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub boundary: AgeBoundary,
    pub layout: ArtifactLayout,
    pub dry_run: bool,
}

impl RetentionPolicy {
    #[must_use]
    pub fn from_settings(settings: &RetentionSettings) -> Self {
        Self {
            max_age: Duration::days(i64::from(settings.max_days)),
            boundary: settings.boundary,
            layout: ArtifactLayout {
                marker_file: settings.marker_file.clone(),
                crash_dir: settings.crash_dir.clone(),
            },
            dry_run: settings.dry_run,
        }
    }

    /// `Exclusive`: only entries strictly older than `max_age` expire.
    /// `Inclusive`: entries exactly `max_age` old expire too.
    #[must_use]
    pub fn is_expired(&self, modified: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(modified);
        match self.boundary {
            AgeBoundary::Exclusive => age > self.max_age,
            AgeBoundary::Inclusive => age >= self.max_age,
        }
    }

    /// Entries of `area` to delete.
    ///
    /// Staged builds are only eligible when they carry the sentinel marker;
    /// the crash-dump area lives inside framework-owned storage and is aged
    /// on its own timestamps.
    #[must_use]
    pub fn select_expired<'a>(
        &self,
        area: ArtifactArea,
        entries: &'a [ArtifactEntry],
        now: DateTime<Utc>,
    ) -> Vec<&'a ArtifactEntry> {
        entries
            .iter()
            .filter(|e| area == ArtifactArea::CrashDumps || e.has_marker)
            .filter(|e| self.is_expired(e.modified, now))
            .collect()
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_settings(&RetentionSettings::default())
    }
}
