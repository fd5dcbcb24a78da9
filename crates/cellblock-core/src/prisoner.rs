//! Prisoner state

use cellblock_api::{Location, PrisonerView};
use cellblock_store::PrisonerRecord;
use cellblock_util::{JailName, SubjectId};
use chrono::{DateTime, Local};
use std::time::Duration;
use tracing::warn;

use crate::{SentenceClock, MAX_SENTENCE};

/// Where a prisoner stood before they were jailed
#[derive(Debug, Clone, PartialEq)]
pub enum LastLocation {
    Known(Location),
    /// Jailed while offline and not seen since
    Unknown,
}

impl LastLocation {
    pub fn known(&self) -> Option<&Location> {
        match self {
            LastLocation::Known(location) => Some(location),
            LastLocation::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, LastLocation::Unknown)
    }
}

impl From<Option<Location>> for LastLocation {
    fn from(location: Option<Location>) -> Self {
        location.map_or(LastLocation::Unknown, LastLocation::Known)
    }
}

/// A jailed subject
#[derive(Debug, Clone, PartialEq)]
pub struct Prisoner {
    pub id: SubjectId,
    pub display_name: Option<String>,
    pub jail: JailName,
    pub jailed_by: Option<String>,
    pub reason: Option<String>,
    pub sentence: SentenceClock,
    /// Length at jailing time, for reporting
    pub total_sentence: Duration,
    pub last_location: LastLocation,
    /// Groups captured at jailing time and restored at release
    pub primary_group: Option<String>,
    pub parent_groups: Vec<String>,
    /// Sentence served, waiting for the subject to come back online
    pub released: bool,
    pub(crate) generation: u64,
}

impl Prisoner {
    /// Jailing generation; group lookups for older generations are discarded
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn time_left(&self, now: DateTime<Local>) -> Duration {
        if self.released {
            Duration::ZERO
        } else {
            self.sentence.time_left(now)
        }
    }

    /// Name to use in messages and command placeholders
    pub fn label(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    pub fn to_record(&self, now: DateTime<Local>) -> PrisonerRecord {
        // Rounded up so a prisoner with time left never reads back as released
        let seconds_left = self.time_left(now).as_secs_f64().ceil() as u64;

        PrisonerRecord {
            uuid: self.id,
            name: self.display_name.clone(),
            jail: self.jail.clone(),
            jailed_by: self.jailed_by.clone(),
            seconds_left,
            total_sentence_time: self.total_sentence.as_secs(),
            reason: self.reason.clone(),
            last_location: self.last_location.known().cloned(),
            group: self.primary_group.clone(),
            extra_groups: self.parent_groups.clone(),
        }
    }

    /// Rebuild from storage; `running` selects the deadline representation
    pub fn from_record(
        record: PrisonerRecord,
        running: bool,
        generation: u64,
        now: DateTime<Local>,
    ) -> Self {
        let mut left = Duration::from_secs(record.seconds_left);
        if left > MAX_SENTENCE {
            warn!(subject = %record.uuid, seconds_left = record.seconds_left, "Stored sentence too long; capping");
            left = MAX_SENTENCE;
        }

        Self {
            id: record.uuid,
            display_name: record.name,
            jail: record.jail,
            jailed_by: record.jailed_by,
            reason: record.reason,
            sentence: SentenceClock::start(left, running, now),
            total_sentence: Duration::from_secs(record.total_sentence_time).min(MAX_SENTENCE),
            last_location: record.last_location.into(),
            primary_group: record.group,
            parent_groups: record.extra_groups,
            released: record.seconds_left == 0,
            generation,
        }
    }

    pub fn view(&self, now: DateTime<Local>) -> PrisonerView {
        PrisonerView {
            subject: self.id,
            name: self.display_name.clone(),
            jail: self.jail.clone(),
            jailed_by: self.jailed_by.clone(),
            reason: self.reason.clone(),
            clock: self.sentence.kind(),
            time_left: self.time_left(now),
            deadline: match self.sentence {
                SentenceClock::Deadline(deadline) if !self.released => Some(deadline),
                _ => None,
            },
            total_sentence: self.total_sentence,
            last_location: self.last_location.known().cloned(),
            primary_group: self.primary_group.clone(),
            parent_groups: self.parent_groups.clone(),
            released: self.released,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prisoner(now: DateTime<Local>) -> Prisoner {
        Prisoner {
            id: SubjectId::new(),
            display_name: Some("Steve".into()),
            jail: JailName::new("max"),
            jailed_by: Some("Alex".into()),
            reason: Some("griefing".into()),
            sentence: SentenceClock::start(Duration::from_secs(120), true, now),
            total_sentence: Duration::from_secs(120),
            last_location: LastLocation::Known(Location::new("world", 1.0, 2.0, 3.0)),
            primary_group: Some("default".into()),
            parent_groups: vec!["default".into()],
            released: false,
            generation: 1,
        }
    }

    #[test]
    fn test_record_round_trip() {
        let now = cellblock_util::now();
        let original = prisoner(now);

        let record = original.to_record(now);
        assert_eq!(record.seconds_left, 120);

        let restored = Prisoner::from_record(record, true, 1, now);
        assert_eq!(restored, original);
    }

    #[test]
    fn test_oversized_stored_sentence_is_capped() {
        let now = cellblock_util::now();
        let mut record = prisoner(now).to_record(now);
        record.seconds_left = u64::MAX;
        record.total_sentence_time = u64::MAX;

        let restored = Prisoner::from_record(record, true, 1, now);
        assert_eq!(restored.time_left(now), MAX_SENTENCE);
        assert_eq!(restored.total_sentence, MAX_SENTENCE);
        assert!(!restored.released);
    }

    #[test]
    fn test_partial_second_not_released() {
        let now = cellblock_util::now();
        let p = prisoner(now);
        let almost = now + chrono::Duration::milliseconds(119_500);

        let record = p.to_record(almost);
        assert_eq!(record.seconds_left, 1);
        assert!(!Prisoner::from_record(record, false, 2, almost).released);
    }

    #[test]
    fn test_released_reads_back_released() {
        let now = cellblock_util::now();
        let mut p = prisoner(now);
        p.released = true;

        let restored = Prisoner::from_record(p.to_record(now), false, 2, now);
        assert!(restored.released);
        assert_eq!(restored.time_left(now), Duration::ZERO);
    }

    #[test]
    fn test_unknown_location_round_trip() {
        let now = cellblock_util::now();
        let mut p = prisoner(now);
        p.last_location = LastLocation::Unknown;

        let record = p.to_record(now);
        assert_eq!(record.last_location, None);
        assert!(Prisoner::from_record(record, false, 1, now).last_location.is_unknown());
    }

    #[test]
    fn test_view_hides_deadline_when_frozen() {
        let now = cellblock_util::now();
        let mut p = prisoner(now);
        assert!(p.view(now).deadline.is_some());

        p.sentence = p.sentence.to_remaining(now);
        let view = p.view(now);
        assert!(view.deadline.is_none());
        assert_eq!(view.time_left, Duration::from_secs(120));
        assert_eq!(view.reason.as_deref(), Some("griefing"));
    }
}
