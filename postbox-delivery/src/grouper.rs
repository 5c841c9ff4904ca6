//! Partitioning of a batch by the relay each record is sent through.

use ahash::AHashMap;
use postbox_common::{EffectiveSettings, SmtpSettings};
use postbox_queue::MessageRecord;

/// Records that share one relay session.
#[derive(Debug, Clone)]
pub struct Group {
    pub settings: EffectiveSettings,
    pub records: Vec<MessageRecord>,
}

impl Group {
    #[must_use]
    pub const fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Settings a record is sent with: its override, else the default.
#[must_use]
pub fn effective_settings(record: &MessageRecord, default: &SmtpSettings) -> EffectiveSettings {
    record.smtp_override.clone().map_or_else(
        || EffectiveSettings::from_default(default.clone()),
        EffectiveSettings::from_override,
    )
}

/// Groups records by structural equality of their effective settings.
///
/// Groups come out in order of first appearance and keep the batch order
/// inside each group.
#[must_use]
pub fn group_by_settings(records: Vec<MessageRecord>, default: &SmtpSettings) -> Vec<Group> {
    let mut index: AHashMap<EffectiveSettings, usize> = AHashMap::new();
    let mut groups: Vec<Group> = Vec::new();

    for record in records {
        let settings = effective_settings(&record, default);

        if let Some(&position) = index.get(&settings) {
            groups[position].records.push(record);
        } else {
            index.insert(settings.clone(), groups.len());
            groups.push(Group {
                settings,
                records: vec![record],
            });
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;

    fn record(recipient: &str, smtp_override: Option<SmtpSettings>) -> MessageRecord {
        let mut record = MessageRecord::new("app@example.com", recipient, "body", Utc::now());
        record.smtp_override = smtp_override;
        record
    }

    fn recipients(group: &Group) -> Vec<&str> {
        group.records.iter().map(|r| r.recipient.as_str()).collect()
    }

    #[test]
    fn test_groups_in_first_appearance_order() {
        let default = SmtpSettings::new("relay.example.com", 25);
        let other = SmtpSettings::new("other.example.com", 587);

        let groups = group_by_settings(
            vec![
                record("a@x", Some(other.clone())),
                record("b@x", None),
                record("c@x", Some(other.clone())),
                record("d@x", None),
            ],
            &default,
        );

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].settings, EffectiveSettings::from_override(other));
        assert_eq!(recipients(&groups[0]), vec!["a@x", "c@x"]);
        assert_eq!(groups[1].settings, EffectiveSettings::from_default(default));
        assert_eq!(recipients(&groups[1]), vec!["b@x", "d@x"]);
    }

    #[test]
    fn test_override_equal_to_default_is_separate() {
        let default = SmtpSettings::new("relay.example.com", 25);

        let groups = group_by_settings(
            vec![record("a@x", None), record("b@x", Some(default.clone()))],
            &default,
        );

        assert_eq!(groups.len(), 2);
        assert!(!groups[0].settings.is_override());
        assert!(groups[1].settings.is_override());
    }

    #[test]
    fn test_every_field_takes_part() {
        let default = SmtpSettings::default();
        let plain = SmtpSettings::new("relay.example.com", 587);
        let mut authenticated = plain.clone();
        authenticated.user_name = Some("app".to_string());

        let groups = group_by_settings(
            vec![record("a@x", Some(plain)), record("b@x", Some(authenticated))],
            &default,
        );

        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_empty_batch() {
        assert!(group_by_settings(Vec::new(), &SmtpSettings::default()).is_empty());
    }
}
