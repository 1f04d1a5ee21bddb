//! Built-in sequences, one per contact source.

use chrono::Duration;
use drip_core::types::ContactSource;

use crate::types::{EmailSequence, SequenceEmail};

pub fn default_sequences() -> Vec<EmailSequence> {
    vec![lead_magnet(), waitlist(), corporate()]
}

fn lead_magnet() -> EmailSequence {
    let mut sequence = EmailSequence::new(
        "Lead Magnet Nurture",
        ContactSource::LeadMagnet,
        vec![
            SequenceEmail::new(
                0,
                Duration::zero(),
                "Here's your {{magnet}}",
                "<p>Hi {{first_name|there}},</p>\
                 <p>Thanks for downloading <strong>{{magnet}}</strong>. \
                 You can grab it any time here: <a href=\"{{download_url|#}}\">download</a>.</p>",
            ),
            SequenceEmail::new(
                1,
                Duration::days(2),
                "Getting the most out of {{magnet}}",
                "<p>Hi {{first_name|there}},</p>\
                 <p>A few ideas on putting {{magnet}} to work this week.</p>",
            ),
            SequenceEmail::new(
                2,
                Duration::days(3),
                "Want a hand with the next step?",
                "<p>Hi {{first_name|there}},</p>\
                 <p>If you'd like help applying what you read, just reply to this email.</p>",
            ),
        ],
    );
    sequence.description = "Follow-up for resource downloads".to_string();
    sequence
}

fn waitlist() -> EmailSequence {
    let mut sequence = EmailSequence::new(
        "Waitlist Welcome",
        ContactSource::Waitlist,
        vec![
            SequenceEmail::new(
                0,
                Duration::zero(),
                "You're on the {{product}} waitlist",
                "<p>Hi {{first_name|there}},</p>\
                 <p>You're in line for {{product}}. \
                 Share your referral code <code>{{referral_code|}}</code> to move up.</p>",
            ),
            SequenceEmail::new(
                1,
                Duration::days(7),
                "A look behind the scenes at {{product}}",
                "<p>Hi {{first_name|there}},</p>\
                 <p>Here's what we've been building since you joined.</p>",
            ),
        ],
    );
    sequence.description = "Keeps waitlist signups warm until launch".to_string();
    sequence
}

fn corporate() -> EmailSequence {
    let mut sequence = EmailSequence::new(
        "Corporate Inquiry Follow-up",
        ContactSource::Corporate,
        vec![
            SequenceEmail::new(
                0,
                Duration::zero(),
                "Thanks for reaching out, {{first_name|there}}",
                "<p>Hi {{first_name|there}},</p>\
                 <p>We received your inquiry for {{company}} and will be in touch within one business day.</p>",
            ),
            SequenceEmail::new(
                1,
                Duration::days(1),
                "How teams like {{company}} use us",
                "<p>Hi {{first_name|there}},</p>\
                 <p>A short case study from a team of a similar size.</p>",
            ),
            SequenceEmail::new(
                2,
                Duration::days(3),
                "Shall we set up a call?",
                "<p>Hi {{first_name|there}},</p>\
                 <p>Reply with a time that suits you and we'll send an invite.</p>",
            ),
        ],
    );
    sequence.description = "Sales follow-up for corporate inquiries".to_string();
    sequence
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_sequences_are_valid_and_cover_every_source() {
        let sequences = default_sequences();
        let sources: HashSet<ContactSource> = sequences.iter().map(|s| s.source).collect();
        assert_eq!(sources.len(), 3);
        for sequence in &sequences {
            assert!(sequence.validate().is_ok(), "{} is invalid", sequence.name);
            assert!(sequence.active);
            assert_eq!(sequence.steps[0].delay(), Some(Duration::zero()));
        }
    }
}
