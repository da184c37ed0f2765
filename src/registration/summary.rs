//! Case summary generation
//!
//! Builds the human-readable description that replaces the registration
//! placeholder. Runs on the outbox with the summary retry schedule; if
//! every attempt fails the placeholder stays.

use chrono::{TimeZone, Utc};

use crate::db::schemas::{CaseDoc, CaseStatus};

/// Compose a reader-facing summary from the registered fields
pub fn compose_summary(case: &CaseDoc) -> String {
    let date = Utc
        .timestamp_millis_opt(case.date_missing_found.timestamp_millis())
        .single()
        .map(|d| d.format("%-d %B %Y").to_string())
        .unwrap_or_else(|| "an unknown date".to_string());

    let age = match case.age {
        Some(age) => format!("{} years old, ", age),
        None => String::new(),
    };

    match case.status {
        CaseStatus::Missing => format!(
            "{} ({}{}) was reported missing near {} on {}. \
             Case reference {}. If you have any information, please use the \
             contact details on this page.",
            case.full_name, age, case.gender, case.last_seen_location, date, case.case_ref_number
        ),
        CaseStatus::Found | CaseStatus::Closed => format!(
            "A person ({}{}) was found near {} on {} and is awaiting \
             identification. Case reference {}. If you recognize this person, \
             please use the contact details on this page.",
            age, case.gender, case.last_seen_location, date, case.case_ref_number
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::DateTime;

    fn case(status: CaseStatus) -> CaseDoc {
        CaseDoc {
            full_name: "Adaeze Obi".to_string(),
            age: Some(12),
            gender: "female".to_string(),
            case_ref_number: "NG-2026/0042".to_string(),
            last_seen_location: "Ikeja bus terminal".to_string(),
            date_missing_found: DateTime::from_millis(1_750_000_000_000),
            status,
            ..CaseDoc::default()
        }
    }

    #[test]
    fn test_missing_summary_names_the_person() {
        let text = compose_summary(&case(CaseStatus::Missing));
        assert!(text.contains("Adaeze Obi"));
        assert!(text.contains("missing"));
        assert!(text.contains("Ikeja bus terminal"));
        assert!(text.contains("NG-2026/0042"));
    }

    #[test]
    fn test_found_summary_omits_the_name() {
        let text = compose_summary(&case(CaseStatus::Found));
        assert!(!text.contains("Adaeze Obi"));
        assert!(text.contains("found"));
        assert!(text.contains("12 years old"));
    }

    #[test]
    fn test_summary_without_age() {
        let mut c = case(CaseStatus::Missing);
        c.age = None;
        let text = compose_summary(&c);
        assert!(!text.contains("years old"));
    }
}
