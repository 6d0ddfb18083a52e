//! Completion-time estimation for cells.
//!
//! Estimates are in minutes, rounded to one decimal place. Reading time is
//! one minute per hundred words (question text plus, for closed formats,
//! the response categories). Answer time depends on the engagement type:
//!
//! | Format | Survey | Interview | Conversation (per group of `n`) |
//! |--------|--------|-----------|---------------------------------|
//! | open   | 3      | 3         | 0.5 + 1.0 × n                   |
//! | other  | 0.5    | 1         | 0.5 + 0.5 × n                   |
//!
//! Text blocks only carry reading time.

use crate::models::{CellDetails, CellType, EngagementType, ResponseFormat};

/// Group size assumed for conversation guides.
pub const DEFAULT_GROUP_SIZE: u32 = 6;

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Estimate minutes for a cell using [`DEFAULT_GROUP_SIZE`].
pub fn estimate_time(details: &CellDetails, engagement: EngagementType) -> f64 {
    estimate_time_for_group(details, engagement, DEFAULT_GROUP_SIZE)
}

/// Estimate minutes for a cell answered by a group of `group_size` people.
pub fn estimate_time_for_group(
    details: &CellDetails,
    engagement: EngagementType,
    group_size: u32,
) -> f64 {
    let people = f64::from(group_size);
    let minutes = match details.cell_type {
        CellType::Text => word_count(&details.main_text) as f64 / 100.0,
        CellType::Question if details.response_format == ResponseFormat::Open => {
            let reading = word_count(&details.main_text) as f64 / 100.0;
            let answering = match engagement {
                EngagementType::Survey | EngagementType::Interview => 3.0,
                _ => 0.5 + people,
            };
            reading + answering
        }
        CellType::Question => {
            let category_words: usize = details
                .response_categories
                .iter()
                .map(|c| word_count(c))
                .sum();
            let reading = (word_count(&details.main_text) + category_words) as f64 / 100.0;
            let answering = match engagement {
                EngagementType::Survey => 0.5,
                EngagementType::Interview => 1.0,
                _ => 0.5 + 0.5 * people,
            };
            reading + answering
        }
    };
    (minutes * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(cell_type: CellType, format: ResponseFormat, text: &str) -> CellDetails {
        CellDetails {
            cell_type,
            main_text: text.to_string(),
            response_format: format,
            ..CellDetails::default()
        }
    }

    #[test]
    fn test_open_question_survey() {
        let d = details(CellType::Question, ResponseFormat::Open, "What do you like most about the product we make?");
        assert_eq!(estimate_time(&d, EngagementType::Survey), 3.1);
    }

    #[test]
    fn test_open_question_conversation() {
        let d = details(CellType::Question, ResponseFormat::Open, "Tell us more");
        assert_eq!(estimate_time(&d, EngagementType::Conversation), 6.5);
        assert_eq!(estimate_time_for_group(&d, EngagementType::Conversation, 2), 2.5);
    }

    #[test]
    fn test_closed_question_counts_categories() {
        let mut d = details(CellType::Question, ResponseFormat::Closed, "Pick one");
        d.response_categories = vec!["word ".repeat(48).trim().to_string()];
        // (2 + 48) / 100 = 0.5 reading, + 1 answering
        assert_eq!(estimate_time(&d, EngagementType::Interview), 1.5);
        assert_eq!(estimate_time(&d, EngagementType::Survey), 1.0);
    }

    #[test]
    fn test_text_block_reading_only() {
        let d = details(CellType::Text, ResponseFormat::Unspecified, &"word ".repeat(250));
        assert_eq!(estimate_time(&d, EngagementType::Survey), 2.5);
    }

    #[test]
    fn test_unspecified_engagement_uses_group_formula() {
        let d = details(CellType::Question, ResponseFormat::Slider, "Rate us");
        assert_eq!(estimate_time(&d, EngagementType::Unspecified), 3.5);
    }
}
