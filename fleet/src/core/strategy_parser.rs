//! Extract a maneuver from free-text decision-layer answers.
//!
//! Order: exact name, then template phrases ("strategy: ...", "I will use ..."),
//! then loose keyword phrases. `None` means the caller must fall back.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Strategy;

static TEMPLATE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)chosen\s+strategy\s*[:=]\s*['"`]?([^'"`\n]+)"#,
        r#"(?i)using\s+strategy\s*[:=]?\s*['"`]?([^'"`\n]+)"#,
        r#"(?i)strategy\s*[:=]\s*['"`]?([^'"`\n]+)"#,
        r#"(?i)i\s+will\s+use\s+['"`]?([^'"`\n]+)"#,
    ]
    .into_iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

pub fn parse_strategy(text: &str) -> Option<Strategy> {
    let trimmed = text.trim();
    if let Ok(strategy) = trimmed.parse::<Strategy>() {
        return Some(strategy);
    }

    let lower = trimmed.to_lowercase();
    for re in TEMPLATE_RES.iter() {
        if let Some(caps) = re.captures(&lower)
            && let Some(strategy) = caps.get(1).and_then(|m| classify(m.as_str()))
        {
            return Some(strategy);
        }
    }
    fuzzy(&lower)
}

fn classify(candidate: &str) -> Option<Strategy> {
    let has = |word: &str| candidate.contains(word);
    if has("reverse") && has("left") {
        Some(Strategy::ReverseAndTurnLeft)
    } else if has("reverse") && has("right") {
        Some(Strategy::ReverseAndTurnRight)
    } else if has("reverse") && has("only") {
        Some(Strategy::ReverseOnly)
    } else if has("forward") && has("left") {
        Some(Strategy::ForwardLeft)
    } else {
        None
    }
}

fn fuzzy(text: &str) -> Option<Strategy> {
    let any = |phrases: &[&str]| phrases.iter().any(|phrase| text.contains(phrase));
    if any(&["reverse_only", "reverse only"]) {
        Some(Strategy::ReverseOnly)
    } else if any(&["reverse_and_turn_left", "reverse and turn left", "turn left"]) {
        Some(Strategy::ReverseAndTurnLeft)
    } else if any(&["reverse_and_turn_right", "reverse and turn right", "turn right"]) {
        Some(Strategy::ReverseAndTurnRight)
    } else if any(&["forward_left", "forward left"]) {
        Some(Strategy::ForwardLeft)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_names_parse_directly() {
        assert_eq!(parse_strategy(" forward_left\n"), Some(Strategy::ForwardLeft));
    }

    #[test]
    fn template_phrases_are_classified() {
        assert_eq!(
            parse_strategy("Chosen strategy: 'reverse_and_turn_right' because east."),
            Some(Strategy::ReverseAndTurnRight)
        );
        assert_eq!(
            parse_strategy("I will use reverse and turn left to escape"),
            Some(Strategy::ReverseAndTurnLeft)
        );
        assert_eq!(
            parse_strategy("strategy = \"reverse only\""),
            Some(Strategy::ReverseOnly)
        );
    }

    #[test]
    fn loose_phrases_fall_through_to_fuzzy_match() {
        assert_eq!(
            parse_strategy("Robot is stuck. Best to turn right here."),
            Some(Strategy::ReverseAndTurnRight)
        );
        assert_eq!(
            parse_strategy("go forward left please"),
            Some(Strategy::ForwardLeft)
        );
    }

    #[test]
    fn unrecognized_text_is_none() {
        assert_eq!(parse_strategy("no idea"), None);
        assert_eq!(parse_strategy(""), None);
    }
}
