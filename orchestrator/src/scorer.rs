use std::collections::HashSet;

const BASELINE: i32 = 50;

/// Everyday French words whose presence suggests the player is actually
/// writing in the target language. Matched as whole words.
const MARKER_WORDS: &[&str] = &[
    "je", "tu", "il", "elle", "nous", "vous", "ils", "elles", "suis", "es", "est", "sommes",
    "êtes", "sont", "le", "la", "les", "un", "une", "des", "et", "mais", "pas", "oui", "non",
    "merci", "bonjour", "pourquoi", "avec", "pour", "dans", "très",
];

/// Matched as case-insensitive substrings, so "con" also fires inside longer words.
const INSULT_DENYLIST: &[&str] = &[
    "con", "connard", "idiot", "imbécile", "crétin", "abruti", "débile", "stupide", "ta gueule",
    "merde", "salaud", "stupid", "moron", "dumb",
];

/// Score and insult flag for one player message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerAssessment {
    pub score: u8,
    pub insults: bool,
}

impl PlayerAssessment {
    pub fn of(text: &str) -> Self {
        Self {
            score: score(text),
            insults: detect_insults(text),
        }
    }
}

/// Rate a message in [0, 100]. Blank input scores 0.
pub fn score(text: &str) -> u8 {
    let text = text.trim();
    if text.is_empty() {
        return 0;
    }

    let mut total = BASELINE;

    let len = text.chars().count();
    if len > 50 {
        total += 15;
    } else if len > 30 {
        total += 10;
    } else if len < 5 {
        total -= 20;
    }

    match count_markers(text) {
        n if n >= 3 => total += 20,
        n if n >= 1 => total += 10,
        _ => {}
    }

    if detect_insults(text) {
        total -= 30;
    }

    let shouting = text.chars().filter(|c| matches!(c, '!' | '?')).count();
    if shouting > 3 {
        total -= 10;
    }

    total.clamp(0, 100) as u8
}

/// True if any denylisted term occurs anywhere in `text`, ignoring case.
pub fn detect_insults(text: &str) -> bool {
    let lower = text.to_lowercase();
    INSULT_DENYLIST.iter().any(|term| lower.contains(term))
}

/// Number of distinct marker words present.
fn count_markers(text: &str) -> usize {
    let lower = text.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| MARKER_WORDS.contains(word))
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_scores_zero() {
        assert_eq!(score(""), 0);
        assert_eq!(score("   \n"), 0);
    }

    #[test]
    fn short_text_penalized() {
        // 3 chars, no markers
        assert_eq!(score("hmm"), 30);
    }

    #[test]
    fn insult_pulls_below_baseline() {
        let text = "tu es con";
        assert!(detect_insults(text));
        // baseline 50 + one-or-two markers 10 - insult 30
        assert_eq!(score(text), 30);
        assert!(score(text) < BASELINE as u8);
    }

    #[test]
    fn long_fluent_message_scores_high() {
        let text = "Bonjour, je suis très heureux de vous voir aujourd'hui avec mes amis.";
        assert!(text.chars().count() > 50);
        assert!(!detect_insults(text));
        // 50 + 15 length + 20 markers
        assert_eq!(score(text), 85);
    }

    #[test]
    fn medium_length_bonus() {
        let text = "What a lovely morning for a walk outside";
        assert!((31..=50).contains(&text.chars().count()));
        assert_eq!(score(text), 60);
    }

    #[test]
    fn punctuation_penalty_over_three() {
        assert_eq!(score("quoi?!?"), 50);
        assert_eq!(score("quoi?!?!"), 40);
        assert_eq!(score("quoi???"), 50);
    }

    #[test]
    fn score_stays_in_range() {
        let samples = [
            "!",
            "con!!!!",
            "idiot stupide crétin !!!! ????",
            "je tu il elle nous vous ils elles suis es est sommes sont le la les un une des et mais",
            "a much longer English sentence that goes well beyond fifty characters in total",
        ];
        for s in samples {
            let v = score(s);
            assert!(v <= 100, "{s} scored {v}");
        }
        assert_eq!(score("con!!!!"), 10);
    }

    #[test]
    fn insults_case_insensitive() {
        assert!(detect_insults("Tu es CON"));
        assert!(detect_insults("You MORON"));
        assert!(detect_insults("espèce d'IMBÉCILE"));
    }

    #[test]
    fn insults_match_inside_words() {
        assert!(detect_insults("je suis content"));
        assert!(detect_insults("dumbfounded"));
        assert!(!detect_insults("bonjour madame"));
    }

    #[test]
    fn markers_are_whole_words_and_distinct() {
        assert_eq!(count_markers("le le le"), 1);
        assert_eq!(count_markers("lesson"), 0);
        assert_eq!(count_markers("Je suis là, et toi ?"), 3);
    }

    #[test]
    fn assessment_bundles_both() {
        let a = PlayerAssessment::of("tu es con");
        assert_eq!(
            a,
            PlayerAssessment {
                score: 30,
                insults: true
            }
        );
    }
}
