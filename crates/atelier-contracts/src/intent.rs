//! Keyword heuristics for free-text turns.

const IMAGE_REQUEST_KEYWORDS: &[&str] = &[
    "generate", "create", "make", "show me", "image", "picture", "dress", "outfit",
];

const IMAGE_REPLY_PHRASES: &[&str] = &[
    "successfully generated",
    "i've generated",
    "generated images",
    "successfully edited",
    "i've edited",
    "edited image",
];

const EDIT_KEYWORDS: &[&str] = &[
    "edit", "modify", "change", "update", "adjust", "alter", "make it", "turn it",
];

const GENERATE_KEYWORDS: &[&str] = &[
    "generate", "create", "design", "show me", "dress", "outfit", "saree", "gown", "suit",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnIntent {
    Edit,
    Generate,
    Converse,
}

/// Whether a chat turn is worth looking for new artifacts after: either the
/// user asked for imagery or the reply says some was produced.
pub fn expects_images(request: &str, reply: &str) -> bool {
    contains_any(&request.to_lowercase(), IMAGE_REQUEST_KEYWORDS)
        || contains_any(&reply.to_lowercase(), IMAGE_REPLY_PHRASES)
}

pub fn classify(text: &str) -> TurnIntent {
    let lowered = text.trim().to_lowercase();
    if lowered.is_empty() {
        return TurnIntent::Converse;
    }
    let head = lowered.split_whitespace().next().unwrap_or("");
    if matches!(head, "edit" | "modify" | "change") || contains_words(&lowered, EDIT_KEYWORDS) {
        return TurnIntent::Edit;
    }
    if contains_any(&lowered, GENERATE_KEYWORDS) {
        return TurnIntent::Generate;
    }
    TurnIntent::Converse
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

// Whole-word match so "credit" is not read as "edit".
fn contains_words(haystack: &str, needles: &[&str]) -> bool {
    let words: Vec<&str> = haystack
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|word| !word.is_empty())
        .collect();
    needles.iter().any(|needle| {
        let parts: Vec<&str> = needle.split_whitespace().collect();
        words.windows(parts.len()).any(|window| window == parts.as_slice())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_keywords_trigger_image_lookup() {
        assert!(expects_images("Show me a summer dress", ""));
        assert!(expects_images("hi", "I've generated four looks"));
        assert!(!expects_images("hello there", "Hi! How can I help?"));
    }

    #[test]
    fn edit_requests_are_recognised() {
        assert_eq!(classify("Edit this to be red"), TurnIntent::Edit);
        assert_eq!(classify("please make it longer"), TurnIntent::Edit);
        assert_eq!(classify("Could you change the sleeves"), TurnIntent::Edit);
    }

    #[test]
    fn edit_keywords_match_whole_words() {
        assert_eq!(classify("what credit card do you take"), TurnIntent::Converse);
    }

    #[test]
    fn generation_requests_are_recognised() {
        assert_eq!(classify("Generate 4 evening gowns"), TurnIntent::Generate);
        assert_eq!(classify("show me office outfits"), TurnIntent::Generate);
    }

    #[test]
    fn small_talk_is_conversation() {
        assert_eq!(classify("hello"), TurnIntent::Converse);
        assert_eq!(classify("   "), TurnIntent::Converse);
    }
}
