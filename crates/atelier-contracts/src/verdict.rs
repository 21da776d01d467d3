use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Generate,
    Edit,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    Failure,
    /// Conversational turn with no image work to reconcile.
    Reply,
}

impl Verdict {
    pub fn is_success(self) -> bool {
        !matches!(self, Verdict::Failure)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub verdict: Verdict,
    pub message: String,
    pub artifacts: Vec<String>,
}

/// Observed artifacts are definitive; the delegation text is advisory.
///
/// Any observed artifact makes the verdict a success and replaces the
/// delegation text, which may narrate a failure that did not happen. With
/// nothing observed the text is surfaced as-is, so a claimed success with no
/// file behind it still reports as a failure.
pub fn reconcile(
    kind: RequestKind,
    observed: &[String],
    delegation_message: &str,
) -> Reconciliation {
    if !observed.is_empty() {
        return Reconciliation {
            verdict: Verdict::Success,
            message: success_message(kind, observed.len()),
            artifacts: observed.to_vec(),
        };
    }
    let trimmed = delegation_message.trim();
    let message = if trimmed.is_empty() {
        fallback_message(kind).to_string()
    } else {
        trimmed.to_string()
    };
    Reconciliation {
        verdict: Verdict::Failure,
        message,
        artifacts: Vec::new(),
    }
}

/// A chat turn that never asked for images.
pub fn reply(delegation_message: &str) -> Reconciliation {
    let trimmed = delegation_message.trim();
    Reconciliation {
        verdict: Verdict::Reply,
        message: if trimmed.is_empty() {
            fallback_message(RequestKind::Chat).to_string()
        } else {
            trimmed.to_string()
        },
        artifacts: Vec::new(),
    }
}

pub fn success_message(kind: RequestKind, count: usize) -> String {
    match kind {
        RequestKind::Generate => format!("Successfully generated {count} image(s)"),
        RequestKind::Edit => format!("Successfully edited {count} image(s)"),
        RequestKind::Chat => format!("Successfully produced {count} image(s)"),
    }
}

pub fn fallback_message(kind: RequestKind) -> &'static str {
    match kind {
        RequestKind::Generate => "No images generated.",
        RequestKind::Edit => "Edited image not found. The agent may still be processing.",
        RequestKind::Chat => "Response received",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observed_artifacts_override_failure_text() {
        let outcome = reconcile(
            RequestKind::Edit,
            &["x.png".to_string()],
            "Error: cannot edit",
        );
        assert_eq!(outcome.verdict, Verdict::Success);
        assert!(!outcome.message.contains("Error"));
        assert!(!outcome.message.contains("cannot"));
        assert_eq!(outcome.artifacts, vec!["x.png".to_string()]);
    }

    #[test]
    fn success_message_names_count() {
        let observed: Vec<String> = (1..=4).map(|idx| format!("q_{idx}.png")).collect();
        let outcome = reconcile(RequestKind::Generate, &observed, "I cannot generate images");
        assert_eq!(outcome.message, "Successfully generated 4 image(s)");
    }

    #[test]
    fn empty_observation_with_empty_text_uses_fallback() {
        let outcome = reconcile(RequestKind::Generate, &[], "");
        assert_eq!(outcome.verdict, Verdict::Failure);
        assert_eq!(outcome.message, fallback_message(RequestKind::Generate));
    }

    #[test]
    fn claimed_success_without_artifacts_is_failure() {
        let outcome = reconcile(RequestKind::Edit, &[], "  Successfully edited image  ");
        assert_eq!(outcome.verdict, Verdict::Failure);
        assert_eq!(outcome.message, "Successfully edited image");
        assert!(!outcome.verdict.is_success());
    }

    #[test]
    fn reply_surfaces_text() {
        let outcome = reply("Hello! How can I help?");
        assert_eq!(outcome.verdict, Verdict::Reply);
        assert!(outcome.verdict.is_success());
        assert_eq!(reply("").message, "Response received");
    }
}
