use crate::context_store::ToolContext;

/// What a free-text notice from the agent means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeClass {
    /// The agent is blocked on a permission decision
    PermissionRequest,
    /// The agent finished and waits for the next prompt
    Idle,
    /// Anything else worth relaying as-is
    Plain,
}

/// Best-effort notice classification. The engine only depends on this
/// trait so the heuristic can be swapped without touching dedup.
pub trait NoticeClassifier: Send + Sync {
    /// `recent_context` is the session's ToolContext if it was captured
    /// within the heuristic window.
    fn classify(&self, message: &str, recent_context: Option<&ToolContext>) -> NoticeClass;
}

const IDLE_PHRASES: &[&str] = &["waiting for your input", "waiting for input"];

const PERMISSION_PHRASES: &[&str] = &[
    "needs your permission",
    "needs permission to use",
    "requires permission",
    "permission to",
    "confirm",
    "asking to edit",
    "wants to edit",
    "edit the file",
    "update the file",
    "modify the file",
    "change the file",
];

/// Substring match on known phrases, then a timing fallback on the
/// session's most recent tool.
#[derive(Debug, Clone)]
pub struct PhraseClassifier {
    idle_phrases: Vec<String>,
    permission_phrases: Vec<String>,
}

impl Default for PhraseClassifier {
    fn default() -> Self {
        Self {
            idle_phrases: IDLE_PHRASES.iter().map(|p| p.to_string()).collect(),
            permission_phrases: PERMISSION_PHRASES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl PhraseClassifier {
    pub fn with_permission_phrase(mut self, phrase: &str) -> Self {
        self.permission_phrases.push(phrase.to_lowercase());
        self
    }
}

impl NoticeClassifier for PhraseClassifier {
    fn classify(&self, message: &str, recent_context: Option<&ToolContext>) -> NoticeClass {
        let lower = message.to_lowercase();

        if self.idle_phrases.iter().any(|p| lower.contains(p.as_str())) {
            return NoticeClass::Idle;
        }
        if self.permission_phrases.iter().any(|p| lower.contains(p.as_str())) {
            return NoticeClass::PermissionRequest;
        }
        if recent_context.is_some() {
            NoticeClass::PermissionRequest
        } else {
            NoticeClass::Plain
        }
    }
}
