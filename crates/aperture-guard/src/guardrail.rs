use regex::Regex;

use crate::errors::GuardError;
use crate::patterns::{INJECTION_PATTERNS, RESTRICTED_OPERATIONS};

/// Intent admission guard: validates shape, then screens for
/// prompt-injection phrasing and restricted operations, in that order.
pub struct Guardrail {
    max_intent_bytes: usize,
    injection: Vec<Regex>,
    restricted: Regex,
}

impl Default for Guardrail {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_INTENT_BYTES)
    }
}

impl Guardrail {
    pub const DEFAULT_MAX_INTENT_BYTES: usize = 8 * 1024;

    pub fn new(max_intent_bytes: usize) -> Self {
        let injection = INJECTION_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern).expect("static pattern"))
            .collect();
        let restricted = Regex::new(RESTRICTED_OPERATIONS).expect("static pattern");
        Self {
            max_intent_bytes,
            injection,
            restricted,
        }
    }

    pub fn inspect(&self, user_id: &str, intent: &str) -> Result<(), GuardError> {
        if user_id.trim().is_empty() {
            return Err(GuardError::invalid("user id is empty"));
        }
        let trimmed = intent.trim();
        if trimmed.is_empty() {
            return Err(GuardError::invalid("intent is empty"));
        }
        if intent.len() > self.max_intent_bytes {
            return Err(GuardError::invalid(&format!(
                "intent exceeds {} bytes",
                self.max_intent_bytes
            )));
        }

        if let Some(pattern) = self.injection.iter().find(|p| p.is_match(intent)) {
            tracing::warn!(
                target: "aperture::guard",
                user_id,
                pattern = pattern.as_str(),
                "intent refused: injection pattern"
            );
            return Err(GuardError::prompt_injection(&format!(
                "intent matched injection pattern `{}`",
                pattern.as_str()
            )));
        }

        if let Some(found) = self.restricted.find(intent) {
            tracing::warn!(
                target: "aperture::guard",
                user_id,
                operation = found.as_str(),
                "intent refused: restricted operation"
            );
            return Err(GuardError::sensitive_operation(&format!(
                "intent names restricted operation `{}`",
                found.as_str()
            )));
        }

        Ok(())
    }
}
