/// Instruction-override phrases, role-play prefixes, known injection
/// markers, template-delimiter splices, and HTML/script tags. Matched
/// case-insensitively against the raw intent.
pub const INJECTION_PATTERNS: &[&str] = &[
    r"(?i)ignore\s+(all\s+|any\s+)?(previous|prior|above|earlier)\s+(instructions?|prompts?|rules?|context)",
    r"(?i)disregard\s+(all\s+|any\s+)?(previous|prior|above|earlier)",
    r"(?i)forget\s+(everything|all|your)\b",
    r"(?i)override\s+(the\s+)?(system|safety|security)",
    r"(?i)you\s+are\s+now\s+",
    r"(?i)act\s+as\s+(if\s+you|a|an)\b",
    r"(?i)pretend\s+(to\s+be|you\s+are)",
    r"(?i)system\s*prompt",
    r"(?i)\bjailbreak\b",
    r"(?i)\bdan\s+mode\b",
    r"\{\{.*\}\}",
    r"\[\[.*\]\]",
    r"(?i)<\s*/?\s*(script|iframe|img|svg|object|embed)\b",
];

/// Whole-word destructive verbs the gateway refuses to plan for.
pub const RESTRICTED_OPERATIONS: &str =
    r"(?i)\b(delete|drop|truncate|format|wipe|destroy)\b";
