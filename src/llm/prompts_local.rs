//! Prompt assembly for the on-device model.
//!
//! Small local models follow short, literal instructions best, so persona
//! dials are mapped onto fixed phrases by threshold rather than described
//! numerically. Assembly is a pure function: identical inputs always give an
//! identical prompt.

use crate::settings::{MemoryFacts, PersonaConfig};

pub const BASE_INSTRUCTION: &str = "You are an AI assistant. ";

pub const BREVITY_INSTRUCTION: &str = "Be extremely brief. ";
pub const THOROUGHNESS_INSTRUCTION: &str = "Be very detailed and thorough. ";
pub const PROFESSIONAL_INSTRUCTION: &str = "Maintain a highly professional, executive tone. ";
pub const CASUAL_INSTRUCTION: &str = "Use casual language and slang. ";
pub const PLAYFUL_INSTRUCTION: &str = "Include sarcastic or playful remarks. ";

/// Tool grammar description. Kept short to save prompt tokens.
pub const TOOL_GRAMMAR_INSTRUCTION: &str =
    "\nTools: [LAUNCH:app name] to open apps, [SEARCH:query] to search web. Only use when asked.";

pub const MEMORY_LABEL: &str = "LONG-TERM MEMORY CONTEXT:";
pub const CONTEXT_LABEL: &str = "CURRENT SCREEN CONTEXT:";
pub const USER_MARKER: &str = "USER: ";

/// Request used to fold conversation history into one summary turn.
pub fn summarize_history_request(history: &str) -> String {
    format!("Summarize: {}", history)
}

/// Request wrapping web search results for the follow-up round trip.
pub fn summarize_search_request(results: &str) -> String {
    format!("Summarize search results:\n{}", results)
}

/// Request used when the user submits a bare URL.
pub fn summarize_page_request(page_text: &str) -> String {
    format!("Summarize: {}", page_text)
}

/// Fixed request for the screen-assist entry point.
pub const ANALYZE_SCREEN_REQUEST: &str = "Analyze this screen.";

/// Build the system portion: persona, memory, dials, mood, tool grammar.
pub fn build_system_prompt(persona: &PersonaConfig, memory: &MemoryFacts) -> String {
    let mut sb = String::from(BASE_INSTRUCTION);

    if persona.has_custom_style() {
        sb.push_str(&format!("Your core personality is {}. ", persona.style_tag));
        sb.push_str(match persona.intensity {
            8.. => "You must exhibit this personality trait extremely strongly in every single sentence. ",
            0..=3 => "You should only show subtle, slight hints of this personality. ",
            _ => "Display this personality clearly but naturally. ",
        });
    }

    if !memory.is_empty() {
        sb.push_str(MEMORY_LABEL);
        sb.push(' ');
        if let Some(name) = memory.name() {
            sb.push_str(&format!("The user you are talking to is named '{}'. ", name));
        }
        if let Some(dob) = memory.dob() {
            sb.push_str(&format!("Their birthday/age is '{}'. ", dob));
        }
        if let Some(family) = memory.family_notes() {
            sb.push_str(&format!("Their close family/pets are '{}'. ", family));
        }
        sb.push_str("Always remember these facts about the user. ");
    }

    match persona.verbosity {
        0..=3 => sb.push_str(BREVITY_INSTRUCTION),
        8.. => sb.push_str(THOROUGHNESS_INSTRUCTION),
        _ => {}
    }

    match persona.formality {
        8.. => sb.push_str(PROFESSIONAL_INSTRUCTION),
        0..=3 => sb.push_str(CASUAL_INSTRUCTION),
        _ => {}
    }

    if persona.humor >= 8 {
        sb.push_str(PLAYFUL_INSTRUCTION);
    }

    if persona.has_custom_mood() {
        sb.push_str(&format!(
            "Your current mood is {}. Let this influence your tone. ",
            persona.mood
        ));
    }

    sb.push_str(TOOL_GRAMMAR_INSTRUCTION);
    sb
}

/// Assemble the full prompt.
///
/// Layout: system prompt, blank line, optional labelled context block, then
/// the user text behind [`USER_MARKER`].
pub fn assemble(
    persona: &PersonaConfig,
    memory: &MemoryFacts,
    ambient_context: Option<&str>,
    user_text: &str,
) -> String {
    let mut prompt = build_system_prompt(persona, memory);
    prompt.push_str("\n\n");

    if let Some(ctx) = ambient_context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str(CONTEXT_LABEL);
        prompt.push('\n');
        prompt.push_str(ctx);
        prompt.push_str("\n\n");
    }

    prompt.push_str(USER_MARKER);
    prompt.push_str(user_text);
    prompt
}
