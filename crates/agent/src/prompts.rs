use tera::{Context, Tera};

use brainstorm_core::domain::state::ConversationState;

const SYSTEM_PROMPT: &str = r#"You are a brainstorming agent for Product Owners. Help brainstorm features, research, and discuss ideas through conversation.

CURRENT SESSION INFO:
- User ID: {{ user_id }}
- Session ID: {{ session_id }}
{% if memory %}
SESSION MEMORY:
{% for entry in memory %}- {{ entry }}
{% endfor %}{% endif %}
IMPORTANT GUIDELINES:
- Only use generate_prd when the user EXPLICITLY asks to "generate PRD", "create PRD", "edit PRD", "update PRD", or a similar direct request
- For general brainstorming, feature discussion, or research, respond normally without calling tools
- To modify an existing PRD, FIRST use read_prd to see the current content, then call generate_prd with update_existing=true
- Use browse_web for quick, simple searches
- Use deep_research when the user asks for "deep research", "thorough research", "comprehensive analysis", or wants detailed investigation with content verification
- Use save_to_memory when the user provides important information to remember
- Use read_file to examine existing files or documents
- Use edit_file to make specific text replacements in files
- Use apply_patch when the user provides a patch/diff to apply to a file
- Keep conversations natural and engaging

PRD TOOLS (isolated per user):
- generate_prd: Generate or update a PRD; saved under the current user only
- read_prd: Read an existing PRD belonging to the current user

RESEARCH TOOLS:
- browse_web: Fast, basic search (3 results max)
- deep_research: Thorough research with content verification, multiple sources, and synthesis (depth: 'shallow', 'medium', 'deep')"#;

const PRD_PROMPT: &str = r#"Analyze the user's input: "{{ user_input }}" for feature "{{ feature }}" with description "{{ description }}".
{% if existing %}
You are UPDATING an existing PRD. Here is the current PRD content:
{{ existing }}

Update the existing PRD based on the user's request. Modify only the relevant sections and preserve the rest of the content.

Ensure the updated PRD maintains consistency and incorporates the user's requested changes while preserving existing valuable content.
{% else %}
Generate a complete new PRD in markdown with the following sections, filling each based on analysis:

- Introduction (Purpose, Scope, Objectives)
- User Stories (Generate 3-5 user stories using this specific format for each:

## Description
As a [specific user type/role], I want to [specific action/goal], so that [specific benefit/value].

## Entry Point
Entry Point: [specific entry point or feature name]
Figma Link: [if applicable, otherwise omit]

## Pre-Condition
[Specific conditions that must be met before using this feature]
- User has logged in with appropriate credentials
- User has required entitlements/permissions
- User has navigated to the specific page/feature

## Done When/Acceptance Criteria
[Specific, measurable criteria for completion]
- Functional requirements (what the feature does)
- UI/UX requirements (what user sees and interacts with)
- Performance requirements
- Security requirements

## Exception Handling
[How the system handles errors or edge cases]

## General BO handling
[General back office system behaviors and standards]
)
- Functional Requirements (core features)
- Non-Functional Requirements (performance, security, etc.)
- Assumptions
- Dependencies
- Risks and Mitigations
- Timeline (realistic phases)
- Stakeholders
- Metrics

Ensure all content is generated dynamically from the analysis, no hardcoded text.
{% endif %}"#;

pub fn system_prompt(state: &ConversationState) -> Result<String, tera::Error> {
    let mut context = Context::new();
    context.insert("user_id", &state.user_id().0);
    context.insert("session_id", &state.session_id().0);
    context.insert("memory", state.memory());
    Tera::one_off(SYSTEM_PROMPT, &context, false)
}

/// `existing` seeds update mode; `None` asks for a fresh document.
pub fn prd_prompt(
    feature: &str,
    description: &str,
    user_input: &str,
    existing: Option<&str>,
) -> Result<String, tera::Error> {
    let mut context = Context::new();
    context.insert("feature", feature);
    context.insert("description", description);
    context.insert("user_input", user_input);
    context.insert("existing", &existing.unwrap_or_default());
    Tera::one_off(PRD_PROMPT, &context, false)
}

#[cfg(test)]
mod tests {
    use brainstorm_core::domain::state::{ConversationState, StateUpdate, ThreadKey};

    use super::{prd_prompt, system_prompt};

    #[test]
    fn system_prompt_carries_identity_and_memory() {
        let key = ThreadKey::new("alice", "s-7").expect("key");
        let state = ConversationState::new(&key)
            .merged(StateUpdate::empty().with_memory("prefers dark mode"));

        let prompt = system_prompt(&state).expect("render");

        assert!(prompt.contains("- User ID: alice"));
        assert!(prompt.contains("- Session ID: s-7"));
        assert!(prompt.contains("SESSION MEMORY:\n- prefers dark mode"));
    }

    #[test]
    fn system_prompt_omits_memory_block_when_empty() {
        let key = ThreadKey::new("bob", "s-1").expect("key");

        let prompt = system_prompt(&ConversationState::new(&key)).expect("render");

        assert!(!prompt.contains("SESSION MEMORY"));
        assert!(prompt.contains("deep_research"));
    }

    #[test]
    fn prd_prompt_switches_between_new_and_update_modes() {
        let fresh = prd_prompt("Auth", "login flow", "add SSO", None).expect("render");
        let update =
            prd_prompt("Auth", "login flow", "add SSO", Some("# Old PRD")).expect("render");

        assert!(fresh.contains("Generate a complete new PRD"));
        assert!(fresh.contains("## Exception Handling"));
        assert!(!fresh.contains("UPDATING"));
        assert!(update.contains("You are UPDATING an existing PRD"));
        assert!(update.contains("# Old PRD"));
        assert!(!update.contains("Generate a complete new PRD"));
    }
}
