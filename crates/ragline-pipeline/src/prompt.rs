use ragline_core::{PromptMessage, RetrievedFragment};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. Answer the user's question based on the provided context.
If the context doesn't contain relevant information, say so clearly.
Be concise and accurate in your responses.";

pub const DEFAULT_USER_TEMPLATE: &str = "Context information is below:
---
{context}
---

Using the context information above, answer the following question:
{query}

Answer:";

const CONTEXT_SLOT: &str = "{context}";
const QUERY_SLOT: &str = "{query}";

/// Turns a query and its fragments into chat messages.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
    user_template: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            user_template: DEFAULT_USER_TEMPLATE.to_string(),
        }
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Template with `{context}` and `{query}` slots.
    pub fn with_user_template(mut self, template: impl Into<String>) -> Self {
        self.user_template = template.into();
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// `[1] first\n\n[2] second`, in the order given.
    pub fn format_context(fragments: &[RetrievedFragment]) -> String {
        fragments
            .iter()
            .enumerate()
            .map(|(i, f)| format!("[{}] {}", i + 1, f.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn build_user_prompt(&self, query: &str, fragments: &[RetrievedFragment]) -> String {
        let context = Self::format_context(fragments);
        render(&self.user_template, &context, query)
    }

    pub fn build_messages(&self, query: &str, fragments: &[RetrievedFragment]) -> Vec<PromptMessage> {
        let user = self.build_user_prompt(query, fragments);
        tracing::debug!(query_len = query.len(), fragments = fragments.len(), prompt_len = user.len(), "prompt built");
        vec![PromptMessage::system(self.system_prompt.clone()), PromptMessage::user(user)]
    }
}

/// Single left-to-right pass; substituted text is never scanned again.
fn render(template: &str, context: &str, query: &str) -> String {
    let mut out = String::with_capacity(template.len() + context.len() + query.len());
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix(CONTEXT_SLOT) {
            out.push_str(context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(QUERY_SLOT) {
            out.push_str(query);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
