use crate::config::PromptsConfig;

const CONTEXT_PLACEHOLDER: &str = "{{CONTEXT}}";
const FALLBACK_PLACEHOLDER: &str = "{{FALLBACK}}";
const EMPTY_CONTEXT_MARKER: &str = "(no relevant context was found for this question)";

/// Renders system instructions from typed inputs
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    answer_template: String,
    summary_instruction: String,
    fallback_answer: String,
}

impl ContextBuilder {
    pub fn new(prompts: &PromptsConfig) -> Self {
        let mut answer_template = prompts.answer_system_prompt.clone();
        if !answer_template.contains(CONTEXT_PLACEHOLDER) {
            answer_template.push_str("\n\n");
            answer_template.push_str(CONTEXT_PLACEHOLDER);
        }

        Self {
            answer_template,
            summary_instruction: prompts.summary_system_prompt.clone(),
            fallback_answer: prompts.fallback_answer.clone(),
        }
    }

    pub fn summary_instruction(&self) -> &str {
        &self.summary_instruction
    }

    /// System instruction for the answer call, with the numbered context block
    pub fn build_answer_instruction(&self, snippets: &[String]) -> String {
        self.answer_template
            .replace(FALLBACK_PLACEHOLDER, &self.fallback_answer)
            .replace(CONTEXT_PLACEHOLDER, &Self::render_context(snippets))
    }

    fn render_context(snippets: &[String]) -> String {
        let mut block = String::from("Context:\n");

        if snippets.is_empty() {
            block.push_str(EMPTY_CONTEXT_MARKER);
            return block;
        }

        let body = snippets
            .iter()
            .enumerate()
            .map(|(i, snippet)| format!("[{}] {}", i + 1, snippet.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");
        block.push_str(&body);
        block
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(&PromptsConfig::default())
    }
}
