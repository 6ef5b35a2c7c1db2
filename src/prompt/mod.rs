//! Prompt formatting
//!
//! Turns a role-tagged dialogue into the prompt markup a model family
//! expects. The formatter is a pluggable strategy: the generation loop only
//! sees the [`PromptFormatter`] trait, so model families (or fully custom
//! templates) can be swapped without touching it.

pub mod stops;

pub use stops::{StopMatch, StopRegistry};

use crate::types::{ModelArchitecture, Role, Turn};

/// Strategy turning ordered turns into a prompt string.
///
/// The returned string must end with the markup that cues the model to
/// generate the assistant's reply.
pub trait PromptFormatter: Send {
    /// Render the dialogue. `system_override` replaces any system turns in
    /// the dialogue when present.
    fn format(&self, turns: &[Turn], system_override: Option<&str>) -> String;

    /// Whether tokenization of the rendered prompt should prepend the
    /// beginning-of-sequence token.
    fn add_bos(&self) -> bool {
        true
    }
}

/// Built-in per-family template formatter.
///
/// `Generic` (and unknown) architectures use generic chat markup.
#[derive(Debug, Clone, Copy)]
pub struct TemplateFormatter {
    architecture: ModelArchitecture,
}

impl TemplateFormatter {
    pub fn new(architecture: ModelArchitecture) -> Self {
        Self { architecture }
    }

    /// Resolve the system text for this call: the override wins, otherwise
    /// the first system turn in the dialogue.
    fn system_text<'a>(turns: &'a [Turn], system_override: Option<&'a str>) -> Option<&'a str> {
        system_override.or_else(|| {
            turns
                .iter()
                .find(|t| t.role == Role::System)
                .map(|t| t.text.as_str())
        })
    }

    fn format_chat_markup(turns: &[Turn], system: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(sys) = system {
            out.push_str("<|im_start|>system\n");
            out.push_str(sys);
            out.push_str("<|im_end|>\n");
        }
        for turn in turns {
            let tag = match turn.role {
                Role::System => continue,
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            out.push_str("<|im_start|>");
            out.push_str(tag);
            out.push('\n');
            out.push_str(&turn.text);
            out.push_str("<|im_end|>\n");
        }
        out.push_str("<|im_start|>assistant\n");
        out
    }

    fn format_llama3(turns: &[Turn], system: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(sys) = system {
            out.push_str("<|start_header_id|>system<|end_header_id|>\n\n");
            out.push_str(sys);
            out.push_str("<|eot_id|>");
        }
        for turn in turns {
            let tag = match turn.role {
                Role::System => continue,
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            out.push_str("<|start_header_id|>");
            out.push_str(tag);
            out.push_str("<|end_header_id|>\n\n");
            out.push_str(&turn.text);
            out.push_str("<|eot_id|>");
        }
        out.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
        out
    }

    /// Llama 2 / Mistral instruct markup. Llama 2 wraps the system text in
    /// `<<SYS>>`; Mistral folds it into the first user message.
    fn format_instruct(turns: &[Turn], system: Option<&str>, sys_markup: bool) -> String {
        let mut out = String::new();
        let mut system = system;
        let mut open = false;

        for turn in turns {
            match turn.role {
                Role::System => continue,
                Role::User => {
                    if open {
                        // Consecutive user turns merge into one block.
                        out.push('\n');
                    } else {
                        out.push_str("[INST] ");
                        open = true;
                    }
                    if let Some(sys) = system.take() {
                        if sys_markup {
                            out.push_str("<<SYS>>\n");
                            out.push_str(sys);
                            out.push_str("\n<</SYS>>\n\n");
                        } else {
                            out.push_str(sys);
                            out.push_str("\n\n");
                        }
                    }
                    out.push_str(&turn.text);
                }
                Role::Assistant => {
                    if open {
                        out.push_str(" [/INST] ");
                        open = false;
                    }
                    out.push_str(&turn.text);
                    out.push_str("</s>");
                }
            }
        }

        if open {
            out.push_str(" [/INST] ");
        }
        out
    }

    fn format_gemma(turns: &[Turn], system: Option<&str>) -> String {
        // Gemma has no system role; the system text joins the first user
        // turn.
        let mut out = String::new();
        let mut system = system;

        for turn in turns {
            let tag = match turn.role {
                Role::System => continue,
                Role::User => "user",
                Role::Assistant => "model",
            };
            out.push_str("<start_of_turn>");
            out.push_str(tag);
            out.push('\n');
            if turn.role == Role::User {
                if let Some(sys) = system.take() {
                    out.push_str(sys);
                    out.push_str("\n\n");
                }
            }
            out.push_str(&turn.text);
            out.push_str("<end_of_turn>\n");
        }
        out.push_str("<start_of_turn>model\n");
        out
    }

    fn format_phi(turns: &[Turn], system: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(sys) = system {
            out.push_str("<|system|>\n");
            out.push_str(sys);
            out.push_str("<|end|>\n");
        }
        for turn in turns {
            let tag = match turn.role {
                Role::System => continue,
                Role::User => "<|user|>\n",
                Role::Assistant => "<|assistant|>\n",
            };
            out.push_str(tag);
            out.push_str(&turn.text);
            out.push_str("<|end|>\n");
        }
        out.push_str("<|assistant|>\n");
        out
    }
}

impl PromptFormatter for TemplateFormatter {
    fn format(&self, turns: &[Turn], system_override: Option<&str>) -> String {
        let system = Self::system_text(turns, system_override);

        match self.architecture {
            ModelArchitecture::Llama3 => Self::format_llama3(turns, system),
            ModelArchitecture::Llama2 => Self::format_instruct(turns, system, true),
            ModelArchitecture::Mistral => Self::format_instruct(turns, system, false),
            ModelArchitecture::Gemma => Self::format_gemma(turns, system),
            ModelArchitecture::Phi => Self::format_phi(turns, system),
            ModelArchitecture::Qwen | ModelArchitecture::Generic => {
                Self::format_chat_markup(turns, system)
            }
        }
    }
}
