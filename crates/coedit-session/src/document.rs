//! Shared document, stdin, and execution output. Full-buffer, last writer wins.

use coedit_common::Envelope;

/// Which shared buffer changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentField {
    Content,
    Output,
    Input,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentState {
    content: String,
    output: String,
    input: String,
}

impl DocumentState {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            content: initial.into(),
            ..Self::default()
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    /// Record a local edit. Returns the envelope to broadcast, or `None`
    /// when the buffer did not change.
    pub fn edit(&mut self, content: impl Into<String>) -> Option<Envelope> {
        let content = content.into();
        if content == self.content {
            return None;
        }
        self.content.clone_from(&content);
        Some(Envelope::content_update(content))
    }

    pub fn set_input(&mut self, input: impl Into<String>) -> Option<Envelope> {
        let input = input.into();
        if input == self.input {
            return None;
        }
        self.input.clone_from(&input);
        Some(Envelope::input_update(input))
    }

    /// Publish a rendered execution result. Always broadcast, even if equal,
    /// since re-running the same program is a visible event.
    pub fn publish_output(&mut self, output: impl Into<String>) -> Envelope {
        let output = output.into();
        self.output.clone_from(&output);
        Envelope::output(output)
    }

    /// Apply a relayed envelope. Returns the field that changed, if any.
    pub fn apply_remote(&mut self, envelope: &Envelope) -> Option<DocumentField> {
        match envelope {
            Envelope::ContentUpdate(update) => {
                replace(&mut self.content, &update.content).then_some(DocumentField::Content)
            }
            Envelope::Output(update) => {
                replace(&mut self.output, &update.output).then_some(DocumentField::Output)
            }
            Envelope::InputUpdate(update) => {
                replace(&mut self.input, &update.input).then_some(DocumentField::Input)
            }
            _ => None,
        }
    }
}

fn replace(slot: &mut String, value: &str) -> bool {
    if slot == value {
        return false;
    }
    slot.clear();
    slot.push_str(value);
    true
}
