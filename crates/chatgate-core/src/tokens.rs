//! §4.6 / SPEC_FULL §12.3: the declared token-count approximator used when a
//! driver does not report usage itself. `ceil(char_count / 4)`, applied
//! independently to the rendered prompt and to the completion text.

use crate::chat::Message;

const CHARS_PER_TOKEN: usize = 4;

pub fn approximate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    ((chars + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN) as u32
}

/// Renders the message sequence the same way a driver would see it on
/// stdin, so the approximator is computed over what was actually sent.
pub fn render_prompt(messages: &[Message], system_prompt: Option<&str>) -> String {
    let mut rendered = String::new();
    if let Some(system) = system_prompt {
        rendered.push_str(system);
        rendered.push('\n');
    }
    for message in messages {
        rendered.push_str(&format!("{:?}: {}\n", message.role, message.content));
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up() {
        assert_eq!(approximate_tokens(""), 0);
        assert_eq!(approximate_tokens("abc"), 1);
        assert_eq!(approximate_tokens("abcd"), 1);
        assert_eq!(approximate_tokens("abcde"), 2);
    }
}
