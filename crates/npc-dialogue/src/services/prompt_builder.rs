//! Prompts for the foreground reply and for the two background jobs: live
//! compression of old lines and the end-of-conversation memo.

use std::fmt::Write;

use crate::models::ConversationContext;

/// Next NPC turn over the current transcript. History lines already carry
/// their role tags, including any memory or compressed system lines.
pub fn reply_prompt(npc_name: &str, context: Option<&ConversationContext>, history: &[String]) -> String {
    let mut prompt = String::new();
    prompt.push_str("<|system|>\n");
    let _ = writeln!(prompt, "You are {}. Stay in character and answer in one or two sentences.", npc_name);
    if let Some(ctx) = context.filter(|c| !c.location.is_empty() || !c.weather.is_empty()) {
        let _ = writeln!(prompt, "Location: {}. Weather: {}.", ctx.location, ctx.weather);
    }
    prompt.push_str("<|end|>\n");
    for line in history {
        prompt.push_str(line);
        if !line.ends_with("<|end|>") {
            prompt.push_str("\n<|end|>");
        }
        prompt.push('\n');
    }
    prompt.push_str("<|assistant|>\n");
    prompt
}

/// Compress a block of old transcript lines into one narrative memory
pub fn compression_prompt(lines: &[String], npc_name: &str, player_name: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("<|system|>\n");
    prompt.push_str("Task: Compress the following dialogue log into a concise narrative memory.\n");
    let _ = writeln!(
        prompt,
        "Format: '[Summary: {} and {} discussed X...]'",
        npc_name, player_name
    );
    prompt.push_str("<|end|>\n<|user|>\n");
    for line in lines {
        prompt.push_str(line);
        prompt.push('\n');
    }
    prompt.push_str("<|end|>\n<|assistant|>\n");
    prompt
}

/// Secretary memo over a whole closing transcript
pub fn summary_prompt(
    history: &[String],
    npc_name: &str,
    player_name: &str,
    min_chars: usize,
    max_chars: usize,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("<|system|>\n");
    let _ = writeln!(
        prompt,
        "You are a secretary writing a memo. Summarize the key facts from the following conversation between '{}' and '{}'.",
        npc_name, player_name
    );
    prompt.push_str("RULES:\n");
    prompt.push_str("- Output only the memo. Do not be conversational.\n");
    prompt.push_str("- Focus on agreements, questions, important names, locations, or numbers mentioned.\n");
    let _ = writeln!(
        prompt,
        "- Keep the summary between {} and {} characters.",
        min_chars, max_chars
    );
    let _ = writeln!(
        prompt,
        "- Example format: 'Discussed weather (hot). {} dislikes heat. {} mentioned liking ice cream.'",
        npc_name, player_name
    );
    prompt.push_str("<|end|>\n");

    prompt.push_str("<|user|>\nCONVERSATION LOG:\n");
    for line in history {
        prompt.push_str(line);
        prompt.push('\n');
    }
    prompt.push_str("<|end|>\n<|assistant|>\n");
    prompt
}
