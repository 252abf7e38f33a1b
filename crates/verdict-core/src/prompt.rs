// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Prompt Templates
// ─────────────────────────────────────────────────────────────────────
//! Prompts for the verifier model and the drafting model.

use verdict_types::Principle;

const PRINCIPLES_HEADER: &str = "PRINCIPLES:\n";
const RESPONSE_OPEN: &str = "RESPONSE:\n<<<\n";
const RESPONSE_CLOSE: &str = "\n>>>";

/// Verification prompt embedding the numbered principles and the response.
pub fn verification_prompt(principles: &[Principle], response: &str) -> String {
    let mut prompt = String::with_capacity(256 + response.len());
    prompt.push_str(
        "You are a content-policy verifier. Judge the RESPONSE against every PRINCIPLE.\n\
         Reply with only a JSON object of the form \
         {\"violations\": [<violated principle text or number>], \"confidence\": <number in [0, 1]>}.\n\
         Use an empty list when no principle is violated.\n\n",
    );
    prompt.push_str(PRINCIPLES_HEADER);
    for (i, p) in principles.iter().enumerate() {
        // One principle per line; embedded newlines would split it.
        let line = p.as_str().replace(['\n', '\r'], " ");
        prompt.push_str(&format!("{}. {}\n", i + 1, line));
    }
    prompt.push('\n');
    prompt.push_str(RESPONSE_OPEN);
    prompt.push_str(response);
    prompt.push_str(RESPONSE_CLOSE);
    prompt
}

/// Recover `(principles, response)` from a prompt built by
/// [`verification_prompt`].
pub fn split_verification_prompt(prompt: &str) -> Option<(Vec<String>, String)> {
    let after_header = &prompt[prompt.find(PRINCIPLES_HEADER)? + PRINCIPLES_HEADER.len()..];
    let resp_at = after_header.find(RESPONSE_OPEN)?;

    let principles: Vec<String> = after_header[..resp_at]
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| match l.split_once(". ") {
            Some((n, text)) if n.chars().all(|c| c.is_ascii_digit()) => text.to_string(),
            _ => l.to_string(),
        })
        .collect();

    let body = &after_header[resp_at + RESPONSE_OPEN.len()..];
    let response = body.strip_suffix(RESPONSE_CLOSE).unwrap_or(body).to_string();
    Some((principles, response))
}

/// First-iteration drafting prompt.
pub fn draft_prompt(task: &str, principles: &[Principle]) -> String {
    let mut prompt = String::with_capacity(128 + task.len());
    prompt.push_str("Complete the following task.\n\nTASK:\n");
    prompt.push_str(task);
    prompt.push_str("\n\nYour answer must respect these principles:\n");
    push_bullets(&mut prompt, principles.iter());
    prompt
}

/// Revision prompt carrying the prior draft and the violated principles.
pub fn revision_prompt(
    task: &str,
    principles: &[Principle],
    prior_draft: &str,
    violations: &[Principle],
) -> String {
    let mut prompt = draft_prompt(task, principles);
    prompt.push_str("\nYOUR PREVIOUS DRAFT:\n");
    prompt.push_str(prior_draft);
    prompt.push_str("\n\nA reviewer found that the draft violates:\n");
    push_bullets(&mut prompt, violations.iter());
    prompt.push_str("\nRewrite the draft so it no longer violates these principles while still completing the task. Reply with the revised answer only.");
    prompt
}

fn push_bullets<'a>(prompt: &mut String, items: impl Iterator<Item = &'a Principle>) {
    for p in items {
        prompt.push_str("- ");
        prompt.push_str(p.as_str());
        prompt.push('\n');
    }
}
