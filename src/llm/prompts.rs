use super::{GenerationRequest, SamplingParams};

/// Stop sequences sent with every request and scrubbed from raw completions
pub const STOP_SEQUENCES: &[&str] = &["### Input:", "Previous Summaries:", "}\n "];

const PREAMBLE: &str = "Below is an instruction that describes a task, paired with an input that provides further context. Write a response that appropriately completes the request.";

const SUMMARY_INSTRUCTION: &str = "Summarize the given story content in chronological order, focusing the summary on the actions of the relevant characters/speakers. Limit the summary to 100 words or less.";

/// Worked example shown before the real summary input
const SUMMARY_EXAMPLE: &str = r#"### Input:
Relevant Characters: Character_1, Character_2
Story Content:
```
Character_1 waited at the ferry dock with a crumpled ticket in her fist. The last boat was already pulling away.
"You're late again," Character_2 called from the deck, laughing.
"Turn it around!" Character_1 shouted back, but the ferry only sounded its horn.
```

### Response:
Character_1 arrived at the ferry dock too late to board the last boat. Character_2, already on deck, teased her for being late again, and ignored her shouted demand to turn the ferry around."#;

const ATTRIBUTION_INSTRUCTION: &str = r#"You will get:
1. A list of characters in the story so far
2. A summary of the story so far
3. A part of the story
4. Some lines removed from that part of the story

Your task: Use the list, summary, and story part to figure out who said or did the removed lines."#;

const ATTRIBUTION_QUESTIONS: &str = r#"Using all the information above, think about:
1. What action or dialogue in the line is the speaker doing/talking about?
2. Who is the line talking to? Is it a group of people or just one person? If the character is unnamed, use a collective term, for example a group name/species. Use the story excerpt context clues for this.
3. Who said/acted the line based on the story excerpt and by looking for phrases like "Character_1 said" or "Character_2 smiled"

Respond using JSON."#;

/// Worked example shown before the real attribution input
const ATTRIBUTION_EXAMPLE: &str = r#"### Input:
List of characters: Character_1, Character_2
Summary: Character_1 runs a small bakery. Character_2, a regular customer, has come in before closing.
Story Excerpt:
```
The bell over the door rang as Character_2 stepped inside, shaking rain from his coat.
"We're almost closed," Character_1 said without looking up from the counter.
"Then I'll be quick. One loaf, the usual."
Character_1 sighed and reached for the last loaf on the shelf.
```

Extracted Lines:
Line1: "We're almost closed," Character_1 said without looking up from the counter.
Line2: "Then I'll be quick. One loaf, the usual."

Using all the information above, think about who said or did each line.

### Response:
{
  "Line1": {
    "action": "Character_1 tells Character_2 the bakery is closing",
    "talking_to": "Character_2",
    "speaker": "Character_1"
  },
  "Line2": {
    "action": "Character_2 orders his usual loaf",
    "talking_to": "Character_1",
    "speaker": "Character_2"
  }
}"#;

/// Sampling used for both summaries and attributions
pub fn default_sampling() -> SamplingParams {
    SamplingParams {
        temperature: 0.5,
        max_length: 500,
        top_p: None,
        top_k: None,
    }
}

pub fn stop_sequences() -> Vec<String> {
    STOP_SEQUENCES.iter().map(|s| s.to_string()).collect()
}

/// Build the summarization prompt.
///
/// `characters` should only contain recently active characters; the previous
/// summary is carried forward so the plot stays continuous.
pub fn build_summary_prompt(characters: &[String], previous_summary: &str, story: &[String]) -> String {
    let mut prompt = String::new();
    prompt.push_str(PREAMBLE);
    prompt.push_str("\n\n### Instruction:\n");
    prompt.push_str(SUMMARY_INSTRUCTION);
    prompt.push_str("\n\n");
    prompt.push_str(SUMMARY_EXAMPLE);
    prompt.push_str("\n\n### Input:\n");
    prompt.push_str(&format!("Relevant Characters: {}\n", characters.join(", ")));
    if !previous_summary.trim().is_empty() {
        prompt.push_str(&format!("Summary of earlier events: {}\n", previous_summary.trim()));
    }
    prompt.push_str("Story Content:\n```\n");
    prompt.push_str(&story.join("\n"));
    prompt.push_str("\n```\n\n### Response:\n");
    prompt
}

/// Build the attribution prompt for the current lines of a window.
pub fn build_attribution_prompt(
    characters: &[String],
    summary: &str,
    excerpt: &str,
    lines: &[String],
) -> String {
    let mut prompt = String::new();
    prompt.push_str(PREAMBLE);
    prompt.push_str("\n\n### Instruction:\n");
    prompt.push_str(ATTRIBUTION_INSTRUCTION);
    prompt.push_str("\n\n");
    prompt.push_str(ATTRIBUTION_EXAMPLE);
    prompt.push_str("\n\n### Input:\n");
    prompt.push_str(&format!("List of characters: {}\n", characters.join(", ")));
    prompt.push_str(&format!("Summary: {}\n", summary.trim()));
    prompt.push_str("Story Excerpt:\n```\n");
    prompt.push_str(excerpt);
    prompt.push_str("\n```\n\nExtracted Lines:\n");
    for (k, line) in lines.iter().enumerate() {
        prompt.push_str(&format!("Line{}: {}\n", k + 1, line));
    }
    prompt.push('\n');
    prompt.push_str(ATTRIBUTION_QUESTIONS);
    prompt.push_str("\n\n### Response:\n");
    prompt
}

/// Wrap a built prompt with the default sampling and stop sequences.
pub fn prompt_request(prompt: String) -> GenerationRequest {
    GenerationRequest::new(prompt)
        .with_sampling(default_sampling())
        .with_stop_sequences(&stop_sequences())
}
