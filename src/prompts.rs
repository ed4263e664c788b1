use crate::events::PracticeMode;
use serde::{Deserialize, Serialize};

/// Return the canonical system prompt for a given mode.
pub fn mode_prompt(mode: PracticeMode) -> &'static str {
    match mode {
        PracticeMode::InterviewPractice => INTERVIEW_PROMPT,
        PracticeMode::Debate => DEBATE_PROMPT,
        PracticeMode::SmallTalk => SMALL_TALK_PROMPT,
        PracticeMode::Presentation => PRESENTATION_PROMPT,
        PracticeMode::Negotiation => NEGOTIATION_PROMPT,
    }
}

/// Questions every tailored interview opens with, in order.
pub const SUGGESTED_INTERVIEW_QUESTIONS: [&str; 5] = [
    "Walk me through your background and what brings you to this role.",
    "Tell me about a project you are proud of and your specific contribution.",
    "Describe a time you had to learn something quickly to deliver.",
    "How have you handled disagreement with a teammate or manager?",
    "What questions do you have for us?",
];

/// Result of analysing a résumé against a job description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentAnalysis {
    #[serde(default)]
    pub role_title: Option<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub gaps: Vec<String>,
}

impl DocumentAnalysis {
    pub fn is_empty(&self) -> bool {
        self.strengths.is_empty() && self.gaps.is_empty()
    }
}

/// Specialised interviewer prompt, or `None` when the mode or analysis does not call for one.
pub fn interview_prompt(mode: PracticeMode, analysis: Option<&DocumentAnalysis>) -> Option<String> {
    if mode != PracticeMode::InterviewPractice {
        return None;
    }
    let analysis = analysis.filter(|a| !a.is_empty())?;

    let mut prompt = String::from(INTERVIEW_PROMPT);
    prompt.push_str("\n\nCandidate profile from their documents:\n");

    if let Some(role) = analysis.role_title.as_deref().filter(|r| !r.trim().is_empty()) {
        prompt.push_str(&format!("Target role: {}\n", role.trim()));
    }

    push_section(&mut prompt, "Strengths to explore in depth", &analysis.strengths);
    push_section(&mut prompt, "Gaps to explore gently", &analysis.gaps);

    prompt.push_str("\nWork through these questions in order, one at a time, adapting follow-ups to the answers:\n");
    for (i, question) in SUGGESTED_INTERVIEW_QUESTIONS.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, question));
    }

    Some(prompt)
}

fn push_section(prompt: &mut String, title: &str, items: &[String]) {
    let items: Vec<&str> = items.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
    if items.is_empty() {
        return;
    }
    prompt.push_str(&format!("{}:\n", title));
    for item in items {
        prompt.push_str(&format!("- {}\n", item));
    }
}

const INTERVIEW_PROMPT: &str = r#"You are a professional interviewer running a realistic mock job interview.

- Ask one question at a time and wait for the answer.
- Follow up on vague answers and ask for concrete examples.
- Keep a warm but professional tone; do not coach during the interview unless asked.
- Keep each turn under 120 words."#;

const DEBATE_PROMPT: &str = r#"You are a sharp, fair debate partner.

- Take the opposing side of whatever position the user argues.
- Make one clear point per turn and rebut the user's strongest claim.
- Stay civil and cite reasoning, not insults.
- Keep each turn under 120 words."#;

const SMALL_TALK_PROMPT: &str = r#"You are a friendly conversation partner helping someone practise small talk.

- Keep the conversation light and natural.
- Ask open questions and share small details about yourself to keep it flowing.
- Keep each turn to two or three sentences."#;

const PRESENTATION_PROMPT: &str = r#"You are an attentive audience member at the user's presentation.

- Let the user present; respond with the kind of question a real audience would ask.
- Occasionally challenge an unclear claim or ask for evidence.
- Keep each turn under 80 words."#;

const NEGOTIATION_PROMPT: &str = r#"You are the counterpart in a negotiation the user wants to practise.

- Hold a realistic position and concede only when given good reasons.
- Push back on weak arguments and dig into the user's priorities.
- Keep each turn under 100 words."#;
